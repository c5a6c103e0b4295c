#![cfg_attr(docsrs, doc = include_str!("../README.md"))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, deny(missing_docs))]
#![cfg_attr(not(any(feature = "std", test)), no_std)]

extern crate alloc;
#[cfg(test)]
extern crate std;

#[macro_use]
pub(crate) mod util;

pub mod deleter;
pub mod error;
pub mod upcast;

mod list_ptr;
mod no_dangle;
mod ring;

#[cfg(test)]
mod test_util;

#[doc(inline)]
pub use self::deleter::{DefaultDelete, Deleter};
#[doc(inline)]
pub use self::error::UpgradeError;
pub use self::list_ptr::{make_list_ptr, ListPtr};
pub use self::no_dangle::{Anchor, Anchored, NoDanglePtr};
#[doc(inline)]
pub use self::upcast::Upcast;
