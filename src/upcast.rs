//! Converting handles between pointee types.
//!
//! [`ListPtr::upcast`] and friends accept any conversion for which the source
//! pointee implements [`Upcast`]. Every type can be "upcast" to itself, and the
//! [`upcast!`] macro implements the trait for unsizing coercions, such as a
//! concrete type to a trait object it implements:
//!
//! ```
//! use list_ptr::{upcast, ListPtr};
//!
//! trait Shape {
//!     fn area(&self) -> f64;
//! }
//!
//! struct Square(f64);
//!
//! impl Shape for Square {
//!     fn area(&self) -> f64 {
//!         self.0 * self.0
//!     }
//! }
//!
//! upcast!(Square => dyn Shape);
//!
//! let square = ListPtr::new(Square(2.0));
//! let shape: ListPtr<dyn Shape> = square.upcast_cloned();
//! assert_eq!(shape.area(), 4.0);
//! assert_eq!(shape.use_count(), 2);
//! ```
//!
//! The predicate is checked when the conversion is written, so converting to an
//! unrelated type is a compile error:
//!
//! ```compile_fail
//! use list_ptr::ListPtr;
//!
//! let int = ListPtr::new(1_u32);
//! let float: ListPtr<f64> = int.upcast();
//! ```
//!
//! [`ListPtr::upcast`]: crate::ListPtr::upcast
use core::ptr::NonNull;

/// Permits viewing a `Self` as a `U`.
///
/// This is the predicate behind converting handle constructors: a
/// `ListPtr<Y>` may become a `ListPtr<U>` exactly when `Y: Upcast<U>`. The
/// ring keeps the deleter it was born with, so the object is always destroyed
/// as the type it was created as.
///
/// Most implementations should be written with the [`upcast!`] macro.
///
/// # Safety
///
/// [`upcast`](Self::upcast) must return a pointer to the object passed in, or
/// to a part of it that lives exactly as long as the object. It must not
/// depend on anything but its argument.
pub unsafe trait Upcast<U: ?Sized> {
    /// Converts a pointer to `Self` into a pointer to `U`.
    fn upcast(ptr: NonNull<Self>) -> NonNull<U>;
}

unsafe impl<T: ?Sized> Upcast<T> for T {
    #[inline]
    fn upcast(ptr: NonNull<T>) -> NonNull<T> {
        ptr
    }
}

/// Implements [`Upcast`] for one or more unsizing coercions.
///
/// Each `From => To` pair must be a valid unsizing coercion (typically a
/// concrete type to a trait object it implements); anything else fails to
/// compile.
///
/// ```
/// use list_ptr::{upcast, ListPtr};
/// use std::fmt::Debug;
///
/// #[derive(Debug)]
/// struct Point(i32, i32);
///
/// #[derive(Debug)]
/// struct Bytes([u8; 4]);
///
/// upcast!(Point => dyn Debug, Bytes => dyn Debug);
///
/// let point: ListPtr<dyn Debug> = ListPtr::new(Point(1, 2)).upcast();
/// assert_eq!(format!("{:?}", &*point), "Point(1, 2)");
///
/// let bytes: ListPtr<dyn Debug> = ListPtr::new(Bytes([1, 2, 3, 4])).upcast();
/// assert_eq!(format!("{:?}", &*bytes), "Bytes([1, 2, 3, 4])");
/// ```
#[macro_export]
macro_rules! upcast {
    ($($from:ty => $to:ty),+ $(,)?) => {
        $(
            unsafe impl $crate::Upcast<$to> for $from {
                #[inline]
                fn upcast(ptr: ::core::ptr::NonNull<Self>) -> ::core::ptr::NonNull<$to> {
                    ptr
                }
            }
        )+
    };
}
