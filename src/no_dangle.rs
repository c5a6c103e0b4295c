//! Observers that never dangle.
//!
//! A [`NoDanglePtr`] owns a node linked into its object's ring. It does not
//! count as an owner. When the last owner leaves, every observer in the ring
//! is detached before the object is destroyed, so an observer's pointer is
//! always either live or null.
//!
//! Observers may also watch objects that are not managed by a [`ListPtr`] at
//! all, by embedding an [`Anchor`] in the object. See [`Anchored`].
use crate::{
    deleter::ErasedDeleter,
    error::UpgradeError,
    ring::{self, Member, Ring},
    upcast::Upcast,
    util::FmtOption,
    ListPtr,
};
use core::{fmt, marker::PhantomData, pin::Pin, ptr::NonNull};

#[cfg(test)]
mod tests;

/// A non-owning pointer that is nulled when its object is destroyed.
///
/// # Examples
///
/// ```
/// use list_ptr::{ListPtr, NoDanglePtr};
///
/// let owner = ListPtr::new(7);
/// let observer = NoDanglePtr::new(&owner);
/// assert_eq!(observer.get(), owner.as_ptr());
///
/// // observers never keep the object alive.
/// assert_eq!(owner.use_count(), 1);
///
/// drop(owner);
/// assert_eq!(observer.get(), None);
/// ```
pub struct NoDanglePtr<T: ?Sized> {
    ptr: Option<NonNull<T>>,
    member: Option<Member>,
    _observes: PhantomData<*const T>,
}

/// The head of an observer ring embedded in an object.
///
/// Objects that contain an `Anchor` and implement [`Anchored`] can be observed
/// by [`NoDanglePtr`]s without being owned by a [`ListPtr`]. The anchor acts as
/// the ring's only owner: dropping the object drops the anchor, which nulls
/// every observer.
///
/// An anchor does nothing until it is first observed, which requires the
/// object to be pinned.
pub struct Anchor {
    ring: Ring,
}

/// Types that embed an [`Anchor`].
///
/// # Safety
///
/// [`anchor`](Self::anchor) must always return the same `Anchor`, and it must
/// be a field of `self` (possibly nested), so that it is pinned whenever `self`
/// is and dropped exactly when `self` is.
///
/// # Examples
///
/// ```
/// use list_ptr::{Anchor, Anchored, NoDanglePtr};
/// use std::pin::pin;
///
/// struct Widget {
///     anchor: Anchor,
///     id: u32,
/// }
///
/// unsafe impl Anchored for Widget {
///     fn anchor(&self) -> &Anchor {
///         &self.anchor
///     }
/// }
///
/// let observer = {
///     let widget = pin!(Widget { anchor: Anchor::new(), id: 1 });
///     let observer = NoDanglePtr::from_pinned(widget.as_ref());
///     assert_eq!(unsafe { observer.as_ref() }.map(|w| w.id), Some(1));
///     observer
/// };
///
/// // the widget has been dropped.
/// assert!(observer.is_null());
/// ```
pub unsafe trait Anchored {
    /// Returns the anchor embedded in `self`.
    fn anchor(&self) -> &Anchor;
}

// === impl NoDanglePtr ===

impl<T: ?Sized> NoDanglePtr<T> {
    /// Returns a null observer.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            ptr: None,
            member: None,
            _observes: PhantomData,
        }
    }

    /// Returns a new observer of `owner`'s object, exposing the same pointer
    /// as `owner`.
    ///
    /// If `owner` belongs to no ring, the observer is null.
    #[must_use]
    pub fn new(owner: &ListPtr<T>) -> Self {
        match owner.owner.as_ref() {
            Some(ring) => Self {
                ptr: owner.ptr,
                member: Some(ring.observe()),
                _observes: PhantomData,
            },
            None => Self::null(),
        }
    }

    /// Returns a new observer of an object that embeds an [`Anchor`].
    #[must_use]
    pub fn from_pinned(object: Pin<&T>) -> Self
    where
        T: Anchored,
    {
        let object = object.get_ref();
        // Safety: `Anchored` requires the anchor to be a field of the object,
        // so it is pinned for as long as the object is.
        let anchor = unsafe { Pin::new_unchecked(object.anchor()) };
        Self {
            ptr: Some(NonNull::from(object)),
            member: Some(anchor.observe()),
            _observes: PhantomData,
        }
    }

    /// Returns the observed pointer, or `None` if the object has been
    /// destroyed (or released by its last owner).
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<NonNull<T>> {
        if self.is_attached() {
            self.ptr
        } else {
            None
        }
    }

    /// Returns `true` if there is no live object to observe.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.get().is_none()
    }

    /// Returns a reference to the observed object, or `None` if it no longer
    /// exists.
    ///
    /// # Safety
    ///
    /// The object must not be destroyed while the returned reference is alive:
    /// no owner of the object may be dropped, reset or released, and an
    /// anchored object may not be dropped, until the reference goes away. Use
    /// [`NoDanglePtr::upgrade`] to hold the object alive safely instead.
    #[inline]
    #[must_use]
    pub unsafe fn as_ref(&self) -> Option<&T> {
        self.get().map(|ptr| ptr.as_ref())
    }

    /// Returns a new owner of the observed object, or `None` if it is no longer
    /// alive or is not owned by a [`ListPtr`].
    ///
    /// ```
    /// use list_ptr::ListPtr;
    ///
    /// let owner = ListPtr::new(String::from("still here"));
    /// let observer = owner.observe();
    ///
    /// let upgraded = observer.upgrade().expect("object is alive");
    /// drop(owner);
    /// assert_eq!(&*upgraded, "still here");
    ///
    /// drop(upgraded);
    /// assert!(observer.upgrade().is_none());
    /// ```
    #[must_use]
    pub fn upgrade(&self) -> Option<ListPtr<T>> {
        self.try_upgrade().ok()
    }

    /// Returns a new owner of the observed object.
    ///
    /// # Errors
    ///
    /// - [`UpgradeError::Invalidated`] if the object is no longer alive, or this
    ///   observer is null.
    /// - [`UpgradeError::Unowned`] if the object is [`Anchored`] rather than
    ///   owned by a [`ListPtr`].
    pub fn try_upgrade(&self) -> Result<ListPtr<T>, UpgradeError> {
        let ring = self
            .member
            .as_ref()
            .ok_or(UpgradeError::Invalidated)?
            .try_join_as_owner()?;
        let mut owner = ListPtr::null();
        owner.ptr = self.ptr;
        owner.owner = Some(ring);
        Ok(owner)
    }

    /// Converts this observer into an observer of a `U`, keeping its place in
    /// the ring.
    #[must_use]
    pub fn upcast<U: ?Sized>(mut self) -> NoDanglePtr<U>
    where
        T: Upcast<U>,
    {
        NoDanglePtr {
            ptr: self.ptr.take().map(<T as Upcast<U>>::upcast),
            member: self.member.take(),
            _observes: PhantomData,
        }
    }

    #[inline]
    fn is_attached(&self) -> bool {
        self.member.as_ref().is_some_and(Member::is_attached)
    }

    #[cfg(test)]
    pub(crate) fn assert_valid(&self) {
        if let Some(member) = self.member.as_ref() {
            member.assert_valid();
        }
    }
}

impl<T: ?Sized> Clone for NoDanglePtr<T> {
    /// Returns a new observer of the same object, or a null observer if the
    /// object is gone.
    fn clone(&self) -> Self {
        match self.member.as_ref().and_then(Member::join_as_observer) {
            Some(member) => Self {
                ptr: self.ptr,
                member: Some(member),
                _observes: PhantomData,
            },
            None => Self::null(),
        }
    }
}

impl<T: ?Sized> Default for NoDanglePtr<T> {
    #[inline]
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized> From<&ListPtr<T>> for NoDanglePtr<T> {
    fn from(owner: &ListPtr<T>) -> Self {
        Self::new(owner)
    }
}

impl<T: ?Sized> PartialEq for NoDanglePtr<T> {
    /// Two observers are equal if they currently observe the same address.
    /// All null observers are equal.
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.get().map(NonNull::cast::<()>) == other.get().map(NonNull::cast::<()>)
    }
}

impl<T: ?Sized> Eq for NoDanglePtr<T> {}

impl<T: ?Sized> fmt::Debug for NoDanglePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoDanglePtr")
            .field(
                "ptr",
                &format_args!("{:p}", FmtOption::new(&self.get()).or_else("null")),
            )
            .finish()
    }
}

impl<T: ?Sized> fmt::Pointer for NoDanglePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&FmtOption::new(&self.get()).or_else("null"), f)
    }
}

// === impl Anchor ===

impl Anchor {
    /// Returns a new anchor with no observers.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: Ring::new(ErasedDeleter::EMBEDDED, false),
        }
    }

    /// Returns `true` if any observers are watching this anchor.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.ring.is_observed()
    }

    fn observe(self: Pin<&Self>) -> Member {
        // Safety: the anchor is pinned, and stays its ring's owner until it is
        // dropped.
        unsafe { ring::observe(NonNull::from(&self.get_ref().ring)) }
    }
}

impl Default for Anchor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Anchor {
    fn drop(&mut self) {
        // Safety: an observed anchor has been pinned, so its header has not
        // moved since observers linked to it.
        unsafe { ring::leave(NonNull::from(&self.ring)) }
    }
}

impl fmt::Debug for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Anchor").field("ring", &self.ring).finish()
    }
}
