//! The owning handle.
//!
//! See the [`ListPtr`] type for details.
use crate::{
    deleter::{DefaultDelete, Deleter},
    ring::{Owner, Released, Ring},
    upcast::Upcast,
    util::FmtOption,
    NoDanglePtr,
};
use alloc::boxed::Box;
use core::{
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::NonNull,
};


/// A shared-ownership pointer whose owners are tracked by an intrusive ring.
///
/// Every `ListPtr` that shares ownership of an object is counted by that
/// object's ring, and every [`NoDanglePtr`] observing it is linked into the
/// ring. Cloning a `ListPtr` never allocates. When the last owner leaves, the
/// observers are detached and then the ring's [`Deleter`] destroys the object,
/// so every observer is null by the time the object's destructor runs.
///
/// A `ListPtr` hands out shared references only, and, as the ring is not
/// synchronized, it is neither [`Send`] nor [`Sync`].
///
/// # Examples
///
/// ```
/// use list_ptr::ListPtr;
///
/// let a = ListPtr::new(String::from("hello"));
/// assert_eq!(a.use_count(), 1);
///
/// let b = a.clone();
/// assert_eq!(a.use_count(), 2);
/// assert_eq!(a, b);
///
/// let observer = a.observe();
/// drop(a);
/// assert_eq!(b.use_count(), 1);
/// assert!(!observer.is_null());
///
/// drop(b);
/// assert!(observer.is_null());
/// ```
///
/// Handles are not thread-safe:
///
/// ```compile_fail
/// use list_ptr::ListPtr;
///
/// let ptr = ListPtr::new(1);
/// std::thread::spawn(move || drop(ptr));
/// ```
///
pub struct ListPtr<T: ?Sized> {
    pub(crate) ptr: Option<NonNull<T>>,
    pub(crate) owner: Option<Owner>,
    _owns: PhantomData<T>,
}

/// Moves `value` to the heap and returns its first owner.
///
/// This is equivalent to [`ListPtr::new`], and makes a single allocation.
#[inline]
pub fn make_list_ptr<T>(value: T) -> ListPtr<T> {
    ListPtr::new(value)
}

// === impl ListPtr ===

impl<T> ListPtr<T> {
    /// Moves `value` to the heap and returns its first owner.
    ///
    /// The value shares one allocation with its ring.
    ///
    /// # Examples
    ///
    /// ```
    /// use list_ptr::ListPtr;
    ///
    /// let ptr = ListPtr::new(42);
    /// assert_eq!(*ptr, 42);
    /// assert_eq!(ptr.use_count(), 1);
    /// ```
    #[must_use]
    pub fn new(value: T) -> Self {
        let (owner, ptr) = Owner::create_inline(value);
        Self {
            ptr: Some(ptr),
            owner: Some(owner),
            _owns: PhantomData,
        }
    }
}

impl<T: ?Sized> ListPtr<T> {
    /// Returns a null `ListPtr`, which owns nothing and belongs to no ring.
    ///
    /// ```
    /// use list_ptr::ListPtr;
    ///
    /// let ptr = ListPtr::<u8>::null();
    /// assert!(ptr.is_null());
    /// assert_eq!(ptr.use_count(), 0);
    /// ```
    #[must_use]
    pub const fn null() -> Self {
        Self {
            ptr: None,
            owner: None,
            _owns: PhantomData,
        }
    }

    /// Takes ownership of a boxed value.
    ///
    /// This allocates the ring's header; prefer [`ListPtr::new`] for values
    /// that are not boxed yet.
    #[must_use]
    pub fn from_box(value: Box<T>) -> Self {
        let ptr = NonNull::from(Box::leak(value));
        Self::bind(Some(ptr), DefaultDelete)
    }

    /// Takes ownership of the object at `ptr`, which will be freed as a
    /// [`Box`].
    ///
    /// A null `ptr` still creates a ring with one owner, but there is nothing
    /// to destroy when that owner leaves. Either way, this allocates the ring's
    /// header, and no other operation on its owners allocates.
    ///
    /// # Safety
    ///
    /// `ptr` must either be null or have been produced by [`Box::into_raw`],
    /// and nothing else may free it.
    ///
    /// ```
    /// use list_ptr::ListPtr;
    ///
    /// let raw = Box::into_raw(Box::new(7));
    /// let ptr = unsafe { ListPtr::from_raw(raw) };
    /// assert_eq!(*ptr, 7);
    ///
    /// let null = unsafe { ListPtr::<i32>::from_raw(std::ptr::null_mut()) };
    /// assert!(null.is_null());
    /// assert_eq!(null.use_count(), 1);
    /// ```
    #[must_use]
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Self::from_raw_in(ptr, DefaultDelete)
    }

    /// Takes ownership of the object at `ptr`, which `deleter` will destroy
    /// once the last owner leaves.
    ///
    /// If `ptr` is null, `deleter` is never invoked; it is simply dropped with
    /// the ring.
    ///
    /// # Safety
    ///
    /// `ptr` must either be null or point to an object that stays valid until
    /// `deleter` is invoked on it, and `deleter` must be sound to invoke on
    /// `ptr` exactly once.
    #[must_use]
    pub unsafe fn from_raw_in<D>(ptr: *mut T, deleter: D) -> Self
    where
        D: Deleter<T> + 'static,
    {
        Self::bind(NonNull::new(ptr), deleter)
    }

    fn bind<D>(ptr: Option<NonNull<T>>, deleter: D) -> Self
    where
        D: Deleter<T> + 'static,
    {
        Self {
            ptr,
            owner: Some(Owner::create_ring(ptr, deleter)),
            _owns: PhantomData,
        }
    }

    /// Returns a reference to the managed object, or `None` if this pointer is
    /// null.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.ptr.as_ref().map(|ptr| unsafe { ptr.as_ref() })
    }

    /// Returns the stored pointer.
    ///
    /// For an [aliasing](Self::alias) handle this is the alias, not the
    /// pointer the ring will destroy.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Returns `true` if the stored pointer is null.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// Returns the number of owners in this pointer's ring, or zero if it
    /// belongs to no ring.
    #[inline]
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.owner.as_ref().map_or(0, Owner::use_count)
    }

    /// Returns `true` if `self` and `other` share ownership of the same ring,
    /// regardless of the pointers they expose.
    #[must_use]
    pub fn same_owner<U: ?Sized>(&self, other: &ListPtr<U>) -> bool {
        match (self.ring(), other.ring()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Leaves this pointer's ring, destroying the object if this was its last
    /// owner. The pointer is null afterwards.
    pub fn reset(&mut self) {
        drop(self.take());
    }

    /// Replaces the managed object with a newly boxed one.
    ///
    /// The new ring is created before the old one is left.
    pub fn reset_with(&mut self, value: Box<T>) {
        *self = Self::from_box(value);
    }

    /// Replaces the managed object with the object at `ptr`.
    ///
    /// # Safety
    ///
    /// The same requirements as [`ListPtr::from_raw`].
    pub unsafe fn reset_raw(&mut self, ptr: *mut T) {
        *self = Self::from_raw(ptr);
    }

    /// Moves the handle out of `self`, leaving a null pointer behind.
    ///
    /// The ring is untouched: the returned handle takes over this handle's
    /// place in it.
    #[must_use]
    pub fn take(&mut self) -> Self {
        mem::replace(self, Self::null())
    }

    /// Leaves this pointer's ring *without* destroying the object, returning
    /// the stored pointer.
    ///
    /// If this was the last owner, the ring dies: its deleter is dropped
    /// without running, any observers become null, and the caller is now
    /// responsible for the object. If other owners remain, they keep the
    /// object alive and will destroy it as usual.
    ///
    /// An object created by [`ListPtr::new`] shares an allocation with its
    /// ring. Releasing its last owner moves it into a [`Box`] of its own, and
    /// the returned pointer points into that `Box`.
    ///
    /// ```
    /// use list_ptr::ListPtr;
    ///
    /// let mut ptr = ListPtr::new(5);
    /// let observer = ptr.observe();
    ///
    /// let raw = ptr.release().expect("pointer is not null");
    /// assert!(ptr.is_null());
    /// assert!(observer.is_null());
    ///
    /// // we own the object now.
    /// let value = unsafe { Box::from_raw(raw.as_ptr()) };
    /// assert_eq!(*value, 5);
    /// ```
    pub fn release(&mut self) -> Option<NonNull<T>> {
        let ptr = self.ptr.take();
        let Some(owner) = self.owner.take() else {
            return ptr;
        };
        match owner.release() {
            Released::Shared => ptr,
            Released::Last => {
                tracing::trace!(ptr = ?FmtOption::new(&ptr), "released last owner");
                ptr
            }
            Released::Moved(moved) => {
                let ptr = ptr.map(|ptr| moved.rebase(ptr));
                tracing::trace!(ptr = ?FmtOption::new(&ptr), ?moved, "released last owner");
                ptr
            }
        }
    }

    /// Returns a new observer of this pointer's object.
    ///
    /// See [`NoDanglePtr::new`].
    #[must_use]
    pub fn observe(&self) -> NoDanglePtr<T> {
        NoDanglePtr::new(self)
    }

    /// Converts this handle into a handle to a `U`, keeping its place in the
    /// ring. This never allocates.
    ///
    /// The ring keeps its original deleter, so the object is still destroyed
    /// as the type it was created as. See the [`upcast`](crate::upcast)
    /// module.
    #[must_use]
    pub fn upcast<U: ?Sized>(mut self) -> ListPtr<U>
    where
        T: Upcast<U>,
    {
        ListPtr {
            ptr: self.ptr.take().map(<T as Upcast<U>>::upcast),
            owner: self.owner.take(),
            _owns: PhantomData,
        }
    }

    /// Returns a new owner of this pointer's object, as a handle to a `U`.
    #[must_use]
    pub fn upcast_cloned<U: ?Sized>(&self) -> ListPtr<U>
    where
        T: Upcast<U>,
    {
        self.clone().upcast()
    }

    /// Returns a new owner of this pointer's object that exposes `ptr`
    /// instead.
    ///
    /// The returned handle shares this ring's lifetime and deleter: the
    /// object is destroyed when the last owner leaves, whichever pointer that
    /// owner exposes. If `self` belongs to no ring, the returned handle owns
    /// nothing.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or stay valid for as long as this ring has owners,
    /// typically because it points into the managed object.
    #[must_use]
    pub unsafe fn alias<U: ?Sized>(&self, ptr: *const U) -> ListPtr<U> {
        ListPtr {
            ptr: NonNull::new(ptr as *mut U),
            owner: self.owner.clone(),
            _owns: PhantomData,
        }
    }

    /// Converts this handle into one that exposes `ptr` instead, keeping its
    /// place in the ring.
    ///
    /// # Safety
    ///
    /// The same requirements as [`ListPtr::alias`].
    #[must_use]
    pub unsafe fn into_alias<U: ?Sized>(mut self, ptr: *const U) -> ListPtr<U> {
        ListPtr {
            ptr: NonNull::new(ptr as *mut U),
            owner: self.owner.take(),
            _owns: PhantomData,
        }
    }

    /// Returns a new owner of this pointer's object that exposes a part of
    /// it.
    ///
    /// This is the safe form of [`ListPtr::alias`]. If `self` is null, so is
    /// the returned pointer, but it still joins the ring.
    ///
    /// ```
    /// use list_ptr::ListPtr;
    ///
    /// struct Pair {
    ///     name: String,
    ///     value: u32,
    /// }
    ///
    /// let pair = ListPtr::new(Pair { name: "answer".into(), value: 42 });
    /// let name = pair.map(|pair| pair.name.as_str());
    /// drop(pair);
    ///
    /// // `name` still keeps the whole `Pair` alive.
    /// assert_eq!(&*name, "answer");
    /// assert_eq!(name.use_count(), 1);
    /// ```
    #[must_use]
    pub fn map<U: ?Sized>(&self, f: impl FnOnce(&T) -> &U) -> ListPtr<U>
    where
        T: 'static,
    {
        let ptr = self.get().map(|value| NonNull::from(f(value)));
        ListPtr {
            ptr,
            owner: self.owner.clone(),
            _owns: PhantomData,
        }
    }

    #[inline]
    fn ring(&self) -> Option<NonNull<Ring>> {
        self.owner.as_ref().map(Owner::ring)
    }

    #[inline]
    fn addr(&self) -> Option<NonNull<()>> {
        self.ptr.map(NonNull::cast)
    }

    #[cfg(test)]
    pub(crate) fn assert_valid(&self) {
        if let Some(owner) = self.owner.as_ref() {
            owner.assert_valid();
        }
    }
}

impl<T: ?Sized> Clone for ListPtr<T> {
    /// Returns a new owner of the same object, without allocating.
    fn clone(&self) -> Self {
        Self {
            ptr: self.ptr,
            owner: self.owner.clone(),
            _owns: PhantomData,
        }
    }

    /// Makes `self` an owner of `source`'s object.
    ///
    /// If `self` already shares `source`'s ring and pointer, this does
    /// nothing.
    fn clone_from(&mut self, source: &Self) {
        if self.addr() == source.addr() && self.ring() == source.ring() {
            return;
        }
        *self = source.clone();
    }
}

impl<T: ?Sized> Default for ListPtr<T> {
    #[inline]
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized> Deref for ListPtr<T> {
    type Target = T;

    /// # Panics
    ///
    /// If the pointer is null. Use [`ListPtr::get`] to check first.
    #[inline]
    #[track_caller]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("attempted to dereference a null `ListPtr`"),
        }
    }
}

impl<T: ?Sized> From<Box<T>> for ListPtr<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T> From<T> for ListPtr<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> PartialEq for ListPtr<T> {
    /// Two pointers are equal if they point to the same address, even if they
    /// belong to different rings. All null pointers are equal.
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized> Eq for ListPtr<T> {}

impl<T: ?Sized> Hash for ListPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state)
    }
}

impl<T: ?Sized> fmt::Debug for ListPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListPtr")
            .field(
                "ptr",
                &format_args!("{:p}", FmtOption::new(&self.ptr).or_else("null")),
            )
            .field("use_count", &self.use_count())
            .finish()
    }
}

impl<T: ?Sized> fmt::Pointer for ListPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&FmtOption::new(&self.ptr).or_else("null"), f)
    }
}
