//! Deleters: how a managed object is destroyed once its last owner leaves.
//!
//! A [`ListPtr`] is created with a [`Deleter`]. The deleter is moved into the
//! ring's header when the ring is born, together with the pointer exactly as it
//! was passed in, and is consumed by value when the last owner leaves the ring.
//! Because the header remembers the *original* pointee type, a ring keeps
//! destroying the right type no matter which [upcast] or [aliasing] handles
//! outlive the one that created it.
//!
//! Objects created by [`ListPtr::new`] need no deleter at all: they are
//! stored inside the ring's header allocation, and destroyed in place.
//!
//! [`ListPtr`]: crate::ListPtr
//! [upcast]: crate::ListPtr::upcast
//! [aliasing]: crate::ListPtr::alias
//! [`ListPtr::new`]: crate::ListPtr::new
use crate::ring::Ring;
use alloc::boxed::Box;
use core::{
    fmt,
    mem::{self, ManuallyDrop},
    ptr::{self, NonNull},
};

/// Destroys a managed object.
///
/// This is implemented by [`DefaultDelete`], which frees a [`Box`], and by
/// every closure or function pointer that accepts a `NonNull<T>`:
///
/// ```
/// use list_ptr::ListPtr;
/// use std::ptr::NonNull;
///
/// fn noisy_delete(ptr: NonNull<String>) {
///     let value = unsafe { Box::from_raw(ptr.as_ptr()) };
///     println!("dropping {value}");
/// }
///
/// let raw = Box::into_raw(Box::new(String::from("hello")));
/// let ptr = unsafe { ListPtr::from_raw_in(raw, noisy_delete as fn(NonNull<String>)) };
/// assert_eq!(&*ptr, "hello");
/// ```
pub trait Deleter<T: ?Sized> {
    /// Destroys the object at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be the pointer that this deleter was paired with when the
    /// owning ring was created, and the object must not be accessed again
    /// afterwards. A ring calls this at most once.
    unsafe fn delete(self, ptr: NonNull<T>);
}

/// The default [`Deleter`], which destroys an object allocated by [`Box`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DefaultDelete;

/// The deleter captured at ring birth, with its pointee and deleter types
/// erased.
#[derive(Copy, Clone)]
pub(crate) struct ErasedDeleter {
    invoke: unsafe fn(NonNull<Ring>),
    release: unsafe fn(NonNull<Ring>) -> Option<Moved>,
    dealloc: unsafe fn(NonNull<Ring>),
}

/// Where a released object was moved to, when it could not stay in the ring's
/// allocation.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Moved {
    from: NonNull<u8>,
    to: NonNull<u8>,
    len: usize,
}

/// A ring header allocated together with the deleter and the original pointer.
#[repr(C)]
struct Bound<Y: ?Sized, D> {
    // Must be the first field, so that a pointer to the header is also a
    // pointer to the `Bound`.
    ring: Ring,
    target: Option<NonNull<Y>>,
    deleter: Option<D>,
}

/// A ring header allocated together with the object itself.
#[repr(C)]
struct Inline<Y> {
    // Must be the first field, as in `Bound`.
    ring: Ring,
    value: ManuallyDrop<Y>,
}

/// Allocates a ring header for `target`, owned by an erased `deleter`.
///
/// The returned header has no members yet.
pub(crate) fn bind<Y, D>(target: Option<NonNull<Y>>, deleter: D) -> NonNull<Ring>
where
    Y: ?Sized,
    D: Deleter<Y> + 'static,
{
    let bound = Box::new(Bound {
        ring: Ring::new(ErasedDeleter::of::<Y, D>(), true),
        target,
        deleter: Some(deleter),
    });
    NonNull::from(Box::leak(bound)).cast()
}

/// Allocates a ring header that stores `value` itself, returning the header
/// and a pointer to the value.
pub(crate) fn inline<Y>(value: Y) -> (NonNull<Ring>, NonNull<Y>) {
    let inline = NonNull::from(Box::leak(Box::new(Inline {
        ring: Ring::new(ErasedDeleter::inline::<Y>(), true),
        value: ManuallyDrop::new(value),
    })));
    // Derived from the raw allocation rather than a reference to the field,
    // so that it stays valid alongside the header pointer.
    let value = unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*inline.as_ptr()).value)) };
    (inline.cast(), value.cast())
}

// === impl DefaultDelete ===

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    #[inline]
    unsafe fn delete(self, ptr: NonNull<T>) {
        drop(Box::from_raw(ptr.as_ptr()))
    }
}

impl<T, F> Deleter<T> for F
where
    T: ?Sized,
    F: FnOnce(NonNull<T>),
{
    #[inline]
    unsafe fn delete(self, ptr: NonNull<T>) {
        self(ptr)
    }
}

// === impl ErasedDeleter ===

impl ErasedDeleter {
    /// A deleter that never destroys anything and owns no storage, for rings
    /// whose header lives inside the observed object.
    pub(crate) const EMBEDDED: Self = Self {
        invoke: noop,
        release: stay,
        dealloc: noop,
    };

    fn of<Y: ?Sized, D: Deleter<Y>>() -> Self {
        Self {
            invoke: Bound::<Y, D>::invoke,
            release: stay,
            dealloc: Bound::<Y, D>::dealloc,
        }
    }

    fn inline<Y>() -> Self {
        Self {
            invoke: Inline::<Y>::invoke,
            release: Inline::<Y>::release,
            dealloc: Inline::<Y>::dealloc,
        }
    }

    /// Runs the user deleter on the original pointer.
    ///
    /// # Safety
    ///
    /// `ring` must be the header this deleter was created for, and this may be
    /// called at most once.
    #[inline]
    pub(crate) unsafe fn invoke(self, ring: NonNull<Ring>) {
        (self.invoke)(ring)
    }

    /// Hands the object over to the caller instead of destroying it.
    ///
    /// Returns where the object went, if it had to leave the header's
    /// allocation. A moved object lives in a [`Box`] of its own.
    ///
    /// # Safety
    ///
    /// `ring` must be the header this deleter was created for, and neither
    /// this nor [`invoke`](Self::invoke) may have been called for it yet.
    #[inline]
    pub(crate) unsafe fn release(self, ring: NonNull<Ring>) -> Option<Moved> {
        (self.release)(ring)
    }

    /// Frees the ring header, dropping the user deleter if it never ran.
    ///
    /// # Safety
    ///
    /// `ring` must be the header this deleter was created for, it must have no
    /// members left, and it must not be used again.
    #[inline]
    pub(crate) unsafe fn dealloc(self, ring: NonNull<Ring>) {
        (self.dealloc)(ring)
    }
}

impl fmt::Debug for ErasedDeleter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedDeleter")
            .field("invoke", &format_args!("{:p}", self.invoke as *const ()))
            .field("release", &format_args!("{:p}", self.release as *const ()))
            .field("dealloc", &format_args!("{:p}", self.dealloc as *const ()))
            .finish()
    }
}

unsafe fn noop(_: NonNull<Ring>) {}

unsafe fn stay(_: NonNull<Ring>) -> Option<Moved> {
    None
}

// === impl Moved ===

impl Moved {
    /// Returns where `ptr` points now, if it pointed into the moved object.
    ///
    /// Pointers to anything else are returned unchanged.
    pub(crate) fn rebase<T: ?Sized>(&self, ptr: NonNull<T>) -> NonNull<T> {
        let offset = (ptr.cast::<u8>().as_ptr() as usize).wrapping_sub(self.from.as_ptr() as usize);
        if offset > self.len {
            return ptr;
        }
        let mut rebased = ptr.as_ptr();
        unsafe {
            let data = self.to.as_ptr().add(offset);
            // The data pointer is the first word of every pointer, wide or
            // not; this keeps the metadata of `ptr`.
            ptr::write(ptr::addr_of_mut!(rebased).cast::<*mut u8>(), data);
            NonNull::new_unchecked(rebased)
        }
    }
}

// === impl Bound ===

impl<Y: ?Sized, D: Deleter<Y>> Bound<Y, D> {
    unsafe fn invoke(ring: NonNull<Ring>) {
        let bound = ring.cast::<Self>().as_ptr();
        // A null pointer was never an object; the deleter is dropped unused.
        if let (Some(target), Some(deleter)) = ((*bound).target, (*bound).deleter.take()) {
            deleter.delete(target);
        }
    }

    unsafe fn dealloc(ring: NonNull<Ring>) {
        drop(Box::from_raw(ring.cast::<Self>().as_ptr()))
    }
}

// === impl Inline ===

impl<Y> Inline<Y> {
    unsafe fn invoke(ring: NonNull<Ring>) {
        let inline = ring.cast::<Self>().as_ptr();
        ManuallyDrop::drop(&mut (*inline).value);
    }

    unsafe fn release(ring: NonNull<Ring>) -> Option<Moved> {
        let inline = ring.cast::<Self>().as_ptr();
        let from = ptr::addr_of_mut!((*inline).value).cast::<u8>();
        let value = ManuallyDrop::take(&mut (*inline).value);
        let to = NonNull::from(Box::leak(Box::new(value))).cast::<u8>();
        Some(Moved {
            from: NonNull::new_unchecked(from),
            to,
            len: mem::size_of::<Y>(),
        })
    }

    /// Frees the allocation without touching the value, which has either been
    /// dropped or moved out by now.
    unsafe fn dealloc(ring: NonNull<Ring>) {
        drop(Box::from_raw(ring.cast::<Self>().as_ptr()))
    }
}
