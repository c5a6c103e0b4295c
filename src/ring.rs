//! The intrusive ring joining every handle to one managed object.
//!
//! Each managed object has one ring header. The header holds a [`Node`] of
//! its own, the *head*, which stands for every owner of the object at once: a
//! [`ListPtr`] never links a node of its own, it is counted in the header's
//! owner tally instead. Every [`NoDanglePtr`] owns one [`Node`], linked into a
//! circular doubly-linked list that starts and ends at the head.
//!
//! Sharing ownership bumps the tally, observing is a splice after the head,
//! and dropping an observer is an unlink. When the tally drops to zero, every
//! node still linked to the head is detached in a single sweep before the
//! object is destroyed.
//!
//! None of this is synchronized: a ring must only ever be touched from one
//! thread, which is why the handles are neither `Send` nor `Sync`.
//!
//! [`ListPtr`]: crate::ListPtr
//! [`NoDanglePtr`]: crate::NoDanglePtr
use crate::{
    deleter::{self, Deleter, ErasedDeleter, Moved},
    error::UpgradeError,
    util::{defer, FmtOption},
};
use alloc::boxed::Box;
use core::{
    cell::{Cell, UnsafeCell},
    fmt,
    marker::PhantomPinned,
    mem,
    ptr::NonNull,
};


/// A member of a ring.
///
/// An observer's node is *attached* while it belongs to a ring, and
/// *detached* after it has been swept out of one. Detached nodes have no
/// links. The head node of a ring never records a header; it is linked
/// exactly while the ring has observers.
pub(crate) struct Node {
    links: Links,
    ring: Cell<Option<NonNull<Ring>>>,
}

/// The header shared by every handle to one object.
pub(crate) struct Ring {
    head: Node,
    owners: Cell<usize>,
    deleter: ErasedDeleter,
    /// `false` for rings whose only owner is an [`Anchor`] embedded in the
    /// object itself. Such rings cannot be joined by new owners.
    ///
    /// [`Anchor`]: crate::Anchor
    owned: bool,
}

/// One owner of a ring, counted in the header's tally.
///
/// Cloning an `Owner` never allocates. Dropping the last one destroys the
/// object.
pub(crate) struct Owner {
    ring: NonNull<Ring>,
}

/// Owns one heap-allocated observer [`Node`], and removes it from its ring
/// when dropped.
///
/// Nodes are boxed because a handle may be moved at any time, but a linked
/// node must stay where its neighbors' links expect it.
pub(crate) struct Member {
    node: NonNull<Node>,
}

/// What became of an object whose owner released it.
#[derive(Debug)]
pub(crate) enum Released {
    /// Other owners remain, and will destroy the object as usual.
    Shared,
    /// The ring died, and the object is where it was.
    Last,
    /// The ring died, and the object was moved out of the ring's allocation.
    Moved(Moved),
}

struct Links {
    inner: UnsafeCell<LinksInner>,
}

type Link = Option<NonNull<Node>>;

#[repr(C)]
struct LinksInner {
    next: Link,
    prev: Link,
    /// Linked list links must always be `!Unpin`, in order to ensure that they
    /// never recieve LLVM `noalias` annotations; see also
    /// <https://github.com/rust-lang/rust/issues/63818>.
    _unpin: PhantomPinned,
}

// === ring operations ===

/// Links a new observer into `ring`, directly after its head.
///
/// # Safety
///
/// `ring` must be valid and have at least one owner, and it must not move
/// while it has observers.
pub(crate) unsafe fn observe(ring: NonNull<Ring>) -> Member {
    let member = Member::alloc();
    let node = member.node;
    let head = Ring::head(ring);
    let h = head.as_ref();
    // An empty ring's head has no links; it links to itself once observed.
    let next = h.links.next().unwrap_or(head);

    let n = node.as_ref();
    n.links.set_prev(Some(head));
    n.links.set_next(Some(next));
    next.as_ref().links.set_prev(Some(node));
    h.links.set_next(Some(node));
    n.ring.set(Some(ring));
    test_trace!(?ring, ?node, "observer joined ring");
    member
}

/// Unlinks the attached observer `node` from its ring.
unsafe fn unlink(node: NonNull<Node>) {
    let n = node.as_ref();
    let Some(ring) = n.ring.take() else {
        return;
    };
    let (Some(prev), Some(next)) = (n.links.set_prev(None), n.links.set_next(None)) else {
        unreachable!("an attached observer is always linked");
    };
    if prev == next {
        // `node` was the only observer, so both neighbors are the head.
        prev.as_ref().links.unlink();
    } else {
        prev.as_ref().links.set_next(Some(next));
        next.as_ref().links.set_prev(Some(prev));
    }
    test_trace!(?ring, ?node, "observer left ring");
}

/// Detaches every observer of `ring`, returning how many were swept.
unsafe fn sweep(ring: NonNull<Ring>) -> usize {
    let head = Ring::head(ring);
    let mut next = head.as_ref().links.next();
    let mut swept = 0;
    while let Some(curr) = next {
        if curr == head {
            break;
        }
        let n = curr.as_ref();
        next = n.links.next();
        n.links.unlink();
        n.ring.set(None);
        swept += 1;
    }
    head.as_ref().links.unlink();
    swept
}

/// Removes one owner from `ring`.
///
/// If it was the last owner, every observer is swept and `true` is returned;
/// the header still has to be deallocated.
unsafe fn drop_owner(ring: NonNull<Ring>) -> bool {
    let r = ring.as_ref();
    let owners = r.owners.get();
    debug_assert!(owners > 0, "owner left a ring with no owners");
    r.owners.set(owners - 1);
    test_trace!(?ring, owners = owners - 1, "owner left ring");
    if owners > 1 {
        return false;
    }

    let swept = sweep(ring);
    tracing::trace!(?ring, swept, "last owner left; observers invalidated");
    true
}

/// Removes one owner from `ring`, destroying the object if it was the last.
///
/// The ring is fully unlinked before the deleter runs, and the header is freed
/// even if the deleter panics.
///
/// # Safety
///
/// `ring` must be valid, and the caller must give up one of its owners.
pub(crate) unsafe fn leave(ring: NonNull<Ring>) {
    if drop_owner(ring) {
        let deleter = ring.as_ref().deleter;
        let _dealloc = defer(move || unsafe { deleter.dealloc(ring) });
        tracing::trace!(?ring, "ring died; deleting object");
        deleter.invoke(ring);
    }
}

/// Removes one owner from `ring` without ever destroying the object.
///
/// # Safety
///
/// `ring` must be valid, and the caller must give up one of its owners.
unsafe fn release(ring: NonNull<Ring>) -> Released {
    if !drop_owner(ring) {
        return Released::Shared;
    }
    let deleter = ring.as_ref().deleter;
    let _dealloc = defer(move || unsafe { deleter.dealloc(ring) });
    tracing::trace!(?ring, "ring died; object released");
    match deleter.release(ring) {
        Some(moved) => Released::Moved(moved),
        None => Released::Last,
    }
}

// === impl Node ===

impl Node {
    /// Returns a new detached node.
    pub(crate) const fn new() -> Self {
        Self {
            links: Links::new(),
            ring: Cell::new(None),
        }
    }

    #[inline]
    pub(crate) fn is_attached(&self) -> bool {
        self.ring.get().is_some()
    }

    #[inline]
    pub(crate) fn ring(&self) -> Option<NonNull<Ring>> {
        self.ring.get()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("self", &format_args!("{:p}", self))
            .field("ring", &FmtOption::new(&self.ring.get()))
            .field("links", &self.links)
            .finish()
    }
}

// === impl Ring ===

impl Ring {
    /// Returns a new ring header with one owner and no observers.
    pub(crate) const fn new(deleter: ErasedDeleter, owned: bool) -> Self {
        Self {
            head: Node::new(),
            owners: Cell::new(1),
            deleter,
            owned,
        }
    }

    /// The number of owners of this ring.
    #[inline]
    pub(crate) fn owners(&self) -> usize {
        self.owners.get()
    }

    /// Returns `true` if any observers are linked to this ring.
    #[inline]
    pub(crate) fn is_observed(&self) -> bool {
        self.head.links.next().is_some()
    }

    #[inline]
    unsafe fn head(ring: NonNull<Ring>) -> NonNull<Node> {
        NonNull::from(&ring.as_ref().head)
    }

    #[cfg(test)]
    pub(crate) fn deleter(&self) -> ErasedDeleter {
        self.deleter
    }

    /// Returns the number of observers linked to this ring.
    #[cfg(test)]
    pub(crate) fn observers(&self) -> usize {
        let head = NonNull::from(&self.head);
        let mut next = self.head.links.next();
        let mut len = 0;
        while let Some(curr) = next.filter(|&curr| curr != head) {
            len += 1;
            next = unsafe { curr.as_ref() }.links.next();
        }
        len
    }

    /// Asserts as many of the ring's invariants as possible.
    #[cfg(test)]
    pub(crate) fn assert_valid(&self) {
        let this = NonNull::from(self);
        let head = NonNull::from(&self.head);
        assert!(self.owners() > 0, "a live ring must have an owner; ring={:#?}", self);
        assert!(
            self.head.ring().is_none(),
            "the head never records a header; ring={:#?}",
            self
        );

        let (next, prev) = (self.head.links.next(), self.head.links.prev());
        assert_eq!(
            next.is_some(),
            prev.is_some(),
            "the head must be linked both ways or not at all; ring={:#?}",
            self
        );
        let Some(mut curr) = next else {
            return;
        };
        assert_ne!(curr, head, "a linked head must have observers; ring={:#?}", self);

        let mut last = head;
        while curr != head {
            let n = unsafe { curr.as_ref() };
            assert_eq!(
                n.ring(),
                Some(this),
                "every observer must record its header; node={:#?}",
                n
            );
            assert_eq!(
                n.links.prev(),
                Some(last),
                "each node's prev link must point back; node={:#?}",
                n
            );
            last = curr;
            curr = n.links.next().expect("attached nodes must have a next link");
        }
        assert_eq!(prev, Some(last), "the head's prev link must close the ring");
    }
}

impl fmt::Debug for Ring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ring")
            .field("owners", &self.owners.get())
            .field("owned", &self.owned)
            .field("head", &self.head)
            .field("deleter", &self.deleter)
            .finish()
    }
}

// === impl Owner ===

impl Owner {
    /// Creates a new ring owning `target`, returning its first owner.
    pub(crate) fn create_ring<Y, D>(target: Option<NonNull<Y>>, deleter: D) -> Self
    where
        Y: ?Sized,
        D: Deleter<Y> + 'static,
    {
        let ring = deleter::bind(target, deleter);
        tracing::trace!(?ring, "ring born");
        Self { ring }
    }

    /// Creates a new ring that stores `value` in its own allocation,
    /// returning its first owner and a pointer to the value.
    pub(crate) fn create_inline<Y>(value: Y) -> (Self, NonNull<Y>) {
        let (ring, value) = deleter::inline(value);
        tracing::trace!(?ring, "ring born with inline object");
        (Self { ring }, value)
    }

    /// Adds a new observer to this owner's ring.
    pub(crate) fn observe(&self) -> Member {
        unsafe { observe(self.ring) }
    }

    #[inline]
    pub(crate) fn use_count(&self) -> usize {
        self.header().owners()
    }

    #[inline]
    pub(crate) fn ring(&self) -> NonNull<Ring> {
        self.ring
    }

    /// Gives up this owner without destroying the object.
    pub(crate) fn release(self) -> Released {
        let ring = self.ring;
        mem::forget(self);
        unsafe { release(ring) }
    }

    #[inline]
    fn header(&self) -> &Ring {
        unsafe { self.ring.as_ref() }
    }

    #[cfg(test)]
    pub(crate) fn observers(&self) -> usize {
        self.header().observers()
    }

    #[cfg(test)]
    pub(crate) fn assert_valid(&self) {
        self.header().assert_valid()
    }
}

impl Clone for Owner {
    fn clone(&self) -> Self {
        let owners = &self.header().owners;
        owners.set(owners.get() + 1);
        test_trace!(ring = ?self.ring, owners = owners.get(), "owner joined ring");
        Self { ring: self.ring }
    }
}

impl Drop for Owner {
    fn drop(&mut self) {
        unsafe { leave(self.ring) }
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.header().fmt(f)
    }
}

// === impl Member ===

impl Member {
    fn alloc() -> Self {
        let node = Box::new(Node::new());
        Self {
            node: NonNull::from(Box::leak(node)),
        }
    }

    /// Adds a new owner to this observer's ring, unless the ring has already
    /// died or is not owned by handles.
    pub(crate) fn try_join_as_owner(&self) -> Result<Owner, UpgradeError> {
        let ring = self.ring().ok_or(UpgradeError::Invalidated)?;
        let header = unsafe { ring.as_ref() };
        if !header.owned {
            return Err(UpgradeError::Unowned);
        }
        header.owners.set(header.owners() + 1);
        test_trace!(?ring, owners = header.owners(), "observer joined as owner");
        Ok(Owner { ring })
    }

    /// Adds a new observer to this observer's ring, unless this one has been
    /// detached.
    pub(crate) fn join_as_observer(&self) -> Option<Self> {
        let ring = self.ring()?;
        Some(unsafe { observe(ring) })
    }

    /// Returns the number of owners of this observer's ring, or zero if it is
    /// detached.
    pub(crate) fn use_count(&self) -> usize {
        match self.ring() {
            Some(ring) => unsafe { ring.as_ref() }.owners(),
            None => 0,
        }
    }

    #[inline]
    pub(crate) fn is_attached(&self) -> bool {
        self.node().is_attached()
    }

    #[inline]
    pub(crate) fn ring(&self) -> Option<NonNull<Ring>> {
        self.node().ring()
    }

    #[inline]
    fn node(&self) -> &Node {
        unsafe { self.node.as_ref() }
    }

    #[cfg(test)]
    pub(crate) fn assert_valid(&self) {
        let node = self.node();
        match node.ring() {
            Some(ring) => unsafe { ring.as_ref() }.assert_valid(),
            None => assert!(
                !node.links.is_linked(),
                "a detached node must not be linked; node={:#?}",
                node
            ),
        }
    }
}

impl Drop for Member {
    fn drop(&mut self) {
        let node = self.node;
        let _free = defer(move || unsafe { drop(Box::from_raw(node.as_ptr())) });
        unsafe { unlink(node) }
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.node().fmt(f)
    }
}

// === impl Links ===

impl Links {
    const fn new() -> Self {
        Self {
            inner: UnsafeCell::new(LinksInner {
                next: None,
                prev: None,
                _unpin: PhantomPinned,
            }),
        }
    }

    #[cfg(test)]
    fn is_linked(&self) -> bool {
        self.next().is_some() || self.prev().is_some()
    }

    fn unlink(&self) {
        self.set_next(None);
        self.set_prev(None);
    }

    #[inline]
    fn next(&self) -> Link {
        unsafe { (*self.inner.get()).next }
    }

    #[inline]
    fn prev(&self) -> Link {
        unsafe { (*self.inner.get()).prev }
    }

    #[inline]
    fn set_next(&self, next: Link) -> Link {
        unsafe { mem::replace(&mut (*self.inner.get()).next, next) }
    }

    #[inline]
    fn set_prev(&self, prev: Link) -> Link {
        unsafe { mem::replace(&mut (*self.inner.get()).prev, prev) }
    }
}

impl fmt::Debug for Links {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Links")
            .field("next", &FmtOption::new(&self.next()))
            .field("prev", &FmtOption::new(&self.prev()))
            .finish()
    }
}
