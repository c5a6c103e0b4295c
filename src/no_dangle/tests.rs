use super::*;
use crate::test_util::{check_leaks, trace_init, DropFlag, TestObject};
use std::{
    boxed::Box,
    cell::{Cell, RefCell},
    format, ptr,
    rc::Rc,
};

const MAGIC: usize = 42;

#[track_caller]
fn tracked(id: usize) -> (ListPtr<TestObject>, DropFlag) {
    let (obj, dropped) = TestObject::new(id);
    (ListPtr::new(obj), dropped)
}

fn run(f: impl FnOnce()) {
    let _trace = trace_init();
    check_leaks(f);
}

#[derive(Debug)]
#[pin_project::pin_project]
struct Widget {
    #[pin]
    anchor: Anchor,
    obj: TestObject,
}

unsafe impl Anchored for Widget {
    fn anchor(&self) -> &Anchor {
        &self.anchor
    }
}

#[track_caller]
fn widget(id: usize) -> (Pin<Box<Widget>>, DropFlag) {
    let (obj, dropped) = TestObject::new(id);
    let widget = Box::pin(Widget {
        anchor: Anchor::new(),
        obj,
    });
    (widget, dropped)
}

#[test]
fn const_null() {
    const _: NoDanglePtr<TestObject> = NoDanglePtr::null();
    const _: Anchor = Anchor::new();
}

#[test]
fn null() {
    let observer = NoDanglePtr::<TestObject>::default();
    assert!(observer.is_null());
    assert_eq!(observer.get(), None);
    assert!(unsafe { observer.as_ref() }.is_none());
    assert!(observer.upgrade().is_none());
    assert_eq!(
        observer.try_upgrade().unwrap_err(),
        UpgradeError::Invalidated
    );
    assert!(observer.clone().is_null());
}

#[test]
fn observe_null_owner() {
    run(|| {
        let observer = NoDanglePtr::new(&ListPtr::<TestObject>::null());
        assert!(observer.is_null());
        assert!(observer.upgrade().is_none());
    })
}

#[test]
fn observe_owning_null() {
    run(|| {
        let owner = unsafe { ListPtr::<TestObject>::from_raw(ptr::null_mut()) };
        let observer = owner.observe();
        assert!(observer.is_null());
        observer.assert_valid();

        // the ring is alive, so the observer can still join it.
        let upgraded = observer.upgrade().expect("ring is alive");
        assert!(upgraded.is_null());
        assert_eq!(owner.use_count(), 2);
    })
}

#[test]
fn tracks_owner() {
    run(|| {
        let (owner, dropped) = tracked(MAGIC);
        let observer = NoDanglePtr::new(&owner);
        assert_eq!(observer.get(), owner.as_ptr());
        assert_eq!(unsafe { observer.as_ref() }.map(|obj| obj.id), Some(MAGIC));
        assert_eq!(owner.use_count(), 1, "observers are not owners");
        observer.assert_valid();

        drop(owner);
        assert!(dropped.is_dropped());
        assert!(observer.is_null());
        assert_eq!(observer.get(), None);
        observer.assert_valid();
    })
}

#[test]
fn outlived_by_shared_owner() {
    run(|| {
        let (a, dropped) = tracked(MAGIC);
        let b = a.clone();
        let observer = a.observe();

        drop(a);
        assert!(!dropped.is_dropped());
        assert_eq!(observer.get(), b.as_ptr());

        drop(b);
        assert!(dropped.is_dropped());
        assert!(observer.is_null());
    })
}

#[test]
fn dropped_before_owner() {
    run(|| {
        let (owner, dropped) = tracked(MAGIC);
        let observers = (0..4).map(|_| owner.observe()).collect::<std::vec::Vec<_>>();
        drop(observers);
        owner.assert_valid();
        assert_eq!(owner.use_count(), 1);
        drop(owner);
        assert!(dropped.is_dropped());
    })
}

/// Holds an observer of itself, and records what that observer saw while the
/// object was being destroyed.
struct SelfObserving {
    this: RefCell<NoDanglePtr<SelfObserving>>,
    seen: Rc<Cell<Option<(bool, bool)>>>,
}

impl Drop for SelfObserving {
    fn drop(&mut self) {
        let this = self.this.get_mut();
        self.seen.set(Some((this.is_null(), this.upgrade().is_none())));
    }
}

#[test]
fn observers_are_null_during_drop() {
    run(|| {
        let seen = Rc::new(Cell::new(None));
        let owner = ListPtr::new(SelfObserving {
            this: RefCell::new(NoDanglePtr::null()),
            seen: seen.clone(),
        });
        *owner.this.borrow_mut() = owner.observe();
        let outside = owner.observe();
        let shared = owner.clone();

        drop(owner);
        assert_eq!(seen.get(), None);
        assert!(!shared.this.borrow().is_null());

        drop(shared);
        assert_eq!(seen.get(), Some((true, true)));
        assert!(outside.is_null());
    })
}

#[test]
fn clone() {
    run(|| {
        let (owner, _dropped) = tracked(MAGIC);
        let a = owner.observe();
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(b.get(), owner.as_ptr());
        b.assert_valid();

        drop(owner);
        assert!(a.is_null());
        assert!(b.is_null());

        // cloning an invalidated observer yields a null one.
        let c = a.clone();
        assert!(c.is_null());
        assert_eq!(a, c);
    })
}

#[test]
fn upgrade() {
    run(|| {
        let (owner, dropped) = tracked(MAGIC);
        let observer = owner.observe();

        let upgraded = observer.upgrade().expect("object is alive");
        assert_eq!(upgraded, owner);
        assert!(upgraded.same_owner(&owner));
        assert_eq!(owner.use_count(), 2);

        drop(owner);
        assert!(!dropped.is_dropped());
        assert_eq!(upgraded.id, MAGIC);
        assert!(!observer.is_null());

        drop(upgraded);
        assert!(dropped.is_dropped());
        assert_eq!(
            observer.try_upgrade().unwrap_err(),
            UpgradeError::Invalidated
        );
    })
}

#[test]
fn upgrade_alias_observer() {
    run(|| {
        let (owner, dropped) = tracked(MAGIC);
        let id = owner.map(|obj| &obj.id);
        let observer = id.observe();
        drop((owner, id));
        assert!(dropped.is_dropped());
        assert!(observer.upgrade().is_none());
    })
}

trait Id {
    fn id(&self) -> usize;
}

impl Id for TestObject {
    fn id(&self) -> usize {
        self.id
    }
}

crate::upcast!(TestObject => dyn Id);

#[test]
fn upcast() {
    run(|| {
        let (owner, dropped) = tracked(MAGIC);
        let observer: NoDanglePtr<dyn Id> = owner.observe().upcast();
        assert_eq!(
            observer.get().map(NonNull::cast::<()>),
            owner.as_ptr().map(NonNull::cast::<()>)
        );
        assert_eq!(unsafe { observer.as_ref() }.map(Id::id), Some(MAGIC));

        let upgraded = observer.upgrade().expect("object is alive");
        assert_eq!(upgraded.id(), MAGIC);
        drop((owner, upgraded));
        assert!(dropped.is_dropped());
        assert!(observer.is_null());
    })
}

#[test]
fn equality() {
    run(|| {
        let (a, _) = tracked(1);
        let (b, _) = tracked(2);
        assert_eq!(a.observe(), a.observe());
        assert_ne!(a.observe(), b.observe());
        assert_ne!(a.observe(), NoDanglePtr::null());

        let stale = b.observe();
        drop(b);
        assert_eq!(stale, NoDanglePtr::null());
    })
}

#[test]
fn fmt() {
    run(|| {
        let (owner, _) = tracked(MAGIC);
        let observer = owner.observe();
        assert_eq!(
            format!("{observer:p}"),
            format!("{:p}", owner.as_ptr().unwrap())
        );
        drop(owner);
        assert_eq!(format!("{observer:p}"), "null");
        assert_eq!(format!("{observer:?}"), "NoDanglePtr { ptr: null }");
    })
}

#[test]
fn anchored() {
    run(|| {
        let (widget, dropped) = widget(MAGIC);
        assert!(!widget.as_ref().project_ref().anchor.is_observed());

        let a = NoDanglePtr::from_pinned(widget.as_ref());
        let b = NoDanglePtr::from_pinned(widget.as_ref());
        let c = a.clone();
        assert!(widget.as_ref().project_ref().anchor.is_observed());
        assert_eq!(a.get(), Some(NonNull::from(&*widget)));
        assert_eq!(a, b);
        assert_eq!(unsafe { c.as_ref() }.map(|w| w.obj.id), Some(MAGIC));
        a.assert_valid();

        drop(b);
        a.assert_valid();

        drop(widget);
        assert!(dropped.is_dropped());
        assert!(a.is_null());
        assert!(c.is_null());
        a.assert_valid();
    })
}

#[test]
fn anchored_cannot_upgrade() {
    run(|| {
        let (widget, _) = widget(MAGIC);
        let observer = NoDanglePtr::from_pinned(widget.as_ref());
        assert_eq!(observer.try_upgrade().unwrap_err(), UpgradeError::Unowned);
        assert!(observer.upgrade().is_none());

        drop(widget);
        assert_eq!(
            observer.try_upgrade().unwrap_err(),
            UpgradeError::Invalidated
        );
    })
}

#[test]
fn anchored_observers_dropped_first() {
    run(|| {
        let (widget, dropped) = widget(MAGIC);
        drop(NoDanglePtr::from_pinned(widget.as_ref()));
        drop(NoDanglePtr::from_pinned(widget.as_ref()));
        assert!(!dropped.is_dropped());
        drop(widget);
        assert!(dropped.is_dropped());
    })
}

#[test]
fn anchored_on_stack() {
    run(|| {
        let (obj, dropped) = TestObject::new(MAGIC);
        let observer = {
            let widget = core::pin::pin!(Widget {
                anchor: Anchor::default(),
                obj,
            });
            let observer = NoDanglePtr::from_pinned(widget.as_ref());
            assert!(!observer.is_null());
            observer
        };
        assert!(dropped.is_dropped());
        assert!(observer.is_null());
    })
}

#[test]
fn unobserved_anchor_moves_freely() {
    let anchor = Anchor::new();
    let moved = Box::new(anchor);
    assert!(!moved.is_observed());
    drop(moved);
}

#[test]
fn error_display() {
    assert_eq!(
        format!("{}", UpgradeError::Invalidated),
        "the observed object is no longer alive"
    );
    assert_eq!(
        format!("{}", UpgradeError::Unowned),
        "the observed object is not owned by a `ListPtr`"
    );
}
