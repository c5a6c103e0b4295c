//! Shared helpers for unit tests.
use std::{
    cell::{Cell, RefCell},
    format,
    panic::Location,
    ptr::NonNull,
    rc::{Rc, Weak},
    string::String,
    vec::Vec,
};

pub(crate) fn trace_init() -> impl Drop {
    use tracing_subscriber::{prelude::*, EnvFilter};
    let filter = EnvFilter::from_env("RUST_LOG");
    tracing_subscriber::fmt()
        .with_test_writer()
        .without_time()
        .with_env_filter(filter)
        .with_target(false)
        .set_default()
}

/// Runs `f`, then panics if any [`TestObject`] created while it ran is still
/// alive.
#[track_caller]
pub(crate) fn check_leaks(f: impl FnOnce()) {
    let registry = Registry::default();
    {
        let _registry = registry.set_default();
        f();
    }
    registry.check();
}

/// A value whose destruction can be observed from outside.
///
/// If a leak-checking [`Registry`] is active when a `TestObject` is created,
/// the object is tracked by it.
#[derive(Debug)]
pub(crate) struct TestObject {
    pub(crate) id: usize,
    dropped: Rc<Cell<bool>>,
    _track: Option<Rc<TrackData>>,
}

/// Reports whether a [`TestObject`] has been dropped.
#[derive(Clone, Debug)]
pub(crate) struct DropFlag(Rc<Cell<bool>>);

/// Counts how many times a deleter returned by [`CountingDeleter::deleter`]
/// has destroyed something.
#[derive(Clone, Debug, Default)]
pub(crate) struct CountingDeleter(Rc<Cell<usize>>);

#[derive(Clone, Debug, Default)]
struct Registry(Rc<RefCell<RegistryInner>>);

#[derive(Debug, Default)]
struct RegistryInner {
    tracks: Vec<Weak<TrackData>>,
}

#[derive(Debug)]
struct TrackData {
    id: usize,
    location: &'static Location<'static>,
}

std::thread_local! {
    static REGISTRY: RefCell<Option<Registry>> = const { RefCell::new(None) };
}

// === impl TestObject ===

impl TestObject {
    #[track_caller]
    pub(crate) fn new(id: usize) -> (Self, DropFlag) {
        let dropped = Rc::new(Cell::new(false));
        // not `Option::map`, which would hide the caller's location.
        #[allow(clippy::manual_map)]
        let track = match Registry::current() {
            Some(registry) => Some(registry.insert(id)),
            None => None,
        };
        let this = Self {
            id,
            dropped: dropped.clone(),
            _track: track,
        };
        (this, DropFlag(dropped))
    }
}

impl Drop for TestObject {
    fn drop(&mut self) {
        assert!(
            !self.dropped.replace(true),
            "test object {} was dropped twice",
            self.id
        );
        tracing::debug!(id = self.id, "dropped test object");
    }
}

// === impl DropFlag ===

impl DropFlag {
    pub(crate) fn is_dropped(&self) -> bool {
        self.0.get()
    }
}

// === impl CountingDeleter ===

impl CountingDeleter {
    /// Returns a deleter that frees a `Box` and bumps this counter.
    pub(crate) fn deleter<T: ?Sized + 'static>(&self) -> impl FnOnce(NonNull<T>) + 'static {
        let count = self.0.clone();
        move |ptr: NonNull<T>| {
            count.set(count.get() + 1);
            drop(unsafe { std::boxed::Box::from_raw(ptr.as_ptr()) });
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.0.get()
    }
}

// === impl Registry ===

impl Registry {
    fn current() -> Option<Registry> {
        REGISTRY.with(|current| current.borrow().clone())
    }

    fn set_default(&self) -> impl Drop {
        struct Unset(Option<Registry>);
        impl Drop for Unset {
            fn drop(&mut self) {
                let _ = REGISTRY.try_with(|current| *current.borrow_mut() = self.0.take());
            }
        }

        REGISTRY.with(|current| {
            let mut current = current.borrow_mut();
            let unset = Unset(current.clone());
            *current = Some(self.clone());
            unset
        })
    }

    #[track_caller]
    fn insert(&self, id: usize) -> Rc<TrackData> {
        let data = Rc::new(TrackData {
            id,
            location: Location::caller(),
        });
        self.0.borrow_mut().tracks.push(Rc::downgrade(&data));
        data
    }

    #[track_caller]
    fn check(&self) {
        let leaked = self
            .0
            .borrow()
            .tracks
            .iter()
            .filter_map(|weak| {
                let data = weak.upgrade()?;
                Some(format!(
                    " - test object {} created at {}",
                    data.id, data.location
                ))
            })
            .collect::<Vec<String>>();
        if !leaked.is_empty() {
            let leaked = leaked.join("\n  ");
            panic!("the following test objects were leaked:\n  {leaked}");
        }
    }
}
