use core::fmt;

macro_rules! test_trace {
    ($($tt:tt)*) => {
        #[cfg(test)]
        tracing::trace!($($tt)*)
    }
}

/// Defers execution of a closure until a scope is exited.
#[must_use = "dropping a `Deferred` guard immediately executes \
    the deferred function"]
pub(crate) struct Deferred<F: FnOnce()>(Option<F>);

pub(crate) struct FmtOption<'a, T> {
    opt: Option<&'a T>,
    or_else: &'a str,
}

// === impl Deferred ===

impl<F: FnOnce()> Deferred<F> {
    /// Cancel the deferred execution of the closure.
    #[allow(dead_code)]
    #[inline]
    pub(crate) fn cancel(&mut self) {
        self.0 = None;
    }
}

impl<F: FnOnce()> Drop for Deferred<F> {
    #[inline]
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

impl<F: FnOnce()> fmt::Debug for Deferred<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Deferred")
            .field(&format_args!("{}", core::any::type_name::<F>()))
            .finish()
    }
}

/// Defer execution of `f` until this scope is exited, including by unwinding.
#[inline(always)]
pub(crate) fn defer<F: FnOnce()>(f: F) -> Deferred<F> {
    Deferred(Some(f))
}

// === impl FmtOption ===

impl<'a, T> FmtOption<'a, T> {
    pub(crate) fn new(opt: &'a Option<T>) -> Self {
        Self {
            opt: opt.as_ref(),
            or_else: "None",
        }
    }

    pub(crate) fn or_else(self, or_else: &'a str) -> Self {
        Self { or_else, ..self }
    }
}

impl<T: fmt::Debug> fmt::Debug for FmtOption<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opt {
            Some(val) => val.fmt(f),
            None => f.write_str(self.or_else),
        }
    }
}

impl<T: fmt::Pointer> fmt::Pointer for FmtOption<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opt {
            Some(val) => val.fmt(f),
            None => f.write_str(self.or_else),
        }
    }
}
