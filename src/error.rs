//! Errors returned by handle operations.
//!
//! Most misuse of a [`ListPtr`] is rejected at compile time (converting to an
//! unrelated pointee type does not type-check), and destroying objects cannot
//! fail. The only runtime failure is promoting an observer back into an owner.
//!
//! [`ListPtr`]: crate::ListPtr

/// The error returned by [`NoDanglePtr::try_upgrade`].
///
/// [`NoDanglePtr::try_upgrade`]: crate::NoDanglePtr::try_upgrade
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum UpgradeError {
    /// The observed object's last owner has already gone away, or the observer
    /// was null to begin with.
    #[error("the observed object is no longer alive")]
    Invalidated,

    /// The observer watches an [`Anchored`] object, whose lifetime is not
    /// managed by any `ListPtr`.
    ///
    /// [`Anchored`]: crate::Anchored
    #[error("the observed object is not owned by a `ListPtr`")]
    Unowned,
}
