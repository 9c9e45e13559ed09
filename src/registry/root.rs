use std::{cell::RefCell, collections::HashSet, fmt};

use super::{PredefinedKey, RegistryApi, RegistryKey};
use crate::{Error, Result};

/// A registry backend together with the bookkeeping the engine layers on top of it.
///
/// All key handles borrow the `Registry` they came from. Besides owning the
/// [`RegistryApi`] backend, the `Registry` remembers which predefined keys currently have an
/// override installed through it, so that a second override for the same key is refused
/// instead of stacking on the first.
///
/// Use one `Registry` per process for the native backend: overrides installed through two
/// different instances are not checked against each other.
///
/// # Examples
///
/// ```rust,no_run
/// use regcapture::registry::{MemoryApi, PredefinedKey, Registry};
///
/// let registry = Registry::new(MemoryApi::new());
/// let machine = registry.key(PredefinedKey::LocalMachine);
/// assert_eq!(machine.name(), "HKEY_LOCAL_MACHINE");
/// ```
pub struct Registry {
    api: Box<dyn RegistryApi>,
    overrides: RefCell<HashSet<PredefinedKey>>,
}

impl Registry {
    /// Wraps a backend.
    pub fn new(api: impl RegistryApi + 'static) -> Self {
        Registry {
            api: Box::new(api),
            overrides: RefCell::new(HashSet::new()),
        }
    }

    /// The registry of the running Windows system.
    #[cfg(windows)]
    #[must_use]
    pub fn native() -> Self {
        Self::new(super::NativeApi::new())
    }

    /// The backend.
    pub fn api(&self) -> &dyn RegistryApi {
        self.api.as_ref()
    }

    /// A handle to a predefined root key. Predefined handles are never closed.
    #[must_use]
    pub fn key(&self, hive: PredefinedKey) -> RegistryKey<'_> {
        RegistryKey::predefined(self, hive)
    }

    /// `HKEY_CLASSES_ROOT`
    #[must_use]
    pub fn classes_root(&self) -> RegistryKey<'_> {
        self.key(PredefinedKey::ClassesRoot)
    }

    /// `HKEY_CURRENT_USER`
    #[must_use]
    pub fn current_user(&self) -> RegistryKey<'_> {
        self.key(PredefinedKey::CurrentUser)
    }

    /// `HKEY_LOCAL_MACHINE`
    #[must_use]
    pub fn local_machine(&self) -> RegistryKey<'_> {
        self.key(PredefinedKey::LocalMachine)
    }

    /// `HKEY_USERS`
    #[must_use]
    pub fn users(&self) -> RegistryKey<'_> {
        self.key(PredefinedKey::Users)
    }

    /// Predefined keys that currently have an override installed through this registry.
    #[must_use]
    pub fn active_overrides(&self) -> Vec<PredefinedKey> {
        let mut active: Vec<_> = self.overrides.borrow().iter().copied().collect();
        active.sort_by_key(|key| *key as u32);
        active
    }

    /// Records an override for `source`, failing if one is already recorded.
    pub(crate) fn claim_override(&self, source: PredefinedKey) -> Result<()> {
        if self.overrides.borrow_mut().insert(source) {
            Ok(())
        } else {
            Err(Error::OverrideActive(source))
        }
    }

    pub(crate) fn release_override(&self, source: PredefinedKey) {
        self.overrides.borrow_mut().remove(&source);
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("overrides", &self.active_overrides())
            .finish_non_exhaustive()
    }
}
