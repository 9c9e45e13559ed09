use log::{debug, error};

use crate::{
    registry::{Operation, PredefinedKey, RawKey, Registry, RegistryKey},
    Result,
};

/// A predefined root key redirected to another key.
///
/// While the override is active every open, read and write against the predefined key is
/// serviced by the destination key instead. The redirection is removed when
/// [`RegistryOverride::dispose`] is called or the override is dropped, whichever comes
/// first. Nested overrides are released in reverse order of installation by declaring them
/// in installation order and letting them go out of scope.
///
/// At most one override per predefined key can be active through a [`Registry`]; installing
/// a second one fails with [`crate::Error::OverrideActive`].
///
/// # Examples
///
/// ```rust,no_run
/// use regcapture::{MemoryApi, PredefinedKey, Registry, RegistryOverride};
///
/// let registry = Registry::new(MemoryApi::new());
/// let target = registry.current_user().create_subkey(r"Software\Shadow\HKLM")?;
///
/// let mut binding = RegistryOverride::install(PredefinedKey::LocalMachine, target)?;
/// registry.local_machine().create_subkey(r"SOFTWARE\Vendor")?;
/// binding.dispose()?;
///
/// assert!(registry.current_user().open_subkey(r"Software\Shadow\HKLM\SOFTWARE\Vendor").is_ok());
/// # Ok::<(), regcapture::Error>(())
/// ```
pub struct RegistryOverride<'r> {
    registry: &'r Registry,
    source: PredefinedKey,
    destination: Option<RegistryKey<'r>>,
    active: bool,
}

impl<'r> RegistryOverride<'r> {
    /// Redirects `source` to `destination` and takes ownership of the destination handle,
    /// which is closed when the override is disposed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OverrideActive`] if `source` is already redirected, or
    /// [`crate::Error::Platform`] if the platform refuses the redirection.
    pub fn install(source: PredefinedKey, destination: RegistryKey<'r>) -> Result<Self> {
        let target = destination.handle();
        let name = destination.name().to_string();
        Self::bind(destination.registry(), source, target, &name, Some(destination))
    }

    /// Redirects `source` to `destination` without taking ownership of the destination
    /// handle.
    ///
    /// # Errors
    ///
    /// Same as [`RegistryOverride::install`].
    pub fn install_borrowed(source: PredefinedKey, destination: &RegistryKey<'r>) -> Result<Self> {
        Self::bind(
            destination.registry(),
            source,
            destination.handle(),
            destination.name(),
            None,
        )
    }

    fn bind(
        registry: &'r Registry,
        source: PredefinedKey,
        target: RawKey,
        target_name: &str,
        destination: Option<RegistryKey<'r>>,
    ) -> Result<Self> {
        registry.claim_override(source)?;

        if let Err(status) = registry.api().override_key(source.raw(), target) {
            registry.release_override(source);
            return Err(platform_error!(
                Operation::OverrideKey,
                status,
                "{} -> {}",
                source,
                target_name
            ));
        }

        debug!("redirected {source} to {target_name}");
        Ok(RegistryOverride {
            registry,
            source,
            destination,
            active: true,
        })
    }

    /// The redirected predefined key.
    #[must_use]
    pub fn source(&self) -> PredefinedKey {
        self.source
    }

    /// Whether the redirection is still in place.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Removes the redirection and, if owned, closes the destination handle.
    ///
    /// Disposing an override that was already disposed does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Platform`] if the platform refuses to remove the redirection.
    /// The override then stays active and counts against the one-override-per-key rule.
    pub fn dispose(&mut self) -> Result<()> {
        if self.active {
            self.registry
                .api()
                .override_key(self.source.raw(), RawKey::NULL)
                .map_err(|status| platform_error!(Operation::OverrideKey, self.source, status))?;

            self.active = false;
            self.registry.release_override(self.source);
            debug!("removed redirection of {}", self.source);
        }

        if let Some(mut destination) = self.destination.take() {
            destination.close()?;
        }
        Ok(())
    }
}

impl Drop for RegistryOverride<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            error!("Failed to remove the redirection of {}: {e}", self.source);
        }
    }
}

impl std::fmt::Debug for RegistryOverride<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryOverride")
            .field("source", &self.source)
            .field("destination", &self.destination.as_ref().map(RegistryKey::name))
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{registry::Status, test::memory_registry, Error};

    #[test]
    fn redirects_until_disposed() {
        let (registry, api) = memory_registry();
        let target = registry
            .current_user()
            .create_subkey(r"Software\Shadow\HKCR")
            .unwrap();

        let mut binding = RegistryOverride::install(PredefinedKey::ClassesRoot, target).unwrap();
        assert!(binding.is_active());
        assert_eq!(registry.active_overrides(), vec![PredefinedKey::ClassesRoot]);

        registry.classes_root().create_subkey(".sample").unwrap();
        binding.dispose().unwrap();

        assert!(!binding.is_active());
        assert!(registry.active_overrides().is_empty());
        assert!(api.overridden_keys().is_empty());
        assert!(api.key_exists(PredefinedKey::CurrentUser, r"Software\Shadow\HKCR\.sample"));
        assert!(!api.key_exists(PredefinedKey::ClassesRoot, ".sample"));
    }

    #[test]
    fn dispose_is_idempotent_and_closes_owned_destination() {
        let (registry, api) = memory_registry();
        let before = api.open_handle_count();
        let target = registry.current_user().create_subkey("Owned").unwrap();

        let mut binding = RegistryOverride::install(PredefinedKey::LocalMachine, target).unwrap();
        assert_eq!(api.open_handle_count(), before + 1);

        binding.dispose().unwrap();
        binding.dispose().unwrap();
        assert_eq!(api.open_handle_count(), before);
    }

    #[test]
    fn borrowed_destination_stays_open() {
        let (registry, api) = memory_registry();
        let target = registry.current_user().create_subkey("Borrowed").unwrap();
        let before = api.open_handle_count();

        {
            let _binding =
                RegistryOverride::install_borrowed(PredefinedKey::LocalMachine, &target).unwrap();
        }

        assert!(target.is_open());
        assert_eq!(api.open_handle_count(), before);
        assert!(api.overridden_keys().is_empty());
    }

    #[test]
    fn second_override_is_refused() {
        let (registry, api) = memory_registry();
        let first = registry.current_user().create_subkey("First").unwrap();
        let second = registry.current_user().create_subkey("Second").unwrap();

        let _binding = RegistryOverride::install(PredefinedKey::CurrentUser, first).unwrap();
        let error = RegistryOverride::install(PredefinedKey::CurrentUser, second).unwrap_err();

        assert!(matches!(error, Error::OverrideActive(PredefinedKey::CurrentUser)));
        assert_eq!(api.overridden_keys(), vec![PredefinedKey::CurrentUser]);
    }

    #[test]
    fn rejected_install_releases_everything() {
        let (registry, api) = memory_registry();
        let before = api.open_handle_count();
        let target = registry.current_user().create_subkey("Rejected").unwrap();

        api.reject_overrides(true);
        let error = RegistryOverride::install(PredefinedKey::ClassesRoot, target).unwrap_err();

        assert_eq!(error.status(), Some(Status::ACCESS_DENIED));
        assert_eq!(error.operation(), Some(Operation::OverrideKey));
        assert!(registry.active_overrides().is_empty());
        assert_eq!(api.open_handle_count(), before);
    }

    #[test]
    fn failed_removal_keeps_the_claim() {
        let (registry, api) = memory_registry();
        let target = registry.current_user().create_subkey("Stuck").unwrap();
        let mut binding = RegistryOverride::install(PredefinedKey::LocalMachine, target).unwrap();

        api.reject_overrides(true);
        assert!(binding.dispose().is_err());
        assert!(binding.is_active());
        assert_eq!(registry.active_overrides(), vec![PredefinedKey::LocalMachine]);

        api.reject_overrides(false);
        binding.dispose().unwrap();
        assert!(registry.active_overrides().is_empty());
    }

    #[test]
    fn nested_overrides_unwind_in_reverse() {
        let (registry, api) = memory_registry();
        let shadow = registry.current_user().create_subkey("Nested").unwrap();
        let classes = shadow.create_subkey("HKCR").unwrap();
        let machine = shadow.create_subkey("HKLM").unwrap();

        {
            let _classes = RegistryOverride::install(PredefinedKey::ClassesRoot, classes).unwrap();
            let _machine = RegistryOverride::install(PredefinedKey::LocalMachine, machine).unwrap();
            assert_eq!(
                api.overridden_keys(),
                vec![PredefinedKey::ClassesRoot, PredefinedKey::LocalMachine]
            );
        }

        assert!(api.overridden_keys().is_empty());
        assert!(registry.active_overrides().is_empty());
    }
}
