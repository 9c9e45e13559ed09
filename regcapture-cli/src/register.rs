//! Loading native COM libraries and running their self-registration.

use std::path::PathBuf;

use regcapture::Registry;

#[cfg(windows)]
pub use native::ComLibrary;

/// The registry the libraries register into.
#[cfg(windows)]
pub fn registry() -> anyhow::Result<Registry> {
    Ok(Registry::native())
}

#[cfg(not(windows))]
pub fn registry() -> anyhow::Result<Registry> {
    anyhow::bail!("native COM registration is only available on Windows")
}

/// Load every library, then register them one after another against the live registry.
///
/// Called while the predefined keys are redirected, so every write lands in the shadow.
#[cfg(windows)]
pub fn register_all(libraries: &[ComLibrary]) -> anyhow::Result<()> {
    native::enable_per_user_tlib_registration();
    for library in libraries {
        crate::cancel::check()?;
        library.register().map_err(|e| {
            anyhow::anyhow!(
                "An error occurred during registration of COM library: {}: {e:#}",
                library.path().display()
            )
        })?;
    }
    Ok(())
}

/// Load the libraries up front so a missing dependency fails before any redirection.
#[cfg(windows)]
pub fn load_all(paths: &[PathBuf]) -> anyhow::Result<Vec<ComLibrary>> {
    paths.iter().map(|path| ComLibrary::load(path)).collect()
}

#[cfg(not(windows))]
pub fn load_all(paths: &[PathBuf]) -> anyhow::Result<Vec<ComLibrary>> {
    match paths.first() {
        Some(path) => anyhow::bail!(
            "cannot load {}: native COM registration is only available on Windows",
            path.display()
        ),
        None => Ok(Vec::new()),
    }
}

#[cfg(not(windows))]
pub fn register_all(_libraries: &[ComLibrary]) -> anyhow::Result<()> {
    anyhow::bail!("native COM registration is only available on Windows")
}

/// Never constructed off Windows.
#[cfg(not(windows))]
pub enum ComLibrary {}

#[cfg(windows)]
mod native {
    use std::path::{Path, PathBuf};

    use anyhow::{bail, Context};
    use log::debug;
    use widestring::U16CString;
    use windows_sys::Win32::Foundation::{FreeLibrary, HMODULE};
    use windows_sys::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

    type DllRegisterServer = unsafe extern "system" fn() -> i32;
    type OaEnablePerUserTLibRegistration = unsafe extern "system" fn();

    /// A loaded library, freed on drop.
    pub struct ComLibrary {
        path: PathBuf,
        module: HMODULE,
    }

    impl ComLibrary {
        pub fn load(path: &Path) -> anyhow::Result<Self> {
            let wide = U16CString::from_os_str(path.as_os_str())
                .with_context(|| format!("invalid library path: {}", path.display()))?;
            // SAFETY: `wide` is NUL-terminated and outlives the call.
            let module = unsafe { LoadLibraryW(wide.as_ptr()) };
            if module.is_null() {
                return Err(std::io::Error::last_os_error())
                    .with_context(|| format!("failed to load COM library: {}", path.display()));
            }
            debug!("Loaded {}", path.display());
            Ok(ComLibrary {
                path: path.to_path_buf(),
                module,
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Call the library's `DllRegisterServer` export.
        pub fn register(&self) -> anyhow::Result<()> {
            // SAFETY: `module` stays loaded for the lifetime of `self`.
            let export =
                unsafe { GetProcAddress(self.module, c"DllRegisterServer".as_ptr().cast()) };
            let Some(export) = export else {
                bail!("the library does not export DllRegisterServer");
            };
            // SAFETY: DllRegisterServer takes no arguments and returns an HRESULT.
            let register: DllRegisterServer = unsafe { std::mem::transmute(export) };
            let hr = unsafe { register() };
            if hr < 0 {
                bail!("DllRegisterServer returned 0x{:08X}", hr as u32);
            }
            debug!("Registered {}", self.path.display());
            Ok(())
        }
    }

    impl Drop for ComLibrary {
        fn drop(&mut self) {
            // SAFETY: `module` came from LoadLibraryW and is freed once.
            unsafe { FreeLibrary(self.module) };
        }
    }

    /// Make type-library registration land under the current user's classes, which the
    /// redirected current-user hive captures. No-op where oleaut32 lacks the export.
    pub fn enable_per_user_tlib_registration() {
        let Ok(oleaut) = ComLibrary::load(Path::new("oleaut32.dll")) else {
            return;
        };
        // SAFETY: the module is loaded while `oleaut` lives.
        let export = unsafe {
            GetProcAddress(oleaut.module, c"OaEnablePerUserTLibRegistration".as_ptr().cast())
        };
        if let Some(export) = export {
            // SAFETY: the export takes no arguments and returns nothing.
            let enable: OaEnablePerUserTLibRegistration = unsafe { std::mem::transmute(export) };
            unsafe { enable() };
            debug!("Enabled per-user type library registration");
        }
    }
}
