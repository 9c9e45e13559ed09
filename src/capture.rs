//! Capture runs.
//!
//! [`capture_and_emit`] ties the other modules together:
//!
//! 1. [`ShadowRoot::create`] builds the shadow root below `HKEY_CURRENT_USER` with one
//!    placeholder child per redirected hive.
//! 2. `HKEY_CLASSES_ROOT`, `HKEY_LOCAL_MACHINE` and `HKEY_CURRENT_USER` are redirected to
//!    the placeholders, in that order.
//! 3. The registration callback runs.
//! 4. The redirections are removed in reverse order, whether or not the callback failed.
//! 5. The shadow root is reopened and emitted; a script with content is written
//!    atomically to the destination.
//! 6. The shadow root is deleted, whatever happened before.
//!
//! A failure in a cleanup step never hides the error that caused the unwind: it is logged
//! and the earlier error is returned.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use tempfile::NamedTempFile;

use crate::{
    overrides::RegistryOverride,
    registry::{KeyOptions, KeyRights, PredefinedKey, Registry, RegistryKey, Status},
    script::{emit, ScriptOptions},
    Error, Result,
};

/// Default location of the shadow root below `HKEY_CURRENT_USER`.
pub const DEFAULT_SHADOW_PATH: &str = r"Software\RegCapture\Shadow";

/// Redirected hives, in installation order.
const REDIRECTED_HIVES: [PredefinedKey; 3] = [
    PredefinedKey::ClassesRoot,
    PredefinedKey::LocalMachine,
    PredefinedKey::CurrentUser,
];

/// Settings of a capture run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Subkey of `HKEY_CURRENT_USER` hosting the shadow root; must name at least one key
    pub shadow_path: String,
    /// Create the shadow root and its placeholders as volatile keys.
    ///
    /// The platform refuses to create stable keys below volatile ones, so with this set
    /// every registration routine that creates keys without asking for volatility fails.
    pub volatile: bool,
    /// Emitter settings
    pub script: ScriptOptions,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        CaptureOptions {
            shadow_path: DEFAULT_SHADOW_PATH.to_string(),
            volatile: false,
            script: ScriptOptions::default(),
        }
    }
}

impl CaptureOptions {
    /// Sets the shadow root location.
    #[must_use]
    pub fn with_shadow_path(mut self, shadow_path: impl Into<String>) -> Self {
        self.shadow_path = shadow_path.into();
        self
    }

    /// Sets whether the shadow root is volatile.
    #[must_use]
    pub fn with_volatile(mut self, volatile: bool) -> Self {
        self.volatile = volatile;
        self
    }

    /// Sets the emitter settings.
    #[must_use]
    pub fn with_script(mut self, script: ScriptOptions) -> Self {
        self.script = script;
        self
    }
}

/// What a successful capture produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A script was written.
    Written {
        /// Where the script was written
        path: PathBuf,
        /// Number of keys in the script
        sections: usize,
    },
    /// The callback left nothing worth registering; no file was written.
    NothingToRegister,
}

/// The private key hosting the redirected hives during a capture.
///
/// The shadow root is deleted with everything below it by [`ShadowRoot::delete`], or on
/// drop if that was never called.
pub struct ShadowRoot<'r> {
    /// Real parent of the shadow root, opened before any redirection is installed
    parent: RegistryKey<'r>,
    /// Name of the shadow root below `parent`
    leaf: String,
    path: String,
    deleted: bool,
}

impl<'r> ShadowRoot<'r> {
    /// Creates the shadow root at `path` below `HKEY_CURRENT_USER`, with one placeholder
    /// child per redirected hive named after the hive.
    ///
    /// A shadow root left behind by an interrupted run is removed first.
    ///
    /// Separators around and between the segments of `path` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if `path` names no key below `HKEY_CURRENT_USER`, and
    /// [`Error::Platform`] if a key cannot be created. Whatever was created is removed
    /// again.
    pub fn create(registry: &'r Registry, path: &str, volatile: bool) -> Result<Self> {
        let segments: Vec<&str> = path.split('\\').filter(|s| !s.is_empty()).collect();
        let Some((leaf, parent_segments)) = segments.split_last() else {
            return Err(Error::InvalidName(path.to_string()));
        };
        let path = segments.join("\\");

        let user = registry.current_user();
        match user.delete_subkey_tree(&path) {
            Ok(()) => warn!("Removed a stale shadow root at {}\\{path}", user.name()),
            Err(e) if e.status() == Some(Status::FILE_NOT_FOUND) => {}
            Err(e) => return Err(e),
        }

        let root = user.create_subkey_with(
            &path,
            KeyRights::FULL_CONTROL,
            KeyOptions::default(),
            volatile,
        )?;
        let parent = match user.open_subkey_with(
            &parent_segments.join("\\"),
            KeyRights::FULL_CONTROL,
            KeyOptions::default(),
        ) {
            Ok(parent) => parent,
            Err(e) => {
                if let Err(cleanup) = user.delete_subkey_tree(&path) {
                    warn!("Failed to delete the shadow root: {cleanup}");
                }
                return Err(e);
            }
        };
        let shadow = ShadowRoot {
            parent,
            leaf: (*leaf).to_string(),
            path,
            deleted: false,
        };

        for hive in REDIRECTED_HIVES {
            root.create_subkey_with(
                hive.name(),
                KeyRights::FULL_CONTROL,
                KeyOptions::default(),
                volatile,
            )?;
        }

        debug!("created shadow root {}", root.name());
        Ok(shadow)
    }

    /// Location of the shadow root below `HKEY_CURRENT_USER`, without stray separators.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Opens a fresh read handle to the shadow root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the shadow root cannot be opened.
    pub fn open(&self) -> Result<RegistryKey<'r>> {
        self.parent.open_subkey(&self.leaf)
    }

    /// Opens the placeholder of `hive` with full control, as a redirection destination.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the placeholder cannot be opened.
    pub fn open_hive(&self, hive: PredefinedKey) -> Result<RegistryKey<'r>> {
        self.parent.open_subkey_with(
            &format!("{}\\{}", self.leaf, hive.name()),
            KeyRights::FULL_CONTROL,
            KeyOptions::default(),
        )
    }

    /// Deletes the shadow root and everything below it.
    ///
    /// The deletion goes through a handle opened when the shadow root was created, so it
    /// reaches the real key even while `HKEY_CURRENT_USER` is still redirected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the deletion fails. It is not retried on drop.
    pub fn delete(mut self) -> Result<()> {
        self.deleted = true;
        self.parent.delete_subkey_tree(&self.leaf)
    }
}

impl Drop for ShadowRoot<'_> {
    fn drop(&mut self) {
        if !self.deleted {
            if let Err(e) = self.parent.delete_subkey_tree(&self.leaf) {
                warn!("Failed to delete the shadow root: {e}");
            }
        }
    }
}

impl std::fmt::Debug for ShadowRoot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowRoot")
            .field("path", &self.path)
            .field("deleted", &self.deleted)
            .finish_non_exhaustive()
    }
}

/// Runs `work` with the well-known hives redirected into a shadow root, and writes what it
/// registered to `destination` as a `REGEDIT4` script.
///
/// The real hives are never written to. When `work` registers nothing, no file is written
/// and [`CaptureOutcome::NothingToRegister`] is returned. The script is written through a
/// temporary file in the destination directory, so a failed run never leaves a partial
/// script behind. The destination directory must exist.
///
/// Redirections are global to the process: run at most one capture at a time.
///
/// # Errors
///
/// - [`Error::Registration`] with the callback's error if `work` fails; a callback error
///   that already is an [`Error`] is returned as is
/// - [`Error::Platform`] if setting up or tearing down the shadow root or the redirections
///   fails, or the shadow tree cannot be read
/// - [`Error::UnsupportedValueKind`] or [`Error::MalformedValue`] if a captured value
///   cannot be expressed in the script
/// - [`Error::FileError`] if the script cannot be written
/// - [`Error::InvalidName`] if [`CaptureOptions::shadow_path`] names no key
///
/// The shadow root is deleted after the script is written. If that deletion fails, the
/// error is returned even though the script is already in place at `destination`.
///
/// # Examples
///
/// ```rust,no_run
/// use regcapture::{capture_and_emit, CaptureOptions, CaptureOutcome, MemoryApi, Registry};
/// use std::path::Path;
///
/// let registry = Registry::new(MemoryApi::new());
/// let outcome = capture_and_emit(
///     &registry,
///     |registry: &Registry| registry.classes_root().create_subkey(".sample").map(drop),
///     Path::new("sample.reg"),
///     &CaptureOptions::default(),
/// )?;
/// assert!(matches!(outcome, CaptureOutcome::Written { sections: 1, .. }));
/// # Ok::<(), regcapture::Error>(())
/// ```
pub fn capture_and_emit<F, E>(
    registry: &Registry,
    work: F,
    destination: &Path,
    options: &CaptureOptions,
) -> Result<CaptureOutcome>
where
    F: FnOnce(&Registry) -> std::result::Result<(), E>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let shadow = ShadowRoot::create(registry, &options.shadow_path, options.volatile)?;

    let outcome = run_redirected(registry, &shadow, work)
        .and_then(|()| generate(&shadow, destination, &options.script));

    let cleanup = shadow.delete();
    if let (Ok(CaptureOutcome::Written { path, .. }), Err(e)) = (&outcome, &cleanup) {
        warn!(
            "{} was written, but the shadow root could not be removed: {e}",
            path.display()
        );
    }
    prefer_primary(outcome, cleanup)
}

/// Installs the redirections, runs `work` and removes the redirections again.
fn run_redirected<F, E>(registry: &Registry, shadow: &ShadowRoot<'_>, work: F) -> Result<()>
where
    F: FnOnce(&Registry) -> std::result::Result<(), E>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    // Destinations are opened before the first redirection is in place.
    let destinations = REDIRECTED_HIVES
        .iter()
        .map(|&hive| shadow.open_hive(hive))
        .collect::<Result<Vec<_>>>()?;

    let mut bindings = Bindings(Vec::with_capacity(REDIRECTED_HIVES.len()));
    let worked = REDIRECTED_HIVES
        .iter()
        .zip(destinations)
        .try_for_each(|(&hive, destination)| {
            bindings.0.push(RegistryOverride::install(hive, destination)?);
            Ok::<(), Error>(())
        })
        .and_then(|()| work(registry).map_err(registration_error));

    prefer_primary(worked, bindings.release())
}

/// Installed redirections. They are removed last to first, by [`Bindings::release`] or,
/// when the callback unwinds, on drop.
struct Bindings<'r>(Vec<RegistryOverride<'r>>);

impl Bindings<'_> {
    /// Disposes every binding, last to first. Every binding is attempted; the first
    /// failure is returned.
    fn release(&mut self) -> Result<()> {
        let mut released = Ok(());
        while let Some(mut binding) = self.0.pop() {
            if let Err(e) = binding.dispose() {
                if released.is_ok() {
                    released = Err(e);
                } else {
                    warn!("{e}");
                }
            }
        }
        released
    }
}

impl Drop for Bindings<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("{e}");
        }
    }
}

fn registration_error<E>(error: E) -> Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match error.into().downcast::<Error>() {
        Ok(error) => *error,
        Err(other) => Error::Registration(other),
    }
}

/// Emits the shadow tree and writes the script if there is anything to write.
fn generate(
    shadow: &ShadowRoot<'_>,
    destination: &Path,
    options: &ScriptOptions,
) -> Result<CaptureOutcome> {
    let root = shadow.open()?;
    let emitted = emit(&root, root.name(), options)?;

    if !emitted.has_content() {
        warn!("No registry script will be produced since there are no types to register");
        return Ok(CaptureOutcome::NothingToRegister);
    }

    write_script(destination, &emitted.text)?;
    info!(
        "Wrote {} registry keys to {}",
        emitted.sections,
        destination.display()
    );

    Ok(CaptureOutcome::Written {
        path: destination.to_path_buf(),
        sections: emitted.sections,
    })
}

/// Replaces `destination` with `text`, encoded as UTF-8 without a byte order mark.
///
/// The text goes to a temporary file next to the destination first, which is then renamed
/// over it.
///
/// # Errors
///
/// Returns [`Error::FileError`] if the temporary file cannot be written or renamed.
pub fn write_script(destination: &Path, text: &str) -> Result<()> {
    let directory = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    file.persist(destination).map_err(|e| e.error)?;
    Ok(())
}

/// Combines the result of a step with the result of the cleanup that followed it.
///
/// A cleanup failure is returned only if the step itself succeeded.
fn prefer_primary<T>(primary: Result<T>, cleanup: Result<()>) -> Result<T> {
    match (primary, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup)) => Err(cleanup),
        (Err(primary), Ok(())) => Err(primary),
        (Err(primary), Err(cleanup)) => {
            warn!("Cleanup failed after an earlier error: {cleanup}");
            Err(primary)
        }
    }
}
