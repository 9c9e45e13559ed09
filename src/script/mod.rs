//! Shadow tree walker and `REGEDIT4` script emitter.
//!
//! A capture leaves its output in a shadow tree whose direct children stand in for the
//! redirected hives and are named after them:
//!
//! ```text
//! <shadow root>
//! ├── HKEY_CLASSES_ROOT
//! │   └── CLSID
//! │       └── {…}
//! ├── HKEY_CURRENT_USER
//! └── HKEY_LOCAL_MACHINE
//! ```
//!
//! [`emit`] walks such a tree depth-first in sorted order and turns every *real* key into a
//! section whose header is the key's path relative to the shadow root, which is exactly its
//! hive-rooted path in the real registry. A key is real when it holds at least one value, or
//! when it has no subkeys and is not one of the hive placeholders.
//!
//! # Output
//!
//! ```text
//! REGEDIT4
//!
//! [HKEY_CLASSES_ROOT\CLSID\{…}]
//! @="Sample Component"
//! "ThreadingModel"="Apartment"
//!
//! ```
//!
//! Lines end with CRLF. String, DWORD, multi-string and binary values are supported; any
//! other value type fails the emission (see [`crate::Error::UnsupportedValueKind`]).
//! How multi-string and binary values are tagged is selected with [`ValueTagStyle`].

mod value;
mod walker;

pub use value::escape;

use crate::{registry::RegistryKey, Result};

/// First line of every script.
pub const HEADER: &str = "REGEDIT4";

/// Line terminator used throughout the script.
pub const LINE_END: &str = "\r\n";

/// How multi-string and binary values are tagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueTagStyle {
    /// The historical output of this tool: both kinds use the `multiStringData:` tag, with
    /// multi-strings as comma-joined quoted strings and binary data as comma-joined
    /// uppercase hex bytes.
    ///
    /// Scripts in this style are understood by the tooling built around the historical
    /// format but are not accepted by `regedit` for those two kinds.
    #[default]
    Compatible,
    /// Tags understood by `regedit`: `hex:` for binary data and `hex(7):` for
    /// multi-strings, both as comma-joined lowercase hex bytes. Multi-string elements are
    /// written as NUL-terminated UTF-8 followed by a final NUL.
    Regedit,
}

/// Emitter settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOptions {
    /// Tags for multi-string and binary values
    pub tag_style: ValueTagStyle,
}

impl ScriptOptions {
    /// Sets the value tag style.
    #[must_use]
    pub fn with_tag_style(mut self, tag_style: ValueTagStyle) -> Self {
        self.tag_style = tag_style;
        self
    }
}

/// A generated script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emitted {
    /// The complete script, header included
    pub text: String,
    /// Number of sections written
    pub sections: usize,
}

impl Emitted {
    /// Whether any key was emitted. A script without sections registers nothing and should
    /// not be written.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.sections > 0
    }
}

/// Emits the subtree below `root` as a script.
///
/// `root_name` is the logical name prefix stripped from every section header; it is
/// normally `root.name()`. The root key itself is never emitted.
///
/// Emission is deterministic: the same tree always yields byte-identical text.
///
/// # Errors
///
/// Returns [`crate::Error::Platform`] if the tree cannot be read,
/// [`crate::Error::UnsupportedValueKind`] for values of unsupported types and
/// [`crate::Error::MalformedValue`] for DWORD values with fewer than four bytes.
///
/// # Examples
///
/// ```rust,no_run
/// use regcapture::{emit, MemoryApi, Registry, ScriptOptions};
///
/// let registry = Registry::new(MemoryApi::new());
/// let shadow = registry.current_user().create_subkey(r"Software\Shadow")?;
/// shadow
///     .create_subkey(r"HKEY_CLASSES_ROOT\.sample")?
///     .set_string("", "SampleFile")?;
///
/// let script = emit(&shadow, shadow.name(), &ScriptOptions::default())?;
/// assert_eq!(
///     script.text,
///     "REGEDIT4\r\n\r\n[HKEY_CLASSES_ROOT\\.sample]\r\n@=\"SampleFile\"\r\n\r\n"
/// );
/// # Ok::<(), regcapture::Error>(())
/// ```
pub fn emit(root: &RegistryKey<'_>, root_name: &str, options: &ScriptOptions) -> Result<Emitted> {
    let body = walker::walk(root, root_name, options)?;

    let mut text = String::with_capacity(HEADER.len() + 2 * LINE_END.len() + body.text.len());
    text.push_str(HEADER);
    text.push_str(LINE_END);
    text.push_str(LINE_END);
    text.push_str(&body.text);

    Ok(Emitted {
        text,
        sections: body.sections,
    })
}
