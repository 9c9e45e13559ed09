//! The raw registry call surface.

use std::fmt;

use strum::Display;

/// A raw key handle as the platform sees it.
///
/// Predefined roots use their sign-extended constants (see
/// [`super::PredefinedKey::raw`]); every other value is a handle returned by
/// [`RegistryApi::open_key`] or [`RegistryApi::create_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawKey(pub usize);

impl RawKey {
    /// The null handle. Passed to [`RegistryApi::override_key`] it removes a redirection.
    pub const NULL: RawKey = RawKey(0);

    /// Whether this is the null handle.
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A non-success platform status code.
///
/// Registry calls report Win32 error codes; the native key-name query reports NTSTATUS
/// values. Both are carried unchanged.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u32);

impl Status {
    /// `ERROR_FILE_NOT_FOUND`
    pub const FILE_NOT_FOUND: Status = Status(2);
    /// `ERROR_ACCESS_DENIED`
    pub const ACCESS_DENIED: Status = Status(5);
    /// `ERROR_INVALID_HANDLE`
    pub const INVALID_HANDLE: Status = Status(6);
    /// `ERROR_INVALID_PARAMETER`
    pub const INVALID_PARAMETER: Status = Status(87);
    /// `ERROR_MORE_DATA`
    pub const MORE_DATA: Status = Status(234);
    /// `ERROR_NO_MORE_ITEMS`
    pub const NO_MORE_ITEMS: Status = Status(259);
    /// `ERROR_KEY_DELETED`
    pub const KEY_DELETED: Status = Status(1018);
    /// `ERROR_CHILD_MUST_BE_VOLATILE`
    pub const CHILD_MUST_BE_VOLATILE: Status = Status(1021);
    /// `STATUS_BUFFER_OVERFLOW`
    pub const BUFFER_OVERFLOW: Status = Status(0x8000_0005);
    /// `STATUS_BUFFER_TOO_SMALL`
    pub const BUFFER_TOO_SMALL: Status = Status(0xC000_0023);

    /// Whether the call failed only because the supplied buffer was too small.
    ///
    /// Such failures are retried after the size is queried again.
    #[must_use]
    pub fn is_buffer_too_small(self) -> bool {
        matches!(
            self,
            Status::MORE_DATA | Status::BUFFER_OVERFLOW | Status::BUFFER_TOO_SMALL
        )
    }

    /// Symbolic name of the well-known codes.
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Status::FILE_NOT_FOUND => "ERROR_FILE_NOT_FOUND",
            Status::ACCESS_DENIED => "ERROR_ACCESS_DENIED",
            Status::INVALID_HANDLE => "ERROR_INVALID_HANDLE",
            Status::INVALID_PARAMETER => "ERROR_INVALID_PARAMETER",
            Status::MORE_DATA => "ERROR_MORE_DATA",
            Status::NO_MORE_ITEMS => "ERROR_NO_MORE_ITEMS",
            Status::KEY_DELETED => "ERROR_KEY_DELETED",
            Status::CHILD_MUST_BE_VOLATILE => "ERROR_CHILD_MUST_BE_VOLATILE",
            Status::BUFFER_OVERFLOW => "STATUS_BUFFER_OVERFLOW",
            Status::BUFFER_TOO_SMALL => "STATUS_BUFFER_TOO_SMALL",
            _ => return None,
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:08X})", self.0),
            None => write!(f, "status 0x{:08X} ({})", self.0, self.0),
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// The registry primitive an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Operation {
    /// Opening an existing key
    OpenKey,
    /// Opening or creating a key
    CreateKey,
    /// Releasing a key handle
    CloseKey,
    /// Querying key statistics
    QueryInfo,
    /// Enumerating subkey names
    EnumerateKeys,
    /// Enumerating value names
    EnumerateValues,
    /// Reading a value
    QueryValue,
    /// Writing a value
    SetValue,
    /// Installing or removing a predefined-key override
    OverrideKey,
    /// Recursively deleting a key
    DeleteTree,
    /// Querying the native path of a key
    QueryKeyName,
}

/// Key statistics, as needed to size enumeration buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyInfo {
    /// Number of subkeys
    pub sub_keys: u32,
    /// Longest subkey name, in UTF-16 units, without the terminator
    pub max_sub_key_len: u32,
    /// Number of values
    pub values: u32,
    /// Longest value name, in UTF-16 units, without the terminator
    pub max_value_name_len: u32,
    /// Largest value data, in bytes
    pub max_value_len: u32,
}

/// The primitive registry calls.
///
/// Each call either succeeds or fails with the platform's [`Status`]; callers turn statuses
/// into [`crate::Error`]s with context. Buffer-filling calls follow the platform's
/// convention: a buffer that is too small yields a status for which
/// [`Status::is_buffer_too_small`] holds, and nothing is written.
///
/// Implementations are single-threaded and synchronous.
pub trait RegistryApi {
    /// Opens an existing key below `parent` with the given access mask.
    fn open_key(&self, parent: RawKey, subkey: &str, access: u32) -> Result<RawKey, Status>;

    /// Opens or creates a key below `parent`. Missing intermediate keys are created too.
    fn create_key(
        &self,
        parent: RawKey,
        subkey: &str,
        access: u32,
        volatile: bool,
    ) -> Result<RawKey, Status>;

    /// Releases a handle obtained from [`RegistryApi::open_key`] or
    /// [`RegistryApi::create_key`].
    fn close_key(&self, key: RawKey) -> Result<(), Status>;

    /// Queries subkey and value counts and the longest name lengths.
    fn query_info(&self, key: RawKey) -> Result<KeyInfo, Status>;

    /// Writes the name of the subkey at `index` into `name` and returns its length.
    ///
    /// The buffer must have room for the terminator. Past the last subkey the call fails
    /// with [`Status::NO_MORE_ITEMS`].
    fn enum_key(&self, key: RawKey, index: u32, name: &mut [u16]) -> Result<usize, Status>;

    /// Writes the name of the value at `index` into `name` and returns its length.
    ///
    /// Same conventions as [`RegistryApi::enum_key`].
    fn enum_value(&self, key: RawKey, index: u32, name: &mut [u16]) -> Result<usize, Status>;

    /// Reads a value's type and data size, and with a buffer also its data.
    ///
    /// Returns the raw type code and the size in bytes.
    fn query_value(
        &self,
        key: RawKey,
        name: &str,
        data: Option<&mut [u8]>,
    ) -> Result<(u32, usize), Status>;

    /// Writes a value.
    fn set_value(&self, key: RawKey, name: &str, kind: u32, data: &[u8]) -> Result<(), Status>;

    /// Redirects a predefined key to `target`; [`RawKey::NULL`] removes the redirection.
    fn override_key(&self, predefined: RawKey, target: RawKey) -> Result<(), Status>;

    /// Deletes `subkey` below `key` with all of its descendants.
    fn delete_tree(&self, key: RawKey, subkey: &str) -> Result<(), Status>;

    /// Returns the length of the key's native path, and with a buffer also writes it.
    ///
    /// The native path is the kernel's name for the key, e.g.
    /// `\REGISTRY\MACHINE\SOFTWARE\Classes\CLSID`.
    fn query_key_path(&self, key: RawKey, path: Option<&mut [u16]>) -> Result<usize, Status>;

    /// The string SID of the user the current-user hive belongs to.
    fn current_user_sid(&self) -> String;
}
