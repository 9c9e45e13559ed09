//! Predefined roots, access masks, value kinds and values.

use bitflags::bitflags;
use strum::{Display, EnumIter, EnumString, FromRepr, IntoStaticStr};
use widestring::U16String;

use super::RawKey;

/// The predefined root keys.
///
/// These handles exist without being opened. Their raw values are the 32-bit constants
/// sign-extended to pointer width, which is how the platform represents them in an `HKEY`.
/// The string form of each variant is the symbolic hive name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, FromRepr, IntoStaticStr,
)]
#[repr(u32)]
pub enum PredefinedKey {
    /// `HKEY_CLASSES_ROOT`
    #[strum(serialize = "HKEY_CLASSES_ROOT")]
    ClassesRoot = 0x8000_0000,
    /// `HKEY_CURRENT_USER`
    #[strum(serialize = "HKEY_CURRENT_USER")]
    CurrentUser = 0x8000_0001,
    /// `HKEY_LOCAL_MACHINE`
    #[strum(serialize = "HKEY_LOCAL_MACHINE")]
    LocalMachine = 0x8000_0002,
    /// `HKEY_USERS`
    #[strum(serialize = "HKEY_USERS")]
    Users = 0x8000_0003,
    /// `HKEY_PERFORMANCE_DATA`
    #[strum(serialize = "HKEY_PERFORMANCE_DATA")]
    PerformanceData = 0x8000_0004,
    /// `HKEY_CURRENT_CONFIG`
    #[strum(serialize = "HKEY_CURRENT_CONFIG")]
    CurrentConfig = 0x8000_0005,
    /// `HKEY_DYN_DATA`
    #[strum(serialize = "HKEY_DYN_DATA")]
    DynData = 0x8000_0006,
}

impl PredefinedKey {
    /// The raw handle value of this predefined key.
    #[must_use]
    pub fn raw(self) -> RawKey {
        RawKey(self as u32 as i32 as isize as usize)
    }

    /// Maps a raw handle back to the predefined key it denotes, if any.
    #[must_use]
    pub fn from_raw(raw: RawKey) -> Option<Self> {
        let value = i32::try_from(raw.0 as isize).ok()?;
        Self::from_repr(value as u32)
    }

    /// The symbolic hive name, e.g. `HKEY_CLASSES_ROOT`.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Access rights requested when opening or creating a key
    pub struct KeyRights: u32 {
        /// Read values
        const QUERY_VALUE = 0x0001;
        /// Write values
        const SET_VALUE = 0x0002;
        /// Create subkeys
        const CREATE_SUB_KEY = 0x0004;
        /// Enumerate subkeys
        const ENUMERATE_SUB_KEYS = 0x0008;
        /// Request change notifications
        const NOTIFY = 0x0010;
        /// Create symbolic links
        const CREATE_LINK = 0x0020;
        /// Delete the key
        const DELETE = 0x0001_0000;
        /// Read the security descriptor
        const READ_CONTROL = 0x0002_0000;
        /// Modify the DACL
        const WRITE_DAC = 0x0004_0000;
        /// Change the owner
        const WRITE_OWNER = 0x0008_0000;
        /// `KEY_READ`
        const READ_KEY = Self::READ_CONTROL.bits()
            | Self::QUERY_VALUE.bits()
            | Self::ENUMERATE_SUB_KEYS.bits()
            | Self::NOTIFY.bits();
        /// `KEY_WRITE`
        const WRITE_KEY = Self::READ_CONTROL.bits()
            | Self::SET_VALUE.bits()
            | Self::CREATE_SUB_KEY.bits();
        /// `KEY_ALL_ACCESS`
        const FULL_CONTROL = 0x000F_003F;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Registry view selection, combined with the access mask
    pub struct KeyOptions: u32 {
        /// Operate on the 64-bit registry view
        const REGISTRY_VIEW_64 = 0x0100;
        /// Operate on the 32-bit registry view
        const REGISTRY_VIEW_32 = 0x0200;
    }
}

/// Combines rights and view options into the access mask the platform expects.
pub(crate) fn access_mask(rights: KeyRights, options: KeyOptions) -> u32 {
    rights.bits() | options.bits()
}

/// The platform value types.
///
/// Only [`ValueKind::String`], [`ValueKind::DWord`], [`ValueKind::MultiString`] and
/// [`ValueKind::Binary`] can be written to a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[repr(u32)]
pub enum ValueKind {
    /// `REG_NONE`
    None = 0,
    /// `REG_SZ`
    String = 1,
    /// `REG_EXPAND_SZ`
    ExpandString = 2,
    /// `REG_BINARY`
    Binary = 3,
    /// `REG_DWORD`
    DWord = 4,
    /// `REG_DWORD_BIG_ENDIAN`
    DWordBigEndian = 5,
    /// `REG_LINK`
    Link = 6,
    /// `REG_MULTI_SZ`
    MultiString = 7,
    /// `REG_RESOURCE_LIST`
    ResourceList = 8,
    /// `REG_FULL_RESOURCE_DESCRIPTOR`
    FullResourceDescriptor = 9,
    /// `REG_RESOURCE_REQUIREMENTS_LIST`
    ResourceRequirementsList = 10,
    /// `REG_QWORD`
    QWord = 11,
}

impl ValueKind {
    /// Readable name of a raw type code; unknown codes are shown in hex.
    #[must_use]
    pub fn describe(raw: u32) -> String {
        match Self::from_repr(raw) {
            Some(kind) => kind.to_string(),
            None => format!("0x{raw:08X}"),
        }
    }
}

/// A value read from or written to a key: name, raw type code and raw bytes.
///
/// The empty name denotes the key's default value. The type is kept as the raw code so that
/// values of types this crate does not know survive until they are reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryValue {
    /// Value name, empty for the default value
    pub name: String,
    /// Raw platform type code
    pub kind: u32,
    /// Raw data as stored
    pub data: Vec<u8>,
}

impl RegistryValue {
    /// Creates a value from its raw parts.
    pub fn new(name: impl Into<String>, kind: u32, data: Vec<u8>) -> Self {
        RegistryValue {
            name: name.into(),
            kind,
            data,
        }
    }

    /// A `REG_SZ` value, stored NUL-terminated as UTF-16LE.
    pub fn string(name: impl Into<String>, data: &str) -> Self {
        let mut units = U16String::from_str(data).into_vec();
        units.push(0);
        Self::new(name, ValueKind::String as u32, units_to_bytes(&units))
    }

    /// A `REG_DWORD` value, stored little-endian.
    pub fn dword(name: impl Into<String>, data: u32) -> Self {
        Self::new(name, ValueKind::DWord as u32, data.to_le_bytes().to_vec())
    }

    /// A `REG_MULTI_SZ` value: every element NUL-terminated, plus a final NUL.
    pub fn multi_string<S: AsRef<str>>(name: impl Into<String>, data: &[S]) -> Self {
        let mut units = Vec::new();
        for item in data {
            units.extend(U16String::from_str(item.as_ref()).into_vec());
            units.push(0);
        }
        units.push(0);
        Self::new(name, ValueKind::MultiString as u32, units_to_bytes(&units))
    }

    /// A `REG_BINARY` value.
    pub fn binary(name: impl Into<String>, data: &[u8]) -> Self {
        Self::new(name, ValueKind::Binary as u32, data.to_vec())
    }

    /// The known kind of this value, `None` for type codes outside [`ValueKind`].
    #[must_use]
    pub fn kind(&self) -> Option<ValueKind> {
        ValueKind::from_repr(self.kind)
    }

    /// Decodes string data, dropping trailing NULs.
    #[must_use]
    pub fn as_string(&self) -> String {
        let mut units = bytes_to_units(&self.data);
        while units.last() == Some(&0) {
            units.pop();
        }
        U16String::from_vec(units).to_string_lossy()
    }

    /// Decodes multi-string data into its elements.
    ///
    /// Trailing NULs are dropped before splitting, so an empty list decodes to a single
    /// empty element.
    #[must_use]
    pub fn as_multi_string(&self) -> Vec<String> {
        self.as_string().split('\0').map(str::to_string).collect()
    }

    /// Decodes DWORD data, `None` if fewer than four bytes are stored.
    #[must_use]
    pub fn as_dword(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.data.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }
}

fn units_to_bytes(units: &[u16]) -> Vec<u8> {
    units.iter().flat_map(|unit| unit.to_le_bytes()).collect()
}

fn bytes_to_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
