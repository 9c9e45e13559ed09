//! The Windows registry.
//!
//! Thin wrappers over advapi32. The key-name query has no advapi32 counterpart and goes to
//! `NtQueryKey` in ntdll.

use std::{ffi::c_void, ptr};

use widestring::{U16CStr, U16CString};
use windows_sys::Win32::{
    Foundation::{CloseHandle, LocalFree, ERROR_SUCCESS, HANDLE},
    Security::{
        Authorization::ConvertSidToStringSidW, GetTokenInformation, TokenUser, TOKEN_QUERY,
        TOKEN_USER,
    },
    System::{
        Registry::{
            RegCloseKey, RegCreateKeyExW, RegDeleteTreeW, RegEnumKeyExW, RegEnumValueW,
            RegOpenKeyExW, RegOverridePredefKey, RegQueryInfoKeyW, RegQueryValueExW,
            RegSetValueExW, HKEY, REG_OPTION_NON_VOLATILE, REG_OPTION_VOLATILE,
        },
        Threading::{GetCurrentProcess, OpenProcessToken},
    },
};

use super::{KeyInfo, RawKey, RegistryApi, Status};

/// `KeyNameInformation` in `KEY_INFORMATION_CLASS`
const KEY_NAME_INFORMATION: u32 = 3;

/// Size of `KEY_NAME_INFORMATION::NameLength`, which precedes the name.
const NAME_LENGTH_SIZE: usize = std::mem::size_of::<u32>();

/// SID reported when the process token cannot be read.
const FALLBACK_SID: &str = ".DEFAULT";

#[link(name = "ntdll")]
extern "system" {
    fn NtQueryKey(
        key: HKEY,
        class: u32,
        information: *mut c_void,
        length: u32,
        result_length: *mut u32,
    ) -> i32;
}

fn hkey(key: RawKey) -> HKEY {
    key.0 as HKEY
}

fn check(code: u32) -> Result<(), Status> {
    if code == ERROR_SUCCESS {
        Ok(())
    } else {
        Err(Status(code))
    }
}

fn wide(s: &str) -> Result<U16CString, Status> {
    U16CString::from_str(s).map_err(|_| Status::INVALID_PARAMETER)
}

fn buffer_len<T>(buffer: &[T]) -> u32 {
    u32::try_from(buffer.len()).unwrap_or(u32::MAX)
}

/// Reads the SID of the process token's user.
fn token_user_sid() -> Option<String> {
    let mut token: HANDLE = ptr::null_mut();
    // SAFETY: the pseudo handle of the current process needs no closing; `token` is written
    // on success and closed below.
    if unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) } == 0 {
        return None;
    }

    let mut needed = 0u32;
    // SAFETY: a null buffer of length zero only asks for the required size.
    unsafe { GetTokenInformation(token, TokenUser, ptr::null_mut(), 0, &mut needed) };

    // u64 elements keep the TOKEN_USER header aligned.
    let mut buffer = vec![0u64; (needed as usize).div_ceil(8)];
    let mut sid_text = ptr::null_mut();
    // SAFETY: `buffer` holds `needed` bytes; on success it starts with a TOKEN_USER whose SID
    // pointer points into the same buffer. The string from ConvertSidToStringSidW is released
    // with LocalFree.
    unsafe {
        let ok = GetTokenInformation(
            token,
            TokenUser,
            buffer.as_mut_ptr().cast(),
            needed,
            &mut needed,
        ) != 0
            && ConvertSidToStringSidW(
                (*buffer.as_ptr().cast::<TOKEN_USER>()).User.Sid,
                &mut sid_text,
            ) != 0;

        let sid = ok.then(|| U16CStr::from_ptr_str(sid_text).to_string_lossy());
        if !sid_text.is_null() {
            LocalFree(sid_text.cast());
        }
        CloseHandle(token);
        sid
    }
}

/// The registry of the running Windows system.
///
/// Every call goes straight to the platform. Predefined-key overrides installed through this
/// backend affect the whole process.
#[derive(Debug, Clone)]
pub struct NativeApi {
    user_sid: String,
}

impl Default for NativeApi {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeApi {
    /// Creates the backend, reading the current user's SID from the process token.
    #[must_use]
    pub fn new() -> Self {
        NativeApi {
            user_sid: token_user_sid().unwrap_or_else(|| FALLBACK_SID.to_string()),
        }
    }
}

impl RegistryApi for NativeApi {
    fn open_key(&self, parent: RawKey, subkey: &str, access: u32) -> Result<RawKey, Status> {
        let subkey = wide(subkey)?;
        let mut result: HKEY = ptr::null_mut();
        // SAFETY: `subkey` is NUL-terminated and outlives the call.
        check(unsafe { RegOpenKeyExW(hkey(parent), subkey.as_ptr(), 0, access, &mut result) })?;
        Ok(RawKey(result as usize))
    }

    fn create_key(
        &self,
        parent: RawKey,
        subkey: &str,
        access: u32,
        volatile: bool,
    ) -> Result<RawKey, Status> {
        let subkey = wide(subkey)?;
        let options = if volatile {
            REG_OPTION_VOLATILE
        } else {
            REG_OPTION_NON_VOLATILE
        };
        let mut result: HKEY = ptr::null_mut();
        // SAFETY: `subkey` is NUL-terminated and outlives the call; class, security
        // attributes and disposition are optional.
        check(unsafe {
            RegCreateKeyExW(
                hkey(parent),
                subkey.as_ptr(),
                0,
                ptr::null(),
                options,
                access,
                ptr::null(),
                &mut result,
                ptr::null_mut(),
            )
        })?;
        Ok(RawKey(result as usize))
    }

    fn close_key(&self, key: RawKey) -> Result<(), Status> {
        // SAFETY: closing a handle has no memory-safety preconditions.
        check(unsafe { RegCloseKey(hkey(key)) })
    }

    fn query_info(&self, key: RawKey) -> Result<KeyInfo, Status> {
        let mut info = KeyInfo::default();
        // SAFETY: all out-pointers are valid for the call; unused outputs are null.
        check(unsafe {
            RegQueryInfoKeyW(
                hkey(key),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null(),
                &mut info.sub_keys,
                &mut info.max_sub_key_len,
                ptr::null_mut(),
                &mut info.values,
                &mut info.max_value_name_len,
                &mut info.max_value_len,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        })?;
        Ok(info)
    }

    fn enum_key(&self, key: RawKey, index: u32, name: &mut [u16]) -> Result<usize, Status> {
        let mut len = buffer_len(name);
        // SAFETY: `name` has room for `len` units.
        check(unsafe {
            RegEnumKeyExW(
                hkey(key),
                index,
                name.as_mut_ptr(),
                &mut len,
                ptr::null(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        })?;
        Ok(len as usize)
    }

    fn enum_value(&self, key: RawKey, index: u32, name: &mut [u16]) -> Result<usize, Status> {
        let mut len = buffer_len(name);
        // SAFETY: `name` has room for `len` units; type and data are not requested.
        check(unsafe {
            RegEnumValueW(
                hkey(key),
                index,
                name.as_mut_ptr(),
                &mut len,
                ptr::null(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        })?;
        Ok(len as usize)
    }

    fn query_value(
        &self,
        key: RawKey,
        name: &str,
        data: Option<&mut [u8]>,
    ) -> Result<(u32, usize), Status> {
        let name = wide(name)?;
        let mut kind = 0u32;
        let (pointer, mut size) = match data {
            Some(buffer) => (buffer.as_mut_ptr(), buffer_len(buffer)),
            None => (ptr::null_mut(), 0),
        };
        // SAFETY: `pointer` is null or valid for `size` bytes; `name` is NUL-terminated.
        check(unsafe {
            RegQueryValueExW(hkey(key), name.as_ptr(), ptr::null(), &mut kind, pointer, &mut size)
        })?;
        Ok((kind, size as usize))
    }

    fn set_value(&self, key: RawKey, name: &str, kind: u32, data: &[u8]) -> Result<(), Status> {
        let name = wide(name)?;
        // SAFETY: `data` is valid for its length; `name` is NUL-terminated.
        check(unsafe {
            RegSetValueExW(hkey(key), name.as_ptr(), 0, kind, data.as_ptr(), buffer_len(data))
        })
    }

    fn override_key(&self, predefined: RawKey, target: RawKey) -> Result<(), Status> {
        // SAFETY: both arguments are handles; a null target removes the redirection.
        check(unsafe { RegOverridePredefKey(hkey(predefined), hkey(target)) })
    }

    fn delete_tree(&self, key: RawKey, subkey: &str) -> Result<(), Status> {
        let subkey = wide(subkey)?;
        // SAFETY: `subkey` is NUL-terminated and outlives the call.
        check(unsafe { RegDeleteTreeW(hkey(key), subkey.as_ptr()) })
    }

    fn query_key_path(&self, key: RawKey, path: Option<&mut [u16]>) -> Result<usize, Status> {
        let units = path.as_ref().map_or(0, |buffer| buffer.len());

        // u32 elements keep the NameLength header aligned.
        let mut information = vec![0u32; 1 + units.div_ceil(2)];
        let length = if path.is_some() {
            buffer_len(&information) * 4
        } else {
            0
        };
        let mut needed = 0u32;

        // SAFETY: `information` is valid for `length` bytes.
        let status = unsafe {
            NtQueryKey(
                hkey(key),
                KEY_NAME_INFORMATION,
                information.as_mut_ptr().cast(),
                length,
                &mut needed,
            )
        };

        let Some(buffer) = path else {
            if status >= 0 || Status(status as u32).is_buffer_too_small() {
                return Ok((needed as usize).saturating_sub(NAME_LENGTH_SIZE) / 2);
            }
            return Err(Status(status as u32));
        };

        if status < 0 {
            return Err(Status(status as u32));
        }

        let name_len = information[0] as usize / 2;
        if name_len > buffer.len() {
            return Err(Status::BUFFER_TOO_SMALL);
        }

        let name: Vec<u16> = information[1..]
            .iter()
            .flat_map(|pair| {
                let bytes = pair.to_le_bytes();
                [
                    u16::from_le_bytes([bytes[0], bytes[1]]),
                    u16::from_le_bytes([bytes[2], bytes[3]]),
                ]
            })
            .take(name_len)
            .collect();
        buffer[..name_len].copy_from_slice(&name);
        Ok(name_len)
    }

    fn current_user_sid(&self) -> String {
        self.user_sid.clone()
    }
}
