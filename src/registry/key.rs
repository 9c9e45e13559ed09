//! Owned registry key handles.
//!
//! [`RegistryKey`] is the unit every other layer works with. It carries:
//!
//! - the raw handle,
//! - the logical name, i.e. the backslash-separated path from the predefined root it was
//!   reached through, fixed when the handle is opened or created,
//! - the view options new child handles inherit,
//! - whether it owns the handle (predefined roots are never closed).
//!
//! # Buffer sizing
//!
//! Enumeration and value reads first learn how large the result is, allocate, then fetch.
//! Another writer can grow the data in between, so a "buffer too small" answer to the fetch
//! is not an error: the size is queried again and the fetch repeated. [`fetch_sized`] is the
//! single place this happens.

use log::debug;
use widestring::U16Str;

use super::{
    names,
    types::{access_mask, KeyOptions, KeyRights, PredefinedKey, RegistryValue},
    KeyInfo, Operation, RawKey, Registry, Status,
};
use crate::{Error, Result};

/// How often a fetch is repeated after the data outgrew the queried size.
const MAX_RESIZE_ATTEMPTS: usize = 16;

/// Size-then-fetch with retry.
///
/// Allocates `size` elements and calls `fetch`, which returns how many elements it filled
/// plus any side result. When `fetch` reports a too-small buffer the size is refreshed with
/// `requery` and the fetch repeated, up to [`MAX_RESIZE_ATTEMPTS`] times.
pub(crate) fn fetch_sized<T, M>(
    mut size: usize,
    mut requery: impl FnMut() -> std::result::Result<usize, Status>,
    mut fetch: impl FnMut(&mut [T]) -> std::result::Result<(usize, M), Status>,
) -> std::result::Result<(Vec<T>, M), Status>
where
    T: Copy + Default,
{
    let mut attempts = 0;
    loop {
        let mut buffer = vec![T::default(); size];
        match fetch(&mut buffer) {
            Ok((used, extra)) => {
                buffer.truncate(used);
                return Ok((buffer, extra));
            }
            Err(status) if status.is_buffer_too_small() && attempts < MAX_RESIZE_ATTEMPTS => {
                attempts += 1;
                size = requery()?;
            }
            Err(status) => return Err(status),
        }
    }
}

/// Sorts by UTF-16 code unit, the order the platform compares names in.
fn sort_ordinal(names: &mut [String]) {
    names.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));
}

fn check_name(name: &str) -> Result<()> {
    if name.contains('\0') {
        Err(Error::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

/// An open registry key.
///
/// Handles are owned exclusively and closed when the key is dropped or [`RegistryKey::close`]
/// is called, whichever comes first. Closing is idempotent.
///
/// # Examples
///
/// ```rust,no_run
/// use regcapture::registry::{MemoryApi, Registry};
///
/// let registry = Registry::new(MemoryApi::new());
/// let key = registry.local_machine().create_subkey(r"SOFTWARE\Sample")?;
/// assert_eq!(key.name(), r"HKEY_LOCAL_MACHINE\SOFTWARE\Sample");
///
/// key.set_string("Path", r"C:\Sample")?;
/// assert_eq!(key.value("Path")?.as_string(), r"C:\Sample");
/// # Ok::<(), regcapture::Error>(())
/// ```
pub struct RegistryKey<'r> {
    registry: &'r Registry,
    handle: RawKey,
    name: String,
    options: KeyOptions,
    open: bool,
}

impl<'r> RegistryKey<'r> {
    pub(crate) fn predefined(registry: &'r Registry, hive: PredefinedKey) -> Self {
        RegistryKey {
            registry,
            handle: hive.raw(),
            name: hive.name().to_string(),
            options: KeyOptions::default(),
            open: false,
        }
    }

    fn child(&self, handle: RawKey, subkey: &str, options: KeyOptions) -> RegistryKey<'r> {
        let name = self
            .name
            .split('\\')
            .chain(subkey.split('\\'))
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("\\");
        debug!("opened {name} ({:#x})", handle.0);

        RegistryKey {
            registry: self.registry,
            handle,
            name,
            options,
            open: !handle.is_null(),
        }
    }

    fn fail(&self, operation: Operation, status: Status) -> Error {
        platform_error!(operation, self.name, status)
    }

    fn fail_at(&self, operation: Operation, status: Status, item: &str) -> Error {
        platform_error!(operation, status, "{}\\{}", self.name, item)
    }

    /// The registry this key belongs to.
    #[must_use]
    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// The raw handle.
    #[must_use]
    pub fn handle(&self) -> RawKey {
        self.handle
    }

    /// The logical name: the path from the predefined root this key was reached through.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// View options inherited by keys opened below this one.
    #[must_use]
    pub fn options(&self) -> KeyOptions {
        self.options
    }

    /// Whether this key holds a handle that [`RegistryKey::close`] will release.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// The predefined key this handle is, if it is one.
    #[must_use]
    pub fn predefined_key(&self) -> Option<PredefinedKey> {
        PredefinedKey::from_raw(self.handle)
    }

    /// Opens an existing subkey for reading.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the subkey does not exist or access is denied.
    pub fn open_subkey(&self, name: &str) -> Result<RegistryKey<'r>> {
        self.open_subkey_with(name, KeyRights::READ_KEY, self.options)
    }

    /// Opens an existing subkey with explicit rights and view options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the subkey does not exist or access is denied.
    pub fn open_subkey_with(
        &self,
        name: &str,
        rights: KeyRights,
        options: KeyOptions,
    ) -> Result<RegistryKey<'r>> {
        check_name(name)?;
        let handle = self
            .registry
            .api()
            .open_key(self.handle, name, access_mask(rights, options))
            .map_err(|status| self.fail_at(Operation::OpenKey, status, name))?;

        Ok(self.child(handle, name, options))
    }

    /// Opens or creates a subkey with full control.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the platform refuses the creation.
    pub fn create_subkey(&self, name: &str) -> Result<RegistryKey<'r>> {
        self.create_subkey_with(name, KeyRights::FULL_CONTROL, self.options, false)
    }

    /// Opens or creates a subkey with explicit rights, view options and volatility.
    ///
    /// Volatile keys are not persisted across a restart. The platform refuses to create a
    /// non-volatile key below a volatile one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the platform refuses the creation.
    pub fn create_subkey_with(
        &self,
        name: &str,
        rights: KeyRights,
        options: KeyOptions,
        volatile: bool,
    ) -> Result<RegistryKey<'r>> {
        check_name(name)?;
        let handle = self
            .registry
            .api()
            .create_key(self.handle, name, access_mask(rights, options), volatile)
            .map_err(|status| self.fail_at(Operation::CreateKey, status, name))?;

        Ok(self.child(handle, name, options))
    }

    /// Opens a second, independent handle to this key with other view options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the key can no longer be opened.
    pub fn reopen(&self, options: KeyOptions) -> Result<RegistryKey<'r>> {
        let handle = self
            .registry
            .api()
            .open_key(self.handle, "", access_mask(KeyRights::READ_KEY, options))
            .map_err(|status| self.fail(Operation::OpenKey, status))?;

        Ok(RegistryKey {
            registry: self.registry,
            handle,
            name: self.name.clone(),
            options,
            open: true,
        })
    }

    /// Queries the key statistics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the query fails.
    pub fn info(&self) -> Result<KeyInfo> {
        self.registry
            .api()
            .query_info(self.handle)
            .map_err(|status| self.fail(Operation::QueryInfo, status))
    }

    /// Number of direct subkeys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the query fails.
    pub fn subkey_count(&self) -> Result<usize> {
        Ok(self.info()?.sub_keys as usize)
    }

    /// Number of values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the query fails.
    pub fn value_count(&self) -> Result<usize> {
        Ok(self.info()?.values as usize)
    }

    /// Names of the direct subkeys, sorted.
    ///
    /// The platform's enumeration order is not guaranteed; sorting makes everything built
    /// on top of this deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if querying or enumerating fails.
    pub fn subkey_names(&self) -> Result<Vec<String>> {
        let api = self.registry.api();
        let info = self.info()?;

        let mut names = self.enumerate(
            info.sub_keys,
            info.max_sub_key_len,
            |info| info.max_sub_key_len,
            |index, buffer| api.enum_key(self.handle, index, buffer),
        )
        .map_err(|status| self.fail(Operation::EnumerateKeys, status))?;

        sort_ordinal(&mut names);
        Ok(names)
    }

    /// Names of the values, sorted. The default value has the empty name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if querying or enumerating fails.
    pub fn value_names(&self) -> Result<Vec<String>> {
        let api = self.registry.api();
        let info = self.info()?;

        let mut names = self.enumerate(
            info.values,
            info.max_value_name_len,
            |info| info.max_value_name_len,
            |index, buffer| api.enum_value(self.handle, index, buffer),
        )
        .map_err(|status| self.fail(Operation::EnumerateValues, status))?;

        sort_ordinal(&mut names);
        Ok(names)
    }

    fn enumerate(
        &self,
        count: u32,
        max_len: u32,
        max_len_of: impl Fn(&KeyInfo) -> u32,
        mut entry: impl FnMut(u32, &mut [u16]) -> std::result::Result<usize, Status>,
    ) -> std::result::Result<Vec<String>, Status> {
        let mut names = Vec::with_capacity(count as usize);
        if count == 0 {
            return Ok(names);
        }

        let api = self.registry.api();
        for index in 0.. {
            let fetched = fetch_sized(
                max_len as usize + 1,
                || Ok(max_len_of(&api.query_info(self.handle)?) as usize + 1),
                |buffer| entry(index, buffer).map(|len| (len, ())),
            );

            match fetched {
                Ok((units, ())) => names.push(U16Str::from_slice(&units).to_string_lossy()),
                Err(Status::NO_MORE_ITEMS) => break,
                Err(status) => return Err(status),
            }
        }

        Ok(names)
    }

    /// Reads a value's type and bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the value does not exist or cannot be read.
    pub fn value(&self, name: &str) -> Result<RegistryValue> {
        check_name(name)?;
        let api = self.registry.api();
        let fail = |status| self.fail_at(Operation::QueryValue, status, name);

        let (_, size) = api.query_value(self.handle, name, None).map_err(fail)?;
        let (data, kind) = fetch_sized(
            size,
            || api.query_value(self.handle, name, None).map(|(_, size)| size),
            |buffer| {
                api.query_value(self.handle, name, Some(buffer))
                    .map(|(kind, size)| (size, kind))
            },
        )
        .map_err(fail)?;

        Ok(RegistryValue::new(name, kind, data))
    }

    /// Writes a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the write is refused.
    pub fn set_value(&self, value: &RegistryValue) -> Result<()> {
        check_name(&value.name)?;
        self.registry
            .api()
            .set_value(self.handle, &value.name, value.kind, &value.data)
            .map_err(|status| self.fail_at(Operation::SetValue, status, &value.name))
    }

    /// Writes a `REG_SZ` value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the write is refused.
    pub fn set_string(&self, name: &str, data: &str) -> Result<()> {
        self.set_value(&RegistryValue::string(name, data))
    }

    /// Writes a `REG_DWORD` value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the write is refused.
    pub fn set_dword(&self, name: &str, data: u32) -> Result<()> {
        self.set_value(&RegistryValue::dword(name, data))
    }

    /// Writes a `REG_MULTI_SZ` value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the write is refused.
    pub fn set_multi_string<S: AsRef<str>>(&self, name: &str, data: &[S]) -> Result<()> {
        self.set_value(&RegistryValue::multi_string(name, data))
    }

    /// Writes a `REG_BINARY` value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the write is refused.
    pub fn set_binary(&self, name: &str, data: &[u8]) -> Result<()> {
        self.set_value(&RegistryValue::binary(name, data))
    }

    /// Deletes a subkey and everything below it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the subkey does not exist or cannot be deleted.
    pub fn delete_subkey_tree(&self, name: &str) -> Result<()> {
        check_name(name)?;
        self.registry
            .api()
            .delete_tree(self.handle, name)
            .map_err(|status| self.fail_at(Operation::DeleteTree, status, name))?;

        debug!("deleted {}\\{name}", self.name);
        Ok(())
    }

    /// The canonical name of the key as the platform sees it, in hive notation.
    ///
    /// Unlike [`RegistryKey::name`], this asks the platform where the handle really points,
    /// which differs from the logical name for keys reached through a redirected root. The
    /// platform's native path is translated back to the symbolic hive names with
    /// [`names::from_native_path`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the path query fails.
    pub fn real_name(&self) -> Result<String> {
        if let Some(hive) = self.predefined_key() {
            return Ok(hive.name().to_string());
        }

        let api = self.registry.api();
        let fail = |status| self.fail(Operation::QueryKeyName, status);

        let size = api.query_key_path(self.handle, None).map_err(fail)?;
        let (units, ()) = fetch_sized(
            size,
            || api.query_key_path(self.handle, None),
            |buffer| api.query_key_path(self.handle, Some(buffer)).map(|len| (len, ())),
        )
        .map_err(fail)?;

        let native = U16Str::from_slice(&units).to_string_lossy();
        Ok(names::from_native_path(&native, &api.current_user_sid()))
    }

    /// Releases the handle. Closing an already closed key, or a predefined key, does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`] if the platform refuses to release the handle. The key
    /// counts as closed either way.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }

        self.open = false;
        self.registry
            .api()
            .close_key(self.handle)
            .map_err(|status| self.fail(Operation::CloseKey, status))
    }
}

impl Drop for RegistryKey<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            debug!("{error}");
        }
    }
}

impl std::fmt::Debug for RegistryKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryKey")
            .field("name", &self.name)
            .field("handle", &format_args!("{:#x}", self.handle.0))
            .field("options", &self.options)
            .field("open", &self.open)
            .finish()
    }
}
