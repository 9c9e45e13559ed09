//! An in-memory registry.
//!
//! [`MemoryApi`] implements [`RegistryApi`] without touching the host, modelling the platform
//! behaviour the engine depends on:
//!
//! - case-insensitive, case-preserving key and value names,
//! - the `\REGISTRY` namespace with `HKEY_LOCAL_MACHINE` at `\REGISTRY\MACHINE`,
//!   `HKEY_USERS` at `\REGISTRY\USER`, `HKEY_CURRENT_USER` at `\REGISTRY\USER\<sid>` and
//!   `HKEY_CLASSES_ROOT` at `\REGISTRY\MACHINE\SOFTWARE\Classes`,
//! - predefined-key overrides,
//! - volatile keys, including the refusal to create a stable key below a volatile one,
//! - access checks for writing values and creating subkeys,
//! - "more data" answers for short buffers, and handles to deleted keys.
//!
//! Enumeration returns entries in insertion order, which is deliberately not sorted.
//!
//! Clones share the same store, so a test can hand one clone to a [`super::Registry`] and
//! inspect the store through another.

use std::{
    cell::RefCell,
    collections::HashMap,
    rc::Rc,
};

use super::{
    types::{KeyRights, PredefinedKey},
    KeyInfo, RawKey, RegistryApi, Status,
};

/// SID of the simulated interactive user.
const DEFAULT_USER_SID: &str = "S-1-5-21-1004336348-1177238915-682003330-1001";

/// First handle value given out; predefined handles live far above.
const FIRST_HANDLE: usize = 0x1000;

type NodeId = usize;

#[derive(Debug)]
struct Node {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    values: Vec<StoredValue>,
    volatile: bool,
    deleted: bool,
}

#[derive(Debug, Clone)]
struct StoredValue {
    name: String,
    kind: u32,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct Handle {
    node: NodeId,
    access: u32,
}

#[derive(Debug)]
struct Store {
    nodes: Vec<Node>,
    handles: HashMap<usize, Handle>,
    next_handle: usize,
    roots: HashMap<PredefinedKey, NodeId>,
    overrides: HashMap<PredefinedKey, NodeId>,
    override_removals: Vec<PredefinedKey>,
    user_sid: String,
    stale_size_reports: u32,
    reject_overrides: bool,
}

impl Store {
    fn new(user_sid: &str) -> Self {
        let mut store = Store {
            nodes: vec![Node {
                name: "REGISTRY".to_string(),
                parent: None,
                children: Vec::new(),
                values: Vec::new(),
                volatile: false,
                deleted: false,
            }],
            handles: HashMap::new(),
            next_handle: FIRST_HANDLE,
            roots: HashMap::new(),
            overrides: HashMap::new(),
            override_removals: Vec::new(),
            user_sid: user_sid.to_string(),
            stale_size_reports: 0,
            reject_overrides: false,
        };

        let machine = store.ensure_path(0, "MACHINE");
        let users = store.ensure_path(0, "USER");
        let user = store.ensure_path(users, user_sid);
        store.ensure_path(user, "Software");
        let classes = store.ensure_path(machine, r"SOFTWARE\Classes");
        let config = store.ensure_path(
            machine,
            r"SYSTEM\CurrentControlSet\Hardware Profiles\Current",
        );

        store.roots.insert(PredefinedKey::LocalMachine, machine);
        store.roots.insert(PredefinedKey::Users, users);
        store.roots.insert(PredefinedKey::CurrentUser, user);
        store.roots.insert(PredefinedKey::ClassesRoot, classes);
        store.roots.insert(PredefinedKey::CurrentConfig, config);
        store
    }

    fn ensure_path(&mut self, from: NodeId, path: &str) -> NodeId {
        segments(path).fold(from, |node, name| match self.child(node, name) {
            Some(child) => child,
            None => self.insert_child(node, name, false),
        })
    }

    fn insert_child(&mut self, parent: NodeId, name: &str, volatile: bool) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            values: Vec::new(),
            volatile,
            deleted: false,
        });
        self.nodes[parent].children.push(id);
        id
    }

    fn child(&self, node: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[node]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child].name.eq_ignore_ascii_case(name))
    }

    fn walk(&self, from: NodeId, path: &str) -> Option<NodeId> {
        segments(path).try_fold(from, |node, name| self.child(node, name))
    }

    fn resolve(&self, key: RawKey) -> Result<Handle, Status> {
        if let Some(hive) = PredefinedKey::from_raw(key) {
            let node = self
                .overrides
                .get(&hive)
                .or_else(|| self.roots.get(&hive))
                .copied()
                .ok_or(Status::INVALID_HANDLE)?;

            return Ok(Handle {
                node,
                access: KeyRights::FULL_CONTROL.bits(),
            });
        }

        let handle = *self.handles.get(&key.0).ok_or(Status::INVALID_HANDLE)?;
        if self.nodes[handle.node].deleted {
            return Err(Status::KEY_DELETED);
        }
        Ok(handle)
    }

    fn allocate(&mut self, node: NodeId, access: u32) -> RawKey {
        let raw = self.next_handle;
        self.next_handle += 4;
        self.handles.insert(raw, Handle { node, access });
        RawKey(raw)
    }

    fn path_of(&self, node: NodeId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            parts.push(self.nodes[id].name.as_str());
            current = self.nodes[id].parent;
        }
        parts.reverse();
        format!("\\{}", parts.join("\\"))
    }

    fn delete_subtree(&mut self, node: NodeId) {
        let mut pending = vec![node];
        while let Some(id) = pending.pop() {
            self.nodes[id].deleted = true;
            pending.extend(self.nodes[id].children.drain(..));
            self.nodes[id].values.clear();
        }
    }

    fn take_stale_report(&mut self) -> bool {
        if self.stale_size_reports > 0 {
            self.stale_size_reports -= 1;
            true
        } else {
            false
        }
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('\\').filter(|segment| !segment.is_empty())
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Copies `name` plus a terminator into `buffer`, returning the name's length in units.
fn write_name(name: &str, buffer: &mut [u16]) -> Result<usize, Status> {
    let units: Vec<u16> = name.encode_utf16().collect();
    if buffer.len() <= units.len() {
        return Err(Status::MORE_DATA);
    }
    buffer[..units.len()].copy_from_slice(&units);
    buffer[units.len()] = 0;
    Ok(units.len())
}

/// A registry held entirely in memory.
///
/// # Examples
///
/// ```rust
/// use regcapture::registry::{MemoryApi, PredefinedKey, Registry};
///
/// let api = MemoryApi::new();
/// let registry = Registry::new(api.clone());
///
/// registry
///     .current_user()
///     .create_subkey(r"Software\Sample")?
///     .set_dword("Count", 3)?;
///
/// assert!(api.key_exists(PredefinedKey::CurrentUser, r"Software\Sample"));
/// # Ok::<(), regcapture::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct MemoryApi {
    store: Rc<RefCell<Store>>,
}

impl Default for MemoryApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryApi {
    /// An empty registry for the default simulated user.
    #[must_use]
    pub fn new() -> Self {
        Self::with_user_sid(DEFAULT_USER_SID)
    }

    /// An empty registry whose current-user hive belongs to `user_sid`.
    #[must_use]
    pub fn with_user_sid(user_sid: &str) -> Self {
        MemoryApi {
            store: Rc::new(RefCell::new(Store::new(user_sid))),
        }
    }

    /// Whether `subkey` exists below the real (never redirected) root of `hive`.
    #[must_use]
    pub fn key_exists(&self, hive: PredefinedKey, subkey: &str) -> bool {
        let store = self.store.borrow();
        store
            .roots
            .get(&hive)
            .and_then(|&root| store.walk(root, subkey))
            .is_some()
    }

    /// Reads a value below the real (never redirected) root of `hive`.
    ///
    /// Returns the raw type code and data.
    #[must_use]
    pub fn read_value(
        &self,
        hive: PredefinedKey,
        subkey: &str,
        name: &str,
    ) -> Option<(u32, Vec<u8>)> {
        let store = self.store.borrow();
        let node = store.walk(*store.roots.get(&hive)?, subkey)?;
        store.nodes[node]
            .values
            .iter()
            .find(|value| value.name.eq_ignore_ascii_case(name))
            .map(|value| (value.kind, value.data.clone()))
    }

    /// Number of handles currently open.
    #[must_use]
    pub fn open_handle_count(&self) -> usize {
        self.store.borrow().handles.len()
    }

    /// Predefined keys that are currently redirected.
    #[must_use]
    pub fn overridden_keys(&self) -> Vec<PredefinedKey> {
        let mut keys: Vec<_> = self.store.borrow().overrides.keys().copied().collect();
        keys.sort_by_key(|key| *key as u32);
        keys
    }

    /// Predefined keys whose redirection was removed, in the order of removal.
    #[must_use]
    pub fn override_removals(&self) -> Vec<PredefinedKey> {
        self.store.borrow().override_removals.clone()
    }

    /// Makes the next `count` size reports claim zero-length names and data.
    ///
    /// Simulates data growing between the size query and the fetch.
    pub fn inject_stale_size_reports(&self, count: u32) {
        self.store.borrow_mut().stale_size_reports = count;
    }

    /// Makes every override request fail with [`Status::ACCESS_DENIED`].
    pub fn reject_overrides(&self, reject: bool) {
        self.store.borrow_mut().reject_overrides = reject;
    }
}

impl RegistryApi for MemoryApi {
    fn open_key(&self, parent: RawKey, subkey: &str, access: u32) -> Result<RawKey, Status> {
        let mut store = self.store.borrow_mut();
        let from = store.resolve(parent)?.node;
        let node = store.walk(from, subkey).ok_or(Status::FILE_NOT_FOUND)?;
        Ok(store.allocate(node, access))
    }

    fn create_key(
        &self,
        parent: RawKey,
        subkey: &str,
        access: u32,
        volatile: bool,
    ) -> Result<RawKey, Status> {
        let mut store = self.store.borrow_mut();
        let handle = store.resolve(parent)?;

        let mut node = handle.node;
        for name in segments(subkey) {
            node = match store.child(node, name) {
                Some(child) => child,
                None => {
                    if handle.access & KeyRights::CREATE_SUB_KEY.bits() == 0 {
                        return Err(Status::ACCESS_DENIED);
                    }
                    if store.nodes[node].volatile && !volatile {
                        return Err(Status::CHILD_MUST_BE_VOLATILE);
                    }
                    store.insert_child(node, name, volatile)
                }
            };
        }

        Ok(store.allocate(node, access))
    }

    fn close_key(&self, key: RawKey) -> Result<(), Status> {
        if PredefinedKey::from_raw(key).is_some() {
            return Ok(());
        }

        self.store
            .borrow_mut()
            .handles
            .remove(&key.0)
            .map(|_| ())
            .ok_or(Status::INVALID_HANDLE)
    }

    fn query_info(&self, key: RawKey) -> Result<KeyInfo, Status> {
        let mut store = self.store.borrow_mut();
        let node = &store.nodes[store.resolve(key)?.node];

        let mut info = KeyInfo {
            sub_keys: node.children.len() as u32,
            values: node.values.len() as u32,
            ..KeyInfo::default()
        };
        for &child in &node.children {
            let len = utf16_len(&store.nodes[child].name) as u32;
            info.max_sub_key_len = info.max_sub_key_len.max(len);
        }
        for value in &node.values {
            info.max_value_name_len = info.max_value_name_len.max(utf16_len(&value.name) as u32);
            info.max_value_len = info.max_value_len.max(value.data.len() as u32);
        }

        if store.take_stale_report() {
            info.max_sub_key_len = 0;
            info.max_value_name_len = 0;
            info.max_value_len = 0;
        }
        Ok(info)
    }

    fn enum_key(&self, key: RawKey, index: u32, name: &mut [u16]) -> Result<usize, Status> {
        let store = self.store.borrow();
        let node = &store.nodes[store.resolve(key)?.node];
        let child = *node
            .children
            .get(index as usize)
            .ok_or(Status::NO_MORE_ITEMS)?;
        write_name(&store.nodes[child].name, name)
    }

    fn enum_value(&self, key: RawKey, index: u32, name: &mut [u16]) -> Result<usize, Status> {
        let store = self.store.borrow();
        let node = &store.nodes[store.resolve(key)?.node];
        let value = node
            .values
            .get(index as usize)
            .ok_or(Status::NO_MORE_ITEMS)?;
        write_name(&value.name, name)
    }

    fn query_value(
        &self,
        key: RawKey,
        name: &str,
        data: Option<&mut [u8]>,
    ) -> Result<(u32, usize), Status> {
        let mut store = self.store.borrow_mut();
        let node = store.resolve(key)?.node;
        let value = store.nodes[node]
            .values
            .iter()
            .find(|value| value.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or(Status::FILE_NOT_FOUND)?;

        match data {
            None if store.take_stale_report() => Ok((value.kind, 0)),
            None => Ok((value.kind, value.data.len())),
            Some(buffer) if buffer.len() < value.data.len() => Err(Status::MORE_DATA),
            Some(buffer) => {
                buffer[..value.data.len()].copy_from_slice(&value.data);
                Ok((value.kind, value.data.len()))
            }
        }
    }

    fn set_value(&self, key: RawKey, name: &str, kind: u32, data: &[u8]) -> Result<(), Status> {
        let mut store = self.store.borrow_mut();
        let handle = store.resolve(key)?;
        if handle.access & KeyRights::SET_VALUE.bits() == 0 {
            return Err(Status::ACCESS_DENIED);
        }

        let values = &mut store.nodes[handle.node].values;
        match values
            .iter()
            .position(|value| value.name.eq_ignore_ascii_case(name))
        {
            Some(index) => {
                values[index].kind = kind;
                values[index].data = data.to_vec();
            }
            None => values.push(StoredValue {
                name: name.to_string(),
                kind,
                data: data.to_vec(),
            }),
        }
        Ok(())
    }

    fn override_key(&self, predefined: RawKey, target: RawKey) -> Result<(), Status> {
        let mut store = self.store.borrow_mut();
        if store.reject_overrides {
            return Err(Status::ACCESS_DENIED);
        }

        let hive = PredefinedKey::from_raw(predefined).ok_or(Status::INVALID_HANDLE)?;
        if target.is_null() {
            store.overrides.remove(&hive);
            store.override_removals.push(hive);
        } else {
            let node = store.resolve(target)?.node;
            store.overrides.insert(hive, node);
        }
        Ok(())
    }

    fn delete_tree(&self, key: RawKey, subkey: &str) -> Result<(), Status> {
        let mut store = self.store.borrow_mut();
        let from = store.resolve(key)?.node;

        if segments(subkey).next().is_none() {
            let children = std::mem::take(&mut store.nodes[from].children);
            for child in children {
                store.delete_subtree(child);
            }
            store.nodes[from].values.clear();
            return Ok(());
        }

        let node = store.walk(from, subkey).ok_or(Status::FILE_NOT_FOUND)?;
        if let Some(parent) = store.nodes[node].parent {
            store.nodes[parent].children.retain(|&child| child != node);
        }
        store.delete_subtree(node);
        Ok(())
    }

    fn query_key_path(&self, key: RawKey, path: Option<&mut [u16]>) -> Result<usize, Status> {
        let store = self.store.borrow();
        let native = store.path_of(store.resolve(key)?.node);
        let units: Vec<u16> = native.encode_utf16().collect();

        match path {
            None => Ok(units.len()),
            Some(buffer) if buffer.len() < units.len() => Err(Status::BUFFER_TOO_SMALL),
            Some(buffer) => {
                buffer[..units.len()].copy_from_slice(&units);
                Ok(units.len())
            }
        }
    }

    fn current_user_sid(&self) -> String {
        self.store.borrow().user_sid.clone()
    }
}
