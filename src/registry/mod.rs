//! Registry access layer.
//!
//! This module provides direct key-handle operations against the registry, bypassing any
//! higher-level abstraction, because predefined-key redirection needs to work on the raw
//! predefined handles themselves.
//!
//! # Architecture
//!
//! The layer is split in two:
//!
//! - [`RegistryApi`] is the raw call surface: every primitive takes and returns raw handles
//!   and reports failure as a platform [`Status`]. [`NativeApi`] implements it on top of
//!   advapi32 on Windows, [`MemoryApi`] implements it in memory on every platform.
//! - [`Registry`] and [`RegistryKey`] sit on top and turn statuses into descriptive
//!   [`crate::Error`]s, track the logical name of every handle and close handles when their
//!   owner goes away.
//!
//! # Key Components
//!
//! - [`Registry`] - Backend plus the ledger of active overrides
//! - [`RegistryKey`] - Owned key handle; open, create, enumerate, read, close
//! - [`RegistryValue`] / [`ValueKind`] - Values and their platform types
//! - [`PredefinedKey`] - The predefined root handles
//! - [`KeyRights`] / [`KeyOptions`] - Access masks and registry view flags
//! - [`names::from_native_path`] - Translation of native key paths to hive names
//!
//! # Examples
//!
//! ```rust,no_run
//! use regcapture::registry::{MemoryApi, Registry};
//!
//! let registry = Registry::new(MemoryApi::new());
//! let key = registry.current_user().create_subkey(r"Software\Sample")?;
//! key.set_dword("Enabled", 1)?;
//!
//! for name in key.value_names()? {
//!     println!("{name}: {:?}", key.value(&name)?);
//! }
//! # Ok::<(), regcapture::Error>(())
//! ```

mod api;
mod key;
mod memory;
pub mod names;
#[cfg(windows)]
mod native;
mod root;
mod types;

pub use api::{KeyInfo, Operation, RawKey, RegistryApi, Status};
pub use key::RegistryKey;
pub use memory::MemoryApi;
#[cfg(windows)]
pub use native::NativeApi;
pub use root::Registry;
pub use types::{KeyOptions, KeyRights, PredefinedKey, RegistryValue, ValueKind};
