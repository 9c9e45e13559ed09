// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]
//#![deny(unsafe_code)]
// - 'registry/native.rs' calls into advapi32 and ntdll through raw pointers
// - 'registry/native.rs' reads the process token to find the current user's SID

//! # regcapture
//!
//! Captures the registry side-effects of a registration routine (COM `DllRegisterServer`,
//! managed-component registration, or any other code that writes to the well-known hives)
//! without permanently touching the real registry, and serializes what was written into a
//! `REGEDIT4` script that reproduces it later.
//!
//! ## How a capture works
//!
//! 1. A private *shadow root* is created below `HKEY_CURRENT_USER`, with one placeholder
//!    child per redirected hive.
//! 2. `HKEY_CLASSES_ROOT`, `HKEY_LOCAL_MACHINE` and `HKEY_CURRENT_USER` are redirected to
//!    those placeholders through predefined-key overrides.
//! 3. The registration callback runs. Everything it writes lands in the shadow tree.
//! 4. The overrides are removed (last installed, first removed), whatever the callback did.
//! 5. The shadow tree is walked in sorted order and emitted as a script.
//! 6. The shadow root is deleted, whatever happened before.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use regcapture::prelude::*;
//! use std::path::Path;
//!
//! let registry = Registry::new(MemoryApi::new());
//! let outcome = capture_and_emit(
//!     &registry,
//!     |registry: &Registry| {
//!         let clsid = registry
//!             .classes_root()
//!             .create_subkey(r"CLSID\{00000000-0000-0000-0000-000000000001}")?;
//!         clsid.set_string("", "Sample Component")
//!     },
//!     Path::new("sample.reg"),
//!     &CaptureOptions::default(),
//! )?;
//! println!("{outcome:?}");
//! # Ok::<(), regcapture::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`registry`] - Low-level key handles over a pluggable [`registry::RegistryApi`] backend,
//!   with the native Windows backend and an in-memory backend
//! - [`overrides`] - Scoped predefined-key redirection
//! - [`script`] - Shadow tree walker and `REGEDIT4` emitter
//! - [`capture`] - The capture-and-emit orchestration
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Concurrency
//!
//! Predefined-key overrides are global state for every reader of the redirected hive, so at
//! most one capture may run at a time. Callers serialize runs themselves; nothing here locks.
#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use regcapture::prelude::*;
///
/// let registry = Registry::new(MemoryApi::new());
/// let user = registry.current_user();
/// assert_eq!(user.name(), "HKEY_CURRENT_USER");
/// ```
pub mod prelude;

/// Registry access layer: handles, values, backends.
///
/// Wraps the primitive registry calls (open, create, enumerate, read, close) behind
/// [`registry::RegistryKey`], which tracks a logical name for every handle and releases it
/// deterministically. The calls themselves go through the [`registry::RegistryApi`] trait,
/// implemented by [`registry::NativeApi`] on Windows and [`registry::MemoryApi`] everywhere.
///
/// # Key Types
///
/// - [`registry::Registry`] - Backend plus bookkeeping of active overrides
/// - [`registry::RegistryKey`] - An owned key handle with its logical name
/// - [`registry::RegistryValue`] - A `(name, type, bytes)` triple
/// - [`registry::PredefinedKey`] - The well-known root handles
pub mod registry;

/// Scoped redirection of predefined root keys.
///
/// [`overrides::RegistryOverride`] redirects one predefined key to another key for as long
/// as it lives, and removes the redirection when disposed or dropped.
pub mod overrides;

/// Shadow tree walker and `REGEDIT4` script emitter.
pub mod script;

/// The capture-and-emit orchestration.
pub mod capture;

/// `regcapture` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `regcapture` Error type
///
/// The main error type for all operations in this crate. See [`Error`] for the variants.
pub use error::Error;

pub use capture::{capture_and_emit, CaptureOptions, CaptureOutcome, ShadowRoot};
pub use overrides::RegistryOverride;
#[cfg(windows)]
pub use registry::NativeApi;
pub use registry::{
    KeyOptions, KeyRights, MemoryApi, PredefinedKey, Registry, RegistryApi, RegistryKey,
    RegistryValue, ValueKind,
};
pub use script::{emit, Emitted, ScriptOptions, ValueTagStyle};
