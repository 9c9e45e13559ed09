//! # regcapture Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the regcapture library. Import this module to get quick access to everything a
//! capture run needs.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all regcapture operations
pub use crate::Error;

/// The result type used throughout regcapture
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Capture a registration routine into a script
pub use crate::capture::{capture_and_emit, CaptureOptions, CaptureOutcome};

/// Emit a script from an arbitrary key subtree
pub use crate::script::{emit, Emitted, ScriptOptions, ValueTagStyle};

// ================================================================================================
// Registry Access
// ================================================================================================

/// Registry facade and key handles
pub use crate::registry::{Registry, RegistryKey, RegistryValue};

/// Backend trait and the in-memory backend
pub use crate::registry::{MemoryApi, RegistryApi};

/// Native Windows backend
#[cfg(windows)]
pub use crate::registry::NativeApi;

/// Predefined roots, access rights and value kinds
pub use crate::registry::{KeyOptions, KeyRights, PredefinedKey, ValueKind};

/// Scoped predefined-key redirection
pub use crate::overrides::RegistryOverride;
