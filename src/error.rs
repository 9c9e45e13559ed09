use thiserror::Error;

use crate::registry::{Operation, PredefinedKey, Status};

macro_rules! platform_error {
    // Operation and status against a key name
    ($operation:expr, $key:expr, $status:expr) => {
        crate::Error::Platform {
            operation: $operation,
            key: $key.to_string(),
            status: $status,
        }
    };

    // Key name built from a format string
    ($operation:expr, $status:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::Platform {
            operation: $operation,
            key: format!($fmt, $($arg)*),
            status: $status,
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants follow the failure taxonomy of a capture run: a registry call rejected by the
/// platform, captured data the script format cannot represent, a failing registration callback,
/// and file system errors while writing the script.
///
/// # Error Categories
///
/// ## Registry Errors
/// - [`Error::Platform`] - A registry call returned a non-success status
/// - [`Error::InvalidName`] - A key or value name cannot be passed to the platform
/// - [`Error::OverrideActive`] - A second override was requested for the same predefined key
///
/// ## Script Errors
/// - [`Error::UnsupportedValueKind`] - A captured value has a type the script cannot express
/// - [`Error::MalformedValue`] - A captured value's bytes do not match its declared type
///
/// ## Run Errors
/// - [`Error::Registration`] - The registration callback failed
/// - [`Error::FileError`] - Writing the script failed
///
/// # Examples
///
/// ```rust,no_run
/// use regcapture::{capture_and_emit, CaptureOptions, Error, MemoryApi, Registry};
/// use std::path::Path;
///
/// let registry = Registry::new(MemoryApi::new());
/// let result = capture_and_emit(
///     &registry,
///     |_| Ok::<(), Error>(()),
///     Path::new("out.reg"),
///     &CaptureOptions::default(),
/// );
///
/// match result {
///     Ok(outcome) => println!("{outcome:?}"),
///     Err(Error::Platform { operation, key, status }) => {
///         eprintln!("{operation} failed on '{key}': {status}");
///     }
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A registry call was rejected by the platform.
    ///
    /// Carries the operation that failed, the logical name of the key it was issued
    /// against and the raw platform status code.
    ///
    /// # Fields
    ///
    /// * `operation` - The registry primitive that failed
    /// * `key` - Logical name of the key (or key and subkey) involved
    /// * `status` - The platform status code
    #[error("{operation} failed for '{key}': {status}")]
    Platform {
        /// The registry primitive that failed
        operation: crate::registry::Operation,
        /// Logical name of the key involved
        key: String,
        /// The platform status code
        status: crate::registry::Status,
    },

    /// A captured value has a type outside of string, DWORD, multi-string and binary.
    ///
    /// Emission never skips such values, since the script would then no longer reproduce
    /// the captured state.
    #[error("Registry value kind is not supported! Key: '{key}', Value: '{value}', Kind: {kind}")]
    UnsupportedValueKind {
        /// Hive-rooted path of the key holding the value
        key: String,
        /// Name of the value, empty for the default value
        value: String,
        /// Name of the offending type, or its numeric code when unknown
        kind: String,
    },

    /// A captured value's bytes are inconsistent with its declared type.
    #[error("Malformed value - Key: '{key}', Value: '{value}': {message}")]
    MalformedValue {
        /// Hive-rooted path of the key holding the value
        key: String,
        /// Name of the value, empty for the default value
        value: String,
        /// What was wrong with the data
        message: String,
    },

    /// A key or value name contains an interior NUL and cannot be handed to the platform.
    #[error("Invalid registry name - '{0}'")]
    InvalidName(String),

    /// An override for this predefined key is already installed.
    ///
    /// Stacking two redirections on the same predefined key leaves the platform in an
    /// ill-defined state, so the second install is refused.
    #[error("An override for {0} is already active")]
    OverrideActive(PredefinedKey),

    /// The registration callback failed.
    ///
    /// The callback's own error is kept as the source and surfaces only after the overrides
    /// and the shadow root have been torn down.
    #[error("An error occurred during registration: {0}")]
    Registration(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that occur while writing the script.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}

impl Error {
    /// Returns the platform status if this error is a rejected registry call.
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::Platform { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the failed operation if this error is a rejected registry call.
    #[must_use]
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Error::Platform { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}
