//! Deferred Ctrl+C handling.
//!
//! A capture must remove its redirections and its shadow key before the process ends, so
//! the handler only records the request. The remaining libraries are skipped and the
//! process exits once the capture has torn down.

use std::sync::atomic::{AtomicBool, Ordering};

/// Exit code of a cancelled run.
pub const EXIT_CODE: u8 = 130;

static REQUESTED: AtomicBool = AtomicBool::new(false);

/// Records a cancellation request.
pub fn request() {
    REQUESTED.store(true, Ordering::SeqCst);
}

/// Whether a cancellation was requested.
pub fn requested() -> bool {
    REQUESTED.load(Ordering::SeqCst)
}

/// Fails once a cancellation was requested.
pub fn check() -> anyhow::Result<()> {
    if requested() {
        anyhow::bail!("Cancelled.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_observed() {
        request();
        assert!(requested());
        assert_eq!(check().unwrap_err().to_string(), "Cancelled.");
    }
}
