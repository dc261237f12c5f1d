//! Unified error type for the lomvi library.
//!
//! This module provides a structured error type that captures all failure
//! modes in the library with appropriate context. Library code uses
//! `LomviError` while tests and glue code may use `anyhow::Result` for
//! convenience.
//!
//! # Error Categories
//!
//! - **Io**: File system operations (open, read)
//! - **Validation**: Invalid parameters at construction (k-mer size, zero capacities)
//! - **CapacityExhausted**: An outbound buffer refused bytes while its tag was closed
//! - **TagClosed**: Send attempted on a tag that has already been flushed
//! - **TagRegistered**: Callback registration on a tag that already has one
//! - **TransportFatal**: Unrecoverable transport failure; poisons the comm layer

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Unified error type for the lomvi library.
#[derive(Debug)]
pub enum LomviError {
    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: std::io::Error,
    },

    /// Validation error (invalid parameters, data invariants).
    Validation(String),

    /// Outbound capacity exhausted: bytes could not be buffered for the
    /// named tag because the tag is closed for further sends.
    CapacityExhausted { tag: usize, dst: usize },

    /// Send attempted on a tag that has been flushed already.
    TagClosed { tag: usize },

    /// Callback registration for a tag that is already registered.
    TagRegistered { tag: usize },

    /// Transport-level failure. Terminal: the communication layer drains
    /// its queues and refuses further work.
    TransportFatal { context: String },
}

impl fmt::Display for LomviError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LomviError::Io {
                path,
                operation,
                source,
            } => {
                write!(
                    f,
                    "I/O error during {} on '{}': {}",
                    operation,
                    path.display(),
                    source
                )
            }
            LomviError::Validation(msg) => write!(f, "Validation error: {}", msg),
            LomviError::CapacityExhausted { tag, dst } => {
                write!(
                    f,
                    "Outbound capacity exhausted for tag {} to rank {} (tag closed)",
                    tag, dst
                )
            }
            LomviError::TagClosed { tag } => {
                write!(f, "Tag {} is closed for further sends", tag)
            }
            LomviError::TagRegistered { tag } => {
                write!(f, "Tag {} already has a receive callback", tag)
            }
            LomviError::TransportFatal { context } => {
                write!(f, "Fatal transport error: {}", context)
            }
        }
    }
}

impl std::error::Error for LomviError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LomviError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LomviError {
    fn from(err: std::io::Error) -> Self {
        LomviError::Io {
            path: PathBuf::new(),
            operation: "unknown",
            source: err,
        }
    }
}

/// Convenience type alias for Results using LomviError.
pub type Result<T> = std::result::Result<T, LomviError>;

// ============================================================================
// Helper constructors
// ============================================================================

impl LomviError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, operation: &'static str, source: std::io::Error) -> Self {
        LomviError::Io {
            path: path.into(),
            operation,
            source,
        }
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        LomviError::Validation(msg.into())
    }

    /// Create a fatal transport error.
    pub fn transport(context: impl Into<String>) -> Self {
        LomviError::TransportFatal {
            context: context.into(),
        }
    }
}

// ============================================================================
// Thread-safe error capture
// ============================================================================

/// Thread-safe error capture that stores only the first error.
///
/// The communication worker cannot unwind into caller code; when it hits a
/// fatal transport error it stores it here, drains its queues, and exits.
/// Callers observe the poisoned state through `has_error` on their next
/// operation.
pub struct FirstErrorCapture {
    has_error: AtomicBool,
    error: Mutex<Option<LomviError>>,
}

impl FirstErrorCapture {
    /// Create a new, empty error capture.
    pub fn new() -> Self {
        Self {
            has_error: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }

    /// Store an error, but only if no error has been stored yet.
    /// Returns true if this error was stored, false if an error already existed.
    pub fn store(&self, err: LomviError) -> bool {
        if self
            .has_error
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Ok(mut guard) = self.error.lock() {
                *guard = Some(err);
            }
            true
        } else {
            false
        }
    }

    /// Retrieve the stored error, if any.
    pub fn get(&self) -> Option<LomviError> {
        if self.has_error.load(Ordering::SeqCst) {
            self.error.lock().ok().and_then(|mut g| g.take())
        } else {
            None
        }
    }

    /// Check if an error has been stored.
    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }
}

impl Default for FirstErrorCapture {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = LomviError::io(
            "/data/reads.fastq",
            "read",
            std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/data/reads.fastq"));
        assert!(msg.contains("read"));
        assert!(msg.contains("file not found"));
    }

    #[test]
    fn test_validation_error_display() {
        let err = LomviError::validation("k must fit the packed word");
        assert!(err.to_string().contains("k must fit the packed word"));
    }

    #[test]
    fn test_tag_errors_display() {
        assert!(LomviError::TagClosed { tag: 3 }
            .to_string()
            .contains("Tag 3"));
        assert!(LomviError::TagRegistered { tag: 7 }
            .to_string()
            .contains("Tag 7"));
        let msg = LomviError::CapacityExhausted { tag: 1, dst: 2 }.to_string();
        assert!(msg.contains("tag 1"));
        assert!(msg.contains("rank 2"));
    }

    #[test]
    fn test_error_source_chain() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err = LomviError::io("/path", "open", io_err);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_first_error_capture_stores_first() {
        let capture = FirstErrorCapture::new();

        assert!(capture.store(LomviError::validation("first error")));
        assert!(!capture.store(LomviError::validation("second error")));

        let err = capture.get().expect("Should have error");
        assert!(err.to_string().contains("first error"));
    }

    #[test]
    fn test_first_error_capture_empty() {
        let capture = FirstErrorCapture::new();
        assert!(capture.get().is_none());
        assert!(!capture.has_error());
    }
}
