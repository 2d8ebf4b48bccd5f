//! Construction-time error type
//!
//! Steady-state allocation failure is signalled by an empty [`Block`] or a
//! `false` return, never by an error value. `AllocError` covers the cases
//! where an allocator cannot even be built or configured: invalid geometry,
//! a backing allocator that fails during construction, or a set-once bound
//! being set twice.
//!
//! [`Block`]: crate::Block

use thiserror::Error;

/// Errors reported by allocator constructors and configuration calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The backing allocator could not provide memory during construction.
    #[error("backing allocator could not provide {requested} bytes")]
    OutOfMemory {
        /// Number of bytes requested from the backing allocator.
        requested: usize,
    },

    /// Construction parameters are inconsistent.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with the parameters.
        reason: &'static str,
    },

    /// A set-once bound was assigned a second time.
    #[error("bound is already set and cannot be changed")]
    BoundAlreadySet,

    /// A size computation overflowed `usize`.
    #[error("arithmetic overflow while computing an allocation size")]
    SizeOverflow,
}

impl AllocError {
    /// Shorthand for an out-of-memory construction failure.
    #[inline]
    pub fn out_of_memory(requested: usize) -> Self {
        AllocError::OutOfMemory { requested }
    }

    /// Shorthand for an invalid-configuration failure.
    #[inline]
    pub fn invalid_config(reason: &'static str) -> Self {
        AllocError::InvalidConfig { reason }
    }
}

/// Result alias used by constructors and configuration calls.
pub type AllocResult<T> = Result<T, AllocError>;
