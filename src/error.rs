// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 BdeVault Contributors
//! Error types for the BdeVault library.
//!
//! A single crate-level error enum covers all failure modes; submodules with
//! a richer local vocabulary define their own error enums and convert into
//! [`BdeError`] via `#[from]`.

use thiserror::Error;

/// Main error type for all volume operations.
#[derive(Error, Debug)]
pub enum BdeError {
    /// I/O error from the underlying byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk metadata failed validation.
    #[error("corrupt metadata at offset {offset:#x}: {reason}")]
    MetadataCorrupt {
        /// Byte offset of the structure that failed validation.
        offset: u64,
        /// Human-readable description of the failure.
        reason: String,
    },

    /// The metadata declares a format version this library does not read.
    #[error("unsupported metadata version: {0}")]
    UnsupportedVersion(u16),

    /// The volume uses an encryption method this library does not decrypt.
    #[error("unsupported encryption method: {0:#06x}")]
    UnsupportedEncryptionMethod(u32),

    /// A supplied credential is malformed (wrong shape, not wrong value).
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// Every matching key protector was tried and none unwrapped.
    #[error("unlock failed: no matching key protector could be unwrapped")]
    UnlockFailed,

    /// A read was attempted before the volume was unlocked.
    #[error("volume is not unlocked")]
    NotUnlocked,

    /// A read or seek fell outside the volume.
    #[error("offset {offset} out of range for volume of {size} bytes")]
    OutOfRange {
        /// Requested offset.
        offset: u64,
        /// Volume size in bytes.
        size: u64,
    },

    /// The abort flag was raised during a long-running operation.
    #[error("operation aborted")]
    Aborted,
}

impl BdeError {
    /// Shorthand for [`BdeError::MetadataCorrupt`].
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        BdeError::MetadataCorrupt {
            offset,
            reason: reason.into(),
        }
    }
}

/// Type alias for Results using BdeError.
pub type Result<T> = std::result::Result<T, BdeError>;
