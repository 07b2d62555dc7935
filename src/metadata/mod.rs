// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 BdeVault Contributors
//! FVE (Full Volume Encryption) on-disk metadata.
//!
//! A BitLocker volume carries three redundant FVE metadata blocks. Each
//! block is a fixed header, a metadata header, and a dataset of tagged
//! variable-length entries describing the volume geometry and the key
//! protectors. This module parses and reconciles those structures; it never
//! writes them.

pub mod block;
pub mod entry;
pub mod header;
pub mod vmk;

pub use block::{MetadataBlock, MetadataBlockHeader, FVE_SIGNATURE, METADATA_BLOCK_SIZE};
pub use entry::{Entry, EntryType, EntryValue, StretchKeyValue, WrappedKey};
pub use header::MetadataHeader;
pub use vmk::{ExternalKeyValue, KeyProtectorInfo, ProtectionType, VmkValue};

use crate::error::BdeError;

/// The sector encryption algorithm of a volume.
///
/// The diffuser variants carry the Vista/Windows 7 Elephant diffuser around
/// AES-CBC; the XTS variants appeared with Windows 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMethod {
    Aes128CbcDiffuser,
    Aes256CbcDiffuser,
    Aes128Cbc,
    Aes256Cbc,
    Aes128Xts,
    Aes256Xts,
}

impl EncryptionMethod {
    /// Decodes the on-disk method code.
    pub fn from_code(code: u32) -> Result<Self, BdeError> {
        match code {
            0x8000 => Ok(Self::Aes128CbcDiffuser),
            0x8001 => Ok(Self::Aes256CbcDiffuser),
            0x8002 => Ok(Self::Aes128Cbc),
            0x8003 => Ok(Self::Aes256Cbc),
            0x8004 => Ok(Self::Aes128Xts),
            0x8005 => Ok(Self::Aes256Xts),
            other => Err(BdeError::UnsupportedEncryptionMethod(other)),
        }
    }

    /// The on-disk method code.
    pub fn code(self) -> u32 {
        match self {
            Self::Aes128CbcDiffuser => 0x8000,
            Self::Aes256CbcDiffuser => 0x8001,
            Self::Aes128Cbc => 0x8002,
            Self::Aes256Cbc => 0x8003,
            Self::Aes128Xts => 0x8004,
            Self::Aes256Xts => 0x8005,
        }
    }

    /// Expected length of the FVEK key-entry payload for this method.
    ///
    /// Diffuser methods append the tweak key to the FVEK; XTS keys carry
    /// both XTS halves.
    pub fn key_length(self) -> usize {
        match self {
            Self::Aes128Cbc => 16,
            Self::Aes256Cbc | Self::Aes128CbcDiffuser | Self::Aes128Xts => 32,
            Self::Aes256CbcDiffuser | Self::Aes256Xts => 64,
        }
    }

    pub fn uses_diffuser(self) -> bool {
        matches!(self, Self::Aes128CbcDiffuser | Self::Aes256CbcDiffuser)
    }

    pub fn is_xts(self) -> bool {
        matches!(self, Self::Aes128Xts | Self::Aes256Xts)
    }
}

impl std::fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Aes128CbcDiffuser => "AES-128-CBC with diffuser",
            Self::Aes256CbcDiffuser => "AES-256-CBC with diffuser",
            Self::Aes128Cbc => "AES-128-CBC",
            Self::Aes256Cbc => "AES-256-CBC",
            Self::Aes128Xts => "AES-128-XTS",
            Self::Aes256Xts => "AES-256-XTS",
        };
        f.write_str(name)
    }
}
