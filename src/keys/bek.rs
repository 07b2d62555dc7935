//! Startup-key (`.BEK`) file parsing.
//!
//! A `.BEK` file is a small FVE-style container: the 48-byte metadata
//! header followed by a dataset holding a single external-key entry (a GUID
//! plus the raw key). The GUID selects which startup-key protector the key
//! unwraps.

use std::path::Path;

use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{BdeError, Result};
use crate::metadata::entry::{parse_dataset, EntryValue};
use crate::metadata::header::{MetadataHeader, METADATA_HEADER_SIZE};

/// A parsed startup-key file.
#[derive(Debug, Clone)]
pub struct StartupKeyFile {
    /// GUID matched against VMK protector identifiers.
    pub identifier: Uuid,

    /// The external key material.
    pub key: Zeroizing<Vec<u8>>,

    /// Creation time of the key file as a FILETIME.
    pub creation_time: u64,
}

impl StartupKeyFile {
    /// Parses a `.BEK` file from its raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = MetadataHeader::parse(data, 0)?;
        let dataset_end = header.metadata_size as usize;
        let dataset = data
            .get(METADATA_HEADER_SIZE..dataset_end)
            .ok_or_else(|| BdeError::corrupt(0, "startup key file shorter than declared"))?;

        let entries = parse_dataset(dataset, METADATA_HEADER_SIZE as u64)?;
        let external = entries
            .iter()
            .find_map(|e| match &e.value {
                EntryValue::ExternalKey(external) => Some(external),
                _ => None,
            })
            .ok_or_else(|| {
                BdeError::InvalidCredential("startup key file has no external key entry".into())
            })?;
        let key = external.key().ok_or_else(|| {
            BdeError::InvalidCredential("startup key entry carries no key material".into())
        })?;

        Ok(Self {
            identifier: external.identifier,
            key: Zeroizing::new(key.to_vec()),
            creation_time: external.last_modified,
        })
    }

    /// Reads and parses a `.BEK` file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::parse(&data)
    }
}
