//! The FVE metadata header inside each metadata block.

use uuid::Uuid;

use crate::error::{BdeError, Result};
use crate::io::ByteReader;

/// Size of the metadata header on disk.
pub const METADATA_HEADER_SIZE: usize = 48;

/// Header of the entry dataset: sizes, format version, volume identity.
#[derive(Debug, Clone)]
pub struct MetadataHeader {
    /// Total metadata size: this header plus the dataset.
    pub metadata_size: u32,

    /// Format version: 1 for Vista, 2 for Windows 7 and later.
    pub version: u16,

    /// Volume identifier GUID.
    pub volume_identifier: Uuid,

    /// Counter from which the next AES-CCM nonce would be drawn; also the
    /// tie-breaker when the three metadata copies disagree.
    pub next_nonce_counter: u32,

    /// Volume creation time as a FILETIME.
    pub creation_time: u64,
}

impl MetadataHeader {
    /// Parses the 48-byte header located at `disk_offset`.
    pub fn parse(data: &[u8], disk_offset: u64) -> Result<Self> {
        let mut r = ByteReader::new(data, disk_offset);

        let metadata_size = r.u32_le()?;
        let version = r.u32_le()?;
        let header_size = r.u32_le()?;
        let metadata_size_copy = r.u32_le()?;
        let volume_identifier = r.guid()?;
        let next_nonce_counter = r.u32_le()?;
        r.skip(4)?;
        let creation_time = r.filetime()?;

        if header_size as usize != METADATA_HEADER_SIZE {
            return Err(BdeError::corrupt(
                disk_offset,
                format!("metadata header size {header_size}, expected {METADATA_HEADER_SIZE}"),
            ));
        }
        if metadata_size != metadata_size_copy {
            return Err(BdeError::corrupt(
                disk_offset,
                format!("metadata size {metadata_size} does not match copy {metadata_size_copy}"),
            ));
        }
        if (metadata_size as usize) < METADATA_HEADER_SIZE {
            return Err(BdeError::corrupt(
                disk_offset,
                format!("metadata size {metadata_size} smaller than its header"),
            ));
        }
        let version = version as u16;
        if version != 1 && version != 2 {
            return Err(BdeError::UnsupportedVersion(version));
        }

        Ok(Self {
            metadata_size,
            version,
            volume_identifier,
            next_nonce_counter,
            creation_time,
        })
    }

    /// Size of the entry dataset that follows this header.
    pub fn dataset_size(&self) -> usize {
        self.metadata_size as usize - METADATA_HEADER_SIZE
    }
}
