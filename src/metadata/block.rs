//! FVE metadata blocks: parsing, validation, and three-copy reconciliation.

use tracing::warn;

use crate::error::{BdeError, Result};
use crate::io::{ByteReader, ByteSource};
use crate::metadata::entry::{parse_dataset, Entry, EntryType, EntryValue, WrappedKey};
use crate::metadata::header::{MetadataHeader, METADATA_HEADER_SIZE};
use crate::metadata::vmk::{KeyProtectorInfo, VmkValue};
use crate::metadata::EncryptionMethod;

/// Signature opening every FVE metadata block.
pub const FVE_SIGNATURE: [u8; 8] = *b"-FVE-FS-";

/// On-disk size reserved for one FVE metadata block.
pub const METADATA_BLOCK_SIZE: u64 = 0x10000;

/// Size of the fixed block header.
pub const BLOCK_HEADER_SIZE: usize = 64;

/// The fixed header of one FVE metadata block.
#[derive(Debug, Clone)]
pub struct MetadataBlockHeader {
    /// Format version: 1 for Vista, 2 for Windows 7 and later.
    pub version: u16,

    /// Size of the encrypted portion of the volume in bytes.
    pub encrypted_volume_size: u64,

    /// Sector encryption algorithm.
    pub encryption_method: EncryptionMethod,

    /// Number of volume header sectors relocated to
    /// [`volume_header_offset`](Self::volume_header_offset).
    pub volume_header_sectors: u32,

    /// Offsets of the three metadata copies; identical in every valid block.
    pub metadata_offsets: [u64; 3],

    /// Where the original first sectors of the volume are stored.
    pub volume_header_offset: u64,
}

impl MetadataBlockHeader {
    /// Parses the 64-byte block header located at `disk_offset`.
    pub fn parse(data: &[u8], disk_offset: u64) -> Result<Self> {
        let mut r = ByteReader::new(data, disk_offset);

        let signature = r.bytes(8)?;
        if signature != FVE_SIGNATURE {
            return Err(BdeError::corrupt(disk_offset, "bad FVE block signature"));
        }
        r.skip(2)?; // legacy size field
        let version = r.u16_le()?;
        if version != 1 && version != 2 {
            return Err(BdeError::UnsupportedVersion(version));
        }
        r.skip(4)?;
        let encrypted_volume_size = r.u64_le()?;
        let method_code = r.u32_le()?;
        let encryption_method = EncryptionMethod::from_code(method_code)?;
        let volume_header_sectors = r.u32_le()?;
        let metadata_offsets = [r.u64_le()?, r.u64_le()?, r.u64_le()?];
        let volume_header_offset = r.u64_le()?;

        Ok(Self {
            version,
            encrypted_volume_size,
            encryption_method,
            volume_header_sectors,
            metadata_offsets,
            volume_header_offset,
        })
    }
}

/// One fully parsed FVE metadata block.
#[derive(Debug, Clone)]
pub struct MetadataBlock {
    /// Where this copy lives on disk.
    pub disk_offset: u64,

    /// The fixed block header.
    pub header: MetadataBlockHeader,

    /// The metadata header in front of the dataset.
    pub metadata: MetadataHeader,

    /// The parsed dataset.
    pub entries: Vec<Entry>,
}

impl MetadataBlock {
    /// Parses a complete block from its raw bytes.
    pub fn parse(data: &[u8], disk_offset: u64) -> Result<Self> {
        let header = MetadataBlockHeader::parse(data, disk_offset)?;

        let meta_start = BLOCK_HEADER_SIZE;
        let metadata = MetadataHeader::parse(
            data.get(meta_start..)
                .ok_or_else(|| BdeError::corrupt(disk_offset, "block too small for header"))?,
            disk_offset + meta_start as u64,
        )?;

        let dataset_start = meta_start + METADATA_HEADER_SIZE;
        let dataset_end = meta_start + metadata.metadata_size as usize;
        let dataset = data.get(dataset_start..dataset_end).ok_or_else(|| {
            BdeError::corrupt(
                disk_offset + dataset_start as u64,
                format!(
                    "dataset of {} bytes overruns block of {} bytes",
                    metadata.dataset_size(),
                    data.len()
                ),
            )
        })?;
        let entries = parse_dataset(dataset, disk_offset + dataset_start as u64)?;

        Ok(Self {
            disk_offset,
            header,
            metadata,
            entries,
        })
    }

    /// Reads one metadata block from `source` at `offset`.
    pub fn read<S: ByteSource + ?Sized>(source: &mut S, offset: u64) -> Result<Self> {
        let mut raw = vec![0u8; METADATA_BLOCK_SIZE as usize];
        source.read_exact_at(offset, &mut raw)?;
        Self::parse(&raw, offset)
    }

    /// The wrapped full volume encryption key.
    pub fn fvek(&self) -> Option<&WrappedKey> {
        self.entries
            .iter()
            .filter(|e| e.entry_type == EntryType::FullVolumeEncryptionKey)
            .find_map(|e| e.as_wrapped_key())
    }

    /// Every VMK protector entry, in dataset order.
    pub fn vmks(&self) -> impl Iterator<Item = &VmkValue> {
        self.entries.iter().filter_map(|e| match &e.value {
            EntryValue::VolumeMasterKey(vmk) if e.entry_type == EntryType::VolumeMasterKey => {
                Some(vmk)
            }
            _ => None,
        })
    }

    /// Caller-facing protector descriptions, in dataset order.
    pub fn key_protectors(&self) -> Vec<KeyProtectorInfo> {
        self.vmks()
            .map(|vmk| KeyProtectorInfo {
                identifier: vmk.identifier,
                protection_type: vmk.protection_type,
            })
            .collect()
    }

    /// The description / drive label string, when present.
    pub fn description(&self) -> Option<&str> {
        self.entries
            .iter()
            .filter(|e| e.entry_type == EntryType::Description)
            .find_map(|e| match &e.value {
                EntryValue::UnicodeString(s) => Some(s.as_str()),
                _ => None,
            })
    }

    /// The volume-header relocation range recorded in the dataset (Vista).
    pub fn volume_header_block(&self) -> Option<(u64, u64)> {
        self.entries
            .iter()
            .filter(|e| e.entry_type == EntryType::VolumeHeaderBlock)
            .find_map(|e| match e.value {
                EntryValue::VolumeHeaderBlock { offset, size } => Some((offset, size)),
                _ => None,
            })
    }
}

/// Reads the three candidate blocks at the discovered offsets.
///
/// A copy that fails validation (bad signature, offsets disagreeing with the
/// discovered set, truncated structures) is logged and dropped; read-only
/// access needs only one survivor. Errors that condemn the whole volume
/// (unsupported version or encryption method) propagate immediately.
pub fn read_candidate_blocks<S: ByteSource + ?Sized>(
    source: &mut S,
    discovered_offsets: [u64; 3],
) -> Result<Vec<MetadataBlock>> {
    let mut blocks = Vec::new();
    for &offset in &discovered_offsets {
        match MetadataBlock::read(source, offset) {
            Ok(block) => {
                if block.header.metadata_offsets != discovered_offsets {
                    warn!(
                        offset,
                        "metadata block offsets disagree with discovered offsets, dropping copy"
                    );
                    continue;
                }
                blocks.push(block);
            }
            Err(err @ BdeError::UnsupportedVersion(_))
            | Err(err @ BdeError::UnsupportedEncryptionMethod(_)) => return Err(err),
            Err(err) => {
                warn!(offset, error = %err, "metadata block unreadable, trying next copy");
            }
        }
    }
    Ok(blocks)
}

/// Picks the authoritative block among the surviving copies.
///
/// Prefers the highest nonce counter (the most recently written copy); ties
/// go to the copy at the lowest disk offset.
pub fn select_block(blocks: Vec<MetadataBlock>) -> Result<MetadataBlock> {
    blocks
        .into_iter()
        .max_by_key(|b| (b.metadata.next_nonce_counter, std::cmp::Reverse(b.disk_offset)))
        .ok_or_else(|| BdeError::corrupt(0, "no valid FVE metadata block found"))
}
