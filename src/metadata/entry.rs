//! Tagged metadata entries and the dataset walk.
//!
//! Every entry starts with the same 8-byte header `{size, type, value_type,
//! version}` followed by `size - 8` payload bytes. Entries nest: a volume
//! master key entry carries its own dataset of sub-entries in the same
//! format. Unknown entry and value types are kept with their raw payload and
//! skipped by consumers, so newer volumes still parse.

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::{BdeError, Result};
use crate::io::ByteReader;
use crate::metadata::vmk::{ExternalKeyValue, VmkValue};

/// Size of the fixed entry header.
pub const ENTRY_HEADER_SIZE: usize = 8;

/// What an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// A free-standing property of the volume.
    Property,
    /// A wrapped copy of the volume master key.
    VolumeMasterKey,
    /// The wrapped full volume encryption key.
    FullVolumeEncryptionKey,
    /// Data used by Windows to validate the metadata.
    Validation,
    /// A startup-key descriptor.
    StartupKey,
    /// Volume description / drive label string.
    Description,
    /// Relocation record for the shadowed volume header.
    VolumeHeaderBlock,
    /// Anything this library does not interpret, kept for diagnostics.
    Unknown(u16),
}

impl EntryType {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => Self::Property,
            0x0002 => Self::VolumeMasterKey,
            0x0003 => Self::FullVolumeEncryptionKey,
            0x0004 => Self::Validation,
            0x0006 => Self::StartupKey,
            0x0007 => Self::Description,
            0x000f => Self::VolumeHeaderBlock,
            other => Self::Unknown(other),
        }
    }
}

/// An AES-CCM wrapped key as stored on disk.
#[derive(Debug, Clone)]
pub struct WrappedKey {
    /// 12-byte nonce (FILETIME plus counter, treated as opaque).
    pub nonce: [u8; 12],
    /// 16-byte authentication tag.
    pub mac: [u8; 16],
    /// Wrapped key material.
    pub ciphertext: Vec<u8>,
}

impl WrappedKey {
    fn parse(r: &mut ByteReader<'_>) -> Result<Self> {
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(r.bytes(12)?);
        let mut mac = [0u8; 16];
        mac.copy_from_slice(r.bytes(16)?);
        let ciphertext = r.bytes(r.remaining())?.to_vec();
        Ok(Self {
            nonce,
            mac,
            ciphertext,
        })
    }
}

/// A stretch-key record: the salt plus the wrapped intermediate key.
#[derive(Debug, Clone)]
pub struct StretchKeyValue {
    /// Salt fed into the stretch KDF.
    pub salt: [u8; 16],
    /// Nested entries; the wrapped intermediate key lives here.
    pub entries: Vec<Entry>,
}

impl StretchKeyValue {
    fn parse(r: &mut ByteReader<'_>) -> Result<Self> {
        let mut salt = [0u8; 16];
        salt.copy_from_slice(r.bytes(16)?);
        let rest = r.bytes(r.remaining())?;
        let entries = parse_dataset(rest, r.disk_offset() - rest.len() as u64)?;
        Ok(Self { salt, entries })
    }

    /// The wrapped key unwrapped by the stretched credential.
    pub fn wrapped_key(&self) -> Option<&WrappedKey> {
        self.entries.iter().find_map(|e| e.as_wrapped_key())
    }
}

/// Payload of an entry, discriminated by its on-disk value type.
#[derive(Debug, Clone)]
pub enum EntryValue {
    /// 0x0000: an erased entry; payload is meaningless.
    Erased,
    /// 0x0001: raw key bytes.
    Key(Zeroizing<Vec<u8>>),
    /// 0x0002: UTF-16LE string.
    UnicodeString(String),
    /// 0x0003: stretch key (salt + wrapped intermediate key).
    StretchKey(StretchKeyValue),
    /// 0x0004: indirection wrapping further entries.
    UseKey(Vec<Entry>),
    /// 0x0005: AES-CCM wrapped key.
    AesCcmEncryptedKey(WrappedKey),
    /// 0x0006: TPM-sealed key blob; parsed, never unwrapped.
    TpmEncodedKey(Vec<u8>),
    /// 0x0007: metadata validation information.
    ValidationInfo(Vec<u8>),
    /// 0x0008: a volume master key protector.
    VolumeMasterKey(VmkValue),
    /// 0x0009: an external (startup) key.
    ExternalKey(ExternalKeyValue),
    /// 0x000a: update record.
    Update(Vec<u8>),
    /// 0x000f: relocation range of the shadowed volume header.
    VolumeHeaderBlock {
        /// On-disk offset of the relocated data.
        offset: u64,
        /// Size of the relocated range in bytes.
        size: u64,
    },
    /// Any value type this library does not interpret.
    Unknown {
        value_type: u16,
        data: Vec<u8>,
    },
}

/// One parsed metadata entry.
#[derive(Debug, Clone)]
pub struct Entry {
    pub entry_type: EntryType,
    pub value: EntryValue,
    /// Entry format version, 1 in all observed volumes.
    pub version: u16,
}

impl Entry {
    /// The wrapped key carried by this entry, if its value is one.
    pub fn as_wrapped_key(&self) -> Option<&WrappedKey> {
        match &self.value {
            EntryValue::AesCcmEncryptedKey(wrapped) => Some(wrapped),
            _ => None,
        }
    }

    /// The raw key bytes carried by this entry, if its value is a key.
    pub fn as_key(&self) -> Option<&[u8]> {
        match &self.value {
            EntryValue::Key(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Walks a dataset of entries located at `disk_offset`.
///
/// The walk ends when the dataset is consumed or a zero-size entry is hit
/// (an erased tail); entries shorter than their own header are corrupt.
/// Entries with unknown types are kept as [`EntryValue::Unknown`] and logged.
pub fn parse_dataset(data: &[u8], disk_offset: u64) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while data.len() - pos >= ENTRY_HEADER_SIZE {
        let entry_offset = disk_offset + pos as u64;
        let mut r = ByteReader::new(&data[pos..], entry_offset);

        let size = r.u16_le()? as usize;
        if size == 0 {
            debug!(offset = entry_offset, "zero-size entry terminates dataset");
            break;
        }
        if size < ENTRY_HEADER_SIZE {
            return Err(BdeError::corrupt(
                entry_offset,
                format!("entry size {size} smaller than its header"),
            ));
        }
        if pos + size > data.len() {
            return Err(BdeError::corrupt(
                entry_offset,
                format!(
                    "entry of {size} bytes overruns dataset ({} bytes remain)",
                    data.len() - pos
                ),
            ));
        }

        let type_code = r.u16_le()?;
        let value_type = r.u16_le()?;
        let version = r.u16_le()?;
        let payload = &data[pos + ENTRY_HEADER_SIZE..pos + size];
        let payload_offset = entry_offset + ENTRY_HEADER_SIZE as u64;

        let entry_type = EntryType::from_code(type_code);
        if let EntryType::Unknown(code) = entry_type {
            debug!(
                offset = entry_offset,
                entry_type = format_args!("{code:#06x}"),
                "unknown entry type, keeping raw payload"
            );
        }

        let value = parse_value(value_type, payload, payload_offset)?;
        entries.push(Entry {
            entry_type,
            value,
            version,
        });
        pos += size;
    }

    if pos < data.len() && data.len() - pos < ENTRY_HEADER_SIZE {
        let tail = &data[pos..];
        if tail.iter().any(|&b| b != 0) {
            warn!(
                offset = disk_offset + pos as u64,
                bytes = tail.len(),
                "non-zero trailing bytes after last entry"
            );
        }
    }

    Ok(entries)
}

fn parse_value(value_type: u16, payload: &[u8], disk_offset: u64) -> Result<EntryValue> {
    let mut r = ByteReader::new(payload, disk_offset);
    let value = match value_type {
        0x0000 => EntryValue::Erased,
        0x0001 => EntryValue::Key(Zeroizing::new(payload.to_vec())),
        0x0002 => EntryValue::UnicodeString(decode_utf16le(payload, disk_offset)?),
        0x0003 => EntryValue::StretchKey(StretchKeyValue::parse(&mut r)?),
        0x0004 => EntryValue::UseKey(parse_dataset(payload, disk_offset)?),
        0x0005 => EntryValue::AesCcmEncryptedKey(WrappedKey::parse(&mut r)?),
        0x0006 => EntryValue::TpmEncodedKey(payload.to_vec()),
        0x0007 => EntryValue::ValidationInfo(payload.to_vec()),
        0x0008 => EntryValue::VolumeMasterKey(VmkValue::parse(payload, disk_offset)?),
        0x0009 => EntryValue::ExternalKey(ExternalKeyValue::parse(payload, disk_offset)?),
        0x000a => EntryValue::Update(payload.to_vec()),
        0x000f => {
            let offset = r.u64_le()?;
            let size = r.u64_le()?;
            EntryValue::VolumeHeaderBlock { offset, size }
        }
        other => {
            debug!(
                offset = disk_offset,
                value_type = format_args!("{other:#06x}"),
                "unknown value type, keeping raw payload"
            );
            EntryValue::Unknown {
                value_type: other,
                data: payload.to_vec(),
            }
        }
    };
    Ok(value)
}

fn decode_utf16le(payload: &[u8], disk_offset: u64) -> Result<String> {
    if payload.len() % 2 != 0 {
        return Err(BdeError::corrupt(
            disk_offset,
            format!("UTF-16 string of odd length {}", payload.len()),
        ));
    }
    let units: Vec<u16> = payload
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn build_entry(type_code: u16, value_type: u16, payload: &[u8]) -> Vec<u8> {
        let size = (ENTRY_HEADER_SIZE + payload.len()) as u16;
        let mut raw = Vec::with_capacity(size as usize);
        raw.extend_from_slice(&size.to_le_bytes());
        raw.extend_from_slice(&type_code.to_le_bytes());
        raw.extend_from_slice(&value_type.to_le_bytes());
        raw.extend_from_slice(&1u16.to_le_bytes());
        raw.extend_from_slice(payload);
        raw
    }

    #[test]
    fn test_walk_two_entries() {
        let mut data = build_entry(0x0003, 0x0001, &[0xAA; 32]);
        data.extend(build_entry(0x0007, 0x0002, &encode_utf16le("C: Work")));

        let entries = parse_dataset(&data, 0).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry_type, EntryType::FullVolumeEncryptionKey);
        assert_eq!(entries[0].as_key().unwrap().len(), 32);
        assert_eq!(entries[1].entry_type, EntryType::Description);
        match &entries[1].value {
            EntryValue::UnicodeString(s) => assert_eq!(s, "C: Work"),
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_zero_size_entry_terminates() {
        let mut data = build_entry(0x0003, 0x0001, &[1, 2, 3, 4]);
        data.extend_from_slice(&[0u8; 16]);
        let entries = parse_dataset(&data, 0).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_undersized_entry_is_corrupt() {
        let mut data = Vec::new();
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(&[0u8; 6]);
        assert!(matches!(
            parse_dataset(&data, 0x100),
            Err(BdeError::MetadataCorrupt { offset: 0x100, .. })
        ));
    }

    #[test]
    fn test_overrunning_entry_is_corrupt() {
        let mut data = build_entry(0x0003, 0x0001, &[0u8; 8]);
        // Claim more payload than the dataset holds.
        data[0..2].copy_from_slice(&64u16.to_le_bytes());
        assert!(parse_dataset(&data, 0).is_err());
    }

    #[test]
    fn test_unknown_entry_type_kept() {
        let data = build_entry(0x000b, 0x000a, &[9, 9, 9]);
        let entries = parse_dataset(&data, 0).unwrap();
        assert_eq!(entries[0].entry_type, EntryType::Unknown(0x000b));
        match &entries[0].value {
            EntryValue::Update(raw) => assert_eq!(raw, &[9, 9, 9]),
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_unknown_value_type_kept_raw() {
        let data = build_entry(0x0000, 0x7777, &[1, 2]);
        let entries = parse_dataset(&data, 0).unwrap();
        match &entries[0].value {
            EntryValue::Unknown { value_type, data } => {
                assert_eq!(*value_type, 0x7777);
                assert_eq!(data, &[1, 2]);
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_wrapped_key_layout() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&[0x01; 12]);
        payload.extend_from_slice(&[0x02; 16]);
        payload.extend_from_slice(&[0x03; 40]);
        let data = build_entry(0x0002, 0x0005, &payload);

        let entries = parse_dataset(&data, 0).unwrap();
        let wrapped = entries[0].as_wrapped_key().unwrap();
        assert_eq!(wrapped.nonce, [0x01; 12]);
        assert_eq!(wrapped.mac, [0x02; 16]);
        assert_eq!(wrapped.ciphertext, vec![0x03; 40]);
    }

    #[test]
    fn test_stretch_key_nested_entry() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&[0x44; 16]); // salt
        let mut inner = Vec::new();
        inner.extend_from_slice(&[0x01; 12]);
        inner.extend_from_slice(&[0x02; 16]);
        inner.extend_from_slice(&[0x03; 32]);
        payload.extend(build_entry(0x0000, 0x0005, &inner));
        let data = build_entry(0x0002, 0x0003, &payload);

        let entries = parse_dataset(&data, 0).unwrap();
        match &entries[0].value {
            EntryValue::StretchKey(stretch) => {
                assert_eq!(stretch.salt, [0x44; 16]);
                assert!(stretch.wrapped_key().is_some());
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_volume_header_block_value() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x0060_0000u64.to_le_bytes());
        payload.extend_from_slice(&8192u64.to_le_bytes());
        let data = build_entry(0x000f, 0x000f, &payload);

        let entries = parse_dataset(&data, 0).unwrap();
        match entries[0].value {
            EntryValue::VolumeHeaderBlock { offset, size } => {
                assert_eq!(offset, 0x0060_0000);
                assert_eq!(size, 8192);
            }
            ref other => panic!("unexpected value {other:?}"),
        }
    }

    pub(crate) fn encode_utf16le(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }
}
