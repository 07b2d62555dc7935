// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 BdeVault Contributors
//! NTFS / BitLocker boot sector parsing and FVE block discovery.
//!
//! A BitLocker volume keeps a boot sector whose BPB geometry fields are
//! still valid NTFS, but whose OEM identifier is `-FVE-FS-`. Windows 7 and
//! later record the three FVE metadata block offsets inside the NTFS boot
//! sector; Vista replaces the boot sector with its own variant holding the
//! offsets at different positions. Discovery tries the newer layout first
//! and falls back to the Vista one.

use tracing::debug;

use crate::error::{BdeError, Result};
use crate::io::{ByteReader, ByteSource};
use crate::metadata::FVE_SIGNATURE;

/// Size of the boot sector.
pub const BOOT_SECTOR_SIZE: usize = 512;

/// Byte position of the three metadata offsets in a Windows 7+ boot sector.
const FVE_OFFSETS_WIN7: usize = 176;

/// Byte position of the three metadata offsets in a Vista boot sector.
const FVE_OFFSETS_VISTA: usize = 56;

/// Geometry parsed from the (possibly BitLocker-replaced) boot sector.
#[derive(Debug, Clone)]
pub struct BootSector {
    /// Bytes per sector, usually 512.
    pub bytes_per_sector: u16,

    /// Sectors per cluster.
    pub sectors_per_cluster: u8,

    /// Total sectors of the volume per the BPB; zero when the field is
    /// unset (some BitLocker boot sectors blank it).
    pub total_sectors: u64,

    /// Whether the OEM identifier marks the volume as BitLocker.
    pub is_bitlocker: bool,
}

impl BootSector {
    /// Parses the boot sector fields shared by NTFS and BitLocker variants.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BOOT_SECTOR_SIZE {
            return Err(BdeError::corrupt(0, "boot sector shorter than 512 bytes"));
        }

        let oem = &data[3..11];
        let is_bitlocker = oem == FVE_SIGNATURE;

        let mut r = ByteReader::new(&data[11..], 11);
        let bytes_per_sector = r.u16_le()?;
        let sectors_per_cluster = r.u8()?;
        if !bytes_per_sector.is_power_of_two() || bytes_per_sector < 512 {
            return Err(BdeError::corrupt(
                11,
                format!("implausible bytes per sector: {bytes_per_sector}"),
            ));
        }

        let mut r = ByteReader::new(&data[40..48], 40);
        let total_sectors = r.u64_le()?;

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            total_sectors,
            is_bitlocker,
        })
    }

    /// Volume size per the BPB, zero when unrecorded.
    pub fn volume_size(&self) -> u64 {
        self.total_sectors * u64::from(self.bytes_per_sector)
    }
}

/// Extracts the three candidate FVE offsets from a boot sector position.
fn offsets_at(data: &[u8], pos: usize) -> [u64; 3] {
    let mut offsets = [0u64; 3];
    for (i, chunk) in data[pos..pos + 24].chunks_exact(8).enumerate() {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        offsets[i] = u64::from_le_bytes(raw);
    }
    offsets
}

/// Checks for the FVE block signature at `offset` in the image.
fn signature_at<S: ByteSource + ?Sized>(source: &mut S, offset: u64) -> bool {
    let mut sig = [0u8; 8];
    match source.read_exact_at(offset, &mut sig) {
        Ok(()) => sig == FVE_SIGNATURE,
        Err(_) => false,
    }
}

/// Parses the boot sector and discovers the three FVE block offsets.
///
/// Returns the parsed geometry together with the offsets. Fails with
/// [`BdeError::MetadataCorrupt`] if the volume is not BitLocker or neither
/// offset layout points at a valid FVE signature.
pub fn discover<S: ByteSource + ?Sized>(source: &mut S) -> Result<(BootSector, [u64; 3])> {
    let mut raw = [0u8; BOOT_SECTOR_SIZE];
    source.read_exact_at(0, &mut raw)?;
    let boot = BootSector::parse(&raw)?;

    if !boot.is_bitlocker {
        return Err(BdeError::corrupt(
            3,
            "boot sector OEM identifier is not -FVE-FS-",
        ));
    }

    let win7 = offsets_at(&raw, FVE_OFFSETS_WIN7);
    if win7[0] != 0 && signature_at(source, win7[0]) {
        debug!(offset = win7[0], "FVE metadata found via Windows 7+ layout");
        return Ok((boot, win7));
    }

    let vista = offsets_at(&raw, FVE_OFFSETS_VISTA);
    if vista[0] != 0 && signature_at(source, vista[0]) {
        debug!(offset = vista[0], "FVE metadata found via Vista layout");
        return Ok((boot, vista));
    }

    Err(BdeError::corrupt(
        0,
        "no FVE metadata block found at either boot sector layout",
    ))
}
