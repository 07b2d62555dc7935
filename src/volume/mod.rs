// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 BdeVault Contributors
//! The volume facade: lifecycle, credentials, unlock, and reads.
//!
//! A [`Volume`] moves through `Locked -> PartiallyUnlocked -> Unlocked`.
//! Opening parses the boot sector and reconciles the three FVE metadata
//! copies; `set_*` calls stage credentials; [`Volume::unlock`] runs the
//! protector chain; reads are served only once the FVEK is available. All
//! key material is zeroised when the volume is dropped or closed.

mod cache;
mod decrypt;
mod reader;
pub mod region;

pub use region::{Region, RegionKind, RegionMap};

use std::path::Path;

use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::VolumeOptions;
use crate::crypto::stretch::AbortHandle;
use crate::crypto::{CryptoProvider, RustCryptoProvider};
use crate::error::{BdeError, Result};
use crate::io::{ByteSource, FileSource};
use crate::keys::{
    bek::StartupKeyFile, decode_hex, parse_recovery_password, unwrap_fvek, unwrap_vmk,
    CredentialSet, Fvek, UnlockContext,
};
use crate::metadata::block::{read_candidate_blocks, select_block};
use crate::metadata::{EncryptionMethod, KeyProtectorInfo, MetadataBlock, METADATA_BLOCK_SIZE};
use crate::ntfs::{self, BootSector};
use crate::volume::decrypt::SectorDecryptor;
use crate::volume::reader::VolumeReader;

/// Where a volume stands between open and readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockState {
    /// Metadata parsed, no key material recovered.
    Locked,
    /// The volume master key is recovered but not yet the FVEK.
    PartiallyUnlocked,
    /// The FVEK is available; reads are permitted.
    Unlocked,
}

/// A BitLocker volume opened for read-only access.
pub struct Volume<S: ByteSource> {
    source: S,
    crypto: Box<dyn CryptoProvider>,
    options: VolumeOptions,
    abort: AbortHandle,
    boot: BootSector,
    metadata: MetadataBlock,
    valid_copies: usize,
    credentials: CredentialSet,
    fvek: Option<Fvek>,
    state: UnlockState,
    reader: VolumeReader,
    sector_size: u32,
}

impl Volume<FileSource> {
    /// Opens a raw volume image file.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(FileSource::open(path)?)
    }
}

impl<S: ByteSource> Volume<S> {
    /// Opens a volume with the default options and crypto provider.
    pub fn open(source: S) -> Result<Self> {
        Self::open_with(source, VolumeOptions::default(), Box::new(RustCryptoProvider::new()))
    }

    /// Opens a volume with explicit options and crypto provider.
    ///
    /// Parses the boot sector, locates and reconciles the FVE metadata
    /// copies, and assembles the region map. The volume starts locked.
    pub fn open_with(
        mut source: S,
        options: VolumeOptions,
        crypto: Box<dyn CryptoProvider>,
    ) -> Result<Self> {
        let (boot, offsets) = ntfs::discover(&mut source)?;
        let blocks = read_candidate_blocks(&mut source, offsets)?;
        let valid_copies = blocks.len();
        let metadata = select_block(blocks)?;

        let sector_size = u32::from(boot.bytes_per_sector);
        let volume_size = match boot.volume_size() {
            0 => source.size()?,
            size => size,
        };
        let encrypted_size = match metadata.header.encrypted_volume_size {
            0 => volume_size,
            size => size,
        };

        let shadow = Self::shadow_range(&metadata, sector_size);
        let region_map = RegionMap::build(
            volume_size,
            encrypted_size,
            metadata.header.metadata_offsets,
            METADATA_BLOCK_SIZE,
            shadow,
        )?;
        let reader = VolumeReader::new(region_map, sector_size, options.sector_cache_capacity);

        Ok(Self {
            source,
            crypto,
            options,
            abort: AbortHandle::new(),
            boot,
            metadata,
            valid_copies,
            credentials: CredentialSet::default(),
            fvek: None,
            state: UnlockState::Locked,
            reader,
            sector_size,
        })
    }

    /// The volume-header relocation: logical size and relocated offset.
    ///
    /// Windows 7+ records it in the block header; Vista in the dataset's
    /// volume-header-block entry. Either source is accepted, header first.
    fn shadow_range(metadata: &MetadataBlock, sector_size: u32) -> Option<(u64, u64)> {
        let header = &metadata.header;
        if header.volume_header_sectors > 0 && header.volume_header_offset > 0 {
            return Some((
                u64::from(header.volume_header_sectors) * u64::from(sector_size),
                header.volume_header_offset,
            ));
        }
        metadata
            .volume_header_block()
            .map(|(offset, size)| (size, offset))
    }

    /// Stages a 48-digit recovery password.
    pub fn set_recovery_password(&mut self, password: &str) -> Result<()> {
        self.credentials.recovery_key = Some(parse_recovery_password(password)?);
        Ok(())
    }

    /// Stages a user password.
    pub fn set_password(&mut self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(BdeError::InvalidCredential("empty password".into()));
        }
        self.credentials.password = Some(Zeroizing::new(password.to_owned()));
        Ok(())
    }

    /// Stages a startup key loaded from a `.BEK` file.
    pub fn set_startup_key_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.credentials.startup_key = Some(StartupKeyFile::load(path)?);
        Ok(())
    }

    /// Stages an already-parsed startup key.
    pub fn set_startup_key(&mut self, key: StartupKeyFile) {
        self.credentials.startup_key = Some(key);
    }

    /// Stages raw FVEK (and tweak) key material as hex, bypassing the
    /// protector chain.
    pub fn set_keys(&mut self, fvek_hex: &str, tweak_hex: Option<&str>) -> Result<()> {
        let fvek = decode_hex(fvek_hex)?;
        let tweak = tweak_hex.map(decode_hex).transpose()?;
        self.credentials.raw_key = Some((fvek, tweak));
        Ok(())
    }

    /// Runs the unwrap chain over the staged credentials.
    ///
    /// Clear-key protectors are tried even with no credentials staged.
    /// On success the volume is `Unlocked`; a failed attempt leaves the
    /// staged credentials in place for another try.
    pub fn unlock(&mut self) -> Result<()> {
        if self.state == UnlockState::Unlocked {
            return Ok(());
        }

        let method = self.metadata.header.encryption_method;
        let fvek = if let Some((key, tweak)) = &self.credentials.raw_key {
            Fvek::from_raw(method, key, tweak.as_ref().map(|t| t.as_slice()))?
        } else {
            let ctx = UnlockContext {
                crypto: self.crypto.as_ref(),
                abort: &self.abort,
                abort_poll_interval: self.options.abort_poll_interval,
            };
            let vmk = unwrap_vmk(&self.metadata, &self.credentials, &ctx)?;
            self.state = UnlockState::PartiallyUnlocked;
            unwrap_fvek(&self.metadata, &vmk, self.crypto.as_ref())?
        };

        self.fvek = Some(fvek);
        self.state = UnlockState::Unlocked;
        Ok(())
    }

    /// Whether reads are still refused.
    pub fn is_locked(&self) -> bool {
        self.state != UnlockState::Unlocked
    }

    pub fn unlock_state(&self) -> UnlockState {
        self.state
    }

    /// Handle for cancelling a long unwrap from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Reads up to `buf.len()` decrypted bytes at `offset`.
    ///
    /// Returns the number of bytes read, clipping at the volume end; zero
    /// for reads at or past the end.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let Some(fvek) = &self.fvek else {
            return Err(BdeError::NotUnlocked);
        };
        let decryptor = SectorDecryptor::new(self.crypto.as_ref(), fvek, self.sector_size);
        self.reader
            .read_at(&mut self.source, &decryptor, offset, buf)
    }

    /// Size of the volume in bytes.
    pub fn volume_size(&self) -> u64 {
        self.reader.volume_size()
    }

    /// Bytes per sector.
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn encryption_method(&self) -> EncryptionMethod {
        self.metadata.header.encryption_method
    }

    /// Volume identifier GUID from the metadata header.
    pub fn volume_identifier(&self) -> Uuid {
        self.metadata.metadata.volume_identifier
    }

    /// Volume creation time as a FILETIME.
    pub fn creation_time(&self) -> u64 {
        self.metadata.metadata.creation_time
    }

    /// The description / drive label string, when present.
    pub fn description(&self) -> Option<&str> {
        self.metadata.description()
    }

    pub fn number_of_key_protectors(&self) -> u32 {
        self.metadata.vmks().count() as u32
    }

    /// Describes the protector at `index`, in dataset order.
    pub fn key_protector(&self, index: u32) -> Option<KeyProtectorInfo> {
        self.metadata
            .vmks()
            .nth(index as usize)
            .map(|vmk| KeyProtectorInfo {
                identifier: vmk.identifier,
                protection_type: vmk.protection_type,
            })
    }

    /// All protector descriptions, in dataset order.
    pub fn key_protectors(&self) -> Vec<KeyProtectorInfo> {
        self.metadata.key_protectors()
    }

    /// How many of the three metadata copies parsed cleanly.
    pub fn valid_metadata_copies(&self) -> usize {
        self.valid_copies
    }

    /// The region map assembled from the metadata.
    pub fn region_map(&self) -> &RegionMap {
        self.reader.region_map()
    }

    /// Geometry parsed from the boot sector.
    pub fn boot_sector(&self) -> &BootSector {
        &self.boot
    }

    /// Drops the volume, its cached plaintext and all key material.
    pub fn close(mut self) {
        self.reader.purge_cache();
        self.fvek = None;
        self.credentials = CredentialSet::default();
        // Remaining cleanup happens in the field drops.
    }
}

impl<S: ByteSource> std::fmt::Debug for Volume<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("state", &self.state)
            .field("method", &self.metadata.header.encryption_method)
            .field("volume_size", &self.reader.volume_size())
            .field("sector_size", &self.sector_size)
            .field("key_protectors", &self.number_of_key_protectors())
            .finish_non_exhaustive()
    }
}
