//! Random-access reads over the decrypted volume.
//!
//! Requests are clipped to the volume, split along region boundaries, and
//! served per region: raw read-through for metadata blocks and the
//! unencrypted tail, decrypt-on-demand for encrypted regions, and
//! redirected decrypt for the relocated volume header. Decrypted sectors
//! pass through the LRU cache.

use crate::error::Result;
use crate::io::ByteSource;
use crate::volume::cache::SectorCache;
use crate::volume::decrypt::SectorDecryptor;
use crate::volume::region::{Region, RegionKind, RegionMap};

pub(crate) struct VolumeReader {
    region_map: RegionMap,
    sector_size: u32,
    cache: SectorCache,
}

impl VolumeReader {
    pub fn new(region_map: RegionMap, sector_size: u32, cache_capacity: usize) -> Self {
        Self {
            region_map,
            sector_size,
            cache: SectorCache::new(cache_capacity),
        }
    }

    pub fn volume_size(&self) -> u64 {
        self.region_map.volume_size()
    }

    pub fn region_map(&self) -> &RegionMap {
        &self.region_map
    }

    /// Drops all cached plaintext sectors.
    pub fn purge_cache(&mut self) {
        self.cache.clear();
    }

    /// Reads up to `buf.len()` bytes at `offset`, clipping to the volume.
    pub fn read_at<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        decryptor: &SectorDecryptor<'_>,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize> {
        let size = self.region_map.volume_size();
        if buf.is_empty() || offset >= size {
            return Ok(0);
        }
        let end = (offset + buf.len() as u64).min(size);

        let mut pos = offset;
        while pos < end {
            let region = *self.region_map.region_at(pos);
            let chunk_end = region.end.min(end);
            let out = &mut buf[(pos - offset) as usize..(chunk_end - offset) as usize];
            match region.kind {
                RegionKind::MetadataBlock | RegionKind::UnencryptedTail => {
                    source.read_exact_at(pos, out)?;
                }
                RegionKind::Encrypted => {
                    self.read_encrypted(source, decryptor, &region, pos, out, None)?;
                }
                RegionKind::PlaintextShadow { shadow_offset } => {
                    self.read_encrypted(source, decryptor, &region, pos, out, Some(shadow_offset))?;
                }
            }
            pos = chunk_end;
        }
        Ok((end - offset) as usize)
    }

    /// Serves `out` from decrypted sectors starting at logical `start`.
    ///
    /// With `shadow_offset` set, ciphertext is fetched (and its IV derived)
    /// from the relocation instead of the logical position.
    fn read_encrypted<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        decryptor: &SectorDecryptor<'_>,
        region: &Region,
        start: u64,
        out: &mut [u8],
        shadow_offset: Option<u64>,
    ) -> Result<()> {
        let sector_size = u64::from(self.sector_size);
        let end = start + out.len() as u64;
        let mut pos = start;

        let mut sector = vec![0u8; sector_size as usize];
        while pos < end {
            let sector_start = pos - pos % sector_size;
            let in_sector = (pos - sector_start) as usize;
            let take = ((sector_start + sector_size).min(end) - pos) as usize;

            if !self.cache.get_into(sector_start, &mut sector) {
                let disk_offset = match shadow_offset {
                    Some(shadow) => shadow + (sector_start - region.start),
                    None => sector_start,
                };
                source.read_exact_at(disk_offset, &mut sector)?;
                decryptor.decrypt_sector(&mut sector, disk_offset)?;
                self.cache.insert(sector_start, sector.clone());
            }

            let out_pos = (pos - start) as usize;
            out[out_pos..out_pos + take].copy_from_slice(&sector[in_sector..in_sector + take]);
            pos += take as u64;
        }
        Ok(())
    }
}
