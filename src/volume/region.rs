//! The region map: how each byte range of the volume is materialised.
//!
//! A BitLocker volume is not uniformly encrypted. The FVE metadata blocks
//! sit in plaintext, the first sectors of the filesystem are relocated to a
//! backup location, and a volume can carry an unencrypted tail beyond the
//! encrypted size. The region map is an ordered, non-overlapping cover of
//! `[0, volume_size)` telling the reader what to do per range.

use crate::error::{BdeError, Result};

/// How the bytes of one region are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Ciphertext in place; decrypt with the sector engine.
    Encrypted,
    /// Logical data relocated elsewhere; fetch ciphertext from
    /// `shadow_offset` plus the delta into the region and decrypt it with
    /// the relocated offset.
    PlaintextShadow {
        /// On-disk location of the relocated data.
        shadow_offset: u64,
    },
    /// FVE metadata; plaintext on disk, served raw.
    MetadataBlock,
    /// Beyond the encrypted size; served raw.
    UnencryptedTail,
}

/// One contiguous region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Inclusive start of the logical range.
    pub start: u64,
    /// Exclusive end of the logical range.
    pub end: u64,
    pub kind: RegionKind,
}

impl Region {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Ordered, non-overlapping cover of the whole volume.
#[derive(Debug, Clone)]
pub struct RegionMap {
    regions: Vec<Region>,
    volume_size: u64,
}

impl RegionMap {
    /// Assembles the map from the metadata-derived layout facts.
    ///
    /// `shadow` is the logical size and relocation offset of the volume
    /// header region, when one exists. Metadata block ranges and the
    /// encrypted-size boundary come straight from the selected block.
    pub fn build(
        volume_size: u64,
        encrypted_size: u64,
        metadata_offsets: [u64; 3],
        metadata_block_size: u64,
        shadow: Option<(u64, u64)>,
    ) -> Result<Self> {
        if volume_size == 0 {
            return Err(BdeError::corrupt(0, "volume size is zero"));
        }
        let encrypted_size = encrypted_size.min(volume_size);

        // Fixed overlays in priority order; later ones yield to earlier.
        let mut overlays: Vec<Region> = Vec::new();
        if let Some((shadow_size, shadow_offset)) = shadow {
            if shadow_size > 0 {
                overlays.push(Region {
                    start: 0,
                    end: shadow_size.min(volume_size),
                    kind: RegionKind::PlaintextShadow { shadow_offset },
                });
            }
        }
        for &offset in &metadata_offsets {
            if offset < volume_size {
                overlays.push(Region {
                    start: offset,
                    end: (offset + metadata_block_size).min(volume_size),
                    kind: RegionKind::MetadataBlock,
                });
            }
        }
        if encrypted_size < volume_size {
            overlays.push(Region {
                start: encrypted_size,
                end: volume_size,
                kind: RegionKind::UnencryptedTail,
            });
        }

        // Clip each overlay against the ones already accepted.
        let mut accepted: Vec<Region> = Vec::new();
        for mut overlay in overlays {
            for existing in &accepted {
                if overlay.start < existing.end && existing.start < overlay.end {
                    // Keep the non-overlapping front part, if any.
                    if overlay.start < existing.start {
                        overlay.end = existing.start;
                    } else {
                        overlay.start = existing.end.min(overlay.end);
                    }
                }
            }
            if !overlay.is_empty() {
                accepted.push(overlay);
            }
        }
        accepted.sort_by_key(|r| r.start);

        // Fill the gaps with encrypted regions.
        let mut regions = Vec::with_capacity(accepted.len() * 2 + 1);
        let mut cursor = 0u64;
        for overlay in accepted {
            if cursor < overlay.start {
                regions.push(Region {
                    start: cursor,
                    end: overlay.start,
                    kind: RegionKind::Encrypted,
                });
            }
            cursor = overlay.end;
            regions.push(overlay);
        }
        if cursor < volume_size {
            regions.push(Region {
                start: cursor,
                end: volume_size,
                kind: RegionKind::Encrypted,
            });
        }

        Ok(Self {
            regions,
            volume_size,
        })
    }

    pub fn volume_size(&self) -> u64 {
        self.volume_size
    }

    /// The region containing `offset`. `offset` must be within the volume.
    pub fn region_at(&self, offset: u64) -> &Region {
        debug_assert!(offset < self.volume_size);
        let index = self
            .regions
            .partition_point(|r| r.end <= offset);
        &self.regions[index]
    }

    /// All regions, in order.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}
