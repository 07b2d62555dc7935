// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 BdeVault Contributors
//! Tunable parameters for volume handling.

/// Default number of decrypted sectors kept in the cache.
pub const DEFAULT_SECTOR_CACHE_CAPACITY: usize = 64;

/// Default number of stretch-key iterations between abort-flag checks.
///
/// The full stretch runs 2^20 iterations; polling every 4096 bounds
/// cancellation latency to tens of milliseconds on current hardware.
pub const DEFAULT_ABORT_POLL_INTERVAL: u32 = 4096;

/// Options controlling a [`Volume`](crate::volume::Volume).
#[derive(Debug, Clone)]
pub struct VolumeOptions {
    /// Capacity of the decrypted-sector LRU cache. Zero disables caching;
    /// the cache is an optimisation and never changes read results.
    pub sector_cache_capacity: usize,

    /// Stretch-key iterations between abort-flag checks.
    pub abort_poll_interval: u32,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            sector_cache_capacity: DEFAULT_SECTOR_CACHE_CAPACITY,
            abort_poll_interval: DEFAULT_ABORT_POLL_INTERVAL,
        }
    }
}
