// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 BdeVault Contributors
//! The BitLocker stretch-key derivation function.
//!
//! Password-class protectors do not use their hash directly: the hash is
//! "stretched" through 2^20 chained SHA-256 rounds over a fixed-layout state
//! block, which is what makes password guessing expensive. The final round's
//! digest is the intermediate key that unwraps the protector's AES-CCM
//! wrapped key.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::crypto::CryptoProvider;
use crate::error::{BdeError, Result};

/// Number of SHA-256 rounds in one stretch.
pub const STRETCH_ITERATIONS: u32 = 1 << 20;

/// State block layout: last digest, initial digest, salt, round counter.
const LAST_SHA256: std::ops::Range<usize> = 0..32;
const INITIAL_SHA256: std::ops::Range<usize> = 32..64;
const SALT: std::ops::Range<usize> = 64..80;
const COUNTER: std::ops::Range<usize> = 80..88;
const STATE_SIZE: usize = 88;

/// Cloneable flag for cancelling long-running unwraps from another thread.
///
/// The stretch loop polls the flag periodically; raising it makes the
/// in-flight unlock fail with [`BdeError::Aborted`] within a bounded number
/// of rounds.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the abort flag.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Clears the flag so the handle can be reused.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Runs the stretch over an initial double-hash and a 16-byte salt.
///
/// `initial` must already be `SHA-256(SHA-256(credential))`. The abort flag
/// is polled every `poll_interval` rounds; the intermediate state is
/// zeroised whether the stretch finishes or aborts.
pub fn stretch_key(
    crypto: &dyn CryptoProvider,
    initial: &[u8; 32],
    salt: &[u8; 16],
    abort: &AbortHandle,
    poll_interval: u32,
) -> Result<Zeroizing<[u8; 32]>> {
    let poll_interval = poll_interval.max(1);

    let mut state = Zeroizing::new([0u8; STATE_SIZE]);
    let buf: &mut [u8; STATE_SIZE] = &mut state;
    buf[INITIAL_SHA256].copy_from_slice(initial);
    buf[SALT].copy_from_slice(salt);

    for round in 0..STRETCH_ITERATIONS {
        if round % poll_interval == 0 && abort.is_aborted() {
            return Err(BdeError::Aborted);
        }
        let digest = crypto.sha256(&buf[..]);
        buf[LAST_SHA256].copy_from_slice(&digest);
        buf[COUNTER].copy_from_slice(&u64::from(round + 1).to_le_bytes());
    }

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&buf[LAST_SHA256]);
    Ok(key)
}
