//! The per-sector decryption engine.
//!
//! Supports the five historical BitLocker cipher modes. CBC modes derive
//! the sector IV by ECB-encrypting the sector's byte offset under the FVEK;
//! the Vista-era diffuser modes additionally run the Elephant diffuser and
//! a tweak-key-derived sector key XOR; XTS modes use the sector number as
//! the tweak.

use crate::crypto::{CryptoError, CryptoProvider};
use crate::error::{BdeError, Result};
use crate::keys::Fvek;

const DIFFUSER_ROUNDS: usize = 5;
const DIFFUSER_A_SCHEDULE: [u32; 4] = [9, 0, 13, 0];
const DIFFUSER_B_SCHEDULE: [u32; 4] = [0, 10, 0, 25];

/// Decrypts sectors of one volume; borrows the FVEK for its lifetime.
pub(crate) struct SectorDecryptor<'a> {
    crypto: &'a dyn CryptoProvider,
    fvek: &'a Fvek,
    sector_size: u32,
}

impl<'a> SectorDecryptor<'a> {
    pub fn new(crypto: &'a dyn CryptoProvider, fvek: &'a Fvek, sector_size: u32) -> Self {
        Self {
            crypto,
            fvek,
            sector_size,
        }
    }

    /// Decrypts one sector in place.
    ///
    /// `disk_offset` is the byte offset the ciphertext was encrypted at,
    /// which for relocated volume-header sectors differs from the logical
    /// offset the caller asked for.
    pub fn decrypt_sector(&self, buf: &mut [u8], disk_offset: u64) -> Result<()> {
        let method = self.fvek.method();
        if method.is_xts() {
            let sector_number = u128::from(disk_offset / u64::from(self.sector_size));
            self.crypto
                .aes_xts_decrypt(self.fvek.key(), sector_number, buf)
                .map_err(crypto_failure)?;
            return Ok(());
        }

        let iv = self.derive_cbc_iv(disk_offset)?;
        self.crypto
            .aes_cbc_decrypt(self.fvek.key(), &iv, buf)
            .map_err(crypto_failure)?;

        if method.uses_diffuser() {
            let tweak = self
                .fvek
                .tweak()
                .ok_or_else(|| BdeError::corrupt(0, "diffuser method without tweak key"))?;

            let mut words = bytes_to_words(buf);
            diffuser_b_decrypt(&mut words);
            diffuser_a_decrypt(&mut words);
            words_to_bytes(&words, buf);

            let stream = self.sector_key_stream(tweak, disk_offset, buf.len())?;
            for (byte, key) in buf.iter_mut().zip(stream.iter()) {
                *byte ^= key;
            }
        }
        Ok(())
    }

    /// `AES-ECB(FVEK, le_u64(offset) || 0^8)`.
    fn derive_cbc_iv(&self, disk_offset: u64) -> Result<[u8; 16]> {
        let mut block = [0u8; 16];
        block[..8].copy_from_slice(&disk_offset.to_le_bytes());
        self.crypto
            .aes_ecb_encrypt(self.fvek.key(), &mut block)
            .map_err(crypto_failure)?;
        Ok(block)
    }

    /// Sector-sized key stream from the tweak key.
    ///
    /// Block `i` encrypts `le_u64(offset) || 0x80 || 0^6 || i`.
    fn sector_key_stream(
        &self,
        tweak_key: &[u8],
        disk_offset: u64,
        len: usize,
    ) -> Result<Vec<u8>> {
        let mut stream = vec![0u8; len];
        for (i, chunk) in stream.chunks_mut(16).enumerate() {
            let mut block = [0u8; 16];
            block[..8].copy_from_slice(&disk_offset.to_le_bytes());
            block[8] = 0x80;
            block[15] = i as u8;
            self.crypto
                .aes_ecb_encrypt(tweak_key, &mut block)
                .map_err(crypto_failure)?;
            chunk.copy_from_slice(&block[..chunk.len()]);
        }
        Ok(stream)
    }
}

fn crypto_failure(err: CryptoError) -> BdeError {
    BdeError::corrupt(0, format!("sector decryption failed: {err}"))
}

fn bytes_to_words(buf: &[u8]) -> Vec<u32> {
    buf.chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn words_to_bytes(words: &[u32], buf: &mut [u8]) {
    for (chunk, word) in buf.chunks_exact_mut(4).zip(words.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
}

/// Diffuser A, decrypt direction: five ascending-index rounds.
fn diffuser_a_decrypt(words: &mut [u32]) {
    let n = words.len();
    for _ in 0..DIFFUSER_ROUNDS {
        for i in 0..n {
            let mixed =
                words[(i + 2) % n] ^ words[(i + 5) % n].rotate_left(DIFFUSER_A_SCHEDULE[i % 4]);
            words[i] = words[i].wrapping_add(mixed);
        }
    }
}

/// Diffuser B, decrypt direction: five descending-index rounds.
fn diffuser_b_decrypt(words: &mut [u32]) {
    let n = words.len();
    for _ in 0..DIFFUSER_ROUNDS {
        for i in (0..n).rev() {
            let mixed =
                words[(i + 2) % n] ^ words[(i + 5) % n].rotate_left(DIFFUSER_B_SCHEDULE[i % 4]);
            words[i] = words[i].wrapping_add(mixed);
        }
    }
}
