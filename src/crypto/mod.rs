// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 BdeVault Contributors
//! Cryptographic primitives behind a pluggable provider seam.
//!
//! The volume engine consumes the [`CryptoProvider`] trait only; the default
//! implementation in [`provider`] is backed by the RustCrypto crates. The
//! BitLocker key-stretch KDF lives in [`stretch`].

pub mod provider;
pub mod stretch;

use thiserror::Error;
use zeroize::Zeroizing;

pub use provider::RustCryptoProvider;
pub use stretch::{stretch_key, AbortHandle, STRETCH_ITERATIONS};

/// Errors from cryptographic primitives.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The key length does not match any supported AES variant.
    #[error("unsupported key length: {0} bytes")]
    KeyLength(usize),

    /// Data that must be block-aligned is not.
    #[error("ciphertext length {0} is not a multiple of the AES block size")]
    BlockAlignment(usize),

    /// AEAD tag verification failed: wrong key or tampered data.
    #[error("authentication failed")]
    AuthenticationFailed,
}

/// Pluggable AES/SHA-256 provider.
///
/// All operations are pure computations over caller-supplied buffers; key
/// material never outlives a call except through the returned `Zeroizing`
/// plaintexts.
pub trait CryptoProvider: Send {
    /// Encrypts one 16-byte block in place with AES-ECB.
    ///
    /// Accepts 16- or 32-byte keys (AES-128/AES-256).
    fn aes_ecb_encrypt(
        &self,
        key: &[u8],
        block: &mut [u8; 16],
    ) -> std::result::Result<(), CryptoError>;

    /// Decrypts `data` in place with AES-CBC. `data` must be a multiple of
    /// 16 bytes; accepts 16- or 32-byte keys.
    fn aes_cbc_decrypt(
        &self,
        key: &[u8],
        iv: &[u8; 16],
        data: &mut [u8],
    ) -> std::result::Result<(), CryptoError>;

    /// Decrypts and verifies an AES-CCM wrapped key.
    ///
    /// BitLocker uses a 12-byte nonce, a 16-byte tag and no associated data.
    /// Returns the plaintext on success; [`CryptoError::AuthenticationFailed`]
    /// means the unwrap key is wrong.
    fn aes_ccm_decrypt_verify(
        &self,
        key: &[u8],
        nonce: &[u8; 12],
        ciphertext: &[u8],
        mac: &[u8; 16],
    ) -> std::result::Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// Decrypts one sector in place with AES-XTS.
    ///
    /// `key` is the full XTS key (32 or 64 bytes, data half then tweak
    /// half); `sector_number` is encoded little-endian into the tweak.
    fn aes_xts_decrypt(
        &self,
        key: &[u8],
        sector_number: u128,
        data: &mut [u8],
    ) -> std::result::Result<(), CryptoError>;

    /// SHA-256 digest.
    fn sha256(&self, data: &[u8]) -> [u8; 32];
}
