// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 BdeVault Contributors
//! Default [`CryptoProvider`] backed by the RustCrypto crates.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncrypt, KeyInit, KeyIvInit};
use aes::{Aes128, Aes256};
use ccm::aead::Aead;
use ccm::consts::{U12, U16};
use ccm::Ccm;
use sha2::{Digest, Sha256};
use xts_mode::{get_tweak_default, Xts128};
use zeroize::Zeroizing;

use super::{CryptoError, CryptoProvider};

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes128Ccm = Ccm<Aes128, U16, U12>;
type Aes256Ccm = Ccm<Aes256, U16, U12>;

/// Stateless provider over the `aes`, `cbc`, `ccm`, `xts-mode` and `sha2`
/// crates.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustCryptoProvider;

impl RustCryptoProvider {
    pub fn new() -> Self {
        Self
    }
}

impl CryptoProvider for RustCryptoProvider {
    fn aes_ecb_encrypt(&self, key: &[u8], block: &mut [u8; 16]) -> Result<(), CryptoError> {
        let ga = GenericArray::from_mut_slice(block);
        match key.len() {
            16 => {
                let cipher = Aes128::new_from_slice(key).expect("length checked");
                cipher.encrypt_block(ga);
            }
            32 => {
                let cipher = Aes256::new_from_slice(key).expect("length checked");
                cipher.encrypt_block(ga);
            }
            n => return Err(CryptoError::KeyLength(n)),
        }
        Ok(())
    }

    fn aes_cbc_decrypt(
        &self,
        key: &[u8],
        iv: &[u8; 16],
        data: &mut [u8],
    ) -> Result<(), CryptoError> {
        if data.len() % 16 != 0 {
            return Err(CryptoError::BlockAlignment(data.len()));
        }
        match key.len() {
            16 => {
                let mut dec =
                    Aes128CbcDec::new_from_slices(key, iv).expect("lengths checked");
                for chunk in data.chunks_exact_mut(16) {
                    dec.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
                }
            }
            32 => {
                let mut dec =
                    Aes256CbcDec::new_from_slices(key, iv).expect("lengths checked");
                for chunk in data.chunks_exact_mut(16) {
                    dec.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
                }
            }
            n => return Err(CryptoError::KeyLength(n)),
        }
        Ok(())
    }

    fn aes_ccm_decrypt_verify(
        &self,
        key: &[u8],
        nonce: &[u8; 12],
        ciphertext: &[u8],
        mac: &[u8; 16],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        // The aead API consumes ciphertext with the tag appended.
        let mut tagged = Vec::with_capacity(ciphertext.len() + mac.len());
        tagged.extend_from_slice(ciphertext);
        tagged.extend_from_slice(mac);

        let nonce = GenericArray::from_slice(nonce);
        let plaintext = match key.len() {
            16 => Aes128Ccm::new_from_slice(key)
                .expect("length checked")
                .decrypt(nonce, tagged.as_ref()),
            32 => Aes256Ccm::new_from_slice(key)
                .expect("length checked")
                .decrypt(nonce, tagged.as_ref()),
            n => return Err(CryptoError::KeyLength(n)),
        }
        .map_err(|_| CryptoError::AuthenticationFailed)?;

        Ok(Zeroizing::new(plaintext))
    }

    fn aes_xts_decrypt(
        &self,
        key: &[u8],
        sector_number: u128,
        data: &mut [u8],
    ) -> Result<(), CryptoError> {
        let tweak = get_tweak_default(sector_number);
        match key.len() {
            32 => {
                let data_cipher = Aes128::new_from_slice(&key[..16]).expect("length checked");
                let tweak_cipher = Aes128::new_from_slice(&key[16..]).expect("length checked");
                Xts128::new(data_cipher, tweak_cipher).decrypt_sector(data, tweak);
            }
            64 => {
                let data_cipher = Aes256::new_from_slice(&key[..32]).expect("length checked");
                let tweak_cipher = Aes256::new_from_slice(&key[32..]).expect("length checked");
                Xts128::new(data_cipher, tweak_cipher).decrypt_sector(data, tweak);
            }
            n => return Err(CryptoError::KeyLength(n)),
        }
        Ok(())
    }

    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&Sha256::digest(data));
        out
    }
}
