// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 BdeVault Contributors
//! Synthetic BitLocker image builder for the integration suite.
//!
//! Builds complete volume images with the same cipher stack the library
//! decrypts with: AES-CBC (with or without the Elephant diffuser), AES-XTS,
//! AES-CCM key wrapping and the SHA-256 stretch. The fixed layout:
//!
//! - 512-byte sectors, 0x50000-byte volume
//! - FVE metadata blocks at 0x10000 / 0x20000 / 0x30000
//! - 16 volume-header sectors relocated to 0x40000
//! - plaintext NTFS boot sector at logical 0, MFT "FILE" record at 0x200

#![allow(dead_code)]

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::{Aes128, Aes256};
use ccm::aead::Aead;
use ccm::consts::{U12, U16};
use ccm::Ccm;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use xts_mode::{get_tweak_default, Xts128};

use bdevault::crypto::{stretch_key, AbortHandle, RustCryptoProvider};
use bdevault::parse_recovery_password;

pub const SECTOR: usize = 512;
pub const VOLUME_SIZE: u64 = 0x50000;
pub const FVE_OFFSETS: [u64; 3] = [0x10000, 0x20000, 0x30000];
pub const SHADOW_OFFSET: u64 = 0x40000;
pub const SHADOW_SECTORS: u32 = 16;

pub const VMK: [u8; 32] = [0x6B; 32];
pub const VOLUME_GUID: Uuid = Uuid::from_u128(0x0102_0304_0506_0708_090A_0B0C_0D0E_0F10);

/// Method codes mirroring the on-disk values.
pub const AES_128_CBC_DIFFUSER: u32 = 0x8000;
pub const AES_256_CBC_DIFFUSER: u32 = 0x8001;
pub const AES_128_CBC: u32 = 0x8002;
pub const AES_256_CBC: u32 = 0x8003;
pub const AES_128_XTS: u32 = 0x8004;
pub const AES_256_XTS: u32 = 0x8005;

type Aes128Ccm = Ccm<Aes128, U16, U12>;
type Aes256Ccm = Ccm<Aes256, U16, U12>;

/// One key protector to install in the image.
pub enum ProtectorConfig {
    Recovery { password: String },
    Password { password: String },
    StartupKey { guid: Uuid, key: [u8; 32] },
    ClearKey { key: [u8; 32] },
    /// A TPM protector the library must skip over.
    Tpm,
}

/// A deterministic, valid recovery password for the fixed test key.
pub fn test_recovery_password() -> String {
    bdevault::format_recovery_password(&[
        0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD,
        0xEF,
    ])
}

pub struct VolumeImageBuilder {
    pub version: u16,
    pub method: u32,
    pub encrypted_size: u64,
    pub protectors: Vec<ProtectorConfig>,
    pub nonce_counter: u32,
}

impl VolumeImageBuilder {
    pub fn new(version: u16, method: u32) -> Self {
        Self {
            version,
            method,
            encrypted_size: VOLUME_SIZE,
            protectors: Vec::new(),
            nonce_counter: 1,
        }
    }

    pub fn protector(mut self, config: ProtectorConfig) -> Self {
        self.protectors.push(config);
        self
    }

    pub fn encrypted_size(mut self, size: u64) -> Self {
        self.encrypted_size = size;
        self
    }

    /// The FVEK key-entry payload for the configured method.
    pub fn fvek_key_entry(&self) -> Vec<u8> {
        match self.method {
            AES_128_CBC => vec![0x61; 16],
            AES_256_CBC => vec![0x62; 32],
            AES_128_CBC_DIFFUSER => {
                let mut key = vec![0x63; 16];
                key.extend(vec![0x93; 16]);
                key
            }
            AES_256_CBC_DIFFUSER => {
                let mut key = vec![0x64; 32];
                key.extend(vec![0x94; 32]);
                key
            }
            AES_128_XTS => vec![0x65; 32],
            AES_256_XTS => vec![0x66; 64],
            other => panic!("unknown method {other:#x}"),
        }
    }

    /// Builds the raw image.
    pub fn build(&self) -> Vec<u8> {
        let mut plaintext = plaintext_volume();
        // The relocated volume-header copy holds the original first sectors.
        let shadow_len = SHADOW_SECTORS as usize * SECTOR;
        let head: Vec<u8> = plaintext[..shadow_len].to_vec();
        plaintext[SHADOW_OFFSET as usize..SHADOW_OFFSET as usize + shadow_len]
            .copy_from_slice(&head);

        let mut image = plaintext;
        self.encrypt_regions(&mut image);

        // On-disk boot area: BitLocker boot sector plus filler.
        let boot = self.bitlocker_boot_sector();
        image[..SECTOR].copy_from_slice(&boot);
        image[SECTOR..shadow_len].iter_mut().for_each(|b| *b = 0xEE);

        // The three metadata copies.
        let block = self.metadata_block();
        assert!(block.len() <= 0x10000);
        for &offset in &FVE_OFFSETS {
            image[offset as usize..offset as usize + block.len()].copy_from_slice(&block);
        }
        image
    }

    fn encrypt_regions(&self, image: &mut [u8]) {
        let shadow_len = SHADOW_SECTORS as u64 * SECTOR as u64;
        let metadata_end = FVE_OFFSETS[2] + 0x10000;
        let mut offset = shadow_len;
        while offset < self.encrypted_size {
            let in_metadata = offset >= FVE_OFFSETS[0] && offset < metadata_end;
            if !in_metadata {
                let range = offset as usize..offset as usize + SECTOR;
                self.encrypt_sector(&mut image[range], offset);
            }
            offset += SECTOR as u64;
        }
    }

    fn encrypt_sector(&self, sector: &mut [u8], disk_offset: u64) {
        let key_entry = self.fvek_key_entry();
        match self.method {
            AES_128_CBC | AES_256_CBC => {
                cbc_encrypt_sector(&key_entry, sector, disk_offset);
            }
            AES_128_CBC_DIFFUSER | AES_256_CBC_DIFFUSER => {
                let half = key_entry.len() / 2;
                diffuser_encrypt_sector(
                    &key_entry[..half],
                    &key_entry[half..],
                    sector,
                    disk_offset,
                );
            }
            AES_128_XTS | AES_256_XTS => {
                let sector_number = disk_offset / SECTOR as u64;
                xts_encrypt_sector(&key_entry, sector, sector_number);
            }
            other => panic!("unknown method {other:#x}"),
        }
    }

    fn bitlocker_boot_sector(&self) -> [u8; SECTOR] {
        let mut boot = [0u8; SECTOR];
        boot[0..3].copy_from_slice(if self.version == 1 {
            &[0xEB, 0x52, 0x90]
        } else {
            &[0xEB, 0x58, 0x90]
        });
        boot[3..11].copy_from_slice(b"-FVE-FS-");
        boot[11..13].copy_from_slice(&(SECTOR as u16).to_le_bytes());
        boot[13] = 8;
        boot[40..48].copy_from_slice(&(VOLUME_SIZE / SECTOR as u64).to_le_bytes());
        let offsets_pos = if self.version == 1 { 56 } else { 176 };
        for (i, offset) in FVE_OFFSETS.iter().enumerate() {
            boot[offsets_pos + i * 8..offsets_pos + (i + 1) * 8]
                .copy_from_slice(&offset.to_le_bytes());
        }
        boot
    }

    fn metadata_block(&self) -> Vec<u8> {
        let mut dataset = Vec::new();
        dataset.extend(entry(0x0007, 0x0002, &utf16le("TESTBOX E: 01/01/2024")));
        for (i, config) in self.protectors.iter().enumerate() {
            dataset.extend(self.vmk_entry(config, i));
        }
        // FVEK wrapped by the VMK.
        let fvek_plaintext = entry(0x0000, 0x0001, &self.fvek_key_entry());
        dataset.extend(entry(
            0x0003,
            0x0005,
            &ccm_wrap(&VMK, &nonce_for(0xF0), &fvek_plaintext),
        ));
        if self.version == 1 {
            // Vista records the relocation in the dataset.
            let mut payload = Vec::new();
            payload.extend_from_slice(&SHADOW_OFFSET.to_le_bytes());
            payload.extend_from_slice(&(SHADOW_SECTORS as u64 * SECTOR as u64).to_le_bytes());
            dataset.extend(entry(0x000f, 0x000f, &payload));
        }

        let mut block = Vec::new();
        block.extend_from_slice(b"-FVE-FS-");
        block.extend_from_slice(&0u16.to_le_bytes());
        block.extend_from_slice(&self.version.to_le_bytes());
        block.extend_from_slice(&[0u8; 4]);
        block.extend_from_slice(&self.encrypted_size.to_le_bytes());
        block.extend_from_slice(&self.method.to_le_bytes());
        let header_sectors = if self.version == 1 { 0u32 } else { SHADOW_SECTORS };
        block.extend_from_slice(&header_sectors.to_le_bytes());
        for offset in FVE_OFFSETS {
            block.extend_from_slice(&offset.to_le_bytes());
        }
        let header_offset = if self.version == 1 { 0u64 } else { SHADOW_OFFSET };
        block.extend_from_slice(&header_offset.to_le_bytes());

        let metadata_size = (48 + dataset.len()) as u32;
        block.extend_from_slice(&metadata_size.to_le_bytes());
        block.extend_from_slice(&u32::from(self.version).to_le_bytes());
        block.extend_from_slice(&48u32.to_le_bytes());
        block.extend_from_slice(&metadata_size.to_le_bytes());
        block.extend_from_slice(&VOLUME_GUID.to_bytes_le());
        block.extend_from_slice(&self.nonce_counter.to_le_bytes());
        block.extend_from_slice(&[0u8; 4]);
        block.extend_from_slice(&0x01DA_4B2C_0000_0000u64.to_le_bytes());
        block.extend_from_slice(&dataset);
        block
    }

    fn vmk_entry(&self, config: &ProtectorConfig, index: usize) -> Vec<u8> {
        let guid = match config {
            ProtectorConfig::StartupKey { guid, .. } => *guid,
            _ => Uuid::from_u128(0x2000 + index as u128),
        };
        let vmk_plaintext = entry(0x0000, 0x0001, &VMK);

        let (protection, nested) = match config {
            ProtectorConfig::Recovery { password } => {
                let recovery_key = parse_recovery_password(password).unwrap();
                let salt = [0x51u8; 16];
                let intermediate = stretched(&recovery_key[..], &salt);
                let wrapped = entry(
                    0x0000,
                    0x0005,
                    &ccm_wrap(&intermediate, &nonce_for(index as u8), &vmk_plaintext),
                );
                let mut stretch_payload = salt.to_vec();
                stretch_payload.extend(wrapped);
                (0x0800u16, entry(0x0000, 0x0003, &stretch_payload))
            }
            ProtectorConfig::Password { password } => {
                let encoded: Vec<u8> = password
                    .encode_utf16()
                    .flat_map(|u| u.to_le_bytes())
                    .collect();
                let salt = [0x52u8; 16];
                let intermediate = stretched(&encoded, &salt);
                let wrapped = entry(
                    0x0000,
                    0x0005,
                    &ccm_wrap(&intermediate, &nonce_for(index as u8), &vmk_plaintext),
                );
                let mut stretch_payload = salt.to_vec();
                stretch_payload.extend(wrapped);
                (0x2000u16, entry(0x0000, 0x0003, &stretch_payload))
            }
            ProtectorConfig::StartupKey { key, .. } => {
                let wrapped = entry(
                    0x0000,
                    0x0005,
                    &ccm_wrap(key, &nonce_for(index as u8), &vmk_plaintext),
                );
                (0x0200u16, wrapped)
            }
            ProtectorConfig::ClearKey { key } => {
                let mut nested = entry(0x0000, 0x0001, key);
                nested.extend(entry(
                    0x0000,
                    0x0005,
                    &ccm_wrap(key, &nonce_for(index as u8), &vmk_plaintext),
                ));
                (0x0000u16, nested)
            }
            ProtectorConfig::Tpm => (0x0100u16, entry(0x0000, 0x0006, &[0x54; 16])),
        };

        let mut payload = Vec::new();
        payload.extend_from_slice(&guid.to_bytes_le());
        payload.extend_from_slice(&0x01DA_0000_0000_0000u64.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&protection.to_le_bytes());
        payload.extend_from_slice(&nested);
        entry(0x0002, 0x0008, &payload)
    }
}

/// Plaintext volume content: NTFS boot sector, MFT stub, patterned data.
pub fn plaintext_volume() -> Vec<u8> {
    let mut data: Vec<u8> = (0..VOLUME_SIZE as usize)
        .map(|i| ((i / SECTOR) as u8).wrapping_mul(7) ^ (i % 249) as u8)
        .collect();
    // NTFS boot sector.
    data[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
    data[3..11].copy_from_slice(b"NTFS    ");
    data[11..13].copy_from_slice(&(SECTOR as u16).to_le_bytes());
    data[13] = 8;
    data[40..48].copy_from_slice(&(VOLUME_SIZE / SECTOR as u64).to_le_bytes());
    // First MFT record signature at the second sector.
    data[0x200..0x204].copy_from_slice(b"FILE");
    data
}

pub fn entry(type_code: u16, value_type: u16, payload: &[u8]) -> Vec<u8> {
    let size = (8 + payload.len()) as u16;
    let mut raw = Vec::with_capacity(size as usize);
    raw.extend_from_slice(&size.to_le_bytes());
    raw.extend_from_slice(&type_code.to_le_bytes());
    raw.extend_from_slice(&value_type.to_le_bytes());
    raw.extend_from_slice(&1u16.to_le_bytes());
    raw.extend_from_slice(payload);
    raw
}

pub fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

pub fn nonce_for(tag: u8) -> [u8; 12] {
    let mut nonce = [0x30u8; 12];
    nonce[11] = tag;
    nonce
}

/// AES-CCM wrap: returns nonce || mac || ciphertext as stored on disk.
pub fn ccm_wrap(key: &[u8], nonce: &[u8; 12], plaintext: &[u8]) -> Vec<u8> {
    let nonce_ga = GenericArray::from_slice(nonce);
    let tagged = match key.len() {
        16 => Aes128Ccm::new_from_slice(key)
            .unwrap()
            .encrypt(nonce_ga, plaintext)
            .unwrap(),
        32 => Aes256Ccm::new_from_slice(key)
            .unwrap()
            .encrypt(nonce_ga, plaintext)
            .unwrap(),
        other => panic!("unsupported CCM key length {other}"),
    };
    let (ciphertext, mac) = tagged.split_at(tagged.len() - 16);
    let mut out = Vec::with_capacity(12 + 16 + ciphertext.len());
    out.extend_from_slice(nonce);
    out.extend_from_slice(mac);
    out.extend_from_slice(ciphertext);
    out
}

/// Stretches a credential the way the library does, for wrapping keys.
pub fn stretched(credential: &[u8], salt: &[u8; 16]) -> [u8; 32] {
    let initial_inner = Sha256::digest(credential);
    let mut initial = [0u8; 32];
    initial.copy_from_slice(&Sha256::digest(initial_inner));
    let crypto = RustCryptoProvider::new();
    let abort = AbortHandle::new();
    *stretch_key(&crypto, &initial, salt, &abort, 4096).unwrap()
}

fn ecb_encrypt(key: &[u8], block: &mut [u8; 16]) {
    let ga = GenericArray::from_mut_slice(block);
    match key.len() {
        16 => Aes128::new_from_slice(key).unwrap().encrypt_block(ga),
        32 => Aes256::new_from_slice(key).unwrap().encrypt_block(ga),
        other => panic!("unsupported AES key length {other}"),
    }
}

pub fn cbc_encrypt_sector(key: &[u8], sector: &mut [u8], disk_offset: u64) {
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(&disk_offset.to_le_bytes());
    ecb_encrypt(key, &mut iv);
    match key.len() {
        16 => {
            let mut enc = cbc::Encryptor::<Aes128>::new_from_slices(key, &iv).unwrap();
            for chunk in sector.chunks_exact_mut(16) {
                enc.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
            }
        }
        32 => {
            let mut enc = cbc::Encryptor::<Aes256>::new_from_slices(key, &iv).unwrap();
            for chunk in sector.chunks_exact_mut(16) {
                enc.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
            }
        }
        other => panic!("unsupported AES key length {other}"),
    }
}

pub fn xts_encrypt_sector(key: &[u8], sector: &mut [u8], sector_number: u64) {
    let tweak = get_tweak_default(u128::from(sector_number));
    match key.len() {
        32 => Xts128::new(
            Aes128::new_from_slice(&key[..16]).unwrap(),
            Aes128::new_from_slice(&key[16..]).unwrap(),
        )
        .encrypt_sector(sector, tweak),
        64 => Xts128::new(
            Aes256::new_from_slice(&key[..32]).unwrap(),
            Aes256::new_from_slice(&key[32..]).unwrap(),
        )
        .encrypt_sector(sector, tweak),
        other => panic!("unsupported XTS key length {other}"),
    }
}

const DIFFUSER_ROUNDS: usize = 5;
const DIFFUSER_A_SCHEDULE: [u32; 4] = [9, 0, 13, 0];
const DIFFUSER_B_SCHEDULE: [u32; 4] = [0, 10, 0, 25];

/// Sector encryption mirror of the library's diffuser decryption: XOR the
/// tweak-derived sector key, run the inverse diffusers, AES-CBC encrypt.
pub fn diffuser_encrypt_sector(fvek: &[u8], tweak: &[u8], sector: &mut [u8], disk_offset: u64) {
    for (i, chunk) in sector.chunks_mut(16).enumerate() {
        let mut block = [0u8; 16];
        block[..8].copy_from_slice(&disk_offset.to_le_bytes());
        block[8] = 0x80;
        block[15] = i as u8;
        ecb_encrypt(tweak, &mut block);
        for (byte, key) in chunk.iter_mut().zip(block.iter()) {
            *byte ^= key;
        }
    }

    let mut words: Vec<u32> = sector
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let n = words.len();
    // Diffuser A inverse: descending indices, subtraction.
    for _ in 0..DIFFUSER_ROUNDS {
        for i in (0..n).rev() {
            let mixed =
                words[(i + 2) % n] ^ words[(i + 5) % n].rotate_left(DIFFUSER_A_SCHEDULE[i % 4]);
            words[i] = words[i].wrapping_sub(mixed);
        }
    }
    // Diffuser B inverse: ascending indices, subtraction.
    for _ in 0..DIFFUSER_ROUNDS {
        for i in 0..n {
            let mixed =
                words[(i + 2) % n] ^ words[(i + 5) % n].rotate_left(DIFFUSER_B_SCHEDULE[i % 4]);
            words[i] = words[i].wrapping_sub(mixed);
        }
    }
    for (chunk, word) in sector.chunks_exact_mut(4).zip(words.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }

    cbc_encrypt_sector(fvek, sector, disk_offset);
}
