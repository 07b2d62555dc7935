// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 BdeVault Contributors
//! BdeVault - read-only access to BitLocker Drive Encryption volumes
//!
//! This library parses the FVE (Full Volume Encryption) metadata of a
//! BitLocker volume, unwraps the volume master key and full volume
//! encryption key from a caller-supplied credential, and exposes the
//! decrypted volume as a seekable byte stream.
//!
//! # Features
//!
//! - **All historical cipher modes**: AES-CBC with and without the
//!   Vista/Windows 7 Elephant diffuser, and AES-XTS (Windows 10+)
//! - **All offline credentials**: recovery password, user password,
//!   startup-key (`.BEK`) file, clear key, and raw FVEK material
//! - **Redundant metadata**: a corrupt FVE copy is recovered from the
//!   remaining two
//! - **Memory hygiene**: key material is zeroised on drop
//! - **Cancellation**: the million-round key stretch polls an abort flag
//!
//! Write support, TPM attestation, and FAT-era BitLocker To Go metadata
//! are out of scope.
//!
//! # Example
//!
//! ```no_run
//! use bdevault::{Result, Volume};
//!
//! fn dump_boot_sector() -> Result<()> {
//!     let mut volume = Volume::open_path("evidence/volume.img")?;
//!     volume.set_recovery_password(
//!         "471207-278498-422125-177177-561902-537405-468559-103230",
//!     )?;
//!     volume.unlock()?;
//!
//!     let mut boot = [0u8; 512];
//!     volume.read_at(0, &mut boot)?;
//!     assert_eq!(&boot[3..11], b"NTFS    ");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod io;
pub mod keys;
pub mod metadata;
pub mod ntfs;
pub mod volume;

// Re-export commonly used types
pub use config::VolumeOptions;
pub use crypto::{AbortHandle, CryptoProvider, RustCryptoProvider};
pub use error::{BdeError, Result};
pub use io::{ByteSource, FileSource, SliceSource};
pub use keys::{format_recovery_password, parse_recovery_password, StartupKeyFile};
pub use metadata::{EncryptionMethod, KeyProtectorInfo, ProtectionType};
pub use volume::{UnlockState, Volume};
