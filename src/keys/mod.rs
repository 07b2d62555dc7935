// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 BdeVault Contributors
//! The key-protector unwrap chain.
//!
//! Credentials supplied by the caller are matched against the VMK protector
//! entries strictly by protection type: a recovery password only ever tries
//! recovery-password protectors, a user password only password protectors,
//! and so on. The first protector that unwraps yields the volume master
//! key, which in turn unwraps the full volume encryption key.

pub mod bek;
pub mod recovery;

use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::stretch::{stretch_key, AbortHandle};
use crate::crypto::{CryptoError, CryptoProvider};
use crate::error::{BdeError, Result};
use crate::metadata::entry::{parse_dataset, WrappedKey};
use crate::metadata::vmk::{ProtectionType, VmkValue};
use crate::metadata::{EncryptionMethod, MetadataBlock};

pub use bek::StartupKeyFile;
pub use recovery::{format_recovery_password, parse_recovery_password};

/// The unwrapped full volume encryption key, split per cipher mode.
///
/// Dropped key material is zeroised.
pub struct Fvek {
    method: EncryptionMethod,
    key: Zeroizing<Vec<u8>>,
    tweak: Option<Zeroizing<Vec<u8>>>,
}

impl Fvek {
    /// Builds an FVEK from the plaintext key-entry bytes of the FVEK entry.
    pub fn from_key_entry(method: EncryptionMethod, data: &[u8]) -> Result<Self> {
        if data.len() != method.key_length() {
            return Err(BdeError::corrupt(
                0,
                format!(
                    "FVEK of {} bytes does not fit {method} (expected {})",
                    data.len(),
                    method.key_length()
                ),
            ));
        }
        if method.uses_diffuser() {
            let half = data.len() / 2;
            Ok(Self {
                method,
                key: Zeroizing::new(data[..half].to_vec()),
                tweak: Some(Zeroizing::new(data[half..].to_vec())),
            })
        } else {
            Ok(Self {
                method,
                key: Zeroizing::new(data.to_vec()),
                tweak: None,
            })
        }
    }

    /// Builds an FVEK from caller-supplied raw key material.
    pub fn from_raw(
        method: EncryptionMethod,
        key: &[u8],
        tweak: Option<&[u8]>,
    ) -> Result<Self> {
        let expected = if method.uses_diffuser() {
            method.key_length() / 2
        } else {
            method.key_length()
        };
        if key.len() != expected {
            return Err(BdeError::InvalidCredential(format!(
                "key of {} bytes does not fit {method} (expected {expected})",
                key.len()
            )));
        }
        let tweak = match (method.uses_diffuser(), tweak) {
            (true, Some(t)) => {
                if t.len() != expected {
                    return Err(BdeError::InvalidCredential(format!(
                        "tweak key of {} bytes does not fit {method} (expected {expected})",
                        t.len()
                    )));
                }
                Some(Zeroizing::new(t.to_vec()))
            }
            (true, None) => {
                return Err(BdeError::InvalidCredential(
                    "diffuser methods require a tweak key".into(),
                ))
            }
            (false, Some(_)) => {
                return Err(BdeError::InvalidCredential(format!(
                    "{method} takes no tweak key"
                )))
            }
            (false, None) => None,
        };
        Ok(Self {
            method,
            key: Zeroizing::new(key.to_vec()),
            tweak,
        })
    }

    pub fn method(&self) -> EncryptionMethod {
        self.method
    }

    /// The sector cipher key (for XTS, both halves).
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The diffuser tweak key, present only for diffuser methods.
    pub fn tweak(&self) -> Option<&[u8]> {
        self.tweak.as_deref().map(|v| v.as_slice())
    }
}

impl std::fmt::Debug for Fvek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fvek")
            .field("method", &self.method)
            .field("key", &"[REDACTED]")
            .field("tweak", &self.tweak.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Credentials accumulated on a volume before `unlock`.
#[derive(Default)]
pub struct CredentialSet {
    /// Binary recovery key decoded from the 48-digit password.
    pub recovery_key: Option<Zeroizing<[u8; 16]>>,

    /// User password, hashed as UTF-16LE.
    pub password: Option<Zeroizing<String>>,

    /// Parsed startup-key file.
    pub startup_key: Option<StartupKeyFile>,

    /// Raw FVEK (and tweak) bypassing the protector chain entirely.
    pub raw_key: Option<(Zeroizing<Vec<u8>>, Option<Zeroizing<Vec<u8>>>)>,
}

impl CredentialSet {
    pub fn is_empty(&self) -> bool {
        self.recovery_key.is_none()
            && self.password.is_none()
            && self.startup_key.is_none()
            && self.raw_key.is_none()
    }
}

/// Shared state threaded through one unlock attempt.
pub struct UnlockContext<'a> {
    pub crypto: &'a dyn CryptoProvider,
    pub abort: &'a AbortHandle,
    pub abort_poll_interval: u32,
}

/// Decodes a hex string into bytes.
pub fn decode_hex(s: &str) -> Result<Zeroizing<Vec<u8>>> {
    if s.len() % 2 != 0 {
        return Err(BdeError::InvalidCredential(
            "hex string of odd length".into(),
        ));
    }
    let mut out = Zeroizing::new(Vec::with_capacity(s.len() / 2));
    for i in (0..s.len()).step_by(2) {
        let byte = u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| {
            BdeError::InvalidCredential(format!("invalid hex at position {i}"))
        })?;
        out.push(byte);
    }
    Ok(out)
}

/// `SHA-256(SHA-256(input))`, the initial value of the stretch state.
fn double_hash(crypto: &dyn CryptoProvider, input: &[u8]) -> Zeroizing<[u8; 32]> {
    let first = Zeroizing::new(crypto.sha256(input));
    Zeroizing::new(crypto.sha256(&first[..]))
}

/// Encodes a password the way BitLocker hashes it.
fn password_utf16le(password: &str) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(
        password
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect(),
    )
}

/// Unwraps an AES-CCM wrapped key and extracts the nested key entry.
fn unwrap_key_entry(
    crypto: &dyn CryptoProvider,
    unwrap_key: &[u8],
    wrapped: &WrappedKey,
) -> Result<Option<Zeroizing<Vec<u8>>>> {
    let plaintext = match crypto.aes_ccm_decrypt_verify(
        unwrap_key,
        &wrapped.nonce,
        &wrapped.ciphertext,
        &wrapped.mac,
    ) {
        Ok(plaintext) => plaintext,
        Err(CryptoError::AuthenticationFailed) => return Ok(None),
        Err(err) => return Err(BdeError::corrupt(0, err.to_string())),
    };

    let entries = parse_dataset(&plaintext, 0)?;
    let key = entries
        .iter()
        .find_map(|e| e.as_key())
        .map(|k| Zeroizing::new(k.to_vec()));
    Ok(key)
}

/// Derives the unwrap key for one protector from the matching credential.
///
/// Returns `None` when the credential kind does not match the protector.
fn protector_unwrap_key(
    vmk: &VmkValue,
    credentials: &CredentialSet,
    ctx: &UnlockContext<'_>,
) -> Result<Option<(Zeroizing<Vec<u8>>, &'static str)>> {
    match vmk.protection_type {
        ProtectionType::RecoveryPassword => {
            let Some(recovery_key) = &credentials.recovery_key else {
                return Ok(None);
            };
            let Some(stretch) = vmk.stretch_key() else {
                debug!(protector = %vmk.identifier, "recovery protector lacks stretch key");
                return Ok(None);
            };
            let initial = double_hash(ctx.crypto, &recovery_key[..]);
            let key = stretch_key(
                ctx.crypto,
                &initial,
                &stretch.salt,
                ctx.abort,
                ctx.abort_poll_interval,
            )?;
            Ok(Some((Zeroizing::new(key.to_vec()), "recovery password")))
        }
        ProtectionType::Password => {
            let Some(password) = &credentials.password else {
                return Ok(None);
            };
            let Some(stretch) = vmk.stretch_key() else {
                debug!(protector = %vmk.identifier, "password protector lacks stretch key");
                return Ok(None);
            };
            let encoded = password_utf16le(password);
            let initial = double_hash(ctx.crypto, &encoded);
            let key = stretch_key(
                ctx.crypto,
                &initial,
                &stretch.salt,
                ctx.abort,
                ctx.abort_poll_interval,
            )?;
            Ok(Some((Zeroizing::new(key.to_vec()), "password")))
        }
        ProtectionType::StartupKey => {
            let Some(startup) = &credentials.startup_key else {
                return Ok(None);
            };
            if startup.identifier != vmk.identifier {
                debug!(
                    protector = %vmk.identifier,
                    startup_key = %startup.identifier,
                    "startup key identifier does not match protector"
                );
                return Ok(None);
            }
            Ok(Some((startup.key.clone(), "startup key")))
        }
        ProtectionType::ClearKey => {
            let Some(clear) = vmk.clear_key() else {
                debug!(protector = %vmk.identifier, "clear-key protector carries no key");
                return Ok(None);
            };
            Ok(Some((Zeroizing::new(clear.to_vec()), "clear key")))
        }
        other => {
            if other.requires_tpm() {
                debug!(protector = %vmk.identifier, protection = %other, "TPM protector skipped");
            } else {
                debug!(protector = %vmk.identifier, protection = %other, "unsupported protector skipped");
            }
            Ok(None)
        }
    }
}

/// Walks the VMK protectors and unwraps the volume master key.
///
/// Clear-key protectors are always eligible, so a transitional volume
/// unlocks with no credentials at all.
pub fn unwrap_vmk(
    block: &MetadataBlock,
    credentials: &CredentialSet,
    ctx: &UnlockContext<'_>,
) -> Result<Zeroizing<Vec<u8>>> {
    for vmk in block.vmks() {
        let Some((unwrap_key, kind)) = protector_unwrap_key(vmk, credentials, ctx)? else {
            continue;
        };

        let wrapped = vmk
            .stretch_key()
            .and_then(|s| s.wrapped_key())
            .or_else(|| vmk.wrapped_key());
        let Some(wrapped) = wrapped else {
            debug!(protector = %vmk.identifier, "protector carries no wrapped key");
            continue;
        };

        match unwrap_key_entry(ctx.crypto, &unwrap_key, wrapped)? {
            Some(vmk_bytes) => {
                debug!(protector = %vmk.identifier, kind, "volume master key unwrapped");
                return Ok(vmk_bytes);
            }
            None => {
                debug!(protector = %vmk.identifier, kind, "unwrap failed, trying next protector");
            }
        }
    }
    Err(BdeError::UnlockFailed)
}

/// Unwraps the FVEK entry with the volume master key.
pub fn unwrap_fvek(
    block: &MetadataBlock,
    vmk: &[u8],
    crypto: &dyn CryptoProvider,
) -> Result<Fvek> {
    let wrapped = block
        .fvek()
        .ok_or_else(|| BdeError::corrupt(block.disk_offset, "metadata has no FVEK entry"))?;
    let key_bytes = unwrap_key_entry(crypto, vmk, wrapped)?
        .ok_or(BdeError::UnlockFailed)?;
    Fvek::from_key_entry(block.header.encryption_method, &key_bytes)
}
