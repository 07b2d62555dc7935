//! Volume master key entries and key-protector descriptions.

use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::io::ByteReader;
use crate::metadata::entry::{parse_dataset, Entry, EntryValue, StretchKeyValue, WrappedKey};

/// How a VMK copy is protected.
///
/// The code is a bit set: TPM 0x0100, startup key 0x0200, PIN 0x0400.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionType {
    /// Unprotected: the wrap key is stored in the clear (suspended volumes).
    ClearKey,
    Tpm,
    StartupKey,
    TpmAndStartupKey,
    TpmAndPin,
    TpmAndPinAndStartupKey,
    RecoveryPassword,
    Password,
    Unknown(u16),
}

impl ProtectionType {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => Self::ClearKey,
            0x0100 => Self::Tpm,
            0x0200 => Self::StartupKey,
            0x0300 => Self::TpmAndStartupKey,
            0x0500 => Self::TpmAndPin,
            0x0700 => Self::TpmAndPinAndStartupKey,
            0x0800 => Self::RecoveryPassword,
            0x2000 => Self::Password,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::ClearKey => 0x0000,
            Self::Tpm => 0x0100,
            Self::StartupKey => 0x0200,
            Self::TpmAndStartupKey => 0x0300,
            Self::TpmAndPin => 0x0500,
            Self::TpmAndPinAndStartupKey => 0x0700,
            Self::RecoveryPassword => 0x0800,
            Self::Password => 0x2000,
            Self::Unknown(code) => code,
        }
    }

    /// Whether unwrapping requires TPM attestation, which this library
    /// never performs.
    pub fn requires_tpm(self) -> bool {
        self.code() & 0x0100 != 0
    }
}

impl std::fmt::Display for ProtectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClearKey => f.write_str("clear key"),
            Self::Tpm => f.write_str("TPM"),
            Self::StartupKey => f.write_str("startup key"),
            Self::TpmAndStartupKey => f.write_str("TPM and startup key"),
            Self::TpmAndPin => f.write_str("TPM and PIN"),
            Self::TpmAndPinAndStartupKey => f.write_str("TPM, PIN and startup key"),
            Self::RecoveryPassword => f.write_str("recovery password"),
            Self::Password => f.write_str("password"),
            Self::Unknown(code) => write!(f, "unknown ({code:#06x})"),
        }
    }
}

/// A parsed volume master key entry: one protector's wrap of the VMK.
#[derive(Debug, Clone)]
pub struct VmkValue {
    /// Protector identifier; startup keys match on this GUID.
    pub identifier: Uuid,

    /// Last modification time as a FILETIME.
    pub last_modified: u64,

    /// How this copy of the VMK is wrapped.
    pub protection_type: ProtectionType,

    /// Nested entries carrying the wrap material.
    pub entries: Vec<Entry>,
}

impl VmkValue {
    /// Parses a VMK entry payload located at `disk_offset`.
    pub fn parse(payload: &[u8], disk_offset: u64) -> Result<Self> {
        let mut r = ByteReader::new(payload, disk_offset);
        let identifier = r.guid()?;
        let last_modified = r.filetime()?;
        r.skip(2)?;
        let protection_code = r.u16_le()?;
        let protection_type = ProtectionType::from_code(protection_code);
        if let ProtectionType::Unknown(code) = protection_type {
            debug!(
                offset = disk_offset,
                code = format_args!("{code:#06x}"),
                "unknown VMK protection type"
            );
        }

        let rest = r.bytes(r.remaining())?;
        let entries = parse_dataset(rest, r.disk_offset() - rest.len() as u64)?;

        Ok(Self {
            identifier,
            last_modified,
            protection_type,
            entries,
        })
    }

    /// The stretch-key record for password-class protectors.
    pub fn stretch_key(&self) -> Option<&StretchKeyValue> {
        self.entries.iter().find_map(|e| match &e.value {
            EntryValue::StretchKey(stretch) => Some(stretch),
            _ => None,
        })
    }

    /// The wrapped VMK itself (the top-level AES-CCM entry).
    pub fn wrapped_key(&self) -> Option<&WrappedKey> {
        self.entries.iter().find_map(|e| e.as_wrapped_key())
    }

    /// The stored clear key for unprotected volumes.
    pub fn clear_key(&self) -> Option<&[u8]> {
        self.entries.iter().find_map(|e| e.as_key())
    }
}

/// An external key, as found in startup-key (`.BEK`) files and
/// startup-key protectors.
#[derive(Debug, Clone)]
pub struct ExternalKeyValue {
    /// Identifier matched against the VMK entry's identifier.
    pub identifier: Uuid,

    /// Last modification time as a FILETIME.
    pub last_modified: u64,

    /// Nested entries; the raw key lives here.
    pub entries: Vec<Entry>,
}

impl ExternalKeyValue {
    /// Parses an external-key payload located at `disk_offset`.
    pub fn parse(payload: &[u8], disk_offset: u64) -> Result<Self> {
        let mut r = ByteReader::new(payload, disk_offset);
        let identifier = r.guid()?;
        let last_modified = r.filetime()?;
        let rest = r.bytes(r.remaining())?;
        let entries = parse_dataset(rest, r.disk_offset() - rest.len() as u64)?;
        Ok(Self {
            identifier,
            last_modified,
            entries,
        })
    }

    /// The raw key bytes.
    pub fn key(&self) -> Option<&[u8]> {
        self.entries.iter().find_map(|e| e.as_key())
    }
}

/// Caller-facing description of one key protector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyProtectorInfo {
    /// Protector identifier GUID.
    pub identifier: Uuid,
    /// Protection type of this protector.
    pub protection_type: ProtectionType,
}
