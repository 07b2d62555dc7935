//! Recovery password parsing and formatting.
//!
//! A recovery password is 48 decimal digits in eight groups of six. Each
//! group is the group's 16-bit key half-word multiplied by 11, so a valid
//! group is divisible by 11 and at most 720895. The eight 16-bit values,
//! little-endian, form the 128-bit binary recovery key.

use zeroize::Zeroizing;

use crate::error::{BdeError, Result};

/// Digits in a recovery password.
pub const RECOVERY_PASSWORD_DIGITS: usize = 48;

const GROUPS: usize = 8;
const GROUP_DIGITS: usize = 6;

/// Parses a recovery password into the 16-byte binary recovery key.
///
/// Accepts the bare 48 digits or the usual `-`-separated six-digit groups.
pub fn parse_recovery_password(input: &str) -> Result<Zeroizing<[u8; 16]>> {
    let mut digits = String::with_capacity(RECOVERY_PASSWORD_DIGITS);
    for c in input.chars() {
        match c {
            '0'..='9' => digits.push(c),
            '-' => {}
            other => {
                return Err(BdeError::InvalidCredential(format!(
                    "unexpected character {other:?} in recovery password"
                )))
            }
        }
    }
    if digits.len() != RECOVERY_PASSWORD_DIGITS {
        return Err(BdeError::InvalidCredential(format!(
            "recovery password has {} digits, expected {RECOVERY_PASSWORD_DIGITS}",
            digits.len()
        )));
    }

    let mut key = Zeroizing::new([0u8; 16]);
    for group in 0..GROUPS {
        let text = &digits[group * GROUP_DIGITS..(group + 1) * GROUP_DIGITS];
        let value: u32 = text
            .parse()
            .expect("six decimal digits always parse as u32");
        if value % 11 != 0 {
            return Err(BdeError::InvalidCredential(format!(
                "recovery password group {} ({value}) is not divisible by 11",
                group + 1
            )));
        }
        let word = value / 11;
        if word > u32::from(u16::MAX) {
            return Err(BdeError::InvalidCredential(format!(
                "recovery password group {} ({value}) exceeds 16 bits",
                group + 1
            )));
        }
        key[group * 2..group * 2 + 2].copy_from_slice(&(word as u16).to_le_bytes());
    }
    Ok(key)
}

/// Formats a 16-byte binary recovery key back into the 48-digit form.
pub fn format_recovery_password(key: &[u8; 16]) -> String {
    let groups: Vec<String> = key
        .chunks_exact(2)
        .map(|chunk| {
            let word = u32::from(u16::from_le_bytes([chunk[0], chunk[1]]));
            format!("{:06}", word * 11)
        })
        .collect();
    groups.join("-")
}
