// SPDX-License-Identifier: GPL-3.0-only

//! Byte sizes as written in partition specs (`8MiB`, `1.5GiB`, `2048s`).

use std::fmt;
use std::str::FromStr;

use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Logical sector size assumed for image files
pub const SECTOR_SIZE: u64 = 512;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// Alignment boundary (1 MiB) where the first partition starts
pub const ALIGNMENT_BYTES: u64 = MIB;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizeParseError {
    #[error("'{0}' is not a number")]
    InvalidNumber(String),
    #[error("'{0}' has no unit")]
    MissingUnit(String),
    #[error("'{input}' has unknown unit '{unit}'")]
    UnknownUnit { input: String, unit: String },
    #[error("'{0}' does not fit in 64 bits")]
    Overflow(String),
}

/// Exact size in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteSize(u64);

impl ByteSize {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn mib(value: u64) -> Self {
        Self(value * MIB)
    }

    pub const fn gib(value: u64) -> Self {
        Self(value * GIB)
    }

    pub const fn bytes(self) -> u64 {
        self.0
    }

    pub const fn is_sector_aligned(self) -> bool {
        self.0 % SECTOR_SIZE == 0
    }

    /// Parse a bound the way `parted` reads it, where a bare number means megabytes.
    pub fn parse_parted(input: &str) -> Result<Self, SizeParseError> {
        Self::parse_parted_in(input, 1000 * 1000)
    }

    /// Like [`ByteSize::parse_parted`] after a `unit` command changed the
    /// meaning of bare numbers to `bare_unit` bytes each.
    pub fn parse_parted_in(input: &str, bare_unit: u64) -> Result<Self, SizeParseError> {
        parse_size(input, Some(bare_unit)).map(Self)
    }

    /// Human readable form with the exact byte count, e.g. `8MiB (8,388,608 bytes)`
    pub fn pretty(self) -> String {
        format!("{} ({} bytes)", self, self.0.to_formatted_string(&Locale::en))
    }
}

impl FromStr for ByteSize {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_size(s, None).map(Self)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(u64, &str); 4] = [(TIB, "TiB"), (GIB, "GiB"), (MIB, "MiB"), (KIB, "KiB")];
        if self.0 != 0 {
            for (unit, suffix) in UNITS {
                if self.0 % unit == 0 {
                    return write!(f, "{}{}", self.0 / unit, suffix);
                }
            }
        }
        write!(f, "{}B", self.0)
    }
}

/// Bytes per unit for the unit names `parted` understands
pub fn unit_multiplier(unit: &str) -> Option<u64> {
    let multiplier = match unit.to_ascii_lowercase().as_str() {
        "b" => 1,
        "s" => SECTOR_SIZE,
        "kb" => 1000,
        "mb" => 1000 * 1000,
        "gb" => 1000 * 1000 * 1000,
        "tb" => 1000 * 1000 * 1000 * 1000,
        "kib" => KIB,
        "mib" => MIB,
        "gib" => GIB,
        "tib" => TIB,
        _ => return None,
    };
    Some(multiplier)
}

/// Fractional values are floored to whole bytes.
fn parse_size(input: &str, bare_unit: Option<u64>) -> Result<u64, SizeParseError> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let multiplier = if unit.is_empty() {
        bare_unit.ok_or_else(|| SizeParseError::MissingUnit(input.to_string()))?
    } else {
        unit_multiplier(unit).ok_or_else(|| SizeParseError::UnknownUnit {
            input: input.to_string(),
            unit: unit.to_string(),
        })?
    };

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let digits_only = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty())
        || !digits_only(whole)
        || !digits_only(fraction)
        || fraction.len() > 18
    {
        return Err(SizeParseError::InvalidNumber(input.to_string()));
    }

    let overflow = || SizeParseError::Overflow(input.to_string());
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let mut bytes = whole.checked_mul(u128::from(multiplier)).ok_or_else(overflow)?;
    if !fraction.is_empty() {
        let numerator: u128 = fraction.parse().map_err(|_| overflow())?;
        let denominator = 10u128.pow(fraction.len() as u32);
        bytes = bytes
            .checked_add(numerator * u128::from(multiplier) / denominator)
            .ok_or_else(overflow)?;
    }

    u64::try_from(bytes).map_err(|_| overflow())
}
