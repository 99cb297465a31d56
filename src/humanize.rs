//! Human-readable byte sizes for config values and log fields

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const KIB: u64 = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid size format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),

    #[error("Size out of range: {0}")]
    Overflow(String),
}

/// Byte count that parses from `"1MB"`-style strings or plain integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const fn kib(n: u64) -> Self {
        ByteSize(n * KIB)
    }

    pub const fn mib(n: u64) -> Self {
        ByteSize(n * KIB * KIB)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Saturates on targets where `usize` is narrower than the value
    pub fn as_usize(&self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }

    /// Largest unit that keeps the value >= 1, with one decimal when needed
    pub fn to_human_readable(&self) -> String {
        const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

        let mut unit = 0;
        let mut divisor = 1u64;
        while unit + 1 < UNITS.len() && self.0 >= divisor * KIB {
            divisor *= KIB;
            unit += 1;
        }

        let whole = self.0 / divisor;
        let tenths = (self.0 % divisor) * 10 / divisor;
        if tenths == 0 {
            format!("{whole}{}", UNITS[unit])
        } else {
            format!("{whole}.{tenths}{}", UNITS[unit])
        }
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ByteSizeVisitor;

        impl serde::de::Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a byte size as string (e.g., \"1MB\") or non-negative integer")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(ByteSize(v))
            }

            // config-rs hands integers over as i64
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::custom(format!("byte size cannot be negative: {v}")))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse::<ByteSize>().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

impl FromStr for ByteSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();

        let split = normalized
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(normalized.len());
        let (num_str, unit) = normalized.split_at(split);
        if num_str.is_empty() {
            return Err(ParseError::InvalidFormat(s.to_string()));
        }

        let num: u64 = num_str.parse()?;
        let multiplier: u64 = match unit.trim() {
            "" | "B" => 1,
            "K" | "KB" | "KIB" => KIB,
            "M" | "MB" | "MIB" => KIB.pow(2),
            "G" | "GB" | "GIB" => KIB.pow(3),
            "T" | "TB" | "TIB" => KIB.pow(4),
            other => return Err(ParseError::InvalidUnit(other.to_string())),
        };

        num.checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| ParseError::Overflow(s.to_string()))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_human_readable())
    }
}
