//! CUIT identifiers.
//!
//! A CUIT (Clave Única de Identificación Tributaria) identifies a
//! contributor before the fiscal authority. Cache keys embed the canonical
//! hyphenated form (`XX-XXXXXXXX-X`), so parsing and display must agree
//! exactly or pattern invalidation misses entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Mod-11 weights for the CUIT check digit, applied to the first ten digits.
const CHECK_WEIGHTS: [u32; 10] = [5, 4, 3, 2, 7, 6, 5, 4, 3, 2];

/// Error type for CUIT parsing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CuitError {
    #[error("CUIT must contain exactly 11 digits, got {count}")]
    WrongLength { count: usize },

    #[error("CUIT contains a non-digit character: {found}")]
    InvalidCharacter { found: char },

    #[error("CUIT check digit mismatch: expected {expected}, got {got}")]
    CheckDigit { expected: u32, got: u32 },
}

/// A validated CUIT.
///
/// Construction goes through [`Cuit::parse`], which accepts both the
/// hyphenated (`20-12345678-9`) and the bare (`20123456789`) forms and
/// verifies the mod-11 check digit. The canonical rendering is always
/// hyphenated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cuit {
    digits: [u8; 11],
}

impl Cuit {
    /// Parse a CUIT from a string, verifying the check digit.
    pub fn parse(input: &str) -> Result<Self, CuitError> {
        let mut digits = [0u8; 11];
        let mut count = 0usize;

        for ch in input.chars() {
            if ch == '-' {
                continue;
            }
            let d = ch
                .to_digit(10)
                .ok_or(CuitError::InvalidCharacter { found: ch })?;
            if count < 11 {
                digits[count] = d as u8;
            }
            count += 1;
        }

        if count != 11 {
            return Err(CuitError::WrongLength { count });
        }

        let expected = Self::check_digit(&digits[0..10]);
        let got = digits[10] as u32;
        if expected != got {
            return Err(CuitError::CheckDigit { expected, got });
        }

        Ok(Self { digits })
    }

    /// Compute the mod-11 check digit for the first ten digits.
    fn check_digit(prefix: &[u8]) -> u32 {
        let sum: u32 = prefix
            .iter()
            .zip(CHECK_WEIGHTS.iter())
            .map(|(d, w)| *d as u32 * w)
            .sum();
        match 11 - (sum % 11) {
            11 => 0,
            10 => 9,
            d => d,
        }
    }

    /// Build a CUIT from its ten leading digits, deriving the check digit.
    ///
    /// Useful in tests and fixtures where a syntactically valid CUIT is
    /// needed without hand-computing the checksum.
    pub fn from_prefix(prefix: [u8; 10]) -> Self {
        let mut digits = [0u8; 11];
        digits[0..10].copy_from_slice(&prefix);
        digits[10] = Self::check_digit(&prefix) as u8;
        Self { digits }
    }

    /// The two-digit kind prefix (20, 23, 27, 30, 33, ...).
    pub fn kind(&self) -> u32 {
        self.digits[0] as u32 * 10 + self.digits[1] as u32
    }
}

impl fmt::Display for Cuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}-{}{}{}{}{}{}{}{}-{}",
            self.digits[0],
            self.digits[1],
            self.digits[2],
            self.digits[3],
            self.digits[4],
            self.digits[5],
            self.digits[6],
            self.digits[7],
            self.digits[8],
            self.digits[9],
            self.digits[10],
        )
    }
}

impl FromStr for Cuit {
    type Err = CuitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Cuit {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cuit {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hyphenated() {
        let cuit = Cuit::parse("20-12345678-6").expect("parse should succeed");
        assert_eq!(cuit.to_string(), "20-12345678-6");
        assert_eq!(cuit.kind(), 20);
    }

    #[test]
    fn test_parse_bare() {
        let hyphenated = Cuit::parse("20-12345678-6").expect("parse should succeed");
        let bare = Cuit::parse("20123456786").expect("parse should succeed");
        assert_eq!(hyphenated, bare);
    }

    #[test]
    fn test_wrong_length() {
        assert_eq!(
            Cuit::parse("20-1234567-6"),
            Err(CuitError::WrongLength { count: 10 })
        );
        assert_eq!(
            Cuit::parse("20-123456789-6"),
            Err(CuitError::WrongLength { count: 12 })
        );
    }

    #[test]
    fn test_invalid_character() {
        assert_eq!(
            Cuit::parse("20-1234567a-6"),
            Err(CuitError::InvalidCharacter { found: 'a' })
        );
    }

    #[test]
    fn test_check_digit_rejected() {
        let err = Cuit::parse("20-12345678-5").expect_err("check digit must be verified");
        assert!(matches!(err, CuitError::CheckDigit { .. }));
    }

    #[test]
    fn test_from_prefix_round_trips() {
        let cuit = Cuit::from_prefix([2, 0, 1, 2, 3, 4, 5, 6, 7, 8]);
        let reparsed = Cuit::parse(&cuit.to_string()).expect("parse should succeed");
        assert_eq!(cuit, reparsed);
    }

    #[test]
    fn test_serde_round_trip() {
        let cuit = Cuit::from_prefix([2, 7, 9, 8, 7, 6, 5, 4, 3, 2]);
        let json = serde_json::to_string(&cuit).expect("serialize should succeed");
        let back: Cuit = serde_json::from_str(&json).expect("deserialize should succeed");
        assert_eq!(cuit, back);
    }
}
