//! Overlay identifiers.
//!
//! An [`Id`] is a fixed-width string of `DIGITS` base-`BASE` digits
//! (40 hex digits, 160 bits). Node identities and hashed object keys live
//! in the same space; routing resolves one digit of shared prefix per hop.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Number of digits in an identifier.
pub const DIGITS: usize = 40;

/// Digit alphabet size.
pub const BASE: u8 = 16;

/// A single identifier digit in `[0, BASE)`.
pub type Digit = u8;

/// Errors parsing an identifier from text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdParseError {
    /// Wrong number of digits.
    #[error("expected {expected} hex digits, got {got}")]
    BadLength {
        /// Required digit count.
        expected: usize,
        /// Digit count supplied.
        got: usize,
    },

    /// A character outside the hex alphabet.
    #[error("invalid hex digit {0:?}")]
    BadDigit(char),
}

/// A 160-bit overlay identifier: `DIGITS` digits in base `BASE`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id([Digit; DIGITS]);

impl Id {
    /// Creates an identifier from raw digits.
    ///
    /// Every digit must be below `BASE`.
    pub fn from_digits(digits: [Digit; DIGITS]) -> Self {
        debug_assert!(digits.iter().all(|d| *d < BASE));
        Self(digits)
    }

    /// Creates an identifier from 20 raw bytes, two digits per byte.
    pub fn from_bytes(bytes: [u8; DIGITS / 2]) -> Self {
        let mut digits = [0u8; DIGITS];
        for (i, b) in bytes.iter().enumerate() {
            digits[2 * i] = b >> 4;
            digits[2 * i + 1] = b & 0x0f;
        }
        Self(digits)
    }

    /// Hashes an application key into the identifier space.
    pub fn hash_of(key: &str) -> Self {
        let digest = blake3::hash(key.as_bytes());
        let mut bytes = [0u8; DIGITS / 2];
        bytes.copy_from_slice(&digest.as_bytes()[..DIGITS / 2]);
        Self::from_bytes(bytes)
    }

    /// Generates a uniformly random identifier.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; DIGITS / 2];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    /// Parses exactly `DIGITS` hex characters.
    pub fn from_hex(s: &str) -> Result<Self, IdParseError> {
        if s.chars().count() != DIGITS {
            return Err(IdParseError::BadLength {
                expected: DIGITS,
                got: s.chars().count(),
            });
        }
        Self::from_prefix(s)
    }

    /// Parses up to `DIGITS` hex characters, padding the remainder with
    /// zero digits. Handy for pinning prefix relationships in tests and on
    /// the command line.
    pub fn from_prefix(s: &str) -> Result<Self, IdParseError> {
        if s.chars().count() > DIGITS {
            return Err(IdParseError::BadLength {
                expected: DIGITS,
                got: s.chars().count(),
            });
        }
        let mut digits = [0u8; DIGITS];
        for (i, c) in s.chars().enumerate() {
            digits[i] = c.to_digit(BASE as u32).ok_or(IdParseError::BadDigit(c))? as u8;
        }
        Ok(Self(digits))
    }

    /// Packs the digits into 20 raw bytes, two digits per byte.
    pub fn to_bytes(&self) -> [u8; DIGITS / 2] {
        let mut bytes = [0u8; DIGITS / 2];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (self.0[2 * i] << 4) | self.0[2 * i + 1];
        }
        bytes
    }

    /// Returns the full lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Returns the digit at `index`.
    pub fn digit(&self, index: usize) -> Digit {
        self.0[index]
    }

    /// Returns the raw digit array.
    pub fn digits(&self) -> &[Digit; DIGITS] {
        &self.0
    }

    /// Length of the longest common prefix with `other`, in digits.
    ///
    /// Range `[0, DIGITS]`; `DIGITS` means the identifiers are equal.
    pub fn shared_prefix_len(&self, other: &Id) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Returns true iff `a` is strictly closer to `self` than `b`.
    ///
    /// Longer shared prefix wins; on a tie, digits are compared position by
    /// position by cyclic distance modulo `BASE`. Used to order entries
    /// within a routing-table slot relative to the local identifier.
    pub fn closer(&self, a: &Id, b: &Id) -> bool {
        if a == b {
            return false;
        }
        let la = self.shared_prefix_len(a);
        let lb = self.shared_prefix_len(b);
        if la != lb {
            return la > lb;
        }
        for i in la..DIGITS {
            let da = cyclic_distance(a.0[i], self.0[i]);
            let db = cyclic_distance(b.0[i], self.0[i]);
            if da != db {
                return da < db;
            }
        }
        false
    }

    /// Returns true iff `a` is a strictly better route toward `self`
    /// than `b`.
    ///
    /// Longer shared prefix wins; on a tie the suffixes after the prefix
    /// are compared as 160-bit magnitudes of their numeric distance to the
    /// target's suffix. An exact distance tie breaks toward the numerically
    /// smaller suffix so the relation stays a strict weak order.
    pub fn better_choice(&self, a: &Id, b: &Id) -> bool {
        if a == b {
            return false;
        }
        let la = self.shared_prefix_len(a);
        let lb = self.shared_prefix_len(b);
        if la != lb {
            return la > lb;
        }
        let from = la;
        let da = suffix_distance(self, a, from);
        let db = suffix_distance(self, b, from);
        match da[from..].cmp(&db[from..]) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => a.0[from..] < b.0[from..],
        }
    }
}

/// Distance between two digits on the cycle of `BASE` values.
fn cyclic_distance(a: Digit, b: Digit) -> u8 {
    let d = if a > b { a - b } else { b - a };
    d.min(BASE - d)
}

/// Digit-wise magnitude of `|other - target|` over positions
/// `[from, DIGITS)`, big-endian. Positions before `from` are zero.
fn suffix_distance(target: &Id, other: &Id, from: usize) -> [Digit; DIGITS] {
    let (hi, lo) = if other.0[from..] >= target.0[from..] {
        (other, target)
    } else {
        (target, other)
    };
    let mut out = [0u8; DIGITS];
    let mut borrow = 0i16;
    for i in (from..DIGITS).rev() {
        let mut d = hi.0[i] as i16 - lo.0[i] as i16 - borrow;
        if d < 0 {
            d += BASE as i16;
            borrow = 1;
        } else {
            borrow = 0;
        }
        out[i] = d as u8;
    }
    out
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

impl FromStr for Id {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Id::from_hex(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(prefix: &str) -> Id {
        Id::from_prefix(prefix).unwrap()
    }

    #[test]
    fn test_hex_roundtrip() {
        let original = Id::random();
        let parsed = Id::from_hex(&original.to_hex()).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(matches!(
            Id::from_hex("1225"),
            Err(IdParseError::BadLength { .. })
        ));
        let mut s = "g".to_string();
        s.push_str(&"0".repeat(DIGITS - 1));
        assert!(matches!(Id::from_hex(&s), Err(IdParseError::BadDigit('g'))));
    }

    #[test]
    fn test_from_bytes_digit_expansion() {
        let mut bytes = [0u8; DIGITS / 2];
        bytes[0] = 0xab;
        let id = Id::from_bytes(bytes);
        assert_eq!(id.digit(0), 0xa);
        assert_eq!(id.digit(1), 0xb);
        assert_eq!(id.digit(2), 0x0);
    }

    #[test]
    fn test_shared_prefix_len() {
        assert_eq!(id("1225").shared_prefix_len(&id("1230")), 2);
        assert_eq!(id("1225").shared_prefix_len(&id("0225")), 0);
        let a = id("1225");
        assert_eq!(a.shared_prefix_len(&a), DIGITS);
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(Id::hash_of("key1"), Id::hash_of("key1"));
        assert_ne!(Id::hash_of("key1"), Id::hash_of("key2"));
    }

    #[test]
    fn test_cyclic_distance_wraps() {
        assert_eq!(cyclic_distance(0, 15), 1);
        assert_eq!(cyclic_distance(15, 0), 1);
        assert_eq!(cyclic_distance(3, 11), 8);
        assert_eq!(cyclic_distance(7, 7), 0);
    }

    #[test]
    fn test_closer_prefers_longer_prefix() {
        let target = id("1225");
        assert!(target.closer(&id("1230"), &id("1310")));
        assert!(!target.closer(&id("1310"), &id("1230")));
    }

    #[test]
    fn test_closer_cyclic_tiebreak() {
        let target = id("1225");
        // Both share 3 digits; digit 3 is 5. Cyclic distance of 4 is 1,
        // of f is 6.
        assert!(target.closer(&id("1224"), &id("122f")));
        // Wraparound: against target digit 2, digit 0 is at distance 2
        // while digit e is at distance 4 going the short way round.
        let t2 = id("2000");
        assert!(t2.closer(&id("0000"), &id("e000")));
        assert!(t2.closer(&id("0000"), &id("7000")));
    }

    #[test]
    fn test_closer_is_irreflexive_and_antisymmetric() {
        let target = Id::random();
        for _ in 0..64 {
            let a = Id::random();
            let b = Id::random();
            assert!(!target.closer(&a, &a));
            if a != b {
                assert!(
                    target.closer(&a, &b) != target.closer(&b, &a)
                        || (!target.closer(&a, &b) && !target.closer(&b, &a))
                );
            }
        }
    }

    #[test]
    fn test_better_choice_prefers_longer_prefix() {
        let target = id("1033");
        assert!(target.better_choice(&id("1021"), &id("1310")));
        assert!(!target.better_choice(&id("1310"), &id("1021")));
    }

    #[test]
    fn test_better_choice_numeric_suffix() {
        let target = id("1033");
        // 1021 and 1010 both share the "10" prefix with 1033. Suffix
        // distances: |0x21.. - 0x33..| < |0x10.. - 0x33..|, so 1021 wins.
        assert!(target.better_choice(&id("1021"), &id("1010")));
        assert!(!target.better_choice(&id("1010"), &id("1021")));
    }

    #[test]
    fn test_better_choice_strict() {
        let target = Id::random();
        for _ in 0..64 {
            let a = Id::random();
            let b = Id::random();
            assert!(!target.better_choice(&a, &a));
            if a != b {
                // Exactly one direction may hold.
                assert!(!(target.better_choice(&a, &b) && target.better_choice(&b, &a)));
            }
        }
    }

    #[test]
    fn test_better_choice_exact_target() {
        let target = id("1033");
        // The target itself beats everything else.
        assert!(target.better_choice(&id("1033"), &id("1030")));
        assert!(!target.better_choice(&id("1030"), &id("1033")));
    }

    #[test]
    fn test_prefix_padding() {
        let a = id("1225");
        assert_eq!(a.digit(0), 1);
        assert_eq!(a.digit(3), 5);
        assert_eq!(a.digit(4), 0);
        assert_eq!(a.digit(DIGITS - 1), 0);
    }
}
