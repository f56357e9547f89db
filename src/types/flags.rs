//! Range query flags.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::error::{IndexError, Result};

/// Bitmask selecting what a range cursor materializes and whether it
/// deletes the entries it visits.
///
/// Bits other than [`RangeFlags::KEYS`], [`RangeFlags::VALS`] and
/// [`RangeFlags::DELETE`] are reserved; a cursor refuses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RangeFlags(u8);

impl RangeFlags {
    /// No keys, no values, no deletion
    pub const NONE: RangeFlags = RangeFlags(0);
    /// Materialize the key of each visited entry
    pub const KEYS: RangeFlags = RangeFlags(1 << 0);
    /// Materialize the (resolved) value of each visited entry
    pub const VALS: RangeFlags = RangeFlags(1 << 1);
    /// Remove each visited entry from the tree
    pub const DELETE: RangeFlags = RangeFlags(1 << 2);

    /// Every bit with a defined meaning
    pub const ALL: RangeFlags = RangeFlags(Self::KEYS.0 | Self::VALS.0 | Self::DELETE.0);

    /// Wrap raw bits, keeping reserved bits so that [`validate`](Self::validate)
    /// can reject them.
    pub const fn from_bits_retain(bits: u8) -> Self {
        Self(bits)
    }

    /// Parse raw bits, failing on reserved bits.
    pub fn from_bits(bits: u8) -> Result<Self> {
        let flags = Self(bits);
        flags.validate()?;
        Ok(flags)
    }

    /// Raw bit value
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub const fn contains(self, other: RangeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Reject reserved bits
    pub fn validate(self) -> Result<()> {
        if self.0 & !Self::ALL.0 != 0 {
            return Err(IndexError::UnsupportedFlags {
                bits: self.0,
                reason: "reserved flag bits are set",
            });
        }
        Ok(())
    }

    /// Whether visited keys are materialized
    pub const fn keys(self) -> bool {
        self.contains(Self::KEYS)
    }

    /// Whether visited values are materialized
    pub const fn values(self) -> bool {
        self.contains(Self::VALS)
    }

    /// Whether visited entries are deleted
    pub const fn deletes(self) -> bool {
        self.contains(Self::DELETE)
    }
}

impl BitOr for RangeFlags {
    type Output = RangeFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        RangeFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for RangeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<RangeFlags> for u8 {
    fn from(flags: RangeFlags) -> Self {
        flags.0
    }
}

impl fmt::Display for RangeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.keys() {
            names.push("KEYS");
        }
        if self.values() {
            names.push("VALS");
        }
        if self.deletes() {
            names.push("DELETE");
        }
        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_values() {
        assert_eq!(RangeFlags::KEYS.bits(), 1);
        assert_eq!(RangeFlags::VALS.bits(), 2);
        assert_eq!(RangeFlags::DELETE.bits(), 4);
    }

    #[test]
    fn test_flags_combine() {
        let flags = RangeFlags::KEYS | RangeFlags::DELETE;
        assert!(flags.keys());
        assert!(!flags.values());
        assert!(flags.deletes());
        assert_eq!(flags.to_string(), "KEYS|DELETE");
        assert_eq!(RangeFlags::NONE.to_string(), "NONE");
    }

    #[test]
    fn test_reserved_bits_rejected() {
        assert!(RangeFlags::from_bits(0b111).is_ok());
        let err = RangeFlags::from_bits(0b1000).unwrap_err();
        assert!(matches!(err, IndexError::UnsupportedFlags { bits: 0b1000, .. }));
        assert!(RangeFlags::from_bits_retain(0x80).validate().is_err());
    }
}
