//! TDS protocol versions.

use std::fmt;

/// A TDS protocol version as carried in LOGIN7 and LOGINACK.
///
/// The raw value is the big-endian interpretation of the LOGINACK field,
/// e.g. `0x74000004` for TDS 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TdsVersion(u32);

impl TdsVersion {
    /// TDS 7.1 (SQL Server 2000 SP1).
    pub const V7_1: Self = Self(0x7100_0001);
    /// TDS 7.2 (SQL Server 2005).
    pub const V7_2: Self = Self(0x7209_0002);
    /// TDS 7.3A (SQL Server 2008).
    pub const V7_3A: Self = Self(0x730A_0003);
    /// TDS 7.3B (SQL Server 2008 R2).
    pub const V7_3B: Self = Self(0x730B_0003);
    /// TDS 7.4 (SQL Server 2012 and later).
    pub const V7_4: Self = Self(0x7400_0004);

    /// Wrap a raw version number.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw version number.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Major protocol version (`7`).
    #[must_use]
    pub const fn major(self) -> u8 {
        (self.0 >> 28) as u8
    }

    /// Minor protocol version.
    #[must_use]
    pub const fn minor(self) -> u8 {
        ((self.0 >> 24) & 0x0F) as u8
    }

    /// Whether `date`, `time`, `datetime2` and `datetimeoffset` travel as
    /// native types rather than strings.
    #[must_use]
    pub const fn supports_date_time_types(self) -> bool {
        self.0 >= Self::V7_3A.0
    }

    /// Whether the server may send `SESSIONSTATE` and `FEATUREEXTACK`.
    #[must_use]
    pub const fn supports_feature_ext(self) -> bool {
        self.0 >= Self::V7_4.0
    }

    /// Parse `"7.1"`, `"7.2"`, `"7.3A"`, `"7.3B"` or `"7.4"`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "7.1" => Some(Self::V7_1),
            "7.2" => Some(Self::V7_2),
            "7.3" | "7.3A" => Some(Self::V7_3A),
            "7.3B" => Some(Self::V7_3B),
            "7.4" => Some(Self::V7_4),
            _ => None,
        }
    }
}

impl Default for TdsVersion {
    fn default() -> Self {
        Self::V7_4
    }
}

impl fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::V7_3A => f.write_str("7.3A"),
            Self::V7_3B => f.write_str("7.3B"),
            other => write!(f, "{}.{}", other.major(), other.minor()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        for version in [
            TdsVersion::V7_1,
            TdsVersion::V7_2,
            TdsVersion::V7_3A,
            TdsVersion::V7_3B,
            TdsVersion::V7_4,
        ] {
            assert_eq!(TdsVersion::parse(&version.to_string()).unwrap(), version);
        }
        assert_eq!(TdsVersion::parse("8.0"), None);
    }

    #[test]
    fn feature_gates() {
        assert!(TdsVersion::V7_4.supports_feature_ext());
        assert!(!TdsVersion::V7_2.supports_date_time_types());
        assert!(TdsVersion::V7_3B.supports_date_time_types());
    }
}
