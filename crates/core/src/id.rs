//! Strongly-typed identifiers used across the engine.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of an audit record (append-only posting trail).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostingId(Uuid);

impl PostingId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered) so ids sort in append order.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PostingId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PostingId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for PostingId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("PostingId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Production line code (e.g. `"L1"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(String);

/// Lot number stamped on a production run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LotNo(String);

/// Finished product code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductCode(String);

/// Raw or semi-finished material code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialCode(String);

/// Ledger sheet (document) number minted by the external numbering service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SheetNo(String);

/// Storage location (warehouse bin) code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationCode(String);

/// Formula (recipe) version label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormulaVersion(String);

macro_rules! impl_code_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Build a code, rejecting blank input.
            pub fn new(code: impl Into<String>) -> Result<Self, DomainError> {
                let code = code.into();
                let trimmed = code.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(concat!($name, ": empty")));
                }
                Ok(Self(trimmed.to_string()))
            }

            /// Build from a literal that is known to be non-blank.
            pub fn from_static(code: &'static str) -> Self {
                Self(code.to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_code_newtype!(LineId, "LineId");
impl_code_newtype!(LotNo, "LotNo");
impl_code_newtype!(ProductCode, "ProductCode");
impl_code_newtype!(MaterialCode, "MaterialCode");
impl_code_newtype!(SheetNo, "SheetNo");
impl_code_newtype!(LocationCode, "LocationCode");
impl_code_newtype!(FormulaVersion, "FormulaVersion");

/// Physical feeder station on a line, 1-based as reported by the sensor source.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeederId(u16);

impl FeederId {
    pub fn new(index: u16) -> Result<Self, DomainError> {
        if index == 0 {
            return Err(DomainError::invalid_id("FeederId: index is 1-based"));
        }
        Ok(Self(index))
    }

    pub fn index(self) -> u16 {
        self.0
    }

    /// Zero-based slot into per-feeder arrays.
    pub fn slot(self) -> usize {
        usize::from(self.0) - 1
    }
}

impl core::fmt::Display for FeederId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "F{:02}", self.0)
    }
}

impl FromStr for FeederId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches(['F', 'f']);
        let index = digits
            .parse::<u16>()
            .map_err(|e| DomainError::invalid_id(format!("FeederId: {e}")))?;
        Self::new(index)
    }
}

/// Identity of a production run: line + scheduling sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunKey {
    pub line: LineId,
    pub sequence: u32,
}

impl RunKey {
    pub fn new(line: LineId, sequence: u32) -> Self {
        Self { line, sequence }
    }
}

impl core::fmt::Display for RunKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}", self.line, self.sequence)
    }
}

impl FromStr for RunKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (line, seq) = s
            .rsplit_once('#')
            .ok_or_else(|| DomainError::invalid_id("RunKey: expected <line>#<sequence>"))?;
        let sequence = seq
            .parse::<u32>()
            .map_err(|e| DomainError::invalid_id(format!("RunKey: {e}")))?;
        Ok(Self::new(LineId::new(line)?, sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_codes_are_rejected() {
        assert!(LotNo::new("  ").is_err());
        assert_eq!(LotNo::new(" A-17 ").unwrap().as_str(), "A-17");
    }

    #[test]
    fn feeder_ids_are_one_based() {
        assert!(FeederId::new(0).is_err());
        let f = FeederId::new(3).unwrap();
        assert_eq!(f.slot(), 2);
        assert_eq!(f.to_string(), "F03");
        assert_eq!("F03".parse::<FeederId>().unwrap(), f);
        assert_eq!("7".parse::<FeederId>().unwrap().index(), 7);
    }

    #[test]
    fn run_key_round_trips_through_display() {
        let key = RunKey::new(LineId::new("L2").unwrap(), 41);
        assert_eq!(key.to_string(), "L2#41");
        assert_eq!("L2#41".parse::<RunKey>().unwrap(), key);
        assert!("L2-41".parse::<RunKey>().is_err());
    }
}
