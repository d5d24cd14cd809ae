//! Identifier and label definitions.

use crate::{define_id, IdError};

// =============================================================================
// Scheduler-assigned identifiers
// =============================================================================

define_id!(JobId, "job id");
define_id!(ResourcePoolId, "resource pool id");

// =============================================================================
// Labels
// =============================================================================

/// Caller-chosen label scoping workload discovery and ownership.
///
/// Several isolated test clusters can share one scheduler as long as their
/// labels differ. Labels end up inside hostnames and job names, so they are
/// restricted to ASCII alphanumerics, `-`, `_` and `.`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(String);

impl Label {
    /// Maximum label length.
    pub const MAX_LEN: usize = 63;

    /// Parses and validates a label.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty { kind: "label" });
        }
        if s.len() > Self::MAX_LEN {
            return Err(IdError::TooLong {
                kind: "label",
                len: s.len(),
                max: Self::MAX_LEN,
            });
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(IdError::InvalidFormat {
                kind: "label",
                message: format!("unexpected character {c:?} in '{s}'"),
            });
        }
        Ok(Self(s.to_string()))
    }

    /// Generates a unique label with the given prefix, e.g. `vcluster-01hv4z2w...`.
    pub fn generate(prefix: &str) -> Result<Self, IdError> {
        let suffix = crate::Ulid::new().to_string().to_lowercase();
        Self::parse(&format!("{prefix}-{suffix}"))
    }

    /// Returns the raw label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Label {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for Label {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Label {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
