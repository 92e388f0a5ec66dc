//! Content identifiers for layers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Optional hash-function prefix accepted on input.
const SHA256_PREFIX: &str = "sha256:";

/// A 40-character lowercase hexadecimal layer identifier.
///
/// Parsing is case-insensitive; the stored form is always lowercase, so two
/// ids compare equal exactly when they name the same layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayerId(String);

impl LayerId {
    /// Number of hex characters in an id.
    pub const LEN: usize = 40;

    /// Parses an id, accepting upper-case hex and a leading `sha256:`.
    pub fn parse(input: &str) -> crate::Result<Self> {
        let trimmed = input.trim();
        let hex = trimmed.strip_prefix(SHA256_PREFIX).unwrap_or(trimmed);
        if !Self::is_valid(hex) {
            return Err(crate::Error::InvalidLayerId(input.to_owned()));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Returns `true` if `s` is exactly [`Self::LEN`] hex digits.
    pub fn is_valid(s: &str) -> bool {
        s.len() == Self::LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Returns the canonical lowercase form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the 12-character prefix used in human-readable output.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl FromStr for LayerId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LayerId {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        Self::parse(&s)
    }
}

impl From<LayerId> for String {
    fn from(id: LayerId) -> Self {
        id.0
    }
}

impl AsRef<str> for LayerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
