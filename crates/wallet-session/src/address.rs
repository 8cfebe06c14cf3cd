use crate::errors::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical (lowercase) EVM wallet address. The only way to build one is [`normalize`], so
/// two `Address` values are equal iff the inputs were equal ignoring case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `0x1234…abcd`, for labels and log lines.
    pub fn short(&self) -> String {
        let s = self.0.as_str();
        match (s.get(..6), s.get(s.len().saturating_sub(4)..)) {
            (Some(head), Some(tail)) => format!("{head}…{tail}"),
            _ => s.to_owned(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = SessionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        normalize(&s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

impl std::str::FromStr for Address {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize(s)
    }
}

/// Lowercase and validate an address (`0x` followed by 40 hex digits).
pub fn normalize(address: &str) -> Result<Address, SessionError> {
    let lowered = address.trim().to_ascii_lowercase();
    let Some(body) = lowered.strip_prefix("0x") else {
        return Err(SessionError::InvalidAddress(address.to_owned()));
    };
    if body.len() != 40 || hex::decode(body).is_err() {
        return Err(SessionError::InvalidAddress(address.to_owned()));
    }
    Ok(Address(lowered))
}

/// Normalize-then-compare. Malformed input never equals anything.
pub fn equals(a: &str, b: &str) -> bool {
    match (normalize(a), normalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
