//! # Listing Identifiers
//!
//! Every donated device carries a short human-readable listing identifier
//! printed on labels and quoted by donors over the phone: `DEV-` followed by
//! eight upper-case hexadecimal characters drawn from a random UUID.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

const PREFIX: &str = "DEV-";
const HEX_LEN: usize = 8;

/// Public identifier of a donated device, e.g. `DEV-3FA85F64`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ListingId(String);

impl ListingId {
    /// Generate a fresh identifier from a random v4 UUID.
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("{PREFIX}{}", hex[..HEX_LEN].to_ascii_uppercase()))
    }

    /// Parse an identifier, validating the `DEV-XXXXXXXX` format.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidListingId`] when the prefix is
    /// missing or the suffix is not exactly 8 upper-case hex digits.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into();
        let valid = s
            .strip_prefix(PREFIX)
            .map(|hex| {
                hex.len() == HEX_LEN
                    && hex
                        .chars()
                        .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
            })
            .unwrap_or(false);
        if !valid {
            return Err(ValidationError::InvalidListingId(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ListingId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ListingId> for String {
    fn from(id: ListingId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ListingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
