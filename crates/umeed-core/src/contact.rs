//! # Contact Details
//!
//! Phone numbers are the primary contact channel for donors and logistics
//! staff; they are unique per account and used for OTP delivery. Validation
//! is deliberately loose about national formats: 8 to 15 characters of
//! digits, `+`, space, or hyphen.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const PHONE_MIN: usize = 8;
const PHONE_MAX: usize = 15;

/// A phone number in the accepted loose format (`^[0-9+ -]{8,15}$`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPhoneNumber`] if the value has the
    /// wrong length or contains a disallowed character.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into();
        let len = s.chars().count();
        let charset_ok = s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-'));
        if !(PHONE_MIN..=PHONE_MAX).contains(&len) || !charset_ok {
            return Err(ValidationError::InvalidPhoneNumber(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PhoneNumber> for String {
    fn from(p: PhoneNumber) -> Self {
        p.0
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An email address with a non-empty local part and a dotted domain.
///
/// Stored lower-cased in the domain part only; local parts are preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidEmail`] for anything that is not
    /// `local@domain.tld` without whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = value.into();
        let s = raw.trim();
        let Some((local, domain)) = s.split_once('@') else {
            return Err(ValidationError::InvalidEmail(raw));
        };
        let domain_ok = !domain.contains('@')
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.');
        if local.is_empty() || !domain_ok || s.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidEmail(raw));
        }
        Ok(Self(format!("{local}@{}", domain.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EmailAddress> for String {
    fn from(e: EmailAddress) -> Self {
        e.0
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- PhoneNumber --

    #[test]
    fn phone_accepts_common_formats() {
        assert!(PhoneNumber::new("9876543210").is_ok());
        assert!(PhoneNumber::new("+91 98765 43210").is_ok());
        assert!(PhoneNumber::new("011-2345-6789").is_ok());
        assert!(PhoneNumber::new("12345678").is_ok());
    }

    #[test]
    fn phone_rejects_length_out_of_bounds() {
        assert!(PhoneNumber::new("1234567").is_err());
        assert!(PhoneNumber::new("1234567890123456").is_err());
        assert!(PhoneNumber::new("").is_err());
    }

    #[test]
    fn phone_rejects_letters_and_punctuation() {
        assert!(PhoneNumber::new("98765abc10").is_err());
        assert!(PhoneNumber::new("(011)23456789").is_err());
    }

    // -- EmailAddress --

    #[test]
    fn email_normalizes_domain_case() {
        let e = EmailAddress::new("Asha.Rao@Example.ORG").unwrap();
        assert_eq!(e.as_str(), "Asha.Rao@example.org");
    }

    #[test]
    fn email_rejects_malformed() {
        assert!(EmailAddress::new("plainaddress").is_err());
        assert!(EmailAddress::new("@example.org").is_err());
        assert!(EmailAddress::new("a@b").is_err());
        assert!(EmailAddress::new("a@@b.org").is_err());
        assert!(EmailAddress::new("a b@c.org").is_err());
        assert!(EmailAddress::new("a@.org").is_err());
    }
}
