//! # Validation Errors
//!
//! Every validated constructor in this crate reports failure through
//! [`ValidationError`]. The offending input is echoed back so that API error
//! bodies can name the exact value that was rejected.

use thiserror::Error;

/// A value failed format validation at construction time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Listing identifier is not `DEV-` followed by 8 upper-case hex digits.
    #[error("invalid listing id: \"{0}\" (expected DEV-XXXXXXXX)")]
    InvalidListingId(String),

    /// Phone number contains characters other than digits, `+`, space, or `-`,
    /// or is outside 8-15 characters.
    #[error("invalid phone number: \"{0}\" (expected 8-15 of digits, '+', ' ' or '-')")]
    InvalidPhoneNumber(String),

    /// Email address is not of the form `local@domain.tld`.
    #[error("invalid email address: \"{0}\"")]
    InvalidEmail(String),

    /// Amount is negative, malformed, has more than two decimal places, or
    /// exceeds the storable range.
    #[error("invalid amount: \"{0}\" (expected a non-negative decimal with at most 2 places)")]
    InvalidAmount(String),

    /// Latitude outside [-90, 90].
    #[error("latitude {0} out of range [-90, 90]")]
    LatitudeOutOfRange(String),

    /// Longitude outside [-180, 180].
    #[error("longitude {0} out of range [-180, 180]")]
    LongitudeOutOfRange(String),
}
