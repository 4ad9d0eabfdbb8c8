//! # Custom Extractors & Validation
//!
//! Provides the [`Validate`] trait for request DTOs, helpers to extract and
//! validate JSON bodies in handlers, and small field checks shared by the
//! request types.

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::error::AppError;

/// Business rules a request type checks beyond what serde enforces.
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
///
/// ```ignore
/// async fn handler(body: Result<Json<T>, JsonRejection>) -> Result<..., AppError> {
///     let req = extract_json(body)?;
/// }
/// ```
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body and run its [`Validate`] rules.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate().map_err(AppError::Validation)?;
    Ok(value)
}

/// Reject blank values and values longer than `max` characters.
pub fn require_text(field: &str, value: &str, max: usize) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if value.chars().count() > max {
        return Err(format!("{field} must not exceed {max} characters"));
    }
    Ok(())
}

/// Accept only absolute http(s) URLs for images, proofs, and reports.
pub fn require_url(field: &str, value: &str) -> Result<(), String> {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !value.chars().any(char::is_whitespace) => Ok(()),
        _ => Err(format!("{field} must be an http(s) URL")),
    }
}

/// Validate an optional URL field.
pub fn optional_url(field: &str, value: Option<&str>) -> Result<(), String> {
    value.map_or(Ok(()), |v| require_url(field, v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_text_rejects_blank_and_long() {
        assert!(require_text("title", "Oxygen concentrator", 120).is_ok());
        assert_eq!(
            require_text("title", "   ", 120).unwrap_err(),
            "title must not be empty"
        );
        let long = "x".repeat(121);
        assert!(require_text("title", &long, 120).is_err());
    }

    #[test]
    fn require_url_accepts_http_and_https() {
        assert!(require_url("proof", "https://cdn.example.org/p.jpg").is_ok());
        assert!(require_url("proof", "http://10.0.0.1/p.jpg").is_ok());
        assert!(require_url("proof", "ftp://example.org/p.jpg").is_err());
        assert!(require_url("proof", "https://").is_err());
        assert!(require_url("proof", "https://a b").is_err());
    }

    #[test]
    fn optional_url_allows_none() {
        assert!(optional_url("report", None).is_ok());
        assert!(optional_url("report", Some("nope")).is_err());
    }
}
