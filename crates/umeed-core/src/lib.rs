//! # umeed-core — Foundational Types for Nayi Umeed
//!
//! Validated newtypes shared by every crate in the workspace. A value of one
//! of these types has already passed format validation, so downstream code
//! never re-checks a phone number, a listing identifier, or a price.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `umeed-*` crates (this is the leaf of the DAG).
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.
//! - Monetary and mass quantities are fixed-point integers, never floats.

pub mod amount;
pub mod contact;
pub mod error;
pub mod geo;
pub mod listing;

pub use amount::Amount;
pub use contact::{EmailAddress, PhoneNumber};
pub use error::ValidationError;
pub use geo::GeoPoint;
pub use listing::ListingId;
