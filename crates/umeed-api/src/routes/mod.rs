//! # Route Modules
//!
//! Each module defines an Axum Router for one API surface area. Modules
//! with unauthenticated endpoints also expose a `public_router`. Routers are
//! assembled in [`crate::app`].

pub mod accounts;
pub mod admin;
pub mod analytics;
pub mod devices;
pub mod logistics;
pub mod marketplace;
pub mod repairs;
