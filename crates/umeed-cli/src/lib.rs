//! # umeed-cli — Operator CLI for Nayi Umeed
//!
//! Provides the `umeed` command-line interface for the chores an operator
//! runs against a deployment's database outside the HTTP API.
//!
//! ## Subcommands
//!
//! - `umeed create-admin` — Create (or promote) a verified staff admin.
//! - `umeed set-role` — Change a user's role or active flag.
//! - `umeed seed-devices` — Load the demo device catalog into the marketplace.
//! - `umeed sync-listings` — Create missing listings for approved devices.
//! - `umeed export` — Dump every store as one JSON document.
//! - `umeed verify-audit` — Check the audit hash chain.
//!
//! Every command loads the stores from PostgreSQL first and writes through
//! the same orchestration layer the API uses, so status rules, history
//! rows, and audit events are identical.
//!
//! ```bash
//! umeed --database-url postgres://... create-admin --username admin --phone +911234567890
//! umeed seed-devices --donor admin
//! umeed verify-audit --limit 50000
//! ```

pub mod accounts;
pub mod audit;
pub mod catalog;
pub mod export;

use anyhow::{anyhow, Result};

use umeed_api::model::UserRecord;
use umeed_api::AppState;

/// Look up a user by exact username.
pub fn find_user(state: &AppState, username: &str) -> Result<UserRecord> {
    state
        .users
        .find(|u| u.username == username)
        .ok_or_else(|| anyhow!("no user named '{username}'"))
}
