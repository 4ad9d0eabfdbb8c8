//! # Audit Chain Verification
//!
//! Walks the `audit_events` hash chain from its genesis and reports broken
//! links and tampered events. Exits 1 when the chain is invalid so the
//! command can gate a cron job or CI step.

use anyhow::{Context, Result};
use clap::Args;

use umeed_api::db::audit;
use umeed_api::AppState;

/// Arguments for `umeed verify-audit`.
#[derive(Args, Debug)]
pub struct VerifyAuditArgs {
    /// Number of events to check, oldest first.
    #[arg(long, default_value_t = 10_000)]
    pub limit: i64,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

pub async fn run_verify_audit(args: &VerifyAuditArgs, state: &AppState) -> Result<u8> {
    let pool = state
        .db_pool
        .as_ref()
        .context("the audit trail lives in PostgreSQL; no database is configured")?;
    let result = audit::verify_chain_integrity(pool, args.limit.max(1))
        .await
        .context("reading audit events")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "checked {} event(s): {} broken link(s), {} tampered",
            result.total_events, result.broken_links, result.tampered
        );
    }

    if result.chain_valid {
        Ok(0)
    } else {
        tracing::error!(
            broken_links = result.broken_links,
            tampered = result.tampered,
            "audit chain integrity check failed"
        );
        Ok(1)
    }
}
