//! # Data Export
//!
//! Writes every persistent store as a single JSON document, for backups and
//! moving data between deployments. Sessions and OTP codes are short-lived
//! secrets and are left out; password hashes never serialize.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use umeed_api::model::{
    BottleneckSnapshotRecord, DeviceImpactRecord, DeviceRecord, ListingRecord, LogisticsTaskRecord,
    OrderRecord, RegionRecord, RepairAssignmentRecord, UserRecord,
};
use umeed_api::AppState;

/// Arguments for `umeed export`.
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output file. Prints to stdout when omitted.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Pretty-print the JSON.
    #[arg(long)]
    pub pretty: bool,
}

#[derive(Debug, Serialize)]
pub struct DataExport {
    pub exported_at: DateTime<Utc>,
    pub users: Vec<UserRecord>,
    pub devices: Vec<DeviceRecord>,
    pub repairs: Vec<RepairAssignmentRecord>,
    pub tasks: Vec<LogisticsTaskRecord>,
    pub listings: Vec<ListingRecord>,
    pub orders: Vec<OrderRecord>,
    pub regions: Vec<RegionRecord>,
    pub impacts: Vec<DeviceImpactRecord>,
    pub snapshots: Vec<BottleneckSnapshotRecord>,
}

impl DataExport {
    /// Snapshot the stores, each sorted by creation time so repeated
    /// exports of the same data diff cleanly.
    pub fn collect(state: &AppState) -> Self {
        let mut users = state.users.list();
        users.sort_by_key(|u| (u.date_joined, u.id));
        let mut devices = state.devices.list();
        devices.sort_by_key(|d| (d.created_at, d.id));
        let mut repairs = state.repairs.list();
        repairs.sort_by_key(|r| (r.created_at, r.id));
        let mut tasks = state.tasks.list();
        tasks.sort_by_key(|t| (t.assigned_at, t.id));
        let mut listings = state.listings.list();
        listings.sort_by_key(|l| (l.created_at, l.id));
        let mut orders = state.orders.list();
        orders.sort_by_key(|o| (o.created_at, o.id));
        let mut regions = state.regions.list();
        regions.sort_by(|a, b| a.code.cmp(&b.code));
        let mut impacts = state.impacts.list();
        impacts.sort_by_key(|i| (i.updated_at, i.id));
        let mut snapshots = state.snapshots.list();
        snapshots.sort_by_key(|s| (s.captured_at, s.id));

        Self {
            exported_at: Utc::now(),
            users,
            devices,
            repairs,
            tasks,
            listings,
            orders,
            regions,
            impacts,
            snapshots,
        }
    }

    /// `(store, record count)` pairs for the summary line.
    pub fn counts(&self) -> [(&'static str, usize); 9] {
        [
            ("users", self.users.len()),
            ("devices", self.devices.len()),
            ("repairs", self.repairs.len()),
            ("tasks", self.tasks.len()),
            ("listings", self.listings.len()),
            ("orders", self.orders.len()),
            ("regions", self.regions.len()),
            ("impacts", self.impacts.len()),
            ("snapshots", self.snapshots.len()),
        ]
    }
}

pub async fn run_export(args: &ExportArgs, state: &AppState) -> Result<u8> {
    let export = DataExport::collect(state);
    let json = if args.pretty {
        serde_json::to_string_pretty(&export)?
    } else {
        serde_json::to_string(&export)?
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Exported to {} ({} bytes)", path.display(), json.len());
        }
        None => println!("{json}"),
    }
    for (store, count) in export.counts() {
        tracing::info!(store, count, "exported");
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{run_create_admin, CreateAdminArgs};
    use crate::catalog::{run_seed_devices, SeedDevicesArgs};

    async fn seeded_state() -> AppState {
        let state = AppState::new();
        let admin = CreateAdminArgs {
            username: "admin".into(),
            email: "admin@nayiumeed.com".into(),
            phone: "+911234567890".into(),
            password: "correct-horse".into(),
            first_name: String::new(),
            last_name: String::new(),
        };
        run_create_admin(&admin, &state).await.unwrap();
        let seed = SeedDevicesArgs {
            donor: "admin".into(),
            limit: Some(2),
            pending: false,
        };
        run_seed_devices(&seed, &state).await.unwrap();
        state
    }

    #[tokio::test]
    async fn export_writes_every_store() {
        let state = seeded_state().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        let args = ExportArgs {
            output: Some(path.clone()),
            pretty: true,
        };
        assert_eq!(run_export(&args, &state).await.unwrap(), 0);

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["users"].as_array().unwrap().len(), 1);
        assert_eq!(value["devices"].as_array().unwrap().len(), 2);
        assert_eq!(value["listings"].as_array().unwrap().len(), 2);
        assert!(value["orders"].as_array().unwrap().is_empty());
        assert!(value.get("otp_requests").is_none());
    }

    #[tokio::test]
    async fn export_omits_password_hashes() {
        let state = seeded_state().await;
        let export = DataExport::collect(&state);
        let json = serde_json::to_value(&export).unwrap();
        assert!(json["users"][0].get("password_hash").is_none());
        assert_eq!(export.counts()[0], ("users", 1));
    }
}
