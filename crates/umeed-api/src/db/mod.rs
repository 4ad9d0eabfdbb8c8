//! # Database Persistence Layer
//!
//! Optional Postgres write-through for every record the service owns.
//!
//! When `DATABASE_URL` is set the API upserts each mutated record and
//! appends an audit event; on startup the in-memory stores are hydrated from
//! these tables. When absent, the API runs in memory only (development and
//! tests).
//!
//! Status columns hold the lowercase wire names. History columns are JSONB
//! arrays of change rows. Money and CO₂ amounts are BIGINT hundredths.
//!
//! Write-through runs after the in-memory lock is released, so two writes
//! for one record can land out of order. Mutable rows carry `updated_at` and
//! an upsert only replaces a row that is not newer than itself.

pub mod analytics;
pub mod audit;
pub mod devices;
pub mod logistics;
pub mod marketplace;
pub mod repairs;
pub mod users;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::model::{
    BottleneckSnapshotRecord, DeviceImpactRecord, DeviceRecord, ListingRecord,
    LogisticsTaskRecord, OrderRecord, RegionRecord, RepairAssignmentRecord, UserRecord,
};

/// Initialize the connection pool and run migrations.
///
/// Returns `None` when no URL is configured (in-memory mode). Returns `Err`
/// if the URL is set but connecting or migrating fails.
pub async fn init_pool(database_url: Option<&str>) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = database_url else {
        tracing::warn!(
            "DATABASE_URL not set, running in-memory only mode. \
             State will not survive restarts."
        );
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// A borrowed record to write through.
#[derive(Debug, Clone, Copy)]
pub enum Record<'a> {
    User(&'a UserRecord),
    Device(&'a DeviceRecord),
    Repair(&'a RepairAssignmentRecord),
    Task(&'a LogisticsTaskRecord),
    Listing(&'a ListingRecord),
    Order(&'a OrderRecord),
    Region(&'a RegionRecord),
    Impact(&'a DeviceImpactRecord),
    Snapshot(&'a BottleneckSnapshotRecord),
}

impl Record<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Device(_) => "device",
            Self::Repair(_) => "repair_assignment",
            Self::Task(_) => "logistics_task",
            Self::Listing(_) => "listing",
            Self::Order(_) => "order",
            Self::Region(_) => "region",
            Self::Impact(_) => "device_impact",
            Self::Snapshot(_) => "bottleneck_snapshot",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::User(r) => r.id,
            Self::Device(r) => r.id,
            Self::Repair(r) => r.id,
            Self::Task(r) => r.id,
            Self::Listing(r) => r.id,
            Self::Order(r) => r.id,
            Self::Region(r) => r.id,
            Self::Impact(r) => r.id,
            Self::Snapshot(r) => r.id,
        }
    }
}

/// Upsert one record into its table.
pub async fn write(pool: &PgPool, record: Record<'_>) -> Result<(), sqlx::Error> {
    match record {
        Record::User(r) => users::upsert(pool, r).await,
        Record::Device(r) => devices::upsert(pool, r).await,
        Record::Repair(r) => repairs::upsert(pool, r).await,
        Record::Task(r) => logistics::upsert(pool, r).await,
        Record::Listing(r) => marketplace::upsert_listing(pool, r).await,
        Record::Order(r) => marketplace::upsert_order(pool, r).await,
        Record::Region(r) => analytics::upsert_region(pool, r).await,
        Record::Impact(r) => analytics::upsert_impact(pool, r).await,
        Record::Snapshot(r) => analytics::insert_snapshot(pool, r).await,
    }
}

// -- Column codecs -------------------------------------------------------------

/// Encode a history slice as a JSONB value.
pub(crate) fn history_json<T: Serialize>(
    column: &'static str,
    rows: &[T],
) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(rows).map_err(|e| {
        tracing::error!(column, error = %e, "failed to serialize history column");
        sqlx::Error::Encode(Box::new(e))
    })
}

/// Decode a JSONB history column. A corrupt history fails the load rather
/// than hydrating a record with its log silently truncated.
pub(crate) fn history_from_json<T: DeserializeOwned>(
    column: &'static str,
    id: Uuid,
    value: serde_json::Value,
) -> Result<Vec<T>, sqlx::Error> {
    serde_json::from_value(value).map_err(|e| {
        tracing::error!(column, %id, error = %e, "failed to deserialize history column");
        sqlx::Error::Decode(Box::new(e))
    })
}

/// Decode a status/enum column through its `from_name` parser.
pub(crate) fn decode_name<T>(
    column: &'static str,
    id: Uuid,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, sqlx::Error> {
    parse(value).ok_or_else(|| {
        tracing::error!(column, %id, value, "unknown value in database");
        sqlx::Error::Decode(format!("unknown {column} \"{value}\" for row {id}").into())
    })
}

/// Wrap a domain validation failure on the read path.
pub(crate) fn decode_invalid<E>(column: &'static str, id: Uuid) -> impl FnOnce(E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |e| {
        tracing::error!(column, %id, error = %e, "invalid value in database");
        sqlx::Error::Decode(Box::new(e))
    }
}

/// Counts are `u32` in memory and BIGINT in Postgres.
pub(crate) fn decode_count(column: &'static str, id: Uuid, value: i64) -> Result<u32, sqlx::Error> {
    u32::try_from(value).map_err(decode_invalid(column, id))
}
