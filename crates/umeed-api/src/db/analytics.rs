//! Impact analytics persistence: regions, per-device impact, and
//! bottleneck snapshots. Snapshots are append-only.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use umeed_core::Amount;

use super::{decode_count, decode_invalid};
use crate::model::{BottleneckSnapshotRecord, DeviceImpactRecord, RegionRecord};

// -- Regions -------------------------------------------------------------------

pub async fn upsert_region(pool: &PgPool, region: &RegionRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO regions (id, name, code, country, state, district)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (id) DO UPDATE SET
           name = EXCLUDED.name,
           code = EXCLUDED.code,
           country = EXCLUDED.country,
           state = EXCLUDED.state,
           district = EXCLUDED.district",
    )
    .bind(region.id)
    .bind(&region.name)
    .bind(&region.code)
    .bind(&region.country)
    .bind(&region.state)
    .bind(&region.district)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_regions(pool: &PgPool) -> Result<Vec<RegionRecord>, sqlx::Error> {
    sqlx::query_as::<_, RegionRow>(
        "SELECT id, name, code, country, state, district FROM regions ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .map(|rows| {
        rows.into_iter()
            .map(|r| RegionRecord {
                id: r.id,
                name: r.name,
                code: r.code,
                country: r.country,
                state: r.state,
                district: r.district,
            })
            .collect()
    })
}

#[derive(sqlx::FromRow)]
struct RegionRow {
    id: Uuid,
    name: String,
    code: String,
    country: String,
    state: String,
    district: String,
}

// -- Device impact -------------------------------------------------------------

pub async fn upsert_impact(pool: &PgPool, impact: &DeviceImpactRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO device_impacts (id, device_id, region_id, beneficiaries,
         co2_saved_hundredths_kg, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (id) DO UPDATE SET
           region_id = EXCLUDED.region_id,
           beneficiaries = EXCLUDED.beneficiaries,
           co2_saved_hundredths_kg = EXCLUDED.co2_saved_hundredths_kg,
           updated_at = EXCLUDED.updated_at
         WHERE device_impacts.updated_at <= EXCLUDED.updated_at",
    )
    .bind(impact.id)
    .bind(impact.device_id)
    .bind(impact.region_id)
    .bind(i64::from(impact.beneficiaries))
    .bind(impact.estimated_co2_saved_kg.hundredths())
    .bind(impact.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_impacts(pool: &PgPool) -> Result<Vec<DeviceImpactRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ImpactRow>(
        "SELECT id, device_id, region_id, beneficiaries, co2_saved_hundredths_kg, updated_at
         FROM device_impacts",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| -> Result<DeviceImpactRecord, sqlx::Error> {
            Ok(DeviceImpactRecord {
                beneficiaries: decode_count("beneficiaries", r.id, r.beneficiaries)?,
                estimated_co2_saved_kg: Amount::from_hundredths(r.co2_saved_hundredths_kg)
                    .map_err(decode_invalid("co2_saved_hundredths_kg", r.id))?,
                id: r.id,
                device_id: r.device_id,
                region_id: r.region_id,
                updated_at: r.updated_at,
            })
        })
        .collect()
}

#[derive(sqlx::FromRow)]
struct ImpactRow {
    id: Uuid,
    device_id: Uuid,
    region_id: Option<Uuid>,
    beneficiaries: i64,
    co2_saved_hundredths_kg: i64,
    updated_at: DateTime<Utc>,
}

// -- Bottleneck snapshots ------------------------------------------------------

/// Snapshots are never updated; a repeated write of the same id is ignored.
pub async fn insert_snapshot(
    pool: &PgPool,
    snapshot: &BottleneckSnapshotRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO bottleneck_snapshots (id, captured_at, pending_approvals, pending_repairs,
         pending_pickups, in_transit_deliveries, notes)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(snapshot.id)
    .bind(snapshot.captured_at)
    .bind(i64::from(snapshot.pending_approvals))
    .bind(i64::from(snapshot.pending_repairs))
    .bind(i64::from(snapshot.pending_pickups))
    .bind(i64::from(snapshot.in_transit_deliveries))
    .bind(&snapshot.notes)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_snapshots(pool: &PgPool) -> Result<Vec<BottleneckSnapshotRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, SnapshotRow>(
        "SELECT id, captured_at, pending_approvals, pending_repairs, pending_pickups,
         in_transit_deliveries, notes
         FROM bottleneck_snapshots ORDER BY captured_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| -> Result<BottleneckSnapshotRecord, sqlx::Error> {
            Ok(BottleneckSnapshotRecord {
                pending_approvals: decode_count("pending_approvals", r.id, r.pending_approvals)?,
                pending_repairs: decode_count("pending_repairs", r.id, r.pending_repairs)?,
                pending_pickups: decode_count("pending_pickups", r.id, r.pending_pickups)?,
                in_transit_deliveries: decode_count(
                    "in_transit_deliveries",
                    r.id,
                    r.in_transit_deliveries,
                )?,
                id: r.id,
                captured_at: r.captured_at,
                notes: r.notes,
            })
        })
        .collect()
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: Uuid,
    captured_at: DateTime<Utc>,
    pending_approvals: i64,
    pending_repairs: i64,
    pending_pickups: i64,
    in_transit_deliveries: i64,
    notes: String,
}
