//! Repair assignment persistence. One row per device (`device_id` unique).

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use umeed_state::RepairStatus;

use super::decode_name;
use crate::model::RepairAssignmentRecord;

pub async fn upsert(pool: &PgPool, repair: &RepairAssignmentRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO repair_assignments (id, device_id, repair_partner_id, status,
         estimated_completion, report_url, report_notes, is_certified, certified_at,
         created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (id) DO UPDATE SET
           repair_partner_id = EXCLUDED.repair_partner_id,
           status = EXCLUDED.status,
           estimated_completion = EXCLUDED.estimated_completion,
           report_url = EXCLUDED.report_url,
           report_notes = EXCLUDED.report_notes,
           is_certified = EXCLUDED.is_certified,
           certified_at = EXCLUDED.certified_at,
           updated_at = EXCLUDED.updated_at
         WHERE repair_assignments.updated_at <= EXCLUDED.updated_at",
    )
    .bind(repair.id)
    .bind(repair.device_id)
    .bind(repair.repair_partner_id)
    .bind(repair.status.as_str())
    .bind(repair.estimated_completion)
    .bind(&repair.report_url)
    .bind(&repair.report_notes)
    .bind(repair.is_certified)
    .bind(repair.certified_at)
    .bind(repair.created_at)
    .bind(repair.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<RepairAssignmentRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RepairRow>(
        "SELECT id, device_id, repair_partner_id, status, estimated_completion, report_url,
         report_notes, is_certified, certified_at, created_at, updated_at
         FROM repair_assignments ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(RepairRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct RepairRow {
    id: Uuid,
    device_id: Uuid,
    repair_partner_id: Uuid,
    status: String,
    estimated_completion: Option<DateTime<Utc>>,
    report_url: Option<String>,
    report_notes: String,
    is_certified: bool,
    certified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RepairRow {
    fn into_record(self) -> Result<RepairAssignmentRecord, sqlx::Error> {
        Ok(RepairAssignmentRecord {
            status: decode_name("status", self.id, &self.status, RepairStatus::from_name)?,
            id: self.id,
            device_id: self.device_id,
            repair_partner_id: self.repair_partner_id,
            estimated_completion: self.estimated_completion,
            report_url: self.report_url,
            report_notes: self.report_notes,
            is_certified: self.is_certified,
            certified_at: self.certified_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
