//! Logistics task persistence.
//!
//! Coordinates are stored as nullable latitude/longitude pairs; a row with
//! only one half set fails to load.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use umeed_core::GeoPoint;
use umeed_state::{TaskStatus, TaskStatusChange, TaskType};

use super::{decode_invalid, decode_name, history_from_json, history_json};
use crate::model::LogisticsTaskRecord;

pub async fn upsert(pool: &PgPool, task: &LogisticsTaskRecord) -> Result<(), sqlx::Error> {
    let history = history_json("logistics_tasks.history", &task.history)?;

    sqlx::query(
        "INSERT INTO logistics_tasks (id, task_type, status, device_id, order_id,
         pickup_address, delivery_address, assigned_to, pickup_proof_url, delivery_proof_url,
         pickup_latitude, pickup_longitude, delivery_latitude, delivery_longitude,
         assigned_at, picked_up_at, delivered_at, updated_at, notes, history)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                 $18, $19, $20)
         ON CONFLICT (id) DO UPDATE SET
           status = EXCLUDED.status,
           pickup_address = EXCLUDED.pickup_address,
           delivery_address = EXCLUDED.delivery_address,
           assigned_to = EXCLUDED.assigned_to,
           pickup_proof_url = EXCLUDED.pickup_proof_url,
           delivery_proof_url = EXCLUDED.delivery_proof_url,
           pickup_latitude = EXCLUDED.pickup_latitude,
           pickup_longitude = EXCLUDED.pickup_longitude,
           delivery_latitude = EXCLUDED.delivery_latitude,
           delivery_longitude = EXCLUDED.delivery_longitude,
           picked_up_at = EXCLUDED.picked_up_at,
           delivered_at = EXCLUDED.delivered_at,
           updated_at = EXCLUDED.updated_at,
           notes = EXCLUDED.notes,
           history = EXCLUDED.history
         WHERE logistics_tasks.updated_at <= EXCLUDED.updated_at",
    )
    .bind(task.id)
    .bind(task.task_type.as_str())
    .bind(task.status.as_str())
    .bind(task.device_id)
    .bind(task.order_id)
    .bind(&task.pickup_address)
    .bind(&task.delivery_address)
    .bind(task.assigned_to)
    .bind(&task.pickup_proof_url)
    .bind(&task.delivery_proof_url)
    .bind(task.pickup_location.map(|p| p.latitude()))
    .bind(task.pickup_location.map(|p| p.longitude()))
    .bind(task.delivery_location.map(|p| p.latitude()))
    .bind(task.delivery_location.map(|p| p.longitude()))
    .bind(task.assigned_at)
    .bind(task.picked_up_at)
    .bind(task.delivered_at)
    .bind(task.updated_at)
    .bind(&task.notes)
    .bind(&history)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<LogisticsTaskRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TaskRow>(
        "SELECT id, task_type, status, device_id, order_id, pickup_address, delivery_address,
         assigned_to, pickup_proof_url, delivery_proof_url, pickup_latitude, pickup_longitude,
         delivery_latitude, delivery_longitude, assigned_at, picked_up_at, delivered_at,
         updated_at, notes, history
         FROM logistics_tasks ORDER BY assigned_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TaskRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    task_type: String,
    status: String,
    device_id: Option<Uuid>,
    order_id: Option<Uuid>,
    pickup_address: String,
    delivery_address: String,
    assigned_to: Option<Uuid>,
    pickup_proof_url: Option<String>,
    delivery_proof_url: Option<String>,
    pickup_latitude: Option<f64>,
    pickup_longitude: Option<f64>,
    delivery_latitude: Option<f64>,
    delivery_longitude: Option<f64>,
    assigned_at: DateTime<Utc>,
    picked_up_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    notes: String,
    history: serde_json::Value,
}

impl TaskRow {
    fn into_record(self) -> Result<LogisticsTaskRecord, sqlx::Error> {
        let id = self.id;
        let pickup_location = GeoPoint::from_parts(self.pickup_latitude, self.pickup_longitude)
            .map_err(decode_invalid("pickup_location", id))?;
        let delivery_location =
            GeoPoint::from_parts(self.delivery_latitude, self.delivery_longitude)
                .map_err(decode_invalid("delivery_location", id))?;
        let history: Vec<TaskStatusChange> =
            history_from_json("logistics_tasks.history", id, self.history)?;

        Ok(LogisticsTaskRecord {
            id,
            task_type: decode_name("task_type", id, &self.task_type, TaskType::from_name)?,
            status: decode_name("status", id, &self.status, TaskStatus::from_name)?,
            device_id: self.device_id,
            order_id: self.order_id,
            pickup_address: self.pickup_address,
            delivery_address: self.delivery_address,
            assigned_to: self.assigned_to,
            pickup_proof_url: self.pickup_proof_url,
            delivery_proof_url: self.delivery_proof_url,
            pickup_location,
            delivery_location,
            assigned_at: self.assigned_at,
            picked_up_at: self.picked_up_at,
            delivered_at: self.delivered_at,
            updated_at: self.updated_at,
            notes: self.notes,
            history,
        })
    }
}
