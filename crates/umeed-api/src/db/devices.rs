//! Device persistence.
//!
//! The ordered-flow rule is enforced by `DeviceLifecycle` before a record
//! reaches this module, not in SQL. `history` is the full JSONB log.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use umeed_core::{Amount, ListingId};
use umeed_state::{ApprovalStatus, DeviceCategory, DeviceCondition, DeviceStatus, DeviceStatusChange};

use super::{decode_invalid, decode_name, history_from_json, history_json};
use crate::model::DeviceRecord;

pub async fn upsert(pool: &PgPool, device: &DeviceRecord) -> Result<(), sqlx::Error> {
    let history = history_json("devices.history", &device.history)?;

    sqlx::query(
        "INSERT INTO devices (id, listing_id, title, description, category, condition, status,
         admin_approval_status, admin_notes, donor_id, price_hundredths, image_urls, history,
         created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
         ON CONFLICT (id) DO UPDATE SET
           title = EXCLUDED.title,
           description = EXCLUDED.description,
           category = EXCLUDED.category,
           condition = EXCLUDED.condition,
           status = EXCLUDED.status,
           admin_approval_status = EXCLUDED.admin_approval_status,
           admin_notes = EXCLUDED.admin_notes,
           price_hundredths = EXCLUDED.price_hundredths,
           image_urls = EXCLUDED.image_urls,
           history = EXCLUDED.history,
           updated_at = EXCLUDED.updated_at
         WHERE devices.updated_at <= EXCLUDED.updated_at",
    )
    .bind(device.id)
    .bind(device.listing_id.as_str())
    .bind(&device.title)
    .bind(&device.description)
    .bind(device.category.as_str())
    .bind(device.condition.as_str())
    .bind(device.status.as_str())
    .bind(device.admin_approval_status.as_str())
    .bind(&device.admin_notes)
    .bind(device.donor_id)
    .bind(device.price.map(|p| p.hundredths()))
    .bind(&device.image_urls)
    .bind(&history)
    .bind(device.created_at)
    .bind(device.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<DeviceRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DeviceRow>(
        "SELECT id, listing_id, title, description, category, condition, status,
         admin_approval_status, admin_notes, donor_id, price_hundredths, image_urls, history,
         created_at, updated_at
         FROM devices ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(DeviceRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: Uuid,
    listing_id: String,
    title: String,
    description: String,
    category: String,
    condition: String,
    status: String,
    admin_approval_status: String,
    admin_notes: String,
    donor_id: Uuid,
    price_hundredths: Option<i64>,
    image_urls: Vec<String>,
    history: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DeviceRow {
    fn into_record(self) -> Result<DeviceRecord, sqlx::Error> {
        let id = self.id;
        let price = self
            .price_hundredths
            .map(Amount::from_hundredths)
            .transpose()
            .map_err(decode_invalid("price_hundredths", id))?;
        let history: Vec<DeviceStatusChange> =
            history_from_json("devices.history", id, self.history)?;

        Ok(DeviceRecord {
            id,
            listing_id: ListingId::new(self.listing_id).map_err(decode_invalid("listing_id", id))?,
            title: self.title,
            description: self.description,
            category: decode_name("category", id, &self.category, DeviceCategory::from_name)?,
            condition: decode_name("condition", id, &self.condition, DeviceCondition::from_name)?,
            status: decode_name("status", id, &self.status, DeviceStatus::from_name)?,
            admin_approval_status: decode_name(
                "admin_approval_status",
                id,
                &self.admin_approval_status,
                ApprovalStatus::from_name,
            )?,
            admin_notes: self.admin_notes,
            donor_id: self.donor_id,
            price,
            image_urls: self.image_urls,
            history,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
