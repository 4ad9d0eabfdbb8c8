//! Marketplace listing and order persistence.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use umeed_core::Amount;
use umeed_state::{OrderStatus, OrderStatusChange};

use super::{decode_invalid, decode_name, history_from_json, history_json};
use crate::model::{ListingRecord, OrderRecord};

// -- Listings ------------------------------------------------------------------

/// Listings never change once created, so a replayed write is a no-op.
pub async fn upsert_listing(pool: &PgPool, listing: &ListingRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO marketplace_listings (id, device_id, price_hundredths, is_active, created_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(listing.id)
    .bind(listing.device_id)
    .bind(listing.price.hundredths())
    .bind(listing.is_active)
    .bind(listing.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_listings(pool: &PgPool) -> Result<Vec<ListingRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ListingRow>(
        "SELECT id, device_id, price_hundredths, is_active, created_at
         FROM marketplace_listings ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| -> Result<ListingRecord, sqlx::Error> {
            Ok(ListingRecord {
                price: Amount::from_hundredths(row.price_hundredths)
                    .map_err(decode_invalid("price_hundredths", row.id))?,
                id: row.id,
                device_id: row.device_id,
                is_active: row.is_active,
                created_at: row.created_at,
            })
        })
        .collect()
}

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: Uuid,
    device_id: Uuid,
    price_hundredths: i64,
    is_active: bool,
    created_at: DateTime<Utc>,
}

// -- Orders --------------------------------------------------------------------

pub async fn upsert_order(pool: &PgPool, order: &OrderRecord) -> Result<(), sqlx::Error> {
    let history = history_json("orders.history", &order.history)?;

    sqlx::query(
        "INSERT INTO orders (id, listing_id, buyer_id, status, shipping_address, history,
         created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (id) DO UPDATE SET
           status = EXCLUDED.status,
           shipping_address = EXCLUDED.shipping_address,
           history = EXCLUDED.history,
           updated_at = EXCLUDED.updated_at
         WHERE orders.updated_at <= EXCLUDED.updated_at",
    )
    .bind(order.id)
    .bind(order.listing_id)
    .bind(order.buyer_id)
    .bind(order.status.as_str())
    .bind(&order.shipping_address)
    .bind(&history)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_orders(pool: &PgPool) -> Result<Vec<OrderRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, OrderRow>(
        "SELECT id, listing_id, buyer_id, status, shipping_address, history, created_at, updated_at
         FROM orders ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| -> Result<OrderRecord, sqlx::Error> {
            let history: Vec<OrderStatusChange> =
                history_from_json("orders.history", row.id, row.history)?;
            Ok(OrderRecord {
                status: decode_name("status", row.id, &row.status, OrderStatus::from_name)?,
                id: row.id,
                listing_id: row.listing_id,
                buyer_id: row.buyer_id,
                shipping_address: row.shipping_address,
                created_at: row.created_at,
                updated_at: row.updated_at,
                history,
            })
        })
        .collect()
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    listing_id: Uuid,
    buyer_id: Uuid,
    status: String,
    shipping_address: String,
    history: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
