//! # Marketplace API
//!
//! Browsing is public; ordering and order lookup require a session.
//!
//! | Method | Path | Handler | Auth |
//! |--------|------|---------|------|
//! | `GET` | `/v1/marketplace/listings` | `list_listings` | public |
//! | `GET` | `/v1/marketplace/listings/{id}` | `get_listing` | public |
//! | `POST` | `/v1/marketplace/listings/{id}/orders` | `place_order` | buyer |
//! | `GET` | `/v1/marketplace/orders/{id}` | `get_order` | owner |

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use umeed_core::Amount;
use umeed_state::{
    ApprovalStatus, DeviceCategory, DeviceCondition, DeviceStatus, DeviceStatusChange,
    OrderStatus,
};

use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_text, Validate};
use crate::model::{DeviceRecord, ListingRecord, OrderRecord};
use crate::orchestration;
use crate::state::AppState;

const BUYER_ROLES: &[Role] = &[Role::Buyer, Role::Both, Role::Admin];

const MAX_ADDRESS_LEN: usize = 500;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ListingFilter {
    pub category: Option<String>,
    pub condition: Option<String>,
    /// Inclusive lower bound, decimal string.
    pub price_min: Option<String>,
    /// Inclusive upper bound, decimal string.
    pub price_max: Option<String>,
}

/// The public face of a device: no donor, notes, or approval internals.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeviceSummary {
    pub id: Uuid,
    pub listing_id: String,
    pub title: String,
    pub description: String,
    #[schema(value_type = String)]
    pub category: DeviceCategory,
    #[schema(value_type = String)]
    pub condition: DeviceCondition,
    #[schema(value_type = String)]
    pub status: DeviceStatus,
    pub image_urls: Vec<String>,
}

impl From<&DeviceRecord> for DeviceSummary {
    fn from(d: &DeviceRecord) -> Self {
        Self {
            id: d.id,
            listing_id: d.listing_id.as_str().to_string(),
            title: d.title.clone(),
            description: d.description.clone(),
            category: d.category,
            condition: d.condition,
            status: d.status,
            image_urls: d.image_urls.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ListingView {
    pub id: Uuid,
    #[schema(value_type = String)]
    pub price: Amount,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub device: DeviceSummary,
    /// Whether the device has passed repair certification.
    pub is_certified: bool,
    pub is_sold: bool,
    /// The most recent non-cancelled order, if any.
    pub latest_order: Option<LatestOrder>,
}

/// What the public may see of a listing's current order.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LatestOrder {
    pub id: Uuid,
    #[schema(value_type = String)]
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&OrderRecord> for LatestOrder {
    fn from(order: &OrderRecord) -> Self {
        Self {
            id: order.id,
            status: order.status,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListingDetail {
    #[serde(flatten)]
    pub listing: ListingView,
    #[schema(value_type = Vec<Object>)]
    pub history: Vec<DeviceStatusChange>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PlaceOrderRequest {
    pub shipping_address: String,
}

impl Validate for PlaceOrderRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("shipping_address", &self.shipping_address, MAX_ADDRESS_LEN)
    }
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/v1/marketplace/listings", get(list_listings))
        .route("/v1/marketplace/listings/{id}", get(get_listing))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/marketplace/listings/{id}/orders", post(place_order))
        .route("/v1/marketplace/orders/{id}", get(get_order))
}

fn listing_view(state: &AppState, listing: ListingRecord, device: &DeviceRecord) -> ListingView {
    let latest_order = orchestration::latest_order(state, listing.id);
    ListingView {
        is_sold: latest_order.is_some(),
        latest_order: latest_order.as_ref().map(LatestOrder::from),
        id: listing.id,
        price: listing.price,
        is_active: listing.is_active,
        created_at: listing.created_at,
        device: DeviceSummary::from(device),
        is_certified: device.status.is_certified(),
    }
}

/// Active listings of approved devices matching `filter`, newest first.
pub fn browse(state: &AppState, filter: &ListingFilter) -> Result<Vec<ListingView>, AppError> {
    let category = filter
        .category
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<DeviceCategory>)
        .transpose()?;
    let condition = filter
        .condition
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<DeviceCondition>)
        .transpose()?;
    let price_min = filter
        .price_min
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(Amount::parse)
        .transpose()?;
    let price_max = filter
        .price_max
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(Amount::parse)
        .transpose()?;

    let mut listings = state.listings.filter(|l| {
        l.is_active
            && price_min.map_or(true, |min| l.price >= min)
            && price_max.map_or(true, |max| l.price <= max)
    });
    listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(listings
        .into_iter()
        .filter_map(|listing| {
            let device = state.devices.get(&listing.device_id)?;
            let visible = device.admin_approval_status == ApprovalStatus::Approved
                && category.map_or(true, |c| device.category == c)
                && condition.map_or(true, |c| device.condition == c);
            visible.then(|| listing_view(state, listing, &device))
        })
        .collect())
}

/// GET /v1/marketplace/listings — Browse listings.
#[utoipa::path(
    get,
    path = "/v1/marketplace/listings",
    params(
        ("category" = Option<String>, Query, description = "Device category"),
        ("condition" = Option<String>, Query, description = "Device condition"),
        ("price_min" = Option<String>, Query, description = "Minimum price"),
        ("price_max" = Option<String>, Query, description = "Maximum price"),
    ),
    responses(
        (status = 200, description = "Listings", body = Vec<ListingView>),
        (status = 422, description = "Bad filter value", body = crate::error::ErrorBody),
    ),
    tag = "marketplace"
)]
async fn list_listings(
    State(state): State<AppState>,
    Query(filter): Query<ListingFilter>,
) -> Result<Json<Vec<ListingView>>, AppError> {
    browse(&state, &filter).map(Json)
}

/// GET /v1/marketplace/listings/{id} — Listing with device history.
#[utoipa::path(
    get,
    path = "/v1/marketplace/listings/{id}",
    params(("id" = Uuid, Path, description = "Listing ID")),
    responses(
        (status = 200, description = "Listing", body = ListingDetail),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "marketplace"
)]
async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ListingDetail>, AppError> {
    let listing = state
        .listings
        .get(&id)
        .ok_or_else(|| AppError::not_found("listing", id))?;
    let device = state
        .devices
        .get(&listing.device_id)
        .ok_or_else(|| AppError::not_found("listing", id))?;
    Ok(Json(ListingDetail {
        listing: listing_view(&state, listing, &device),
        history: device.history,
    }))
}

/// POST /v1/marketplace/listings/{id}/orders — Buy a listed device.
#[utoipa::path(
    post,
    path = "/v1/marketplace/listings/{id}/orders",
    params(("id" = Uuid, Path, description = "Listing ID")),
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = OrderRecord),
        (status = 404, description = "Listing not found", body = crate::error::ErrorBody),
        (status = 409, description = "Unavailable or already sold", body = crate::error::ErrorBody),
        (status = 422, description = "Shipping address required", body = crate::error::ErrorBody),
    ),
    tag = "marketplace"
)]
async fn place_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<PlaceOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderRecord>), AppError> {
    require_role(&caller, BUYER_ROLES)?;
    let req = extract_validated_json(body)?;
    let order = orchestration::place_order(&state, caller.user_id, id, &req.shipping_address).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /v1/marketplace/orders/{id} — The caller's order.
#[utoipa::path(
    get,
    path = "/v1/marketplace/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order", body = OrderRecord),
        (status = 404, description = "Not found or not yours", body = crate::error::ErrorBody),
    ),
    tag = "marketplace"
)]
async fn get_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderRecord>, AppError> {
    state
        .orders
        .get(&id)
        .filter(|o| o.buyer_id == caller.user_id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("order", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_shipping_address_is_rejected() {
        let req = PlaceOrderRequest {
            shipping_address: "  ".into(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn browse_on_empty_state_is_empty() {
        let state = AppState::new();
        assert!(browse(&state, &ListingFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn unknown_category_filter_is_a_validation_error() {
        let state = AppState::new();
        let filter = ListingFilter {
            category: Some("spaceship".into()),
            ..Default::default()
        };
        assert!(matches!(browse(&state, &filter), Err(AppError::Validation(_))));
    }

    #[test]
    fn malformed_price_bound_is_a_validation_error() {
        let state = AppState::new();
        let filter = ListingFilter {
            price_min: Some("ten".into()),
            ..Default::default()
        };
        assert!(matches!(browse(&state, &filter), Err(AppError::Validation(_))));
    }
}
