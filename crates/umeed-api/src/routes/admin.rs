//! # Admin Panel API
//!
//! Dashboards, device review, repair assignment, user and order management,
//! and the audit trail. Every handler requires the admin role (or staff).
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `GET` | `/v1/admin/dashboard` | `dashboard` |
//! | `GET` | `/v1/admin/analytics` | `analytics` |
//! | `GET` | `/v1/admin/devices` | `list_devices` |
//! | `POST` | `/v1/admin/devices/{id}/approval` | `review_device` |
//! | `POST` | `/v1/admin/devices/{id}/repair` | `assign_repair` |
//! | `GET` | `/v1/admin/users` | `list_users` |
//! | `PATCH` | `/v1/admin/users/{id}` | `update_user` |
//! | `GET` | `/v1/admin/orders` | `list_orders` |
//! | `GET` | `/v1/admin/orders/{id}` | `get_order` |
//! | `POST` | `/v1/admin/orders/{id}/status` | `update_order_status` |
//! | `POST` | `/v1/admin/listings/sync` | `sync_listings` |
//! | `GET` | `/v1/admin/audit` | `audit_events` |
//! | `GET` | `/v1/admin/audit/verify` | `verify_audit_chain` |

use std::collections::HashMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use umeed_state::{ApprovalStatus, DeviceStatus, OrderStatus};

use crate::auth::{require_admin, CallerIdentity, Role};
use crate::db::audit::{self, AuditEventRow, ChainIntegrityResult};
use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, Validate};
use crate::model::{DeviceRecord, OrderRecord, RepairAssignmentRecord, UserRecord};
use crate::orchestration::{self, DeviceReview, ReviewOutcome};
use crate::reports::{self, AdminDashboard, ChartData, OrderStats};
use crate::state::AppState;

// -- Request / response types --------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChartQuery {
    /// `device_status` (default), `device_category`, `monthly_trends`,
    /// `approval_status`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeviceFilter {
    pub approval_status: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReviewRequest {
    pub approval_status: String,
    #[serde(default)]
    pub admin_notes: String,
    /// Status to move the device to, bypassing the ordered flow if needed.
    #[serde(default)]
    pub status_override: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRepairRequest {
    pub repair_partner_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleFilter {
    pub role: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserListResponse {
    pub users: Vec<UserRecord>,
    /// Users per role name, including roles with none.
    pub counts: HashMap<String, u64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUserRequest {
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

impl Validate for UpdateUserRequest {
    fn validate(&self) -> Result<(), String> {
        if self.role.is_none() && self.is_active.is_none() {
            return Err("nothing to update: set role and/or is_active".to_string());
        }
        match self.role.as_deref() {
            Some(name) if Role::from_name(name).is_none() => Err(format!("unknown role '{name}'")),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrderFilter {
    pub status: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderRecord>,
    pub stats: OrderStats,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrderStatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncListingsResponse {
    pub created: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuditQuery {
    pub resource_type: String,
    pub resource_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyQuery {
    /// Events to check from the start of the chain (default 10000).
    pub limit: Option<i64>,
}

// -- Router --------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/dashboard", get(dashboard))
        .route("/v1/admin/analytics", get(analytics))
        .route("/v1/admin/devices", get(list_devices))
        .route("/v1/admin/devices/{id}/approval", post(review_device))
        .route("/v1/admin/devices/{id}/repair", post(assign_repair))
        .route("/v1/admin/users", get(list_users))
        .route("/v1/admin/users/{id}", patch(update_user))
        .route("/v1/admin/orders", get(list_orders))
        .route("/v1/admin/orders/{id}", get(get_order))
        .route("/v1/admin/orders/{id}/status", post(update_order_status))
        .route("/v1/admin/listings/sync", post(sync_listings))
        .route("/v1/admin/audit", get(audit_events))
        .route("/v1/admin/audit/verify", get(verify_audit_chain))
}

// -- Handlers ------------------------------------------------------------------

/// GET /v1/admin/dashboard — Totals and recent activity.
#[utoipa::path(
    get,
    path = "/v1/admin/dashboard",
    responses((status = 200, description = "Dashboard", body = AdminDashboard)),
    tag = "admin"
)]
async fn dashboard(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<AdminDashboard>, AppError> {
    require_admin(&caller)?;
    Ok(Json(reports::admin_dashboard(&state)))
}

/// GET /v1/admin/analytics — Chart data.
#[utoipa::path(
    get,
    path = "/v1/admin/analytics",
    params(("type" = Option<String>, Query, description = "Chart name")),
    responses((status = 200, description = "Chart series", body = ChartData)),
    tag = "admin"
)]
async fn analytics(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(q): Query<ChartQuery>,
) -> Result<Json<ChartData>, AppError> {
    require_admin(&caller)?;
    let kind = q.kind.as_deref().unwrap_or("device_status");
    Ok(Json(reports::admin_chart(&state, kind, Utc::now())))
}

/// GET /v1/admin/devices — Device management list, newest first.
///
/// Creates any missing listings for approved devices before listing.
#[utoipa::path(
    get,
    path = "/v1/admin/devices",
    params(
        ("approval_status" = Option<String>, Query, description = "Filter by approval status"),
        ("status" = Option<String>, Query, description = "Filter by device status"),
    ),
    responses(
        (status = 200, description = "Devices", body = Vec<DeviceRecord>),
        (status = 422, description = "Unknown filter value", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn list_devices(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<DeviceFilter>,
) -> Result<Json<Vec<DeviceRecord>>, AppError> {
    require_admin(&caller)?;
    let approval = filter
        .approval_status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<ApprovalStatus>)
        .transpose()?;
    let status = filter
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<DeviceStatus>)
        .transpose()?;

    orchestration::ensure_marketplace_listings(&state).await?;

    let devices = state.devices.filter(|d| {
        approval.map_or(true, |a| d.admin_approval_status == a)
            && status.map_or(true, |s| d.status == s)
    });
    Ok(Json(reports::devices_newest_first(devices)))
}

/// POST /v1/admin/devices/{id}/approval — Review a device.
#[utoipa::path(
    post,
    path = "/v1/admin/devices/{id}/approval",
    params(("id" = Uuid, Path, description = "Device ID")),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Review applied", body = ReviewOutcome),
        (status = 404, description = "Device not found", body = crate::error::ErrorBody),
        (status = 422, description = "Unknown status name", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn review_device(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ReviewRequest>, JsonRejection>,
) -> Result<Json<ReviewOutcome>, AppError> {
    require_admin(&caller)?;
    let req = extract_json(body)?;
    let review = DeviceReview {
        approval: req.approval_status.parse()?,
        notes: req.admin_notes,
        status_override: req
            .status_override
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<DeviceStatus>)
            .transpose()?,
    };
    orchestration::review_device(&state, caller.user_id, id, review)
        .await
        .map(Json)
}

/// POST /v1/admin/devices/{id}/repair — Assign a repair partner.
#[utoipa::path(
    post,
    path = "/v1/admin/devices/{id}/repair",
    params(("id" = Uuid, Path, description = "Device ID")),
    request_body = AssignRepairRequest,
    responses(
        (status = 200, description = "Assignment created or updated", body = RepairAssignmentRecord),
        (status = 404, description = "Device or user not found", body = crate::error::ErrorBody),
        (status = 422, description = "User is not a repair partner", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn assign_repair(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<AssignRepairRequest>, JsonRejection>,
) -> Result<Json<RepairAssignmentRecord>, AppError> {
    require_admin(&caller)?;
    let req = extract_json(body)?;
    orchestration::assign_repair_partner(&state, caller.user_id, id, req.repair_partner_id)
        .await
        .map(Json)
}

/// GET /v1/admin/users — Users, newest first, with per-role counts.
#[utoipa::path(
    get,
    path = "/v1/admin/users",
    params(("role" = Option<String>, Query, description = "Filter by role")),
    responses((status = 200, description = "Users", body = UserListResponse)),
    tag = "admin"
)]
async fn list_users(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<RoleFilter>,
) -> Result<Json<UserListResponse>, AppError> {
    require_admin(&caller)?;
    let role = match filter.role.as_deref().filter(|s| !s.is_empty()) {
        Some(name) => Some(
            Role::from_name(name)
                .ok_or_else(|| AppError::Validation(format!("unknown role '{name}'")))?,
        ),
        None => None,
    };
    let mut users = state.users.filter(|u| role.map_or(true, |r| u.role == r));
    users.sort_by(|a, b| b.date_joined.cmp(&a.date_joined));
    Ok(Json(UserListResponse {
        users,
        counts: reports::role_counts(&state),
    }))
}

/// PATCH /v1/admin/users/{id} — Set role and/or active flag.
#[utoipa::path(
    patch,
    path = "/v1/admin/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = UserRecord),
        (status = 404, description = "User not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn update_user(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<UserRecord>, AppError> {
    require_admin(&caller)?;
    let req = extract_validated_json(body)?;
    let role = req.role.as_deref().and_then(Role::from_name);
    orchestration::update_user(&state, Some(caller.user_id), id, role, req.is_active)
        .await
        .map(Json)
}

/// GET /v1/admin/orders — Orders, newest first, with totals.
#[utoipa::path(
    get,
    path = "/v1/admin/orders",
    params(("status" = Option<String>, Query, description = "Filter by order status")),
    responses((status = 200, description = "Orders", body = OrderListResponse)),
    tag = "admin"
)]
async fn list_orders(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<OrderFilter>,
) -> Result<Json<OrderListResponse>, AppError> {
    require_admin(&caller)?;
    let status = filter
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<OrderStatus>)
        .transpose()?;
    let orders = state.orders.filter(|o| status.map_or(true, |s| o.status == s));
    Ok(Json(OrderListResponse {
        orders: reports::orders_newest_first(orders),
        stats: reports::order_stats(&state),
    }))
}

/// GET /v1/admin/orders/{id} — Order with its status history.
#[utoipa::path(
    get,
    path = "/v1/admin/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order", body = OrderRecord),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn get_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderRecord>, AppError> {
    require_admin(&caller)?;
    state
        .orders
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("order", id))
}

/// POST /v1/admin/orders/{id}/status — Set any order status.
#[utoipa::path(
    post,
    path = "/v1/admin/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = OrderStatusRequest,
    responses(
        (status = 200, description = "Status set", body = OrderRecord),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 422, description = "Unknown status", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn update_order_status(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<OrderStatusRequest>, JsonRejection>,
) -> Result<Json<OrderRecord>, AppError> {
    require_admin(&caller)?;
    let req = extract_json(body)?;
    let target = req.status.parse::<OrderStatus>()?;
    orchestration::advance_order(&state, caller.user_id, id, target)
        .await
        .map(Json)
}

/// POST /v1/admin/listings/sync — Create missing listings.
#[utoipa::path(
    post,
    path = "/v1/admin/listings/sync",
    responses((status = 200, description = "Listings created", body = SyncListingsResponse)),
    tag = "admin"
)]
async fn sync_listings(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<SyncListingsResponse>, AppError> {
    require_admin(&caller)?;
    let created = orchestration::ensure_marketplace_listings(&state).await?;
    Ok(Json(SyncListingsResponse { created }))
}

fn audit_pool(state: &AppState) -> Result<&sqlx::PgPool, AppError> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::ServiceUnavailable("audit trail requires a configured database".to_string())
    })
}

/// GET /v1/admin/audit — Audit events for one resource, oldest first.
#[utoipa::path(
    get,
    path = "/v1/admin/audit",
    params(
        ("resource_type" = String, Query, description = "e.g. device, order, logistics_task"),
        ("resource_id" = Uuid, Query, description = "Resource ID"),
    ),
    responses(
        (status = 200, description = "Events", body = Vec<AuditEventRow>),
        (status = 503, description = "No database configured", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn audit_events(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(q): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEventRow>>, AppError> {
    require_admin(&caller)?;
    let pool = audit_pool(&state)?;
    audit::events_for_resource(pool, &q.resource_type, q.resource_id)
        .await
        .map(Json)
        .map_err(|e| AppError::Internal(format!("audit query failed: {e}")))
}

/// GET /v1/admin/audit/verify — Check the audit hash chain.
#[utoipa::path(
    get,
    path = "/v1/admin/audit/verify",
    params(("limit" = Option<i64>, Query, description = "Events to check")),
    responses(
        (status = 200, description = "Integrity report", body = ChainIntegrityResult),
        (status = 503, description = "No database configured", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn verify_audit_chain(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(q): Query<VerifyQuery>,
) -> Result<Json<ChainIntegrityResult>, AppError> {
    require_admin(&caller)?;
    let pool = audit_pool(&state)?;
    let limit = q.limit.unwrap_or(10_000).max(1);
    let result = audit::verify_chain_integrity(pool, limit)
        .await
        .map_err(|e| AppError::Internal(format!("audit verification failed: {e}")))?;
    if !result.chain_valid {
        tracing::error!(
            broken_links = result.broken_links,
            tampered = result.tampered,
            "audit chain integrity check failed"
        );
    }
    Ok(Json(result))
}
