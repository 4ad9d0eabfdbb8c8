//! # Device Intake API
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/v1/devices` | `create_device` |
//! | `GET` | `/v1/devices/mine` | `my_devices` |
//! | `GET` | `/v1/devices/{id}` | `get_device` |
//! | `GET` | `/v1/devices/{id}/history` | `device_history` |
//! | `POST` | `/v1/devices/{id}/status` | `update_status` |

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use umeed_core::Amount;
use umeed_state::{DeviceCategory, DeviceCondition, DeviceStatus, DeviceStatusChange};

use crate::auth::{require_admin, require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, require_text, require_url, Validate};
use crate::model::DeviceRecord;
use crate::orchestration::{self, NewDevice};
use crate::reports::devices_newest_first;
use crate::state::AppState;

/// Roles allowed to donate.
pub const DONOR_ROLES: &[Role] = &[Role::Donor, Role::Both, Role::Admin];

pub const MAX_TITLE_LEN: usize = 120;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDeviceRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// `oxygen_concentrator`, `ventilator`, `monitor`, `wheelchair`, `other`.
    pub category: String,
    /// `new`, `good`, `needs_repair`.
    pub condition: String,
    /// Asking price as a decimal string with at most two places.
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

impl Validate for CreateDeviceRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("title", &self.title, MAX_TITLE_LEN)?;
        for url in &self.image_urls {
            require_url("image_urls", url)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeviceHistoryResponse {
    pub device_id: Uuid,
    #[schema(value_type = String)]
    pub status: DeviceStatus,
    #[schema(value_type = Vec<Object>)]
    pub history: Vec<DeviceStatusChange>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/devices", post(create_device))
        .route("/v1/devices/mine", get(my_devices))
        .route("/v1/devices/{id}", get(get_device))
        .route("/v1/devices/{id}/history", get(device_history))
        .route("/v1/devices/{id}/status", post(update_status))
}

/// Admins, `both` accounts, and the donor may see a device.
fn visible_device(
    state: &AppState,
    caller: &CallerIdentity,
    id: Uuid,
) -> Result<DeviceRecord, AppError> {
    let device = state
        .devices
        .get(&id)
        .ok_or_else(|| AppError::not_found("device", id))?;
    if caller.has_any_role(&[Role::Admin, Role::Both]) || device.donor_id == caller.user_id {
        Ok(device)
    } else {
        Err(AppError::Forbidden("you cannot access this device".to_string()))
    }
}

/// POST /v1/devices — Submit a donation.
#[utoipa::path(
    post,
    path = "/v1/devices",
    request_body = CreateDeviceRequest,
    responses(
        (status = 201, description = "Device submitted", body = DeviceRecord),
        (status = 403, description = "Role may not donate", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "devices"
)]
async fn create_device(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateDeviceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DeviceRecord>), AppError> {
    require_role(&caller, DONOR_ROLES)?;
    let req = extract_validated_json(body)?;

    let input = NewDevice {
        title: req.title.trim().to_string(),
        description: req.description,
        category: req.category.parse::<DeviceCategory>()?,
        condition: req.condition.parse::<DeviceCondition>()?,
        price: req.price.as_deref().map(Amount::parse).transpose()?,
        image_urls: req.image_urls,
    };
    let device = orchestration::submit_device(&state, caller.user_id, input).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

/// GET /v1/devices/mine — The caller's donations, newest first.
#[utoipa::path(
    get,
    path = "/v1/devices/mine",
    responses((status = 200, description = "Caller's devices", body = Vec<DeviceRecord>)),
    tag = "devices"
)]
async fn my_devices(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<DeviceRecord>>, AppError> {
    require_role(&caller, DONOR_ROLES)?;
    let mine = state.devices.filter(|d| d.donor_id == caller.user_id);
    Ok(Json(devices_newest_first(mine)))
}

/// GET /v1/devices/{id}
#[utoipa::path(
    get,
    path = "/v1/devices/{id}",
    params(("id" = Uuid, Path, description = "Device ID")),
    responses(
        (status = 200, description = "Device found", body = DeviceRecord),
        (status = 403, description = "Not the donor", body = crate::error::ErrorBody),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "devices"
)]
async fn get_device(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<DeviceRecord>, AppError> {
    visible_device(&state, &caller, id).map(Json)
}

/// GET /v1/devices/{id}/history — Status history, oldest first.
#[utoipa::path(
    get,
    path = "/v1/devices/{id}/history",
    params(("id" = Uuid, Path, description = "Device ID")),
    responses(
        (status = 200, description = "Status history", body = DeviceHistoryResponse),
        (status = 403, description = "Not the donor", body = crate::error::ErrorBody),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "devices"
)]
async fn device_history(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<DeviceHistoryResponse>, AppError> {
    let device = visible_device(&state, &caller, id)?;
    Ok(Json(DeviceHistoryResponse {
        device_id: device.id,
        status: device.status,
        history: device.history,
    }))
}

/// POST /v1/devices/{id}/status — Advance along the ordered flow.
///
/// Skipping ahead or going back is a 409 naming both statuses.
#[utoipa::path(
    post,
    path = "/v1/devices/{id}/status",
    params(("id" = Uuid, Path, description = "Device ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Transition applied", body = DeviceRecord),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Out-of-order transition", body = crate::error::ErrorBody),
        (status = 422, description = "Unknown status", body = crate::error::ErrorBody),
    ),
    tag = "devices"
)]
async fn update_status(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<DeviceRecord>, AppError> {
    require_admin(&caller)?;
    let req = extract_json(body)?;
    let target = req.status.parse::<DeviceStatus>()?;
    orchestration::transition_device(&state, caller.user_id, id, target, &req.note)
        .await
        .map(Json)
}
