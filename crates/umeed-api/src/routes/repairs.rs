//! # Repair Partner API
//!
//! Partners see and update only their own assignments. Assignments are
//! created by admins through `/v1/admin/devices/{id}/repair`.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `GET` | `/v1/repairs` | `list_repairs` |
//! | `GET` | `/v1/repairs/{id}` | `get_repair` |
//! | `PATCH` | `/v1/repairs/{id}` | `update_repair` |

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use umeed_state::{DeviceStatus, RepairStatus};

use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, optional_url, Validate};
use crate::model::RepairAssignmentRecord;
use crate::orchestration::{self, RepairUpdate};
use crate::state::AppState;

const REPAIR_ROLES: &[Role] = &[Role::RepairPartner, Role::Admin];

/// An assignment with enough of its device to render a work queue.
#[derive(Debug, Serialize, ToSchema)]
pub struct RepairSummary {
    #[serde(flatten)]
    pub assignment: RepairAssignmentRecord,
    pub device_title: String,
    pub device_listing_id: String,
    #[schema(value_type = String)]
    pub device_status: DeviceStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateRepairRequest {
    /// `pending`, `in_progress`, `awaiting_parts`, `completed`, `certified`,
    /// `rejected`.
    pub status: Option<String>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub report_url: Option<String>,
    pub report_notes: Option<String>,
    #[serde(default)]
    pub is_certified: bool,
}

impl Validate for UpdateRepairRequest {
    fn validate(&self) -> Result<(), String> {
        optional_url("report_url", self.report_url.as_deref())
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/repairs", get(list_repairs))
        .route("/v1/repairs/{id}", get(get_repair).patch(update_repair))
}

fn summarize(state: &AppState, assignment: RepairAssignmentRecord) -> Option<RepairSummary> {
    let device = state.devices.get(&assignment.device_id)?;
    Some(RepairSummary {
        assignment,
        device_title: device.title,
        device_listing_id: device.listing_id.as_str().to_string(),
        device_status: device.status,
    })
}

/// GET /v1/repairs — The caller's assignments, newest first.
#[utoipa::path(
    get,
    path = "/v1/repairs",
    responses(
        (status = 200, description = "Assignments", body = Vec<RepairSummary>),
        (status = 403, description = "Not a repair partner", body = crate::error::ErrorBody),
    ),
    tag = "repairs"
)]
async fn list_repairs(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<RepairSummary>>, AppError> {
    require_role(&caller, REPAIR_ROLES)?;
    let mut mine = state
        .repairs
        .filter(|r| r.repair_partner_id == caller.user_id);
    mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(
        mine.into_iter()
            .filter_map(|a| summarize(&state, a))
            .collect(),
    ))
}

/// GET /v1/repairs/{id}
#[utoipa::path(
    get,
    path = "/v1/repairs/{id}",
    params(("id" = Uuid, Path, description = "Assignment ID")),
    responses(
        (status = 200, description = "Assignment", body = RepairSummary),
        (status = 404, description = "Not found or not yours", body = crate::error::ErrorBody),
    ),
    tag = "repairs"
)]
async fn get_repair(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<RepairSummary>, AppError> {
    require_role(&caller, REPAIR_ROLES)?;
    let assignment = orchestration::assignment_for(&state, &caller, id)?;
    summarize(&state, assignment)
        .map(Json)
        .ok_or_else(|| AppError::not_found("repair assignment", id))
}

/// PATCH /v1/repairs/{id} — Update progress or certify.
#[utoipa::path(
    patch,
    path = "/v1/repairs/{id}",
    params(("id" = Uuid, Path, description = "Assignment ID")),
    request_body = UpdateRepairRequest,
    responses(
        (status = 200, description = "Assignment updated", body = RepairAssignmentRecord),
        (status = 404, description = "Not found or not yours", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "repairs"
)]
async fn update_repair(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateRepairRequest>, JsonRejection>,
) -> Result<Json<RepairAssignmentRecord>, AppError> {
    require_role(&caller, REPAIR_ROLES)?;
    let req = extract_validated_json(body)?;
    let update = RepairUpdate {
        status: req
            .status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<RepairStatus>)
            .transpose()?,
        estimated_completion: req.estimated_completion,
        report_url: req.report_url,
        report_notes: req.report_notes,
        certify: req.is_certified,
    };
    orchestration::update_repair(&state, &caller, id, update)
        .await
        .map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_url_must_be_http_when_present() {
        let mut req = UpdateRepairRequest {
            status: None,
            estimated_completion: None,
            report_url: None,
            report_notes: None,
            is_certified: false,
        };
        assert!(req.validate().is_ok());
        req.report_url = Some("https://reports.example.org/r1.pdf".into());
        assert!(req.validate().is_ok());
        req.report_url = Some("ftp://reports".into());
        assert!(req.validate().is_err());
    }
}
