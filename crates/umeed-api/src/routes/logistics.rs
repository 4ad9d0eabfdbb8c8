//! # Logistics API
//!
//! Pickup and delivery tasks. Admins create tasks and see all of them;
//! field staff see and progress only the tasks assigned to them.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `GET` | `/v1/logistics/tasks` | `list_tasks` |
//! | `GET` | `/v1/logistics/tasks/{id}` | `get_task` |
//! | `POST` | `/v1/logistics/devices/{id}/pickup` | `create_pickup` |
//! | `POST` | `/v1/logistics/orders/{id}/delivery` | `create_delivery` |
//! | `POST` | `/v1/logistics/tasks/{id}/picked-up` | `picked_up` |
//! | `POST` | `/v1/logistics/tasks/{id}/delivered` | `delivered` |
//! | `POST` | `/v1/logistics/tasks/{id}/cancel` | `cancel` |

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use umeed_core::GeoPoint;
use umeed_state::{ProgressReport, TaskStatus, TaskType};

use crate::auth::{require_admin, require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, optional_url, Validate};
use crate::model::LogisticsTaskRecord;
use crate::orchestration;
use crate::state::AppState;

const FIELD_ROLES: &[Role] = &[Role::Admin, Role::RepairPartner];

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskFilter {
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePickupRequest {
    pub pickup_address: String,
    pub assigned_to: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDeliveryRequest {
    pub assigned_to: Option<Uuid>,
}

/// Proof of a completed step. Latitude and longitude come as a pair.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ProgressRequest {
    pub proof_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub notes: String,
}

impl Validate for ProgressRequest {
    fn validate(&self) -> Result<(), String> {
        optional_url("proof_url", self.proof_url.as_deref())
    }
}

impl ProgressRequest {
    fn into_report(self) -> Result<ProgressReport, AppError> {
        Ok(ProgressReport {
            location: GeoPoint::from_parts(self.latitude, self.longitude)?,
            proof_url: self.proof_url,
            notes: self.notes,
        })
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelRequest {
    #[serde(default)]
    pub note: String,
}

/// A task as returned to clients, with the address staff should travel to.
#[derive(Debug, Serialize, ToSchema)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: LogisticsTaskRecord,
    pub display_address: String,
}

impl TaskView {
    pub fn new(state: &AppState, task: LogisticsTaskRecord) -> Self {
        Self {
            display_address: orchestration::display_address(state, &task),
            task,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/logistics/tasks", get(list_tasks))
        .route("/v1/logistics/tasks/{id}", get(get_task))
        .route("/v1/logistics/devices/{id}/pickup", post(create_pickup))
        .route("/v1/logistics/orders/{id}/delivery", post(create_delivery))
        .route("/v1/logistics/tasks/{id}/picked-up", post(picked_up))
        .route("/v1/logistics/tasks/{id}/delivered", post(delivered))
        .route("/v1/logistics/tasks/{id}/cancel", post(cancel))
}

/// Tasks the caller may see, newest first. Unrecognized filter values are
/// ignored.
pub fn visible_tasks(
    state: &AppState,
    caller: &CallerIdentity,
    filter: &TaskFilter,
) -> Vec<LogisticsTaskRecord> {
    let task_type = filter
        .task_type
        .as_deref()
        .and_then(|s| s.parse::<TaskType>().ok());
    let status = filter
        .status
        .as_deref()
        .and_then(|s| s.parse::<TaskStatus>().ok());
    let all = caller.is_admin();

    let mut tasks = state.tasks.filter(|t| {
        (all || t.is_assigned_to(caller.user_id))
            && task_type.map_or(true, |ty| t.task_type == ty)
            && status.map_or(true, |s| t.status == s)
    });
    tasks.sort_by(|a, b| b.assigned_at.cmp(&a.assigned_at));
    tasks
}

/// GET /v1/logistics/tasks
#[utoipa::path(
    get,
    path = "/v1/logistics/tasks",
    params(
        ("type" = Option<String>, Query, description = "pickup or delivery"),
        ("status" = Option<String>, Query, description = "Task status"),
    ),
    responses(
        (status = 200, description = "Tasks", body = Vec<TaskView>),
        (status = 403, description = "Role not permitted", body = crate::error::ErrorBody),
    ),
    tag = "logistics"
)]
async fn list_tasks(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<TaskFilter>,
) -> Result<Json<Vec<TaskView>>, AppError> {
    require_role(&caller, FIELD_ROLES)?;
    let tasks = visible_tasks(&state, &caller, &filter);
    Ok(Json(tasks.into_iter().map(|t| TaskView::new(&state, t)).collect()))
}

/// GET /v1/logistics/tasks/{id}
#[utoipa::path(
    get,
    path = "/v1/logistics/tasks/{id}",
    params(("id" = Uuid, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task", body = TaskView),
        (status = 403, description = "Not assigned to you", body = crate::error::ErrorBody),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "logistics"
)]
async fn get_task(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskView>, AppError> {
    let task = orchestration::task_for(&state, &caller, id)?;
    Ok(Json(TaskView::new(&state, task)))
}

/// POST /v1/logistics/devices/{id}/pickup — Schedule a pickup.
#[utoipa::path(
    post,
    path = "/v1/logistics/devices/{id}/pickup",
    params(("id" = Uuid, Path, description = "Device ID")),
    request_body = CreatePickupRequest,
    responses(
        (status = 201, description = "Task created", body = TaskView),
        (status = 404, description = "Device not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "logistics"
)]
async fn create_pickup(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<CreatePickupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskView>), AppError> {
    require_admin(&caller)?;
    let req = extract_json(body)?;
    let task =
        orchestration::create_pickup_task(&state, caller.user_id, id, req.pickup_address, req.assigned_to)
            .await?;
    Ok((StatusCode::CREATED, Json(TaskView::new(&state, task))))
}

/// POST /v1/logistics/orders/{id}/delivery — Schedule a delivery.
#[utoipa::path(
    post,
    path = "/v1/logistics/orders/{id}/delivery",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = CreateDeliveryRequest,
    responses(
        (status = 201, description = "Task created", body = TaskView),
        (status = 404, description = "Order not found", body = crate::error::ErrorBody),
    ),
    tag = "logistics"
)]
async fn create_delivery(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<CreateDeliveryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskView>), AppError> {
    require_admin(&caller)?;
    let req = extract_json(body)?;
    let task = orchestration::create_delivery_task(&state, caller.user_id, id, req.assigned_to).await?;
    Ok((StatusCode::CREATED, Json(TaskView::new(&state, task))))
}

/// POST /v1/logistics/tasks/{id}/picked-up
#[utoipa::path(
    post,
    path = "/v1/logistics/tasks/{id}/picked-up",
    params(("id" = Uuid, Path, description = "Task ID")),
    request_body = ProgressRequest,
    responses(
        (status = 200, description = "Marked picked up", body = TaskView),
        (status = 409, description = "Task is not assigned", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "logistics"
)]
async fn picked_up(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ProgressRequest>, JsonRejection>,
) -> Result<Json<TaskView>, AppError> {
    let report = extract_validated_json(body)?.into_report()?;
    let task = orchestration::mark_task_picked_up(&state, &caller, id, report).await?;
    Ok(Json(TaskView::new(&state, task)))
}

/// POST /v1/logistics/tasks/{id}/delivered
#[utoipa::path(
    post,
    path = "/v1/logistics/tasks/{id}/delivered",
    params(("id" = Uuid, Path, description = "Task ID")),
    request_body = ProgressRequest,
    responses(
        (status = 200, description = "Marked delivered", body = TaskView),
        (status = 409, description = "Task is not picked up", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "logistics"
)]
async fn delivered(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ProgressRequest>, JsonRejection>,
) -> Result<Json<TaskView>, AppError> {
    let report = extract_validated_json(body)?.into_report()?;
    let task = orchestration::mark_task_delivered(&state, &caller, id, report).await?;
    Ok(Json(TaskView::new(&state, task)))
}

/// POST /v1/logistics/tasks/{id}/cancel
#[utoipa::path(
    post,
    path = "/v1/logistics/tasks/{id}/cancel",
    params(("id" = Uuid, Path, description = "Task ID")),
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Cancelled", body = TaskView),
        (status = 409, description = "Task already finished", body = crate::error::ErrorBody),
    ),
    tag = "logistics"
)]
async fn cancel(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<CancelRequest>, JsonRejection>,
) -> Result<Json<TaskView>, AppError> {
    let req = extract_json(body)?;
    let task = orchestration::cancel_task(&state, &caller, id, &req.note).await?;
    Ok(Json(TaskView::new(&state, task)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lone_coordinate_is_rejected() {
        let req = ProgressRequest {
            latitude: Some(18.52),
            ..Default::default()
        };
        assert!(matches!(req.into_report(), Err(AppError::Validation(_))));
    }

    #[test]
    fn coordinates_pair_into_a_point() {
        let req = ProgressRequest {
            latitude: Some(18.52),
            longitude: Some(73.85),
            notes: "left at reception".into(),
            ..Default::default()
        };
        let report = req.into_report().unwrap();
        let point = report.location.unwrap();
        assert_eq!(point.latitude(), 18.52);
        assert_eq!(report.notes, "left at reception");
    }

    #[test]
    fn proof_url_is_checked() {
        let req = ProgressRequest {
            proof_url: Some("not a url".into()),
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }
}
