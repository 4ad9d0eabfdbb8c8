//! # Impact Analytics API
//!
//! Admin-only. Regions, per-device impact figures, the impact summary and
//! charts, and bottleneck snapshots.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `GET` | `/v1/analytics/impact` | `impact` |
//! | `GET` | `/v1/analytics/impact/chart` | `impact_chart` |
//! | `GET` | `/v1/analytics/regions` | `list_regions` |
//! | `POST` | `/v1/analytics/regions` | `create_region` |
//! | `PUT` | `/v1/analytics/devices/{id}/impact` | `record_impact` |
//! | `GET` | `/v1/analytics/snapshots` | `list_snapshots` |
//! | `POST` | `/v1/analytics/snapshots` | `capture_snapshot` |

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use umeed_core::Amount;

use crate::auth::{require_admin, CallerIdentity};
use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, require_text, Validate};
use crate::model::{BottleneckSnapshotRecord, DeviceImpactRecord, RegionRecord};
use crate::orchestration::{self, NewRegion};
use crate::reports::{self, ImpactChart, ImpactSummary};
use crate::state::AppState;

const DEFAULT_COUNTRY: &str = "India";

#[derive(Debug, Deserialize, ToSchema)]
pub struct ImpactChartQuery {
    /// `global` (default), `regions`, `bottlenecks`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRegionRequest {
    pub name: String,
    pub code: String,
    pub country: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub district: String,
}

impl Validate for CreateRegionRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("name", &self.name, 100)?;
        require_text("code", &self.code, 20)?;
        if self.code.chars().any(char::is_whitespace) {
            return Err("code must not contain whitespace".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordImpactRequest {
    pub region_id: Option<Uuid>,
    #[serde(default)]
    pub beneficiaries: u32,
    /// Kilograms, decimal string. Defaults to zero.
    pub estimated_co2_saved_kg: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SnapshotRequest {
    #[serde(default)]
    pub notes: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/analytics/impact", get(impact))
        .route("/v1/analytics/impact/chart", get(impact_chart))
        .route("/v1/analytics/regions", get(list_regions).post(create_region))
        .route("/v1/analytics/devices/{id}/impact", put(record_impact))
        .route(
            "/v1/analytics/snapshots",
            get(list_snapshots).post(capture_snapshot),
        )
}

/// GET /v1/analytics/impact — Impact totals, regions, live bottlenecks.
#[utoipa::path(
    get,
    path = "/v1/analytics/impact",
    responses((status = 200, description = "Impact summary", body = ImpactSummary)),
    tag = "analytics"
)]
async fn impact(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<ImpactSummary>, AppError> {
    require_admin(&caller)?;
    Ok(Json(reports::impact_summary(&state)))
}

/// GET /v1/analytics/impact/chart
#[utoipa::path(
    get,
    path = "/v1/analytics/impact/chart",
    params(("type" = Option<String>, Query, description = "Chart name")),
    responses((status = 200, description = "Chart payload", body = ImpactChart)),
    tag = "analytics"
)]
async fn impact_chart(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(q): Query<ImpactChartQuery>,
) -> Result<Json<ImpactChart>, AppError> {
    require_admin(&caller)?;
    let kind = q.kind.as_deref().unwrap_or("global");
    Ok(Json(reports::impact_chart(&state, kind)))
}

/// GET /v1/analytics/regions
#[utoipa::path(
    get,
    path = "/v1/analytics/regions",
    responses((status = 200, description = "Regions by name", body = Vec<RegionRecord>)),
    tag = "analytics"
)]
async fn list_regions(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<RegionRecord>>, AppError> {
    require_admin(&caller)?;
    let mut regions = state.regions.list();
    regions.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(regions))
}

/// POST /v1/analytics/regions
#[utoipa::path(
    post,
    path = "/v1/analytics/regions",
    request_body = CreateRegionRequest,
    responses(
        (status = 201, description = "Region created", body = RegionRecord),
        (status = 409, description = "Duplicate code", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "analytics"
)]
async fn create_region(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateRegionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegionRecord>), AppError> {
    require_admin(&caller)?;
    let req = extract_validated_json(body)?;
    let input = NewRegion {
        name: req.name.trim().to_string(),
        code: req.code.trim().to_string(),
        country: req
            .country
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
        state: req.state,
        district: req.district,
    };
    let region = orchestration::create_region(&state, caller.user_id, input).await?;
    Ok((StatusCode::CREATED, Json(region)))
}

/// PUT /v1/analytics/devices/{id}/impact — Set a device's impact figures.
#[utoipa::path(
    put,
    path = "/v1/analytics/devices/{id}/impact",
    params(("id" = Uuid, Path, description = "Device ID")),
    request_body = RecordImpactRequest,
    responses(
        (status = 200, description = "Impact recorded", body = DeviceImpactRecord),
        (status = 404, description = "Device not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "analytics"
)]
async fn record_impact(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<RecordImpactRequest>, JsonRejection>,
) -> Result<Json<DeviceImpactRecord>, AppError> {
    require_admin(&caller)?;
    let req = extract_json(body)?;
    let co2 = req
        .estimated_co2_saved_kg
        .as_deref()
        .map(Amount::parse)
        .transpose()?
        .unwrap_or(Amount::ZERO);
    orchestration::record_device_impact(&state, caller.user_id, id, req.region_id, req.beneficiaries, co2)
        .await
        .map(Json)
}

/// GET /v1/analytics/snapshots — Newest first.
#[utoipa::path(
    get,
    path = "/v1/analytics/snapshots",
    responses((status = 200, description = "Snapshots", body = Vec<BottleneckSnapshotRecord>)),
    tag = "analytics"
)]
async fn list_snapshots(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<BottleneckSnapshotRecord>>, AppError> {
    require_admin(&caller)?;
    let mut snapshots = state.snapshots.list();
    snapshots.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
    Ok(Json(snapshots))
}

/// POST /v1/analytics/snapshots — Store the current bottleneck counts.
#[utoipa::path(
    post,
    path = "/v1/analytics/snapshots",
    request_body = SnapshotRequest,
    responses((status = 201, description = "Snapshot captured", body = BottleneckSnapshotRecord)),
    tag = "analytics"
)]
async fn capture_snapshot(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<SnapshotRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BottleneckSnapshotRecord>), AppError> {
    require_admin(&caller)?;
    let req = extract_json(body)?;
    let snapshot = orchestration::capture_snapshot(&state, caller.user_id, req.notes).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}
