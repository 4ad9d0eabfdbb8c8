//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI 3.1 spec,
//! served unauthenticated at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Adds the session bearer scheme to the OpenAPI spec.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some(
                            "Session token returned by /v1/accounts/login or /v1/accounts/otp/verify.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Nayi Umeed API",
        version = "0.1.0",
        description = "Medical device donation, repair, logistics, and redistribution platform.",
    ),
    paths(
        // Accounts
        crate::routes::accounts::register,
        crate::routes::accounts::login,
        crate::routes::accounts::verify_otp,
        crate::routes::accounts::logout,
        crate::routes::accounts::me,
        crate::routes::accounts::dashboard,
        // Devices
        crate::routes::devices::create_device,
        crate::routes::devices::my_devices,
        crate::routes::devices::get_device,
        crate::routes::devices::device_history,
        crate::routes::devices::update_status,
        // Repairs
        crate::routes::repairs::list_repairs,
        crate::routes::repairs::get_repair,
        crate::routes::repairs::update_repair,
        // Logistics
        crate::routes::logistics::list_tasks,
        crate::routes::logistics::get_task,
        crate::routes::logistics::create_pickup,
        crate::routes::logistics::create_delivery,
        crate::routes::logistics::picked_up,
        crate::routes::logistics::delivered,
        crate::routes::logistics::cancel,
        // Marketplace
        crate::routes::marketplace::list_listings,
        crate::routes::marketplace::get_listing,
        crate::routes::marketplace::place_order,
        crate::routes::marketplace::get_order,
        // Admin
        crate::routes::admin::dashboard,
        crate::routes::admin::analytics,
        crate::routes::admin::list_devices,
        crate::routes::admin::review_device,
        crate::routes::admin::assign_repair,
        crate::routes::admin::list_users,
        crate::routes::admin::update_user,
        crate::routes::admin::list_orders,
        crate::routes::admin::get_order,
        crate::routes::admin::update_order_status,
        crate::routes::admin::sync_listings,
        crate::routes::admin::audit_events,
        crate::routes::admin::verify_audit_chain,
        // Impact analytics
        crate::routes::analytics::impact,
        crate::routes::analytics::impact_chart,
        crate::routes::analytics::list_regions,
        crate::routes::analytics::create_region,
        crate::routes::analytics::record_impact,
        crate::routes::analytics::list_snapshots,
        crate::routes::analytics::capture_snapshot,
    ),
    components(schemas(
        // Records
        crate::model::UserRecord,
        crate::model::DeviceRecord,
        crate::model::RepairAssignmentRecord,
        crate::model::LogisticsTaskRecord,
        crate::model::ListingRecord,
        crate::model::OrderRecord,
        crate::model::RegionRecord,
        crate::model::DeviceImpactRecord,
        crate::model::BottleneckSnapshotRecord,
        crate::auth::Role,
        crate::auth::IssuedSession,
        // Error types
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        // Reports
        crate::reports::ChartData,
        crate::reports::PipelineTotals,
        crate::reports::AdminDashboard,
        crate::reports::Bottlenecks,
        crate::reports::RegionStats,
        crate::reports::ImpactSummary,
        crate::reports::ImpactChart,
        crate::reports::OrderStats,
        crate::orchestration::ReviewOutcome,
        crate::db::audit::AuditEventRow,
        crate::db::audit::ChainIntegrityResult,
        // Account DTOs
        crate::routes::accounts::RegisterRequest,
        crate::routes::accounts::LoginRequest,
        crate::routes::accounts::VerifyOtpRequest,
        crate::routes::accounts::OtpChallenge,
        crate::routes::accounts::LoginResponse,
        crate::routes::accounts::DashboardResponse,
        // Device DTOs
        crate::routes::devices::CreateDeviceRequest,
        crate::routes::devices::UpdateStatusRequest,
        crate::routes::devices::DeviceHistoryResponse,
        // Repair DTOs
        crate::routes::repairs::RepairSummary,
        crate::routes::repairs::UpdateRepairRequest,
        // Logistics DTOs
        crate::routes::logistics::CreatePickupRequest,
        crate::routes::logistics::CreateDeliveryRequest,
        crate::routes::logistics::ProgressRequest,
        crate::routes::logistics::CancelRequest,
        crate::routes::logistics::TaskView,
        // Marketplace DTOs
        crate::routes::marketplace::DeviceSummary,
        crate::routes::marketplace::ListingView,
        crate::routes::marketplace::LatestOrder,
        crate::routes::marketplace::ListingDetail,
        crate::routes::marketplace::PlaceOrderRequest,
        // Admin DTOs
        crate::routes::admin::ReviewRequest,
        crate::routes::admin::AssignRepairRequest,
        crate::routes::admin::UserListResponse,
        crate::routes::admin::UpdateUserRequest,
        crate::routes::admin::OrderListResponse,
        crate::routes::admin::OrderStatusRequest,
        crate::routes::admin::SyncListingsResponse,
        // Analytics DTOs
        crate::routes::analytics::CreateRegionRequest,
        crate::routes::analytics::RecordImpactRequest,
        crate::routes::analytics::SnapshotRequest,
    )),
    modifiers(&SecurityAddon),
    security(("bearer_auth" = [])),
    tags(
        (name = "accounts", description = "Registration, OTP login, sessions"),
        (name = "devices", description = "Device donation and status flow"),
        (name = "repairs", description = "Repair partner assignments and certification"),
        (name = "logistics", description = "Pickup and delivery tasks"),
        (name = "marketplace", description = "Listings and orders"),
        (name = "admin", description = "Admin panel"),
        (name = "analytics", description = "Impact analytics and bottleneck snapshots"),
    )
)]
pub struct ApiDoc;

/// Serves the OpenAPI JSON spec at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
