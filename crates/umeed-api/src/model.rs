//! # Record Types
//!
//! API-layer records held in the in-memory stores and persisted by the `db`
//! module. Each record that carries a lifecycle implements the matching
//! trait from `umeed-state`, so status changes always go through the
//! state-machine rules and always append history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use umeed_core::{Amount, EmailAddress, GeoPoint, ListingId, PhoneNumber};
use umeed_state::{
    ApprovalStatus, DeviceCategory, DeviceCondition, DeviceLifecycle, DeviceStatus,
    DeviceStatusChange, OrderLifecycle, OrderStatus, OrderStatusChange, ProgressReport,
    RepairLifecycle, RepairStatus, TaskLifecycle, TaskStatus, TaskStatusChange, TaskType,
};

use crate::auth::Role;

// -- Users --------------------------------------------------------------------

/// A platform account.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    #[schema(value_type = String)]
    pub email: EmailAddress,
    #[schema(value_type = String)]
    pub phone_number: PhoneNumber,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    /// Argon2id PHC string. Never serialized.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub otp_verified: bool,
    pub is_active: bool,
    pub is_staff: bool,
    pub date_joined: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin || self.is_staff
    }

    /// "First Last", falling back to the username when both are blank.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }
}

/// A mock one-time password issued during registration or login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpRequestRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub is_used: bool,
}

// -- Devices ------------------------------------------------------------------

/// A donated medical device.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceRecord {
    pub id: Uuid,
    /// Public `DEV-XXXXXXXX` identifier.
    #[schema(value_type = String)]
    pub listing_id: ListingId,
    pub title: String,
    pub description: String,
    #[schema(value_type = String)]
    pub category: DeviceCategory,
    #[schema(value_type = String)]
    pub condition: DeviceCondition,
    #[schema(value_type = String)]
    pub status: DeviceStatus,
    #[schema(value_type = String)]
    pub admin_approval_status: ApprovalStatus,
    pub admin_notes: String,
    pub donor_id: Uuid,
    /// Asking price as a decimal string.
    #[schema(value_type = Option<String>)]
    pub price: Option<Amount>,
    pub image_urls: Vec<String>,
    /// Append-only status history, oldest first.
    #[schema(value_type = Vec<Object>)]
    pub history: Vec<DeviceStatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceLifecycle for DeviceRecord {
    fn device_status(&self) -> DeviceStatus {
        self.status
    }

    fn apply_device_change(&mut self, change: DeviceStatusChange) {
        self.status = change.to_status;
        self.updated_at = change.changed_at;
        self.history.push(change);
    }
}

// -- Repairs ------------------------------------------------------------------

/// The repair assignment of a device to a repair partner.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RepairAssignmentRecord {
    pub id: Uuid,
    pub device_id: Uuid,
    pub repair_partner_id: Uuid,
    #[schema(value_type = String)]
    pub status: RepairStatus,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub report_url: Option<String>,
    pub report_notes: String,
    pub is_certified: bool,
    pub certified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RepairLifecycle for RepairAssignmentRecord {
    fn repair_status(&self) -> RepairStatus {
        self.status
    }

    fn apply_repair_status(&mut self, status: RepairStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    fn apply_certification(&mut self, certified_at: DateTime<Utc>) {
        self.is_certified = true;
        self.certified_at = Some(certified_at);
    }
}

// -- Logistics ----------------------------------------------------------------

/// A pickup or delivery job assigned to logistics staff.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogisticsTaskRecord {
    pub id: Uuid,
    #[schema(value_type = String)]
    pub task_type: TaskType,
    #[schema(value_type = String)]
    pub status: TaskStatus,
    /// Set for pickup tasks.
    pub device_id: Option<Uuid>,
    /// Set for delivery tasks.
    pub order_id: Option<Uuid>,
    pub pickup_address: String,
    pub delivery_address: String,
    pub assigned_to: Option<Uuid>,
    pub pickup_proof_url: Option<String>,
    pub delivery_proof_url: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub pickup_location: Option<GeoPoint>,
    #[schema(value_type = Option<Object>)]
    pub delivery_location: Option<GeoPoint>,
    pub assigned_at: DateTime<Utc>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub notes: String,
    #[schema(value_type = Vec<Object>)]
    pub history: Vec<TaskStatusChange>,
}

impl TaskLifecycle for LogisticsTaskRecord {
    fn task_status(&self) -> TaskStatus {
        self.status
    }

    fn apply_progress(&mut self, reached: TaskStatus, report: &ProgressReport, at: DateTime<Utc>) {
        // Absent proof or location keeps whatever was recorded earlier.
        match reached {
            TaskStatus::PickedUp => {
                if let Some(url) = &report.proof_url {
                    self.pickup_proof_url = Some(url.clone());
                }
                if let Some(point) = report.location {
                    self.pickup_location = Some(point);
                }
                self.picked_up_at = Some(at);
            }
            TaskStatus::Delivered => {
                if let Some(url) = &report.proof_url {
                    self.delivery_proof_url = Some(url.clone());
                }
                if let Some(point) = report.location {
                    self.delivery_location = Some(point);
                }
                self.delivered_at = Some(at);
            }
            TaskStatus::Assigned | TaskStatus::Cancelled => {}
        }
        if !report.notes.trim().is_empty() {
            self.notes = report.notes.clone();
        }
    }

    fn apply_task_change(&mut self, change: TaskStatusChange) {
        self.status = change.status;
        self.updated_at = change.changed_at;
        self.history.push(change);
    }
}

impl LogisticsTaskRecord {
    /// Whether `user_id` may view or progress this task.
    pub fn is_assigned_to(&self, user_id: Uuid) -> bool {
        self.assigned_to == Some(user_id)
    }
}

// -- Marketplace --------------------------------------------------------------

/// A device offered in the marketplace. At most one per device.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListingRecord {
    pub id: Uuid,
    pub device_id: Uuid,
    #[schema(value_type = String)]
    pub price: Amount,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A buyer's purchase of a listing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderRecord {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    #[schema(value_type = String)]
    pub status: OrderStatus,
    pub shipping_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[schema(value_type = Vec<Object>)]
    pub history: Vec<OrderStatusChange>,
}

impl OrderLifecycle for OrderRecord {
    fn order_status(&self) -> OrderStatus {
        self.status
    }

    fn apply_order_change(&mut self, change: OrderStatusChange) {
        self.status = change.status;
        self.updated_at = change.changed_at;
        self.history.push(change);
    }
}

// -- Impact analytics ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegionRecord {
    pub id: Uuid,
    pub name: String,
    /// Unique short code, e.g. "MH-PUNE".
    pub code: String,
    pub country: String,
    pub state: String,
    pub district: String,
}

/// Social and environmental impact attributed to one device.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceImpactRecord {
    pub id: Uuid,
    pub device_id: Uuid,
    pub region_id: Option<Uuid>,
    pub beneficiaries: u32,
    /// Kilograms of CO₂ avoided, as a decimal string.
    #[schema(value_type = String)]
    pub estimated_co2_saved_kg: Amount,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time counts of work waiting at each pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BottleneckSnapshotRecord {
    pub id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub pending_approvals: u32,
    pub pending_repairs: u32,
    pub pending_pickups: u32,
    pub in_transit_deliveries: u32,
    pub notes: String,
}
