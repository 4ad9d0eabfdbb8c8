//! # Workflow Orchestration
//!
//! Every mutation of the donation pipeline goes through this module. Each
//! operation:
//!
//! 1. validates references and applies the change to one record under its
//!    store's write lock, using the lifecycle traits from `umeed-state`;
//! 2. writes the record through to the database (failure is surfaced);
//! 3. appends an audit event;
//! 4. runs any cross-machine trigger.
//!
//! ## Triggers
//!
//! Triggers are best-effort. A trigger whose precondition does not hold, or
//! whose transition the target machine rejects, is logged at `debug` and
//! skipped. A trigger never fails the operation that caused it.
//!
//! Route handlers and the operator CLI share these functions, so the same
//! rules hold whichever surface made the change.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use umeed_core::{Amount, EmailAddress, ListingId, PhoneNumber};
use umeed_state::order::UPDATED_NOTE;
use umeed_state::repair::{assignment_note, assignment_target, certification_target, CERTIFICATION_NOTE};
use umeed_state::logistics::{pickup_target, PICKUP_DEVICE_NOTE};
use umeed_state::{
    ApprovalStatus, DeviceCategory, DeviceCondition, DeviceLifecycle, DeviceStatus,
    DeviceStatusChange, OrderLifecycle, OrderStatus, OrderStatusChange, ProgressReport,
    RepairLifecycle, RepairStatus, TaskLifecycle, TaskStatusChange, TaskType,
};

use crate::auth::{revoke_user_sessions, CallerIdentity, Role};
use crate::credentials::hash_password;
use crate::db::audit::AuditEvent;
use crate::db::Record;
use crate::error::AppError;
use crate::model::{
    BottleneckSnapshotRecord, DeviceImpactRecord, DeviceRecord, ListingRecord,
    LogisticsTaskRecord, OrderRecord, RegionRecord, RepairAssignmentRecord, UserRecord,
};
use crate::reports;
use crate::state::AppState;

// -- Notifications -------------------------------------------------------------

/// Emit the donor-facing status notification. Delivery channels subscribe to
/// the `notifications` target.
fn notify_device_status(device: &DeviceRecord, change: &DeviceStatusChange) {
    tracing::info!(
        target: "notifications",
        device_id = %device.id,
        listing_id = %device.listing_id,
        donor_id = %device.donor_id,
        from = %change.from_status,
        to = %change.to_status,
        "device status changed"
    );
}

fn notify_order_status(order: &OrderRecord, change: &OrderStatusChange) {
    tracing::info!(
        target: "notifications",
        order_id = %order.id,
        buyer_id = %order.buyer_id,
        status = %change.status,
        "order status changed"
    );
}

/// Persist a record written by a trigger. Failures are logged, never raised.
async fn persist_quietly(state: &AppState, record: Record<'_>) {
    let _ = state.persist(record).await;
}

// -- Accounts ------------------------------------------------------------------

/// Input for account creation, already format-validated.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: EmailAddress,
    pub phone_number: PhoneNumber,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub password: String,
    pub otp_verified: bool,
    pub is_staff: bool,
}

/// Create an account. Usernames and phone numbers are unique.
///
/// # Errors
///
/// [`AppError::Conflict`] when the username or phone number is taken.
pub async fn create_user(state: &AppState, input: NewUser) -> Result<UserRecord, AppError> {
    let password_hash = hash_password(&input.password)?;
    let now = Utc::now();
    let user = UserRecord {
        id: Uuid::new_v4(),
        username: input.username,
        email: input.email,
        phone_number: input.phone_number,
        first_name: input.first_name,
        last_name: input.last_name,
        role: input.role,
        password_hash,
        otp_verified: input.otp_verified,
        is_active: true,
        is_staff: input.is_staff,
        date_joined: now,
        updated_at: now,
    };

    state
        .users
        .insert_unique(user.id, user.clone(), |existing| {
            if existing.username == user.username {
                Some(AppError::Conflict(format!(
                    "username '{}' is already taken",
                    user.username
                )))
            } else if existing.phone_number == user.phone_number {
                Some(AppError::Conflict(
                    "phone number is already registered".to_string(),
                ))
            } else {
                None
            }
        })?;

    state.persist(Record::User(&user)).await?;
    state
        .audit(
            AuditEvent::new("user.created", "user", user.id, "create")
                .with_metadata(serde_json::json!({ "role": user.role.as_str() })),
        )
        .await;
    tracing::info!(user_id = %user.id, role = %user.role, "user created");
    Ok(user)
}

/// Change a user's role and/or active flag. Deactivation ends the user's
/// sessions immediately.
pub async fn update_user(
    state: &AppState,
    actor_id: Option<Uuid>,
    user_id: Uuid,
    role: Option<Role>,
    is_active: Option<bool>,
) -> Result<UserRecord, AppError> {
    let user = state
        .users
        .update(&user_id, |u| {
            if let Some(role) = role {
                u.role = role;
            }
            if let Some(active) = is_active {
                u.is_active = active;
            }
            u.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::not_found("user", user_id))?;

    if !user.is_active {
        let revoked = revoke_user_sessions(state, user_id);
        tracing::info!(%user_id, revoked, "user deactivated");
    }

    state.persist(Record::User(&user)).await?;
    let mut event = AuditEvent::new("user.updated", "user", user_id, "update").with_metadata(
        serde_json::json!({ "role": user.role.as_str(), "is_active": user.is_active }),
    );
    if let Some(actor) = actor_id {
        event = event.by(actor);
    }
    state.audit(event).await;
    Ok(user)
}

// -- Devices -------------------------------------------------------------------

/// Input for a device submission, already validated.
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub title: String,
    pub description: String,
    pub category: DeviceCategory,
    pub condition: DeviceCondition,
    pub price: Option<Amount>,
    pub image_urls: Vec<String>,
}

/// Record a donation. The device starts `submitted` and `pending` with a
/// single "Submitted" history row.
pub async fn submit_device(
    state: &AppState,
    donor_id: Uuid,
    input: NewDevice,
) -> Result<DeviceRecord, AppError> {
    if !state.users.contains(&donor_id) {
        return Err(AppError::not_found("user", donor_id));
    }

    let submission = DeviceStatusChange::submission();
    let device = DeviceRecord {
        id: Uuid::new_v4(),
        listing_id: ListingId::generate(),
        title: input.title,
        description: input.description,
        category: input.category,
        condition: input.condition,
        status: DeviceStatus::Submitted,
        admin_approval_status: ApprovalStatus::Pending,
        admin_notes: String::new(),
        donor_id,
        price: input.price,
        image_urls: input.image_urls,
        created_at: submission.changed_at,
        updated_at: submission.changed_at,
        history: vec![submission],
    };
    state.devices.insert(device.id, device.clone());

    state.persist(Record::Device(&device)).await?;
    state
        .audit(
            AuditEvent::new("device.submitted", "device", device.id, "submit")
                .by(donor_id)
                .with_metadata(serde_json::json!({ "listing_id": device.listing_id.as_str() })),
        )
        .await;
    tracing::info!(
        device_id = %device.id,
        listing_id = %device.listing_id,
        %donor_id,
        "device submitted"
    );
    Ok(device)
}

/// Move a device one step along the ordered flow (or re-record its current
/// status).
///
/// # Errors
///
/// [`AppError::Conflict`] when the move would skip or regress.
pub async fn transition_device(
    state: &AppState,
    actor_id: Uuid,
    device_id: Uuid,
    target: DeviceStatus,
    note: &str,
) -> Result<DeviceRecord, AppError> {
    let (change, device) = state
        .devices
        .try_update(&device_id, |d| {
            d.transition_to(target, note).map(|c| (c, d.clone()))
        })
        .ok_or_else(|| AppError::not_found("device", device_id))??;

    state.persist(Record::Device(&device)).await?;
    state
        .audit(
            AuditEvent::new("device.transition", "device", device_id, target.as_str())
                .by(actor_id)
                .with_metadata(serde_json::json!({
                    "from": change.from_status.as_str(),
                    "note": change.note,
                })),
        )
        .await;
    notify_device_status(&device, &change);
    Ok(device)
}

/// Best-effort device transition caused by another machine.
///
/// `target_for` picks the transition from the device's current status, or
/// declines. Returns the updated device when a transition was applied.
async fn trigger_device_transition(
    state: &AppState,
    device_id: Uuid,
    target_for: impl FnOnce(DeviceStatus) -> Option<DeviceStatus>,
    note: &str,
    cause: &'static str,
) -> Option<DeviceRecord> {
    let outcome = state.devices.try_update(&device_id, |d| {
        match target_for(d.device_status()) {
            Some(target) => d.transition_to(target, note).map(|c| Some((c, d.clone()))),
            None => Ok(None),
        }
    });

    let (change, device) = match outcome {
        Some(Ok(Some(applied))) => applied,
        Some(Ok(None)) => {
            tracing::debug!(%device_id, cause, "trigger precondition not met; skipped");
            return None;
        }
        Some(Err(e)) => {
            tracing::debug!(%device_id, cause, error = %e, "trigger transition rejected; skipped");
            return None;
        }
        None => {
            tracing::debug!(%device_id, cause, "trigger target device missing; skipped");
            return None;
        }
    };

    persist_quietly(state, Record::Device(&device)).await;
    state
        .audit(
            AuditEvent::new("device.transition", "device", device_id, change.to_status.as_str())
                .with_metadata(serde_json::json!({
                    "from": change.from_status.as_str(),
                    "note": change.note,
                    "trigger": cause,
                })),
        )
        .await;
    notify_device_status(&device, &change);
    Some(device)
}

/// Admin review decision for a device.
#[derive(Debug, Clone)]
pub struct DeviceReview {
    pub approval: ApprovalStatus,
    pub notes: String,
    pub status_override: Option<DeviceStatus>,
}

/// Outcome of [`review_device`].
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReviewOutcome {
    pub device: DeviceRecord,
    /// Listing created by this approval, if any.
    pub listing: Option<ListingRecord>,
    /// Whether the status override bypassed the ordered flow.
    pub forced: bool,
}

/// Apply an admin review: approval status, notes, and an optional status
/// override.
///
/// The override is tried as an ordered transition first. If the flow
/// rejects it the status is forced, and a history row with the same note is
/// still recorded. Approval creates the marketplace listing if absent.
pub async fn review_device(
    state: &AppState,
    admin_id: Uuid,
    device_id: Uuid,
    review: DeviceReview,
) -> Result<ReviewOutcome, AppError> {
    let note = format!("Admin override: {}", review.notes);
    let mut applied: Option<(DeviceStatusChange, bool)> = None;

    let device = state
        .devices
        .update(&device_id, |d| {
            d.admin_approval_status = review.approval;
            d.admin_notes = review.notes.clone();
            d.updated_at = Utc::now();
            applied = review
                .status_override
                .map(|target| match d.transition_to(target, &note) {
                    Ok(change) => (change, false),
                    Err(_) => (d.force_status(target, &note), true),
                });
        })
        .ok_or_else(|| AppError::not_found("device", device_id))?;

    state.persist(Record::Device(&device)).await?;
    state
        .audit(
            AuditEvent::new("device.reviewed", "device", device_id, review.approval.as_str())
                .by(admin_id)
                .with_metadata(serde_json::json!({
                    "notes": review.notes,
                    "status_override": review.status_override.map(|s| s.as_str()),
                })),
        )
        .await;

    let forced = match &applied {
        Some((change, forced)) => {
            if *forced {
                tracing::warn!(
                    %device_id,
                    from = %change.from_status,
                    to = %change.to_status,
                    "admin override bypassed the ordered status flow"
                );
            }
            notify_device_status(&device, change);
            *forced
        }
        None => false,
    };

    let listing = if device.admin_approval_status == ApprovalStatus::Approved {
        ensure_listing(state, &device).await?
    } else {
        None
    };

    Ok(ReviewOutcome {
        device,
        listing,
        forced,
    })
}

/// Create the marketplace listing for an approved device unless it has one.
/// The price is the device's asking price, or zero.
///
/// Returns the listing only when this call created it.
pub async fn ensure_listing(
    state: &AppState,
    device: &DeviceRecord,
) -> Result<Option<ListingRecord>, AppError> {
    let device_id = device.id;
    let (listing, created) = state.listings.update_or_insert(
        |l| l.device_id == device_id,
        |_| {},
        || {
            let listing = ListingRecord {
                id: Uuid::new_v4(),
                device_id,
                price: device.price.unwrap_or(Amount::ZERO),
                is_active: true,
                created_at: Utc::now(),
            };
            (listing.id, listing)
        },
    );
    if !created {
        return Ok(None);
    }

    state.persist(Record::Listing(&listing)).await?;
    state
        .audit(
            AuditEvent::new("listing.created", "listing", listing.id, "create")
                .with_metadata(serde_json::json!({ "device_id": device_id })),
        )
        .await;
    tracing::info!(listing_id = %listing.id, %device_id, price = %listing.price, "listing created");
    Ok(Some(listing))
}

/// Make sure every approved device has a listing. Returns how many were
/// created.
pub async fn ensure_marketplace_listings(state: &AppState) -> Result<usize, AppError> {
    let approved = state
        .devices
        .filter(|d| d.admin_approval_status == ApprovalStatus::Approved);
    let mut created = 0;
    for device in &approved {
        if ensure_listing(state, device).await?.is_some() {
            created += 1;
        }
    }
    if created > 0 {
        tracing::info!(created, "created missing marketplace listings");
    }
    Ok(created)
}

// -- Repairs -------------------------------------------------------------------

/// Assign (or reassign) a device to a repair partner.
///
/// A device has at most one assignment; reassigning changes its partner. A
/// device that is `submitted` or `picked_up` is moved to `under_inspection`
/// when the flow allows.
pub async fn assign_repair_partner(
    state: &AppState,
    admin_id: Uuid,
    device_id: Uuid,
    partner_id: Uuid,
) -> Result<RepairAssignmentRecord, AppError> {
    if !state.devices.contains(&device_id) {
        return Err(AppError::not_found("device", device_id));
    }
    let partner = state
        .users
        .get(&partner_id)
        .ok_or_else(|| AppError::not_found("user", partner_id))?;
    if partner.role != Role::RepairPartner {
        return Err(AppError::Validation(format!(
            "user {partner_id} is not a repair partner"
        )));
    }

    let now = Utc::now();
    let (assignment, created) = state.repairs.update_or_insert(
        |r| r.device_id == device_id,
        |r| {
            r.repair_partner_id = partner_id;
            r.updated_at = now;
        },
        || {
            let record = RepairAssignmentRecord {
                id: Uuid::new_v4(),
                device_id,
                repair_partner_id: partner_id,
                status: RepairStatus::Pending,
                estimated_completion: None,
                report_url: None,
                report_notes: String::new(),
                is_certified: false,
                certified_at: None,
                created_at: now,
                updated_at: now,
            };
            (record.id, record)
        },
    );

    state.persist(Record::Repair(&assignment)).await?;
    state
        .audit(
            AuditEvent::new(
                "repair.assigned",
                "repair_assignment",
                assignment.id,
                if created { "assign" } else { "reassign" },
            )
            .by(admin_id)
            .with_metadata(serde_json::json!({
                "device_id": device_id,
                "repair_partner_id": partner_id,
            })),
        )
        .await;
    tracing::info!(
        repair_id = %assignment.id,
        %device_id,
        %partner_id,
        created,
        "repair partner assigned"
    );

    trigger_device_transition(
        state,
        device_id,
        assignment_target,
        &assignment_note(&partner.display_name()),
        "repair_assignment",
    )
    .await;

    Ok(assignment)
}

/// Fields a repair partner may update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct RepairUpdate {
    pub status: Option<RepairStatus>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub report_url: Option<String>,
    pub report_notes: Option<String>,
    /// Certify the repair. Certification wins over `status`.
    pub certify: bool,
}

/// The caller's own assignment. Assignments of other partners are reported
/// as missing, for admins too.
pub fn assignment_for(
    state: &AppState,
    caller: &CallerIdentity,
    repair_id: Uuid,
) -> Result<RepairAssignmentRecord, AppError> {
    state
        .repairs
        .get(&repair_id)
        .filter(|r| r.repair_partner_id == caller.user_id)
        .ok_or_else(|| AppError::not_found("repair assignment", repair_id))
}

/// Update an assignment. Certifying stamps it and moves a device that is
/// `under_repair` or `under_inspection` to `certified` when the flow allows.
pub async fn update_repair(
    state: &AppState,
    caller: &CallerIdentity,
    repair_id: Uuid,
    update: RepairUpdate,
) -> Result<RepairAssignmentRecord, AppError> {
    assignment_for(state, caller, repair_id)?;

    let assignment = state
        .repairs
        .update(&repair_id, |r| {
            if let Some(status) = update.status {
                r.apply_repair_status(status);
            }
            if let Some(eta) = update.estimated_completion {
                r.estimated_completion = Some(eta);
            }
            if let Some(url) = &update.report_url {
                r.report_url = Some(url.clone());
            }
            if let Some(notes) = &update.report_notes {
                r.report_notes = notes.clone();
            }
            r.updated_at = Utc::now();
            if update.certify {
                r.mark_certified();
            }
        })
        .ok_or_else(|| AppError::not_found("repair assignment", repair_id))?;

    state.persist(Record::Repair(&assignment)).await?;
    state
        .audit(
            AuditEvent::new(
                "repair.updated",
                "repair_assignment",
                repair_id,
                if update.certify { "certify" } else { "update" },
            )
            .by(caller.user_id)
            .with_metadata(serde_json::json!({ "status": assignment.status.as_str() })),
        )
        .await;

    if update.certify {
        tracing::info!(%repair_id, device_id = %assignment.device_id, "repair certified");
        trigger_device_transition(
            state,
            assignment.device_id,
            certification_target,
            CERTIFICATION_NOTE,
            "repair_certification",
        )
        .await;
    }

    Ok(assignment)
}

// -- Logistics -----------------------------------------------------------------

fn check_assignee(state: &AppState, assigned_to: Option<Uuid>) -> Result<(), AppError> {
    match assigned_to {
        Some(id) if !state.users.contains(&id) => {
            Err(AppError::Validation(format!("assignee {id} does not exist")))
        }
        _ => Ok(()),
    }
}

async fn record_new_task(
    state: &AppState,
    admin_id: Uuid,
    task: LogisticsTaskRecord,
) -> Result<LogisticsTaskRecord, AppError> {
    state.tasks.insert(task.id, task.clone());
    state.persist(Record::Task(&task)).await?;
    state
        .audit(
            AuditEvent::new("task.created", "logistics_task", task.id, task.task_type.as_str())
                .by(admin_id)
                .with_metadata(serde_json::json!({
                    "device_id": task.device_id,
                    "order_id": task.order_id,
                    "assigned_to": task.assigned_to,
                })),
        )
        .await;
    tracing::info!(
        task_id = %task.id,
        task_type = %task.task_type,
        assigned_to = ?task.assigned_to,
        "logistics task created"
    );
    Ok(task)
}

fn new_task(task_type: TaskType, assigned_to: Option<Uuid>) -> LogisticsTaskRecord {
    let created = TaskStatusChange::created();
    LogisticsTaskRecord {
        id: Uuid::new_v4(),
        task_type,
        status: created.status,
        device_id: None,
        order_id: None,
        pickup_address: String::new(),
        delivery_address: String::new(),
        assigned_to,
        pickup_proof_url: None,
        delivery_proof_url: None,
        pickup_location: None,
        delivery_location: None,
        assigned_at: created.changed_at,
        picked_up_at: None,
        delivered_at: None,
        updated_at: created.changed_at,
        notes: String::new(),
        history: vec![created],
    }
}

/// Schedule collection of a donated device.
pub async fn create_pickup_task(
    state: &AppState,
    admin_id: Uuid,
    device_id: Uuid,
    pickup_address: String,
    assigned_to: Option<Uuid>,
) -> Result<LogisticsTaskRecord, AppError> {
    if !state.devices.contains(&device_id) {
        return Err(AppError::not_found("device", device_id));
    }
    if pickup_address.trim().is_empty() {
        return Err(AppError::Validation("pickup address is required".into()));
    }
    check_assignee(state, assigned_to)?;

    let mut task = new_task(TaskType::Pickup, assigned_to);
    task.device_id = Some(device_id);
    task.pickup_address = pickup_address.trim().to_string();
    record_new_task(state, admin_id, task).await
}

/// Schedule delivery of an order to its shipping address.
pub async fn create_delivery_task(
    state: &AppState,
    admin_id: Uuid,
    order_id: Uuid,
    assigned_to: Option<Uuid>,
) -> Result<LogisticsTaskRecord, AppError> {
    let order = state
        .orders
        .get(&order_id)
        .ok_or_else(|| AppError::not_found("order", order_id))?;
    check_assignee(state, assigned_to)?;

    let mut task = new_task(TaskType::Delivery, assigned_to);
    task.order_id = Some(order_id);
    task.delivery_address = order.shipping_address;
    record_new_task(state, admin_id, task).await
}

/// A task the caller may act on: admins see every task, others only their
/// own.
pub fn task_for(
    state: &AppState,
    caller: &CallerIdentity,
    task_id: Uuid,
) -> Result<LogisticsTaskRecord, AppError> {
    let task = state
        .tasks
        .get(&task_id)
        .ok_or_else(|| AppError::not_found("logistics task", task_id))?;
    if caller.is_admin() || task.is_assigned_to(caller.user_id) {
        Ok(task)
    } else {
        Err(AppError::Forbidden(
            "you don't have permission to access this task".into(),
        ))
    }
}

async fn record_task_progress(
    state: &AppState,
    caller: &CallerIdentity,
    task: &LogisticsTaskRecord,
    change: &TaskStatusChange,
) -> Result<(), AppError> {
    state.persist(Record::Task(task)).await?;
    state
        .audit(
            AuditEvent::new("task.progress", "logistics_task", task.id, change.status.as_str())
                .by(caller.user_id)
                .with_metadata(serde_json::json!({ "note": change.note })),
        )
        .await;
    tracing::info!(task_id = %task.id, status = %change.status, "logistics task progressed");
    Ok(())
}

/// `assigned → picked_up`. A pickup task's device moves from `submitted` to
/// `picked_up` when the flow allows.
pub async fn mark_task_picked_up(
    state: &AppState,
    caller: &CallerIdentity,
    task_id: Uuid,
    report: ProgressReport,
) -> Result<LogisticsTaskRecord, AppError> {
    task_for(state, caller, task_id)?;
    let (change, task) = state
        .tasks
        .try_update(&task_id, |t| t.mark_picked_up(report).map(|c| (c, t.clone())))
        .ok_or_else(|| AppError::not_found("logistics task", task_id))??;

    record_task_progress(state, caller, &task, &change).await?;

    if let Some(device_id) = task.device_id {
        trigger_device_transition(state, device_id, pickup_target, PICKUP_DEVICE_NOTE, "pickup")
            .await;
    }
    Ok(task)
}

/// `picked_up → delivered`. A delivery task's order is advanced to
/// `delivered`.
pub async fn mark_task_delivered(
    state: &AppState,
    caller: &CallerIdentity,
    task_id: Uuid,
    report: ProgressReport,
) -> Result<LogisticsTaskRecord, AppError> {
    task_for(state, caller, task_id)?;
    let (change, task) = state
        .tasks
        .try_update(&task_id, |t| t.mark_delivered(report).map(|c| (c, t.clone())))
        .ok_or_else(|| AppError::not_found("logistics task", task_id))??;

    record_task_progress(state, caller, &task, &change).await?;

    if let Some(order_id) = task.order_id {
        trigger_order_delivered(state, order_id).await;
    }
    Ok(task)
}

async fn trigger_order_delivered(state: &AppState, order_id: Uuid) {
    let mut change = None;
    let Some(order) = state.orders.update(&order_id, |o| {
        change = Some(o.advance_status(OrderStatus::Delivered, UPDATED_NOTE));
    }) else {
        tracing::debug!(%order_id, "delivery trigger target order missing; skipped");
        return;
    };

    persist_quietly(state, Record::Order(&order)).await;
    state
        .audit(
            AuditEvent::new("order.status", "order", order_id, OrderStatus::Delivered.as_str())
                .with_metadata(serde_json::json!({ "trigger": "delivery" })),
        )
        .await;
    if let Some(change) = &change {
        notify_order_status(&order, change);
    }
}

/// Cancel an unfinished task.
pub async fn cancel_task(
    state: &AppState,
    caller: &CallerIdentity,
    task_id: Uuid,
    note: &str,
) -> Result<LogisticsTaskRecord, AppError> {
    task_for(state, caller, task_id)?;
    let (change, task) = state
        .tasks
        .try_update(&task_id, |t| t.cancel(note).map(|c| (c, t.clone())))
        .ok_or_else(|| AppError::not_found("logistics task", task_id))??;

    record_task_progress(state, caller, &task, &change).await?;
    Ok(task)
}

/// Where field staff should head for a task. A pickup without an address
/// falls back to the donor's name; a delivery without one falls back to the
/// order's shipping address.
pub fn display_address(state: &AppState, task: &LogisticsTaskRecord) -> String {
    match task.task_type {
        TaskType::Pickup if !task.pickup_address.is_empty() => task.pickup_address.clone(),
        TaskType::Pickup => task
            .device_id
            .and_then(|id| state.devices.get(&id))
            .and_then(|d| state.users.get(&d.donor_id))
            .map(|donor| donor.display_name())
            .unwrap_or_default(),
        TaskType::Delivery if !task.delivery_address.is_empty() => task.delivery_address.clone(),
        TaskType::Delivery => task
            .order_id
            .and_then(|id| state.orders.get(&id))
            .map(|o| o.shipping_address)
            .unwrap_or_default(),
    }
}

// -- Marketplace ---------------------------------------------------------------

/// Whether a listing has a live (non-cancelled) order.
pub fn listing_is_sold(state: &AppState, listing_id: Uuid) -> bool {
    state
        .orders
        .find(|o| o.listing_id == listing_id && o.status.claims_listing())
        .is_some()
}

/// The most recently placed non-cancelled order for a listing.
pub fn latest_order(state: &AppState, listing_id: Uuid) -> Option<OrderRecord> {
    state
        .orders
        .filter(|o| o.listing_id == listing_id && o.status.claims_listing())
        .into_iter()
        .max_by_key(|o| (o.created_at, o.id))
}

/// Place an order for a listing.
///
/// The listing must be active, its device approved, and it must not already
/// be sold. The sold check and the insert happen under the checkout lock.
pub async fn place_order(
    state: &AppState,
    buyer_id: Uuid,
    listing_id: Uuid,
    shipping_address: &str,
) -> Result<OrderRecord, AppError> {
    let listing = state
        .listings
        .get(&listing_id)
        .ok_or_else(|| AppError::not_found("listing", listing_id))?;
    let approved = state
        .devices
        .get(&listing.device_id)
        .is_some_and(|d| d.admin_approval_status == ApprovalStatus::Approved);
    if !listing.is_active || !approved {
        return Err(AppError::Conflict(format!(
            "listing {listing_id} is not available"
        )));
    }
    let address = shipping_address.trim();
    if address.is_empty() {
        return Err(AppError::Validation("shipping address is required".into()));
    }

    let placed = OrderStatusChange::placed();
    let order = OrderRecord {
        id: Uuid::new_v4(),
        listing_id,
        buyer_id,
        status: placed.status,
        shipping_address: address.to_string(),
        created_at: placed.changed_at,
        updated_at: placed.changed_at,
        history: vec![placed.clone()],
    };

    {
        let _checkout = state.checkout_lock.lock();
        if listing_is_sold(state, listing_id) {
            return Err(AppError::Conflict(
                "this device has already been sold".into(),
            ));
        }
        state.orders.insert(order.id, order.clone());
    }

    state.persist(Record::Order(&order)).await?;
    state
        .audit(
            AuditEvent::new("order.placed", "order", order.id, "place")
                .by(buyer_id)
                .with_metadata(serde_json::json!({ "listing_id": listing_id })),
        )
        .await;
    tracing::info!(order_id = %order.id, %listing_id, %buyer_id, "order placed");
    notify_order_status(&order, &placed);
    Ok(order)
}

/// Set an order's status. Any known status may follow any other.
pub async fn advance_order(
    state: &AppState,
    admin_id: Uuid,
    order_id: Uuid,
    target: OrderStatus,
) -> Result<OrderRecord, AppError> {
    let mut change = None;
    let order = state
        .orders
        .update(&order_id, |o| {
            change = Some(o.advance_status(target, UPDATED_NOTE));
        })
        .ok_or_else(|| AppError::not_found("order", order_id))?;

    state.persist(Record::Order(&order)).await?;
    state
        .audit(
            AuditEvent::new("order.status", "order", order_id, target.as_str()).by(admin_id),
        )
        .await;
    if let Some(change) = &change {
        notify_order_status(&order, change);
    }
    Ok(order)
}

// -- Impact analytics ----------------------------------------------------------

/// Input for a new region.
#[derive(Debug, Clone)]
pub struct NewRegion {
    pub name: String,
    pub code: String,
    pub country: String,
    pub state: String,
    pub district: String,
}

/// Register a region. Codes are unique.
pub async fn create_region(
    state: &AppState,
    admin_id: Uuid,
    input: NewRegion,
) -> Result<RegionRecord, AppError> {
    let region = RegionRecord {
        id: Uuid::new_v4(),
        name: input.name,
        code: input.code,
        country: input.country,
        state: input.state,
        district: input.district,
    };
    state
        .regions
        .insert_unique(region.id, region.clone(), |r| {
            (r.code == region.code).then(|| {
                AppError::Conflict(format!("region code '{}' already exists", region.code))
            })
        })?;

    state.persist(Record::Region(&region)).await?;
    state
        .audit(AuditEvent::new("region.created", "region", region.id, "create").by(admin_id))
        .await;
    Ok(region)
}

/// Set the impact figures attributed to a device.
pub async fn record_device_impact(
    state: &AppState,
    admin_id: Uuid,
    device_id: Uuid,
    region_id: Option<Uuid>,
    beneficiaries: u32,
    co2_saved_kg: Amount,
) -> Result<DeviceImpactRecord, AppError> {
    if !state.devices.contains(&device_id) {
        return Err(AppError::not_found("device", device_id));
    }
    if let Some(region_id) = region_id {
        if !state.regions.contains(&region_id) {
            return Err(AppError::Validation(format!(
                "region {region_id} does not exist"
            )));
        }
    }

    let now = Utc::now();
    let (impact, _) = state.impacts.update_or_insert(
        |i| i.device_id == device_id,
        |i| {
            i.region_id = region_id;
            i.beneficiaries = beneficiaries;
            i.estimated_co2_saved_kg = co2_saved_kg;
            i.updated_at = now;
        },
        || {
            let record = DeviceImpactRecord {
                id: Uuid::new_v4(),
                device_id,
                region_id,
                beneficiaries,
                estimated_co2_saved_kg: co2_saved_kg,
                updated_at: now,
            };
            (record.id, record)
        },
    );

    state.persist(Record::Impact(&impact)).await?;
    state
        .audit(
            AuditEvent::new("impact.recorded", "device_impact", impact.id, "record")
                .by(admin_id)
                .with_metadata(serde_json::json!({
                    "device_id": device_id,
                    "beneficiaries": beneficiaries,
                    "co2_saved_kg": co2_saved_kg.to_string(),
                })),
        )
        .await;
    Ok(impact)
}

/// Store the current bottleneck counts.
pub async fn capture_snapshot(
    state: &AppState,
    admin_id: Uuid,
    notes: String,
) -> Result<BottleneckSnapshotRecord, AppError> {
    let counts = reports::bottlenecks(state);
    let snapshot = BottleneckSnapshotRecord {
        id: Uuid::new_v4(),
        captured_at: Utc::now(),
        pending_approvals: counts.pending_approvals,
        pending_repairs: counts.pending_repairs,
        pending_pickups: counts.pending_pickups,
        in_transit_deliveries: counts.in_transit_deliveries,
        notes,
    };
    state.snapshots.insert(snapshot.id, snapshot.clone());

    state.persist(Record::Snapshot(&snapshot)).await?;
    state
        .audit(
            AuditEvent::new("snapshot.captured", "bottleneck_snapshot", snapshot.id, "capture")
                .by(admin_id),
        )
        .await;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use umeed_state::TaskStatus;

    fn user(state: &AppState, role: Role) -> UserRecord {
        let n = state.users.len();
        let user = UserRecord {
            id: Uuid::new_v4(),
            username: format!("user{n}"),
            email: EmailAddress::new(format!("user{n}@example.org")).unwrap(),
            phone_number: PhoneNumber::new(format!("98765{n:05}")).unwrap(),
            first_name: String::new(),
            last_name: String::new(),
            role,
            password_hash: String::new(),
            otp_verified: true,
            is_active: true,
            is_staff: false,
            date_joined: Utc::now(),
            updated_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        user
    }

    fn caller(user: &UserRecord) -> CallerIdentity {
        CallerIdentity {
            user_id: user.id,
            role: user.role,
            is_staff: user.is_staff,
        }
    }

    async fn donated(state: &AppState, donor: &UserRecord) -> DeviceRecord {
        submit_device(
            state,
            donor.id,
            NewDevice {
                title: "Oxygen concentrator".into(),
                description: "5L, works on mains".into(),
                category: DeviceCategory::OxygenConcentrator,
                condition: DeviceCondition::NeedsRepair,
                price: Some(Amount::parse("2500.00").unwrap()),
                image_urls: vec![],
            },
        )
        .await
        .unwrap()
    }

    async fn approve(state: &AppState, admin: &UserRecord, device_id: Uuid) -> ReviewOutcome {
        review_device(
            state,
            admin.id,
            device_id,
            DeviceReview {
                approval: ApprovalStatus::Approved,
                notes: "looks fine".into(),
                status_override: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn submission_starts_pending_with_one_history_row() {
        let state = AppState::new();
        let donor = user(&state, Role::Donor);
        let device = donated(&state, &donor).await;
        assert_eq!(device.status, DeviceStatus::Submitted);
        assert_eq!(device.admin_approval_status, ApprovalStatus::Pending);
        assert_eq!(device.history.len(), 1);
    }

    #[tokio::test]
    async fn skipping_ahead_is_a_conflict() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let device = donated(&state, &user(&state, Role::Donor)).await;
        let err = transition_device(&state, admin.id, device.id, DeviceStatus::Certified, "")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(state.devices.get(&device.id).unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn approval_creates_exactly_one_listing() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let device = donated(&state, &user(&state, Role::Donor)).await;

        let first = approve(&state, &admin, device.id).await;
        let listing = first.listing.expect("listing created on approval");
        assert_eq!(listing.price, Amount::parse("2500").unwrap());
        assert!(listing.is_active);

        let second = approve(&state, &admin, device.id).await;
        assert!(second.listing.is_none());
        assert_eq!(state.listings.len(), 1);
        assert_eq!(ensure_marketplace_listings(&state).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn override_outside_the_flow_is_forced_and_recorded() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let device = donated(&state, &user(&state, Role::Donor)).await;

        let outcome = review_device(
            &state,
            admin.id,
            device.id,
            DeviceReview {
                approval: ApprovalStatus::Approved,
                notes: "refurbished in-house".into(),
                status_override: Some(DeviceStatus::Certified),
            },
        )
        .await
        .unwrap();

        assert!(outcome.forced);
        assert_eq!(outcome.device.status, DeviceStatus::Certified);
        let last = outcome.device.history.last().unwrap();
        assert_eq!(last.from_status, DeviceStatus::Submitted);
        assert_eq!(last.note, "Admin override: refurbished in-house");
    }

    #[tokio::test]
    async fn in_flow_override_is_not_forced() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let device = donated(&state, &user(&state, Role::Donor)).await;
        let outcome = review_device(
            &state,
            admin.id,
            device.id,
            DeviceReview {
                approval: ApprovalStatus::Pending,
                notes: String::new(),
                status_override: Some(DeviceStatus::PickedUp),
            },
        )
        .await
        .unwrap();
        assert!(!outcome.forced);
        assert_eq!(outcome.device.status, DeviceStatus::PickedUp);
        assert!(outcome.listing.is_none());
    }

    #[tokio::test]
    async fn assignment_requires_a_repair_partner() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let buyer = user(&state, Role::Buyer);
        let device = donated(&state, &user(&state, Role::Donor)).await;
        let err = assign_repair_partner(&state, admin.id, device.id, buyer.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn pickup_then_assignment_moves_device_to_inspection() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let partner = user(&state, Role::RepairPartner);
        let device = donated(&state, &user(&state, Role::Donor)).await;

        let task = create_pickup_task(&state, admin.id, device.id, "12 MG Road, Pune".into(), Some(partner.id))
            .await
            .unwrap();
        let task = mark_task_picked_up(&state, &caller(&partner), task.id, ProgressReport::default())
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::PickedUp);
        assert_eq!(state.devices.get(&device.id).unwrap().status, DeviceStatus::PickedUp);

        let assignment = assign_repair_partner(&state, admin.id, device.id, partner.id)
            .await
            .unwrap();
        assert_eq!(assignment.status, RepairStatus::Pending);
        let device = state.devices.get(&device.id).unwrap();
        assert_eq!(device.status, DeviceStatus::UnderInspection);
        assert_eq!(device.history.last().unwrap().note, "Assigned to user1");
    }

    #[tokio::test]
    async fn assignment_trigger_skips_when_flow_rejects_it() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let partner = user(&state, Role::RepairPartner);
        let device = donated(&state, &user(&state, Role::Donor)).await;

        // submitted -> under_inspection skips picked_up.
        assign_repair_partner(&state, admin.id, device.id, partner.id)
            .await
            .unwrap();
        assert_eq!(state.devices.get(&device.id).unwrap().status, DeviceStatus::Submitted);
    }

    #[tokio::test]
    async fn reassignment_keeps_one_assignment_per_device() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let first = user(&state, Role::RepairPartner);
        let second = user(&state, Role::RepairPartner);
        let device = donated(&state, &user(&state, Role::Donor)).await;

        let a = assign_repair_partner(&state, admin.id, device.id, first.id).await.unwrap();
        let b = assign_repair_partner(&state, admin.id, device.id, second.id).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.repair_partner_id, second.id);
        assert_eq!(state.repairs.len(), 1);
        assert!(matches!(
            assignment_for(&state, &caller(&first), a.id),
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn certification_moves_device_under_repair_to_certified() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let partner = user(&state, Role::RepairPartner);
        let device = donated(&state, &user(&state, Role::Donor)).await;
        for step in [DeviceStatus::PickedUp, DeviceStatus::UnderInspection, DeviceStatus::UnderRepair] {
            transition_device(&state, admin.id, device.id, step, "").await.unwrap();
        }
        let assignment = assign_repair_partner(&state, admin.id, device.id, partner.id)
            .await
            .unwrap();

        let updated = update_repair(
            &state,
            &caller(&partner),
            assignment.id,
            RepairUpdate {
                report_notes: Some("replaced compressor".into()),
                certify: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(updated.is_certified);
        assert!(updated.certified_at.is_some());
        assert_eq!(updated.status, RepairStatus::Certified);
        let device = state.devices.get(&device.id).unwrap();
        assert_eq!(device.status, DeviceStatus::Certified);
        assert_eq!(device.history.last().unwrap().note, CERTIFICATION_NOTE);
    }

    #[tokio::test]
    async fn other_users_cannot_progress_a_task() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let partner = user(&state, Role::RepairPartner);
        let stranger = user(&state, Role::RepairPartner);
        let device = donated(&state, &user(&state, Role::Donor)).await;
        let task = create_pickup_task(&state, admin.id, device.id, "Ward 4".into(), Some(partner.id))
            .await
            .unwrap();

        let err = mark_task_picked_up(&state, &caller(&stranger), task.id, ProgressReport::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(task_for(&state, &caller(&admin), task.id).is_ok());
    }

    #[tokio::test]
    async fn pickup_task_requires_an_address() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let device = donated(&state, &user(&state, Role::Donor)).await;
        let err = create_pickup_task(&state, admin.id, device.id, "   ".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn assigned_task_can_be_cancelled() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let partner = user(&state, Role::RepairPartner);
        let device = donated(&state, &user(&state, Role::Donor)).await;
        let task = create_pickup_task(&state, admin.id, device.id, "Ward 4".into(), Some(partner.id))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);

        let cancelled = cancel_task(&state, &caller(&partner), task.id, "donor unreachable")
            .await
            .unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(cancelled.history.len(), 2);
        assert_eq!(cancelled.history[1].note, "donor unreachable");
        assert_eq!(state.tasks.get(&task.id).unwrap().status, TaskStatus::Cancelled);

        let err = mark_task_picked_up(&state, &caller(&partner), task.id, ProgressReport::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn pickup_display_address_falls_back_to_donor_name() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let donor = user(&state, Role::Donor);
        state.users.update(&donor.id, |u| {
            u.first_name = "Meera".into();
            u.last_name = "Joshi".into();
        });
        let device = donated(&state, &donor).await;
        let task = create_pickup_task(&state, admin.id, device.id, "Ward 4".into(), None)
            .await
            .unwrap();
        assert_eq!(display_address(&state, &task), "Ward 4");

        let blank = state
            .tasks
            .update(&task.id, |t| t.pickup_address.clear())
            .unwrap();
        assert_eq!(display_address(&state, &blank), "Meera Joshi");

        let orphan = LogisticsTaskRecord {
            device_id: None,
            ..blank
        };
        assert_eq!(display_address(&state, &orphan), "");
    }

    #[tokio::test]
    async fn delivery_display_address_falls_back_to_shipping_address() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let buyer = user(&state, Role::Buyer);
        let device = donated(&state, &user(&state, Role::Donor)).await;
        let listing = approve(&state, &admin, device.id).await.listing.unwrap();
        let order = place_order(&state, buyer.id, listing.id, "Flat 2, Nashik").await.unwrap();
        let task = create_delivery_task(&state, admin.id, order.id, None).await.unwrap();

        let moved = state
            .tasks
            .update(&task.id, |t| t.delivery_address = "Gate 3, Civil Hospital".into())
            .unwrap();
        assert_eq!(display_address(&state, &moved), "Gate 3, Civil Hospital");

        let blank = state
            .tasks
            .update(&task.id, |t| t.delivery_address.clear())
            .unwrap();
        assert_eq!(display_address(&state, &blank), "Flat 2, Nashik");

        let orphan = LogisticsTaskRecord {
            order_id: None,
            ..blank
        };
        assert_eq!(display_address(&state, &orphan), "");
    }

    #[tokio::test]
    async fn latest_order_ignores_cancelled_orders() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let buyer = user(&state, Role::Buyer);
        let device = donated(&state, &user(&state, Role::Donor)).await;
        let listing = approve(&state, &admin, device.id).await.listing.unwrap();
        assert!(latest_order(&state, listing.id).is_none());

        let first = place_order(&state, buyer.id, listing.id, "Flat 2, Nashik").await.unwrap();
        assert_eq!(latest_order(&state, listing.id).unwrap().id, first.id);

        advance_order(&state, admin.id, first.id, OrderStatus::Cancelled).await.unwrap();
        assert!(latest_order(&state, listing.id).is_none());

        let second = place_order(&state, buyer.id, listing.id, "Flat 9, Pune").await.unwrap();
        let latest = latest_order(&state, listing.id).unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.shipping_address, "Flat 9, Pune");
    }

    #[tokio::test]
    async fn second_order_for_a_listing_conflicts() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let buyer = user(&state, Role::Buyer);
        let other = user(&state, Role::Both);
        let device = donated(&state, &user(&state, Role::Donor)).await;
        let listing = approve(&state, &admin, device.id).await.listing.unwrap();

        let order = place_order(&state, buyer.id, listing.id, "Flat 2, Nashik").await.unwrap();
        assert_eq!(order.status, OrderStatus::Placed);
        assert!(listing_is_sold(&state, listing.id));

        let err = place_order(&state, other.id, listing.id, "Somewhere").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // A cancelled order frees the listing again.
        advance_order(&state, admin.id, order.id, OrderStatus::Cancelled).await.unwrap();
        assert!(!listing_is_sold(&state, listing.id));
        assert!(place_order(&state, other.id, listing.id, "Somewhere").await.is_ok());
    }

    #[tokio::test]
    async fn order_needs_an_approved_device_and_an_address() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let buyer = user(&state, Role::Buyer);
        let device = donated(&state, &user(&state, Role::Donor)).await;
        let listing = approve(&state, &admin, device.id).await.listing.unwrap();

        let err = place_order(&state, buyer.id, listing.id, " ").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        review_device(
            &state,
            admin.id,
            device.id,
            DeviceReview {
                approval: ApprovalStatus::Rejected,
                notes: "recalled model".into(),
                status_override: None,
            },
        )
        .await
        .unwrap();
        let err = place_order(&state, buyer.id, listing.id, "Pune").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn delivery_completion_marks_order_delivered() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let courier = user(&state, Role::RepairPartner);
        let buyer = user(&state, Role::Buyer);
        let device = donated(&state, &user(&state, Role::Donor)).await;
        let listing = approve(&state, &admin, device.id).await.listing.unwrap();
        let order = place_order(&state, buyer.id, listing.id, "Flat 2, Nashik").await.unwrap();

        let task = create_delivery_task(&state, admin.id, order.id, Some(courier.id)).await.unwrap();
        assert_eq!(task.delivery_address, "Flat 2, Nashik");

        let me = caller(&courier);
        // Delivering before pickup is out of order.
        let err = mark_task_delivered(&state, &me, task.id, ProgressReport::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        mark_task_picked_up(&state, &me, task.id, ProgressReport::default()).await.unwrap();
        mark_task_delivered(&state, &me, task.id, ProgressReport::default()).await.unwrap();

        let order = state.orders.get(&order.id).unwrap();
        assert_eq!(order.status, OrderStatus::Delivered);
        assert_eq!(order.history.len(), 2);

        let err = cancel_task(&state, &me, task.id, "too late").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn region_codes_are_unique() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let pune = || NewRegion {
            name: "Pune".into(),
            code: "MH-PUNE".into(),
            country: "India".into(),
            state: "Maharashtra".into(),
            district: "Pune".into(),
        };
        create_region(&state, admin.id, pune()).await.unwrap();
        let err = create_region(&state, admin.id, pune()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn impact_is_one_record_per_device() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        let device = donated(&state, &user(&state, Role::Donor)).await;
        let kg = |s: &str| Amount::parse(s).unwrap();

        let first = record_device_impact(&state, admin.id, device.id, None, 3, kg("12.5"))
            .await
            .unwrap();
        let second = record_device_impact(&state, admin.id, device.id, None, 5, kg("20"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.beneficiaries, 5);
        assert_eq!(state.impacts.len(), 1);

        let err = record_device_impact(&state, admin.id, device.id, Some(Uuid::new_v4()), 1, kg("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn snapshot_captures_current_bottlenecks() {
        let state = AppState::new();
        let admin = user(&state, Role::Admin);
        donated(&state, &user(&state, Role::Donor)).await;
        let snapshot = capture_snapshot(&state, admin.id, "weekly".into()).await.unwrap();
        assert_eq!(snapshot.pending_approvals, 1);
        assert_eq!(snapshot.pending_pickups, 0);
        assert_eq!(state.snapshots.len(), 1);
    }

    #[tokio::test]
    async fn deactivation_revokes_sessions() {
        let state = AppState::new();
        let donor = user(&state, Role::Donor);
        let session = crate::auth::issue_session(&state, donor.id);
        assert!(crate::auth::resolve_session(&state, &session.token).is_some());
        let stale = Utc::now() - chrono::Duration::days(1);
        state.users.update(&donor.id, |u| u.updated_at = stale);

        let updated = update_user(&state, None, donor.id, Some(Role::Both), Some(false))
            .await
            .unwrap();
        assert!(updated.updated_at > stale);
        assert_eq!(updated.role, Role::Both);
        assert!(!updated.is_active);
        assert!(crate::auth::resolve_session(&state, &session.token).is_none());
    }
}
