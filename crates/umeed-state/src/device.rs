//! # Device Lifecycle State Machine
//!
//! A donated device moves through a fixed, ordered status flow:
//!
//! ```text
//! Submitted ──▶ PickedUp ──▶ UnderInspection ──▶ UnderRepair
//!                                                    │
//!                                                    ▼
//!                         Allocated ◀── Listed ◀── Certified
//! ```
//!
//! A transition may only advance to the next position or stay where it is.
//! Staying put is accepted and still recorded, so repeated notes about the
//! same status show up in the history. There is no skipping and no going
//! back; the one exception is the administrator override
//! ([`DeviceLifecycle::force_status`]), which still records a history row.
//!
//! Orthogonal to the status is the administrator approval gate
//! ([`ApprovalStatus`]): `pending`, `approved`, `rejected`, `on_hold`. It
//! decides marketplace visibility and never restricts status transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Device Status ───────────────────────────────────────────────────

/// Position of a device in the donation → redistribution flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Donor has submitted the device; nothing has happened yet.
    Submitted,
    /// Logistics collected the device from the donor.
    PickedUp,
    /// A repair partner is assessing the device.
    UnderInspection,
    /// Repair work is under way.
    UnderRepair,
    /// Repair partner certified the device as safe for use.
    Certified,
    /// The device is visible in the marketplace.
    Listed,
    /// The device has been allocated to a recipient.
    Allocated,
}

/// The ordered status flow. A device's position is its index here.
pub const DEVICE_STATUS_FLOW: [DeviceStatus; 7] = [
    DeviceStatus::Submitted,
    DeviceStatus::PickedUp,
    DeviceStatus::UnderInspection,
    DeviceStatus::UnderRepair,
    DeviceStatus::Certified,
    DeviceStatus::Listed,
    DeviceStatus::Allocated,
];

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::PickedUp => "picked_up",
            Self::UnderInspection => "under_inspection",
            Self::UnderRepair => "under_repair",
            Self::Certified => "certified",
            Self::Listed => "listed",
            Self::Allocated => "allocated",
        }
    }

    /// Human-readable label used in notifications and charts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Submitted => "Submitted",
            Self::PickedUp => "Picked Up",
            Self::UnderInspection => "Under Inspection",
            Self::UnderRepair => "Under Repair",
            Self::Certified => "Certified",
            Self::Listed => "Listed",
            Self::Allocated => "Allocated",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        DEVICE_STATUS_FLOW.iter().copied().find(|s| s.as_str() == name)
    }

    /// Index of this status in [`DEVICE_STATUS_FLOW`].
    pub fn position(&self) -> usize {
        *self as usize
    }

    /// The status that follows this one, if any.
    pub fn next(&self) -> Option<Self> {
        DEVICE_STATUS_FLOW.get(self.position() + 1).copied()
    }

    /// Whether the device has passed repair certification.
    pub fn is_certified(&self) -> bool {
        matches!(self, Self::Certified | Self::Listed | Self::Allocated)
    }

    /// Whether moving to `target` respects the ordered flow.
    pub fn can_transition_to(&self, target: DeviceStatus) -> bool {
        target == *self || self.next() == Some(target)
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeviceStatus {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| DeviceError::UnknownStatus(s.to_string()))
    }
}

// ─── Admin Approval ──────────────────────────────────────────────────

/// Administrator review outcome for a donated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    OnHold,
}

impl ApprovalStatus {
    pub const ALL: [ApprovalStatus; 4] = [
        Self::Pending,
        Self::Approved,
        Self::Rejected,
        Self::OnHold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::OnHold => "on_hold",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending Review",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::OnHold => "On Hold",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == name)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| DeviceError::UnknownApproval(s.to_string()))
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors raised by device status and catalog handling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("invalid device status: \"{0}\"")]
    UnknownStatus(String),

    #[error("invalid approval status: \"{0}\"")]
    UnknownApproval(String),

    #[error("invalid device category: \"{0}\"")]
    UnknownCategory(String),

    #[error("invalid device condition: \"{0}\"")]
    UnknownCondition(String),

    /// Target is neither the current status nor the one right after it.
    #[error("status transition must follow defined order: {from} -> {to}")]
    OutOfOrder { from: DeviceStatus, to: DeviceStatus },
}

// ─── History ─────────────────────────────────────────────────────────

/// One row of the append-only device status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatusChange {
    pub from_status: DeviceStatus,
    pub to_status: DeviceStatus,
    pub note: String,
    pub changed_at: DateTime<Utc>,
}

impl DeviceStatusChange {
    pub fn new(from: DeviceStatus, to: DeviceStatus, note: impl Into<String>) -> Self {
        Self {
            from_status: from,
            to_status: to,
            note: note.into(),
            changed_at: Utc::now(),
        }
    }

    /// The history row written when a device is first submitted.
    pub fn submission() -> Self {
        Self::new(DeviceStatus::Submitted, DeviceStatus::Submitted, "Submitted")
    }

    /// Whether the row recorded a note without moving the device.
    pub fn is_unchanged(&self) -> bool {
        self.from_status == self.to_status
    }
}

/// Validate a transition and build its history row without applying it.
///
/// # Errors
///
/// Returns [`DeviceError::OutOfOrder`] when `target` skips ahead or goes back.
pub fn plan_transition(
    current: DeviceStatus,
    target: DeviceStatus,
    note: &str,
) -> Result<DeviceStatusChange, DeviceError> {
    if !current.can_transition_to(target) {
        return Err(DeviceError::OutOfOrder {
            from: current,
            to: target,
        });
    }
    Ok(DeviceStatusChange::new(current, target, note))
}

// ─── Lifecycle ───────────────────────────────────────────────────────

/// A record that carries a device status and its history.
///
/// Implementors supply the two accessors; the ordered-flow rules live in the
/// provided methods so every holder of a device status enforces them alike.
pub trait DeviceLifecycle {
    fn device_status(&self) -> DeviceStatus;

    /// Set the status to `change.to_status` and append `change` to history.
    fn apply_device_change(&mut self, change: DeviceStatusChange);

    /// Move to `target` if the ordered flow allows it, recording `note`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::OutOfOrder`] and leaves the record untouched
    /// when the transition would skip or regress.
    fn transition_to(
        &mut self,
        target: DeviceStatus,
        note: &str,
    ) -> Result<DeviceStatusChange, DeviceError> {
        let change = plan_transition(self.device_status(), target, note)?;
        self.apply_device_change(change.clone());
        Ok(change)
    }

    /// Set the status unconditionally. The change is still recorded.
    fn force_status(&mut self, target: DeviceStatus, note: &str) -> DeviceStatusChange {
        let change = DeviceStatusChange::new(self.device_status(), target, note);
        self.apply_device_change(change.clone());
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Default)]
    struct Tracked {
        status: Option<DeviceStatus>,
        history: Vec<DeviceStatusChange>,
    }

    impl DeviceLifecycle for Tracked {
        fn device_status(&self) -> DeviceStatus {
            self.status.unwrap_or(DeviceStatus::Submitted)
        }

        fn apply_device_change(&mut self, change: DeviceStatusChange) {
            self.status = Some(change.to_status);
            self.history.push(change);
        }
    }

    fn device_at(status: DeviceStatus) -> Tracked {
        Tracked {
            status: Some(status),
            history: Vec::new(),
        }
    }

    // ── Status names ─────────────────────────────────────────────────

    #[test]
    fn status_names_round_trip_through_from_name() {
        for status in DEVICE_STATUS_FLOW {
            assert_eq!(DeviceStatus::from_name(status.as_str()), Some(status));
        }
        assert_eq!(DeviceStatus::from_name("teleported"), None);
        assert_eq!(DeviceStatus::from_name("Submitted"), None);
    }

    #[test]
    fn flow_positions_match_declaration_order() {
        for (i, status) in DEVICE_STATUS_FLOW.iter().enumerate() {
            assert_eq!(status.position(), i);
        }
        assert_eq!(DeviceStatus::Allocated.next(), None);
        assert_eq!(DeviceStatus::UnderRepair.next(), Some(DeviceStatus::Certified));
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&DeviceStatus::UnderInspection).unwrap();
        assert_eq!(json, "\"under_inspection\"");
        let parsed: ApprovalStatus = serde_json::from_str("\"on_hold\"").unwrap();
        assert_eq!(parsed, ApprovalStatus::OnHold);
    }

    #[test]
    fn unknown_status_is_rejected_by_from_str() {
        let err = "lost".parse::<DeviceStatus>().unwrap_err();
        assert_eq!(err, DeviceError::UnknownStatus("lost".into()));
    }

    // ── Transitions ──────────────────────────────────────────────────

    #[test]
    fn advance_one_step_records_history() {
        let mut d = device_at(DeviceStatus::Submitted);
        let change = d.transition_to(DeviceStatus::PickedUp, "Collected").unwrap();
        assert_eq!(d.device_status(), DeviceStatus::PickedUp);
        assert_eq!(change.from_status, DeviceStatus::Submitted);
        assert_eq!(d.history.len(), 1);
        assert_eq!(d.history[0].note, "Collected");
    }

    #[test]
    fn same_status_is_accepted_and_recorded() {
        let mut d = device_at(DeviceStatus::UnderRepair);
        let change = d.transition_to(DeviceStatus::UnderRepair, "Waiting on parts").unwrap();
        assert!(change.is_unchanged());
        assert_eq!(d.history.len(), 1);
    }

    #[test]
    fn skipping_is_rejected_without_side_effects() {
        let mut d = device_at(DeviceStatus::Submitted);
        let err = d.transition_to(DeviceStatus::Certified, "").unwrap_err();
        assert_eq!(
            err,
            DeviceError::OutOfOrder {
                from: DeviceStatus::Submitted,
                to: DeviceStatus::Certified
            }
        );
        assert_eq!(d.device_status(), DeviceStatus::Submitted);
        assert!(d.history.is_empty());
    }

    #[test]
    fn regression_is_rejected() {
        let mut d = device_at(DeviceStatus::Listed);
        assert!(d.transition_to(DeviceStatus::Certified, "").is_err());
    }

    #[test]
    fn full_flow_walks_to_allocated() {
        let mut d = Tracked::default();
        for target in DEVICE_STATUS_FLOW.iter().skip(1) {
            d.transition_to(*target, "step").unwrap();
        }
        assert_eq!(d.device_status(), DeviceStatus::Allocated);
        assert_eq!(d.history.len(), 6);
    }

    #[test]
    fn force_status_bypasses_order_but_records() {
        let mut d = device_at(DeviceStatus::Submitted);
        let change = d.force_status(DeviceStatus::Listed, "Admin override: fast track");
        assert_eq!(d.device_status(), DeviceStatus::Listed);
        assert_eq!(change.from_status, DeviceStatus::Submitted);
        assert_eq!(d.history.len(), 1);
    }

    #[test]
    fn certified_predicate() {
        assert!(!DeviceStatus::UnderRepair.is_certified());
        assert!(DeviceStatus::Certified.is_certified());
        assert!(DeviceStatus::Listed.is_certified());
        assert!(DeviceStatus::Allocated.is_certified());
    }

    #[test]
    fn error_message_names_both_statuses() {
        let err = plan_transition(DeviceStatus::Submitted, DeviceStatus::Listed, "").unwrap_err();
        assert_eq!(
            err.to_string(),
            "status transition must follow defined order: submitted -> listed"
        );
    }

    // ── Properties ───────────────────────────────────────────────────

    fn any_status() -> impl Strategy<Value = DeviceStatus> {
        (0usize..DEVICE_STATUS_FLOW.len()).prop_map(|i| DEVICE_STATUS_FLOW[i])
    }

    proptest! {
        #[test]
        fn position_never_jumps_or_regresses(targets in proptest::collection::vec(any_status(), 0..40)) {
            let mut d = Tracked::default();
            let mut accepted = 0usize;
            for target in targets {
                let before = d.device_status().position();
                match d.transition_to(target, "") {
                    Ok(_) => {
                        accepted += 1;
                        let after = d.device_status().position();
                        prop_assert!(after == before || after == before + 1);
                    }
                    Err(_) => prop_assert_eq!(d.device_status().position(), before),
                }
            }
            prop_assert_eq!(d.history.len(), accepted);
        }
    }
}
