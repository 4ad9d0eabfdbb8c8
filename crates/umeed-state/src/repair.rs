//! # Repair Assignment Lifecycle
//!
//! A device has at most one repair assignment. Its status is set freely by
//! the repair partner; the only structured step is certification, which
//! stamps the assignment and then asks the device to move to `certified`.
//!
//! ```text
//!   Pending │ InProgress │ AwaitingParts │ Completed │ Rejected
//!   ───────────── partner sets any of these, in any order ──────
//!                               │
//!                          certify (any status)
//!                               ▼
//!                  Certified + is_certified + certified_at
//!                               │
//!                               ▼ best effort
//!              device under_repair | under_inspection ──▶ certified
//! ```
//!
//! Assigning a partner to a device that has not yet been inspected also
//! nudges the device into `under_inspection`. Both device nudges are
//! best-effort triggers: when the device flow rejects them, the repair
//! operation still succeeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DeviceStatus;

/// Note written to device history when certification moves the device.
pub const CERTIFICATION_NOTE: &str = "Certified by repair partner";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    Pending,
    InProgress,
    AwaitingParts,
    Completed,
    Certified,
    Rejected,
}

impl RepairStatus {
    pub const ALL: [RepairStatus; 6] = [
        Self::Pending,
        Self::InProgress,
        Self::AwaitingParts,
        Self::Completed,
        Self::Certified,
        Self::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::AwaitingParts => "awaiting_parts",
            Self::Completed => "completed",
            Self::Certified => "certified",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == name)
    }

    /// Whether work on the device is still outstanding.
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Completed | Self::Certified | Self::Rejected)
    }
}

impl std::fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RepairStatus {
    type Err = RepairError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| RepairError::UnknownStatus(s.to_string()))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepairError {
    #[error("invalid repair status: \"{0}\"")]
    UnknownStatus(String),
}

/// A record carrying a repair assignment's status and certification stamp.
pub trait RepairLifecycle {
    fn repair_status(&self) -> RepairStatus;

    fn apply_repair_status(&mut self, status: RepairStatus);

    /// Set `is_certified` and `certified_at`.
    fn apply_certification(&mut self, certified_at: DateTime<Utc>);

    /// Certify the repair: stamp it and set status `certified`.
    ///
    /// Returns the certification time. Certifying twice re-stamps.
    fn mark_certified(&mut self) -> DateTime<Utc> {
        let at = Utc::now();
        self.apply_certification(at);
        self.apply_repair_status(RepairStatus::Certified);
        at
    }
}

/// Device status to attempt after certification, given the device's
/// current status.
pub fn certification_target(device: DeviceStatus) -> Option<DeviceStatus> {
    matches!(
        device,
        DeviceStatus::UnderRepair | DeviceStatus::UnderInspection
    )
    .then_some(DeviceStatus::Certified)
}

/// Device status to attempt when a repair partner is assigned.
pub fn assignment_target(device: DeviceStatus) -> Option<DeviceStatus> {
    matches!(device, DeviceStatus::Submitted | DeviceStatus::PickedUp)
        .then_some(DeviceStatus::UnderInspection)
}

/// History note for the assignment trigger.
pub fn assignment_note(partner_name: &str) -> String {
    format!("Assigned to {partner_name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{plan_transition, DEVICE_STATUS_FLOW};

    struct Assignment {
        status: RepairStatus,
        certified_at: Option<DateTime<Utc>>,
    }

    impl RepairLifecycle for Assignment {
        fn repair_status(&self) -> RepairStatus {
            self.status
        }
        fn apply_repair_status(&mut self, status: RepairStatus) {
            self.status = status;
        }
        fn apply_certification(&mut self, certified_at: DateTime<Utc>) {
            self.certified_at = Some(certified_at);
        }
    }

    #[test]
    fn mark_certified_stamps_and_sets_status() {
        let mut a = Assignment {
            status: RepairStatus::InProgress,
            certified_at: None,
        };
        let at = a.mark_certified();
        assert_eq!(a.repair_status(), RepairStatus::Certified);
        assert_eq!(a.certified_at, Some(at));
    }

    #[test]
    fn certification_target_only_from_inspection_or_repair() {
        for status in DEVICE_STATUS_FLOW {
            let expected = matches!(
                status,
                DeviceStatus::UnderRepair | DeviceStatus::UnderInspection
            );
            assert_eq!(certification_target(status).is_some(), expected, "{status}");
        }
    }

    #[test]
    fn certification_from_inspection_is_rejected_by_device_flow() {
        // The trigger is attempted, but the ordered flow refuses the skip.
        let target = certification_target(DeviceStatus::UnderInspection).unwrap();
        assert!(plan_transition(DeviceStatus::UnderInspection, target, CERTIFICATION_NOTE).is_err());
        let target = certification_target(DeviceStatus::UnderRepair).unwrap();
        assert!(plan_transition(DeviceStatus::UnderRepair, target, CERTIFICATION_NOTE).is_ok());
    }

    #[test]
    fn assignment_target_from_early_statuses() {
        assert_eq!(
            assignment_target(DeviceStatus::Submitted),
            Some(DeviceStatus::UnderInspection)
        );
        assert_eq!(
            assignment_target(DeviceStatus::PickedUp),
            Some(DeviceStatus::UnderInspection)
        );
        assert_eq!(assignment_target(DeviceStatus::UnderRepair), None);
        assert_eq!(assignment_note("Ravi Kumar"), "Assigned to Ravi Kumar");
    }

    #[test]
    fn open_statuses() {
        assert!(RepairStatus::Pending.is_open());
        assert!(RepairStatus::AwaitingParts.is_open());
        assert!(!RepairStatus::Completed.is_open());
        assert!(!RepairStatus::Rejected.is_open());
        assert!("fixed".parse::<RepairStatus>().is_err());
    }
}
