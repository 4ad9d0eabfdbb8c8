//! # Logistics Task Lifecycle
//!
//! Pickup tasks collect a donated device; delivery tasks carry a sold
//! device to its buyer.
//!
//! ```text
//! Assigned ──▶ PickedUp ──▶ Delivered
//!    │            │
//!    └────────────┴──▶ Cancelled
//! ```
//!
//! Each completed step stores its proof URL, optional coordinates, and a
//! timestamp, and appends a history row. A pickup of a device that is still
//! `submitted` moves the device to `picked_up`; a delivery against an order
//! moves the order to `delivered`. Those effects on other machines are
//! driven by the caller using [`pickup_target`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use umeed_core::GeoPoint;

use crate::device::DeviceStatus;

/// Note written to device history when a pickup moves the device.
pub const PICKUP_DEVICE_NOTE: &str = "Picked up by logistics";

// ─── Task Type & Status ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Pickup,
    Delivery,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pickup => "pickup",
            Self::Delivery => "delivery",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pickup" => Some(Self::Pickup),
            "delivery" => Some(Self::Delivery),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| TaskError::UnknownType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Assigned,
    PickedUp,
    Delivered,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        Self::Assigned,
        Self::PickedUp,
        Self::Delivered,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::PickedUp => "picked_up",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == name)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| TaskError::UnknownStatus(s.to_string()))
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("invalid task status: \"{0}\"")]
    UnknownStatus(String),

    #[error("invalid task type: \"{0}\"")]
    UnknownType(String),

    /// The step requires a different current status.
    #[error("task must be {required} to be marked {target} (currently {actual})")]
    WrongStatus {
        required: TaskStatus,
        target: TaskStatus,
        actual: TaskStatus,
    },

    #[error("task is already {0}")]
    AlreadyFinished(TaskStatus),
}

// ─── History & Reports ───────────────────────────────────────────────

/// One row of the append-only task status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusChange {
    pub status: TaskStatus,
    pub note: String,
    pub changed_at: DateTime<Utc>,
}

impl TaskStatusChange {
    pub fn new(status: TaskStatus, note: impl Into<String>) -> Self {
        Self {
            status,
            note: note.into(),
            changed_at: Utc::now(),
        }
    }

    /// The history row written when a task is created.
    pub fn created() -> Self {
        Self::new(TaskStatus::Assigned, "Task created")
    }
}

/// What the field agent reports when completing a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub proof_url: Option<String>,
    pub location: Option<GeoPoint>,
    pub notes: String,
}

impl ProgressReport {
    fn note_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.notes.trim().is_empty() {
            default
        } else {
            &self.notes
        }
    }
}

// ─── Lifecycle ───────────────────────────────────────────────────────

/// A record carrying a logistics task's status, proofs, and history.
pub trait TaskLifecycle {
    fn task_status(&self) -> TaskStatus;

    /// Store proof URL, location, timestamp, and notes for the step that
    /// just reached `reached`.
    fn apply_progress(&mut self, reached: TaskStatus, report: &ProgressReport, at: DateTime<Utc>);

    /// Set the status to `change.status` and append `change` to history.
    fn apply_task_change(&mut self, change: TaskStatusChange);

    /// `assigned → picked_up`.
    ///
    /// # Errors
    ///
    /// [`TaskError::WrongStatus`] unless the task is `assigned`.
    fn mark_picked_up(&mut self, report: ProgressReport) -> Result<TaskStatusChange, TaskError> {
        advance(self, TaskStatus::Assigned, TaskStatus::PickedUp, &report, "Picked up")
    }

    /// `picked_up → delivered`.
    ///
    /// # Errors
    ///
    /// [`TaskError::WrongStatus`] unless the task is `picked_up`.
    fn mark_delivered(&mut self, report: ProgressReport) -> Result<TaskStatusChange, TaskError> {
        advance(self, TaskStatus::PickedUp, TaskStatus::Delivered, &report, "Delivered")
    }

    /// Cancel a task that has not yet finished.
    ///
    /// # Errors
    ///
    /// [`TaskError::AlreadyFinished`] for delivered or cancelled tasks.
    fn cancel(&mut self, note: &str) -> Result<TaskStatusChange, TaskError> {
        let current = self.task_status();
        if current.is_terminal() {
            return Err(TaskError::AlreadyFinished(current));
        }
        let note = if note.trim().is_empty() { "Cancelled" } else { note };
        let change = TaskStatusChange::new(TaskStatus::Cancelled, note);
        self.apply_task_change(change.clone());
        Ok(change)
    }
}

fn advance<T: TaskLifecycle + ?Sized>(
    task: &mut T,
    required: TaskStatus,
    target: TaskStatus,
    report: &ProgressReport,
    default_note: &str,
) -> Result<TaskStatusChange, TaskError> {
    let actual = task.task_status();
    if actual != required {
        return Err(TaskError::WrongStatus {
            required,
            target,
            actual,
        });
    }
    let change = TaskStatusChange::new(target, report.note_or(default_note));
    task.apply_progress(target, report, change.changed_at);
    task.apply_task_change(change.clone());
    Ok(change)
}

/// Device status to attempt after a pickup, given the device's current
/// status.
pub fn pickup_target(device: DeviceStatus) -> Option<DeviceStatus> {
    (device == DeviceStatus::Submitted).then_some(DeviceStatus::PickedUp)
}
