//! # umeed-state — Lifecycle State Machines
//!
//! The donation → repair → logistics → marketplace pipeline is four small,
//! independent state machines. Each is an enum of statuses, a history row
//! type, an error type, and a lifecycle trait whose provided methods hold the
//! transition rules. Records in the service layer implement the traits by
//! supplying accessors; they never set a status field directly.
//!
//! ## State Machines
//!
//! - **Device** (`device.rs`): strict ordered flow
//!   `submitted → picked_up → under_inspection → under_repair → certified →
//!   listed → allocated`, plus the independent admin approval gate.
//!
//! - **Repair** (`repair.rs`): free status per assignment; certification
//!   stamps the assignment and suggests a device transition.
//!
//! - **Logistics** (`logistics.rs`): `assigned → picked_up → delivered`,
//!   with cancellation from any unfinished state.
//!
//! - **Order** (`order.rs`): free-form advance between known statuses.
//!
//! ## Cross-Machine Triggers
//!
//! Functions such as [`repair::certification_target`] and
//! [`logistics::pickup_target`] say which device transition an operation on
//! another machine should attempt. Applying them is the caller's job and is
//! best-effort: a rejected trigger never fails the originating operation.
//!
//! ## Crate Policy
//!
//! No I/O. No `.unwrap()` outside tests.

pub mod catalog;
pub mod device;
pub mod logistics;
pub mod order;
pub mod repair;

pub use catalog::{DeviceCategory, DeviceCondition};
pub use device::{
    plan_transition, ApprovalStatus, DeviceError, DeviceLifecycle, DeviceStatus,
    DeviceStatusChange, DEVICE_STATUS_FLOW,
};
pub use logistics::{ProgressReport, TaskError, TaskLifecycle, TaskStatus, TaskStatusChange, TaskType};
pub use order::{OrderError, OrderLifecycle, OrderStatus, OrderStatusChange};
pub use repair::{RepairError, RepairLifecycle, RepairStatus};
