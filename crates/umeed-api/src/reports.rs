//! # Dashboards & Analytics
//!
//! Read-only aggregations over the in-memory stores: the admin dashboard,
//! chart series for the admin and impact views, and live bottleneck counts.
//! Nothing here mutates state.

use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use umeed_core::Amount;
use umeed_state::{
    ApprovalStatus, DeviceCategory, DeviceStatus, OrderStatus, TaskStatus,
    TaskType, DEVICE_STATUS_FLOW,
};

use crate::auth::Role;
use crate::model::{DeviceRecord, OrderRecord};
use crate::state::AppState;

/// Label/value series consumed by dashboard charts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub data: Vec<u64>,
}

impl ChartData {
    fn from_pairs(pairs: impl IntoIterator<Item = (String, u64)>) -> Self {
        let (labels, data) = pairs.into_iter().unzip();
        Self { labels, data }
    }
}

/// Status counts shared by the admin dashboard and impact view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct PipelineTotals {
    pub devices_collected: u64,
    /// Devices at `certified` or later.
    pub devices_repaired: u64,
    /// Devices at `allocated`.
    pub devices_redistributed: u64,
}

fn pipeline_totals(devices: &[DeviceRecord]) -> PipelineTotals {
    PipelineTotals {
        devices_collected: devices.len() as u64,
        devices_repaired: devices.iter().filter(|d| d.status.is_certified()).count() as u64,
        devices_redistributed: devices
            .iter()
            .filter(|d| d.status == DeviceStatus::Allocated)
            .count() as u64,
    }
}

fn newest_first<T>(mut items: Vec<T>, created_at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    items.sort_by_key(|i| Reverse(created_at(i)));
    items
}

/// Devices, newest first.
pub fn devices_newest_first(devices: Vec<DeviceRecord>) -> Vec<DeviceRecord> {
    newest_first(devices, |d| d.created_at)
}

/// Orders, newest first.
pub fn orders_newest_first(orders: Vec<OrderRecord>) -> Vec<OrderRecord> {
    newest_first(orders, |o| o.created_at)
}

// -- Admin dashboard -----------------------------------------------------------

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AdminDashboard {
    #[serde(flatten)]
    pub totals: PipelineTotals,
    pub pending_approval: u64,
    /// The ten most recently submitted devices.
    pub recent_devices: Vec<DeviceRecord>,
    /// The five most recent orders.
    pub recent_orders: Vec<OrderRecord>,
}

pub fn admin_dashboard(state: &AppState) -> AdminDashboard {
    let devices = state.devices.list();
    let totals = pipeline_totals(&devices);
    let pending_approval = devices
        .iter()
        .filter(|d| d.admin_approval_status == ApprovalStatus::Pending)
        .count() as u64;

    let mut recent_devices = devices_newest_first(devices);
    recent_devices.truncate(10);
    let mut recent_orders = orders_newest_first(state.orders.list());
    recent_orders.truncate(5);

    AdminDashboard {
        totals,
        pending_approval,
        recent_devices,
        recent_orders,
    }
}

// -- Admin charts --------------------------------------------------------------

/// Chart series by name. Unknown names yield an empty chart.
pub fn admin_chart(state: &AppState, kind: &str, now: DateTime<Utc>) -> ChartData {
    let devices = state.devices.list();
    match kind {
        "device_status" => device_status_chart(&devices),
        "device_category" => device_category_chart(&devices),
        "monthly_trends" => monthly_trends_chart(&devices, now),
        "approval_status" => approval_status_chart(&devices),
        _ => ChartData::default(),
    }
}

/// Every status in flow order, including those with no devices.
fn device_status_chart(devices: &[DeviceRecord]) -> ChartData {
    ChartData::from_pairs(DEVICE_STATUS_FLOW.iter().map(|s| {
        let n = devices.iter().filter(|d| d.status == *s).count() as u64;
        (s.label().to_string(), n)
    }))
}

/// Categories that have at least one device.
fn device_category_chart(devices: &[DeviceRecord]) -> ChartData {
    ChartData::from_pairs(DeviceCategory::ALL.iter().filter_map(|c| {
        let n = devices.iter().filter(|d| d.category == *c).count() as u64;
        (n > 0).then(|| (c.label().to_string(), n))
    }))
}

fn approval_status_chart(devices: &[DeviceRecord]) -> ChartData {
    ChartData::from_pairs(ApprovalStatus::ALL.iter().filter_map(|a| {
        let n = devices
            .iter()
            .filter(|d| d.admin_approval_status == *a)
            .count() as u64;
        (n > 0).then(|| (a.label().to_string(), n))
    }))
}

/// Submissions in six consecutive 30-day windows, oldest first. The last
/// window starts at `now`; each is labelled with its start month.
fn monthly_trends_chart(devices: &[DeviceRecord], now: DateTime<Utc>) -> ChartData {
    ChartData::from_pairs((0..6).rev().map(|i| {
        let start = now - Duration::days(30 * i);
        let end = start + Duration::days(30);
        let n = devices
            .iter()
            .filter(|d| d.created_at >= start && d.created_at < end)
            .count() as u64;
        (start.format("%b %Y").to_string(), n)
    }))
}

// -- Bottlenecks ---------------------------------------------------------------

/// Work waiting at each pipeline stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct Bottlenecks {
    /// Devices whose approval is `pending`.
    pub pending_approvals: u32,
    /// Assignments not yet completed, certified, or rejected.
    pub pending_repairs: u32,
    /// Pickup tasks still `assigned`.
    pub pending_pickups: u32,
    /// Delivery tasks `picked_up` but not delivered.
    pub in_transit_deliveries: u32,
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

pub fn bottlenecks(state: &AppState) -> Bottlenecks {
    let tasks = state.tasks.list();
    let tasks_in = |kind: TaskType, status: TaskStatus| {
        count_u32(
            tasks
                .iter()
                .filter(|t| t.task_type == kind && t.status == status)
                .count(),
        )
    };

    Bottlenecks {
        pending_approvals: count_u32(
            state
                .devices
                .filter(|d| d.admin_approval_status == ApprovalStatus::Pending)
                .len(),
        ),
        pending_repairs: count_u32(state.repairs.filter(|r| r.status.is_open()).len()),
        pending_pickups: tasks_in(TaskType::Pickup, TaskStatus::Assigned),
        in_transit_deliveries: tasks_in(TaskType::Delivery, TaskStatus::PickedUp),
    }
}

// -- Impact --------------------------------------------------------------------

/// Per-region impact. Only regions with at least one impact record appear.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RegionStats {
    pub region_id: Uuid,
    pub name: String,
    pub code: String,
    pub devices_collected: u64,
    pub devices_redistributed: u64,
    pub beneficiaries: u64,
    #[schema(value_type = String)]
    pub co2_saved_kg: Amount,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ImpactSummary {
    #[serde(flatten)]
    pub totals: PipelineTotals,
    #[schema(value_type = String)]
    pub estimated_co2_saved_kg: Amount,
    pub beneficiaries_served: u64,
    /// Most devices first.
    pub regions: Vec<RegionStats>,
    pub bottlenecks: Bottlenecks,
}

pub fn impact_summary(state: &AppState) -> ImpactSummary {
    let devices = state.devices.list();
    let impacts = state.impacts.list();
    let allocated = |device_id: Uuid| {
        devices
            .iter()
            .any(|d| d.id == device_id && d.status == DeviceStatus::Allocated)
    };

    let mut regions: Vec<RegionStats> = state
        .regions
        .list()
        .into_iter()
        .filter_map(|region| {
            let here: Vec<_> = impacts
                .iter()
                .filter(|i| i.region_id == Some(region.id))
                .collect();
            if here.is_empty() {
                return None;
            }
            Some(RegionStats {
                region_id: region.id,
                name: region.name,
                code: region.code,
                devices_collected: here.len() as u64,
                devices_redistributed: here.iter().filter(|i| allocated(i.device_id)).count()
                    as u64,
                beneficiaries: here.iter().map(|i| u64::from(i.beneficiaries)).sum(),
                co2_saved_kg: here
                    .iter()
                    .fold(Amount::ZERO, |acc, i| acc.saturating_add(i.estimated_co2_saved_kg)),
            })
        })
        .collect();
    regions.sort_by(|a, b| {
        b.devices_collected
            .cmp(&a.devices_collected)
            .then_with(|| a.name.cmp(&b.name))
    });

    ImpactSummary {
        totals: pipeline_totals(&devices),
        estimated_co2_saved_kg: impacts
            .iter()
            .fold(Amount::ZERO, |acc, i| acc.saturating_add(i.estimated_co2_saved_kg)),
        beneficiaries_served: impacts.iter().map(|i| u64::from(i.beneficiaries)).sum(),
        regions,
        bottlenecks: bottlenecks(state),
    }
}

/// Chart payloads for the impact view. The region chart carries three
/// parallel series.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(untagged)]
pub enum ImpactChart {
    Series {
        labels: Vec<String>,
        data: Vec<f64>,
    },
    Regions {
        labels: Vec<String>,
        devices: Vec<u64>,
        beneficiaries: Vec<u64>,
        co2: Vec<f64>,
    },
}

impl ImpactChart {
    fn empty() -> Self {
        Self::Series {
            labels: Vec::new(),
            data: Vec::new(),
        }
    }

    fn series(pairs: &[(&str, f64)]) -> Self {
        Self::Series {
            labels: pairs.iter().map(|(l, _)| l.to_string()).collect(),
            data: pairs.iter().map(|(_, v)| *v).collect(),
        }
    }
}

/// `global`, `regions`, or `bottlenecks`. Unknown names yield an empty
/// series.
pub fn impact_chart(state: &AppState, kind: &str) -> ImpactChart {
    match kind {
        "global" => {
            let s = impact_summary(state);
            ImpactChart::series(&[
                ("Devices Collected", s.totals.devices_collected as f64),
                ("Devices Repaired", s.totals.devices_repaired as f64),
                ("Devices Redistributed", s.totals.devices_redistributed as f64),
                ("Estimated CO₂ Saved (kg)", s.estimated_co2_saved_kg.to_f64()),
                ("Beneficiaries Served", s.beneficiaries_served as f64),
            ])
        }
        "regions" => regions_chart(state),
        "bottlenecks" => {
            let b = bottlenecks(state);
            ImpactChart::series(&[
                ("Pending Approvals", f64::from(b.pending_approvals)),
                ("Pending Repairs", f64::from(b.pending_repairs)),
                ("Pending Pickups", f64::from(b.pending_pickups)),
                ("In-transit Deliveries", f64::from(b.in_transit_deliveries)),
            ])
        }
        _ => ImpactChart::empty(),
    }
}

/// Impact grouped by region name, most devices first. Records without a
/// region are grouped under "Unknown".
fn regions_chart(state: &AppState) -> ImpactChart {
    let names: HashMap<Uuid, String> = state
        .regions
        .list()
        .into_iter()
        .map(|r| (r.id, r.name))
        .collect();

    let mut groups: HashMap<String, (u64, u64, Amount)> = HashMap::new();
    for impact in state.impacts.list() {
        let name = impact
            .region_id
            .and_then(|id| names.get(&id).cloned())
            .unwrap_or_else(|| "Unknown".to_string());
        let entry = groups.entry(name).or_insert((0, 0, Amount::ZERO));
        entry.0 += 1;
        entry.1 += u64::from(impact.beneficiaries);
        entry.2 = entry.2.saturating_add(impact.estimated_co2_saved_kg);
    }

    let mut rows: Vec<_> = groups.into_iter().collect();
    rows.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then_with(|| a.0.cmp(&b.0)));

    ImpactChart::Regions {
        labels: rows.iter().map(|(name, _)| name.clone()).collect(),
        devices: rows.iter().map(|(_, g)| g.0).collect(),
        beneficiaries: rows.iter().map(|(_, g)| g.1).collect(),
        co2: rows.iter().map(|(_, g)| g.2.to_f64()).collect(),
    }
}

// -- User and order management -------------------------------------------------

/// Number of users holding each role, keyed by role name.
pub fn role_counts(state: &AppState) -> HashMap<String, u64> {
    let users = state.users.list();
    Role::ALL
        .iter()
        .map(|r| {
            let n = users.iter().filter(|u| u.role == *r).count() as u64;
            (r.as_str().to_string(), n)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderStats {
    pub total: u64,
    /// `placed` or `confirmed`.
    pub pending: u64,
    pub delivered: u64,
    pub cancelled: u64,
}

pub fn order_stats(state: &AppState) -> OrderStats {
    let orders = state.orders.list();
    let count = |pred: &dyn Fn(OrderStatus) -> bool| {
        orders.iter().filter(|o| pred(o.status)).count() as u64
    };
    OrderStats {
        total: orders.len() as u64,
        pending: count(&|s| s.is_pending()),
        delivered: count(&|s| s == OrderStatus::Delivered),
        cancelled: count(&|s| s == OrderStatus::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceImpactRecord, LogisticsTaskRecord, RegionRecord};
    use umeed_core::ListingId;
    use umeed_state::{DeviceCondition, DeviceStatusChange, TaskStatusChange};

    fn device(status: DeviceStatus, approval: ApprovalStatus, age_days: i64) -> DeviceRecord {
        let created = Utc::now() - Duration::days(age_days);
        DeviceRecord {
            id: Uuid::new_v4(),
            listing_id: ListingId::generate(),
            title: "Monitor".into(),
            description: String::new(),
            category: DeviceCategory::Monitor,
            condition: DeviceCondition::Good,
            status,
            admin_approval_status: approval,
            admin_notes: String::new(),
            donor_id: Uuid::new_v4(),
            price: None,
            image_urls: vec![],
            history: vec![DeviceStatusChange::submission()],
            created_at: created,
            updated_at: created,
        }
    }

    fn add(state: &AppState, d: DeviceRecord) -> Uuid {
        let id = d.id;
        state.devices.insert(id, d);
        id
    }

    fn task(kind: TaskType, status: TaskStatus) -> LogisticsTaskRecord {
        let now = Utc::now();
        LogisticsTaskRecord {
            id: Uuid::new_v4(),
            task_type: kind,
            status,
            device_id: None,
            order_id: None,
            pickup_address: String::new(),
            delivery_address: String::new(),
            assigned_to: None,
            pickup_proof_url: None,
            delivery_proof_url: None,
            pickup_location: None,
            delivery_location: None,
            assigned_at: now,
            picked_up_at: None,
            delivered_at: None,
            updated_at: now,
            notes: String::new(),
            history: vec![TaskStatusChange::created()],
        }
    }

    #[test]
    fn dashboard_totals_and_recent_limits() {
        let state = AppState::new();
        for i in 0..12 {
            add(&state, device(DeviceStatus::Submitted, ApprovalStatus::Pending, i));
        }
        add(&state, device(DeviceStatus::Certified, ApprovalStatus::Approved, 20));
        add(&state, device(DeviceStatus::Allocated, ApprovalStatus::Approved, 21));

        let dash = admin_dashboard(&state);
        assert_eq!(dash.totals.devices_collected, 14);
        assert_eq!(dash.totals.devices_repaired, 2);
        assert_eq!(dash.totals.devices_redistributed, 1);
        assert_eq!(dash.pending_approval, 12);
        assert_eq!(dash.recent_devices.len(), 10);
        assert!(dash
            .recent_devices
            .windows(2)
            .all(|w| w[0].created_at >= w[1].created_at));
        assert!(dash.recent_orders.is_empty());
    }

    #[test]
    fn device_status_chart_is_zero_filled_in_flow_order() {
        let state = AppState::new();
        add(&state, device(DeviceStatus::Listed, ApprovalStatus::Approved, 0));
        let chart = admin_chart(&state, "device_status", Utc::now());
        assert_eq!(chart.labels.len(), 7);
        assert_eq!(chart.labels[0], DeviceStatus::Submitted.label());
        assert_eq!(chart.data, vec![0, 0, 0, 0, 0, 1, 0]);
    }

    #[test]
    fn monthly_trends_has_six_windows_oldest_first() {
        let state = AppState::new();
        let now = Utc::now();
        add(&state, device(DeviceStatus::Submitted, ApprovalStatus::Pending, 0));
        add(&state, device(DeviceStatus::Submitted, ApprovalStatus::Pending, 45));
        let chart = admin_chart(&state, "monthly_trends", now);
        assert_eq!(chart.labels.len(), 6);
        assert_eq!(chart.labels[5], now.format("%b %Y").to_string());
        assert_eq!(chart.data[5], 1);
        assert_eq!(chart.data[3], 1);
        assert_eq!(chart.data.iter().sum::<u64>(), 2);
    }

    #[test]
    fn unknown_chart_is_empty() {
        let state = AppState::new();
        assert_eq!(admin_chart(&state, "weather", Utc::now()), ChartData::default());
        assert_eq!(impact_chart(&state, "weather"), ImpactChart::empty());
    }

    #[test]
    fn bottlenecks_count_each_stage() {
        let state = AppState::new();
        add(&state, device(DeviceStatus::Submitted, ApprovalStatus::Pending, 0));
        add(&state, device(DeviceStatus::Submitted, ApprovalStatus::OnHold, 0));
        for t in [
            task(TaskType::Pickup, TaskStatus::Assigned),
            task(TaskType::Pickup, TaskStatus::PickedUp),
            task(TaskType::Delivery, TaskStatus::PickedUp),
            task(TaskType::Delivery, TaskStatus::Delivered),
        ] {
            state.tasks.insert(t.id, t);
        }
        let b = bottlenecks(&state);
        assert_eq!(b.pending_approvals, 1);
        assert_eq!(b.pending_pickups, 1);
        assert_eq!(b.in_transit_deliveries, 1);
        assert_eq!(b.pending_repairs, 0);
    }

    #[test]
    fn impact_summary_lists_only_regions_with_data() {
        let state = AppState::new();
        let region = |code: &str| RegionRecord {
            id: Uuid::new_v4(),
            name: code.into(),
            code: code.into(),
            country: "India".into(),
            state: String::new(),
            district: String::new(),
        };
        let (pune, nagpur) = (region("PUNE"), region("NAGPUR"));
        state.regions.insert(pune.id, pune.clone());
        state.regions.insert(nagpur.id, nagpur.clone());

        let d1 = add(&state, device(DeviceStatus::Allocated, ApprovalStatus::Approved, 0));
        let d2 = add(&state, device(DeviceStatus::Listed, ApprovalStatus::Approved, 0));
        for (device_id, beneficiaries, co2) in [(d1, 3, 1250), (d2, 2, 50)] {
            let i = DeviceImpactRecord {
                id: Uuid::new_v4(),
                device_id,
                region_id: Some(pune.id),
                beneficiaries,
                estimated_co2_saved_kg: Amount::from_hundredths(co2).unwrap(),
                updated_at: Utc::now(),
            };
            state.impacts.insert(i.id, i);
        }

        let s = impact_summary(&state);
        assert_eq!(s.regions.len(), 1);
        assert_eq!(s.regions[0].code, "PUNE");
        assert_eq!(s.regions[0].devices_collected, 2);
        assert_eq!(s.regions[0].devices_redistributed, 1);
        assert_eq!(s.beneficiaries_served, 5);
        assert_eq!(s.estimated_co2_saved_kg.to_string(), "13.00");

        match impact_chart(&state, "regions") {
            ImpactChart::Regions { labels, devices, .. } => {
                assert_eq!(labels, vec!["PUNE".to_string()]);
                assert_eq!(devices, vec![2]);
            }
            other => panic!("unexpected chart: {other:?}"),
        }
    }

    #[test]
    fn order_stats_group_pending() {
        let state = AppState::new();
        for status in [
            OrderStatus::Placed,
            OrderStatus::Confirmed,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
            OrderStatus::InTransit,
        ] {
            let o = OrderRecord {
                id: Uuid::new_v4(),
                listing_id: Uuid::new_v4(),
                buyer_id: Uuid::new_v4(),
                status,
                shipping_address: "Pune".into(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                history: vec![],
            };
            state.orders.insert(o.id, o);
        }
        let s = order_stats(&state);
        assert_eq!(s.total, 5);
        assert_eq!(s.pending, 2);
        assert_eq!(s.delivered, 1);
        assert_eq!(s.cancelled, 1);
    }
}
