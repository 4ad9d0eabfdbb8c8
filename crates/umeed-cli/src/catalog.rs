//! # Marketplace Catalog Subcommands
//!
//! `seed-devices` loads a fixed demo catalog of approved, listed devices so
//! a fresh deployment has something to browse. `sync-listings` repairs
//! approved devices that lack a listing.

use anyhow::{Context, Result};
use clap::Args;

use umeed_api::orchestration::{self, DeviceReview, NewDevice};
use umeed_api::AppState;
use umeed_core::Amount;
use umeed_state::{ApprovalStatus, DeviceCategory, DeviceCondition, DeviceStatus};

use crate::find_user;

/// One demo catalog entry. Prices are rupees with paise.
struct CatalogEntry {
    title: &'static str,
    category: DeviceCategory,
    condition: DeviceCondition,
    price: &'static str,
    description: &'static str,
}

const DEMO_CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        title: "Portable Oxygen Concentrator",
        category: DeviceCategory::OxygenConcentrator,
        condition: DeviceCondition::Good,
        price: "25000.00",
        description: "Portable oxygen concentrator, tested and certified. Includes accessories and user manual.",
    },
    CatalogEntry {
        title: "Medical Ventilator System",
        category: DeviceCategory::Ventilator,
        condition: DeviceCondition::Good,
        price: "150000.00",
        description: "Professional-grade ventilator, recently serviced and certified. Safety checks completed.",
    },
    CatalogEntry {
        title: "ICU Ventilator Unit",
        category: DeviceCategory::Ventilator,
        condition: DeviceCondition::Good,
        price: "180000.00",
        description: "ICU ventilator, fully functional and certified. Includes components and documentation.",
    },
    CatalogEntry {
        title: "Patient Vital Signs Monitor",
        category: DeviceCategory::Monitor,
        condition: DeviceCondition::Good,
        price: "45000.00",
        description: "Multi-parameter monitor for heart rate, blood pressure, and oxygen saturation.",
    },
    CatalogEntry {
        title: "Wheelchair - Standard Model",
        category: DeviceCategory::Wheelchair,
        condition: DeviceCondition::Good,
        price: "8000.00",
        description: "Lightweight standard wheelchair with adjustable footrests. Sanitized and ready for use.",
    },
    CatalogEntry {
        title: "Digital Blood Pressure Monitor",
        category: DeviceCategory::Other,
        condition: DeviceCondition::New,
        price: "2500.00",
        description: "Digital blood pressure monitor with large display and cuff. Brand new.",
    },
    CatalogEntry {
        title: "Finger Pulse Oximeter",
        category: DeviceCategory::Other,
        condition: DeviceCondition::New,
        price: "1200.00",
        description: "Finger pulse oximeter for blood oxygen and heart rate. New in box.",
    },
    CatalogEntry {
        title: "Professional Stethoscope",
        category: DeviceCategory::Other,
        condition: DeviceCondition::Good,
        price: "3500.00",
        description: "Medical stethoscope with excellent acoustics. Cleaned and sanitized.",
    },
    CatalogEntry {
        title: "Digital Thermometer",
        category: DeviceCategory::Other,
        condition: DeviceCondition::New,
        price: "500.00",
        description: "Fast digital thermometer with beep alert and memory. Sealed package.",
    },
];

/// Arguments for `umeed seed-devices`.
#[derive(Args, Debug)]
pub struct SeedDevicesArgs {
    /// Username recorded as the donor of every seeded device.
    #[arg(long)]
    pub donor: String,

    /// Seed at most this many catalog entries.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Leave devices `submitted` and pending review instead of listing them.
    #[arg(long)]
    pub pending: bool,
}

/// Submit each catalog entry not already present (matched by title), then
/// approve it with a `listed` override so its listing is created.
pub async fn run_seed_devices(args: &SeedDevicesArgs, state: &AppState) -> Result<u8> {
    let donor = find_user(state, &args.donor)?;
    let entries = DEMO_CATALOG.iter().take(args.limit.unwrap_or(DEMO_CATALOG.len()));

    let (mut created, mut skipped) = (0usize, 0usize);
    for entry in entries {
        if state.devices.find(|d| d.title == entry.title).is_some() {
            tracing::debug!(title = entry.title, "device already exists");
            skipped += 1;
            continue;
        }

        let input = NewDevice {
            title: entry.title.to_string(),
            description: entry.description.to_string(),
            category: entry.category,
            condition: entry.condition,
            price: Some(Amount::parse(entry.price)?),
            image_urls: Vec::new(),
        };
        let device = orchestration::submit_device(state, donor.id, input)
            .await
            .with_context(|| format!("submitting '{}'", entry.title))?;

        if !args.pending {
            let review = DeviceReview {
                approval: ApprovalStatus::Approved,
                notes: "Seeded catalog device".to_string(),
                status_override: Some(DeviceStatus::Listed),
            };
            orchestration::review_device(state, donor.id, device.id, review)
                .await
                .with_context(|| format!("approving '{}'", entry.title))?;
        }

        println!("  created {} ({}, Rs. {})", entry.title, device.listing_id, entry.price);
        created += 1;
    }

    let active = state.listings.filter(|l| l.is_active).len();
    println!("Created {created}, skipped {skipped}, active listings {active}");
    Ok(0)
}

/// Arguments for `umeed sync-listings`.
#[derive(Args, Debug)]
pub struct SyncListingsArgs {}

pub async fn run_sync_listings(_args: &SyncListingsArgs, state: &AppState) -> Result<u8> {
    let created = orchestration::ensure_marketplace_listings(state).await?;
    println!("Created {created} missing listing(s)");
    Ok(0)
}
