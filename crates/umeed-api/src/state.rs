//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers via
//! the `State` extractor.
//!
//! In-memory [`Store`]s are the source of truth for reads. When a database
//! pool is configured, every mutation is also written through to Postgres
//! and the stores are hydrated from it on startup. Sessions and pending OTP
//! challenges are memory-only: a restart logs everyone out.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::{Mutex, RwLock};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{self, audit::AuditEvent, Record};
use crate::error::AppError;
use crate::middleware::rate_limit::RateLimitConfig;
use crate::model::{
    BottleneckSnapshotRecord, DeviceImpactRecord, DeviceRecord, ListingRecord,
    LogisticsTaskRecord, OrderRecord, OtpRequestRecord, RegionRecord, RepairAssignmentRecord,
    UserRecord,
};

// -- Generic In-Memory Store --------------------------------------------------

/// Thread-safe, cloneable in-memory key-value store.
///
/// The lock is `parking_lot`, never held across `.await`, and does not
/// poison on panic.
#[derive(Debug)]
pub struct Store<T: Clone + Send + Sync> {
    data: Arc<RwLock<HashMap<Uuid, T>>>,
}

impl<T: Clone + Send + Sync> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Clone + Send + Sync> Store<T> {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, id: Uuid, value: T) -> Option<T> {
        self.data.write().insert(id, value)
    }

    pub fn get(&self, id: &Uuid) -> Option<T> {
        self.data.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// Records matching `pred`, in arbitrary order.
    pub fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.data.read().values().filter(|v| pred(v)).cloned().collect()
    }

    /// Any one record matching `pred`.
    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        self.data.read().values().find(|v| pred(v)).cloned()
    }

    /// Update a record in place. Returns the updated record, or `None` if not found.
    pub fn update(&self, id: &Uuid, f: impl FnOnce(&mut T)) -> Option<T> {
        let mut guard = self.data.write();
        if let Some(entry) = guard.get_mut(id) {
            f(entry);
            Some(entry.clone())
        } else {
            None
        }
    }

    /// Atomically read-validate-update a record.
    ///
    /// The closure runs under a single write lock and may reject the update
    /// by returning `Err`. Returns `None` if the record doesn't exist.
    pub fn try_update<R, E>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        self.data.write().get_mut(id).map(f)
    }

    /// Apply `f` to every record matching `pred`; returns how many changed.
    pub fn update_where(&self, pred: impl Fn(&T) -> bool, f: impl Fn(&mut T)) -> usize {
        let mut guard = self.data.write();
        let mut n = 0;
        for v in guard.values_mut().filter(|v| pred(v)) {
            f(v);
            n += 1;
        }
        n
    }

    /// Insert `value` unless `conflict` reports a clash with an existing
    /// record. The scan and the insert happen under one write lock.
    pub fn insert_unique<E>(
        &self,
        id: Uuid,
        value: T,
        conflict: impl Fn(&T) -> Option<E>,
    ) -> Result<(), E> {
        let mut guard = self.data.write();
        if let Some(err) = guard.values().find_map(&conflict) {
            return Err(err);
        }
        guard.insert(id, value);
        Ok(())
    }

    /// Update the record matching `pred`, or insert the one built by
    /// `create`. Returns the resulting record and whether it was created.
    pub fn update_or_insert(
        &self,
        pred: impl Fn(&T) -> bool,
        update: impl FnOnce(&mut T),
        create: impl FnOnce() -> (Uuid, T),
    ) -> (T, bool) {
        let mut guard = self.data.write();
        if let Some(existing) = guard.values_mut().find(|v| pred(v)) {
            update(existing);
            return (existing.clone(), false);
        }
        let (id, value) = create();
        guard.insert(id, value.clone());
        (value, true)
    }

    /// Keep only the records matching `keep`; returns how many were dropped.
    pub fn retain(&self, keep: impl Fn(&T) -> bool) -> usize {
        let mut guard = self.data.write();
        let before = guard.len();
        guard.retain(|_, v| keep(v));
        before - guard.len()
    }

    pub fn remove(&self, id: &Uuid) -> Option<T> {
        self.data.write().remove(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.data.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- Sessions -----------------------------------------------------------------

/// A live login session, keyed in [`AppState::sessions`] by the SHA-256
/// digest of its bearer token.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub user_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// -- Configuration ------------------------------------------------------------

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got \"{value}\"")]
    InvalidNumber { var: &'static str, value: String },

    #[error("LOG_FORMAT must be \"json\" or \"pretty\", got \"{0}\"")]
    InvalidLogFormat(String),
}

/// Application configuration, read once at startup.
///
/// Custom `Debug` redacts the database URL, which usually embeds a password.
#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    /// Lifetime of an OTP challenge.
    pub otp_ttl_secs: i64,
    /// Lifetime of a login session.
    pub session_ttl_secs: i64,
    pub rate_limit: RateLimitConfig,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("otp_ttl_secs", &self.otp_ttl_secs)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("rate_limit", &self.rate_limit)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            otp_ttl_secs: 600,
            session_ttl_secs: 86_400,
            rate_limit: RateLimitConfig::default(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults for
    /// unset variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        fn number<N: std::str::FromStr + PartialOrd + Default>(
            lookup: &impl Fn(&str) -> Option<String>,
            var: &'static str,
            default: N,
        ) -> Result<N, ConfigError> {
            match lookup(var) {
                None => Ok(default),
                Some(value) => match value.trim().parse::<N>() {
                    Ok(n) if n > N::default() => Ok(n),
                    _ => Err(ConfigError::InvalidNumber { var, value }),
                },
            }
        }

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(ConfigError::InvalidLogFormat(other.to_string())),
        };

        Ok(Self {
            port: number(&lookup, "PORT", defaults.port)?,
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            otp_ttl_secs: number(&lookup, "OTP_TTL_SECS", defaults.otp_ttl_secs)?,
            session_ttl_secs: number(&lookup, "SESSION_TTL_SECS", defaults.session_ttl_secs)?,
            rate_limit: RateLimitConfig {
                max_requests: number(
                    &lookup,
                    "RATE_LIMIT_MAX",
                    defaults.rate_limit.max_requests,
                )?,
                window_secs: number(
                    &lookup,
                    "RATE_LIMIT_WINDOW_SECS",
                    defaults.rate_limit.window_secs,
                )?,
            },
            log_format,
        })
    }
}

// -- Application State --------------------------------------------------------

/// Shared application state accessible to all route handlers.
///
/// Clone-friendly via `Arc` internals in each `Store`.
#[derive(Debug, Clone)]
pub struct AppState {
    pub users: Store<UserRecord>,
    pub otp_requests: Store<OtpRequestRecord>,
    pub devices: Store<DeviceRecord>,
    pub repairs: Store<RepairAssignmentRecord>,
    pub tasks: Store<LogisticsTaskRecord>,
    pub listings: Store<ListingRecord>,
    pub orders: Store<OrderRecord>,
    pub regions: Store<RegionRecord>,
    pub impacts: Store<DeviceImpactRecord>,
    pub snapshots: Store<BottleneckSnapshotRecord>,

    /// Live sessions keyed by token digest.
    pub sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,

    /// Serializes "is this listing still free?" checks with order
    /// creation. Spans two stores, so a per-store lock is not enough.
    pub checkout_lock: Arc<Mutex<()>>,

    /// PostgreSQL pool for write-through persistence. `None` runs the
    /// service in memory only.
    pub db_pool: Option<PgPool>,

    /// Prometheus render handle, when a recorder was installed.
    pub metrics: Option<PrometheusHandle>,

    pub config: AppConfig,
}

impl AppState {
    /// In-memory state with default configuration.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default(), None)
    }

    pub fn with_config(config: AppConfig, db_pool: Option<PgPool>) -> Self {
        Self {
            users: Store::new(),
            otp_requests: Store::new(),
            devices: Store::new(),
            repairs: Store::new(),
            tasks: Store::new(),
            listings: Store::new(),
            orders: Store::new(),
            regions: Store::new(),
            impacts: Store::new(),
            snapshots: Store::new(),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            checkout_lock: Arc::new(Mutex::new(())),
            db_pool,
            metrics: None,
            config,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Write a record through to the database, if one is configured.
    ///
    /// The in-memory store has already been updated when this runs, so a
    /// failure is reported as an internal error naming the record.
    pub async fn persist(&self, record: Record<'_>) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        let (kind, id) = (record.kind(), record.id());
        db::write(pool, record).await.map_err(|e| {
            tracing::error!(kind, %id, error = %e, "failed to persist record");
            AppError::Internal(format!(
                "{kind} {id} updated in memory but database persist failed"
            ))
        })
    }

    /// Append an audit event. Failures are logged and swallowed: the
    /// mutation has already been committed.
    pub async fn audit(&self, event: AuditEvent) {
        let Some(pool) = &self.db_pool else {
            return;
        };
        if let Err(e) = db::audit::append_audit_event(pool, &event).await {
            tracing::error!(
                event_type = %event.event_type,
                resource_id = %event.resource_id,
                error = %e,
                "failed to append audit event"
            );
        }
    }

    /// Hydrate in-memory stores from the database.
    ///
    /// Called once on startup when a pool is available.
    pub async fn hydrate_from_db(&self) -> Result<(), sqlx::Error> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };

        let users = db::users::load_all(pool).await?;
        let devices = db::devices::load_all(pool).await?;
        let repairs = db::repairs::load_all(pool).await?;
        let tasks = db::logistics::load_all(pool).await?;
        let listings = db::marketplace::load_listings(pool).await?;
        let orders = db::marketplace::load_orders(pool).await?;
        let regions = db::analytics::load_regions(pool).await?;
        let impacts = db::analytics::load_impacts(pool).await?;
        let snapshots = db::analytics::load_snapshots(pool).await?;

        tracing::info!(
            users = users.len(),
            devices = devices.len(),
            repairs = repairs.len(),
            tasks = tasks.len(),
            listings = listings.len(),
            orders = orders.len(),
            regions = regions.len(),
            impacts = impacts.len(),
            snapshots = snapshots.len(),
            "Hydrated in-memory stores from database"
        );

        for r in users {
            self.users.insert(r.id, r);
        }
        for r in devices {
            self.devices.insert(r.id, r);
        }
        for r in repairs {
            self.repairs.insert(r.id, r);
        }
        for r in tasks {
            self.tasks.insert(r.id, r);
        }
        for r in listings {
            self.listings.insert(r.id, r);
        }
        for r in orders {
            self.orders.insert(r.id, r);
        }
        for r in regions {
            self.regions.insert(r.id, r);
        }
        for r in impacts {
            self.impacts.insert(r.id, r);
        }
        for r in snapshots {
            self.snapshots.insert(r.id, r);
        }
        Ok(())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
