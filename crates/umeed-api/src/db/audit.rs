//! Audit event persistence: an append-only hash chain.
//!
//! Every mutation (device submission, status transition, approval, repair
//! update, task progress, order placement) appends an event whose hash
//! covers the previous event's hash. Editing or deleting a row breaks every
//! later link.

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

/// Hash that the first event in the chain links to.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// An audit event to be persisted.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub event_type: String,
    pub actor_id: Option<Uuid>,
    pub resource_type: String,
    pub resource_id: Uuid,
    pub action: String,
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        event_type: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: Uuid,
        action: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            actor_id: None,
            resource_type: resource_type.into(),
            resource_id,
            action: action.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn by(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// SHA-256 over the previous hash and every stored field of the event.
///
/// Each field is length-prefixed so content cannot shift between adjacent
/// fields. Metadata is hashed as JSON with object keys sorted, which
/// survives the JSONB round trip. `created_at` is hashed at microsecond
/// precision, the precision PostgreSQL stores.
pub fn chain_hash(previous_hash: &str, event: &AuditEvent, created_at: DateTime<Utc>) -> String {
    let mut metadata = Vec::new();
    write_canonical_json(&event.metadata, &mut metadata);

    let mut hasher = Sha256::new();
    for field in [
        previous_hash.as_bytes(),
        event.event_type.as_bytes(),
        event.actor_id.as_ref().map_or(&[][..], |a| &a.as_bytes()[..]),
        event.resource_type.as_bytes(),
        &event.resource_id.as_bytes()[..],
        event.action.as_bytes(),
        &metadata[..],
        &created_at.timestamp_micros().to_be_bytes()[..],
    ] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn write_canonical_json(value: &serde_json::Value, out: &mut Vec<u8>) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical_json(&serde_json::Value::String(key.clone()), out);
                out.push(b':');
                write_canonical_json(&map[key], out);
            }
            out.push(b'}');
        }
        serde_json::Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical_json(item, out);
            }
            out.push(b']');
        }
        scalar => out.extend_from_slice(scalar.to_string().as_bytes()),
    }
}

/// Append an event, linking it to the most recent one.
///
/// Runs in a transaction holding an advisory lock so concurrent appends
/// cannot link to the same predecessor.
pub async fn append_audit_event(pool: &PgPool, event: &AuditEvent) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock(7243001)")
        .execute(&mut *tx)
        .await?;

    let previous_hash: Option<String> =
        sqlx::query_scalar("SELECT event_hash FROM audit_events ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&mut *tx)
            .await?;
    let prev = previous_hash.as_deref().unwrap_or(GENESIS_HASH);

    let created_at = Utc::now().trunc_subsecs(6);
    let event_hash = chain_hash(prev, event, created_at);

    sqlx::query(
        "INSERT INTO audit_events (id, event_type, actor_id, resource_type, resource_id,
         action, metadata, previous_hash, event_hash, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(id)
    .bind(&event.event_type)
    .bind(event.actor_id)
    .bind(&event.resource_type)
    .bind(event.resource_id)
    .bind(&event.action)
    .bind(&event.metadata)
    .bind(prev)
    .bind(&event_hash)
    .bind(created_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(id)
}

/// Audit events for one resource, oldest first.
pub async fn events_for_resource(
    pool: &PgPool,
    resource_type: &str,
    resource_id: Uuid,
) -> Result<Vec<AuditEventRow>, sqlx::Error> {
    sqlx::query_as::<_, AuditEventRow>(
        "SELECT id, event_type, actor_id, resource_type, resource_id,
         action, metadata, previous_hash, event_hash, created_at
         FROM audit_events
         WHERE resource_type = $1 AND resource_id = $2
         ORDER BY seq ASC",
    )
    .bind(resource_type)
    .bind(resource_id)
    .fetch_all(pool)
    .await
}

/// Walk the first `limit` events checking links and recomputing hashes.
pub async fn verify_chain_integrity(
    pool: &PgPool,
    limit: i64,
) -> Result<ChainIntegrityResult, sqlx::Error> {
    let events = sqlx::query_as::<_, AuditEventRow>(
        "SELECT id, event_type, actor_id, resource_type, resource_id,
         action, metadata, previous_hash, event_hash, created_at
         FROM audit_events ORDER BY seq ASC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(check_chain(&events))
}

/// Link and hash check over an ordered slice of events.
pub fn check_chain(events: &[AuditEventRow]) -> ChainIntegrityResult {
    let mut broken_links = 0;
    let mut tampered = 0;
    let mut last_hash = GENESIS_HASH;

    for event in events {
        if event.previous_hash != last_hash {
            broken_links += 1;
        }
        let expected = chain_hash(&event.previous_hash, &event.event(), event.created_at);
        if expected != event.event_hash {
            tampered += 1;
        }
        last_hash = &event.event_hash;
    }

    ChainIntegrityResult {
        total_events: events.len(),
        broken_links,
        tampered,
        chain_valid: broken_links == 0 && tampered == 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ChainIntegrityResult {
    pub total_events: usize,
    /// Events whose `previous_hash` is not the prior event's hash.
    pub broken_links: usize,
    /// Events whose stored hash does not match their contents.
    pub tampered: usize,
    pub chain_valid: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct AuditEventRow {
    pub id: Uuid,
    pub event_type: String,
    pub actor_id: Option<Uuid>,
    pub resource_type: String,
    pub resource_id: Uuid,
    pub action: String,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub previous_hash: String,
    pub event_hash: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEventRow {
    /// The hashed fields of this row.
    pub fn event(&self) -> AuditEvent {
        AuditEvent {
            event_type: self.event_type.clone(),
            actor_id: self.actor_id,
            resource_type: self.resource_type.clone(),
            resource_id: self.resource_id,
            action: self.action.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(prev: &str, action: &str, resource_id: Uuid) -> AuditEventRow {
        let mut row = AuditEventRow {
            id: Uuid::new_v4(),
            event_type: "device.transition".into(),
            actor_id: Some(Uuid::new_v4()),
            resource_type: "device".into(),
            resource_id,
            action: action.into(),
            metadata: serde_json::json!({"from": "pending", "to": "approved"}),
            previous_hash: prev.into(),
            event_hash: String::new(),
            created_at: Utc::now().trunc_subsecs(6),
        };
        row.event_hash = chain_hash(prev, &row.event(), row.created_at);
        row
    }

    fn chain(len: usize) -> Vec<AuditEventRow> {
        let id = Uuid::new_v4();
        let mut out: Vec<AuditEventRow> = Vec::new();
        for i in 0..len {
            let prev = out.last().map_or(GENESIS_HASH.to_string(), |e| e.event_hash.clone());
            out.push(row(&prev, &format!("step-{i}"), id));
        }
        out
    }

    #[test]
    fn chain_hash_is_deterministic_and_field_sensitive() {
        let at = Utc::now();
        let e = AuditEvent::new("t", "device", Uuid::new_v4(), "approve");
        let a = chain_hash(GENESIS_HASH, &e, at);
        assert_eq!(a, chain_hash(GENESIS_HASH, &e.clone(), at));
        assert_eq!(a.len(), 64);

        let mut other = e.clone();
        other.action = "reject".into();
        assert_ne!(a, chain_hash(GENESIS_HASH, &other, at));
        assert_ne!(a, chain_hash(&a, &e, at));
        assert_ne!(a, chain_hash(GENESIS_HASH, &e, at + chrono::Duration::seconds(1)));
    }

    #[test]
    fn chain_hash_covers_actor_and_metadata() {
        let at = Utc::now();
        let e = AuditEvent::new("order.placed", "order", Uuid::new_v4(), "place")
            .with_metadata(serde_json::json!({"amount": "1500.00"}));
        let base = chain_hash(GENESIS_HASH, &e, at);

        assert_ne!(base, chain_hash(GENESIS_HASH, &e.clone().by(Uuid::new_v4()), at));
        let edited = e.clone().with_metadata(serde_json::json!({"amount": "15.00"}));
        assert_ne!(base, chain_hash(GENESIS_HASH, &edited, at));
    }

    #[test]
    fn chain_hash_separates_adjacent_fields() {
        let at = Utc::now();
        let id = Uuid::new_v4();
        let a = AuditEvent::new("device.", "transition", id, "approve");
        let b = AuditEvent::new("device.transition", "", id, "approve");
        assert_ne!(chain_hash(GENESIS_HASH, &a, at), chain_hash(GENESIS_HASH, &b, at));
    }

    #[test]
    fn metadata_key_order_does_not_matter() {
        let at = Utc::now();
        let id = Uuid::new_v4();
        let mut a = AuditEvent::new("t", "device", id, "x");
        let mut b = a.clone();
        let mut m1 = serde_json::Map::new();
        m1.insert("z".into(), 1.into());
        m1.insert("a".into(), serde_json::json!({"y": [1, "two"], "b": null}));
        let mut m2 = serde_json::Map::new();
        m2.insert("a".into(), serde_json::json!({"b": null, "y": [1, "two"]}));
        m2.insert("z".into(), 1.into());
        a.metadata = m1.into();
        b.metadata = m2.into();
        assert_eq!(chain_hash(GENESIS_HASH, &a, at), chain_hash(GENESIS_HASH, &b, at));
    }

    #[test]
    fn canonical_json_sorts_keys_and_escapes_strings() {
        let mut out = Vec::new();
        write_canonical_json(&serde_json::json!({"b": "q\"", "a": [true, 1.5]}), &mut out);
        assert_eq!(String::from_utf8(out).unwrap(), r#"{"a":[true,1.5],"b":"q\""}"#);
    }

    #[test]
    fn intact_chain_verifies() {
        let result = check_chain(&chain(5));
        assert_eq!(result.total_events, 5);
        assert!(result.chain_valid);
    }

    #[test]
    fn empty_chain_is_valid() {
        assert!(check_chain(&[]).chain_valid);
    }

    #[test]
    fn edited_event_is_detected() {
        let mut events = chain(4);
        events[2].action = "step-forged".into();
        let result = check_chain(&events);
        assert_eq!(result.tampered, 1);
        assert_eq!(result.broken_links, 0);
        assert!(!result.chain_valid);
    }

    #[test]
    fn edited_metadata_is_detected() {
        let mut events = chain(3);
        events[1].metadata = serde_json::json!({"from": "pending", "to": "rejected"});
        let result = check_chain(&events);
        assert_eq!(result.tampered, 1);
        assert!(!result.chain_valid);
    }

    #[test]
    fn reattributed_event_is_detected() {
        let mut events = chain(3);
        events[0].actor_id = None;
        assert_eq!(check_chain(&events).tampered, 1);
    }

    #[test]
    fn deleted_event_breaks_the_next_link() {
        let mut events = chain(4);
        events.remove(1);
        let result = check_chain(&events);
        assert_eq!(result.broken_links, 1);
        assert!(!result.chain_valid);
    }

    #[test]
    fn builder_sets_actor_and_metadata() {
        let actor = Uuid::new_v4();
        let e = AuditEvent::new("order.placed", "order", Uuid::new_v4(), "place")
            .by(actor)
            .with_metadata(serde_json::json!({"listing": "x"}));
        assert_eq!(e.actor_id, Some(actor));
        assert_eq!(e.metadata["listing"], "x");
    }
}
