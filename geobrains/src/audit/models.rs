//! Audit event models and hash chaining.

use crate::auth::AccountId;
use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Hash the first event in the log chains from
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Security decisions recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    LoginSuccess,
    LoginFailed,
    AccountLocked,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::LoginSuccess => "LOGIN_SUCCESS",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::AccountLocked => "ACCOUNT_LOCKED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOGIN_SUCCESS" => Ok(AuditAction::LoginSuccess),
            "LOGIN_FAILED" => Ok(AuditAction::LoginFailed),
            "ACCOUNT_LOCKED" => Ok(AuditAction::AccountLocked),
            other => Err(format!("Unknown audit action: {}", other)),
        }
    }
}

/// Audit event before it is sealed into the chain
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEvent {
    pub account_id: Option<AccountId>,
    pub action: AuditAction,
    pub ip: String,
    pub user_agent: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl NewAuditEvent {
    /// Hash of this event when appended after `prev_hash`
    pub fn chain_hash(&self, prev_hash: &str) -> String {
        chain_hash(
            prev_hash,
            self.account_id,
            self.action,
            &self.ip,
            &self.user_agent,
            &self.metadata,
            self.created_at,
        )
    }

    /// Seal into a stored event with the given id
    pub fn seal(self, id: i64, prev_hash: String) -> AuditEvent {
        let hash = self.chain_hash(&prev_hash);
        AuditEvent {
            id,
            account_id: self.account_id,
            action: self.action,
            ip: self.ip,
            user_agent: self.user_agent,
            metadata: self.metadata,
            created_at: self.created_at,
            prev_hash,
            hash,
        }
    }
}

/// Stored, immutable audit event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: i64,
    pub account_id: Option<AccountId>,
    pub action: AuditAction,
    pub ip: String,
    pub user_agent: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

impl AuditEvent {
    /// Recompute this event's hash from its content
    pub fn compute_hash(&self) -> String {
        chain_hash(
            &self.prev_hash,
            self.account_id,
            self.action,
            &self.ip,
            &self.user_agent,
            &self.metadata,
            self.created_at,
        )
    }

    /// Metadata string field, if present
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Where a hash chain stops verifying
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// Event content does not match its stored hash
    #[error("Audit event {id} has been modified")]
    HashMismatch { id: i64 },

    /// Event does not chain from its predecessor
    #[error("Audit event {id} does not follow the previous event")]
    BrokenLink { id: i64 },

    /// The first event does not chain from the genesis hash
    #[error("Audit event {id} does not chain from genesis")]
    BadGenesis { id: i64 },
}

/// Verify a complete log, oldest first, starting from [`GENESIS_HASH`].
pub fn verify_chain(events: &[AuditEvent]) -> Result<(), ChainError> {
    if let Some(first) = events.first()
        && first.prev_hash != GENESIS_HASH
    {
        return Err(ChainError::BadGenesis { id: first.id });
    }
    verify_segment(events)
}

/// Verify a contiguous slice of the log, oldest first.
///
/// The first event is trusted to link correctly; every hash is recomputed
/// and every following event must chain from its predecessor.
pub fn verify_segment(events: &[AuditEvent]) -> Result<(), ChainError> {
    let mut expected_prev: Option<&str> = None;

    for event in events {
        if let Some(prev) = expected_prev
            && event.prev_hash != prev
        {
            return Err(ChainError::BrokenLink { id: event.id });
        }
        if event.compute_hash() != event.hash {
            return Err(ChainError::HashMismatch { id: event.id });
        }
        expected_prev = Some(&event.hash);
    }

    Ok(())
}

/// Current time at the precision the audit table stores.
///
/// Hashes cover the timestamp, so it must survive a database round trip
/// unchanged.
pub fn audit_timestamp(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}

fn chain_hash(
    prev_hash: &str,
    account_id: Option<AccountId>,
    action: AuditAction,
    ip: &str,
    user_agent: &str,
    metadata: &Value,
    created_at: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    for field in [
        account_id.map(|id| id.to_string()).unwrap_or_default(),
        action.as_str().to_string(),
        ip.to_string(),
        user_agent.to_string(),
        canonical_json(metadata),
        created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
    ] {
        hasher.update(b"\x1f");
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// JSON rendering with object keys sorted at every depth
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        Value::String(key.clone()),
                        canonical_json(&map[key.as_str()])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}
