//! Audit log service.

use super::models::{
    AuditAction, AuditEvent, ChainError, GENESIS_HASH, NewAuditEvent, audit_timestamp,
    verify_segment,
};
use crate::auth::AccountId;
use crate::db::{AuditRepository, StorageResult};
use crate::identity::ClientContext;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Events fetched per query while verifying the chain
pub const VERIFY_PAGE_SIZE: usize = 1_000;

/// Records security decisions to the append-only audit store
#[derive(Clone)]
pub struct AuditLog {
    repo: Arc<dyn AuditRepository>,
}

impl AuditLog {
    pub fn new(repo: Arc<dyn AuditRepository>) -> Self {
        Self { repo }
    }

    /// Append an event.
    ///
    /// The client's `ip` and `userAgent` are merged into `metadata` (overriding
    /// keys of the same name) and also stored as separate columns.
    ///
    /// # Arguments
    ///
    /// * `account_id` - Account the decision concerns, if one was identified
    /// * `action` - What happened
    /// * `metadata` - JSON object with details; non-objects are wrapped as `{"value": ...}`
    /// * `ctx` - Client identity of the request
    ///
    /// # Errors
    ///
    /// Propagates any storage failure.
    pub async fn record(
        &self,
        account_id: Option<AccountId>,
        action: AuditAction,
        metadata: Value,
        ctx: &ClientContext,
    ) -> StorageResult<AuditEvent> {
        let event = NewAuditEvent {
            account_id,
            action,
            ip: ctx.ip.clone(),
            user_agent: ctx.user_agent.clone(),
            metadata: merge_client(metadata, ctx),
            created_at: audit_timestamp(Utc::now()),
        };

        self.repo.append_audit_event(event).await
    }

    /// Append an event, logging instead of failing when the store errors.
    pub async fn record_best_effort(
        &self,
        account_id: Option<AccountId>,
        action: AuditAction,
        metadata: Value,
        ctx: &ClientContext,
    ) -> Option<AuditEvent> {
        match self.record(account_id, action, metadata, ctx).await {
            Ok(event) => Some(event),
            Err(e) => {
                log::error!(
                    "Failed to write {} audit event for account {:?}: {}",
                    action,
                    account_id,
                    e
                );
                None
            }
        }
    }

    /// Most recent events, oldest first
    pub async fn recent(
        &self,
        account_id: Option<AccountId>,
        limit: usize,
    ) -> StorageResult<Vec<AuditEvent>> {
        self.repo.list_audit_events(account_id, limit).await
    }

    /// Verify the hash chain over the whole log.
    ///
    /// Returns the number of events checked, or where the chain breaks.
    pub async fn verify_integrity(&self) -> StorageResult<Result<usize, ChainError>> {
        self.verify_integrity_paged(VERIFY_PAGE_SIZE).await
    }

    /// [`verify_integrity`](Self::verify_integrity) reading `page_size`
    /// events at a time. Only the last hash is carried between pages.
    pub async fn verify_integrity_paged(
        &self,
        page_size: usize,
    ) -> StorageResult<Result<usize, ChainError>> {
        let page_size = page_size.max(1);
        let mut last_id = 0;
        let mut last_hash = GENESIS_HASH.to_string();
        let mut checked = 0;

        loop {
            let page = self.repo.list_audit_events_after(last_id, page_size).await?;
            let Some(first) = page.first() else {
                break;
            };

            if first.prev_hash != last_hash {
                let err = if checked == 0 {
                    ChainError::BadGenesis { id: first.id }
                } else {
                    ChainError::BrokenLink { id: first.id }
                };
                return Ok(Err(err));
            }
            if let Err(err) = verify_segment(&page) {
                return Ok(Err(err));
            }

            checked += page.len();
            if let Some(last) = page.last() {
                last_id = last.id;
                last_hash = last.hash.clone();
            }
            if page.len() < page_size {
                break;
            }
        }

        Ok(Ok(checked))
    }
}

fn merge_client(metadata: Value, ctx: &ClientContext) -> Value {
    let mut map = match metadata {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    map.insert("ip".to_string(), Value::String(ctx.ip.clone()));
    map.insert("userAgent".to_string(), Value::String(ctx.user_agent.clone()));
    Value::Object(map)
}
