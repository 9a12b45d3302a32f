//! In-process implementation of the repository traits.
//!
//! Backs the test suites and `--memory-store` server runs. All state sits
//! behind one mutex, so every trait method is atomic with respect to the
//! others, matching what the PostgreSQL statements guarantee.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::errors::{StorageError, StorageResult};
use super::repository::{AccountRepository, AuditRepository, VerificationTokenRepository};
use crate::audit::{AuditEvent, GENESIS_HASH, NewAuditEvent};
use crate::auth::{Account, AccountId, NewAccount, VerificationToken};

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<AccountId, Account>,
    next_account_id: AccountId,
    audit_events: Vec<AuditEvent>,
    tokens: HashMap<String, VerificationToken>,
}

/// Thread-safe in-memory store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_audit_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account and return it
    pub fn insert_account(&self, account: NewAccount) -> Account {
        let mut state = self.lock();
        state.next_account_id += 1;
        let account = Account {
            id: state.next_account_id,
            email: account.email,
            name: account.name,
            password_hash: account.password_hash,
            email_verified_at: account.email_verified_at,
            failed_attempt_count: 0,
            last_failed_at: None,
            locked_until: None,
            created_at: Utc::now(),
        };
        state.accounts.insert(account.id, account.clone());
        account
    }

    /// Snapshot of an account
    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.lock().accounts.get(&id).cloned()
    }

    /// Apply an arbitrary change to a stored account, for test setup
    pub fn update_account<F>(&self, id: AccountId, change: F) -> Option<Account>
    where
        F: FnOnce(&mut Account),
    {
        let mut state = self.lock();
        let account = state.accounts.get_mut(&id)?;
        change(account);
        Some(account.clone())
    }

    /// Every audit event, oldest first
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.lock().audit_events.clone()
    }

    /// Make subsequent audit appends fail with `StorageError::Unavailable`
    pub fn set_fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn token_key(email: &str) -> String {
    email.to_ascii_lowercase()
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn find_account_by_email(&self, email: &str) -> StorageResult<Option<Account>> {
        Ok(self
            .lock()
            .accounts
            .values()
            .find(|account| account.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_account_by_id(&self, id: AccountId) -> StorageResult<Option<Account>> {
        Ok(self.account(id))
    }

    async fn increment_failed_attempts(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
    ) -> StorageResult<u32> {
        let mut state = self.lock();
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or(StorageError::AccountNotFound(id))?;
        account.failed_attempt_count += 1;
        account.last_failed_at = Some(now);
        Ok(account.failed_attempt_count)
    }

    async fn set_lockout(
        &self,
        id: AccountId,
        until: DateTime<Utc>,
    ) -> StorageResult<DateTime<Utc>> {
        let mut state = self.lock();
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or(StorageError::AccountNotFound(id))?;
        let effective = account.locked_until.map_or(until, |current| current.max(until));
        account.locked_until = Some(effective);
        Ok(effective)
    }

    async fn reset_security_fields(&self, id: AccountId) -> StorageResult<()> {
        let mut state = self.lock();
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or(StorageError::AccountNotFound(id))?;
        account.failed_attempt_count = 0;
        account.last_failed_at = None;
        account.locked_until = None;
        Ok(())
    }

    async fn mark_email_verified(&self, id: AccountId, at: DateTime<Utc>) -> StorageResult<()> {
        let mut state = self.lock();
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or(StorageError::AccountNotFound(id))?;
        account.email_verified_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn append_audit_event(&self, event: NewAuditEvent) -> StorageResult<AuditEvent> {
        if self.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "audit writes disabled".to_string(),
            ));
        }

        let mut state = self.lock();
        let prev_hash = state
            .audit_events
            .last()
            .map(|last| last.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let id = state.audit_events.len() as i64 + 1;
        let event = event.seal(id, prev_hash);
        state.audit_events.push(event.clone());
        Ok(event)
    }

    async fn list_audit_events(
        &self,
        account_id: Option<AccountId>,
        limit: usize,
    ) -> StorageResult<Vec<AuditEvent>> {
        let state = self.lock();
        let mut events: Vec<AuditEvent> = state
            .audit_events
            .iter()
            .rev()
            .filter(|event| account_id.is_none() || event.account_id == account_id)
            .take(limit)
            .cloned()
            .collect();
        events.reverse();
        Ok(events)
    }

    async fn list_audit_events_after(
        &self,
        after_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<AuditEvent>> {
        Ok(self
            .lock()
            .audit_events
            .iter()
            .filter(|event| event.id > after_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl VerificationTokenRepository for MemoryStore {
    async fn find_live_verification_token(
        &self,
        email: &str,
    ) -> StorageResult<Option<VerificationToken>> {
        Ok(self.lock().tokens.get(&token_key(email)).cloned())
    }

    async fn create_verification_token(
        &self,
        email: &str,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<VerificationToken> {
        let token = VerificationToken {
            email: email.to_string(),
            code: code.to_string(),
            expires_at,
        };
        self.lock().tokens.insert(token_key(email), token.clone());
        Ok(token)
    }

    async fn delete_verification_token(&self, token: &VerificationToken) -> StorageResult<()> {
        let mut state = self.lock();
        let key = token_key(&token.email);
        if state
            .tokens
            .get(&key)
            .is_some_and(|stored| stored.code == token.code)
        {
            state.tokens.remove(&key);
        }
        Ok(())
    }
}
