//! Repository trait definitions for testability and dependency injection.
//!
//! The authentication core only talks to storage through these traits.
//! [`PgStore`] implements them on PostgreSQL; [`MemoryStore`] keeps everything
//! in process for tests and local runs.
//!
//! [`MemoryStore`]: super::MemoryStore

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::errors::{StorageError, StorageResult};
use super::timeouts::{DEFAULT_TRANSACTION_TIMEOUT, with_default_timeout, with_timeout};
use crate::audit::{AuditEvent, GENESIS_HASH, NewAuditEvent};
use crate::auth::{Account, AccountId, NewAccount, VerificationToken};

/// Advisory lock key serializing appends to the audit chain
const AUDIT_CHAIN_LOCK: i64 = 0x6765_6f62_6175_6474;

/// Account lookups and the atomic security-field updates
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Find account by email (case-insensitive)
    async fn find_account_by_email(&self, email: &str) -> StorageResult<Option<Account>>;

    /// Find account by ID
    async fn find_account_by_id(&self, id: AccountId) -> StorageResult<Option<Account>>;

    /// Atomically increment the failed attempt counter and stamp
    /// `last_failed_at`, returning the new count.
    ///
    /// Concurrent callers each observe a distinct count.
    async fn increment_failed_attempts(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
    ) -> StorageResult<u32>;

    /// Lock the account until `until`.
    ///
    /// An existing later lock is kept, so a slow writer can never shorten a
    /// lock set by a concurrent failure. Returns the effective expiry.
    async fn set_lockout(
        &self,
        id: AccountId,
        until: DateTime<Utc>,
    ) -> StorageResult<DateTime<Utc>>;

    /// Clear failed attempt count, `last_failed_at` and `locked_until`
    async fn reset_security_fields(&self, id: AccountId) -> StorageResult<()>;

    /// Set `email_verified_at`
    async fn mark_email_verified(&self, id: AccountId, at: DateTime<Utc>) -> StorageResult<()>;
}

/// Append-only, hash-chained audit storage
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Seal the event onto the end of the chain and persist it
    async fn append_audit_event(&self, event: NewAuditEvent) -> StorageResult<AuditEvent>;

    /// The most recent `limit` events, oldest first
    async fn list_audit_events(
        &self,
        account_id: Option<AccountId>,
        limit: usize,
    ) -> StorageResult<Vec<AuditEvent>>;

    /// Up to `limit` events with an id above `after_id`, oldest first
    async fn list_audit_events_after(
        &self,
        after_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<AuditEvent>>;
}

/// Email verification code storage
#[async_trait]
pub trait VerificationTokenRepository: Send + Sync {
    /// The current token for an email, expired or not
    async fn find_live_verification_token(
        &self,
        email: &str,
    ) -> StorageResult<Option<VerificationToken>>;

    /// Replace any token for `email` with a new one
    async fn create_verification_token(
        &self,
        email: &str,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<VerificationToken>;

    /// Consume a token
    async fn delete_verification_token(&self, token: &VerificationToken) -> StorageResult<()>;
}

/// PostgreSQL implementation of every repository trait
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create an account. Used by seeding tools; registration is handled
    /// elsewhere.
    pub async fn insert_account(&self, account: NewAccount) -> StorageResult<Account> {
        let row = with_default_timeout(
            sqlx::query(
                "INSERT INTO accounts (email, name, password_hash, email_verified_at)
                 VALUES ($1, $2, $3, $4)
                 RETURNING id, email, name, password_hash, email_verified_at,
                           failed_attempt_count, last_failed_at, locked_until, created_at",
            )
            .bind(&account.email)
            .bind(&account.name)
            .bind(&account.password_hash)
            .bind(account.email_verified_at)
            .fetch_one(&self.pool),
        )
        .await?;

        account_from_row(&row)
    }
}

const ACCOUNT_COLUMNS: &str = "id, email, name, password_hash, email_verified_at,
     failed_attempt_count, last_failed_at, locked_until, created_at";

fn account_from_row(row: &PgRow) -> StorageResult<Account> {
    let count: i32 = row.try_get("failed_attempt_count")?;
    Ok(Account {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        password_hash: row.try_get("password_hash")?,
        email_verified_at: row.try_get("email_verified_at")?,
        failed_attempt_count: u32::try_from(count)
            .map_err(|_| StorageError::Corrupt(format!("negative failed_attempt_count {}", count)))?,
        last_failed_at: row.try_get("last_failed_at")?,
        locked_until: row.try_get("locked_until")?,
        created_at: row.try_get("created_at")?,
    })
}

fn audit_event_from_row(row: &PgRow) -> StorageResult<AuditEvent> {
    let action: String = row.try_get("action")?;
    Ok(AuditEvent {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        action: action.parse().map_err(StorageError::Corrupt)?,
        ip: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        prev_hash: row.try_get("prev_hash")?,
        hash: row.try_get("hash")?,
    })
}

fn token_from_row(row: &PgRow) -> StorageResult<VerificationToken> {
    Ok(VerificationToken {
        email: row.try_get("email")?,
        code: row.try_get("code")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait]
impl AccountRepository for PgStore {
    async fn find_account_by_email(&self, email: &str) -> StorageResult<Option<Account>> {
        let query = format!(
            "SELECT {} FROM accounts WHERE lower(email) = lower($1)",
            ACCOUNT_COLUMNS
        );
        let row = with_default_timeout(
            sqlx::query(&query).bind(email).fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_account_by_id(&self, id: AccountId) -> StorageResult<Option<Account>> {
        let query = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        let row =
            with_default_timeout(sqlx::query(&query).bind(id).fetch_optional(&self.pool)).await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn increment_failed_attempts(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
    ) -> StorageResult<u32> {
        let count: Option<i32> = with_default_timeout(
            sqlx::query_scalar(
                "UPDATE accounts
                 SET failed_attempt_count = failed_attempt_count + 1, last_failed_at = $2
                 WHERE id = $1
                 RETURNING failed_attempt_count",
            )
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool),
        )
        .await?;

        let count = count.ok_or(StorageError::AccountNotFound(id))?;
        u32::try_from(count)
            .map_err(|_| StorageError::Corrupt(format!("negative failed_attempt_count {}", count)))
    }

    async fn set_lockout(
        &self,
        id: AccountId,
        until: DateTime<Utc>,
    ) -> StorageResult<DateTime<Utc>> {
        let effective: Option<DateTime<Utc>> = with_default_timeout(
            sqlx::query_scalar(
                "UPDATE accounts
                 SET locked_until = GREATEST(COALESCE(locked_until, $2), $2)
                 WHERE id = $1
                 RETURNING locked_until",
            )
            .bind(id)
            .bind(until)
            .fetch_optional(&self.pool),
        )
        .await?;

        effective.ok_or(StorageError::AccountNotFound(id))
    }

    async fn reset_security_fields(&self, id: AccountId) -> StorageResult<()> {
        let result = with_default_timeout(
            sqlx::query(
                "UPDATE accounts
                 SET failed_attempt_count = 0, last_failed_at = NULL, locked_until = NULL
                 WHERE id = $1",
            )
            .bind(id)
            .execute(&self.pool),
        )
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::AccountNotFound(id));
        }
        Ok(())
    }

    async fn mark_email_verified(&self, id: AccountId, at: DateTime<Utc>) -> StorageResult<()> {
        let result = with_default_timeout(
            sqlx::query("UPDATE accounts SET email_verified_at = $2 WHERE id = $1")
                .bind(id)
                .bind(at)
                .execute(&self.pool),
        )
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::AccountNotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditRepository for PgStore {
    async fn append_audit_event(&self, event: NewAuditEvent) -> StorageResult<AuditEvent> {
        let pool = &self.pool;
        let event_ref = &event;

        // The advisory lock makes "read last hash, insert" atomic across
        // every writer, keeping the chain linear.
        let (id, prev_hash) = with_timeout(DEFAULT_TRANSACTION_TIMEOUT, async move {
            let mut tx = pool.begin().await?;

            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(AUDIT_CHAIN_LOCK)
                .execute(&mut *tx)
                .await?;

            let prev_hash: String =
                sqlx::query_scalar("SELECT hash FROM audit_events ORDER BY id DESC LIMIT 1")
                    .fetch_optional(&mut *tx)
                    .await?
                    .unwrap_or_else(|| GENESIS_HASH.to_string());

            let id: i64 = sqlx::query_scalar(
                "INSERT INTO audit_events
                     (account_id, action, ip_address, user_agent, metadata, created_at,
                      prev_hash, hash)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 RETURNING id",
            )
            .bind(event_ref.account_id)
            .bind(event_ref.action.as_str())
            .bind(&event_ref.ip)
            .bind(&event_ref.user_agent)
            .bind(&event_ref.metadata)
            .bind(event_ref.created_at)
            .bind(&prev_hash)
            .bind(event_ref.chain_hash(&prev_hash))
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok::<_, sqlx::Error>((id, prev_hash))
        })
        .await?;

        Ok(event.seal(id, prev_hash))
    }

    async fn list_audit_events(
        &self,
        account_id: Option<AccountId>,
        limit: usize,
    ) -> StorageResult<Vec<AuditEvent>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = with_default_timeout(
            sqlx::query(
                "SELECT * FROM (
                     SELECT id, account_id, action, ip_address, user_agent, metadata,
                            created_at, prev_hash, hash
                     FROM audit_events
                     WHERE $1::BIGINT IS NULL OR account_id = $1
                     ORDER BY id DESC
                     LIMIT $2
                 ) recent
                 ORDER BY id ASC",
            )
            .bind(account_id)
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await?;

        rows.iter().map(audit_event_from_row).collect()
    }

    async fn list_audit_events_after(
        &self,
        after_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<AuditEvent>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = with_default_timeout(
            sqlx::query(
                "SELECT id, account_id, action, ip_address, user_agent, metadata,
                        created_at, prev_hash, hash
                 FROM audit_events
                 WHERE id > $1
                 ORDER BY id ASC
                 LIMIT $2",
            )
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await?;

        rows.iter().map(audit_event_from_row).collect()
    }
}

#[async_trait]
impl VerificationTokenRepository for PgStore {
    async fn find_live_verification_token(
        &self,
        email: &str,
    ) -> StorageResult<Option<VerificationToken>> {
        let row = with_default_timeout(
            sqlx::query(
                "SELECT email, code, expires_at FROM verification_tokens
                 WHERE lower(email) = lower($1)
                 ORDER BY expires_at DESC
                 LIMIT 1",
            )
            .bind(email)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(token_from_row).transpose()
    }

    async fn create_verification_token(
        &self,
        email: &str,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<VerificationToken> {
        let pool = &self.pool;
        let row = with_timeout(DEFAULT_TRANSACTION_TIMEOUT, async move {
            let mut tx = pool.begin().await?;

            sqlx::query("DELETE FROM verification_tokens WHERE lower(email) = lower($1)")
                .bind(email)
                .execute(&mut *tx)
                .await?;

            let row = sqlx::query(
                "INSERT INTO verification_tokens (email, code, expires_at)
                 VALUES ($1, $2, $3)
                 RETURNING email, code, expires_at",
            )
            .bind(email)
            .bind(code)
            .bind(expires_at)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok::<_, sqlx::Error>(row)
        })
        .await?;

        token_from_row(&row)
    }

    async fn delete_verification_token(&self, token: &VerificationToken) -> StorageResult<()> {
        with_default_timeout(
            sqlx::query("DELETE FROM verification_tokens WHERE lower(email) = lower($1) AND code = $2")
                .bind(&token.email)
                .bind(&token.code)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}
