//! Integration tests for the credential verification pipeline.
//!
//! Tests lockout progression, audit trail shape, concurrency of failure
//! counting, and the anti-enumeration paths, all against the in-memory store.

use chrono::{Duration, Utc};
use geobrains::audit::{AuditAction, verify_chain};
use geobrains::auth::{
    Account, AuditPolicy, AuthError, AuthManager, Credentials, LockoutPolicy, NewAccount,
    REASON_EMAIL_NOT_VERIFIED, REASON_INVALID_CREDENTIALS, REASON_INVALID_FORMAT,
};
use geobrains::db::{AccountRepository, MemoryStore};
use geobrains::identity::ClientContext;
use std::sync::Arc;

const PASSWORD: &str = "Correct-Horse-42!";

/// Helper to create a manager over a fresh store
fn setup() -> (AuthManager, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let auth = AuthManager::new(store.clone(), store.clone(), "test_pepper".to_string());
    (auth, store)
}

/// Helper to create an account with `PASSWORD`
fn seed_account(auth: &AuthManager, store: &MemoryStore, email: &str, verified: bool) -> Account {
    store.insert_account(NewAccount {
        email: email.to_string(),
        name: Some("Test Player".to_string()),
        password_hash: Some(auth.hash_password(PASSWORD).expect("hashing should work")),
        email_verified_at: verified.then(Utc::now),
    })
}

fn ctx() -> ClientContext {
    ClientContext::new("203.0.113.50", "Mozilla/5.0 (X11; Linux x86_64)")
}

fn wrong(email: &str) -> Credentials {
    Credentials::new(email, "not-the-password")
}

fn right(email: &str) -> Credentials {
    Credentials::new(email, PASSWORD)
}

#[tokio::test]
async fn test_successful_login_returns_account() {
    let (auth, store) = setup();
    let account = seed_account(&auth, &store, "player@example.com", true);

    let result = auth
        .authorize(&right("player@example.com"), &ctx())
        .await
        .expect("authorize should not error");

    let returned = result.expect("correct credentials should authorize");
    assert_eq!(returned.id, account.id);

    let events = store.audit_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, AuditAction::LoginSuccess);
    assert_eq!(events[0].account_id, Some(account.id));
    assert_eq!(events[0].ip, "203.0.113.50");
    assert_eq!(events[0].metadata_str("userAgent"), Some("Mozilla/5.0 (X11; Linux x86_64)"));
}

#[tokio::test]
async fn test_email_lookup_ignores_case_and_whitespace() {
    let (auth, store) = setup();
    seed_account(&auth, &store, "player@example.com", true);

    let result = auth
        .authorize(&right("  Player@Example.com "), &ctx())
        .await
        .unwrap();

    assert!(result.is_some());
}

#[tokio::test]
async fn test_wrong_password_counts_failure() {
    let (auth, store) = setup();
    let account = seed_account(&auth, &store, "player@example.com", true);

    let result = auth.authorize(&wrong("player@example.com"), &ctx()).await.unwrap();
    assert!(result.is_none());

    let stored = store.account(account.id).unwrap();
    assert_eq!(stored.failed_attempt_count, 1);
    assert!(stored.last_failed_at.is_some());
    assert_eq!(stored.locked_until, None);

    let events = store.audit_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, AuditAction::LoginFailed);
    assert_eq!(events[0].metadata_str("reason"), Some(REASON_INVALID_CREDENTIALS));
    assert_eq!(events[0].metadata["failedAttemptCount"], 1);
    assert!(events[0].metadata["lockedUntil"].is_null());
}

#[tokio::test]
async fn test_fifth_failure_locks_for_five_minutes() {
    let (auth, store) = setup();
    let account = seed_account(&auth, &store, "player@example.com", true);

    for _ in 0..4 {
        auth.authorize(&wrong("player@example.com"), &ctx()).await.unwrap();
    }
    assert_eq!(store.account(account.id).unwrap().locked_until, None);

    let before = Utc::now();
    auth.authorize(&wrong("player@example.com"), &ctx()).await.unwrap();

    let stored = store.account(account.id).unwrap();
    assert_eq!(stored.failed_attempt_count, 5);
    let locked_until = stored.locked_until.expect("fifth failure should lock");
    assert!(locked_until >= before + Duration::minutes(5));
    assert!(locked_until <= Utc::now() + Duration::minutes(5));

    let last = store.audit_events().pop().unwrap();
    assert_eq!(last.metadata["failedAttemptCount"], 5);
    assert!(last.metadata["lockedUntil"].is_string());
}

#[tokio::test]
async fn test_locked_account_rejects_correct_password() {
    let (auth, store) = setup();
    let account = seed_account(&auth, &store, "player@example.com", true);
    for _ in 0..5 {
        auth.authorize(&wrong("player@example.com"), &ctx()).await.unwrap();
    }
    let audit_before = store.audit_events().len();

    let result = auth.authorize(&right("player@example.com"), &ctx()).await;

    match result {
        Err(AuthError::AccountLocked {
            retry_after_secs,
            locked_until,
        }) => {
            assert!(retry_after_secs > 0 && retry_after_secs <= 300);
            assert_eq!(Some(locked_until), store.account(account.id).unwrap().locked_until);
        }
        other => panic!("Expected AccountLocked, got {:?}", other),
    }

    // counter untouched, exactly one ACCOUNT_LOCKED event
    assert_eq!(store.account(account.id).unwrap().failed_attempt_count, 5);
    let events = store.audit_events();
    assert_eq!(events.len(), audit_before + 1);
    let last = events.last().unwrap();
    assert_eq!(last.action, AuditAction::AccountLocked);
    assert!(last.metadata["retryAfterSeconds"].as_u64().unwrap() > 0);
    assert!(last.metadata["lockedUntil"].is_string());
}

#[tokio::test]
async fn test_lockout_escalates_after_expiry() {
    let (auth, store) = setup();
    let account = seed_account(&auth, &store, "player@example.com", true);
    for _ in 0..5 {
        auth.authorize(&wrong("player@example.com"), &ctx()).await.unwrap();
    }

    let expected = [
        Duration::minutes(15),
        Duration::minutes(30),
        Duration::hours(1),
        Duration::hours(24),
        Duration::hours(24),
    ];

    for (i, duration) in expected.iter().enumerate() {
        // let the current lock lapse
        store.update_account(account.id, |a| {
            a.locked_until = Some(Utc::now() - Duration::seconds(1));
        });

        let before = Utc::now();
        let result = auth.authorize(&wrong("player@example.com"), &ctx()).await.unwrap();
        assert!(result.is_none());

        let stored = store.account(account.id).unwrap();
        assert_eq!(stored.failed_attempt_count, 6 + i as u32);
        let locked_until = stored.locked_until.unwrap();
        assert!(locked_until >= before + *duration, "failure {} lock too short", 6 + i);
        assert!(locked_until <= Utc::now() + *duration, "failure {} lock too long", 6 + i);
    }
}

#[tokio::test]
async fn test_success_after_expired_lock_resets_fields() {
    let (auth, store) = setup();
    let account = seed_account(&auth, &store, "player@example.com", true);
    for _ in 0..6 {
        store.update_account(account.id, |a| a.locked_until = None);
        auth.authorize(&wrong("player@example.com"), &ctx()).await.unwrap();
    }
    store.update_account(account.id, |a| {
        a.locked_until = Some(Utc::now() - Duration::seconds(1));
    });

    let returned = auth
        .authorize(&right("player@example.com"), &ctx())
        .await
        .unwrap()
        .expect("expired lock should allow login");

    assert_eq!(returned.failed_attempt_count, 0);
    assert_eq!(returned.last_failed_at, None);
    assert_eq!(returned.locked_until, None);
    assert_eq!(store.account(account.id).unwrap(), returned);
}

#[tokio::test]
async fn test_unknown_email_looks_like_wrong_password() {
    let (auth, store) = setup();
    let account = seed_account(&auth, &store, "player@example.com", true);

    let result = auth.authorize(&wrong("nobody@example.com"), &ctx()).await.unwrap();
    assert!(result.is_none());

    let events = store.audit_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, AuditAction::LoginFailed);
    assert_eq!(events[0].account_id, None);
    assert_eq!(events[0].metadata_str("reason"), Some(REASON_INVALID_CREDENTIALS));

    // same metadata keys as a wrong-password event
    auth.authorize(&wrong("player@example.com"), &ctx()).await.unwrap();
    let events = store.audit_events();
    let mut unknown_keys: Vec<_> = events[0].metadata.as_object().unwrap().keys().collect();
    let mut wrong_keys: Vec<_> = events[1].metadata.as_object().unwrap().keys().collect();
    unknown_keys.sort();
    wrong_keys.sort();
    assert_eq!(unknown_keys, wrong_keys);

    // the real account only saw its own failure
    assert_eq!(store.account(account.id).unwrap().failed_attempt_count, 1);
}

#[tokio::test]
async fn test_federated_only_account_treated_as_unknown() {
    let (auth, store) = setup();
    let account = store.insert_account(NewAccount {
        email: "oauth@example.com".to_string(),
        email_verified_at: Some(Utc::now()),
        ..Default::default()
    });

    let result = auth.authorize(&wrong("oauth@example.com"), &ctx()).await.unwrap();
    assert!(result.is_none());

    let events = store.audit_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].account_id, None);
    assert_eq!(events[0].metadata_str("reason"), Some(REASON_INVALID_CREDENTIALS));
    assert_eq!(store.account(account.id).unwrap().failed_attempt_count, 0);
}

#[tokio::test]
async fn test_unverified_account_rejected_without_lockout_change() {
    let (auth, store) = setup();
    let account = seed_account(&auth, &store, "fresh@example.com", false);

    let result = auth.authorize(&right("fresh@example.com"), &ctx()).await.unwrap();
    assert!(result.is_none());

    let stored = store.account(account.id).unwrap();
    assert_eq!(stored, account);

    let events = store.audit_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, AuditAction::LoginFailed);
    assert_eq!(events[0].account_id, Some(account.id));
    assert_eq!(events[0].metadata_str("reason"), Some(REASON_EMAIL_NOT_VERIFIED));
}

#[tokio::test]
async fn test_malformed_credentials_rejected() {
    let (auth, store) = setup();

    for credentials in [
        Credentials::new("not-an-email", PASSWORD),
        Credentials::new("player@example.com", ""),
        Credentials::default(),
    ] {
        let result = auth.authorize(&credentials, &ctx()).await.unwrap();
        assert!(result.is_none());
    }

    let events = store.audit_events();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.account_id.is_none()
        && e.metadata_str("reason") == Some(REASON_INVALID_FORMAT)));
}

#[tokio::test]
async fn test_exactly_one_audit_event_per_attempt() {
    let (auth, store) = setup();
    seed_account(&auth, &store, "player@example.com", true);
    seed_account(&auth, &store, "fresh@example.com", false);

    let attempts = vec![
        right("player@example.com"),
        wrong("player@example.com"),
        wrong("nobody@example.com"),
        right("fresh@example.com"),
        Credentials::new("bad", ""),
        wrong("player@example.com"),
        wrong("player@example.com"),
        wrong("player@example.com"),
        wrong("player@example.com"),
        right("player@example.com"),
        right("player@example.com"),
    ];

    for (i, credentials) in attempts.iter().enumerate() {
        let _ = auth.authorize(credentials, &ctx()).await;
        assert_eq!(store.audit_events().len(), i + 1, "attempt {} audit count", i + 1);
    }

    let actions: Vec<_> = store.audit_events().iter().map(|e| e.action).collect();
    assert_eq!(
        &actions[8..],
        &[
            AuditAction::LoginFailed,
            AuditAction::AccountLocked,
            AuditAction::AccountLocked
        ]
    );
    assert_eq!(verify_chain(&store.audit_events()), Ok(()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_counted_exactly() {
    let (auth, store) = setup();
    let auth = auth.with_lockout_policy(LockoutPolicy::with_threshold(100).unwrap());
    let account = seed_account(&auth, &store, "player@example.com", true);

    const ATTEMPTS: u32 = 12;
    let handles: Vec<_> = (0..ATTEMPTS)
        .map(|_| {
            let auth = auth.clone();
            tokio::spawn(async move {
                auth.authorize(&wrong("player@example.com"), &ctx()).await
            })
        })
        .collect();

    for handle in handles {
        let result = handle.await.expect("task should not panic");
        assert!(matches!(result, Ok(None)));
    }

    assert_eq!(store.account(account.id).unwrap().failed_attempt_count, ATTEMPTS);

    // every audited count is distinct: no two attempts saw the same value
    let mut counts: Vec<u64> = store
        .audit_events()
        .iter()
        .filter_map(|e| e.metadata["failedAttemptCount"].as_u64())
        .collect();
    counts.sort_unstable();
    assert_eq!(counts, (1..=u64::from(ATTEMPTS)).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_never_shorten_lock() {
    let (auth, store) = setup();
    let auth = auth.with_lockout_policy(
        LockoutPolicy::new(2, vec![Duration::minutes(1), Duration::minutes(10), Duration::hours(1)])
            .unwrap(),
    );
    let account = seed_account(&auth, &store, "player@example.com", true);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let auth = auth.clone();
            tokio::spawn(async move {
                auth.authorize(&wrong("player@example.com"), &ctx()).await
            })
        })
        .collect();
    for handle in handles {
        let _ = handle.await.expect("task should not panic");
    }

    let stored = store.account(account.id).unwrap();
    let locked_until = stored.locked_until.expect("account should be locked");
    // the lock matches the highest count reached, whatever order writes landed in
    let expected = match stored.failed_attempt_count {
        0..=2 => Duration::minutes(1),
        3 => Duration::minutes(10),
        _ => Duration::hours(1),
    };
    assert!(locked_until + Duration::seconds(5) >= Utc::now() + expected);
}

#[tokio::test]
async fn test_strict_audit_policy_fails_closed() {
    let (auth, store) = setup();
    seed_account(&auth, &store, "player@example.com", true);
    store.set_fail_audit_writes(true);

    let result = auth.authorize(&right("player@example.com"), &ctx()).await;
    assert!(matches!(result, Err(AuthError::Storage(_))));
}

#[tokio::test]
async fn test_best_effort_audit_policy_continues() {
    let (auth, store) = setup();
    let auth = auth.with_audit_policy(AuditPolicy::BestEffort);
    let account = seed_account(&auth, &store, "player@example.com", true);
    store.set_fail_audit_writes(true);

    let result = auth.authorize(&right("player@example.com"), &ctx()).await.unwrap();
    assert_eq!(result.map(|a| a.id), Some(account.id));

    let result = auth.authorize(&wrong("player@example.com"), &ctx()).await.unwrap();
    assert!(result.is_none());
    assert_eq!(store.account(account.id).unwrap().failed_attempt_count, 1);
    assert!(store.audit_events().is_empty());
}

#[tokio::test]
async fn test_audit_trail_detects_tampering() {
    let (auth, store) = setup();
    seed_account(&auth, &store, "player@example.com", true);
    for credentials in [wrong("player@example.com"), right("player@example.com")] {
        auth.authorize(&credentials, &ctx()).await.unwrap();
    }

    assert_eq!(auth.audit_log().verify_integrity().await.unwrap(), Ok(2));

    let mut events = store.audit_events();
    events[0].metadata["reason"] = serde_json::json!("nothing to see here");
    assert!(verify_chain(&events).is_err());
}

#[tokio::test]
async fn test_federated_login_resets_and_audits() {
    let (auth, store) = setup();
    let account = seed_account(&auth, &store, "player@example.com", true);
    for _ in 0..5 {
        auth.authorize(&wrong("player@example.com"), &ctx()).await.unwrap();
    }

    let returned = auth
        .record_federated_login(account.id, "google", &ctx())
        .await
        .unwrap();

    assert_eq!(returned.failed_attempt_count, 0);
    assert_eq!(returned.locked_until, None);
    let last = store.audit_events().pop().unwrap();
    assert_eq!(last.action, AuditAction::LoginSuccess);
    assert_eq!(last.metadata_str("provider"), Some("google"));

    let missing = auth.record_federated_login(999, "google", &ctx()).await;
    assert!(matches!(missing, Err(AuthError::Storage(_))));
}

#[tokio::test]
async fn test_authorize_for_request_uses_stored_context() {
    let (auth, store) = setup();
    let contexts = Arc::new(geobrains::RequestContextStore::default());
    contexts.set("req-42", ClientContext::new("198.51.100.77", "stored-agent"));
    let auth = auth.with_context_store(contexts);
    seed_account(&auth, &store, "player@example.com", true);

    auth.authorize_for_request(&right("player@example.com"), None, Some("req-42"))
        .await
        .unwrap();
    auth.authorize_for_request(&right("player@example.com"), None, None)
        .await
        .unwrap();

    let events = store.audit_events();
    assert_eq!(events[0].ip, "198.51.100.77");
    assert_eq!(events[0].user_agent, "stored-agent");
    assert_eq!(events[1].ip, "unknown");
}

#[tokio::test]
async fn test_storage_lookup_by_email_after_login() {
    let (auth, store) = setup();
    seed_account(&auth, &store, "player@example.com", true);
    auth.authorize(&right("player@example.com"), &ctx()).await.unwrap();

    let account = store
        .find_account_by_email("player@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.failed_attempt_count, 0);
}
