//! Admin-only endpoints.

use axum::{Extension, Json};
use geobrains::auth::Account;
use serde_json::{Value, json};

/// Confirms the caller passed the admin guard.
pub async fn check(Extension(account): Extension<Account>) -> Json<Value> {
    Json(json!({
        "admin": true,
        "account_id": account.id,
        "email": account.email,
    }))
}
