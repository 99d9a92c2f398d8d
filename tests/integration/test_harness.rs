//! Integration test harness for petcare
//! Mock backend helpers shared by the HTTP adapter tests

use std::time::Duration;

use mockito::{Matcher, Mock, ServerGuard};
use serde_json::{json, Value};
use tokio::time::timeout;

use petcare_lib::{AuthChange, AuthSubscription, BackendConfig, SessionFile};

pub const ANON_KEY: &str = "anon-key";

/// Backend config pointing at a mock server
pub fn backend(server: &ServerGuard) -> BackendConfig {
    BackendConfig {
        url: server.url(),
        anon_key: ANON_KEY.to_string(),
        redirect_to: "petcare://auth/callback".to_string(),
        request_timeout_ms: 2_000,
    }
}

/// GoTrue token grant body
pub fn token_body(access_token: &str, user_id: &str, email: &str) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": format!("{}-refresh", access_token),
        "user": {
            "id": user_id,
            "aud": "authenticated",
            "email": email,
            "user_metadata": { "username": "Mochi" },
            "created_at": "2024-05-01T10:00:00Z"
        }
    })
}

/// PostgREST row for the profiles table
pub fn profile_row(user_id: &str, crystals: i64) -> Value {
    json!({
        "id": user_id,
        "username": "Mochi",
        "crystals": crystals,
        "ouros": 3,
        "is_premium": false
    })
}

pub fn profile_query(user_id: &str) -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("id".into(), format!("eq.{}", user_id)),
        Matcher::UrlEncoded("select".into(), "id,username,crystals,ouros,is_premium".into()),
    ])
}

pub async fn mock_password_grant(server: &mut ServerGuard, body: Value) -> Mock {
    server
        .mock("POST", "/auth/v1/token")
        .match_query(Matcher::UrlEncoded("grant_type".into(), "password".into()))
        .match_header("apikey", ANON_KEY)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

/// Next change on a subscription, failing the test after one second
pub async fn next_change(subscription: &mut AuthSubscription) -> AuthChange {
    timeout(Duration::from_secs(1), subscription.recv())
        .await
        .expect("no change delivered")
        .expect("change feed closed")
}

/// Session file in a fresh temp location
pub fn temp_session_file() -> SessionFile {
    SessionFile::new(std::env::temp_dir().join(format!("petcare-session-{}.json", uuid::Uuid::new_v4())))
}
