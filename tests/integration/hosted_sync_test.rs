//! IdentitySync running over the HTTP provider and store

use std::time::Duration;

use mockito::{Matcher, Server};
use serde_json::json;
use tokio::time::timeout;

use petcare_lib::{
    http_backends, Config, ErrorCode, IdentitySync, Phase, Presence, ProfileConfig, SyncConfig,
    SyncState,
};

use crate::integration::test_harness::{backend, mock_password_grant, profile_query, profile_row, token_body};

fn config(server: &mockito::ServerGuard) -> Config {
    Config {
        backend: backend(server),
        sync: SyncConfig::default().with_call_timeout(Duration::from_secs(2)),
        profiles: ProfileConfig {
            table: "profiles".to_string(),
        },
    }
}

async fn settled_where(sync: &IdentitySync, accept: impl Fn(&SyncState) -> bool) -> SyncState {
    let mut updates = sync.subscribe();
    let current = sync.snapshot().await;
    if current.phase().is_settled() && accept(&current) {
        return current;
    }
    timeout(Duration::from_secs(5), async {
        loop {
            let state = updates.recv().await.unwrap();
            if state.phase().is_settled() && accept(&state) {
                return state;
            }
        }
    })
    .await
    .expect("state never settled")
}

#[tokio::test]
async fn test_sign_in_resolves_profile_with_user_token() {
    let mut server = Server::new_async().await;
    mock_password_grant(&mut server, token_body("user-token", "u1", "a@b.com")).await;
    let read = server
        .mock("GET", "/rest/v1/profiles")
        .match_query(profile_query("u1"))
        .match_header("authorization", "Bearer user-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(profile_row("u1", 120).to_string())
        .create_async()
        .await;

    let config = config(&server);
    let (provider, store) = http_backends(&config).unwrap();
    let sync = IdentitySync::new(provider, store, config.sync.clone());
    sync.start().await.unwrap();
    let initial = sync.wait_until_settled(Duration::from_secs(5)).await.unwrap();
    assert_eq!(initial.phase(), Phase::Ready(Presence::Anonymous));

    sync.sign_in_with_credentials("a@b.com", "pw").await.unwrap();
    let state = settled_where(&sync, SyncState::is_authenticated).await;
    read.assert_async().await;

    let profile = state.profile.unwrap();
    assert_eq!(profile.primary_balance, 120);
    assert_eq!(profile.premium_balance, 3);
    assert_eq!(state.identity.map(|i| i.id), Some("u1".to_string()));

    sync.teardown().await;
}

#[tokio::test]
async fn test_missing_profile_row_resolves_to_default() {
    let mut server = Server::new_async().await;
    mock_password_grant(&mut server, token_body("user-token", "u1", "a@b.com")).await;
    server
        .mock("GET", "/rest/v1/profiles")
        .match_query(Matcher::Any)
        .with_status(406)
        .with_header("content-type", "application/json")
        .with_body(json!({ "code": "PGRST116", "message": "JSON object requested, multiple (or no) rows returned" }).to_string())
        .create_async()
        .await;

    let config = config(&server);
    let (provider, store) = http_backends(&config).unwrap();
    let sync = IdentitySync::new(provider, store, config.sync.clone());
    sync.start().await.unwrap();
    sync.wait_until_settled(Duration::from_secs(5)).await.unwrap();

    sync.sign_in_with_credentials("a@b.com", "pw").await.unwrap();
    let state = settled_where(&sync, SyncState::is_authenticated).await;
    let profile = state.profile.unwrap();
    assert_eq!(profile.id, "u1");
    assert_eq!(profile.primary_balance, 0);
    assert_eq!(profile.display_name, None);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn test_bad_password_surfaces_as_action_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/auth/v1/token")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" }).to_string())
        .create_async()
        .await;

    let config = config(&server);
    let (provider, store) = http_backends(&config).unwrap();
    let sync = IdentitySync::new(provider, store, config.sync.clone());
    sync.start().await.unwrap();
    sync.wait_until_settled(Duration::from_secs(5)).await.unwrap();

    let err = sync.sign_in_with_credentials("a@b.com", "nope").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidCredentials);

    let state = sync.snapshot().await;
    assert_eq!(state.error.map(|e| e.message), Some("Invalid login credentials".to_string()));
    assert!(state.session.is_none());
}
