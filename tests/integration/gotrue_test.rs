//! GoTrue provider against a mock auth service

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use mockito::{Matcher, Server};
use serde_json::json;
use tokio::time::timeout;

use petcare_lib::{
    AuthChangeKind, ErrorCode, GoTrueProvider, Identity, IdentityProvider, Session,
};

use crate::integration::test_harness::{
    backend, mock_password_grant, next_change, temp_session_file, token_body, ANON_KEY,
};

#[tokio::test]
async fn test_password_sign_in_installs_session() {
    let mut server = Server::new_async().await;
    let grant = mock_password_grant(&mut server, token_body("at-1", "u1", "a@b.com")).await;
    let provider = GoTrueProvider::new(&backend(&server)).unwrap();
    let mut changes = provider.subscribe();

    let session = provider.sign_in_with_password("a@b.com", "pw").await.unwrap();
    grant.assert_async().await;

    assert_eq!(session.access_token, "at-1");
    assert_eq!(session.user.id, "u1");
    assert_eq!(session.user.metadata_str("username"), Some("Mochi"));
    assert!(!session.is_expired());

    let change = next_change(&mut changes).await;
    assert_eq!(change.kind, AuthChangeKind::SignedIn);
    assert_eq!(change.session, Some(session.clone()));
    assert_eq!(provider.current_session().await.unwrap(), Some(session));
    assert_eq!(provider.bearer().get().await.as_deref(), Some("at-1"));
}

#[tokio::test]
async fn test_rejected_credentials_map_to_invalid_credentials() {
    let mut server = Server::new_async().await;
    let bodies = [
        json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" }),
        json!({ "code": 400, "error_code": "invalid_credentials", "msg": "Invalid login credentials" }),
    ];
    let provider = GoTrueProvider::new(&backend(&server)).unwrap();

    for body in bodies {
        let mock = server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::UrlEncoded("grant_type".into(), "password".into()))
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let err = provider.sign_in_with_password("a@b.com", "nope").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCredentials);
        assert_eq!(err.message, "Invalid login credentials");
        mock.remove_async().await;
    }
    assert_eq!(provider.current_session().await.unwrap(), None);
}

#[tokio::test]
async fn test_server_error_is_not_a_credential_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/auth/v1/token")
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body("upstream unavailable")
        .create_async()
        .await;
    let provider = GoTrueProvider::new(&backend(&server)).unwrap();

    let err = provider.sign_in_with_password("a@b.com", "pw").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthRequestFailed);
    assert!(err.context.unwrap_or_default().contains("HTTP 500"));
}

#[tokio::test]
async fn test_sign_up_sends_metadata_and_returns_identity() {
    let mut server = Server::new_async().await;
    let signup = server
        .mock("POST", "/auth/v1/signup")
        .match_header("apikey", ANON_KEY)
        .match_body(Matcher::PartialJson(json!({
            "email": "new@b.com",
            "data": { "username": "Mochi" }
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "u2",
                "email": "new@b.com",
                "user_metadata": { "username": "Mochi" },
                "confirmation_sent_at": "2024-05-01T10:00:00Z"
            })
            .to_string(),
        )
        .create_async()
        .await;
    let provider = GoTrueProvider::new(&backend(&server)).unwrap();

    let mut metadata = HashMap::new();
    metadata.insert("username".to_string(), json!("Mochi"));
    let identity = provider.sign_up("new@b.com", "pw", metadata).await.unwrap();
    signup.assert_async().await;

    assert_eq!(identity.id, "u2");
    assert_eq!(identity.metadata_str("username"), Some("Mochi"));
    // Awaiting confirmation: no session yet
    assert_eq!(provider.current_session().await.unwrap(), None);
}

#[tokio::test]
async fn test_sign_up_with_session_signs_in() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/auth/v1/signup")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body("at-2", "u2", "new@b.com").to_string())
        .create_async()
        .await;
    let provider = GoTrueProvider::new(&backend(&server)).unwrap();
    let mut changes = provider.subscribe();

    let identity = provider.sign_up("new@b.com", "pw", HashMap::new()).await.unwrap();
    assert_eq!(identity.id, "u2");
    assert_eq!(next_change(&mut changes).await.kind, AuthChangeKind::SignedIn);
}

#[tokio::test]
async fn test_duplicate_email_maps_to_user_already_exists() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/auth/v1/signup")
        .with_status(422)
        .with_header("content-type", "application/json")
        .with_body(
            json!({ "code": 422, "error_code": "user_already_exists", "msg": "User already registered" })
                .to_string(),
        )
        .create_async()
        .await;
    let provider = GoTrueProvider::new(&backend(&server)).unwrap();

    let err = provider
        .sign_up("taken@b.com", "pw", HashMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UserAlreadyExists);
    assert_eq!(err.context.as_deref(), Some("taken@b.com"));
}

fn expired_session(refresh_token: Option<&str>) -> Session {
    Session {
        access_token: "stale".to_string(),
        refresh_token: refresh_token.map(str::to_string),
        token_type: "bearer".to_string(),
        expires_at: Some(Utc::now() - chrono::Duration::seconds(30)),
        user: Identity::new("u1", Some("a@b.com".to_string())),
    }
}

#[tokio::test]
async fn test_expired_session_is_refreshed() {
    let mut server = Server::new_async().await;
    let refresh = server
        .mock("POST", "/auth/v1/token")
        .match_query(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
        .match_body(Matcher::PartialJson(json!({ "refresh_token": "rt-1" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body("fresh", "u1", "a@b.com").to_string())
        .create_async()
        .await;
    let provider = GoTrueProvider::new(&backend(&server)).unwrap();
    provider.restore_session(Some(expired_session(Some("rt-1")))).await;
    let mut changes = provider.subscribe();

    let session = provider.current_session().await.unwrap().unwrap();
    refresh.assert_async().await;
    assert_eq!(session.access_token, "fresh");

    let change = next_change(&mut changes).await;
    assert_eq!(change.kind, AuthChangeKind::TokenRefreshed);
    assert_eq!(provider.bearer().get().await.as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_rejected_refresh_signs_out() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/auth/v1/token")
        .match_query(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(json!({ "error": "invalid_grant", "error_description": "Refresh Token Not Found" }).to_string())
        .create_async()
        .await;
    let provider = GoTrueProvider::new(&backend(&server)).unwrap();
    provider.restore_session(Some(expired_session(Some("gone")))).await;
    let mut changes = provider.subscribe();

    assert_eq!(provider.current_session().await.unwrap(), None);
    assert_eq!(next_change(&mut changes).await.kind, AuthChangeKind::SignedOut);
    assert_eq!(provider.bearer().get().await, None);
}

#[tokio::test]
async fn test_expired_session_without_refresh_token_signs_out() {
    let server = Server::new_async().await;
    let provider = GoTrueProvider::new(&backend(&server)).unwrap();
    provider.restore_session(Some(expired_session(None))).await;
    let mut changes = provider.subscribe();

    assert_eq!(provider.current_session().await.unwrap(), None);
    assert_eq!(next_change(&mut changes).await.kind, AuthChangeKind::SignedOut);
}

#[tokio::test]
async fn test_sign_out_tolerates_unknown_token() {
    let mut server = Server::new_async().await;
    mock_password_grant(&mut server, token_body("at-1", "u1", "a@b.com")).await;
    let logout = server
        .mock("POST", "/auth/v1/logout")
        .match_header("authorization", "Bearer at-1")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(json!({ "code": 401, "msg": "invalid JWT" }).to_string())
        .create_async()
        .await;
    let provider = GoTrueProvider::new(&backend(&server)).unwrap();
    provider.sign_in_with_password("a@b.com", "pw").await.unwrap();
    let mut changes = provider.subscribe();

    provider.sign_out().await.unwrap();
    logout.assert_async().await;

    assert_eq!(next_change(&mut changes).await.kind, AuthChangeKind::SignedOut);
    assert_eq!(provider.current_session().await.unwrap(), None);
}

#[tokio::test]
async fn test_sign_out_failure_still_clears_locally() {
    let mut server = Server::new_async().await;
    mock_password_grant(&mut server, token_body("at-1", "u1", "a@b.com")).await;
    server
        .mock("POST", "/auth/v1/logout")
        .with_status(500)
        .create_async()
        .await;
    let provider = GoTrueProvider::new(&backend(&server)).unwrap();
    provider.sign_in_with_password("a@b.com", "pw").await.unwrap();

    let err = provider.sign_out().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthRequestFailed);
    assert_eq!(provider.current_session().await.unwrap(), None);
}

#[tokio::test]
async fn test_session_survives_restart() {
    let mut server = Server::new_async().await;
    mock_password_grant(&mut server, token_body("at-1", "u1", "a@b.com")).await;
    let file = temp_session_file();

    let first = GoTrueProvider::new(&backend(&server))
        .unwrap()
        .with_session_file(file.clone());
    let session = first.sign_in_with_password("a@b.com", "pw").await.unwrap();
    drop(first);

    let second = GoTrueProvider::new(&backend(&server))
        .unwrap()
        .with_session_file(file.clone());
    let mut changes = second.subscribe();
    assert_eq!(second.restore_persisted().await.unwrap(), Some(session.clone()));
    assert_eq!(second.current_session().await.unwrap(), Some(session));
    assert_eq!(second.bearer().get().await.as_deref(), Some("at-1"));
    // Restoring is not a change
    assert!(timeout(Duration::from_millis(50), changes.recv()).await.is_err());

    let logout = server
        .mock("POST", "/auth/v1/logout")
        .match_header("authorization", "Bearer at-1")
        .with_status(204)
        .create_async()
        .await;
    second.sign_out().await.unwrap();
    logout.assert_async().await;

    let third = GoTrueProvider::new(&backend(&server))
        .unwrap()
        .with_session_file(file);
    assert_eq!(third.restore_persisted().await.unwrap(), None);
    assert_eq!(third.current_session().await.unwrap(), None);
}

#[tokio::test]
async fn test_stored_expired_session_is_refreshed_and_rewritten() {
    let mut server = Server::new_async().await;
    let refresh = server
        .mock("POST", "/auth/v1/token")
        .match_query(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
        .match_body(Matcher::PartialJson(json!({ "refresh_token": "rt-1" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body("fresh", "u1", "a@b.com").to_string())
        .create_async()
        .await;
    let file = temp_session_file();
    file.save(&expired_session(Some("rt-1"))).await.unwrap();

    let provider = GoTrueProvider::new(&backend(&server))
        .unwrap()
        .with_session_file(file.clone());
    provider.restore_persisted().await.unwrap();
    let session = provider.current_session().await.unwrap().unwrap();
    refresh.assert_async().await;

    assert_eq!(session.access_token, "fresh");
    assert_eq!(file.load().await.unwrap().map(|s| s.access_token), Some("fresh".to_string()));
    file.clear().await.unwrap();
}
