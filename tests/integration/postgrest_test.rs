//! PostgREST profile store against a mock REST endpoint

use mockito::{Matcher, Server};
use serde_json::json;

use petcare_lib::adapters::BearerToken;
use petcare_lib::{
    ErrorCode, PostgrestProfileStore, Profile, ProfileConfig, ProfileField, ProfilePatch, ProfileStore,
};

use crate::integration::test_harness::{backend, profile_query, profile_row, ANON_KEY};

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

fn store(server: &mockito::ServerGuard, bearer: BearerToken) -> PostgrestProfileStore {
    let profiles = ProfileConfig {
        table: "profiles".to_string(),
    };
    PostgrestProfileStore::new(&backend(server), &profiles, bearer).unwrap()
}

#[tokio::test]
async fn test_get_projects_explicit_columns() {
    let mut server = Server::new_async().await;
    let read = server
        .mock("GET", "/rest/v1/profiles")
        .match_query(profile_query("u1"))
        .match_header("apikey", ANON_KEY)
        .match_header("accept", SINGLE_OBJECT)
        .match_header("authorization", format!("Bearer {}", ANON_KEY).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(profile_row("u1", 42).to_string())
        .create_async()
        .await;

    let profile = store(&server, BearerToken::new())
        .get("u1", ProfileField::ALL)
        .await
        .unwrap()
        .unwrap();
    read.assert_async().await;

    assert_eq!(
        profile,
        Profile {
            id: "u1".to_string(),
            display_name: Some("Mochi".to_string()),
            primary_balance: 42,
            premium_balance: 3,
            is_premium: false,
        }
    );
}

#[tokio::test]
async fn test_no_rows_is_absence() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/rest/v1/profiles")
        .match_query(Matcher::Any)
        .with_status(406)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "code": "PGRST116",
                "details": "The result contains 0 rows",
                "hint": null,
                "message": "JSON object requested, multiple (or no) rows returned"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let result = store(&server, BearerToken::new())
        .get("ghost", ProfileField::ALL)
        .await
        .unwrap();
    assert_eq!(result, None);
}

#[tokio::test]
async fn test_permission_error_keeps_code() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/rest/v1/profiles")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(json!({ "code": "42501", "message": "permission denied for table profiles" }).to_string())
        .create_async()
        .await;

    let err = store(&server, BearerToken::new())
        .get("u1", ProfileField::ALL)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::StoreRequestFailed);
    assert!(!err.is_not_found());
    assert!(err.context.unwrap_or_default().contains("42501"));
}

#[tokio::test]
async fn test_requests_use_signed_in_token() {
    let mut server = Server::new_async().await;
    let read = server
        .mock("GET", "/rest/v1/profiles")
        .match_query(profile_query("u1"))
        .match_header("authorization", "Bearer user-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(profile_row("u1", 1).to_string())
        .create_async()
        .await;

    let bearer = BearerToken::new();
    bearer.set(Some("user-token".to_string())).await;
    store(&server, bearer).get("u1", ProfileField::ALL).await.unwrap();
    read.assert_async().await;
}

#[tokio::test]
async fn test_insert_returns_representation() {
    let mut server = Server::new_async().await;
    let insert = server
        .mock("POST", "/rest/v1/profiles")
        .match_header("prefer", "return=representation")
        .match_body(Matcher::PartialJson(json!({
            "id": "u1",
            "username": "Mochi",
            "crystals": 0,
            "ouros": 0,
            "is_premium": false
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(profile_row("u1", 0).to_string())
        .create_async()
        .await;

    let created = store(&server, BearerToken::new())
        .insert(&Profile::new_account("u1", Some("Mochi".to_string())))
        .await
        .unwrap();
    insert.assert_async().await;
    assert_eq!(created.id, "u1");
}

#[tokio::test]
async fn test_update_sends_only_patched_columns() {
    let mut server = Server::new_async().await;
    let update = server
        .mock("PATCH", "/rest/v1/profiles")
        .match_query(Matcher::UrlEncoded("id".into(), "eq.u1".into()))
        .match_body(Matcher::Json(json!({ "crystals": 55 })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(profile_row("u1", 55).to_string())
        .create_async()
        .await;

    let updated = store(&server, BearerToken::new())
        .update("u1", &ProfilePatch::new().primary_balance(55))
        .await
        .unwrap();
    update.assert_async().await;
    assert_eq!(updated.primary_balance, 55);
}

#[tokio::test]
async fn test_update_missing_row_is_not_found() {
    let mut server = Server::new_async().await;
    server
        .mock("PATCH", "/rest/v1/profiles")
        .match_query(Matcher::Any)
        .with_status(406)
        .with_header("content-type", "application/json")
        .with_body(json!({ "code": "PGRST116", "message": "JSON object requested, multiple (or no) rows returned" }).to_string())
        .create_async()
        .await;

    let err = store(&server, BearerToken::new())
        .update("ghost", &ProfilePatch::new().premium(true))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
