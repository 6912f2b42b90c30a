//! End-to-end tests against an in-process blob server speaking the real
//! HTTP API.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use manylla_core::SyncSnapshot;
use manylla_crypto::KdfParams;
use manylla_sync::invite::InviteCodeStore;
use manylla_sync::remote::{RemoteStore, ShareRequest, ShareStore};
use manylla_sync::share::open_share;
use manylla_sync::{
    HttpRemote, MemoryCredentialStore, RecipientType, RemoteConfig, RemoteError, SessionConfig,
    ShareLink, ShareLinkBuilder, ShareOptions, SyncError, SyncErrorKind, SyncSession, SyncStatus,
};

#[derive(Clone, Default)]
struct ServerState {
    blobs: Arc<Mutex<HashMap<String, String>>>,
    shares: Arc<Mutex<Vec<ShareRequest>>>,
    /// When set, every blob GET answers 200 with this body verbatim.
    raw_body: Arc<Mutex<Option<String>>>,
}

async fn get_blob(Path(sync_id): Path<String>, State(state): State<ServerState>) -> Response {
    if let Some(body) = state.raw_body.lock().unwrap().clone() {
        return (StatusCode::OK, body).into_response();
    }
    match state.blobs.lock().unwrap().get(&sync_id) {
        Some(blob) => Json(json!({ "encrypted_blob": blob, "timestamp": 1_700_000_000_000_i64 }))
            .into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response(),
    }
}

async fn put_blob(
    Path(sync_id): Path<String>,
    State(state): State<ServerState>,
    Json(body): Json<Value>,
) -> StatusCode {
    let Some(blob) = body["encrypted_blob"].as_str() else {
        return StatusCode::BAD_REQUEST;
    };
    state.blobs.lock().unwrap().insert(sync_id, blob.to_string());
    StatusCode::OK
}

async fn create_share(
    State(state): State<ServerState>,
    Json(request): Json<ShareRequest>,
) -> Json<Value> {
    state.shares.lock().unwrap().push(request);
    Json(json!({ "success": true }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Start the fake server on an ephemeral port and return its API root.
async fn spawn_server() -> (String, ServerState) {
    let state = ServerState::default();
    let app = Router::new()
        .route("/sync/{sync_id}", get(get_blob).put(put_blob))
        .route("/share", post(create_share))
        .route("/health", get(health))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn remote(base_url: &str) -> Arc<HttpRemote> {
    Arc::new(
        HttpRemote::new(&RemoteConfig {
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap(),
    )
}

fn session(remote: Arc<HttpRemote>) -> SyncSession<HttpRemote, MemoryCredentialStore> {
    SyncSession::new(
        remote,
        MemoryCredentialStore::default(),
        InviteCodeStore::in_memory(),
        SessionConfig {
            kdf: KdfParams::insecure_fast(),
            request_timeout: Duration::from_secs(5),
            invite_base_url: "https://manylla.com/qual".into(),
            compress: true,
        },
    )
}

fn snapshot(name: &str) -> SyncSnapshot {
    let profile = serde_json::from_value(json!({
        "id": "p1",
        "name": name,
        "photo": "data:image/png;base64,AAAA",
        "entries": [
            {"id": "1", "category": "medical", "title": "Allergy", "description": "Peanuts"},
            {"id": "2", "category": "education", "title": "IEP", "description": "Reading support"}
        ],
        "categories": [
            {"id": "medical", "name": "medical", "displayName": "Medical"},
            {"id": "education", "name": "education", "displayName": "Education"}
        ]
    }))
    .unwrap();
    SyncSnapshot::new(vec![profile], json!({}))
}

#[tokio::test]
async fn health_check_reports_healthy() {
    let (url, _) = spawn_server().await;
    assert!(remote(&url).check_health().await);
}

#[tokio::test]
async fn health_check_fails_for_unreachable_server() {
    // Nothing listens on the discard port.
    assert!(!remote("http://127.0.0.1:9").check_health().await);
}

#[tokio::test]
async fn fetch_missing_blob_is_none() {
    let (url, _) = spawn_server().await;
    assert!(remote(&url).fetch_blob("deadbeef").await.unwrap().is_none());
}

#[tokio::test]
async fn put_then_fetch_blob() {
    let (url, state) = spawn_server().await;
    let remote = remote(&url);
    remote.put_blob("abc123", "m1.salt.cipher").await.unwrap();
    assert_eq!(
        state.blobs.lock().unwrap().get("abc123").map(String::as_str),
        Some("m1.salt.cipher")
    );
    let fetched = remote.fetch_blob("abc123").await.unwrap().unwrap();
    assert_eq!(fetched.encrypted_blob, "m1.salt.cipher");
    assert_eq!(fetched.timestamp, 1_700_000_000_000);
}

#[tokio::test]
async fn unknown_route_is_api_error() {
    let (url, _) = spawn_server().await;
    let remote = remote(&format!("{url}/missing-prefix"));
    assert!(matches!(
        remote.put_blob("abc", "m1.a.b").await,
        Err(RemoteError::Api { status: 404, .. })
    ));
}

#[tokio::test]
async fn two_devices_sync_over_http() {
    let (url, state) = spawn_server().await;
    let first = session(remote(&url));
    let second = session(remote(&url));

    let enabled = first.enable_as_new(&snapshot("Ellie")).await.unwrap();
    let stored = state
        .blobs
        .lock()
        .unwrap()
        .get(&enabled.sync_id)
        .cloned()
        .unwrap();
    assert!(stored.starts_with("m1."));
    assert!(!stored.contains("Ellie"));

    let joined = second
        .enable_by_joining(enabled.phrase.as_str())
        .await
        .unwrap();
    assert_eq!(joined.profiles[0].name, "Ellie");
    assert_eq!(second.sync_id().as_deref(), Some(enabled.sync_id.as_str()));

    second.push(&snapshot("Ellie Smith")).await.unwrap();
    let pulled = first.pull().await.unwrap().unwrap();
    assert_eq!(pulled.profiles[0].name, "Ellie Smith");
    assert!(pulled.profiles[0].photo.is_none());
}

#[tokio::test]
async fn joining_unknown_group_over_http() {
    let (url, _) = spawn_server().await;
    let session = session(remote(&url));
    assert!(matches!(
        session
            .enable_by_joining("0123456789abcdef0123456789abcdef")
            .await,
        Err(SyncError::GroupNotFound)
    ));
    assert!(!session.is_enabled());
}

#[tokio::test]
async fn server_down_is_network_error() {
    let session = session(remote("http://127.0.0.1:9"));
    assert!(matches!(
        session.enable_as_new(&snapshot("Ellie")).await,
        Err(SyncError::Network(_))
    ));
    assert!(!session.is_enabled());
}

#[tokio::test]
async fn medical_share_over_http() {
    let (url, state) = spawn_server().await;
    let builder = ShareLinkBuilder::new(
        remote(&url),
        "https://manylla.com/qual",
        365,
        Duration::from_secs(5),
    );
    let profile = snapshot("Ellie").profiles.remove(0);
    let link = builder
        .build(
            &profile,
            &ShareOptions {
                categories: vec!["medical".into()],
                include_photo: false,
                expiration_days: 7,
                recipient: RecipientType::Medical,
            },
        )
        .await
        .unwrap();

    let request = state.shares.lock().unwrap()[0].clone();
    assert_eq!(request.recipient_type, RecipientType::Medical);
    assert_eq!(request.expiry_hours, 168);
    assert_eq!(request.access_code, link.access_token.as_str());

    let (_, key) = ShareLink::parse_url(&link.url).unwrap();
    let opened = open_share(&request.encrypted_data, &key).unwrap();
    assert!(opened.profile.photo.is_none());
    assert_eq!(opened.profile.entries.len(), 1);
    assert_eq!(opened.profile.entries[0].category, "medical");
}

#[tokio::test]
async fn share_rejected_by_server() {
    let app = Router::new().route(
        "/share",
        post(|| async { Json(json!({ "success": false, "error": "Access code exists" })) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let remote = remote(&format!("http://{addr}"));
    let err = remote
        .create_share(&ShareRequest {
            access_code: "ABCD-2345".into(),
            encrypted_data: "AAAA".into(),
            recipient_type: RecipientType::Custom,
            expiry_hours: 24,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Api { message, .. } if message == "Access code exists"));
}

#[tokio::test]
async fn garbage_response_body_is_a_network_error() {
    let (url, state) = spawn_server().await;
    let device = session(remote(&url));
    device.enable_as_new(&snapshot("Ellie")).await.unwrap();
    device.pull().await.unwrap();
    let before = device.last_snapshot();

    for body in ["not json", r#"{"unexpected": true}"#] {
        *state.raw_body.lock().unwrap() = Some(body.to_string());
        let err = device.pull().await.unwrap_err();
        assert!(matches!(err, SyncError::Network(_)), "{body}: {err:?}");
        assert_eq!(device.status(), SyncStatus::Error(SyncErrorKind::Network));
        assert_eq!(device.last_snapshot(), before);
    }

    *state.raw_body.lock().unwrap() = None;
    assert!(device.pull().await.unwrap().is_some());
    assert_eq!(device.status(), SyncStatus::Idle);
}
