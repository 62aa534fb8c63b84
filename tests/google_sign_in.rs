use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use reqwest::{header, Client};
use serde_json::json;
use tokio::net::TcpListener;

use yildly_chat::identity::{GoogleIdentityProvider, IdentityProvider, SignInError, SignInRequest};
use yildly_chat::presentation::PageSettings;
use yildly_chat::session::SessionStore;
use yildly_chat::{app, AppState, MemoryStore, MessageStore, Responder};

const CLIENT_ID: &str = "client-1.apps.googleusercontent.com";

/// Stand-in for Google's tokeninfo endpoint.
async fn tokeninfo(Query(params): Query<HashMap<String, String>>) -> Response {
    let token = params.get("id_token").map(String::as_str).unwrap_or_default();
    match token {
        "good" => Json(json!({
            "aud": CLIENT_ID,
            "iss": "https://accounts.google.com",
            "sub": "g-123",
            "name": "Ada",
            "email": "ada@example.com",
            "picture": "https://img/ada.png",
        }))
        .into_response(),
        "no-name" => Json(json!({
            "aud": CLIENT_ID,
            "iss": "accounts.google.com",
            "sub": "g-456",
            "email": "bob@example.com",
        }))
        .into_response(),
        "other-client" => Json(json!({
            "aud": "someone-else",
            "iss": "https://accounts.google.com",
            "sub": "g-789",
        }))
        .into_response(),
        "bad-issuer" => Json(json!({
            "aud": CLIENT_ID,
            "iss": "https://evil.example.com",
            "sub": "g-000",
        }))
        .into_response(),
        "outage" => (StatusCode::INTERNAL_SERVER_ERROR, "backend down").into_response(),
        _ => (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_token" }))).into_response(),
    }
}

async fn spawn_tokeninfo() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::new().route("/tokeninfo", get(tokeninfo)))
            .await
            .unwrap();
    });
    format!("http://{addr}/tokeninfo")
}

fn credential(token: &str) -> SignInRequest {
    SignInRequest {
        credential: Some(token.into()),
        ..SignInRequest::default()
    }
}

async fn provider() -> GoogleIdentityProvider {
    GoogleIdentityProvider::new(CLIENT_ID.into(), spawn_tokeninfo().await).unwrap()
}

#[tokio::test]
async fn verified_token_yields_identity() {
    let provider = provider().await;

    let identity = provider.sign_in(&credential("good")).await.unwrap();

    assert_eq!(identity.uid, "g-123");
    assert_eq!(identity.display_name, "Ada");
    assert_eq!(identity.photo_url.as_deref(), Some("https://img/ada.png"));
}

#[tokio::test]
async fn missing_name_falls_back_to_email() {
    let provider = provider().await;

    let identity = provider.sign_in(&credential("no-name")).await.unwrap();

    assert_eq!(identity.display_name, "bob@example.com");
    assert!(identity.photo_url.is_none());
}

#[tokio::test]
async fn foreign_audience_is_rejected() {
    let provider = provider().await;

    let err = provider.sign_in(&credential("other-client")).await.unwrap_err();

    assert!(matches!(err, SignInError::Rejected(_)));
}

#[tokio::test]
async fn unknown_issuer_is_rejected() {
    let provider = provider().await;

    let err = provider.sign_in(&credential("bad-issuer")).await.unwrap_err();

    assert!(matches!(err, SignInError::Rejected(_)));
}

#[tokio::test]
async fn invalid_token_is_rejected() {
    let provider = provider().await;

    let err = provider.sign_in(&credential("forged")).await.unwrap_err();

    assert!(matches!(err, SignInError::Rejected(_)));
}

#[tokio::test]
async fn endpoint_outage_is_provider_error() {
    let provider = provider().await;

    let err = provider.sign_in(&credential("outage")).await.unwrap_err();

    assert!(matches!(err, SignInError::Provider(_)));
}

#[tokio::test]
async fn sign_in_route_maps_outcomes_to_status() {
    let google = provider().await;
    let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::default());
    let state = AppState {
        store: store.clone(),
        responder: Arc::new(Responder::new(store, Duration::from_secs(1))),
        sessions: Arc::new(SessionStore::new()),
        google: Some(Arc::new(google) as Arc<dyn IdentityProvider>),
        dev: None,
        settings: Arc::new(PageSettings {
            google_client_id: Some(CLIENT_ID.into()),
            dev_sign_in: false,
        }),
        window: 25,
        cookie_secure: true,
    };
    let sessions = state.sessions.clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });

    let client = Client::new();
    let post = |body: serde_json::Value| {
        client
            .post(format!("http://{addr}/auth/google"))
            .json(&body)
            .send()
    };

    let ok = post(json!({ "credential": "good" })).await.unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let cookie = ok.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cookie.contains("Secure"));
    assert_eq!(sessions.len(), 1);

    let cancelled = post(json!({ "error": "popup_closed_by_user" })).await.unwrap();
    assert_eq!(cancelled.status(), StatusCode::NO_CONTENT);

    let rejected = post(json!({ "credential": "forged" })).await.unwrap();
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

    let outage = post(json!({ "credential": "outage" })).await.unwrap();
    assert_eq!(outage.status(), StatusCode::BAD_GATEWAY);

    let dev = client
        .post(format!("http://{addr}/auth/dev"))
        .json(&json!({ "display_name": "Ada" }))
        .send()
        .await
        .unwrap();
    assert_eq!(dev.status(), StatusCode::NOT_FOUND);

    assert_eq!(sessions.len(), 1);
}
