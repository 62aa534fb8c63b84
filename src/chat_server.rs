use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{FromRef, FromRequestParts, Json, State},
    http::{header, request::Parts, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::app_config::AppConfig;
use crate::assembler::ConversationFeed;
use crate::identity::{
    DevIdentityProvider, GoogleIdentityProvider, IdentityProvider, SignInError, SignInRequest,
};
use crate::live;
use crate::models::{Identity, Message};
use crate::presentation::{
    self, MessageView, PageSettings, BOT_AVATAR_PATH, BOT_AVATAR_SVG, LOGO_PATH, LOGO_SVG,
};
use crate::responder::{Responder, ResponderError, SendOutcome};
use crate::session::SessionStore;
use crate::store::{MemoryStore, MessageStore, StoreError, StoreOptions};

pub const SESSION_COOKIE: &str = "session_token";

/// How long page and API handlers wait for the first conversation snapshot.
const SNAPSHOT_WAIT: Duration = Duration::from_secs(2);

/// -----------------------------
/// App State
/// -----------------------------
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub responder: Arc<Responder>,
    pub sessions: Arc<SessionStore>,
    pub google: Option<Arc<dyn IdentityProvider>>,
    pub dev: Option<Arc<dyn IdentityProvider>>,
    pub settings: Arc<PageSettings>,
    pub window: usize,
    pub cookie_secure: bool,
}

impl AppState {
    /// Wire the in-process store and the configured providers.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::new(StoreOptions {
            confirm_delay: config.confirm_delay,
            max_text_len: config.max_message_len,
        }));

        let google = match &config.google_client_id {
            Some(client_id) => {
                let provider =
                    GoogleIdentityProvider::new(client_id.clone(), config.google_tokeninfo_url.clone())
                        .context("Failed to build Google identity client")?;
                Some(Arc::new(provider) as Arc<dyn IdentityProvider>)
            }
            None => None,
        };
        let dev = config
            .dev_sign_in
            .then(|| Arc::new(DevIdentityProvider) as Arc<dyn IdentityProvider>);

        Ok(Self {
            responder: Arc::new(Responder::new(store.clone(), config.confirm_timeout)),
            store,
            sessions: Arc::new(SessionStore::new()),
            google,
            dev,
            settings: Arc::new(PageSettings {
                google_client_id: config.google_client_id.clone(),
                dev_sign_in: config.dev_sign_in,
            }),
            window: config.conversation_window,
            cookie_secure: config.cookie_secure,
        })
    }

    /// Current assembled conversation for `uid`.
    pub async fn conversation_snapshot(&self, uid: &str) -> Result<Vec<Message>> {
        let mut feed = ConversationFeed::open(self.store.as_ref(), uid, self.window).await?;
        let snapshot = tokio::time::timeout(SNAPSHOT_WAIT, feed.next())
            .await
            .context("Timed out waiting for conversation snapshot")?;
        Ok(snapshot.unwrap_or_default())
    }
}

/// -----------------------------
/// Current identity
/// -----------------------------

/// The session cookie's identity, if any. Never rejects: signed-out callers
/// get `None`.
pub struct CurrentIdentity {
    pub identity: Option<Identity>,
    pub token: Option<String>,
}

impl<S> FromRequestParts<S> for CurrentIdentity
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let Some(token) = jar.get(SESSION_COOKIE).map(|c| c.value().to_owned()) else {
            return Ok(Self {
                identity: None,
                token: None,
            });
        };

        let app_state = AppState::from_ref(state);
        Ok(Self {
            identity: app_state.sessions.current_identity(&token),
            token: Some(token),
        })
    }
}

/// -----------------------------
/// Pages
/// -----------------------------
async fn health() -> &'static str {
    "OK"
}

async fn bot_avatar() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/svg+xml")], BOT_AVATAR_SVG)
}

async fn logo() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/svg+xml")], LOGO_SVG)
}

async fn index(State(state): State<AppState>, current: CurrentIdentity) -> Response {
    let conversation = match &current.identity {
        Some(identity) => match state.conversation_snapshot(&identity.uid).await {
            Ok(conversation) => conversation,
            Err(e) => {
                error!("Failed to load conversation for {}: {:#}", identity.uid, e);
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let markup = presentation::page(current.identity.as_ref(), &conversation, &state.settings);
    Html(markup.into_string()).into_response()
}

/// -----------------------------
/// Auth
/// -----------------------------
fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

async fn sign_in_with(
    state: &AppState,
    provider: &dyn IdentityProvider,
    jar: CookieJar,
    request: SignInRequest,
) -> Response {
    match provider.sign_in(&request).await {
        Ok(identity) => {
            info!(provider = provider.name(), uid = %identity.uid, "Signed in");
            let token = state.sessions.sign_in(identity.clone());
            let jar = jar.add(session_cookie(token, state.cookie_secure));
            (jar, Json(identity)).into_response()
        }
        Err(SignInError::Cancelled) => {
            info!(provider = provider.name(), "Sign-in popup closed before authentication");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e @ SignInError::Rejected(_)) => {
            warn!(provider = provider.name(), "Sign-in rejected: {}", e);
            StatusCode::UNAUTHORIZED.into_response()
        }
        Err(e @ SignInError::Provider(_)) => {
            error!(provider = provider.name(), "Sign-in failed: {}", e);
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

async fn google_sign_in(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<SignInRequest>,
) -> Response {
    let Some(provider) = state.google.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Google sign-in not configured").into_response();
    };
    sign_in_with(&state, provider.as_ref(), jar, request).await
}

async fn dev_sign_in(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<SignInRequest>,
) -> Response {
    let Some(provider) = state.dev.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    sign_in_with(&state, provider.as_ref(), jar, request).await
}

async fn sign_out(State(state): State<AppState>, jar: CookieJar, current: CurrentIdentity) -> Response {
    if let Some(token) = &current.token {
        state.sessions.sign_out(token);
    }
    let removal = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    (jar.remove(removal), StatusCode::NO_CONTENT).into_response()
}

/// -----------------------------
/// API
/// -----------------------------
async fn me(current: CurrentIdentity) -> Result<Json<Identity>, StatusCode> {
    current.identity.map(Json).ok_or(StatusCode::UNAUTHORIZED)
}

async fn conversation(
    State(state): State<AppState>,
    current: CurrentIdentity,
) -> Result<Json<Vec<MessageView>>, StatusCode> {
    let identity = current.identity.ok_or(StatusCode::UNAUTHORIZED)?;
    let messages = state
        .conversation_snapshot(&identity.uid)
        .await
        .map_err(|e| {
            error!("Failed to load conversation for {}: {:#}", identity.uid, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(
        messages
            .iter()
            .map(|m| MessageView::new(m, &identity))
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct PostMessageReq {
    pub text: String,
}

async fn post_message(
    State(state): State<AppState>,
    current: CurrentIdentity,
    Json(req): Json<PostMessageReq>,
) -> Response {
    match state.responder.send(current.identity.as_ref(), &req.text).await {
        Ok(SendOutcome::SignedOut) => StatusCode::NO_CONTENT.into_response(),
        Ok(SendOutcome::Sent(sent)) => {
            live::log_reply(sent.reply);
            (StatusCode::ACCEPTED, Json(json!({ "id": sent.handle.id }))).into_response()
        }
        Err(e) => {
            let status = send_error_status(&e);
            if status.is_server_error() {
                error!("Failed to send message: {}", e);
            } else {
                warn!("Message refused: {}", e);
            }
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

/// Status for a refused send: 4xx for bad input, 503 for store failures.
fn send_error_status(err: &ResponderError) -> StatusCode {
    match err {
        ResponderError::EmptyMessage => StatusCode::UNPROCESSABLE_ENTITY,
        ResponderError::Write(StoreError::WriteRejected(_)) => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// -----------------------------
/// Router
/// -----------------------------
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/me", get(me))
        .route("/conversation", get(conversation))
        .route("/messages", post(post_message));

    let auth = Router::new()
        .route("/google", post(google_sign_in))
        .route("/dev", post(dev_sign_in))
        .route("/sign-out", post(sign_out));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route(BOT_AVATAR_PATH, get(bot_avatar))
        .route(LOGO_PATH, get(logo))
        .route("/ws", get(live::handle_ws))
        .nest("/auth", auth)
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
