//! Live conversation socket.
//!
//! After upgrade the connection runs a `select!` loop over two sources:
//! - conversation updates from the store: each one is rendered as the
//!   `#messages` fragment and pushed to the browser
//! - inbound `{"text": ...}` frames: posted through the responder. A refused
//!   post is answered with a `{"error": ..., "text": ...}` frame so the client
//!   can restore the draft.
//!
//! The feed (and its two store subscriptions) is dropped when the loop ends.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::assembler::ConversationFeed;
use crate::chat_server::{AppState, CurrentIdentity};
use crate::models::Identity;
use crate::presentation;
use crate::responder::{PendingReply, ResponderError, SendOutcome};

#[derive(Debug, Deserialize)]
struct Inbound {
    text: String,
}

/// Sent back when an inbound post was not written.
#[derive(Debug, Serialize)]
struct Refused<'a> {
    error: String,
    text: &'a str,
}

pub async fn handle_ws(
    State(state): State<AppState>,
    current: CurrentIdentity,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(identity) = current.identity else {
        return (StatusCode::UNAUTHORIZED, "sign in required").into_response();
    };

    ws.on_upgrade(move |socket| run_live(socket, state, identity))
}

async fn run_live(mut socket: WebSocket, state: AppState, identity: Identity) {
    let mut feed = match ConversationFeed::open(state.store.as_ref(), &identity.uid, state.window).await {
        Ok(feed) => feed,
        Err(e) => {
            error!("Failed to open conversation feed for {}: {}", identity.uid, e);
            return;
        }
    };

    info!(uid = %identity.uid, "live: client connected");

    loop {
        tokio::select! {
            update = feed.next() => {
                let Some(conversation) = update else { break };
                let fragment = presentation::message_list(&identity, &conversation).into_string();
                if socket.send(WsMessage::Text(fragment.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        let Some(reply) = handle_inbound(&state, &identity, text.as_str()).await else {
                            continue;
                        };
                        if socket.send(WsMessage::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!(uid = %identity.uid, "live: client disconnected");
}

/// Post one inbound frame. Returns the frame to send back when the post was
/// refused.
async fn handle_inbound(state: &AppState, identity: &Identity, raw: &str) -> Option<String> {
    let inbound: Inbound = match serde_json::from_str(raw) {
        Ok(inbound) => inbound,
        Err(e) => {
            warn!("Ignoring malformed live frame: {}", e);
            return None;
        }
    };

    let err = match state.responder.send(Some(identity), &inbound.text).await {
        Ok(SendOutcome::Sent(sent)) => {
            debug!(id = %sent.handle.id, "live: message sent");
            log_reply(sent.reply);
            return None;
        }
        Ok(SendOutcome::SignedOut) => return None,
        Err(e) => e,
    };

    if matches!(err, ResponderError::EmptyMessage) {
        debug!("live: refusing empty message");
    } else {
        error!("Failed to send message for {}: {}", identity.uid, err);
    }
    let refused = Refused {
        error: err.to_string(),
        text: &inbound.text,
    };
    serde_json::to_string(&refused).ok()
}

/// Let the reply finish in the background, logging if it never lands.
pub fn log_reply(reply: PendingReply) {
    tokio::spawn(async move {
        if let Err(e) = reply.wait().await {
            warn!("No reply written: {}", e);
        }
    });
}
