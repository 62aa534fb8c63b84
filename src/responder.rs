//! Posts human messages and answers each confirmed one with a canned reply.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::{Identity, NewMessage};
use crate::store::{MessageStore, RecordHandle, RecordStream, StoreError};

pub const CANNED_REPLIES: [&str; 5] = [
    "Hello!",
    "How are you?",
    "Nice to meet you!",
    "What's up?",
    "I'm here to chat!",
];

/// Pick one canned reply uniformly at random.
pub fn pick_reply<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    CANNED_REPLIES[rng.random_range(0..CANNED_REPLIES.len())]
}

#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    #[error("message text is empty")]
    EmptyMessage,
    #[error("failed to write message: {0}")]
    Write(#[from] StoreError),
    #[error("failed to observe message {id}: {source}")]
    Observe {
        id: String,
        #[source]
        source: StoreError,
    },
    #[error("observation of message {0} ended before it was confirmed")]
    Unconfirmed(String),
    #[error("message {0} was not confirmed within {1:?}")]
    ConfirmTimeout(String, Duration),
    #[error("reply task did not finish")]
    Aborted,
}

#[derive(Debug)]
pub enum SendOutcome {
    /// Nobody is signed in; nothing was written.
    SignedOut,
    Sent(Sent),
}

#[derive(Debug)]
pub struct Sent {
    pub handle: RecordHandle,
    pub reply: PendingReply,
}

/// The reply task for one sent message. Dropping it detaches the task, which
/// still finishes (or times out) on its own.
#[derive(Debug)]
pub struct PendingReply {
    task: JoinHandle<Result<RecordHandle, ResponderError>>,
}

impl PendingReply {
    /// Wait for the reply to be written and return its handle.
    pub async fn wait(self) -> Result<RecordHandle, ResponderError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                if e.is_panic() {
                    warn!("Reply task panicked: {}", e);
                }
                Err(ResponderError::Aborted)
            }
        }
    }

    pub fn cancel(&self) {
        self.task.abort();
    }
}

pub struct Responder {
    store: Arc<dyn MessageStore>,
    confirm_timeout: Duration,
}

impl Responder {
    pub fn new(store: Arc<dyn MessageStore>, confirm_timeout: Duration) -> Self {
        Self {
            store,
            confirm_timeout,
        }
    }

    /// Write `text` into the sender's conversation and schedule the reply.
    ///
    /// Signed-out callers get [`SendOutcome::SignedOut`] and nothing is
    /// written. A failed write returns before any observation is opened, so
    /// no reply can follow it.
    pub async fn send(
        &self,
        identity: Option<&Identity>,
        text: &str,
    ) -> Result<SendOutcome, ResponderError> {
        let Some(identity) = identity else {
            debug!("Ignoring send without a signed-in identity");
            return Ok(SendOutcome::SignedOut);
        };
        if text.is_empty() {
            return Err(ResponderError::EmptyMessage);
        }

        let handle = self.store.append(NewMessage::human(identity, text)).await?;

        let observation = self
            .store
            .observe(&handle)
            .await
            .map_err(|source| ResponderError::Observe {
                id: handle.id.clone(),
                source,
            })?;

        let task = tokio::spawn(reply_once(
            Arc::clone(&self.store),
            identity.uid.clone(),
            handle.clone(),
            observation,
            self.confirm_timeout,
        ));

        Ok(SendOutcome::Sent(Sent {
            handle,
            reply: PendingReply { task },
        }))
    }
}

/// Wait for the first confirmed snapshot, release the observation, then
/// write exactly one reply.
async fn reply_once(
    store: Arc<dyn MessageStore>,
    conversation_id: String,
    handle: RecordHandle,
    mut observation: RecordStream,
    confirm_timeout: Duration,
) -> Result<RecordHandle, ResponderError> {
    let confirmed = tokio::time::timeout(confirm_timeout, async {
        while let Some(snapshot) = observation.next().await {
            if snapshot.is_confirmed() {
                return true;
            }
        }
        false
    })
    .await;
    drop(observation);

    match confirmed {
        Ok(true) => {}
        Ok(false) => return Err(ResponderError::Unconfirmed(handle.id)),
        Err(_) => return Err(ResponderError::ConfirmTimeout(handle.id, confirm_timeout)),
    }

    let text = pick_reply(&mut rand::rng());
    let reply = store.append(NewMessage::bot(&conversation_id, text)).await?;
    info!(
        conversation = %conversation_id,
        message = %handle.id,
        reply = %reply.id,
        "Replied to confirmed message"
    );
    Ok(reply)
}
