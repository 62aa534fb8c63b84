use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, warn};

use crate::models::{Message, MessageRole, NewMessage};

/// Snapshots of a single record, current state first. Dropping the stream
/// cancels the observation.
pub type RecordStream = BoxStream<'static, Message>;

/// Snapshots of a query result, current result first, re-emitted whenever a
/// matching record is added or confirmed. Dropping the stream cancels it.
pub type LiveResultSet = BoxStream<'static, Vec<Message>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(String),
    #[error("write rejected: {0}")]
    WriteRejected(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Reference to an accepted record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordHandle {
    pub id: String,
}

/// Equality filter on conversation and role, capped at the `limit` most
/// recent records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub conversation_id: String,
    pub role: MessageRole,
    pub limit: usize,
}

impl MessageQuery {
    pub fn new(conversation_id: impl Into<String>, role: MessageRole, limit: usize) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role,
            limit,
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        message.role == self.role && message.conversation_id == self.conversation_id
    }
}

/// Append-only message store with realtime observation.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Accept a record. The returned handle refers to a pending record; the
    /// store confirms it later by assigning `created_at`.
    async fn append(&self, message: NewMessage) -> Result<RecordHandle, StoreError>;

    /// Observe one record until the stream is dropped.
    async fn observe(&self, handle: &RecordHandle) -> Result<RecordStream, StoreError>;

    /// Open a live query until the stream is dropped.
    async fn query(&self, query: MessageQuery) -> Result<LiveResultSet, StoreError>;
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Latency between accepting a record and confirming it.
    pub confirm_delay: Duration,
    /// Longest accepted text, in chars.
    pub max_text_len: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            confirm_delay: Duration::ZERO,
            max_text_len: 2000,
        }
    }
}

/// In-process realtime store. Records live for the lifetime of the process.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    state: RwLock<State>,
    changes: broadcast::Sender<Message>,
    options: StoreOptions,
}

#[derive(Default)]
struct State {
    records: Vec<Message>,
    watchers: HashMap<String, watch::Sender<Message>>,
    next_seq: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

impl MemoryStore {
    pub fn new(options: StoreOptions) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                changes,
                options,
            }),
        }
    }

    /// Every record in insertion order
    pub async fn records(&self) -> Vec<Message> {
        self.inner.state.read().await.records.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Inner {
    /// Assign the server timestamp and notify observers
    async fn confirm(&self, id: &str) {
        let confirmed = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;

            // Timestamps never run backwards, even if the wall clock does.
            let now = Utc::now();
            let stamp = match state.last_timestamp {
                Some(last) if last > now => last,
                _ => now,
            };

            let Some(record) = state.records.iter_mut().find(|r| r.id == id) else {
                warn!("Confirmation for unknown record {}", id);
                return;
            };
            if record.is_confirmed() {
                return;
            }
            record.created_at = Some(stamp);
            state.last_timestamp = Some(stamp);
            let confirmed = record.clone();

            if let Some(watcher) = state.watchers.get(id) {
                watcher.send_replace(confirmed.clone());
            }
            confirmed
        };

        debug!(id = %confirmed.id, seq = confirmed.seq, "record confirmed");
        // No receivers just means nobody is watching.
        let _ = self.changes.send(confirmed);
    }

    async fn snapshot(&self, query: &MessageQuery) -> Vec<Message> {
        let state = self.state.read().await;
        let matching: Vec<&Message> = state.records.iter().filter(|m| query.matches(m)).collect();
        let skip = matching.len().saturating_sub(query.limit);
        matching.into_iter().skip(skip).cloned().collect()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: NewMessage) -> Result<RecordHandle, StoreError> {
        let len = message.text.chars().count();
        if len > self.inner.options.max_text_len {
            return Err(StoreError::WriteRejected(format!(
                "text is {} chars, limit is {}",
                len, self.inner.options.max_text_len
            )));
        }

        let record = {
            let mut state = self.inner.state.write().await;
            state.next_seq += 1;
            let record = Message::accepted(message, state.next_seq);
            let (watcher, _) = watch::channel(record.clone());
            state.watchers.insert(record.id.clone(), watcher);
            state.records.push(record.clone());
            record
        };

        debug!(
            id = %record.id,
            conversation = %record.conversation_id,
            role = record.role.as_str(),
            "record accepted"
        );
        let _ = self.inner.changes.send(record.clone());

        let inner = Arc::clone(&self.inner);
        let id = record.id.clone();
        tokio::spawn(async move {
            let delay = inner.options.confirm_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            inner.confirm(&id).await;
        });

        Ok(RecordHandle { id: record.id })
    }

    async fn observe(&self, handle: &RecordHandle) -> Result<RecordStream, StoreError> {
        let receiver = {
            let state = self.inner.state.read().await;
            state
                .watchers
                .get(&handle.id)
                .ok_or_else(|| StoreError::NotFound(handle.id.clone()))?
                .subscribe()
        };

        Ok(record_stream(receiver))
    }

    async fn query(&self, query: MessageQuery) -> Result<LiveResultSet, StoreError> {
        // Subscribe before taking the first snapshot so no change slips between.
        let changes = self.inner.changes.subscribe();
        let initial = self.inner.snapshot(&query).await;

        let cursor = QueryCursor {
            inner: Arc::clone(&self.inner),
            query,
            changes,
            pending: Some(initial),
        };

        Ok(stream::unfold(cursor, |mut cursor| async move {
            if let Some(snapshot) = cursor.pending.take() {
                return Some((snapshot, cursor));
            }

            loop {
                match cursor.changes.recv().await {
                    Ok(changed) if cursor.query.matches(&changed) => break,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Live query lagged by {} changes, resyncing", skipped);
                        break;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }

            let snapshot = cursor.inner.snapshot(&cursor.query).await;
            Some((snapshot, cursor))
        })
        .boxed())
    }
}

struct QueryCursor {
    inner: Arc<Inner>,
    query: MessageQuery,
    changes: broadcast::Receiver<Message>,
    pending: Option<Vec<Message>>,
}

fn record_stream(receiver: watch::Receiver<Message>) -> RecordStream {
    stream::unfold((receiver, true), |(mut receiver, first)| async move {
        if !first && receiver.changed().await.is_err() {
            return None;
        }
        let current = receiver.borrow_and_update().clone();
        Some((current, (receiver, false)))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identity;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_millis(500);

    fn slow_store() -> MemoryStore {
        MemoryStore::new(StoreOptions {
            confirm_delay: Duration::from_millis(20),
            ..StoreOptions::default()
        })
    }

    #[tokio::test]
    async fn test_append_is_pending_then_confirmed() {
        let store = slow_store();
        let author = Identity::new("U1", "Ada");

        let handle = store.append(NewMessage::human(&author, "hi")).await.unwrap();
        let mut observed = store.observe(&handle).await.unwrap();

        let first = timeout(WAIT, observed.next()).await.unwrap().unwrap();
        assert_eq!(first.id, handle.id);
        assert!(!first.is_confirmed());

        let second = timeout(WAIT, observed.next()).await.unwrap().unwrap();
        assert!(second.is_confirmed());
    }

    #[tokio::test]
    async fn test_observe_unknown_record_fails() {
        let store = MemoryStore::default();
        let missing = RecordHandle { id: "nope".into() };

        assert!(matches!(store.observe(&missing).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_text_over_limit() {
        let store = MemoryStore::new(StoreOptions {
            max_text_len: 3,
            ..StoreOptions::default()
        });

        let result = store.append(NewMessage::bot("U1", "too long")).await;

        assert!(matches!(result, Err(StoreError::WriteRejected(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_timestamps_never_decrease() {
        let store = MemoryStore::default();
        for i in 0..10 {
            let handle = store.append(NewMessage::bot("U1", format!("m{i}"))).await.unwrap();
            let mut observed = store.observe(&handle).await.unwrap();
            while let Some(snapshot) = timeout(WAIT, observed.next()).await.unwrap() {
                if snapshot.is_confirmed() {
                    break;
                }
            }
        }

        let records = store.records().await;
        let stamps: Vec<_> = records.iter().map(|m| m.created_at.unwrap()).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_query_filters_by_conversation_and_role() {
        let store = MemoryStore::default();
        let ada = Identity::new("U1", "Ada");
        let bob = Identity::new("U2", "Bob");
        store.append(NewMessage::human(&ada, "a")).await.unwrap();
        store.append(NewMessage::human(&bob, "b")).await.unwrap();
        store.append(NewMessage::bot("U1", "Hello!")).await.unwrap();

        let mut live = store
            .query(MessageQuery::new("U1", MessageRole::Human, 25))
            .await
            .unwrap();
        let snapshot = timeout(WAIT, live.next()).await.unwrap().unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].text, "a");
    }

    #[tokio::test]
    async fn test_query_keeps_most_recent_within_limit() {
        let store = MemoryStore::default();
        for i in 0..30 {
            store.append(NewMessage::bot("U1", format!("m{i}"))).await.unwrap();
        }

        let mut live = store
            .query(MessageQuery::new("U1", MessageRole::Bot, 25))
            .await
            .unwrap();
        let snapshot = timeout(WAIT, live.next()).await.unwrap().unwrap();

        assert_eq!(snapshot.len(), 25);
        assert_eq!(snapshot.first().unwrap().text, "m5");
        assert_eq!(snapshot.last().unwrap().text, "m29");
    }

    #[tokio::test]
    async fn test_query_emits_on_matching_change() {
        let store = slow_store();
        let mut live = store
            .query(MessageQuery::new("U1", MessageRole::Bot, 25))
            .await
            .unwrap();
        assert!(timeout(WAIT, live.next()).await.unwrap().unwrap().is_empty());

        store.append(NewMessage::bot("U2", "elsewhere")).await.unwrap();
        store.append(NewMessage::bot("U1", "Hello!")).await.unwrap();

        let accepted = timeout(WAIT, live.next()).await.unwrap().unwrap();
        assert_eq!(accepted.len(), 1);
        assert!(!accepted[0].is_confirmed());

        let confirmed = timeout(WAIT, live.next()).await.unwrap().unwrap();
        assert!(confirmed[0].is_confirmed());
    }
}
