//! Merges the human and bot halves of a conversation into one timeline.

use std::cmp::Ordering;

use futures_util::StreamExt;

use crate::models::{Message, MessageRole};
use crate::store::{LiveResultSet, MessageQuery, MessageStore, StoreError};

/// Per-role cap on the live queries backing a conversation.
pub const CONVERSATION_WINDOW: usize = 25;

/// Merge two result sets into timeline order.
///
/// Until both sets have delivered a snapshot the conversation is empty, never
/// partial.
pub fn assemble(human: Option<&[Message]>, bot: Option<&[Message]>) -> Vec<Message> {
    let (Some(human), Some(bot)) = (human, bot) else {
        return Vec::new();
    };

    let mut all: Vec<Message> = human.iter().chain(bot).cloned().collect();
    all.sort_by(timeline_order);
    all
}

/// Ascending server timestamp. Pending records (no timestamp yet) go after
/// confirmed ones; ties fall back to insertion sequence, then id.
pub fn timeline_order(a: &Message, b: &Message) -> Ordering {
    let by_time = match (a.created_at, b.created_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_time
        .then(a.seq.cmp(&b.seq))
        .then_with(|| a.id.cmp(&b.id))
}

enum Side {
    Human(Option<Vec<Message>>),
    Bot(Option<Vec<Message>>),
}

/// Live view of one conversation, backed by two store queries.
pub struct ConversationFeed {
    human: LiveResultSet,
    bot: LiveResultSet,
    latest_human: Option<Vec<Message>>,
    latest_bot: Option<Vec<Message>>,
}

impl ConversationFeed {
    pub async fn open(
        store: &dyn MessageStore,
        conversation_id: &str,
        window: usize,
    ) -> Result<Self, StoreError> {
        let human = store
            .query(MessageQuery::new(conversation_id, MessageRole::Human, window))
            .await?;
        let bot = store
            .query(MessageQuery::new(conversation_id, MessageRole::Bot, window))
            .await?;

        Ok(Self {
            human,
            bot,
            latest_human: None,
            latest_bot: None,
        })
    }

    /// Wait for either result set to change and return the reassembled
    /// conversation. Returns `None` once either query has ended.
    pub async fn next(&mut self) -> Option<Vec<Message>> {
        loop {
            let side = tokio::select! {
                snapshot = self.human.next() => Side::Human(snapshot),
                snapshot = self.bot.next() => Side::Bot(snapshot),
            };

            match side {
                Side::Human(snapshot) => self.latest_human = Some(snapshot?),
                Side::Bot(snapshot) => self.latest_bot = Some(snapshot?),
            }

            if self.latest_human.is_some() && self.latest_bot.is_some() {
                return Some(self.current());
            }
        }
    }

    pub fn current(&self) -> Vec<Message> {
        assemble(self.latest_human.as_deref(), self.latest_bot.as_deref())
    }
}
