//! Conversation store: per-pair message history, topic and turn budget.
//!
//! Conversations are created lazily on first contact and never deleted, so a
//! pair that separates and meets again resumes the same history.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Message, PairKey};

/// Message history and metadata for one pair of participants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Append-only, chronological by insertion.
    pub messages: Vec<Message>,
    /// Topic, assigned at most once.
    pub topic: Option<String>,
    /// Autonomous turns delivered in the current round.
    pub turn_count: u32,
    /// Completed-and-restarted rounds.
    pub rounds: u32,
}

impl Conversation {
    /// The last `n` messages, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }
}

/// Persisted form of the store: one key→value map per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    /// Pair key → messages.
    pub conversations: HashMap<PairKey, Vec<Message>>,
    /// Pair key → topic.
    pub topics: HashMap<PairKey, String>,
    /// Pair key → turn count of the current round.
    pub message_counts: HashMap<PairKey, u32>,
    /// Pair key → restarted rounds.
    #[serde(default)]
    pub rounds: HashMap<PairKey, u32>,
}

/// Keyed store of every conversation on the board.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    conversations: HashMap<PairKey, Conversation>,
}

impl ConversationStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing conversation for `key`, or a fresh empty one.
    pub fn get_or_create(&mut self, key: &PairKey) -> &mut Conversation {
        self.conversations.entry(key.clone()).or_default()
    }

    /// Read-only lookup; `None` if the pair has never met.
    #[must_use]
    pub fn get(&self, key: &PairKey) -> Option<&Conversation> {
        self.conversations.get(key)
    }

    /// Append a message. Never fails; cap checks are the caller's job.
    pub fn append_message(&mut self, key: &PairKey, message: Message) {
        self.get_or_create(key).messages.push(message);
    }

    /// Assign the topic if none is set. Returns `true` if this call set it.
    pub fn set_topic(&mut self, key: &PairKey, topic: impl Into<String>) -> bool {
        let conversation = self.get_or_create(key);
        if conversation.topic.is_some() {
            return false;
        }
        conversation.topic = Some(topic.into());
        true
    }

    /// Topic of the pair, if assigned.
    #[must_use]
    pub fn topic(&self, key: &PairKey) -> Option<&str> {
        self.get(key).and_then(|c| c.topic.as_deref())
    }

    /// Turn count of the current round (0 for unknown pairs).
    #[must_use]
    pub fn turn_count(&self, key: &PairKey) -> u32 {
        self.get(key).map_or(0, |c| c.turn_count)
    }

    /// Count one delivered autonomous turn; returns the new count.
    pub fn record_turn(&mut self, key: &PairKey) -> u32 {
        let conversation = self.get_or_create(key);
        conversation.turn_count += 1;
        conversation.turn_count
    }

    /// Start a new round: turn count back to zero, history and topic kept.
    pub fn restart_round(&mut self, key: &PairKey) {
        let conversation = self.get_or_create(key);
        conversation.turn_count = 0;
        conversation.rounds += 1;
    }

    /// Number of conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether no pair has ever met.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Drop every conversation.
    pub fn clear(&mut self) {
        self.conversations.clear();
    }

    /// Split into the persisted key→value maps.
    #[must_use]
    pub fn snapshot(&self) -> ConversationSnapshot {
        let mut snapshot = ConversationSnapshot::default();
        for (key, conversation) in &self.conversations {
            snapshot.conversations.insert(key.clone(), conversation.messages.clone());
            if let Some(topic) = &conversation.topic {
                snapshot.topics.insert(key.clone(), topic.clone());
            }
            if conversation.turn_count > 0 {
                snapshot.message_counts.insert(key.clone(), conversation.turn_count);
            }
            if conversation.rounds > 0 {
                snapshot.rounds.insert(key.clone(), conversation.rounds);
            }
        }
        snapshot
    }

    /// Rebuild from persisted maps. Keys present in any map get a conversation.
    #[must_use]
    pub fn restore(snapshot: ConversationSnapshot) -> Self {
        let ConversationSnapshot { conversations, topics, message_counts, rounds } = snapshot;
        let mut store = Self::new();
        for (key, messages) in conversations {
            store.get_or_create(&key).messages = messages;
        }
        for (key, topic) in topics {
            store.get_or_create(&key).topic = Some(topic);
        }
        for (key, count) in message_counts {
            store.get_or_create(&key).turn_count = count;
        }
        for (key, count) in rounds {
            store.get_or_create(&key).rounds = count;
        }
        store
    }
}
