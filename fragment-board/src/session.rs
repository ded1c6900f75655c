//! User-facing chat session.
//!
//! The user talks to at most one NPC at a time. The partner is sticky: it
//! only changes when it leaves range, when none is set, or when the user
//! clicks another in-range NPC. Replies are tied to the partner captured at
//! send time, so a reply always lands in the conversation it answers.

use std::collections::BTreeMap;

use fragment_core::proximity::RelationshipSet;
use fragment_core::types::EntityId;
use tracing::{debug, info};

use crate::events::RequestToken;

/// Who the user is talking to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No partner.
    #[default]
    Idle,
    /// Chatting with this NPC.
    Engaged(EntityId),
}

/// A partner change caused by proximity or a click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerChange {
    /// Partner before.
    pub from: Option<EntityId>,
    /// Partner after.
    pub to: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplyPhase {
    Generating,
    Revealing(String),
}

#[derive(Debug, Clone)]
struct PendingReply {
    partner: EntityId,
    phase: ReplyPhase,
}

/// A message accepted by [`ChatSession::take_send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedSend {
    /// Partner captured at send time.
    pub partner: EntityId,
    /// Trimmed message text.
    pub text: String,
}

/// The single user ↔ NPC chat relation plus in-flight replies.
#[derive(Debug, Default)]
pub struct ChatSession {
    state: SessionState,
    draft: String,
    pending: BTreeMap<RequestToken, PendingReply>,
}

impl ChatSession {
    /// Idle session with an empty draft.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Active partner, if any.
    #[must_use]
    pub fn partner(&self) -> Option<&EntityId> {
        match &self.state {
            SessionState::Engaged(id) => Some(id),
            SessionState::Idle => None,
        }
    }

    /// Re-evaluate the partner after positions changed.
    ///
    /// Keeps the current partner while it is in range; otherwise picks the
    /// nearest in-range NPC, or goes idle.
    pub fn update(&mut self, relationships: &RelationshipSet) -> Option<PartnerChange> {
        if let Some(current) = self.partner() {
            if relationships.is_near_user(current) {
                return None;
            }
        }
        let next = relationships.nearest_to_user().cloned();
        self.set_partner(next)
    }

    /// Manual selection. Only an in-range NPC can be selected.
    pub fn click(&mut self, id: &EntityId, relationships: &RelationshipSet) -> Option<PartnerChange> {
        if id.is_user() || !relationships.is_near_user(id) {
            debug!(entity = %id, "Ignoring click on entity out of chat range");
            return None;
        }
        self.set_partner(Some(id.clone()))
    }

    /// Drop the partner (e.g. it was removed from the board).
    pub fn forget(&mut self, id: &EntityId) -> Option<PartnerChange> {
        if self.partner() == Some(id) {
            return self.set_partner(None);
        }
        None
    }

    fn set_partner(&mut self, next: Option<EntityId>) -> Option<PartnerChange> {
        let from = self.partner().cloned();
        if from == next {
            return None;
        }
        info!(from = ?from.as_ref().map(EntityId::as_str), to = ?next.as_ref().map(EntityId::as_str), "Chat partner changed");
        self.state = next.clone().map_or(SessionState::Idle, SessionState::Engaged);
        Some(PartnerChange { from, to: next })
    }

    /// Current chat input.
    #[must_use]
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Replace the chat input.
    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Accept the draft for sending.
    ///
    /// Rejected (draft kept) when the trimmed draft is empty or no partner is
    /// engaged. On accept the draft is cleared and a reply is expected under
    /// `token` for the captured partner.
    pub fn take_send(&mut self, token: RequestToken) -> Option<AcceptedSend> {
        let text = self.draft.trim();
        if text.is_empty() {
            return None;
        }
        let partner = self.partner()?.clone();
        let text = text.to_string();
        self.draft.clear();
        self.pending.insert(token, PendingReply { partner: partner.clone(), phase: ReplyPhase::Generating });
        Some(AcceptedSend { partner, text })
    }

    /// Generated text arrived for `token`; it is now waiting to be revealed.
    ///
    /// Returns the captured partner, or `None` for unknown or already
    /// answered tokens.
    pub fn reply_ready(&mut self, token: RequestToken, text: String) -> Option<EntityId> {
        let pending = self.pending.get_mut(&token)?;
        if pending.phase != ReplyPhase::Generating {
            return None;
        }
        pending.phase = ReplyPhase::Revealing(text);
        Some(pending.partner.clone())
    }

    /// Consume a revealed reply. Each token yields at most once.
    pub fn reveal(&mut self, token: RequestToken) -> Option<(EntityId, String)> {
        match self.pending.remove(&token)? {
            PendingReply { partner, phase: ReplyPhase::Revealing(text) } => Some((partner, text)),
            generating => {
                self.pending.insert(token, generating);
                None
            }
        }
    }

    /// Whether a reply from `id` is being generated or typed.
    #[must_use]
    pub fn is_typing(&self, id: &EntityId) -> bool {
        self.pending.values().any(|p| &p.partner == id)
    }

    /// Drop every pending reply.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Number of replies still owed.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
