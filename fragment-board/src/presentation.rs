//! Render records for the canvas.
//!
//! One [`NodeView`] per entity. Chat fields are only filled on the node that
//! shows a bubble: the user's partner, the leader of an NPC pairing, or the
//! first member of an NPC pair that is in range but out of turns.

use std::collections::HashSet;

use fragment_core::types::{Entity, EntityId, Message, PairKey, Position};
use serde::Serialize;

use crate::autonomous::PairPhase;
use crate::board::Board;

/// A participant shown in a chat bubble header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatProfile {
    /// Entity id.
    pub id: EntityId,
    /// Display name.
    pub label: String,
    /// Avatar reference.
    pub avatar: String,
    /// Personality text.
    #[serde(rename = "trait")]
    pub trait_text: String,
}

impl From<&Entity> for ChatProfile {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id.clone(),
            label: entity.label.clone(),
            avatar: entity.avatar.clone(),
            trait_text: entity.trait_text.clone(),
        }
    }
}

/// Everything the renderer needs for one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    /// Entity id.
    pub id: EntityId,
    /// Canvas position.
    pub position: Position,
    /// Display name.
    pub label: String,
    /// Avatar reference.
    pub avatar: String,
    /// Avatar background colour.
    pub background_color: String,
    /// Whether this node shows a chat bubble.
    pub show_chat_bubble: bool,
    /// Messages of the shown conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    /// Current chat input (user chat only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_input: Option<String>,
    /// Whether the bubble accepts input; the renderer answers with `Send`.
    pub accepts_input: bool,
    /// Participants of the shown conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_profiles: Option<Vec<ChatProfile>>,
    /// Typing indicator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_typing: Option<bool>,
    /// Topic of an NPC conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_topic: Option<String>,
    /// Turns used in the current round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_message_count: Option<u32>,
    /// Turn budget per round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<u32>,
    /// Whether the bubble shows an NPC-to-NPC conversation.
    pub is_autonomous_chat: bool,
    /// Whether the bubble offers a restart (pair out of turns).
    pub can_restart: bool,
}

impl NodeView {
    fn plain(entity: &Entity) -> Self {
        Self {
            id: entity.id.clone(),
            position: entity.position,
            label: entity.label.clone(),
            avatar: entity.avatar.clone(),
            background_color: entity.background_color.clone(),
            show_chat_bubble: false,
            messages: None,
            chat_input: None,
            accepts_input: false,
            chat_profiles: None,
            is_typing: None,
            current_topic: None,
            current_message_count: None,
            max_messages: None,
            is_autonomous_chat: false,
            can_restart: false,
        }
    }
}

/// Build one view per entity, in board order.
#[must_use]
pub fn render(board: &Board) -> Vec<NodeView> {
    let capped_leaders = capped_bubbles(board);
    board
        .entities()
        .iter()
        .map(|entity| {
            let mut view = NodeView::plain(entity);
            if board.session().partner() == Some(&entity.id) {
                fill_user_chat(board, entity, &mut view);
            } else if let Some(context) = board.autonomous().context(&entity.id) {
                if context.is_leader {
                    let key = PairKey::new(&entity.id, &context.partner);
                    fill_autonomous_chat(board, &key, &mut view);
                }
            } else if let Some(key) = capped_leaders.iter().find(|k| k.first() == &entity.id || k.second() == &entity.id) {
                if leader_of(board, key) == Some(&entity.id) {
                    fill_autonomous_chat(board, key, &mut view);
                }
            }
            view
        })
        .collect()
}

fn fill_user_chat(board: &Board, partner: &Entity, view: &mut NodeView) {
    let user = board.entities().iter().find(|e| e.is_user());
    view.show_chat_bubble = true;
    view.messages = Some(board.user_conversation(&partner.id).to_vec());
    view.chat_input = Some(board.session().draft().to_string());
    view.accepts_input = true;
    view.chat_profiles = Some(user.into_iter().chain([partner]).map(ChatProfile::from).collect());
    view.is_typing = Some(board.session().is_typing(&partner.id));
}

fn fill_autonomous_chat(board: &Board, key: &PairKey, view: &mut NodeView) {
    let conversations = board.conversations();
    let max = board.autonomous().max_messages();
    let count = conversations.turn_count(key);
    let profiles = [key.first(), key.second()]
        .into_iter()
        .filter_map(|id| board.entity(id))
        .map(ChatProfile::from)
        .collect();

    view.show_chat_bubble = true;
    view.is_autonomous_chat = true;
    view.messages = Some(conversations.get(key).map(|c| c.messages.clone()).unwrap_or_default());
    view.chat_profiles = Some(profiles);
    view.is_typing = Some(
        board
            .autonomous()
            .pairing(key)
            .is_some_and(|p| matches!(p.phase, PairPhase::AwaitingLine { .. })),
    );
    view.current_topic = conversations.topic(key).map(str::to_string);
    view.current_message_count = Some(count);
    view.max_messages = Some(max);
    view.can_restart = board.autonomous().pairing(key).is_none() && count >= max;
}

/// In-range NPC pairs that ran out of turns and whose members are free.
fn capped_bubbles(board: &Board) -> Vec<PairKey> {
    let relationships = board.relationships();
    let partner = board.session().partner();
    let mut taken: HashSet<&EntityId> = HashSet::new();
    let mut out = Vec::new();
    for rel in relationships.npc_pairs() {
        let free = |id: &EntityId| {
            !relationships.is_near_user(id) && board.autonomous().context(id).is_none() && partner != Some(id)
        };
        if !free(&rel.a) || !free(&rel.b) || taken.contains(&rel.a) || taken.contains(&rel.b) {
            continue;
        }
        let key = PairKey::new(&rel.a, &rel.b);
        if board.autonomous().is_capped(board.conversations(), &key) {
            taken.insert(&rel.a);
            taken.insert(&rel.b);
            out.push(key);
        }
    }
    out
}

/// The member that appears first in evaluation order.
fn leader_of<'a>(board: &'a Board, key: &PairKey) -> Option<&'a EntityId> {
    board
        .entities()
        .iter()
        .map(|e| &e.id)
        .find(|id| *id == key.first() || *id == key.second())
}
