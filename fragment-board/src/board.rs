//! The board: one object owning every piece of conversation state.
//!
//! The board is a synchronous state machine. Its host feeds it
//!
//! - [`Board::handle`] for user and renderer input,
//! - [`Board::advance`] when the clock passes [`Board::next_deadline`],
//! - [`Board::complete`] when a generation job finishes,
//!
//! and performs the [`Effect`]s each call returns. All proximity-driven
//! transitions for an input finish before the call returns, so a completion
//! always meets a fully reconciled board. Completions are matched by
//! [`RequestToken`]; anything the board no longer expects is dropped.

use std::collections::HashMap;

use fragment_core::FragmentConfig;
use fragment_core::conversation::{ConversationSnapshot, ConversationStore};
use fragment_core::persistence::{
    self, CONVERSATIONS_KEY, ENTITIES_KEY, MESSAGE_COUNTS_KEY, ROUNDS_KEY, SnapshotStore, TOPICS_KEY,
};
use fragment_core::proximity::{self, RelationshipSet};
use fragment_core::types::{self, Entity, EntityId, Message, Millis, PairKey, Position};
use fragment_llm::types::{HistoryLine, LineRequest, ReplyRequest, Speaker};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::autonomous::{self, AutonomousOrchestrator, PairPhase, PairingId};
use crate::dialogue;
use crate::events::{BoardEvent, Completion, Effect, GenerationJob, RequestToken};
use crate::presentation::{self, NodeView};
use crate::scheduler::{Scheduler, TimerKey};
use crate::session::ChatSession;

/// Prefix shared by every persisted conversation map.
const CONVERSATION_PREFIX: &str = "fragment_autonomous_";

/// What an outstanding request will be used for.
#[derive(Debug, Clone)]
enum Pending {
    Topic { key: PairKey },
    Line { key: PairKey, pairing: PairingId, sender: EntityId },
    Reply,
}

/// Entities, conversations, chat session, NPC pairings and timers.
pub struct Board {
    config: FragmentConfig,
    entities: Vec<Entity>,
    relationships: RelationshipSet,
    conversations: ConversationStore,
    session: ChatSession,
    autonomous: AutonomousOrchestrator,
    scheduler: Scheduler,
    pending: HashMap<RequestToken, Pending>,
    next_token: u64,
    rng: StdRng,
    store: Option<Box<dyn SnapshotStore>>,
}

impl Board {
    /// A board holding `entities`, without persistence.
    ///
    /// The user avatar is added at the origin if missing; duplicate ids keep
    /// their first occurrence; empty ids and ids containing `:` are dropped.
    #[must_use]
    pub fn new(config: FragmentConfig, entities: Vec<Entity>) -> Self {
        let autonomous = AutonomousOrchestrator::new(&config.autonomous);
        let entities = normalize(entities);
        let relationships = proximity::evaluate(&entities, config.proximity.threshold);
        Self {
            config,
            entities,
            relationships,
            conversations: ConversationStore::new(),
            session: ChatSession::new(),
            autonomous,
            scheduler: Scheduler::new(),
            pending: HashMap::new(),
            next_token: 0,
            rng: StdRng::from_entropy(),
            store: None,
        }
    }

    /// Load entities and conversations from `store`, then keep saving to it.
    ///
    /// Missing or unreadable maps fall back to `default_entities` and empty
    /// conversations.
    #[must_use]
    pub fn restore(config: FragmentConfig, store: Box<dyn SnapshotStore>, default_entities: Vec<Entity>) -> Self {
        let entities = persistence::load_or_default(store.as_ref(), ENTITIES_KEY, default_entities);
        let snapshot = ConversationSnapshot {
            conversations: persistence::load_or_default(store.as_ref(), CONVERSATIONS_KEY, HashMap::new()),
            topics: persistence::load_or_default(store.as_ref(), TOPICS_KEY, HashMap::new()),
            message_counts: persistence::load_or_default(store.as_ref(), MESSAGE_COUNTS_KEY, HashMap::new()),
            rounds: persistence::load_or_default(store.as_ref(), ROUNDS_KEY, HashMap::new()),
        };
        let counted: Vec<PairKey> = snapshot.message_counts.keys().cloned().collect();

        let mut board = Self::new(config, entities);
        board.conversations = ConversationStore::restore(snapshot);
        board.autonomous.mark_capped_exhausted(&board.conversations, counted);
        info!(
            entities = board.entities.len(),
            conversations = board.conversations.len(),
            "Board restored from snapshot store"
        );
        board.store = Some(store);
        board
    }

    /// Use a fixed random source (intervals, colours).
    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Save to `store` from now on.
    #[must_use]
    pub fn with_store(mut self, store: Box<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Initial reconcile. Call once before feeding events.
    pub fn start(&mut self, now: Millis) -> Vec<Effect> {
        self.refresh(now)
    }

    // -----------------------------------------------------------------------
    // Inputs
    // -----------------------------------------------------------------------

    /// Apply one input.
    pub fn handle(&mut self, event: BoardEvent, now: Millis) -> Vec<Effect> {
        match event {
            BoardEvent::MoveUser { dx, dy } => {
                let step = self.config.proximity.grid_size;
                if let Some(user) = self.entities.iter_mut().find(|e| e.is_user()) {
                    user.position = user.position.stepped(dx, dy, step);
                }
                self.persist_entities();
                self.refresh(now)
            }
            BoardEvent::Drag { id, position } => self.move_entity(&id, position, false, now),
            BoardEvent::DragStop { id, position } => self.move_entity(&id, position, true, now),
            BoardEvent::Click { id } => {
                self.session.click(&id, &self.relationships);
                Vec::new()
            }
            BoardEvent::PaneClick { position } => {
                vec![Effect::PlaceCharacter { position: position.snapped(self.config.proximity.grid_size) }]
            }
            BoardEvent::AddCharacter { label, trait_text, avatar, position } => {
                self.add_character(&label, trait_text, avatar, position, now);
                self.refresh(now)
            }
            BoardEvent::RemoveCharacter { id } => self.remove_character(&id, now),
            BoardEvent::ChatInput(text) => {
                self.session.set_draft(text);
                Vec::new()
            }
            BoardEvent::Send => self.send(now),
            BoardEvent::RestartAutonomous { a, b } => self.restart_autonomous(&a, &b, now),
            BoardEvent::ClearConversations => self.clear_conversations(now),
        }
    }

    /// Fire every timer due at `now`.
    pub fn advance(&mut self, now: Millis) -> Vec<Effect> {
        let mut effects = Vec::new();
        while let Some((timer, _)) = self.scheduler.pop_due(now) {
            match timer {
                TimerKey::Turn(key) => effects.extend(self.fire_turn(&key, now)),
                TimerKey::Reveal(token) => self.reveal_reply(token, now),
            }
        }
        effects
    }

    /// Apply a finished generation job.
    pub fn complete(&mut self, completion: Completion, now: Millis) -> Vec<Effect> {
        let Completion { token, text, source } = completion;
        let Some(pending) = self.pending.remove(&token) else {
            debug!(%token, "Discarding completion nobody is waiting for");
            return Vec::new();
        };
        debug!(%token, ?source, "Generation completed");

        match pending {
            Pending::Topic { key } => {
                if self.conversations.set_topic(&key, text) {
                    self.persist_conversations();
                }
                if self.autonomous.pairing(&key).is_some_and(|p| p.phase == PairPhase::AwaitingTopic) {
                    self.schedule_turn(&key, now);
                }
            }
            Pending::Line { key, pairing, sender } => self.commit_line(&key, pairing, token, sender, text, now),
            Pending::Reply => {
                if let Some(partner) = self.session.reply_ready(token, text.clone()) {
                    let delay = dialogue::typing_delay(&text, &self.config.chat);
                    debug!(%token, partner = %partner, delay, "Reply typing");
                    self.scheduler.schedule(TimerKey::Reveal(token), now.saturating_add(to_millis(delay)));
                }
            }
        }
        Vec::new()
    }

    /// Cancel every timer and forget every outstanding request.
    ///
    /// Returns the tokens that will no longer be accepted.
    pub fn shutdown(&mut self) -> Vec<RequestToken> {
        self.scheduler.clear();
        self.session.clear_pending();
        let tokens: Vec<RequestToken> = self.pending.drain().map(|(t, _)| t).collect();
        info!(abandoned = tokens.len(), "Board shut down");
        tokens
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Board configuration.
    #[must_use]
    pub fn config(&self) -> &FragmentConfig {
        &self.config
    }

    /// Entities in board order; the user is always present.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Look up an entity.
    #[must_use]
    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| &e.id == id)
    }

    /// Relationships as of the last reconcile.
    #[must_use]
    pub fn relationships(&self) -> &RelationshipSet {
        &self.relationships
    }

    /// Every conversation.
    #[must_use]
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// User chat session.
    #[must_use]
    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// NPC pairings.
    #[must_use]
    pub fn autonomous(&self) -> &AutonomousOrchestrator {
        &self.autonomous
    }

    /// Timer table.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// When [`Board::advance`] next has work.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Millis> {
        self.scheduler.next_deadline()
    }

    /// Number of requests awaiting completion.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Conversation between `npc` and the user.
    #[must_use]
    pub fn user_conversation(&self, npc: &EntityId) -> &[Message] {
        self.conversations
            .get(&PairKey::new(npc, &EntityId::user()))
            .map_or(&[], |c| c.messages.as_slice())
    }

    /// Render records for every entity.
    #[must_use]
    pub fn views(&self) -> Vec<NodeView> {
        presentation::render(self)
    }

    // -----------------------------------------------------------------------
    // Reconcile
    // -----------------------------------------------------------------------

    fn refresh(&mut self, now: Millis) -> Vec<Effect> {
        self.relationships = proximity::evaluate(&self.entities, self.config.proximity.threshold);
        self.session.update(&self.relationships);

        let diff = self.autonomous.reconcile(&self.relationships, &self.conversations);
        for (key, _) in &diff.ended {
            self.scheduler.cancel(&TimerKey::Turn(key.clone()));
        }
        for key in &diff.new_rounds {
            info!(pair = %key, "Starting a new round of an exhausted conversation");
            self.conversations.restart_round(key);
        }
        if !diff.new_rounds.is_empty() {
            self.persist_conversations();
        }

        let mut effects = Vec::new();
        for key in diff.started {
            effects.extend(self.begin_pairing(&key, now));
        }
        effects
    }

    fn move_entity(&mut self, id: &EntityId, position: Position, persist: bool, now: Millis) -> Vec<Effect> {
        let Some(entity) = self.entities.iter_mut().find(|e| &e.id == id) else {
            debug!(entity = %id, "Ignoring move of unknown entity");
            return Vec::new();
        };
        entity.position = position;
        if persist {
            self.persist_entities();
        }
        self.refresh(now)
    }

    fn add_character(&mut self, label: &str, trait_text: String, avatar: String, position: Position, now: Millis) {
        let label = match label.trim() {
            "" => "Unnamed",
            trimmed => trimmed,
        };
        let mut id = EntityId::generate(label, now);
        let mut suffix = 1;
        while self.entity(&id).is_some() {
            suffix += 1;
            id = EntityId::new(format!("{}-{suffix}", EntityId::generate(label, now)));
        }
        let entity = Entity::new(id.clone(), label, position.snapped(self.config.proximity.grid_size))
            .with_trait(trait_text)
            .with_avatar(avatar)
            .with_background(types::random_background(&mut self.rng, 0.5));
        info!(entity = %id, label, "Character added");
        self.entities.push(entity);
        self.persist_entities();
    }

    fn remove_character(&mut self, id: &EntityId, now: Millis) -> Vec<Effect> {
        if id.is_user() {
            debug!("The user avatar cannot be removed");
            return Vec::new();
        }
        let before = self.entities.len();
        self.entities.retain(|e| &e.id != id);
        if self.entities.len() == before {
            debug!(entity = %id, "Ignoring removal of unknown entity");
            return Vec::new();
        }
        info!(entity = %id, "Character removed");
        self.session.forget(id);
        self.persist_entities();
        self.refresh(now)
    }

    // -----------------------------------------------------------------------
    // User chat
    // -----------------------------------------------------------------------

    fn send(&mut self, now: Millis) -> Vec<Effect> {
        let Some(partner) = self.session.partner().and_then(|id| self.entity(id)).cloned() else {
            debug!("Send rejected: no chat partner");
            return Vec::new();
        };
        let token = self.next_token();
        let Some(sent) = self.session.take_send(token) else {
            debug!("Send rejected: empty draft");
            return Vec::new();
        };

        let key = PairKey::new(&partner.id, &EntityId::user());
        self.conversations
            .append_message(&key, Message::new(EntityId::user(), sent.text.clone(), now));
        self.persist_conversations();

        let history = self
            .conversations
            .get(&key)
            .map(|c| c.messages.iter().map(history_line).collect())
            .unwrap_or_default();
        let job = GenerationJob::Reply {
            request: ReplyRequest { character: speaker(&partner), history },
            personality: partner.personality(),
            trait_text: partner.trait_text.clone(),
            user_message: sent.text,
        };
        self.pending.insert(token, Pending::Reply);
        vec![Effect::Generate { token, job }]
    }

    fn reveal_reply(&mut self, token: RequestToken, now: Millis) {
        let Some((partner, text)) = self.session.reveal(token) else {
            return;
        };
        let key = PairKey::new(&partner, &EntityId::user());
        self.conversations.append_message(&key, Message::new(partner, text, now));
        self.persist_conversations();
    }

    // -----------------------------------------------------------------------
    // Autonomous chat
    // -----------------------------------------------------------------------

    fn begin_pairing(&mut self, key: &PairKey, now: Millis) -> Vec<Effect> {
        self.conversations.get_or_create(key);
        if self.conversations.topic(key).is_some() {
            self.schedule_turn(key, now);
            return Vec::new();
        }
        self.autonomous.set_phase(key, PairPhase::AwaitingTopic);
        if self.pending.values().any(|p| matches!(p, Pending::Topic { key: k } if k == key)) {
            return Vec::new();
        }
        let (Some(first), Some(second)) = (self.entity(key.first()).cloned(), self.entity(key.second()).cloned())
        else {
            return Vec::new();
        };
        let token = self.next_token();
        self.pending.insert(token, Pending::Topic { key: key.clone() });
        vec![Effect::Generate {
            token,
            job: GenerationJob::Topic {
                first: speaker(&first),
                second: speaker(&second),
                personalities: [first.personality(), second.personality()],
            },
        }]
    }

    fn schedule_turn(&mut self, key: &PairKey, now: Millis) {
        let delay = autonomous::turn_delay(&mut self.rng, &self.config.autonomous);
        self.scheduler.schedule(TimerKey::Turn(key.clone()), now.saturating_add(to_millis(delay)));
        self.autonomous.set_phase(key, PairPhase::Waiting);
        debug!(pair = %key, delay, "Next autonomous turn scheduled");
    }

    fn fire_turn(&mut self, key: &PairKey, now: Millis) -> Vec<Effect> {
        let Some(pairing) = self.autonomous.pairing(key) else {
            debug!(pair = %key, "Turn timer for an ended pairing ignored");
            return Vec::new();
        };
        if pairing.phase != PairPhase::Waiting {
            return Vec::new();
        }
        let pairing_id = pairing.id;

        let count = self.conversations.turn_count(key);
        if count >= self.autonomous.max_messages() {
            self.autonomous.end_capped(key);
            return Vec::new();
        }
        let sender_id = key.member(count).clone();
        let Some(receiver_id) = key.other(&sender_id).cloned() else {
            return Vec::new();
        };
        let (Some(sender), Some(receiver)) = (self.entity(&sender_id).cloned(), self.entity(&receiver_id).cloned())
        else {
            return Vec::new();
        };

        let window = self.config.autonomous.history_window;
        let history = self
            .conversations
            .get(key)
            .map(|c| c.recent(window).iter().map(history_line).collect())
            .unwrap_or_default();
        let topic = self
            .conversations
            .topic(key)
            .unwrap_or(self.config.autonomous.default_topic.as_str())
            .to_string();

        let token = self.next_token();
        self.pending.insert(token, Pending::Line { key: key.clone(), pairing: pairing_id, sender: sender_id });
        self.autonomous.set_phase(key, PairPhase::AwaitingLine { token });
        debug!(pair = %key, turn = count + 1, sender = %sender.id, "Requesting autonomous line");
        vec![Effect::Generate {
            token,
            job: GenerationJob::Line {
                request: LineRequest { sender: speaker(&sender), receiver: speaker(&receiver), topic, history },
                personality: sender.personality(),
            },
        }]
    }

    fn commit_line(
        &mut self,
        key: &PairKey,
        pairing: PairingId,
        token: RequestToken,
        sender: EntityId,
        text: String,
        now: Millis,
    ) {
        let current = self
            .autonomous
            .pairing(key)
            .is_some_and(|p| p.id == pairing && p.phase == PairPhase::AwaitingLine { token });
        if !current {
            debug!(pair = %key, %token, "Discarding line for a pairing that moved on");
            return;
        }

        self.conversations.append_message(key, Message::new(sender, text, now));
        let count = self.conversations.record_turn(key);
        self.persist_conversations();

        if count >= self.autonomous.max_messages() {
            info!(pair = %key, turns = count, "Autonomous conversation reached its turn budget");
            self.scheduler.cancel(&TimerKey::Turn(key.clone()));
            self.autonomous.end_capped(key);
        } else {
            self.schedule_turn(key, now);
        }
    }

    fn restart_autonomous(&mut self, a: &EntityId, b: &EntityId, now: Millis) -> Vec<Effect> {
        if a == b || a.is_user() || b.is_user() || self.entity(a).is_none() || self.entity(b).is_none() {
            debug!(a = %a, b = %b, "Ignoring restart for an invalid pair");
            return Vec::new();
        }
        let key = PairKey::new(a, b);
        if !self.autonomous.is_capped(&self.conversations, &key) {
            return Vec::new();
        }
        info!(pair = %key, "Autonomous conversation restarted");
        self.conversations.restart_round(&key);
        self.autonomous.release(&key);
        self.persist_conversations();
        self.refresh(now)
    }

    fn clear_conversations(&mut self, now: Millis) -> Vec<Effect> {
        for key in self.autonomous.clear() {
            self.scheduler.cancel(&TimerKey::Turn(key));
        }
        let reveals = self.scheduler.cancel_where(|timer| matches!(timer, TimerKey::Reveal(_)));
        debug!(reveals, "Cancelled pending reply reveals");
        self.pending.clear();
        self.session.clear_pending();
        self.conversations.clear();
        if let Some(store) = &self.store {
            if let Err(e) = store.clear_prefix(CONVERSATION_PREFIX) {
                warn!(error = %e, "Failed to clear stored conversations");
            }
        }
        info!("All conversations cleared");
        self.refresh(now)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    fn persist_entities(&self) {
        let Some(store) = &self.store else { return };
        if let Err(e) = persistence::save_json(store.as_ref(), ENTITIES_KEY, &self.entities) {
            warn!(error = %e, "Failed to save entities");
        }
    }

    fn persist_conversations(&self) {
        let Some(store) = &self.store else { return };
        let snapshot = self.conversations.snapshot();
        let results = [
            persistence::save_json(store.as_ref(), CONVERSATIONS_KEY, &snapshot.conversations),
            persistence::save_json(store.as_ref(), TOPICS_KEY, &snapshot.topics),
            persistence::save_json(store.as_ref(), MESSAGE_COUNTS_KEY, &snapshot.message_counts),
            persistence::save_json(store.as_ref(), ROUNDS_KEY, &snapshot.rounds),
        ];
        for e in results.into_iter().filter_map(Result::err) {
            warn!(error = %e, "Failed to save conversations");
        }
    }

    fn next_token(&mut self) -> RequestToken {
        self.next_token += 1;
        RequestToken(self.next_token)
    }
}

/// Exactly one user avatar, no duplicate or malformed ids.
fn normalize(entities: Vec<Entity>) -> Vec<Entity> {
    let mut out: Vec<Entity> = Vec::with_capacity(entities.len() + 1);
    for entity in entities {
        if !entity.id.is_well_formed() {
            warn!(entity = %entity.id, "Dropping entity with malformed id");
            continue;
        }
        if out.iter().any(|e| e.id == entity.id) {
            warn!(entity = %entity.id, "Dropping duplicate entity id");
            continue;
        }
        out.push(entity);
    }
    if !out.iter().any(Entity::is_user) {
        out.insert(0, Entity::user(Position::new(0, 0)));
    }
    out
}

fn speaker(entity: &Entity) -> Speaker {
    Speaker::new(entity.id.as_str(), entity.label.clone(), entity.trait_text.clone())
}

fn history_line(message: &Message) -> HistoryLine {
    HistoryLine {
        speaker: message.sender.to_string(),
        text: message.text.clone(),
        by_user: message.sender.is_user(),
    }
}

fn to_millis(ms: u64) -> Millis {
    Millis::try_from(ms).unwrap_or(Millis::MAX)
}
