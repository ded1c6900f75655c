//! End-to-end board behaviour driven with a scripted generator and a
//! hand-advanced clock.

use std::collections::HashSet;
use std::sync::Arc;

use fragment_board::autonomous::PairPhase;
use fragment_board::session::SessionState;
use fragment_board::{Board, BoardEvent, Completion, Effect, GenerationJob, RequestToken};
use fragment_core::FragmentConfig;
use fragment_core::config::CapPolicy;
use fragment_core::persistence::{
    CONVERSATIONS_KEY, ENTITIES_KEY, MemorySnapshotStore, SnapshotStore, TOPICS_KEY,
};
use fragment_core::types::{Entity, EntityId, Millis, PairKey, Position};
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Store handle that can be shared between two boards in one test.
#[derive(Clone, Default)]
struct SharedStore(Arc<MemorySnapshotStore>);

impl SnapshotStore for SharedStore {
    fn load(&self, key: &str) -> fragment_core::error::Result<Option<Vec<u8>>> {
        self.0.load(key)
    }

    fn save(&self, key: &str, data: &[u8]) -> fragment_core::error::Result<()> {
        self.0.save(key, data)
    }

    fn clear_prefix(&self, prefix: &str) -> fragment_core::error::Result<usize> {
        self.0.clear_prefix(prefix)
    }
}

struct Harness {
    board: Board,
    now: Millis,
    inflight: Vec<(RequestToken, GenerationJob)>,
}

impl Harness {
    fn new(config: FragmentConfig, entities: Vec<Entity>) -> Self {
        Self::from_board(Board::new(config, entities))
    }

    fn from_board(board: Board) -> Self {
        let mut harness = Self { board: board.with_rng(StdRng::seed_from_u64(7)), now: 0, inflight: Vec::new() };
        let effects = harness.board.start(harness.now);
        harness.apply(effects);
        harness
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            if let Effect::Generate { token, job } = effect {
                self.inflight.push((token, job));
            }
        }
    }

    fn handle(&mut self, event: BoardEvent) {
        let effects = self.board.handle(event, self.now);
        self.apply(effects);
    }

    fn drag(&mut self, id: &str, x: i32, y: i32) {
        self.handle(BoardEvent::DragStop { id: EntityId::from(id), position: Position::new(x, y) });
    }

    fn complete(&mut self, token: RequestToken, text: &str) {
        let effects = self.board.complete(Completion::generated(token, text), self.now);
        self.apply(effects);
    }

    /// Answer every in-flight job with scripted text.
    fn answer_all(&mut self) {
        while !self.inflight.is_empty() {
            for (token, job) in std::mem::take(&mut self.inflight) {
                let text = scripted(&job);
                self.complete(token, &text);
            }
        }
    }

    fn tick(&mut self, ms: Millis) {
        self.now += ms;
        let effects = self.board.advance(self.now);
        self.apply(effects);
    }

    /// Answer and fire timers until nothing is left to do.
    fn settle(&mut self) {
        for _ in 0..500 {
            self.answer_all();
            let Some(deadline) = self.board.next_deadline() else { return };
            self.now = self.now.max(deadline);
            let effects = self.board.advance(self.now);
            self.apply(effects);
        }
        panic!("board never settled");
    }

    fn topic_requests(&self) -> usize {
        self.inflight.iter().filter(|(_, job)| matches!(job, GenerationJob::Topic { .. })).count()
    }
}

fn scripted(job: &GenerationJob) -> String {
    match job {
        GenerationJob::Topic { .. } => "second breakfast".to_string(),
        GenerationJob::Line { request, .. } => {
            format!("{} on {} ({})", request.sender.name, request.topic, request.history.len())
        }
        GenerationJob::Reply { request, .. } => format!("{} waves back", request.character.name),
    }
}

fn config(cap_policy: CapPolicy) -> FragmentConfig {
    let mut config = FragmentConfig::default();
    config.persistence.backend = "none".into();
    config.autonomous.interval_min_ms = 1000;
    config.autonomous.interval_max_ms = 1000;
    config.autonomous.cap_policy = cap_policy;
    config
}

fn id(s: &str) -> EntityId {
    EntityId::from(s)
}

fn npc(name: &str, x: i32, y: i32) -> Entity {
    Entity::new(name, name, Position::new(x, y)).with_trait("Brave")
}

fn user_at(x: i32, y: i32) -> Entity {
    Entity::user(Position::new(x, y))
}

fn frodo_gandalf() -> Vec<Entity> {
    vec![user_at(1000, 1000), npc("frodo", 0, 0), npc("gandalf", 60, 0)]
}

fn pair() -> PairKey {
    PairKey::new(&id("frodo"), &id("gandalf"))
}

/// Every structural rule that must hold after any input.
fn assert_consistent(board: &Board) {
    let rels = board.relationships();
    let mut seen = HashSet::new();
    for pairing in board.autonomous().pairings() {
        let key = &pairing.key;
        for member in [key.first(), key.second()] {
            assert!(seen.insert(member.clone()), "{member} is in two pairings");
            assert!(!rels.is_near_user(member), "{member} pairs while the user is near");
            let ctx = board.autonomous().context(member).expect("member has context");
            assert_eq!(Some(&ctx.partner), key.other(member));
        }
        let in_range = rels.npc_pairs().any(|r| PairKey::new(&r.a, &r.b) == *key);
        assert!(in_range, "pairing {key} is out of range");
    }
    if let Some(partner) = board.session().partner() {
        assert!(rels.is_near_user(partner), "partner {partner} is out of range");
    }
}

// ---------------------------------------------------------------------------
// User chat
// ---------------------------------------------------------------------------

#[test]
fn npc_next_to_user_becomes_partner() {
    let h = Harness::new(config(CapPolicy::default()), vec![user_at(0, 0), npc("frodo", 50, 0)]);
    assert_eq!(h.board.relationships().user_distance(&id("frodo")), Some(50.0));
    assert_eq!(h.board.session().state(), &SessionState::Engaged(id("frodo")));
    assert!(h.board.autonomous().is_empty());
}

#[test]
fn partner_stays_until_it_leaves_range_or_is_clicked() {
    let mut h = Harness::new(
        config(CapPolicy::default()),
        vec![user_at(0, 0), npc("frodo", 100, 0), npc("sam", 500, 0)],
    );
    h.drag("sam", 10, 0);
    assert_eq!(h.board.session().partner(), Some(&id("frodo")), "closer NPC does not steal the chat");

    h.handle(BoardEvent::Click { id: id("sam") });
    assert_eq!(h.board.session().partner(), Some(&id("sam")));

    h.drag("sam", 800, 0);
    assert_eq!(h.board.session().partner(), Some(&id("frodo")));
    h.handle(BoardEvent::MoveUser { dx: -10, dy: 0 });
    assert_eq!(h.board.session().state(), &SessionState::Idle);
}

#[test]
fn reply_is_typed_then_revealed() {
    let mut h = Harness::new(config(CapPolicy::default()), vec![user_at(0, 0), npc("frodo", 50, 0)]);
    h.handle(BoardEvent::ChatInput("  hello  ".into()));
    h.handle(BoardEvent::Send);
    assert_eq!(h.board.session().draft(), "");
    assert_eq!(h.inflight.len(), 1);

    h.answer_all();
    assert!(h.board.session().is_typing(&id("frodo")));
    assert_eq!(h.board.user_conversation(&id("frodo")).len(), 1);

    h.tick(2500);
    let messages = h.board.user_conversation(&id("frodo"));
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, EntityId::user());
    assert_eq!(messages[0].text, "hello");
    assert_eq!(messages[1].sender, id("frodo"));
    assert_eq!(messages[1].text, "frodo waves back");
    assert!(!h.board.session().is_typing(&id("frodo")));
}

#[test]
fn reply_job_marks_the_users_lines() {
    let mut h = Harness::new(config(CapPolicy::default()), vec![user_at(0, 0), npc("frodo", 50, 0)]);
    h.handle(BoardEvent::ChatInput("hello".into()));
    h.handle(BoardEvent::Send);
    let [(_, GenerationJob::Reply { request, .. })] = h.inflight.as_slice() else {
        panic!("expected one reply job, got {:?}", h.inflight);
    };
    assert_eq!(request.history.len(), 1);
    assert!(request.history[0].by_user);
    assert_eq!(request.history[0].text, "hello");
}

#[test]
fn blank_or_partnerless_send_does_nothing() {
    let mut h = Harness::new(config(CapPolicy::default()), vec![user_at(0, 0), npc("frodo", 500, 0)]);
    h.handle(BoardEvent::ChatInput("anyone?".into()));
    h.handle(BoardEvent::Send);
    assert!(h.inflight.is_empty());
    assert_eq!(h.board.session().draft(), "anyone?");

    h.drag("frodo", 50, 0);
    h.handle(BoardEvent::ChatInput("   ".into()));
    h.handle(BoardEvent::Send);
    assert!(h.inflight.is_empty());
    assert!(h.board.user_conversation(&id("frodo")).is_empty());
}

#[test]
fn reply_lands_with_original_partner_after_it_walks_away() {
    let mut h = Harness::new(config(CapPolicy::default()), vec![user_at(0, 0), npc("frodo", 50, 0)]);
    h.handle(BoardEvent::ChatInput("wait for me".into()));
    h.handle(BoardEvent::Send);

    h.drag("frodo", 900, 0);
    assert_eq!(h.board.session().state(), &SessionState::Idle);

    h.answer_all();
    h.tick(2500);
    let messages = h.board.user_conversation(&id("frodo"));
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].sender, id("frodo"));
    assert!(h.board.views().iter().all(|v| !v.show_chat_bubble));
}

#[test]
fn late_completion_is_dropped() {
    let mut h = Harness::new(config(CapPolicy::default()), vec![user_at(0, 0), npc("frodo", 50, 0)]);
    h.handle(BoardEvent::ChatInput("hi".into()));
    h.handle(BoardEvent::Send);
    let (token, _) = h.inflight[0].clone();
    h.answer_all();
    h.complete(token, "a second answer");
    h.complete(RequestToken(9_999), "nobody asked");
    h.tick(2500);
    assert_eq!(h.board.user_conversation(&id("frodo")).len(), 2);
}

// ---------------------------------------------------------------------------
// Autonomous chat
// ---------------------------------------------------------------------------

#[test]
fn npcs_in_range_start_talking() {
    let h = Harness::new(config(CapPolicy::default()), frodo_gandalf());
    let frodo = h.board.autonomous().context(&id("frodo")).expect("frodo paired");
    let gandalf = h.board.autonomous().context(&id("gandalf")).expect("gandalf paired");
    assert_eq!(frodo.partner, id("gandalf"));
    assert!(frodo.is_leader);
    assert!(!gandalf.is_leader);
    assert!(h.board.relationships().near_user().next().is_none());
    assert_eq!(h.topic_requests(), 1);
}

#[test]
fn ids_containing_the_pair_separator_are_dropped() {
    let h = Harness::new(
        config(CapPolicy::default()),
        vec![user_at(1000, 1000), npc("frodo", 0, 0), npc("frodo:x", 60, 0), npc("", 30, 0)],
    );
    let ids: Vec<&str> = h.board.entities().iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["you", "frodo"]);
    assert!(h.board.autonomous().is_empty());
    assert_eq!(h.topic_requests(), 0);
}

#[test]
fn conversation_stops_at_the_turn_cap() {
    let mut h = Harness::new(config(CapPolicy::default()), frodo_gandalf());
    h.settle();

    let conversation = h.board.conversations().get(&pair()).expect("conversation");
    assert_eq!(conversation.messages.len(), 10);
    assert_eq!(conversation.turn_count, 10);
    assert_eq!(conversation.topic.as_deref(), Some("second breakfast"));
    for (i, message) in conversation.messages.iter().enumerate() {
        assert_eq!(&message.sender, pair().member(u32::try_from(i).expect("small")), "turns alternate");
    }
    assert!(h.board.autonomous().context(&id("frodo")).is_none());
    assert!(h.board.autonomous().context(&id("gandalf")).is_none());
    assert_eq!(h.board.next_deadline(), None);
    assert_eq!(h.board.pending_requests(), 0);

    h.tick(60_000);
    assert_eq!(h.board.conversations().turn_count(&pair()), 10);
}

#[test]
fn history_window_limits_context() {
    let mut h = Harness::new(config(CapPolicy::default()), frodo_gandalf());
    h.settle();
    let last = &h.board.conversations().get(&pair()).expect("conversation").messages[9];
    assert!(last.text.ends_with("(2)"), "{}", last.text);
}

#[test]
fn user_approach_preempts_npc_chat() {
    let mut h = Harness::new(config(CapPolicy::default()), frodo_gandalf());
    h.answer_all();
    assert!(h.board.next_deadline().is_some());

    h.handle(BoardEvent::DragStop { id: EntityId::user(), position: Position::new(0, 50) });
    assert!(h.board.autonomous().is_empty());
    assert_eq!(h.board.session().partner(), Some(&id("frodo")));
    assert_eq!(h.board.next_deadline(), None, "turn timer cancelled");
    assert_consistent(&h.board);
}

#[test]
fn separation_cancels_timer_and_drops_in_flight_line() {
    let mut h = Harness::new(config(CapPolicy::default()), frodo_gandalf());
    h.answer_all();
    h.tick(1000);
    assert_eq!(h.inflight.len(), 1, "line requested");

    h.drag("gandalf", 600, 0);
    assert!(h.board.autonomous().is_empty());
    h.answer_all();
    assert_eq!(h.board.conversations().turn_count(&pair()), 0);
    assert!(h.board.conversations().get(&pair()).is_some_and(|c| c.messages.is_empty()));
    assert_eq!(h.board.next_deadline(), None);
}

#[test]
fn topic_is_requested_once_and_kept() {
    let mut h = Harness::new(config(CapPolicy::default()), frodo_gandalf());
    assert_eq!(h.topic_requests(), 1);

    h.drag("gandalf", 600, 0);
    h.drag("gandalf", 60, 0);
    assert_eq!(h.topic_requests(), 1, "no duplicate request while one is in flight");
    let pairing = h.board.autonomous().pairing(&pair()).expect("re-paired");
    assert_eq!(pairing.phase, PairPhase::AwaitingTopic);

    h.answer_all();
    assert_eq!(h.board.conversations().topic(&pair()), Some("second breakfast"));
    assert_eq!(h.board.autonomous().pairing(&pair()).map(|p| p.phase), Some(PairPhase::Waiting));

    h.drag("gandalf", 600, 0);
    h.drag("gandalf", 60, 0);
    assert_eq!(h.topic_requests(), 0, "known topic is reused");
    assert!(h.board.next_deadline().is_some());
}

#[test]
fn three_npcs_pair_without_overlap() {
    let mut h = Harness::new(
        config(CapPolicy::default()),
        vec![user_at(1000, 1000), npc("a", 0, 0), npc("b", 60, 0), npc("c", 400, 0)],
    );
    assert_eq!(h.board.autonomous().len(), 1);

    // c is in range of both; the last pair in evaluation order wins.
    h.drag("c", 100, 0);
    assert_eq!(h.board.autonomous().len(), 1);
    assert_consistent(&h.board);
    assert!(h.board.autonomous().pairing(&PairKey::new(&id("b"), &id("c"))).is_some());
    assert!(h.board.autonomous().context(&id("a")).is_none());

    h.drag("a", 600, 0);
    assert_consistent(&h.board);
    assert_eq!(h.board.autonomous().context(&id("b")).map(|c| c.partner), Some(id("c")));
}

#[test]
fn permanently_ended_pair_never_talks_again() {
    let mut h = Harness::new(config(CapPolicy::PermanentlyEnded), frodo_gandalf());
    h.settle();
    h.drag("gandalf", 600, 0);
    h.drag("gandalf", 60, 0);
    assert!(h.board.autonomous().is_empty());
    assert!(h.inflight.is_empty());

    let view = h.board.views().into_iter().find(|v| v.id == id("frodo")).expect("frodo view");
    assert!(view.show_chat_bubble);
    assert!(view.can_restart);
    assert_eq!(view.current_message_count, Some(10));
}

#[test]
fn resumed_pair_waits_for_separation() {
    let mut h = Harness::new(config(CapPolicy::Resume), frodo_gandalf());
    h.settle();
    h.drag("frodo", 0, 10);
    assert!(h.board.autonomous().is_empty(), "still together: no new round");

    h.drag("gandalf", 600, 0);
    h.drag("gandalf", 60, 0);
    let conversation = h.board.conversations().get(&pair()).expect("conversation");
    assert_eq!(conversation.turn_count, 0);
    assert_eq!(conversation.rounds, 1);
    assert_eq!(conversation.messages.len(), 10);
    assert!(h.board.autonomous().pairing(&pair()).is_some());
    assert_eq!(h.topic_requests(), 0);

    h.settle();
    assert_eq!(h.board.conversations().get(&pair()).map(|c| c.messages.len()), Some(20));
}

#[test]
fn restart_begins_a_new_round_under_either_policy() {
    for policy in [CapPolicy::PermanentlyEnded, CapPolicy::Resume] {
        let mut h = Harness::new(config(policy), frodo_gandalf());
        h.handle(BoardEvent::RestartAutonomous { a: id("frodo"), b: id("gandalf") });
        assert_eq!(h.board.conversations().get(&pair()).map(|c| c.rounds), Some(0), "not capped yet");

        h.settle();
        h.handle(BoardEvent::RestartAutonomous { a: id("gandalf"), b: id("frodo") });
        assert!(h.board.autonomous().pairing(&pair()).is_some(), "{policy:?}");
        assert_eq!(h.board.conversations().turn_count(&pair()), 0);
        assert_eq!(h.board.conversations().get(&pair()).map(|c| c.rounds), Some(1));
    }
}

#[test]
fn removed_character_leaves_its_pairing() {
    let mut h = Harness::new(config(CapPolicy::default()), frodo_gandalf());
    h.answer_all();
    h.handle(BoardEvent::RemoveCharacter { id: id("gandalf") });
    assert!(h.board.entity(&id("gandalf")).is_none());
    assert!(h.board.autonomous().is_empty());
    assert_eq!(h.board.next_deadline(), None);

    h.handle(BoardEvent::RemoveCharacter { id: EntityId::user() });
    assert!(h.board.entity(&EntityId::user()).is_some());
}

#[test]
fn added_character_snaps_and_pairs() {
    let mut h = Harness::new(config(CapPolicy::default()), vec![user_at(1000, 1000), npc("frodo", 0, 0)]);
    h.handle(BoardEvent::AddCharacter {
        label: "  ".into(),
        trait_text: "Wise".into(),
        avatar: "🧙".into(),
        position: Position::new(73, 26),
    });
    let added = h.board.entities().last().expect("added").clone();
    assert_eq!(added.label, "Unnamed");
    assert_eq!(added.position, Position::new(50, 50));
    assert!(!added.background_color.is_empty());
    assert_eq!(h.board.autonomous().len(), 1);
}

#[test]
fn pane_click_answers_with_snapped_placement() {
    let mut h = Harness::new(config(CapPolicy::default()), vec![user_at(0, 0)]);
    let effects = h.board.handle(BoardEvent::PaneClick { position: Position::new(73, 26) }, h.now);
    assert!(matches!(
        effects.as_slice(),
        [Effect::PlaceCharacter { position }] if *position == Position::new(50, 50)
    ));
}

// ---------------------------------------------------------------------------
// Clearing and persistence
// ---------------------------------------------------------------------------

#[test]
fn clear_disarms_a_reply_that_is_typing() {
    let mut h = Harness::new(config(CapPolicy::default()), vec![user_at(0, 0), npc("frodo", 50, 0)]);
    h.handle(BoardEvent::ChatInput("hi".into()));
    h.handle(BoardEvent::Send);
    h.answer_all();
    assert_eq!(h.board.next_deadline(), Some(600));

    h.now = 10;
    h.handle(BoardEvent::ClearConversations);
    assert_eq!(h.board.next_deadline(), None);
    assert!(h.board.scheduler().is_empty());
    assert_eq!(h.board.session().pending_len(), 0);

    h.tick(5000);
    assert!(h.board.user_conversation(&id("frodo")).is_empty());
}

#[test]
fn clear_wipes_state_and_ignores_old_requests() {
    let store = SharedStore::default();
    let board = Board::new(
        config(CapPolicy::default()),
        vec![user_at(0, 0), npc("frodo", 50, 0), npc("gandalf", 1000, 0), npc("legolas", 1060, 0)],
    )
    .with_store(Box::new(store.clone()));
    let mut h = Harness::from_board(board);
    h.handle(BoardEvent::ChatInput("hello".into()));
    h.handle(BoardEvent::Send);
    let old: Vec<RequestToken> = h.inflight.drain(..).map(|(t, _)| t).collect();
    assert_eq!(old.len(), 2);
    assert!(store.load(CONVERSATIONS_KEY).expect("load").is_some());

    h.handle(BoardEvent::ClearConversations);
    assert!(h.board.user_conversation(&id("frodo")).is_empty());
    assert_eq!(h.board.session().pending_len(), 0);
    assert!(store.load(CONVERSATIONS_KEY).expect("load").is_none());
    assert_eq!(h.topic_requests(), 1, "pair in range asks for a fresh topic");

    for token in old {
        h.complete(token, "stale");
    }
    h.tick(5000);
    assert!(h.board.user_conversation(&id("frodo")).is_empty());
    assert_eq!(h.board.conversations().topic(&PairKey::new(&id("gandalf"), &id("legolas"))), None);
}

#[test]
fn board_restores_from_store() {
    let store = SharedStore::default();
    let board = Board::new(config(CapPolicy::Resume), frodo_gandalf()).with_store(Box::new(store.clone()));
    let mut h = Harness::from_board(board);
    h.drag("gandalf", 60, 0);
    h.settle();
    assert!(store.load(ENTITIES_KEY).expect("load").is_some());
    assert!(store.load(TOPICS_KEY).expect("load").is_some());

    let restored = Board::restore(config(CapPolicy::Resume), Box::new(store.clone()), Vec::new());
    let mut h = Harness::from_board(restored);
    assert_eq!(h.board.entities().len(), 3);
    assert_eq!(h.board.conversations().get(&pair()).map(|c| c.messages.len()), Some(10));
    assert_eq!(h.board.conversations().topic(&pair()), Some("second breakfast"));
    assert!(h.board.autonomous().is_empty(), "restored capped pair has not separated yet");

    h.drag("gandalf", 600, 0);
    h.drag("gandalf", 60, 0);
    assert!(h.board.autonomous().pairing(&pair()).is_some());
}

#[test]
fn views_serialize_for_the_renderer() {
    let mut h = Harness::new(config(CapPolicy::default()), vec![user_at(0, 0), npc("frodo", 50, 0)]);
    h.handle(BoardEvent::ChatInput("hi".into()));
    let views = h.board.views();
    let json = serde_json::to_value(&views).expect("serialize");
    let frodo = &json[1];
    assert_eq!(frodo["id"], "frodo");
    assert_eq!(frodo["showChatBubble"], true);
    assert_eq!(frodo["chatInput"], "hi");
    assert_eq!(frodo["chatProfiles"][1]["trait"], "Brave");
    assert!(json[0].get("messages").is_none());
}

// ---------------------------------------------------------------------------
// Property: structure holds under arbitrary drags
// ---------------------------------------------------------------------------

const NAMES: [&str; 5] = ["you", "a", "b", "c", "d"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pairings_stay_disjoint_and_in_range(
        moves in prop::collection::vec((0usize..5, 0i32..6, 0i32..3), 1..40)
    ) {
        let entities = vec![
            user_at(500, 500),
            npc("a", 0, 0),
            npc("b", 100, 0),
            npc("c", 200, 0),
            npc("d", 300, 0),
        ];
        let mut h = Harness::new(config(CapPolicy::Resume), entities);
        for (who, x, y) in moves {
            h.handle(BoardEvent::DragStop { id: id(NAMES[who]), position: Position::new(x * 60, y * 60) });
            h.answer_all();
            h.tick(1000);
            assert_consistent(&h.board);
        }
    }
}
