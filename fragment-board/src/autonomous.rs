//! Autonomous NPC-to-NPC conversations.
//!
//! Pairings follow proximity. Every relationship change runs three passes:
//!
//! 1. **Preemption**: an NPC within user range loses its pairing, and so
//!    does its partner.
//! 2. **Pairing**: each NPC pair in range (evaluation order) whose members
//!    are both clear of the user gets paired, tearing down any other pairing
//!    either member had. Pairs out of turn budget are skipped, subject to
//!    the [`CapPolicy`].
//! 3. **Departure**: pairings whose members drifted out of range, or
//!    vanished, end.
//!
//! The passes compute the desired assignment from the current one; only the
//! difference is applied, so a pairing that survives keeps its timer and
//! any request in flight.

use std::collections::{BTreeMap, HashMap, HashSet};

use fragment_core::config::{AutonomousConfig, CapPolicy};
use fragment_core::conversation::ConversationStore;
use fragment_core::proximity::RelationshipSet;
use fragment_core::types::{EntityId, PairKey};
use rand::Rng;
use tracing::{debug, info};

use crate::events::RequestToken;

/// Identity of one pairing lifetime. A pair that ends and starts again gets
/// a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairingId(u64);

/// What a pairing is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairPhase {
    /// Topic requested; no turn scheduled yet.
    AwaitingTopic,
    /// Turn timer armed.
    Waiting,
    /// A line is being generated.
    AwaitingLine {
        /// Request whose result will be accepted.
        token: RequestToken,
    },
}

/// One active NPC-to-NPC exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    /// Conversation key.
    pub key: PairKey,
    /// Member that shows the chat window.
    pub leader: EntityId,
    /// Lifetime id.
    pub id: PairingId,
    /// Current phase.
    pub phase: PairPhase,
}

/// Per-NPC view of a pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatContext {
    /// The other member.
    pub partner: EntityId,
    /// Whether this NPC shows the window.
    pub is_leader: bool,
}

/// Why a pairing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// A member came within user range.
    UserNearby,
    /// The members moved apart or one left the board.
    Separated,
    /// A member was re-paired with someone else.
    Repaired,
    /// The turn budget ran out.
    Capped,
    /// Conversations were wiped.
    Cleared,
}

/// Result of a reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairingDiff {
    /// Pairings created, in evaluation order.
    pub started: Vec<PairKey>,
    /// Pairings removed and why.
    pub ended: Vec<(PairKey, EndReason)>,
    /// Started pairs whose budget was used up and that begin a new round.
    pub new_rounds: Vec<PairKey>,
}

impl PairingDiff {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.ended.is_empty()
    }
}

/// Owner of every NPC-to-NPC pairing.
#[derive(Debug)]
pub struct AutonomousOrchestrator {
    pairings: BTreeMap<PairKey, Pairing>,
    members: HashMap<EntityId, PairKey>,
    /// Capped pairs that have not separated since. Under
    /// [`CapPolicy::Resume`] they wait here until they do.
    exhausted: HashSet<PairKey>,
    max_messages: u32,
    cap_policy: CapPolicy,
    next_id: u64,
}

impl AutonomousOrchestrator {
    /// Orchestrator with no pairings.
    #[must_use]
    pub fn new(config: &AutonomousConfig) -> Self {
        Self {
            pairings: BTreeMap::new(),
            members: HashMap::new(),
            exhausted: HashSet::new(),
            max_messages: config.max_messages,
            cap_policy: config.cap_policy,
            next_id: 0,
        }
    }

    /// Turn budget per round.
    #[must_use]
    pub fn max_messages(&self) -> u32 {
        self.max_messages
    }

    /// Configured cap behaviour.
    #[must_use]
    pub fn cap_policy(&self) -> CapPolicy {
        self.cap_policy
    }

    /// Treat every capped pair in `store` as not yet separated.
    ///
    /// Called after restoring from storage so a capped pair that happens to
    /// be in range at startup does not count as having reconverged.
    pub fn mark_capped_exhausted(&mut self, store: &ConversationStore, keys: impl IntoIterator<Item = PairKey>) {
        for key in keys {
            if !key.involves_user() && store.turn_count(&key) >= self.max_messages {
                self.exhausted.insert(key);
            }
        }
    }

    /// Whether the pair has used its turn budget.
    #[must_use]
    pub fn is_capped(&self, store: &ConversationStore, key: &PairKey) -> bool {
        store.turn_count(key) >= self.max_messages
    }

    /// Run the three passes against fresh relationships.
    pub fn reconcile(&mut self, relationships: &RelationshipSet, store: &ConversationStore) -> PairingDiff {
        let in_range: HashSet<PairKey> = relationships
            .npc_pairs()
            .map(|r| PairKey::new(&r.a, &r.b))
            .collect();
        self.exhausted.retain(|key| in_range.contains(key));

        let near_user = |id: &EntityId| relationships.is_near_user(id);

        // Preemption + departure over the current assignment.
        let mut desired: BTreeMap<PairKey, EntityId> = self
            .pairings
            .values()
            .filter(|p| {
                !near_user(p.key.first()) && !near_user(p.key.second()) && in_range.contains(&p.key)
            })
            .map(|p| (p.key.clone(), p.leader.clone()))
            .collect();
        let mut desired_members: HashMap<EntityId, PairKey> = desired
            .keys()
            .flat_map(|k| [(k.first().clone(), k.clone()), (k.second().clone(), k.clone())])
            .collect();

        // Pairing pass.
        for rel in relationships.npc_pairs() {
            if near_user(&rel.a) || near_user(&rel.b) {
                continue;
            }
            let key = PairKey::new(&rel.a, &rel.b);
            if desired.contains_key(&key) {
                continue;
            }
            if self.is_capped(store, &key) && !self.may_resume(&key) {
                continue;
            }
            for member in [&rel.a, &rel.b] {
                if let Some(old) = desired_members.remove(member) {
                    desired.remove(&old);
                    if let Some(other) = old.other(member) {
                        desired_members.remove(other);
                    }
                }
            }
            desired_members.insert(rel.a.clone(), key.clone());
            desired_members.insert(rel.b.clone(), key.clone());
            desired.insert(key, rel.a.clone());
        }

        // Diff.
        let mut diff = PairingDiff::default();
        let ended: Vec<PairKey> = self
            .pairings
            .keys()
            .filter(|k| !desired.contains_key(*k))
            .cloned()
            .collect();
        for key in ended {
            let reason = if near_user(key.first()) || near_user(key.second()) {
                EndReason::UserNearby
            } else if !in_range.contains(&key) {
                EndReason::Separated
            } else {
                EndReason::Repaired
            };
            self.remove(&key, reason);
            diff.ended.push((key, reason));
        }

        for rel in relationships.npc_pairs() {
            let key = PairKey::new(&rel.a, &rel.b);
            let Some(leader) = desired.get(&key) else { continue };
            if self.pairings.contains_key(&key) {
                continue;
            }
            if self.is_capped(store, &key) {
                diff.new_rounds.push(key.clone());
            }
            self.insert(key.clone(), leader.clone());
            diff.started.push(key);
        }

        diff
    }

    fn may_resume(&self, key: &PairKey) -> bool {
        match self.cap_policy {
            CapPolicy::PermanentlyEnded => false,
            CapPolicy::Resume => !self.exhausted.contains(key),
        }
    }

    fn insert(&mut self, key: PairKey, leader: EntityId) {
        self.next_id += 1;
        info!(pair = %key, leader = %leader, "Autonomous conversation started");
        self.members.insert(key.first().clone(), key.clone());
        self.members.insert(key.second().clone(), key.clone());
        self.pairings.insert(
            key.clone(),
            Pairing { key, leader, id: PairingId(self.next_id), phase: PairPhase::AwaitingTopic },
        );
    }

    fn remove(&mut self, key: &PairKey, reason: EndReason) -> Option<Pairing> {
        let pairing = self.pairings.remove(key)?;
        for member in [key.first(), key.second()] {
            if self.members.get(member) == Some(key) {
                self.members.remove(member);
            }
        }
        info!(pair = %key, ?reason, "Autonomous conversation ended");
        Some(pairing)
    }

    /// End a pairing that reached its turn budget.
    pub fn end_capped(&mut self, key: &PairKey) -> Option<Pairing> {
        let pairing = self.remove(key, EndReason::Capped)?;
        self.exhausted.insert(key.clone());
        Some(pairing)
    }

    /// End every pairing.
    pub fn clear(&mut self) -> Vec<PairKey> {
        let keys: Vec<PairKey> = self.pairings.keys().cloned().collect();
        for key in &keys {
            self.remove(key, EndReason::Cleared);
        }
        self.exhausted.clear();
        keys
    }

    /// Allow a capped pair to pair again at the next reconcile, regardless
    /// of policy or separation.
    pub fn release(&mut self, key: &PairKey) {
        debug!(pair = %key, "Autonomous conversation released for a new round");
        self.exhausted.remove(key);
    }

    /// The pairing for `key`, if active.
    #[must_use]
    pub fn pairing(&self, key: &PairKey) -> Option<&Pairing> {
        self.pairings.get(key)
    }

    /// Set the phase of an active pairing. No-op for unknown keys.
    pub fn set_phase(&mut self, key: &PairKey, phase: PairPhase) {
        if let Some(pairing) = self.pairings.get_mut(key) {
            pairing.phase = phase;
        }
    }

    /// Context of `id`, if it is in a pairing.
    #[must_use]
    pub fn context(&self, id: &EntityId) -> Option<ChatContext> {
        let key = self.members.get(id)?;
        let pairing = self.pairings.get(key)?;
        Some(ChatContext {
            partner: key.other(id)?.clone(),
            is_leader: &pairing.leader == id,
        })
    }

    /// Active pairings in key order.
    pub fn pairings(&self) -> impl Iterator<Item = &Pairing> {
        self.pairings.values()
    }

    /// Number of active pairings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairings.len()
    }

    /// Whether no pairing is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairings.is_empty()
    }
}

/// Randomized delay before the next turn, uniform in the configured bounds.
#[must_use]
pub fn turn_delay<R: Rng + ?Sized>(rng: &mut R, config: &AutonomousConfig) -> u64 {
    let (lo, hi) = (config.interval_min_ms, config.interval_max_ms);
    if lo >= hi { lo } else { rng.gen_range(lo..=hi) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fragment_core::proximity;
    use fragment_core::types::{Entity, Message, Position};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn id(s: &str) -> EntityId {
        EntityId::from(s)
    }

    fn key(a: &str, b: &str) -> PairKey {
        PairKey::new(&id(a), &id(b))
    }

    fn entities(user: (i32, i32), npcs: &[(&str, i32, i32)]) -> Vec<Entity> {
        let mut out = vec![Entity::user(Position::new(user.0, user.1))];
        for (name, x, y) in npcs {
            out.push(Entity::new(*name, *name, Position::new(*x, *y)));
        }
        out
    }

    fn reconcile(orch: &mut AutonomousOrchestrator, store: &ConversationStore, board: &[Entity]) -> PairingDiff {
        orch.reconcile(&proximity::evaluate(board, 120.0), store)
    }

    fn cap(store: &mut ConversationStore, k: &PairKey, n: u32) {
        for i in 0..n {
            store.append_message(k, Message::new(k.member(i).clone(), "line", i64::from(i)));
            store.record_turn(k);
        }
    }

    #[test]
    fn nearby_pair_starts_with_first_member_leading() {
        let mut orch = AutonomousOrchestrator::new(&AutonomousConfig::default());
        let store = ConversationStore::new();
        let board = entities((1000, 1000), &[("frodo", 0, 0), ("gandalf", 60, 0)]);

        let diff = reconcile(&mut orch, &store, &board);
        assert_eq!(diff.started, vec![key("frodo", "gandalf")]);

        let frodo = orch.context(&id("frodo")).expect("frodo paired");
        let gandalf = orch.context(&id("gandalf")).expect("gandalf paired");
        assert_eq!(frodo.partner, id("gandalf"));
        assert!(frodo.is_leader);
        assert!(!gandalf.is_leader);
    }

    #[test]
    fn user_proximity_preempts_both_members() {
        let mut orch = AutonomousOrchestrator::new(&AutonomousConfig::default());
        let store = ConversationStore::new();
        reconcile(&mut orch, &store, &entities((1000, 1000), &[("frodo", 0, 0), ("gandalf", 60, 0)]));

        let diff = reconcile(&mut orch, &store, &entities((-50, 0), &[("frodo", 0, 0), ("gandalf", 60, 0)]));
        assert_eq!(diff.ended, vec![(key("frodo", "gandalf"), EndReason::UserNearby)]);
        assert!(orch.context(&id("frodo")).is_none());
        assert!(orch.context(&id("gandalf")).is_none(), "partner of a preempted NPC is cleared too");
    }

    #[test]
    fn separation_ends_the_pairing() {
        let mut orch = AutonomousOrchestrator::new(&AutonomousConfig::default());
        let store = ConversationStore::new();
        reconcile(&mut orch, &store, &entities((1000, 1000), &[("frodo", 0, 0), ("gandalf", 60, 0)]));
        let diff = reconcile(&mut orch, &store, &entities((1000, 1000), &[("frodo", 0, 0), ("gandalf", 400, 0)]));
        assert_eq!(diff.ended, vec![(key("frodo", "gandalf"), EndReason::Separated)]);
        assert!(orch.is_empty());
    }

    #[test]
    fn three_way_cluster_is_stable() {
        let mut orch = AutonomousOrchestrator::new(&AutonomousConfig::default());
        let store = ConversationStore::new();
        let board = entities((1000, 1000), &[("a", 0, 0), ("b", 50, 0), ("c", 0, 50)]);

        let first = reconcile(&mut orch, &store, &board);
        assert_eq!(first.started.len(), 1);
        let pairing = orch.pairings().next().cloned().expect("one pairing");

        let second = reconcile(&mut orch, &store, &board);
        assert!(second.is_empty(), "an unchanged board must not churn pairings");
        assert_eq!(orch.pairing(&pairing.key).map(|p| p.id), Some(pairing.id));

        let paired = ["a", "b", "c"].iter().filter(|n| orch.context(&id(n)).is_some()).count();
        assert_eq!(paired, 2, "each NPC has at most one context");
    }

    #[test]
    fn new_neighbour_repairs() {
        let mut orch = AutonomousOrchestrator::new(&AutonomousConfig::default());
        let store = ConversationStore::new();
        reconcile(&mut orch, &store, &entities((1000, 1000), &[("a", 0, 0), ("b", 500, 0), ("c", 60, 0)]));
        assert!(orch.pairing(&key("a", "c")).is_some());

        // b walks up to c but stays out of a's range: c is re-paired with b.
        let diff = reconcile(&mut orch, &store, &entities((1000, 1000), &[("a", 0, 0), ("b", 170, 0), ("c", 60, 0)]));
        assert_eq!(diff.ended, vec![(key("a", "c"), EndReason::Repaired)]);
        assert_eq!(diff.started, vec![key("b", "c")]);
        assert!(orch.context(&id("a")).is_none());
        assert_eq!(orch.context(&id("c")).map(|c| c.partner), Some(id("b")));
    }

    #[test]
    fn permanently_ended_never_restarts() {
        let config = AutonomousConfig { cap_policy: CapPolicy::PermanentlyEnded, ..AutonomousConfig::default() };
        let mut orch = AutonomousOrchestrator::new(&config);
        let mut store = ConversationStore::new();
        let k = key("frodo", "gandalf");
        cap(&mut store, &k, 10);

        let near = entities((1000, 1000), &[("frodo", 0, 0), ("gandalf", 60, 0)]);
        let far = entities((1000, 1000), &[("frodo", 0, 0), ("gandalf", 600, 0)]);
        assert!(reconcile(&mut orch, &store, &near).started.is_empty());
        reconcile(&mut orch, &store, &far);
        assert!(reconcile(&mut orch, &store, &near).started.is_empty());
    }

    #[test]
    fn resume_waits_for_separation() {
        let config = AutonomousConfig { cap_policy: CapPolicy::Resume, ..AutonomousConfig::default() };
        let mut orch = AutonomousOrchestrator::new(&config);
        let mut store = ConversationStore::new();
        let k = key("frodo", "gandalf");
        let near = entities((1000, 1000), &[("frodo", 0, 0), ("gandalf", 60, 0)]);
        let far = entities((1000, 1000), &[("frodo", 0, 0), ("gandalf", 600, 0)]);

        reconcile(&mut orch, &store, &near);
        cap(&mut store, &k, 10);
        orch.end_capped(&k);

        assert!(reconcile(&mut orch, &store, &near).started.is_empty(), "still together: no new round");
        reconcile(&mut orch, &store, &far);
        let diff = reconcile(&mut orch, &store, &near);
        assert_eq!(diff.started, vec![k.clone()]);
        assert_eq!(diff.new_rounds, vec![k]);
    }

    #[test]
    fn restored_capped_pair_needs_separation_before_resuming() {
        let config = AutonomousConfig { cap_policy: CapPolicy::Resume, ..AutonomousConfig::default() };
        let mut orch = AutonomousOrchestrator::new(&config);
        let mut store = ConversationStore::new();
        let k = key("frodo", "gandalf");
        cap(&mut store, &k, 10);
        orch.mark_capped_exhausted(&store, [k.clone()]);

        let near = entities((1000, 1000), &[("frodo", 0, 0), ("gandalf", 60, 0)]);
        assert!(reconcile(&mut orch, &store, &near).started.is_empty());
    }

    #[test]
    fn turn_delay_stays_in_bounds() {
        let config = AutonomousConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let d = turn_delay(&mut rng, &config);
            assert!((3000..=8000).contains(&d));
        }
        let fixed = AutonomousConfig { interval_min_ms: 500, interval_max_ms: 500, ..AutonomousConfig::default() };
        assert_eq!(turn_delay(&mut rng, &fixed), 500);
    }
}
