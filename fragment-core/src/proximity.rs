//! Proximity evaluation: who is within conversational range of whom.
//!
//! A pure O(n²) pairwise scan. Expected NPC counts are in the low tens, so a
//! spatial index would cost more than it saves. The result is recomputed from
//! scratch on every position change and never cached across changes.

use crate::types::{Entity, EntityId};

/// Kind of proximity relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    /// Two NPCs in range of each other.
    NpcNpc,
    /// An NPC in range of the user.
    NpcUser,
}

/// Two entities within range. For `NpcUser`, `a` is the NPC and `b` the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    /// Relationship kind.
    pub kind: RelationshipKind,
    /// First participant (earlier in board order; the NPC for `NpcUser`).
    pub a: EntityId,
    /// Second participant.
    pub b: EntityId,
    /// Euclidean distance between the two.
    pub distance: f64,
}

/// All in-range relationships for one board state.
///
/// `NpcNpc` relationships appear in board iteration order (`i < j`), followed
/// by `NpcUser` relationships in board order.
#[derive(Debug, Clone, Default)]
pub struct RelationshipSet {
    relationships: Vec<Relationship>,
    threshold: f64,
}

impl RelationshipSet {
    /// Every relationship, in evaluation order.
    #[must_use]
    pub fn all(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Threshold the set was evaluated with.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// NPC-to-NPC relationships in evaluation order.
    pub fn npc_pairs(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.iter().filter(|r| r.kind == RelationshipKind::NpcNpc)
    }

    /// NPC-to-user relationships in board order.
    pub fn near_user(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.iter().filter(|r| r.kind == RelationshipKind::NpcUser)
    }

    /// Whether `npc` is within range of the user.
    #[must_use]
    pub fn is_near_user(&self, npc: &EntityId) -> bool {
        self.near_user().any(|r| r.a == *npc)
    }

    /// Distance from `npc` to the user, if in range.
    #[must_use]
    pub fn user_distance(&self, npc: &EntityId) -> Option<f64> {
        self.near_user().find(|r| r.a == *npc).map(|r| r.distance)
    }

    /// Nearest in-range NPC to the user. Ties go to the NPC earliest in board
    /// order.
    #[must_use]
    pub fn nearest_to_user(&self) -> Option<&EntityId> {
        let mut best: Option<&Relationship> = None;
        for rel in self.near_user() {
            if best.is_none_or(|b| rel.distance < b.distance) {
                best = Some(rel);
            }
        }
        best.map(|r| &r.a)
    }

    /// Whether there are no relationships at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }
}

/// Whether `distance` counts as in range (boundary inclusive).
#[must_use]
pub fn in_range(distance: f64, threshold: f64) -> bool {
    distance <= threshold
}

/// Evaluate every NPC-NPC and NPC-user pair against `threshold`.
#[must_use]
pub fn evaluate(entities: &[Entity], threshold: f64) -> RelationshipSet {
    let mut relationships = Vec::new();
    let npcs: Vec<&Entity> = entities.iter().filter(|e| !e.is_user()).collect();

    for (i, first) in npcs.iter().enumerate() {
        for second in &npcs[i + 1..] {
            let distance = first.position.distance_to(second.position);
            if in_range(distance, threshold) {
                relationships.push(Relationship {
                    kind: RelationshipKind::NpcNpc,
                    a: first.id.clone(),
                    b: second.id.clone(),
                    distance,
                });
            }
        }
    }

    if let Some(user) = entities.iter().find(|e| e.is_user()) {
        for npc in &npcs {
            let distance = npc.position.distance_to(user.position);
            if in_range(distance, threshold) {
                relationships.push(Relationship {
                    kind: RelationshipKind::NpcUser,
                    a: npc.id.clone(),
                    b: user.id.clone(),
                    distance,
                });
            }
        }
    }

    RelationshipSet { relationships, threshold }
}

/// Current distance between two entities, if both exist.
#[must_use]
pub fn distance_between(entities: &[Entity], a: &EntityId, b: &EntityId) -> Option<f64> {
    let pa = entities.iter().find(|e| e.id == *a)?.position;
    let pb = entities.iter().find(|e| e.id == *b)?.position;
    Some(pa.distance_to(pb))
}
