//! Core type definitions for the Fragment board.
//!
//! Everything here is plain data: serialisable, cheap to clone, and free of
//! any notion of rendering or networking.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Id of the distinguished user entity.
pub const USER_ID: &str = "you";

/// Joins the two ids in the text form of a [`PairKey`]; never valid inside an id.
pub const PAIR_SEPARATOR: char = ':';

/// Wall-clock milliseconds (Unix epoch) used for message timestamps and timers.
pub type Millis = i64;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Unique identifier for an entity on the board (the user or an NPC).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Wrap an id string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id of the user avatar.
    #[must_use]
    pub fn user() -> Self {
        Self(USER_ID.to_string())
    }

    /// Whether this id names the user avatar.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.0 == USER_ID
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Non-empty and free of [`PAIR_SEPARATOR`], so pair keys built from it
    /// read back unchanged.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty() && !self.0.contains(PAIR_SEPARATOR)
    }

    /// Build a fresh NPC id from a display label: a lowercase slug followed
    /// by the creation time, e.g. `"Samwise G."` → `samwise-g-1700000000000`.
    #[must_use]
    pub fn generate(label: &str, created_at: Millis) -> Self {
        let mut slug = String::with_capacity(label.len());
        let mut pending_dash = false;
        for ch in label.chars() {
            if ch.is_ascii_alphanumeric() {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(ch.to_ascii_lowercase());
            } else {
                pending_dash = true;
            }
        }
        if slug.is_empty() {
            slug.push_str("char");
        }
        Self(format!("{slug}-{created_at}"))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Canonical key for the unordered pair of participants in a conversation.
///
/// The two ids are stored sorted, so `PairKey::new(a, b) == PairKey::new(b, a)`.
/// The textual form is `"<first>:<second>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    first: EntityId,
    second: EntityId,
}

impl PairKey {
    /// Build the canonical key for two participants.
    #[must_use]
    pub fn new(a: &EntityId, b: &EntityId) -> Self {
        if a <= b {
            Self { first: a.clone(), second: b.clone() }
        } else {
            Self { first: b.clone(), second: a.clone() }
        }
    }

    /// Lexicographically smaller participant.
    #[must_use]
    pub fn first(&self) -> &EntityId {
        &self.first
    }

    /// Lexicographically larger participant.
    #[must_use]
    pub fn second(&self) -> &EntityId {
        &self.second
    }

    /// Participant at `index % 2` (0 → first, 1 → second).
    #[must_use]
    pub fn member(&self, index: u32) -> &EntityId {
        if index % 2 == 0 { &self.first } else { &self.second }
    }

    /// Whether `id` is one of the two participants.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.first == *id || self.second == *id
    }

    /// The participant that is not `id`, if `id` belongs to the pair.
    #[must_use]
    pub fn other(&self, id: &EntityId) -> Option<&EntityId> {
        if self.first == *id {
            Some(&self.second)
        } else if self.second == *id {
            Some(&self.first)
        } else {
            None
        }
    }

    /// Whether one of the participants is the user.
    #[must_use]
    pub fn involves_user(&self) -> bool {
        self.first.is_user() || self.second.is_user()
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{PAIR_SEPARATOR}{}", self.first, self.second)
    }
}

impl FromStr for PairKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((a, b)) = s.split_once(PAIR_SEPARATOR) else {
            return Err(format!("malformed pair key '{s}'"));
        };
        let (a, b) = (EntityId::from(a), EntityId::from(b));
        if !a.is_well_formed() || !b.is_well_formed() {
            return Err(format!("malformed pair key '{s}'"));
        }
        Ok(Self::new(&a, &b))
    }
}

impl Serialize for PairKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PairKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Spatial
// ---------------------------------------------------------------------------

/// A point on the board grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
}

impl Position {
    /// Create a position.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn distance_to(self, other: Position) -> f64 {
        let dx = (i64::from(self.x) - i64::from(other.x)) as f64;
        let dy = (i64::from(self.y) - i64::from(other.y)) as f64;
        dx.hypot(dy)
    }

    /// Move by `(dx, dy)` grid steps of `step` units each.
    #[must_use]
    pub fn stepped(self, dx: i32, dy: i32, step: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx.saturating_mul(step)),
            y: self.y.saturating_add(dy.saturating_mul(step)),
        }
    }

    /// Round to the nearest multiple of `grid` on both axes (halves round up).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn snapped(self, grid: i32) -> Self {
        if grid <= 0 {
            return self;
        }
        let snap = |v: i32| {
            let cells = (f64::from(v) / f64::from(grid) + 0.5).floor() as i32;
            cells.saturating_mul(grid)
        };
        Self { x: snap(self.x), y: snap(self.y) }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Personality
// ---------------------------------------------------------------------------

/// Personality family derived from an entity's free-text trait.
///
/// Used to pick canned fallback lines. Anything unrecognised is `Neutral`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trait {
    /// Brave, bold, heroic.
    Brave,
    /// Wise, thoughtful, scholarly.
    Wise,
    /// Cheerful, friendly, playful.
    Cheerful,
    /// Grumpy, gruff, sarcastic.
    Grumpy,
    /// Curious, inquisitive, adventurous.
    Curious,
    /// Mysterious, secretive, quiet.
    Mysterious,
    /// No recognised keyword.
    Neutral,
}

impl Trait {
    const KEYWORDS: &'static [(Trait, &'static [&'static str])] = &[
        (Trait::Brave, &["brave", "bold", "heroic", "courage", "fearless", "valiant"]),
        (Trait::Wise, &["wise", "sage", "thoughtful", "scholar", "learned", "clever"]),
        (Trait::Cheerful, &["cheer", "happy", "friendly", "jolly", "playful", "kind"]),
        (Trait::Grumpy, &["grump", "gruff", "grouch", "sarcas", "cranky", "stubborn"]),
        (Trait::Curious, &["curious", "inquisit", "adventur", "explor", "nosy"]),
        (Trait::Mysterious, &["myster", "secret", "quiet", "enigma", "shadow", "shy"]),
    ];

    /// Classify a free-text trait by the first matching keyword family.
    #[must_use]
    pub fn from_descriptor(descriptor: &str) -> Self {
        let lowered = descriptor.to_lowercase();
        Self::KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| lowered.contains(w)))
            .map_or(Trait::Neutral, |(t, _)| *t)
    }

    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Brave => "brave",
            Self::Wise => "wise",
            Self::Cheerful => "cheerful",
            Self::Grumpy => "grumpy",
            Self::Curious => "curious",
            Self::Mysterious => "mysterious",
            Self::Neutral => "neutral",
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A positioned, labelled participant on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique id.
    pub id: EntityId,
    /// Current grid position.
    pub position: Position,
    /// Display name.
    pub label: String,
    /// Free-text personality, e.g. `"Brave, wise"`.
    #[serde(rename = "trait", default)]
    pub trait_text: String,
    /// Avatar image reference handed to the renderer untouched.
    #[serde(default)]
    pub avatar: String,
    /// CSS colour behind the avatar.
    #[serde(default)]
    pub background_color: String,
}

impl Entity {
    /// Create an entity with no trait, avatar or background.
    #[must_use]
    pub fn new(id: impl Into<EntityId>, label: impl Into<String>, position: Position) -> Self {
        Self {
            id: id.into(),
            position,
            label: label.into(),
            trait_text: String::new(),
            avatar: String::new(),
            background_color: String::new(),
        }
    }

    /// The user avatar at `position`.
    #[must_use]
    pub fn user(position: Position) -> Self {
        Self::new(EntityId::user(), "You", position)
    }

    /// Set the free-text trait.
    #[must_use]
    pub fn with_trait(mut self, trait_text: impl Into<String>) -> Self {
        self.trait_text = trait_text.into();
        self
    }

    /// Set the avatar reference.
    #[must_use]
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = avatar.into();
        self
    }

    /// Set the background colour.
    #[must_use]
    pub fn with_background(mut self, color: impl Into<String>) -> Self {
        self.background_color = color.into();
        self
    }

    /// Whether this is the user avatar.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.id.is_user()
    }

    /// Personality family of this entity.
    #[must_use]
    pub fn personality(&self) -> Trait {
        Trait::from_descriptor(&self.trait_text)
    }
}

/// A random translucent `rgba(...)` colour for a new avatar.
#[must_use]
pub fn random_background<R: Rng + ?Sized>(rng: &mut R, alpha: f32) -> String {
    let r: u8 = rng.r#gen();
    let g: u8 = rng.r#gen();
    let b: u8 = rng.r#gen();
    format!("rgba({r}, {g}, {b}, {alpha})")
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// One line in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who said it.
    pub sender: EntityId,
    /// What was said.
    pub text: String,
    /// When it was appended.
    #[serde(rename = "t")]
    pub timestamp: Millis,
}

impl Message {
    /// Create a message.
    #[must_use]
    pub fn new(sender: EntityId, text: impl Into<String>, timestamp: Millis) -> Self {
        Self { sender, text: text.into(), timestamp }
    }
}
