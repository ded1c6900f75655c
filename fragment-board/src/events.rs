//! Board inputs and outputs.
//!
//! Everything that can happen to the board arrives as a [`BoardEvent`] or a
//! [`Completion`]; everything the board needs done outside itself leaves as
//! an [`Effect`].

use std::fmt;

use fragment_core::types::{EntityId, Position, Trait};
use fragment_llm::types::{LineRequest, ReplyRequest, Speaker};

/// An input from the renderer or the user.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    /// Arrow-key movement of the user avatar, in grid steps.
    MoveUser {
        /// Horizontal steps (-1, 0, 1 for arrow keys).
        dx: i32,
        /// Vertical steps.
        dy: i32,
    },

    /// An entity is being dragged.
    Drag {
        /// Dragged entity.
        id: EntityId,
        /// Current drag position.
        position: Position,
    },

    /// A drag ended.
    DragStop {
        /// Dragged entity.
        id: EntityId,
        /// Drop position.
        position: Position,
    },

    /// A node was clicked.
    Click {
        /// Clicked entity.
        id: EntityId,
    },

    /// Empty canvas was clicked; answered with [`Effect::PlaceCharacter`].
    PaneClick {
        /// Click position in canvas coordinates.
        position: Position,
    },

    /// The character form was submitted.
    AddCharacter {
        /// Display name; blank becomes "Unnamed".
        label: String,
        /// Free-text personality.
        trait_text: String,
        /// Avatar reference (emoji or image key).
        avatar: String,
        /// Requested position; snapped to the grid.
        position: Position,
    },

    /// Remove an NPC. The user avatar cannot be removed.
    RemoveCharacter {
        /// Entity to remove.
        id: EntityId,
    },

    /// The chat input draft changed.
    ChatInput(String),

    /// Send the current draft to the active partner.
    Send,

    /// Begin a new round for a pair whose turn budget is used up.
    RestartAutonomous {
        /// One member.
        a: EntityId,
        /// The other member.
        b: EntityId,
    },

    /// Wipe every conversation, topic and turn count.
    ClearConversations,
}

/// Identifies one generation request across the async boundary.
///
/// Tokens are never reused; a completion whose token the board no longer
/// expects is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestToken(pub u64);

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// What to generate, plus what the fallback needs if generation fails.
#[derive(Debug, Clone)]
pub enum GenerationJob {
    /// A topic for a pair that just met.
    Topic {
        /// First member of the pair.
        first: Speaker,
        /// Second member of the pair.
        second: Speaker,
        /// Personalities of both, for canned topics.
        personalities: [Trait; 2],
    },
    /// The next NPC-to-NPC line.
    Line {
        /// Prompt inputs.
        request: LineRequest,
        /// Sender personality, for canned lines.
        personality: Trait,
    },
    /// An answer to the user.
    Reply {
        /// Prompt inputs.
        request: ReplyRequest,
        /// Partner personality, for canned replies.
        personality: Trait,
        /// Raw trait text, for trait-flavoured canned replies.
        trait_text: String,
        /// What the user just said.
        user_message: String,
    },
}

impl GenerationJob {
    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Topic { .. } => "topic",
            Self::Line { .. } => "line",
            Self::Reply { .. } => "reply",
        }
    }
}

/// Work the board asks its host to perform.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Run a generation job and feed the result back via [`Completion`].
    Generate {
        /// Token to echo back.
        token: RequestToken,
        /// The job.
        job: GenerationJob,
    },
    /// Open the character form at this grid-snapped position.
    PlaceCharacter {
        /// Snapped position.
        position: Position,
    },
}

/// Where a completed text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    /// The generation service answered.
    Generated,
    /// The service failed and a canned line was used.
    Fallback,
}

/// The outcome of a [`GenerationJob`]. Always carries usable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Token from the originating [`Effect::Generate`].
    pub token: RequestToken,
    /// Non-empty text.
    pub text: String,
    /// Whether the text is generated or canned.
    pub source: TextSource,
}

impl Completion {
    /// A generated completion.
    #[must_use]
    pub fn generated(token: RequestToken, text: impl Into<String>) -> Self {
        Self { token, text: text.into(), source: TextSource::Generated }
    }

    /// A canned completion.
    #[must_use]
    pub fn fallback(token: RequestToken, text: impl Into<String>) -> Self {
        Self { token, text: text.into(), source: TextSource::Fallback }
    }
}
