//! Core types for generation requests and responses.

use serde::{Deserialize, Serialize};

/// Who authored a conversation turn, from the model's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person talking to the character (or the instructions).
    User,
    /// The character being voiced.
    Model,
}

/// One turn of the conversation sent to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Author role.
    pub role: Role,
    /// Turn text.
    pub text: String,
}

impl Turn {
    /// A `user` turn.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    /// A `model` turn.
    #[must_use]
    pub fn model(text: impl Into<String>) -> Self {
        Self { role: Role::Model, text: text.into() }
    }
}

/// Sampling settings shared by every request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
    /// Temperature (0.0 = deterministic, 1.0+ = creative).
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Output token cap.
    pub max_output_tokens: u32,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.9,
            max_output_tokens: 300,
        }
    }
}

/// A request to the generation service.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    /// Persona, rules and constraints.
    pub system_prompt: String,
    /// Conversation so far, oldest first.
    pub turns: Vec<Turn>,
    /// Sampling settings.
    pub sampling: Sampling,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl GenerationRequest {
    /// A request with default sampling and a 10s timeout.
    #[must_use]
    pub fn new(system_prompt: impl Into<String>, turns: Vec<Turn>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            turns,
            sampling: Sampling::default(),
            timeout_ms: 10_000,
        }
    }

    /// Override sampling.
    #[must_use]
    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// A successful response.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationResponse {
    /// The generated text, trimmed and non-empty.
    pub text: String,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Which model answered.
    pub model: String,
}

/// Who is talking: enough of a character to build a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Speaker {
    /// Stable id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-text personality.
    pub persona: String,
}

impl Speaker {
    /// Create a speaker.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, persona: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            persona: persona.into(),
        }
    }
}

/// A past line, attributed by speaker id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLine {
    /// Speaker id.
    pub speaker: String,
    /// What they said.
    pub text: String,
    /// Whether the human user said it.
    pub by_user: bool,
}

impl HistoryLine {
    /// A line spoken by a character.
    #[must_use]
    pub fn character(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self { speaker: speaker.into(), text: text.into(), by_user: false }
    }

    /// A line spoken by the user, whatever id the user goes by.
    #[must_use]
    pub fn user(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self { speaker: speaker.into(), text: text.into(), by_user: true }
    }
}

/// Everything needed to voice the next line of an NPC-to-NPC exchange.
#[derive(Debug, Clone)]
pub struct LineRequest {
    /// Who speaks.
    pub sender: Speaker,
    /// Who listens.
    pub receiver: Speaker,
    /// What the pair is talking about.
    pub topic: String,
    /// Most recent lines, oldest first (already windowed by the caller).
    pub history: Vec<HistoryLine>,
}

/// Everything needed to answer the user in a user-facing chat.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    /// The NPC that answers.
    pub character: Speaker,
    /// Full user-facing history, oldest first; `by_user` marks the user's lines.
    pub history: Vec<HistoryLine>,
}
