//! # fragment-llm: Dialogue Generation for Fragment
//!
//! Everything that talks to a text-generation service lives here:
//!   - **Gemini** `generateContent` client with timeouts and retries
//!   - **Prompt templates** for user replies, pair topics and NPC lines
//!   - **[`DialogueGenerator`]**, the async seam the board drives
//!
//! Nothing in this crate knows about the board. Every failure is a
//! [`GenerationError`]; the board answers it with canned dialogue.

pub mod client;
pub mod error;
pub mod generator;
pub mod prompt;
pub mod types;

pub use client::{LlmClient, LlmProvider};
pub use error::GenerationError;
pub use generator::DialogueGenerator;
pub use types::{GenerationRequest, GenerationResponse, HistoryLine, LineRequest, ReplyRequest, Sampling, Speaker};
