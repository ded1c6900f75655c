//! # Fragment Core Library
//!
//! Renderer-agnostic building blocks for a board of avatars that talk when
//! they come close to one another:
//!
//! - **Types**: entities, positions, pair keys, messages, personality traits
//! - **Proximity**: which pairs are within conversational range
//! - **Conversations**: per-pair history, topic and turn budget
//! - **Fallback**: canned dialogue when the generation service is down
//! - **Persistence**: key→value snapshots (SQLite or in-memory)
//!
//! Nothing in this crate is async or touches the network; orchestration and
//! generation live in `fragment-board` and `fragment-llm`.

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod conversation;
pub mod error;
pub mod fallback;
pub mod persistence;
pub mod proximity;
pub mod types;

pub use config::FragmentConfig;
pub use conversation::{Conversation, ConversationStore};
pub use error::FragmentError;
pub use proximity::{Relationship, RelationshipKind, RelationshipSet};
pub use types::*;
