//! # Fragment Board
//!
//! Orchestration for a board of avatars. The user walks around; NPCs within
//! range of the user chat with them, NPCs within range of each other chat
//! among themselves until their turn budget runs out.
//!
//! ## Architecture
//!
//! ```text
//! runtime (tokio: input, timers, completions)
//!   │
//!   ▼
//! board: handle / advance / complete
//!   ├── session       user ↔ NPC chat
//!   ├── autonomous    NPC ↔ NPC pairings
//!   ├── scheduler     turn and reveal timers
//!   └── presentation  NodeView records
//!
//! dialogue: DialogueGenerator + fallback
//! ```
//!
//! [`Board`] is a plain state machine: every input returns the [`Effect`]s
//! it wants performed, and every generation result comes back as a
//! [`Completion`] tagged with the [`RequestToken`] it answers. The
//! [`runtime`] module hosts it on tokio.

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod autonomous;
pub mod board;
pub mod dialogue;
pub mod events;
pub mod presentation;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod telemetry;

pub use board::Board;
pub use dialogue::DialogueAdapter;
pub use events::{BoardEvent, Completion, Effect, GenerationJob, RequestToken, TextSource};
pub use presentation::NodeView;
pub use runtime::{BoardRuntime, RuntimeHandle};
