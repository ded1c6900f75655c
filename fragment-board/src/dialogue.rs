//! Dialogue adapter: generation with a canned fallback.
//!
//! Callers hand in a [`GenerationJob`] and always get text back. When the
//! generator fails, the adapter logs the error and draws a line from the
//! personality tables in `fragment_core::fallback` instead.

use std::sync::Arc;

use fragment_core::config::ChatConfig;
use fragment_core::fallback;
use fragment_llm::DialogueGenerator;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::events::{Completion, GenerationJob, RequestToken};

/// Wraps a [`DialogueGenerator`] so that no call ever fails.
pub struct DialogueAdapter {
    generator: Arc<dyn DialogueGenerator>,
    rng: Mutex<StdRng>,
    echo_user_input: bool,
}

impl DialogueAdapter {
    /// Adapter with an entropy-seeded fallback picker.
    #[must_use]
    pub fn new(generator: Arc<dyn DialogueGenerator>, chat: &ChatConfig) -> Self {
        Self::with_rng(generator, chat, StdRng::from_entropy())
    }

    /// Adapter with a fixed fallback picker, for reproducible runs.
    #[must_use]
    pub fn with_rng(generator: Arc<dyn DialogueGenerator>, chat: &ChatConfig, rng: StdRng) -> Self {
        Self {
            generator,
            rng: Mutex::new(rng),
            echo_user_input: chat.echo_user_input,
        }
    }

    /// Run `job` and return a completion for `token`.
    pub async fn run(&self, token: RequestToken, job: &GenerationJob) -> Completion {
        let result = match job {
            GenerationJob::Topic { first, second, .. } => self.generator.generate_topic(first, second).await,
            GenerationJob::Line { request, .. } => self.generator.generate_line(request).await,
            GenerationJob::Reply { request, .. } => self.generator.generate_reply(request).await,
        };

        match result {
            Ok(text) if !text.trim().is_empty() => {
                debug!(%token, kind = job.kind(), "Generated dialogue");
                Completion::generated(token, text.trim())
            }
            Ok(_) => {
                warn!(%token, kind = job.kind(), "Generator returned blank text, using fallback");
                Completion::fallback(token, self.fallback(job))
            }
            Err(e) => {
                warn!(%token, kind = job.kind(), error = %e, "Generation failed, using fallback");
                Completion::fallback(token, self.fallback(job))
            }
        }
    }

    /// Canned text for `job`.
    #[must_use]
    pub fn fallback(&self, job: &GenerationJob) -> String {
        let mut rng = self.rng.lock();
        match job {
            GenerationJob::Topic { personalities, .. } => fallback::topic(&mut *rng, personalities),
            GenerationJob::Line { request, personality } => fallback::line(&mut *rng, *personality, &request.topic),
            GenerationJob::Reply { personality, trait_text, user_message, .. } => {
                let echo = self.echo_user_input.then_some(user_message.as_str());
                fallback::reply(&mut *rng, *personality, trait_text, echo)
            }
        }
    }
}

/// How long the partner "types" before a reply of `text` appears.
#[must_use]
pub fn typing_delay(text: &str, chat: &ChatConfig) -> u64 {
    let chars = u64::try_from(text.chars().count()).unwrap_or(u64::MAX);
    let lo = chat.typing_min_ms.min(chat.typing_max_ms);
    chars.saturating_mul(chat.typing_ms_per_char).clamp(lo, chat.typing_max_ms)
}
