//! The seam between the board and whatever produces dialogue.
//!
//! The board only ever talks to a [`DialogueGenerator`]. [`LlmClient`] is the
//! production implementation; tests plug in scripted generators.

use async_trait::async_trait;

use crate::client::LlmClient;
use crate::error::GenerationError;
use crate::prompt;
use crate::types::{LineRequest, ReplyRequest, Speaker};

/// Produces topics, autonomous lines and user replies.
///
/// Every call may fail; the caller substitutes canned text.
#[async_trait]
pub trait DialogueGenerator: Send + Sync {
    /// A short topic for two NPCs who just met.
    async fn generate_topic(&self, first: &Speaker, second: &Speaker) -> Result<String, GenerationError>;

    /// The next line of an NPC-to-NPC exchange.
    async fn generate_line(&self, request: &LineRequest) -> Result<String, GenerationError>;

    /// The NPC's answer to the user's latest message.
    async fn generate_reply(&self, request: &ReplyRequest) -> Result<String, GenerationError>;
}

#[async_trait]
impl DialogueGenerator for LlmClient {
    async fn generate_topic(&self, first: &Speaker, second: &Speaker) -> Result<String, GenerationError> {
        let request = self.prepare(prompt::topic_request(first, second));
        let response = self.generate(&request).await?;
        prompt::clean_topic(&response.text).ok_or(GenerationError::EmptyResponse)
    }

    async fn generate_line(&self, request: &LineRequest) -> Result<String, GenerationError> {
        let built = self.prepare(prompt::autonomous_line_request(request));
        let response = self.generate(&built).await?;
        prompt::clean_line(&response.text, &request.sender.name).ok_or(GenerationError::EmptyResponse)
    }

    async fn generate_reply(&self, request: &ReplyRequest) -> Result<String, GenerationError> {
        let built = self.prepare(prompt::character_reply_request(request));
        let response = self.generate(&built).await?;
        Ok(response.text)
    }
}
