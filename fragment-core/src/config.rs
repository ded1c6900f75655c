//! Configuration for the Fragment board.
//!
//! Maps directly to `fragment.toml`. Every section and field has a default,
//! so an empty file (or no file at all) yields the stock tuning.

use serde::{Deserialize, Serialize};

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FragmentConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Conversational range and movement.
    #[serde(default)]
    pub proximity: ProximityConfig,
    /// NPC-to-NPC conversation tuning.
    #[serde(default)]
    pub autonomous: AutonomousConfig,
    /// User-facing chat tuning.
    #[serde(default)]
    pub chat: ChatConfig,
    /// Dialogue generation service settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Snapshot persistence settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl FragmentConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `FragmentError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::FragmentError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level / `EnvFilter` directive: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines instead of the human-readable format.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Conversational range and movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProximityConfig {
    /// Maximum distance (inclusive) at which two entities can talk.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Grid cell size; one arrow-key step moves the user by this much.
    #[serde(default = "default_grid_size")]
    pub grid_size: i32,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            threshold: 120.0,
            grid_size: 50,
        }
    }
}

/// What happens when a capped NPC pair meets again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapPolicy {
    /// After separating and reconverging, start a new round of turns on the
    /// same conversation (history and topic kept).
    Resume,
    /// A capped pair never talks autonomously again.
    #[default]
    PermanentlyEnded,
}

/// NPC-to-NPC conversation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomousConfig {
    /// Turn cap per round of an autonomous conversation.
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,
    /// Lower bound of the randomized delay between turns.
    #[serde(default = "default_interval_min")]
    pub interval_min_ms: u64,
    /// Upper bound of the randomized delay between turns.
    #[serde(default = "default_interval_max")]
    pub interval_max_ms: u64,
    /// How many recent messages are sent as context for the next line.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Topic used when none has been generated yet.
    #[serde(default = "default_topic")]
    pub default_topic: String,
    /// Behaviour for pairs that already hit the cap.
    #[serde(default)]
    pub cap_policy: CapPolicy,
}

impl Default for AutonomousConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            interval_min_ms: 3000,
            interval_max_ms: 8000,
            history_window: 2,
            default_topic: "casual conversation".to_string(),
            cap_policy: CapPolicy::default(),
        }
    }
}

/// User-facing chat tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Shortest typing delay before a reply appears.
    #[serde(default = "default_typing_min")]
    pub typing_min_ms: u64,
    /// Longest typing delay before a reply appears.
    #[serde(default = "default_typing_max")]
    pub typing_max_ms: u64,
    /// Typing delay per character of the reply.
    #[serde(default = "default_typing_per_char")]
    pub typing_ms_per_char: u64,
    /// Let fallback replies quote the user's last message.
    #[serde(default = "default_true")]
    pub echo_user_input: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            typing_min_ms: 600,
            typing_max_ms: 2500,
            typing_ms_per_char: 30,
            echo_user_input: true,
        }
    }
}

/// Dialogue generation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider: "gemini" or "none".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Base URL of the generation API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Nucleus sampling mass.
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Output token cap.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Hard timeout for any generation call in milliseconds.
    #[serde(default = "default_timeout")]
    pub request_timeout_ms: u64,
    /// Retries before the caller falls back to canned lines.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            temperature: 0.8,
            top_p: 0.9,
            max_output_tokens: 300,
            request_timeout_ms: 10_000,
            max_retries: 1,
        }
    }
}

/// Snapshot persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Backend: "sqlite", "memory" or "none".
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Database path for the sqlite backend.
    #[serde(default = "default_path")]
    pub path: String,
    /// Store and verify a CRC-32 per snapshot.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: "fragment.db".to_string(),
            checksum_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_threshold() -> f64 { 120.0 }
fn default_grid_size() -> i32 { 50 }
fn default_max_messages() -> u32 { 10 }
fn default_interval_min() -> u64 { 3000 }
fn default_interval_max() -> u64 { 8000 }
fn default_history_window() -> usize { 2 }
fn default_topic() -> String { "casual conversation".to_string() }
fn default_typing_min() -> u64 { 600 }
fn default_typing_max() -> u64 { 2500 }
fn default_typing_per_char() -> u64 { 30 }
fn default_provider() -> String { "gemini".to_string() }
fn default_base_url() -> String { "https://generativelanguage.googleapis.com".to_string() }
fn default_model() -> String { "gemini-2.0-flash".to_string() }
fn default_api_key_env() -> String { "GEMINI_API_KEY".to_string() }
fn default_temperature() -> f32 { 0.8 }
fn default_top_p() -> f32 { 0.9 }
fn default_max_output_tokens() -> u32 { 300 }
fn default_timeout() -> u64 { 10_000 }
fn default_max_retries() -> u32 { 1 }
fn default_backend() -> String { "sqlite".to_string() }
fn default_path() -> String { "fragment.db".to_string() }
