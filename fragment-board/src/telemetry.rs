//! Tracing setup.

use fragment_core::config::GeneralConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Build the filter: `RUST_LOG` when set, otherwise `general.log_level`.
#[must_use]
pub fn env_filter(general: &GeneralConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&general.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber, human-readable or JSON lines.
///
/// Returns `false` if a subscriber was already installed.
pub fn init(general: &GeneralConfig) -> bool {
    let registry = tracing_subscriber::registry().with(env_filter(general));
    let result = if general.json_logs {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    result.is_ok()
}
