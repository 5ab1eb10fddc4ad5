//! Tracing bootstrap shared by hosts embedding the engine.

use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;

/// Install a fmt subscriber filtered by `config.log_filter`.
///
/// `RUST_LOG` wins over the configured filter when set. Returns `false` if a
/// global subscriber was already installed, in which case nothing changes.
pub fn init_tracing(config: &EngineConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
