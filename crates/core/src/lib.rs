pub mod config;
pub mod constants;
pub mod equals;
pub mod error;
pub mod query;
pub mod telemetry;

pub use config::EngineConfig;
pub use constants::*;
pub use equals::{equals, equals_unordered};
pub use error::*;
