//! Engine configuration.
//!
//! `EngineConfig` carries every tunable the orchestrator, queue, pool, and
//! recovery pipeline read. Construct via [`EngineConfig::builder`].

mod builder;
mod types;

pub use builder::EngineConfigBuilder;
pub use types::{ConfigOverrides, EngineConfig, RecoveryThresholds};
