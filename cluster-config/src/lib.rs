//! Engine configuration (ambient stack) and the member-configuration
//! applier (spec §4.8).

mod applier;
mod logging;
mod settings;

pub use applier::{Config, ConfigTarget, SetMode, SysvarChange};
pub use logging::init_tracing;
pub use settings::EngineConfig;
