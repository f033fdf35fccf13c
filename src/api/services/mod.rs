pub mod collect;
pub mod health;

pub use collect::{CollectService, CollectState, collect_routes};
pub use health::{AppStartTime, HealthService, health_routes};
