//! Infrastructure layer: configuration, storage adapters, level cache and the
//! follow-up scheduler.

pub mod config;
pub mod level_cache;
pub mod memory;
pub mod postgres;
pub mod scheduler;

mod integration_tests;

pub use config::{CompanyProfile, ConfigError, SchedulerConfig};
pub use level_cache::CachedLevelStore;
pub use scheduler::{RunSummary, Scheduler, SchedulerHandle};
