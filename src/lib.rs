//! Glowmarkt Meter Bridge Library
//!
//! Polls the Glowmarkt smart-meter API, sums today's half-hourly readings per
//! resource, derives costs from a local tariff and publishes the result as a
//! snapshot for a host platform to read.

pub mod config;
pub mod coordinator;
pub mod costs;
pub mod glowmarkt;
pub mod reading_cache;
pub mod scheduler;
pub mod sensor;

// Re-export commonly used types for easier access
pub use config::GlowConfig;
pub use coordinator::{Coordinator, RefreshState, Snapshot, UpdateFailed};
pub use costs::{CostKind, Costs, TariffConfig};
pub use glowmarkt::{GlowmarktClient, GlowmarktError, Resource};
pub use reading_cache::ReadingCache;
pub use scheduler::{CoordinatorHandle, Scheduler};
pub use sensor::{sensor_values, SensorValue};
