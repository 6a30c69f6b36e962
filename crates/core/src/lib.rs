//! Shared domain types, configuration, errors, and collaborator seams for the
//! drip campaign engine.

pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod event_bus;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::{DripError, DripResult};
