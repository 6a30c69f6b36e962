//! Drip campaign engine: enrollment lifecycle, the send dispatcher, the
//! folder watcher, and the policies they share.

#![warn(clippy::unwrap_used)]

pub mod context;
pub mod demo;
pub mod dispatcher;
pub mod enrollment;
pub mod folder_watch;
pub mod schedule;
pub mod state_machine;
pub mod store;
pub mod suppression;
pub mod watch_store;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod testing;

pub use context::EngineContext;
pub use dispatcher::{Dispatcher, DispatcherSettings, TickReport, JOB_DRIP_DISPATCH};
pub use enrollment::{BulkReport, EnrollmentService};
pub use folder_watch::{
    FolderTickReport, FolderWatchSettings, FolderWatcher, WatchReport, JOB_FOLDER_WATCH,
};
pub use schedule::SendSchedule;
pub use state_machine::EnrollmentStateMachine;
pub use store::{Claim, EnrollmentStore, InMemoryEnrollmentStore};
pub use suppression::{SuppressionDecision, SuppressionPolicy};
pub use watch_store::{FolderWatchStore, InMemoryFolderWatchStore};
