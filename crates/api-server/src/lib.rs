#![warn(clippy::unwrap_used)]

pub mod cron_rest;
pub mod enrollment_rest;
pub mod rest;
pub mod server;
pub mod webhook_rest;

pub use rest::AppState;
pub use server::{router, ApiServer};
