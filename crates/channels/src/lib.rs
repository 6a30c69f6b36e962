//! Outbound delivery for drip steps: template rendering and the SMS
//! transport.

#![warn(clippy::unwrap_used)]

pub mod sms;
pub mod templates;

pub use sms::{SmsMessage, SmsProvider, SmsStatus};
pub use templates::DripTemplateRenderer;
