//! SMS delivery status webhook.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Form;
use serde::Deserialize;

use crate::rest::AppState;

/// Twilio-style form-encoded status callback.
#[derive(Debug, Deserialize)]
pub struct SmsStatusCallback {
    #[serde(rename = "MessageSid")]
    pub message_sid: String,
    #[serde(rename = "MessageStatus")]
    pub message_status: String,
    #[serde(rename = "ErrorCode", default)]
    pub error_code: Option<String>,
}

/// POST /v1/webhooks/sms-status
pub async fn sms_status(
    State(state): State<AppState>,
    Form(callback): Form<SmsStatusCallback>,
) -> StatusCode {
    let Some(sms) = state.sms.as_ref() else {
        return StatusCode::NOT_FOUND;
    };
    if sms.handle_status_callback(
        &callback.message_sid,
        &callback.message_status,
        callback.error_code.as_deref(),
    ) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}
