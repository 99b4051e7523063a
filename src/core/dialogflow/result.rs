//! The Result Model: flat `(slot, value, score)` records read by index.

use bytes::Bytes;

use super::error::RpcStatus;

/// Score attached to records that do not come from an intent match.
pub const ERROR_SCORE: i32 = 100;

/// One flat `(slot, value, score)` record of the Result Model.
///
/// `value` is raw bytes because the `output_audio` slot carries a WAV
/// payload; every other slot holds UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatResult {
    pub slot: String,
    pub value: Bytes,
    pub score: i32,
}

impl FlatResult {
    pub fn text(slot: impl Into<String>, value: impl Into<String>, score: i32) -> Self {
        Self {
            slot: slot.into(),
            value: Bytes::from(value.into()),
            score,
        }
    }

    pub fn binary(slot: impl Into<String>, value: Bytes, score: i32) -> Self {
        Self {
            slot: slot.into(),
            value,
            score,
        }
    }

    /// The value as text, with invalid UTF-8 replaced.
    pub fn value_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

/// Records describing a channel that could not be set up.
pub fn connection_failed_results() -> Vec<FlatResult> {
    vec![FlatResult::text("error", "Failed to connect", ERROR_SCORE)]
}

/// Records describing a failed RPC.
pub fn rpc_error_results(status: &RpcStatus) -> Vec<FlatResult> {
    vec![
        FlatResult::text("error", status.message.clone(), ERROR_SCORE),
        FlatResult::text("error_details", status.details.clone(), ERROR_SCORE),
        FlatResult::text("error_code", status.code.to_string(), ERROR_SCORE),
    ]
}
