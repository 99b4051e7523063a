//! Seams between the session layer and the remote service.
//!
//! The session state machine only talks to these traits. The production
//! implementation lives in [`super::grpc`]; tests plug in scripted fakes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::error::{DialogflowError, RpcStatus};
use super::model::{DetectIntentResponse, EventRequest, StreamingDetectIntentResponse, StreamingFrame};
use super::synth::SynthesisRequest;

/// Opens connections to the intent service.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Builds an authenticated connection to `endpoint`.
    ///
    /// `auth_key` is either inline service-account JSON, a path to a
    /// credentials file, or empty for application default credentials.
    async fn connect(
        &self,
        endpoint: &str,
        auth_key: &str,
    ) -> Result<Arc<dyn IntentService>, DialogflowError>;

    /// Builds a speech synthesizer for `endpoint`.
    async fn connect_synthesizer(
        &self,
        endpoint: &str,
        auth_key: &str,
    ) -> Result<Arc<dyn SpeechSynthesizer>, DialogflowError>;
}

/// One established connection to the intent service.
#[async_trait]
pub trait IntentService: Send + Sync {
    /// Unary detection, used for events.
    async fn detect_intent(&self, request: EventRequest) -> Result<DetectIntentResponse, RpcStatus>;

    /// Opens a bidirectional streaming detection for `session_path`.
    async fn streaming_detect_intent(
        &self,
        session_path: &str,
    ) -> Result<Arc<dyn IntentStream>, RpcStatus>;
}

/// An open bidirectional stream.
///
/// Writes and reads happen on different tasks, so every method takes
/// `&self`.
#[async_trait]
pub trait IntentStream: Send + Sync {
    /// Sends one frame. Returns `false` once the stream can no longer take
    /// writes.
    async fn write(&self, frame: StreamingFrame) -> bool;

    /// Next response, or `None` when the response side is exhausted.
    async fn read(&self) -> Option<StreamingDetectIntentResponse>;

    /// Half-closes the request side. Idempotent.
    fn close_writes(&self);

    /// Waits for the call to end and returns its final status.
    async fn finish(&self) -> Result<(), RpcStatus>;
}

/// Text-to-speech backend.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns LINEAR16 WAV audio for the request.
    async fn synthesize(&self, request: SynthesisRequest) -> Result<Bytes, RpcStatus>;
}
