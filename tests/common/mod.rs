//! Scripted in-memory transport shared by the integration tests.
//!
//! - **MockProvider**: hands out one [`MockService`], optionally failing to
//!   connect, and counts connection attempts
//! - **MockService**: answers event detections from a script and opens
//!   queued [`MockStream`]s
//! - **MockStream**: records written frames and replays scripted responses
//! - **RecordingLogger**: keeps every call event for later inspection

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use dfegrpc::core::dialogflow::{
    CallLogger, ChannelProvider, DetectIntentResponse, DialogflowClient, DialogflowError,
    EventRequest, Intent, IntentService, IntentStream, LogField, QueryResult,
    RecognitionMessageType, RpcStatus, SpeechSynthesizer, StreamingDetectIntentResponse,
    StreamingFrame, StreamingRecognitionResult, SynthesisRequest, UserData,
};

// ============================================================================
// Stream
// ============================================================================

pub struct MockStream {
    frames: Mutex<Vec<StreamingFrame>>,
    responses: Mutex<VecDeque<StreamingDetectIntentResponse>>,
    /// Writes succeed while fewer than this many frames were accepted.
    accept_limit: Option<usize>,
    /// Responses are only released once the request side is half-closed.
    hold_until_closed: bool,
    closed: watch::Sender<bool>,
    status: Result<(), RpcStatus>,
    finish_calls: AtomicUsize,
}

impl MockStream {
    /// Replays `responses` right away, then ends.
    pub fn replaying(responses: Vec<StreamingDetectIntentResponse>) -> Self {
        Self::build(responses, false)
    }

    /// Replays `responses` only after the caller stops writing.
    pub fn held_open(responses: Vec<StreamingDetectIntentResponse>) -> Self {
        Self::build(responses, true)
    }

    fn build(responses: Vec<StreamingDetectIntentResponse>, hold_until_closed: bool) -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into()),
            accept_limit: None,
            hold_until_closed,
            closed: watch::Sender::new(false),
            status: Ok(()),
            finish_calls: AtomicUsize::new(0),
        }
    }

    pub fn accepting(mut self, frames: usize) -> Self {
        self.accept_limit = Some(frames);
        self
    }

    pub fn finishing_with(mut self, status: RpcStatus) -> Self {
        self.status = Err(status);
        self
    }

    pub fn frames(&self) -> Vec<StreamingFrame> {
        self.frames.lock().clone()
    }

    pub fn finish_calls(&self) -> usize {
        self.finish_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl IntentStream for MockStream {
    async fn write(&self, frame: StreamingFrame) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut frames = self.frames.lock();
        if self.accept_limit.is_some_and(|limit| frames.len() >= limit) {
            return false;
        }
        frames.push(frame);
        true
    }

    async fn read(&self) -> Option<StreamingDetectIntentResponse> {
        if self.hold_until_closed {
            let mut closed = self.closed.subscribe();
            let _ = closed.wait_for(|closed| *closed).await;
        }
        self.responses.lock().pop_front()
    }

    fn close_writes(&self) {
        self.closed.send_replace(true);
    }

    async fn finish(&self) -> Result<(), RpcStatus> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        self.status.clone()
    }
}

// ============================================================================
// Service
// ============================================================================

pub struct MockService {
    event_reply: Mutex<Result<DetectIntentResponse, RpcStatus>>,
    event_requests: Mutex<Vec<EventRequest>>,
    streams: Mutex<VecDeque<Arc<MockStream>>>,
    stream_error: Mutex<Option<RpcStatus>>,
    opened_paths: Mutex<Vec<String>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            event_reply: Mutex::new(Ok(DetectIntentResponse::default())),
            event_requests: Mutex::new(Vec::new()),
            streams: Mutex::new(VecDeque::new()),
            stream_error: Mutex::new(None),
            opened_paths: Mutex::new(Vec::new()),
        }
    }

    pub fn reply_to_events(&self, reply: Result<DetectIntentResponse, RpcStatus>) {
        *self.event_reply.lock() = reply;
    }

    pub fn event_requests(&self) -> Vec<EventRequest> {
        self.event_requests.lock().clone()
    }

    /// Queues a stream for the next `streaming_detect_intent` call.
    pub fn push_stream(&self, stream: MockStream) -> Arc<MockStream> {
        let stream = Arc::new(stream);
        self.streams.lock().push_back(stream.clone());
        stream
    }

    pub fn refuse_streams(&self, status: RpcStatus) {
        *self.stream_error.lock() = Some(status);
    }

    pub fn opened_paths(&self) -> Vec<String> {
        self.opened_paths.lock().clone()
    }
}

#[async_trait]
impl IntentService for MockService {
    async fn detect_intent(&self, request: EventRequest) -> Result<DetectIntentResponse, RpcStatus> {
        self.event_requests.lock().push(request);
        self.event_reply.lock().clone()
    }

    async fn streaming_detect_intent(
        &self,
        session_path: &str,
    ) -> Result<Arc<dyn IntentStream>, RpcStatus> {
        if let Some(status) = self.stream_error.lock().clone() {
            return Err(status);
        }
        self.opened_paths.lock().push(session_path.to_string());
        let stream = self
            .streams
            .lock()
            .pop_front()
            .unwrap_or_else(|| Arc::new(MockStream::held_open(Vec::new())));
        Ok(stream as Arc<dyn IntentStream>)
    }
}

// ============================================================================
// Synthesizer
// ============================================================================

pub struct MockSynthesizer {
    pub audio: Bytes,
    pub requests: Mutex<Vec<SynthesisRequest>>,
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<Bytes, RpcStatus> {
        self.requests.lock().push(request);
        Ok(self.audio.clone())
    }
}

// ============================================================================
// Provider
// ============================================================================

pub struct MockProvider {
    pub service: Arc<MockService>,
    pub synthesizer: Arc<MockSynthesizer>,
    fail_connect: bool,
    connects: AtomicUsize,
    endpoints: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            service: Arc::new(MockService::new()),
            synthesizer: Arc::new(MockSynthesizer {
                audio: riff_audio(16),
                requests: Mutex::new(Vec::new()),
            }),
            fail_connect: false,
            connects: AtomicUsize::new(0),
            endpoints: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            fail_connect: true,
            ..Self::new()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().clone()
    }
}

#[async_trait]
impl ChannelProvider for MockProvider {
    async fn connect(
        &self,
        endpoint: &str,
        _auth_key: &str,
    ) -> Result<Arc<dyn IntentService>, DialogflowError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().push(endpoint.to_string());
        if self.fail_connect {
            return Err(DialogflowError::ConnectionFailed(format!(
                "{endpoint}: connection refused"
            )));
        }
        Ok(self.service.clone() as Arc<dyn IntentService>)
    }

    async fn connect_synthesizer(
        &self,
        endpoint: &str,
        _auth_key: &str,
    ) -> Result<Arc<dyn SpeechSynthesizer>, DialogflowError> {
        self.endpoints.lock().push(endpoint.to_string());
        if self.fail_connect {
            return Err(DialogflowError::ConnectionFailed(format!(
                "{endpoint}: connection refused"
            )));
        }
        Ok(self.synthesizer.clone() as Arc<dyn SpeechSynthesizer>)
    }
}

// ============================================================================
// Call logger
// ============================================================================

#[derive(Default)]
pub struct RecordingLogger {
    events: Mutex<Vec<(String, Vec<LogField>)>>,
}

impl RecordingLogger {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().iter().map(|(event, _)| event.clone()).collect()
    }

    pub fn fields(&self, event: &str) -> Option<Vec<LogField>> {
        self.events
            .lock()
            .iter()
            .find(|(name, _)| name == event)
            .map(|(_, fields)| fields.clone())
    }
}

impl CallLogger for RecordingLogger {
    fn log_call(&self, _user_data: Option<&UserData>, event: &str, fields: &[LogField]) {
        self.events.lock().push((event.to_string(), fields.to_vec()));
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn client(provider: Arc<MockProvider>) -> (DialogflowClient, Arc<RecordingLogger>) {
    let logger = Arc::new(RecordingLogger::default());
    let client = DialogflowClient::with_provider(provider, logger.clone());
    (client, logger)
}

pub fn query_result(query_text: &str, confidence: f32) -> QueryResult {
    QueryResult {
        query_text: query_text.to_string(),
        language_code: "en-US".to_string(),
        action: "input.welcome".to_string(),
        fulfillment_text: "Hi there".to_string(),
        intent: Some(Intent {
            name: "projects/acme-ivr/agent/intents/1234".to_string(),
            display_name: "Default Welcome Intent".to_string(),
        }),
        intent_detection_confidence: confidence,
        ..Default::default()
    }
}

pub fn final_result(response_id: &str, query: QueryResult) -> StreamingDetectIntentResponse {
    StreamingDetectIntentResponse {
        response_id: response_id.to_string(),
        query_result: Some(query),
        ..Default::default()
    }
}

pub fn transcript(text: &str, is_final: bool, confidence: f32) -> StreamingDetectIntentResponse {
    StreamingDetectIntentResponse {
        recognition_result: Some(StreamingRecognitionResult {
            message_type: RecognitionMessageType::Transcript,
            transcript: text.to_string(),
            is_final,
            confidence,
        }),
        ..Default::default()
    }
}

/// A minimal WAV container with `payload` bytes of silence.
pub fn riff_audio(payload: usize) -> Bytes {
    let mut audio = Vec::with_capacity(payload + 8);
    audio.extend_from_slice(b"RIFF");
    audio.extend_from_slice(&(payload as i32).to_le_bytes());
    audio.resize(payload + 8, 0);
    Bytes::from(audio)
}

pub fn slots(results: &[dfegrpc::FlatResult]) -> Vec<String> {
    results.iter().map(|r| r.slot.clone()).collect()
}
