//! Domain types exchanged between the session layer and the transport.
//!
//! These mirror the parts of the Dialogflow `v2beta1` messages the session
//! actually consumes. The gRPC adapter converts wire messages into these
//! types so the state machine, reader task and flattener never touch
//! generated protobuf code.

use bytes::Bytes;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Idle, no interaction active.
    #[default]
    Ready,
    /// A streaming interaction is in progress.
    Started,
    /// The reader task observed a normal end of the response stream.
    Finished,
    /// A stream write or the stream setup failed.
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Ready => "ready",
            SessionState::Started => "started",
            SessionState::Finished => "finished",
            SessionState::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoding of the audio the host writes into a streaming interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputAudioEncoding {
    /// 8-bit G.711 µ-law, the native format of most telephony trunks.
    #[default]
    Mulaw,
    Linear16,
}

/// Sample rate used for both telephony input audio and requested output audio.
pub const TELEPHONY_SAMPLE_RATE_HZ: i32 = 8000;

/// Matched intent identity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Intent {
    pub name: String,
    pub display_name: String,
}

/// One spoken line of a simple-response message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimpleResponse {
    pub text_to_speech: String,
    pub ssml: String,
}

/// Content of a synthesize-speech directive: either plain text or SSML.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechSource {
    Text(String),
    Ssml(String),
}

/// A fulfillment message, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum FulfillmentMessage {
    /// Plain text lines; each line is a separate occurrence.
    Text(Vec<String>),
    /// Simple voice responses; each entry is a separate occurrence.
    SimpleResponses(Vec<SimpleResponse>),
    /// Play a pre-recorded prompt.
    PlayAudio { audio_uri: String },
    /// Synthesize and play speech.
    SynthesizeSpeech(SpeechSource),
    /// Transfer the call to another number.
    TransferCall { phone_number: String },
    /// Hang up.
    TerminateCall,
    /// Rich-UI kinds (cards, chips, payloads) a phone call cannot render.
    Unsupported,
}

/// Sentiment of the query text.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sentiment {
    pub score: f32,
    pub magnitude: f32,
}

/// Structured result of one intent detection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub query_text: String,
    pub language_code: String,
    pub action: String,
    pub fulfillment_text: String,
    pub intent: Option<Intent>,
    pub intent_detection_confidence: f32,
    pub fulfillment_messages: Vec<FulfillmentMessage>,
    /// Free-form parameter tree extracted by the agent.
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub sentiment: Option<Sentiment>,
}

/// Reply to a unary (event) detection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectIntentResponse {
    pub response_id: String,
    pub query_result: Option<QueryResult>,
    pub output_audio: Bytes,
}

/// Kind of an interim recognition message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecognitionMessageType {
    #[default]
    Unspecified,
    Transcript,
    EndOfSingleUtterance,
}

/// Interim speech recognition result carried on a streaming response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamingRecognitionResult {
    pub message_type: RecognitionMessageType,
    pub transcript: String,
    pub is_final: bool,
    pub confidence: f32,
}

/// One message read from the streaming response side.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamingDetectIntentResponse {
    pub response_id: String,
    pub recognition_result: Option<StreamingRecognitionResult>,
    pub query_result: Option<QueryResult>,
    pub output_audio: Bytes,
}

/// Unary detection triggered by a named event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRequest {
    pub session_path: String,
    pub event_name: String,
    pub language_code: String,
    /// Ask for LINEAR16 output audio alongside the result.
    pub output_audio: bool,
    pub sentiment_analysis: bool,
}

/// Initial configuration frame of a streaming interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingConfig {
    pub session_path: String,
    /// Let the service detect the end of speech on its own.
    pub single_utterance: bool,
    pub audio_encoding: InputAudioEncoding,
    pub sample_rate_hertz: i32,
    pub language_code: String,
    pub model: Option<String>,
    pub phrase_hints: Vec<String>,
    pub output_audio: bool,
    pub sentiment_analysis: bool,
}

/// A frame written to the request side of a streaming interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamingFrame {
    /// Always the first frame of an interaction.
    Config(StreamingConfig),
    /// Raw audio payload in the configured encoding.
    Audio(Bytes),
}

/// Builds the `projects/<project>/agent/sessions/<session>` resource name.
pub fn session_path(project_id: &str, session_id: &str) -> String {
    format!("projects/{project_id}/agent/sessions/{session_id}")
}
