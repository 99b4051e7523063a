//! Dialogflow voice-intent sessions.
//!
//! A [`DialogflowClient`] hands out [`Session`]s. Each session runs either a
//! one-shot event detection ([`Session::recognize_event`]) or a streaming
//! interaction fed with telephony audio ([`Session::start_recognition`],
//! [`Session::write_audio`], [`Session::stop_recognition`]). Every
//! completed interaction leaves a flat, ordered Result Model behind that
//! hosts read by index.

pub mod client;
pub mod error;
pub mod flatten;
pub mod grpc;
pub mod model;
mod reader;
pub mod result;
pub mod session;
pub mod synth;
pub mod telemetry;
pub mod transport;

pub use client::DialogflowClient;
pub use error::{DialogflowError, RpcStatus};
pub use flatten::{FlattenInput, RiffCheck, check_riff, confidence_score, flatten};
pub use grpc::GrpcChannelProvider;
pub use model::{
    DetectIntentResponse, EventRequest, FulfillmentMessage, InputAudioEncoding, Intent,
    QueryResult, RecognitionMessageType, Sentiment, SessionState, SimpleResponse, SpeechSource,
    StreamingConfig, StreamingDetectIntentResponse, StreamingFrame, StreamingRecognitionResult,
    session_path,
};
pub use result::{ERROR_SCORE, FlatResult};
pub use session::{DEFAULT_EVENT_LANGUAGE, DEFAULT_STREAMING_LANGUAGE, Session};
pub use synth::SynthesisRequest;
pub use telemetry::{CallLogger, LogField, LogValue, NoopCallLogger, TracingCallLogger, UserData};
pub use transport::{ChannelProvider, IntentService, IntentStream, SpeechSynthesizer};
