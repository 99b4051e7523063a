//! gRPC transport for the Dialogflow `v2beta1` Sessions API and the
//! Text-to-Speech `v1` API.
//!
//! Implements the [`transport`](super::transport) traits on top of tonic
//! and converts between the generated protobuf messages and the domain
//! model.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use google_api_proto::google::cloud::dialogflow::v2beta1 as df;
use google_api_proto::google::cloud::dialogflow::v2beta1::sessions_client::SessionsClient;
use google_api_proto::google::cloud::texttospeech::v1 as tts;
use google_api_proto::google::cloud::texttospeech::v1::text_to_speech_client::TextToSpeechClient;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tonic::Streaming;
use tracing::{debug, error, info, warn};

use super::error::{DialogflowError, RpcStatus};
use super::model::{
    DetectIntentResponse, EventRequest, FulfillmentMessage, InputAudioEncoding, Intent,
    QueryResult, RecognitionMessageType, Sentiment, SimpleResponse, SpeechSource,
    StreamingConfig, StreamingDetectIntentResponse, StreamingFrame, StreamingRecognitionResult,
    TELEPHONY_SAMPLE_RATE_HZ,
};
use super::synth::SynthesisRequest;
use super::transport::{ChannelProvider, IntentService, IntentStream, SpeechSynthesizer};
use crate::core::providers::google::{
    AuthenticatedChannel, CredentialSource, GOOGLE_CLOUD_PLATFORM_SCOPE, GoogleAuthClient,
    GoogleError, create_authenticated_channel,
};

/// Frames buffered between the session and the outgoing request stream.
const REQUEST_BUFFER: usize = 32;

/// Largest response accepted; responses with output audio run well past
/// tonic's 4 MiB default.
const MAX_RESPONSE_BYTES: usize = 32 * 1024 * 1024;

/// Opens authenticated TLS channels to Google endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrpcChannelProvider;

impl GrpcChannelProvider {
    pub fn new() -> Self {
        Self
    }

    async fn authenticated_channel(
        endpoint: &str,
        auth_key: &str,
    ) -> Result<AuthenticatedChannel, DialogflowError> {
        let source = CredentialSource::from_auth_key(auth_key);
        let auth_client = GoogleAuthClient::new(source, &[GOOGLE_CLOUD_PLATFORM_SCOPE])
            .map_err(|e| DialogflowError::ConnectionFailed(e.to_string()))?;

        let channel = create_authenticated_channel(endpoint, Arc::new(auth_client))
            .await
            .map_err(|e| DialogflowError::ConnectionFailed(e.to_string()))?;

        info!(endpoint = %endpoint, "Channel established");
        Ok(channel)
    }
}

#[async_trait]
impl ChannelProvider for GrpcChannelProvider {
    async fn connect(
        &self,
        endpoint: &str,
        auth_key: &str,
    ) -> Result<Arc<dyn IntentService>, DialogflowError> {
        let channel = Self::authenticated_channel(endpoint, auth_key).await?;
        Ok(Arc::new(GrpcIntentService { channel }))
    }

    async fn connect_synthesizer(
        &self,
        endpoint: &str,
        auth_key: &str,
    ) -> Result<Arc<dyn SpeechSynthesizer>, DialogflowError> {
        let channel = Self::authenticated_channel(endpoint, auth_key).await?;
        Ok(Arc::new(GrpcSpeechSynthesizer { channel }))
    }
}

/// Logs a failed call at a level matching its status and converts it.
fn handle_grpc_error(status: tonic::Status) -> RpcStatus {
    let rpc = RpcStatus::from_grpc(&status);
    match GoogleError::categorize_grpc_error(status) {
        GoogleError::AuthenticationFailed(message) => {
            error!(code = rpc.code, message = %message, "Authentication failed - check credentials");
        }
        GoogleError::NetworkError(message) => {
            warn!(code = rpc.code, message = %message, "Service unavailable or timed out");
        }
        other => {
            error!(code = rpc.code, error = %other, "gRPC error occurred");
        }
    }
    rpc
}

fn unauthenticated(e: GoogleError) -> RpcStatus {
    error!(error = %e, "Failed to authorize request");
    RpcStatus::new(tonic::Code::Unauthenticated as i32, e.to_string(), "")
}

/// Wraps `message` with credentials and routing metadata.
async fn prepare_request<T>(
    channel: &AuthenticatedChannel,
    message: T,
    session_path: &str,
) -> Result<tonic::Request<T>, RpcStatus> {
    let mut request = tonic::Request::new(message);
    channel
        .authorize(&mut request)
        .await
        .map_err(unauthenticated)?;

    let params: tonic::metadata::MetadataValue<tonic::metadata::Ascii> =
        format!("session={session_path}").parse().map_err(|_| {
            RpcStatus::new(
                tonic::Code::InvalidArgument as i32,
                format!("Session path is not valid metadata: {session_path}"),
                "",
            )
        })?;
    request.metadata_mut().insert("x-goog-request-params", params);
    Ok(request)
}

struct GrpcIntentService {
    channel: AuthenticatedChannel,
}

impl GrpcIntentService {
    fn client(&self) -> SessionsClient<tonic::transport::Channel> {
        SessionsClient::new(self.channel.clone_channel())
            .max_decoding_message_size(MAX_RESPONSE_BYTES)
    }
}

#[async_trait]
impl IntentService for GrpcIntentService {
    async fn detect_intent(&self, request: EventRequest) -> Result<DetectIntentResponse, RpcStatus> {
        let message = event_request_to_proto(&request);
        let request = prepare_request(&self.channel, message, &request.session_path).await?;

        let response = self
            .client()
            .detect_intent(request)
            .await
            .map_err(handle_grpc_error)?;

        Ok(detect_response_from_proto(response.into_inner()))
    }

    async fn streaming_detect_intent(
        &self,
        session_path: &str,
    ) -> Result<Arc<dyn IntentStream>, RpcStatus> {
        let (request_tx, mut request_rx) = mpsc::channel::<df::StreamingDetectIntentRequest>(REQUEST_BUFFER);

        let request_stream = async_stream::stream! {
            while let Some(request) = request_rx.recv().await {
                yield request;
            }
            debug!("Request side closed");
        };

        let request = prepare_request(&self.channel, request_stream, session_path).await?;
        let mut client = self.client();

        // Spawned so the first frame can be queued before response headers
        // arrive.
        let call = tokio::spawn(async move { client.streaming_detect_intent(request).await });

        Ok(Arc::new(GrpcIntentStream {
            session_path: session_path.to_string(),
            requests: Mutex::new(Some(request_tx)),
            responses: tokio::sync::Mutex::new(ResponseSide::Pending(call)),
            status: Mutex::new(None),
        }))
    }
}

type StreamingCall =
    JoinHandle<Result<tonic::Response<Streaming<df::StreamingDetectIntentResponse>>, tonic::Status>>;

enum ResponseSide {
    /// Response headers not received yet.
    Pending(StreamingCall),
    Open(Streaming<df::StreamingDetectIntentResponse>),
    Closed,
}

/// A bidirectional `StreamingDetectIntent` call.
struct GrpcIntentStream {
    session_path: String,
    requests: Mutex<Option<mpsc::Sender<df::StreamingDetectIntentRequest>>>,
    responses: tokio::sync::Mutex<ResponseSide>,
    /// First non-OK status seen on the response side.
    status: Mutex<Option<RpcStatus>>,
}

impl GrpcIntentStream {
    fn record_status(&self, status: RpcStatus) {
        let mut slot = self.status.lock();
        if slot.is_none() {
            *slot = Some(status);
        }
    }
}

#[async_trait]
impl IntentStream for GrpcIntentStream {
    async fn write(&self, frame: StreamingFrame) -> bool {
        let sender = self.requests.lock().clone();
        let Some(sender) = sender else {
            return false;
        };

        let request = match frame {
            StreamingFrame::Config(config) => streaming_config_to_proto(&config),
            StreamingFrame::Audio(audio) => audio_frame_to_proto(audio),
        };

        if sender.send(request).await.is_err() {
            debug!(session_path = %self.session_path, "Request stream is gone");
            return false;
        }
        true
    }

    async fn read(&self) -> Option<StreamingDetectIntentResponse> {
        let mut side = self.responses.lock().await;

        loop {
            match std::mem::replace(&mut *side, ResponseSide::Closed) {
                ResponseSide::Pending(call) => match call.await {
                    Ok(Ok(response)) => {
                        *side = ResponseSide::Open(response.into_inner());
                    }
                    Ok(Err(status)) => {
                        self.record_status(handle_grpc_error(status));
                        return None;
                    }
                    Err(e) => {
                        error!(session_path = %self.session_path, error = %e, "Streaming call task failed");
                        self.record_status(RpcStatus::new(
                            tonic::Code::Internal as i32,
                            format!("Streaming call task failed: {e}"),
                            "",
                        ));
                        return None;
                    }
                },
                ResponseSide::Open(mut streaming) => match streaming.message().await {
                    Ok(Some(message)) => {
                        *side = ResponseSide::Open(streaming);
                        return Some(streaming_response_from_proto(message));
                    }
                    Ok(None) => {
                        debug!(session_path = %self.session_path, "Response stream ended");
                        return None;
                    }
                    Err(status) => {
                        self.record_status(handle_grpc_error(status));
                        return None;
                    }
                },
                ResponseSide::Closed => return None,
            }
        }
    }

    fn close_writes(&self) {
        if self.requests.lock().take().is_some() {
            debug!(session_path = %self.session_path, "Half-closing request stream");
        }
    }

    async fn finish(&self) -> Result<(), RpcStatus> {
        self.close_writes();

        while let Some(response) = self.read().await {
            debug!(
                session_path = %self.session_path,
                response_id = %response.response_id,
                "Discarding response received after stop"
            );
        }

        match self.status.lock().take() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }
}

struct GrpcSpeechSynthesizer {
    channel: AuthenticatedChannel,
}

#[async_trait]
impl SpeechSynthesizer for GrpcSpeechSynthesizer {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<Bytes, RpcStatus> {
        let mut grpc_request = tonic::Request::new(synthesis_request_to_proto(request));
        self.channel
            .authorize(&mut grpc_request)
            .await
            .map_err(unauthenticated)?;

        let response = TextToSpeechClient::new(self.channel.clone_channel())
            .max_decoding_message_size(MAX_RESPONSE_BYTES)
            .synthesize_speech(grpc_request)
            .await
            .map_err(handle_grpc_error)?;

        Ok(response.into_inner().audio_content)
    }
}

// Domain -> proto.

fn input_encoding_to_proto(encoding: InputAudioEncoding) -> df::AudioEncoding {
    match encoding {
        InputAudioEncoding::Mulaw => df::AudioEncoding::Mulaw,
        InputAudioEncoding::Linear16 => df::AudioEncoding::Linear16,
    }
}

fn output_audio_config(requested: bool) -> Option<df::OutputAudioConfig> {
    requested.then(|| df::OutputAudioConfig {
        audio_encoding: df::OutputAudioEncoding::Linear16 as i32,
        sample_rate_hertz: TELEPHONY_SAMPLE_RATE_HZ,
        ..Default::default()
    })
}

fn query_parameters(sentiment_analysis: bool) -> Option<df::QueryParameters> {
    sentiment_analysis.then(|| df::QueryParameters {
        sentiment_analysis_request_config: Some(df::SentimentAnalysisRequestConfig {
            analyze_query_text_sentiment: true,
        }),
        ..Default::default()
    })
}

pub(crate) fn event_request_to_proto(request: &EventRequest) -> df::DetectIntentRequest {
    df::DetectIntentRequest {
        session: request.session_path.clone(),
        query_params: query_parameters(request.sentiment_analysis),
        query_input: Some(df::QueryInput {
            input: Some(df::query_input::Input::Event(df::EventInput {
                name: request.event_name.clone(),
                language_code: request.language_code.clone(),
                ..Default::default()
            })),
        }),
        output_audio_config: output_audio_config(request.output_audio),
        ..Default::default()
    }
}

#[allow(deprecated)]
pub(crate) fn streaming_config_to_proto(config: &StreamingConfig) -> df::StreamingDetectIntentRequest {
    let audio_config = df::InputAudioConfig {
        audio_encoding: input_encoding_to_proto(config.audio_encoding) as i32,
        sample_rate_hertz: config.sample_rate_hertz,
        language_code: config.language_code.clone(),
        phrase_hints: config.phrase_hints.clone(),
        model: config.model.clone().unwrap_or_default(),
        single_utterance: config.single_utterance,
        ..Default::default()
    };

    df::StreamingDetectIntentRequest {
        session: config.session_path.clone(),
        query_params: query_parameters(config.sentiment_analysis),
        query_input: Some(df::QueryInput {
            input: Some(df::query_input::Input::AudioConfig(audio_config)),
        }),
        output_audio_config: output_audio_config(config.output_audio),
        ..Default::default()
    }
}

fn audio_frame_to_proto(audio: Bytes) -> df::StreamingDetectIntentRequest {
    df::StreamingDetectIntentRequest {
        input_audio: audio,
        ..Default::default()
    }
}

pub(crate) fn synthesis_request_to_proto(request: SynthesisRequest) -> tts::SynthesizeSpeechRequest {
    let input_source = if request.is_ssml() {
        tts::synthesis_input::InputSource::Ssml(request.text)
    } else {
        tts::synthesis_input::InputSource::Text(request.text)
    };

    tts::SynthesizeSpeechRequest {
        input: Some(tts::SynthesisInput {
            input_source: Some(input_source),
            ..Default::default()
        }),
        voice: Some(tts::VoiceSelectionParams {
            language_code: request.language_code,
            name: request.voice.unwrap_or_default(),
            ..Default::default()
        }),
        audio_config: Some(tts::AudioConfig {
            audio_encoding: tts::AudioEncoding::Linear16 as i32,
            sample_rate_hertz: TELEPHONY_SAMPLE_RATE_HZ,
            ..Default::default()
        }),
        ..Default::default()
    }
}

// Proto -> domain.

pub(crate) fn detect_response_from_proto(response: df::DetectIntentResponse) -> DetectIntentResponse {
    DetectIntentResponse {
        response_id: response.response_id,
        query_result: response.query_result.map(query_result_from_proto),
        output_audio: response.output_audio,
    }
}

pub(crate) fn streaming_response_from_proto(
    response: df::StreamingDetectIntentResponse,
) -> StreamingDetectIntentResponse {
    StreamingDetectIntentResponse {
        response_id: response.response_id,
        recognition_result: response.recognition_result.map(recognition_from_proto),
        query_result: response.query_result.map(query_result_from_proto),
        output_audio: response.output_audio,
    }
}

fn recognition_from_proto(result: df::StreamingRecognitionResult) -> StreamingRecognitionResult {
    use df::streaming_recognition_result::MessageType;

    let message_type = match MessageType::try_from(result.message_type) {
        Ok(MessageType::Transcript) => RecognitionMessageType::Transcript,
        Ok(MessageType::EndOfSingleUtterance) => RecognitionMessageType::EndOfSingleUtterance,
        _ => RecognitionMessageType::Unspecified,
    };

    StreamingRecognitionResult {
        message_type,
        transcript: result.transcript,
        is_final: result.is_final,
        confidence: result.confidence,
    }
}

pub(crate) fn query_result_from_proto(result: df::QueryResult) -> QueryResult {
    QueryResult {
        query_text: result.query_text,
        language_code: result.language_code,
        action: result.action,
        fulfillment_text: result.fulfillment_text,
        intent: result.intent.map(|intent| Intent {
            name: intent.name,
            display_name: intent.display_name,
        }),
        intent_detection_confidence: result.intent_detection_confidence,
        fulfillment_messages: result
            .fulfillment_messages
            .into_iter()
            .map(message_from_proto)
            .collect(),
        parameters: result.parameters.map(struct_to_json).unwrap_or_default(),
        sentiment: result
            .sentiment_analysis_result
            .and_then(|analysis| analysis.query_text_sentiment)
            .map(|sentiment| Sentiment {
                score: sentiment.score,
                magnitude: sentiment.magnitude,
            }),
    }
}

fn message_from_proto(message: df::intent::Message) -> FulfillmentMessage {
    use df::intent::message::Message;
    use df::intent::message::telephony_synthesize_speech::Source;

    match message.message {
        Some(Message::Text(text)) => FulfillmentMessage::Text(text.text),
        Some(Message::SimpleResponses(responses)) => FulfillmentMessage::SimpleResponses(
            responses
                .simple_responses
                .into_iter()
                .map(|response| SimpleResponse {
                    text_to_speech: response.text_to_speech,
                    ssml: response.ssml,
                })
                .collect(),
        ),
        Some(Message::TelephonyPlayAudio(play)) => FulfillmentMessage::PlayAudio {
            audio_uri: play.audio_uri,
        },
        Some(Message::TelephonySynthesizeSpeech(speech)) => match speech.source {
            Some(Source::Text(text)) => FulfillmentMessage::SynthesizeSpeech(SpeechSource::Text(text)),
            Some(Source::Ssml(ssml)) => FulfillmentMessage::SynthesizeSpeech(SpeechSource::Ssml(ssml)),
            None => FulfillmentMessage::SynthesizeSpeech(SpeechSource::Text(String::new())),
        },
        Some(Message::TelephonyTransferCall(transfer)) => FulfillmentMessage::TransferCall {
            phone_number: transfer.phone_number,
        },
        _ => FulfillmentMessage::Unsupported,
    }
}

pub(crate) fn struct_to_json(fields: prost_types::Struct) -> serde_json::Map<String, serde_json::Value> {
    fields
        .fields
        .into_iter()
        .map(|(key, value)| (key, value_to_json(value)))
        .collect()
}

fn value_to_json(value: prost_types::Value) -> serde_json::Value {
    use prost_types::value::Kind;

    match value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::NumberValue(number)) => serde_json::Number::from_f64(number)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(Kind::StringValue(text)) => serde_json::Value::String(text),
        Some(Kind::BoolValue(flag)) => serde_json::Value::Bool(flag),
        Some(Kind::StructValue(nested)) => serde_json::Value::Object(struct_to_json(nested)),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(value_to_json).collect())
        }
    }
}
