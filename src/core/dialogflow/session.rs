//! Session state machine.
//!
//! A [`Session`] owns one conversation with the intent service: its
//! connection, the active streaming interaction (if any), the background
//! reader task and the Result Model of the last completed interaction.
//!
//! # Locking
//!
//! All mutable fields live behind one `parking_lot::Mutex`. The guard is
//! never held across an `.await`: every network call, stream write, stream
//! read and task join runs with the lock released. Concurrent
//! [`Session::stop_recognition`] calls are serialized by a separate async
//! gate, so exactly one of them finalizes the RPC.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::client::ClientContext;
use super::error::{DialogflowError, RpcStatus};
use super::flatten::{FlattenInput, flatten};
use super::model::{
    EventRequest, InputAudioEncoding, QueryResult, SessionState, StreamingConfig,
    StreamingDetectIntentResponse, StreamingFrame, TELEPHONY_SAMPLE_RATE_HZ, session_path,
};
use super::reader;
use super::result::{FlatResult, connection_failed_results, rpc_error_results};
use super::telemetry::{LogField, UserData};
use super::transport::{IntentService, IntentStream};
use crate::core::providers::DIALOGFLOW_ENDPOINT;

/// Language of a streaming interaction when the caller names none.
pub const DEFAULT_STREAMING_LANGUAGE: &str = "en-US";

/// Language of an event detection when the caller names none.
pub const DEFAULT_EVENT_LANGUAGE: &str = "en";

/// Mutable session fields, guarded by [`SessionShared::inner`].
pub(crate) struct SessionInner {
    pub(crate) session_id: String,
    project_id: String,
    endpoint: String,
    auth_key: String,
    model: String,
    sentiment_analysis: bool,
    external_endpointer: bool,
    pub(crate) debug: bool,

    pub(crate) state: SessionState,
    service: Option<Arc<dyn IntentService>>,
    stream: Option<Arc<dyn IntentStream>>,
    reader: Option<JoinHandle<()>>,

    // Artifacts of the current streaming interaction, last write wins.
    pub(crate) final_response: Option<StreamingDetectIntentResponse>,
    pub(crate) transcription_response: Option<StreamingDetectIntentResponse>,
    pub(crate) audio_response: Option<StreamingDetectIntentResponse>,
    /// Sentiment flag captured when the interaction started.
    pub(crate) interaction_sentiment: bool,

    pub(crate) results: Vec<FlatResult>,

    bytes_written: u64,
    packets_written: u64,
    pub(crate) responses_received: u64,
    session_started_at: Option<SystemTime>,
    pub(crate) last_transcription_at: Option<SystemTime>,
    pub(crate) intent_detected_at: Option<SystemTime>,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            session_id: String::new(),
            project_id: String::new(),
            endpoint: DIALOGFLOW_ENDPOINT.to_string(),
            auth_key: String::new(),
            model: String::new(),
            sentiment_analysis: false,
            external_endpointer: false,
            debug: false,
            state: SessionState::Ready,
            service: None,
            stream: None,
            reader: None,
            final_response: None,
            transcription_response: None,
            audio_response: None,
            interaction_sentiment: false,
            results: Vec::new(),
            bytes_written: 0,
            packets_written: 0,
            responses_received: 0,
            session_started_at: None,
            last_transcription_at: None,
            intent_detected_at: None,
        }
    }

    fn session_path(&self) -> String {
        session_path(&self.project_id, &self.session_id)
    }
}

/// State shared between a session handle and its reader task.
pub(crate) struct SessionShared {
    pub(crate) inner: Mutex<SessionInner>,
    context: Arc<ClientContext>,
    user_data: Option<UserData>,
    stop_gate: tokio::sync::Mutex<()>,
}

impl SessionShared {
    /// Emits a call event. Must be called without the session lock held.
    pub(crate) fn log_call(&self, event: &str, fields: &[LogField]) {
        self.context
            .call_logger
            .log_call(self.user_data.as_ref(), event, fields);
    }

    pub(crate) fn log_results(&self, results: &[FlatResult]) {
        let score = results.first().map(|r| r.score).unwrap_or_default();
        let mut fields = Vec::with_capacity(results.len() + 1);
        fields.push(LogField::text("score", score.to_string()));
        for result in results {
            if result.slot == "output_audio" {
                fields.push(LogField::text(result.slot.as_str(), "audio data"));
            } else {
                fields.push(LogField::text(result.slot.as_str(), result.value_text()));
            }
        }
        self.log_call("results", &fields);
    }

    fn log_rpc_error(&self, status: &RpcStatus) {
        self.log_call(
            "error",
            &[
                LogField::text("message", status.message.as_str()),
                LogField::text("details", status.details.as_str()),
                LogField::text("error_code", status.code.to_string()),
            ],
        );
    }

    fn replace_results(&self, results: Vec<FlatResult>) {
        self.inner.lock().results = results;
    }
}

/// One conversation with the intent service.
///
/// Created by [`DialogflowClient::create_session`](super::DialogflowClient::create_session).
/// Share it between tasks with an `Arc`; every operation takes `&self`.
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    pub(crate) fn new(context: Arc<ClientContext>, user_data: Option<UserData>) -> Self {
        let shared = Arc::new(SessionShared {
            inner: Mutex::new(SessionInner::new()),
            context,
            user_data,
            stop_gate: tokio::sync::Mutex::new(()),
        });
        shared.log_call("create", &[]);
        Self { shared }
    }

    pub fn user_data(&self) -> Option<&UserData> {
        self.shared.user_data.as_ref()
    }

    pub fn session_id(&self) -> String {
        self.shared.inner.lock().session_id.clone()
    }

    pub fn set_session_id(&self, session_id: impl Into<String>) {
        self.shared.inner.lock().session_id = session_id.into();
    }

    pub fn project_id(&self) -> String {
        self.shared.inner.lock().project_id.clone()
    }

    pub fn set_project_id(&self, project_id: impl Into<String>) {
        self.shared.inner.lock().project_id = project_id.into();
    }

    pub fn endpoint(&self) -> String {
        self.shared.inner.lock().endpoint.clone()
    }

    /// Sets the service endpoint. An empty value selects the default
    /// endpoint; a different value drops the cached connection.
    pub fn set_endpoint(&self, endpoint: &str) {
        let endpoint = if endpoint.trim().is_empty() {
            DIALOGFLOW_ENDPOINT
        } else {
            endpoint.trim()
        };

        let mut inner = self.shared.inner.lock();
        if !inner.endpoint.eq_ignore_ascii_case(endpoint) {
            inner.endpoint = endpoint.to_string();
            inner.service = None;
        }
    }

    pub fn auth_key(&self) -> String {
        self.shared.inner.lock().auth_key.clone()
    }

    /// Sets the credential material; a different value drops the cached
    /// connection.
    pub fn set_auth_key(&self, auth_key: &str) {
        let mut inner = self.shared.inner.lock();
        if !inner.auth_key.eq_ignore_ascii_case(auth_key) {
            inner.auth_key = auth_key.to_string();
            inner.service = None;
        }
    }

    pub fn model(&self) -> String {
        self.shared.inner.lock().model.clone()
    }

    pub fn set_model(&self, model: impl Into<String>) {
        self.shared.inner.lock().model = model.into();
    }

    pub fn sentiment_analysis(&self) -> bool {
        self.shared.inner.lock().sentiment_analysis
    }

    pub fn set_sentiment_analysis(&self, enabled: bool) {
        self.shared.inner.lock().sentiment_analysis = enabled;
    }

    pub fn external_endpointer(&self) -> bool {
        self.shared.inner.lock().external_endpointer
    }

    /// When set, the host signals end of speech itself and single-utterance
    /// mode is turned off.
    pub fn set_external_endpointer(&self, enabled: bool) {
        self.shared.inner.lock().external_endpointer = enabled;
    }

    pub fn debug(&self) -> bool {
        self.shared.inner.lock().debug
    }

    pub fn set_debug(&self, enabled: bool) {
        self.shared.inner.lock().debug = enabled;
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.shared.inner.lock().service.is_some()
    }

    pub fn result_count(&self) -> usize {
        self.shared.inner.lock().results.len()
    }

    pub fn result(&self, index: usize) -> Option<FlatResult> {
        self.shared.inner.lock().results.get(index).cloned()
    }

    /// Snapshot of the whole Result Model.
    pub fn results(&self) -> Vec<FlatResult> {
        self.shared.inner.lock().results.clone()
    }

    pub fn response_count(&self) -> u64 {
        self.shared.inner.lock().responses_received
    }

    pub fn bytes_written(&self) -> u64 {
        self.shared.inner.lock().bytes_written
    }

    pub fn packets_written(&self) -> u64 {
        self.shared.inner.lock().packets_written
    }

    pub fn session_started_at(&self) -> Option<SystemTime> {
        self.shared.inner.lock().session_started_at
    }

    pub fn last_transcription_at(&self) -> Option<SystemTime> {
        self.shared.inner.lock().last_transcription_at
    }

    pub fn intent_detected_at(&self) -> Option<SystemTime> {
        self.shared.inner.lock().intent_detected_at
    }

    /// Returns the cached connection, creating it if needed.
    async fn ensure_connected(&self) -> Result<Arc<dyn IntentService>, DialogflowError> {
        let (session_id, endpoint, auth_key) = {
            let inner = self.shared.inner.lock();
            if let Some(service) = &inner.service {
                return Ok(service.clone());
            }
            (
                inner.session_id.clone(),
                inner.endpoint.clone(),
                inner.auth_key.clone(),
            )
        };

        info!(session_id = %session_id, endpoint = %endpoint, "Connecting to intent service");

        let service = self
            .shared
            .context
            .provider
            .connect(&endpoint, &auth_key)
            .await
            .map_err(|e| {
                error!(session_id = %session_id, endpoint = %endpoint, error = %e, "Failed to connect");
                e
            })?;

        self.shared
            .log_call("connect", &[LogField::text("endpoint", endpoint.as_str())]);

        let mut inner = self.shared.inner.lock();
        // Configuration changed while connecting; hand the connection to
        // this call only.
        if inner.endpoint == endpoint && inner.auth_key == auth_key {
            inner.service = Some(service.clone());
        }
        Ok(service)
    }

    /// Opens the channel to the configured endpoint ahead of the first
    /// interaction. Does nothing when already connected.
    pub async fn connect(&self) -> Result<(), DialogflowError> {
        self.ensure_connected().await.map(|_| ())
    }

    /// Stops an interaction left over from a previous call.
    async fn stop_if_active(&self) {
        if self.state() == SessionState::Ready {
            return;
        }
        if let Err(e) = self.stop_recognition().await {
            warn!(error = %e, "Previous interaction ended with an error");
        }
    }

    /// Triggers intent detection with a named event.
    ///
    /// The Result Model is replaced in every outcome: with the flattened
    /// reply on success, or with error records on failure.
    pub async fn recognize_event(
        &self,
        event_name: &str,
        language: Option<&str>,
        output_audio: bool,
    ) -> Result<(), DialogflowError> {
        self.stop_if_active().await;

        let service = match self.ensure_connected().await {
            Ok(service) => service,
            Err(e) => {
                self.shared.replace_results(connection_failed_results());
                return Err(e);
            }
        };

        let language = language
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_EVENT_LANGUAGE);

        let (request, session_id, debug_enabled) = {
            let inner = self.shared.inner.lock();
            let request = EventRequest {
                session_path: inner.session_path(),
                event_name: event_name.to_string(),
                language_code: language.to_string(),
                output_audio,
                sentiment_analysis: inner.sentiment_analysis,
            };
            (request, inner.session_id.clone(), inner.debug)
        };

        self.shared.log_call(
            "detect_event",
            &[
                LogField::text("event", event_name),
                LogField::text("language", language),
                LogField::text("session_path", request.session_path.as_str()),
            ],
        );
        if debug_enabled {
            debug!(session_id = %session_id, ?request, "DetectIntent request");
        }

        let include_sentiment = request.sentiment_analysis;
        let response = match service.detect_intent(request).await {
            Ok(response) => response,
            Err(status) => {
                error!(
                    session_id = %session_id,
                    code = status.code,
                    message = %status.message,
                    "DetectIntent failed"
                );
                {
                    let mut inner = self.shared.inner.lock();
                    inner.results = rpc_error_results(&status);
                    inner.state = SessionState::Ready;
                }
                self.shared.log_rpc_error(&status);
                return Err(status.into());
            }
        };

        if debug_enabled {
            debug!(session_id = %session_id, ?response, "DetectIntent response");
        }

        let empty = QueryResult::default();
        let query_result = response.query_result.as_ref().unwrap_or_else(|| {
            warn!(session_id = %session_id, "DetectIntent response carries no query result");
            &empty
        });
        let results = flatten(&FlattenInput {
            session_id: &session_id,
            response_id: &response.response_id,
            query_result,
            output_audio: Some(&response.output_audio),
            speech_confidence: None,
            include_sentiment,
        });

        {
            let mut inner = self.shared.inner.lock();
            inner.results = results.clone();
            inner.responses_received += 1;
            inner.intent_detected_at = Some(SystemTime::now());
            inner.state = SessionState::Ready;
        }

        self.shared.log_results(&results);
        self.shared.log_call("stop", &[]);
        Ok(())
    }

    /// Opens a streaming interaction and spawns its reader task.
    ///
    /// On success the session is [`SessionState::Started`] and accepts
    /// [`write_audio`](Self::write_audio) until stopped.
    pub async fn start_recognition(
        &self,
        language: Option<&str>,
        output_audio: bool,
        phrase_hints: &[String],
    ) -> Result<(), DialogflowError> {
        self.stop_if_active().await;

        let service = match self.ensure_connected().await {
            Ok(service) => service,
            Err(e) => {
                self.shared.replace_results(connection_failed_results());
                return Err(e);
            }
        };

        let language = language
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_STREAMING_LANGUAGE);

        let (config, session_id, debug_enabled) = {
            let inner = self.shared.inner.lock();
            let config = StreamingConfig {
                session_path: inner.session_path(),
                single_utterance: !inner.external_endpointer,
                audio_encoding: InputAudioEncoding::Mulaw,
                sample_rate_hertz: TELEPHONY_SAMPLE_RATE_HZ,
                language_code: language.to_string(),
                model: (!inner.model.is_empty()).then(|| inner.model.clone()),
                phrase_hints: phrase_hints.to_vec(),
                output_audio,
                sentiment_analysis: inner.sentiment_analysis,
            };
            (config, inner.session_id.clone(), inner.debug)
        };

        self.shared.log_call(
            "start",
            &[
                LogField::text("language", language),
                LogField::text("session_path", config.session_path.as_str()),
                LogField::list("hints", config.phrase_hints.clone()),
                LogField::text(
                    "request_sentiment_analysis",
                    config.sentiment_analysis.to_string(),
                ),
                LogField::text("request_audio", output_audio.to_string()),
                LogField::text("single_utterance", config.single_utterance.to_string()),
                LogField::text("model", config.model.clone().unwrap_or_default()),
            ],
        );

        let stream = match service.streaming_detect_intent(&config.session_path).await {
            Ok(stream) => stream,
            Err(status) => {
                error!(
                    session_id = %session_id,
                    code = status.code,
                    message = %status.message,
                    "Failed to open StreamingDetectIntent"
                );
                self.shared.replace_results(rpc_error_results(&status));
                self.shared.log_rpc_error(&status);
                return Err(status.into());
            }
        };

        if debug_enabled {
            debug!(session_id = %session_id, ?config, "StreamingDetectIntent config");
        }

        let interaction_sentiment = config.sentiment_analysis;
        if !stream.write(StreamingFrame::Config(config)).await {
            error!(session_id = %session_id, "Failed to write streaming config");
            {
                let mut inner = self.shared.inner.lock();
                inner.state = SessionState::Error;
                inner.stream = Some(stream);
            }
            self.shared.log_call("write_error", &[]);
            return Err(DialogflowError::WriteFailed);
        }

        {
            let mut inner = self.shared.inner.lock();
            inner.state = SessionState::Started;
            inner.stream = Some(stream.clone());
            inner.final_response = None;
            inner.transcription_response = None;
            inner.audio_response = None;
            inner.interaction_sentiment = interaction_sentiment;
            inner.bytes_written = 0;
            inner.packets_written = 1;
            inner.responses_received = 0;
            inner.session_started_at = Some(SystemTime::now());
            inner.last_transcription_at = None;
            inner.intent_detected_at = None;
            inner.reader = Some(tokio::spawn(reader::run(self.shared.clone(), stream)));
        }

        info!(session_id = %session_id, "Streaming recognition started");
        Ok(())
    }

    /// Sends one audio frame.
    ///
    /// Does nothing unless the session is [`SessionState::Started`]. A
    /// failed write moves the session to [`SessionState::Error`]. Returns
    /// the state after the call.
    pub async fn write_audio(&self, audio: impl Into<Bytes>) -> SessionState {
        let (stream, session_id) = {
            let inner = self.shared.inner.lock();
            if inner.state != SessionState::Started {
                return inner.state;
            }
            match &inner.stream {
                Some(stream) => (stream.clone(), inner.session_id.clone()),
                None => return inner.state,
            }
        };

        let audio = audio.into();
        let len = audio.len() as u64;

        if stream.write(StreamingFrame::Audio(audio)).await {
            let mut inner = self.shared.inner.lock();
            inner.bytes_written += len;
            inner.packets_written += 1;
            return inner.state;
        }

        warn!(session_id = %session_id, "Failed to write audio frame");
        let state = {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Ready {
                inner.state = SessionState::Error;
            }
            inner.state
        };
        self.shared.log_call("write_error", &[]);
        state
    }

    /// Ends the current streaming interaction.
    ///
    /// Half-closes the request side, waits for the reader task, then
    /// collects the final RPC status. A non-OK status replaces the Result
    /// Model with error records and is returned as an error. The session
    /// is [`SessionState::Ready`] afterwards either way.
    pub async fn stop_recognition(&self) -> Result<(), DialogflowError> {
        let _gate = self.shared.stop_gate.lock().await;

        let (stream, reader, session_id) = {
            let mut inner = self.shared.inner.lock();
            if inner.state == SessionState::Ready {
                return Ok(());
            }
            (
                inner.stream.clone(),
                inner.reader.take(),
                inner.session_id.clone(),
            )
        };

        self.shared.log_call("stopping", &[]);

        if let Some(stream) = &stream {
            stream.close_writes();
        }
        if let Some(reader) = reader {
            if let Err(e) = reader.await {
                error!(session_id = %session_id, error = %e, "Reader task failed");
            }
        }

        let stream = {
            let mut inner = self.shared.inner.lock();
            if inner.state == SessionState::Ready {
                return Ok(());
            }
            inner.stream.take()
        };

        let status = match stream {
            Some(stream) => stream.finish().await,
            None => Ok(()),
        };

        match status {
            Ok(()) => {
                self.shared.inner.lock().state = SessionState::Ready;
                info!(session_id = %session_id, "Streaming recognition stopped");
                self.shared.log_call("stop", &[]);
                Ok(())
            }
            Err(status) => {
                error!(
                    session_id = %session_id,
                    code = status.code,
                    message = %status.message,
                    "StreamingDetectIntent finished with an error"
                );
                {
                    let mut inner = self.shared.inner.lock();
                    inner.results = rpc_error_results(&status);
                    inner.state = SessionState::Ready;
                }
                self.shared.log_rpc_error(&status);
                self.shared.log_call("stop", &[]);
                Err(status.into())
            }
        }
    }

    /// Stops any active interaction and releases the session.
    pub async fn close_session(self) {
        self.stop_if_active().await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        {
            let mut inner = self.shared.inner.lock();
            if let Some(stream) = inner.stream.take() {
                stream.close_writes();
            }
            if let Some(reader) = inner.reader.take() {
                reader.abort();
            }
            inner.service = None;
        }
        self.shared.log_call("destroy", &[]);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Session")
            .field("session_id", &inner.session_id)
            .field("project_id", &inner.project_id)
            .field("endpoint", &inner.endpoint)
            .field("state", &inner.state)
            .finish()
    }
}
