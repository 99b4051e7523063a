//! Streaming reader task.
//!
//! One task per streaming interaction drains the response side of the
//! stream, records the interesting responses on the session and, once the
//! stream ends, builds the Result Model and moves the session out of
//! `Started`.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use super::flatten::{FlattenInput, flatten};
use super::model::{RecognitionMessageType, SessionState, StreamingDetectIntentResponse};
use super::session::SessionShared;
use super::telemetry::LogField;
use super::transport::IntentStream;

/// What a streaming response means for the session.
///
/// Output audio is tracked separately: it can ride on any kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseKind {
    /// Carries the structured query result.
    FinalResult,
    /// The service detected the end of the caller's speech.
    EndOfUtterance,
    /// Final transcript of the utterance.
    FinalTranscription,
    InterimTranscription,
    /// None of the above.
    Other,
}

pub(crate) fn classify(response: &StreamingDetectIntentResponse) -> ResponseKind {
    if response.query_result.is_some() {
        return ResponseKind::FinalResult;
    }

    match &response.recognition_result {
        Some(recognition)
            if recognition.message_type == RecognitionMessageType::EndOfSingleUtterance =>
        {
            ResponseKind::EndOfUtterance
        }
        Some(recognition) if recognition.is_final => ResponseKind::FinalTranscription,
        Some(_) => ResponseKind::InterimTranscription,
        None => ResponseKind::Other,
    }
}

/// Reads until the stream ends, then finalizes the interaction.
pub(crate) async fn run(shared: Arc<SessionShared>, stream: Arc<dyn IntentStream>) {
    while let Some(response) = stream.read().await {
        handle_response(&shared, response);
    }

    finalize(&shared);
}

fn handle_response(shared: &SessionShared, response: StreamingDetectIntentResponse) {
    let kind = classify(&response);
    let has_audio = !response.output_audio.is_empty();
    let now = SystemTime::now();

    let session_id = {
        let mut inner = shared.inner.lock();
        inner.responses_received += 1;
        if inner.debug {
            debug!(session_id = %inner.session_id, ?response, "StreamingDetectIntent response");
        }
        inner.session_id.clone()
    };

    match kind {
        ResponseKind::FinalResult => {
            let fields = response
                .query_result
                .as_ref()
                .map(|query| {
                    let intent = query
                        .intent
                        .as_ref()
                        .map(|intent| intent.display_name.clone())
                        .unwrap_or_default();
                    vec![
                        LogField::text("intent", intent),
                        LogField::text("action", query.action.as_str()),
                        LogField::text("fulfillment_text", query.fulfillment_text.as_str()),
                    ]
                })
                .unwrap_or_default();

            info!(session_id = %session_id, "Received query result");
            {
                let mut inner = shared.inner.lock();
                inner.final_response = Some(response.clone());
                inner.intent_detected_at = Some(now);
            }
            shared.log_call("query_result_received", &fields);
        }
        ResponseKind::EndOfUtterance => {
            debug!(session_id = %session_id, "End of single utterance");
            shared.log_call("end_of_utterance", &[]);
        }
        ResponseKind::FinalTranscription => {
            let (text, confidence) = response
                .recognition_result
                .as_ref()
                .map(|r| (r.transcript.clone(), r.confidence))
                .unwrap_or_default();

            {
                let mut inner = shared.inner.lock();
                inner.transcription_response = Some(response.clone());
                inner.last_transcription_at = Some(now);
            }
            shared.log_call(
                "final_transcription",
                &[
                    LogField::text("text", text),
                    LogField::text("score", format!("{confidence:.6}")),
                ],
            );
        }
        ResponseKind::InterimTranscription => {
            let text = response
                .recognition_result
                .as_ref()
                .map(|r| r.transcript.clone())
                .unwrap_or_default();

            shared.inner.lock().last_transcription_at = Some(now);
            shared.log_call("transcription", &[LogField::text("text", text)]);
        }
        ResponseKind::Other => {
            if !has_audio {
                warn!(session_id = %session_id, "Unexpected streaming response");
            }
        }
    }

    if has_audio {
        shared.inner.lock().audio_response = Some(response);
        shared.log_call("audio_data", &[]);
    }
}

/// Builds the Result Model from the accumulated artifacts and leaves
/// `Started`. An `Error` set by a failed write is kept.
fn finalize(shared: &SessionShared) {
    let results = {
        let mut guard = shared.inner.lock();
        let inner = &mut *guard;

        let results = match inner.final_response.as_ref() {
            Some(final_response) => {
                let speech_confidence = inner
                    .transcription_response
                    .as_ref()
                    .and_then(|r| r.recognition_result.as_ref())
                    .map(|r| r.confidence);
                let output_audio = inner.audio_response.as_ref().map(|r| &r.output_audio);

                match final_response.query_result.as_ref() {
                    Some(query_result) => flatten(&FlattenInput {
                        session_id: &inner.session_id,
                        response_id: &final_response.response_id,
                        query_result,
                        output_audio,
                        speech_confidence,
                        include_sentiment: inner.interaction_sentiment,
                    }),
                    None => Vec::new(),
                }
            }
            None => {
                info!(session_id = %inner.session_id, "Stream ended without a query result");
                Vec::new()
            }
        };

        inner.results = results.clone();
        if inner.state != SessionState::Error {
            inner.state = SessionState::Finished;
        }
        results
    };

    shared.log_results(&results);
}
