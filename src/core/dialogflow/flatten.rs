//! Response flattening.
//!
//! Turns one structured detection result into the ordered list of
//! `(slot, value, score)` records a non-structured host (a dialplan, an IVR
//! script) reads by index. The output order is part of the contract:
//!
//! 1. `response_id`, optional `output_audio`, then the fixed query slots
//! 2. one record per fulfillment message occurrence
//! 3. the parameter tree, depth first
//! 4. sentiment, when requested and present
//! 5. `speech_score`, when a final transcription was seen

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::Value;
use tracing::warn;

use super::model::{FulfillmentMessage, QueryResult, SpeechSource};
use super::result::FlatResult;

/// Everything one flattening call needs.
#[derive(Debug, Clone, Copy)]
pub struct FlattenInput<'a> {
    /// Only used to give warnings some context.
    pub session_id: &'a str,
    pub response_id: &'a str,
    pub query_result: &'a QueryResult,
    pub output_audio: Option<&'a Bytes>,
    /// Confidence of the final transcription, streaming only.
    pub speech_confidence: Option<f32>,
    pub include_sentiment: bool,
}

/// Maps a `0.0..=1.0` confidence onto the integer score shared by every
/// record of one flattening call.
pub fn confidence_score(confidence: f32) -> i32 {
    (f64::from(confidence) * 100.0).round() as i32
}

/// Outcome of the minimal RIFF container check on output audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiffCheck {
    /// Header is sane; the container spans this many bytes.
    Valid(usize),
    /// The payload does not start with `RIFF`.
    MissingHeader,
    /// The declared chunk size is zero or negative.
    InvalidChunkSize(i32),
    /// The declared size reaches past the end of the buffer.
    Truncated { declared: usize, available: usize },
}

/// Validates a WAV payload's RIFF header against the buffer holding it.
pub fn check_riff(audio: &[u8]) -> RiffCheck {
    if audio.get(..4) != Some(b"RIFF".as_slice()) {
        return RiffCheck::MissingHeader;
    }

    let Some(size_bytes) = audio.get(4..8).and_then(|s| <[u8; 4]>::try_from(s).ok()) else {
        return RiffCheck::Truncated {
            declared: 8,
            available: audio.len(),
        };
    };

    let chunk_size = i32::from_le_bytes(size_bytes);
    if chunk_size <= 0 {
        return RiffCheck::InvalidChunkSize(chunk_size);
    }

    let declared = chunk_size as usize + 8;
    if declared > audio.len() {
        return RiffCheck::Truncated {
            declared,
            available: audio.len(),
        };
    }

    RiffCheck::Valid(declared)
}

/// Produces the ordered record list for one completed interaction.
pub fn flatten(input: &FlattenInput<'_>) -> Vec<FlatResult> {
    let query = input.query_result;
    let score = confidence_score(query.intent_detection_confidence);
    let mut results = Vec::new();

    results.push(FlatResult::text("response_id", input.response_id, score));

    if let Some(audio) = input.output_audio.filter(|audio| !audio.is_empty()) {
        if let Some(record) = audio_result(input.session_id, audio, score) {
            results.push(record);
        }
    }

    push_query_fields(&mut results, query, score);
    push_fulfillment_messages(&mut results, &query.fulfillment_messages, score);

    for (name, value) in &query.parameters {
        push_parameter(&mut results, name.clone(), value, score);
    }

    if input.include_sentiment {
        if let Some(sentiment) = query.sentiment {
            results.push(FlatResult::text(
                "sentiment_score",
                format_decimal(sentiment.score),
                score,
            ));
            results.push(FlatResult::text(
                "sentiment_magnitude",
                format_decimal(sentiment.magnitude),
                score,
            ));
        }
    }

    if let Some(confidence) = input.speech_confidence {
        results.push(FlatResult::text("speech_score", format_decimal(confidence), score));
    }

    results
}

fn audio_result(session_id: &str, audio: &Bytes, score: i32) -> Option<FlatResult> {
    match check_riff(audio) {
        RiffCheck::Valid(len) => Some(FlatResult::binary("output_audio", audio.slice(..len), score)),
        RiffCheck::MissingHeader => {
            warn!(session_id = %session_id, "Got output_audio without a RIFF header");
            None
        }
        RiffCheck::InvalidChunkSize(chunk_size) => {
            warn!(
                session_id = %session_id,
                chunk_size,
                "Got output_audio with a non-positive RIFF chunk size"
            );
            None
        }
        RiffCheck::Truncated {
            declared,
            available,
        } => {
            warn!(
                session_id = %session_id,
                declared,
                available,
                "Got output_audio whose RIFF chunk size exceeds the payload"
            );
            None
        }
    }
}

fn push_query_fields(results: &mut Vec<FlatResult>, query: &QueryResult, score: i32) {
    let (intent_name, intent_display_name) = query
        .intent
        .as_ref()
        .map(|intent| (intent.name.as_str(), intent.display_name.as_str()))
        .unwrap_or_default();

    results.push(FlatResult::text("query_text", query.query_text.clone(), score));
    results.push(FlatResult::text("language_code", query.language_code.clone(), score));
    results.push(FlatResult::text("action", query.action.clone(), score));
    results.push(FlatResult::text(
        "fulfillment_text",
        query.fulfillment_text.clone(),
        score,
    ));
    results.push(FlatResult::text("intent_name", intent_name, score));
    results.push(FlatResult::text("intent_display_name", intent_display_name, score));
    results.push(FlatResult::text(
        "intent_detection_confidence",
        format_decimal(query.intent_detection_confidence),
        score,
    ));
}

/// Hands out `base`, `base_1`, `base_2`, ... per slot kind.
#[derive(Default)]
struct SlotNamer {
    seen: HashMap<&'static str, usize>,
}

impl SlotNamer {
    fn next(&mut self, base: &'static str) -> String {
        let count = self.seen.entry(base).or_insert(0);
        let name = if *count == 0 {
            base.to_string()
        } else {
            format!("{base}_{count}")
        };
        *count += 1;
        name
    }
}

fn push_fulfillment_messages(
    results: &mut Vec<FlatResult>,
    messages: &[FulfillmentMessage],
    score: i32,
) {
    let mut names = SlotNamer::default();

    for message in messages {
        match message {
            FulfillmentMessage::Text(lines) => {
                for line in lines {
                    results.push(FlatResult::text(names.next("text"), line.clone(), score));
                }
            }
            FulfillmentMessage::SimpleResponses(responses) => {
                for response in responses {
                    let value = prefer_text(&response.text_to_speech, &response.ssml);
                    results.push(FlatResult::text(names.next("simple_response"), value, score));
                }
            }
            FulfillmentMessage::PlayAudio { audio_uri } => {
                results.push(FlatResult::text(
                    names.next("play_audio"),
                    audio_uri.clone(),
                    score,
                ));
            }
            FulfillmentMessage::SynthesizeSpeech(source) => {
                let value = match source {
                    SpeechSource::Text(text) => text.clone(),
                    SpeechSource::Ssml(ssml) => ssml.clone(),
                };
                results.push(FlatResult::text(
                    names.next("synthesize_speech"),
                    value,
                    score,
                ));
            }
            FulfillmentMessage::TransferCall { phone_number } => {
                results.push(FlatResult::text(
                    names.next("transfer_call"),
                    phone_number.clone(),
                    score,
                ));
            }
            FulfillmentMessage::TerminateCall => {
                results.push(FlatResult::text(names.next("terminate_call"), "true", score));
            }
            FulfillmentMessage::Unsupported => {}
        }
    }
}

fn prefer_text(text: &str, ssml: &str) -> String {
    if text.is_empty() {
        ssml.to_string()
    } else {
        text.to_string()
    }
}

fn push_parameter(results: &mut Vec<FlatResult>, name: String, value: &Value, score: i32) {
    match value {
        Value::Object(fields) => {
            for (key, nested) in fields {
                push_parameter(results, format!("{name}_{key}"), nested, score);
            }
        }
        Value::Array(items) => {
            for (index, nested) in items.iter().enumerate() {
                push_parameter(results, format!("{name}_{index}"), nested, score);
            }
        }
        Value::Null => results.push(FlatResult::text(name, "null", score)),
        Value::Bool(flag) => results.push(FlatResult::text(name, flag.to_string(), score)),
        Value::Number(number) => results.push(FlatResult::text(name, format_number(number), score)),
        Value::String(text) => results.push(FlatResult::text(name, text.clone(), score)),
    }
}

/// Decimal rendering of a parameter number; integral values drop the
/// fractional part so `1.0` reads as `1`.
pub fn format_number(number: &serde_json::Number) -> String {
    if let Some(int) = number.as_i64() {
        return int.to_string();
    }
    if let Some(uint) = number.as_u64() {
        return uint.to_string();
    }

    let float = number.as_f64().unwrap_or_default();
    if float.fract() == 0.0 && float.abs() < 1e15 {
        format!("{}", float as i64)
    } else {
        float.to_string()
    }
}

/// Six-decimal rendering used for confidences and sentiment.
fn format_decimal(value: f32) -> String {
    format!("{value:.6}")
}
