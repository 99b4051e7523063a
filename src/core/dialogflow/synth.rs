//! Text-to-speech: request model and the write-to-file flow.

use std::path::Path;

use tracing::{error, info, warn};

use super::error::DialogflowError;
use super::transport::SpeechSynthesizer;

/// Language used when a synthesis request names none.
pub const DEFAULT_SYNTHESIS_LANGUAGE: &str = "en";

/// Parameters of one text-to-speech request.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    /// Plain text, or SSML when it contains a `<speak` tag.
    pub text: String,
    pub language_code: String,
    /// Voice name; the service picks one for the language when absent.
    pub voice: Option<String>,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language_code: DEFAULT_SYNTHESIS_LANGUAGE.to_string(),
            voice: None,
        }
    }

    pub fn with_language(mut self, language_code: impl Into<String>) -> Self {
        let language_code = language_code.into();
        if !language_code.is_empty() {
            self.language_code = language_code;
        }
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        let voice = voice.into();
        self.voice = (!voice.is_empty()).then_some(voice);
        self
    }

    pub fn is_ssml(&self) -> bool {
        self.text.contains("<speak")
    }
}

/// Synthesizes `request` and writes the audio verbatim to `destination`.
///
/// Returns the number of bytes written. An empty reply is still written.
pub async fn synthesize_to_file(
    synthesizer: &dyn SpeechSynthesizer,
    request: SynthesisRequest,
    destination: &Path,
) -> Result<usize, DialogflowError> {
    let ssml = request.is_ssml();
    let audio = synthesizer.synthesize(request).await.map_err(|status| {
        error!(
            code = status.code,
            message = %status.message,
            details = %status.details,
            "Speech synthesis failed"
        );
        DialogflowError::Rpc(status)
    })?;

    if audio.is_empty() {
        warn!(destination = %destination.display(), "Speech synthesis returned no audio");
    }

    tokio::fs::write(destination, &audio).await.map_err(|e| {
        error!(error = %e, destination = %destination.display(), "Failed to write synthesized audio");
        DialogflowError::from(e)
    })?;

    info!(
        bytes = audio.len(),
        ssml,
        destination = %destination.display(),
        "Wrote synthesized audio"
    );

    Ok(audio.len())
}
