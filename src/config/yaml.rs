use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Environment
/// variables can override any value specified here.
///
/// # Example YAML structure
/// ```yaml
/// dialogflow:
///   endpoint: "dialogflow.googleapis.com"
///   auth_key: "/etc/dfegrpc/service-account.json"
///   project_id: "acme-ivr"
///   session_id: "call-42"
///   language: "en-US"
///   model: "phone_call"
///   sentiment_analysis: true
///   external_endpointer: false
///   debug: false
///
/// tts:
///   endpoint: "texttospeech.googleapis.com"
///   voice: "en-US-Wavenet-D"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub dialogflow: Option<DialogflowYaml>,
    pub tts: Option<TtsYaml>,
}

/// Dialogflow session settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DialogflowYaml {
    pub endpoint: Option<String>,
    pub auth_key: Option<String>,
    pub project_id: Option<String>,
    pub session_id: Option<String>,
    pub language: Option<String>,
    pub model: Option<String>,
    pub sentiment_analysis: Option<bool>,
    pub external_endpointer: Option<bool>,
    pub debug: Option<bool>,
}

/// Text-to-Speech settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TtsYaml {
    pub endpoint: Option<String>,
    pub voice: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
