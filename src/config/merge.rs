use std::env;

use super::ClientConfig;
use super::utils::parse_bool;
use super::yaml::YamlConfig;
use crate::core::dialogflow::DEFAULT_STREAMING_LANGUAGE;
use crate::core::providers::{DIALOGFLOW_ENDPOINT, TEXT_TO_SPEECH_ENDPOINT};

/// Merge YAML configuration with environment variables
///
/// Priority order (highest to lowest):
/// 1. Environment variables
/// 2. YAML configuration values
/// 3. Default values
///
/// Empty environment variables count as unset.
pub fn merge_config(
    yaml_config: Option<YamlConfig>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let yaml = yaml_config.unwrap_or_default();
    let dialogflow = yaml.dialogflow.unwrap_or_default();
    let tts = yaml.tts.unwrap_or_default();

    // ENV > YAML > default
    macro_rules! get_value {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            env_string($env_var)
                .or($yaml_value)
                .unwrap_or_else(|| $default.to_string())
        };
    }

    // ENV > YAML
    macro_rules! get_optional {
        ($env_var:expr, $yaml_value:expr) => {
            env_string($env_var).or($yaml_value)
        };
    }

    let endpoint = get_value!("DIALOGFLOW_ENDPOINT", dialogflow.endpoint, DIALOGFLOW_ENDPOINT);
    let tts_endpoint = get_value!("DIALOGFLOW_TTS_ENDPOINT", tts.endpoint, TEXT_TO_SPEECH_ENDPOINT);
    let auth_key = get_value!("DIALOGFLOW_AUTH_KEY", dialogflow.auth_key, "");
    let project_id = get_value!("DIALOGFLOW_PROJECT_ID", dialogflow.project_id, "");
    let session_id = get_value!("DIALOGFLOW_SESSION_ID", dialogflow.session_id, "");
    let language = get_value!(
        "DIALOGFLOW_LANGUAGE",
        dialogflow.language,
        DEFAULT_STREAMING_LANGUAGE
    );
    let model = get_optional!("DIALOGFLOW_MODEL", dialogflow.model);
    let voice = get_optional!("DIALOGFLOW_VOICE", tts.voice);

    let sentiment_analysis = env_bool("DIALOGFLOW_SENTIMENT_ANALYSIS")?
        .or(dialogflow.sentiment_analysis)
        .unwrap_or(false);
    let external_endpointer = env_bool("DIALOGFLOW_EXTERNAL_ENDPOINTER")?
        .or(dialogflow.external_endpointer)
        .unwrap_or(false);
    let debug = env_bool("DIALOGFLOW_DEBUG")?
        .or(dialogflow.debug)
        .unwrap_or(false);

    Ok(ClientConfig {
        endpoint,
        tts_endpoint,
        auth_key,
        project_id,
        session_id,
        language,
        model,
        sentiment_analysis,
        external_endpointer,
        debug,
        voice,
    })
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(key: &str) -> Result<Option<bool>, Box<dyn std::error::Error>> {
    match env_string(key) {
        None => Ok(None),
        Some(raw) => parse_bool(&raw)
            .map(Some)
            .ok_or_else(|| format!("Invalid boolean for {key}: {raw}").into()),
    }
}
