//! Client configuration.
//!
//! Settings come from environment variables and an optional YAML file.
//! Environment variables always override YAML values.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: environment-only loading (with `.env` support)
//! - `merge`: combining YAML, environment and defaults
//! - `validation`: final checks and credential-derived defaults
//! - `utils`: parsing helpers
//!
//! # Example
//! ```rust,no_run
//! use dfegrpc::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // YAML file with environment overrides
//! let config = ClientConfig::from_file(&PathBuf::from("dfegrpc.yaml"))?;
//! println!("Agent session path: {}", config.session_path());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use crate::core::dialogflow::{DEFAULT_STREAMING_LANGUAGE, Session, session_path};
use crate::core::providers::{DIALOGFLOW_ENDPOINT, TEXT_TO_SPEECH_ENDPOINT};

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

pub use utils::parse_bool;

/// Client configuration
///
/// Everything a host needs to set up sessions against one agent:
/// - service endpoints (Dialogflow and Text-to-Speech)
/// - credential material and agent identity
/// - per-session recognition flags
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    // Endpoints
    pub endpoint: String,
    pub tts_endpoint: String,

    /// Service-account JSON, a path to it, or empty for application
    /// default credentials.
    pub auth_key: String,
    pub project_id: String,
    pub session_id: String,

    // Recognition
    pub language: String,
    pub model: Option<String>,
    pub sentiment_analysis: bool,
    pub external_endpointer: bool,
    pub debug: bool,

    // Text-to-Speech
    pub voice: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DIALOGFLOW_ENDPOINT.to_string(),
            tts_endpoint: TEXT_TO_SPEECH_ENDPOINT.to_string(),
            auth_key: String::new(),
            project_id: String::new(),
            session_id: String::new(),
            language: DEFAULT_STREAMING_LANGUAGE.to_string(),
            model: None,
            sentiment_analysis: false,
            external_endpointer: false,
            debug: false,
            voice: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a YAML file with environment variable overrides
    ///
    /// Priority order (highest to lowest):
    /// 1. Environment variables
    /// 2. YAML file values
    /// 3. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - No project id is configured and none can be read from the credentials
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // A `.env` file is not loaded here: with an explicit YAML file only
        // real environment variables override it.
        let yaml_config = yaml::YamlConfig::from_file(path)?;

        let mut config = merge::merge_config(Some(yaml_config))?;
        validation::resolve_project_id(&mut config)?;

        Ok(config)
    }

    /// `projects/<project>/agent/sessions/<session>` for this configuration.
    pub fn session_path(&self) -> String {
        session_path(&self.project_id, &self.session_id)
    }

    /// Applies identity, endpoint, credentials and flags to `session`.
    pub fn configure_session(&self, session: &Session) {
        session.set_endpoint(&self.endpoint);
        session.set_auth_key(&self.auth_key);
        session.set_project_id(self.project_id.as_str());
        session.set_session_id(self.session_id.as_str());
        session.set_model(self.model.clone().unwrap_or_default());
        session.set_sentiment_analysis(self.sentiment_analysis);
        session.set_external_endpointer(self.external_endpointer);
        session.set_debug(self.debug);
    }
}
