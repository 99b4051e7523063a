use super::ClientConfig;
use super::merge::merge_config;
use super::validation::resolve_project_id;

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// Reads `DIALOGFLOW_*` variables with sensible defaults. Also loads a
    /// `.env` file if present using dotenvy.
    ///
    /// # Errors
    /// Returns an error if:
    /// - A boolean variable holds something other than true/false/1/0/yes/no
    /// - No project id is configured and none can be read from the credentials
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let _ = dotenvy::dotenv();

        let mut config = merge_config(None)?;
        resolve_project_id(&mut config)?;

        Ok(config)
    }
}
