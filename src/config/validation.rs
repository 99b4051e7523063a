use tracing::debug;

use super::ClientConfig;
use crate::core::providers::google::CredentialSource;

/// Fill in a missing project id from the credentials
///
/// Service-account keys carry a `project_id` field; when the configuration
/// names no project, that one is used.
///
/// # Errors
/// Returns an error if the credentials are unusable or no project id can be
/// determined.
pub fn resolve_project_id(config: &mut ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let source = CredentialSource::from_auth_key(&config.auth_key);
    source.validate()?;

    if !config.project_id.is_empty() {
        return Ok(());
    }

    match source.extract_project_id() {
        Some(project_id) => {
            debug!(project_id = %project_id, "Using project_id from credentials");
            config.project_id = project_id;
            Ok(())
        }
        None => Err(
            "project_id is required: set DIALOGFLOW_PROJECT_ID or use credentials that contain one"
                .into(),
        ),
    }
}
