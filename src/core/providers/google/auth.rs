//! Google Cloud credential loading.
//!
//! The session's `auth_key` is a single string that can hold one of three
//! things, mirroring how telephony hosts usually ship service-account keys:
//!
//! - empty: use Application Default Credentials
//! - a JSON document (starts with `{`): inline service-account key
//! - anything else: path to a service-account or user credentials file

use std::path::Path;

use google_cloud_auth::credentials::{Builder as CredentialsBuilder, Credentials};
use http::Extensions;
use tracing::{debug, error};

use super::error::GoogleError;

/// Where the credentials for a channel come from.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialSource {
    /// Application Default Credentials (`GOOGLE_APPLICATION_CREDENTIALS`,
    /// metadata server, or `gcloud auth application-default login`).
    ApplicationDefault,

    /// Service account JSON content provided directly as a string.
    JsonContent(String),

    /// Path to a service account JSON file or user credentials file.
    FilePath(String),
}

impl CredentialSource {
    /// Classifies an auth key string.
    ///
    /// ```rust
    /// use dfegrpc::core::providers::google::CredentialSource;
    ///
    /// assert_eq!(CredentialSource::from_auth_key(""), CredentialSource::ApplicationDefault);
    /// assert!(matches!(
    ///     CredentialSource::from_auth_key(r#"{"type": "service_account"}"#),
    ///     CredentialSource::JsonContent(_)
    /// ));
    /// assert!(matches!(
    ///     CredentialSource::from_auth_key("/etc/asterisk/df-key.json"),
    ///     CredentialSource::FilePath(_)
    /// ));
    /// ```
    pub fn from_auth_key(auth_key: &str) -> Self {
        if auth_key.trim().is_empty() {
            CredentialSource::ApplicationDefault
        } else if auth_key.trim_start().starts_with('{') {
            CredentialSource::JsonContent(auth_key.to_string())
        } else {
            CredentialSource::FilePath(auth_key.to_string())
        }
    }

    /// Validates the credential source for common issues.
    ///
    /// # Errors
    ///
    /// Returns `GoogleError::ConfigurationError` if the JSON does not parse,
    /// the path contains a traversal, or the file does not exist.
    pub fn validate(&self) -> Result<(), GoogleError> {
        match self {
            CredentialSource::ApplicationDefault => Ok(()),
            CredentialSource::JsonContent(json) => {
                if !json.trim_end().ends_with('}') {
                    return Err(GoogleError::ConfigurationError(
                        "Invalid JSON content: must be a JSON object".to_string(),
                    ));
                }
                serde_json::from_str::<serde_json::Value>(json).map_err(|e| {
                    GoogleError::ConfigurationError(format!("Invalid JSON content: {e}"))
                })?;
                Ok(())
            }
            CredentialSource::FilePath(path) => {
                if path.contains("..") {
                    return Err(GoogleError::ConfigurationError(
                        "Invalid credential file path: path traversal not allowed".to_string(),
                    ));
                }
                if !Path::new(path).exists() {
                    return Err(GoogleError::ConfigurationError(format!(
                        "Credential file not found: {path}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Reads the `project_id` field out of the credential JSON, if any.
    pub fn extract_project_id(&self) -> Option<String> {
        let content = match self {
            CredentialSource::ApplicationDefault => {
                let path = std::env::var("GOOGLE_APPLICATION_CREDENTIALS").ok()?;
                std::fs::read_to_string(path).ok()?
            }
            CredentialSource::JsonContent(json) => json.clone(),
            CredentialSource::FilePath(path) => std::fs::read_to_string(path).ok()?,
        };

        serde_json::from_str::<serde_json::Value>(&content)
            .ok()?
            .get("project_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

/// Source of OAuth2 bearer tokens for outgoing RPCs.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a valid access token, refreshing it when needed.
    async fn get_token(&self) -> Result<String, GoogleError>;
}

/// Token provider backed by `google-cloud-auth` credentials.
pub struct GoogleAuthClient {
    credentials: Credentials,
}

impl std::fmt::Debug for GoogleAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleAuthClient")
            .field("credentials", &"<credentials>")
            .finish()
    }
}

impl GoogleAuthClient {
    /// Loads credentials from `credential_source` for the given scopes.
    pub fn new<S: AsRef<str>>(
        credential_source: CredentialSource,
        scopes: &[S],
    ) -> Result<Self, GoogleError> {
        credential_source.validate()?;

        let scope_strings: Vec<String> = scopes.iter().map(|s| s.as_ref().to_string()).collect();

        let credentials = match credential_source {
            CredentialSource::ApplicationDefault => CredentialsBuilder::default()
                .with_scopes(scope_strings)
                .build()
                .map_err(|e| {
                    error!(error = %e, "Failed to initialize Application Default Credentials");
                    GoogleError::AuthenticationFailed(format!(
                        "Failed to initialize Application Default Credentials: {e}"
                    ))
                })?,
            CredentialSource::JsonContent(ref json) => {
                let json_value: serde_json::Value = serde_json::from_str(json).map_err(|e| {
                    GoogleError::ConfigurationError(format!("Invalid JSON content: {e}"))
                })?;
                Self::build_from_json(json_value, scope_strings, "inline key")?
            }
            CredentialSource::FilePath(ref path) => {
                let json_content = std::fs::read_to_string(path).map_err(|e| {
                    error!(error = %e, path = %path, "Failed to read credentials file");
                    GoogleError::ConfigurationError(format!(
                        "Failed to read credentials file '{path}': {e}"
                    ))
                })?;
                let json_value: serde_json::Value =
                    serde_json::from_str(&json_content).map_err(|e| {
                        GoogleError::ConfigurationError(format!(
                            "Failed to parse credentials file '{path}': {e}"
                        ))
                    })?;
                Self::build_from_json(json_value, scope_strings, path)?
            }
        };

        debug!("Google Cloud credentials loaded");
        Ok(Self { credentials })
    }

    fn build_from_json(
        json_value: serde_json::Value,
        scopes: Vec<String>,
        origin: &str,
    ) -> Result<Credentials, GoogleError> {
        let cred_type = json_value
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("service_account")
            .to_string();

        match cred_type.as_str() {
            "service_account" => {
                use google_cloud_auth::credentials::service_account;
                service_account::Builder::new(json_value)
                    .with_access_specifier(service_account::AccessSpecifier::from_scopes(scopes))
                    .build()
                    .map_err(|e| {
                        error!(error = %e, origin = %origin, "Failed to load service account credentials");
                        GoogleError::AuthenticationFailed(format!(
                            "Failed to load service account credentials from {origin}: {e}"
                        ))
                    })
            }
            "authorized_user" => {
                use google_cloud_auth::credentials::user_account;
                user_account::Builder::new(json_value)
                    .with_scopes(scopes)
                    .build()
                    .map_err(|e| {
                        error!(error = %e, origin = %origin, "Failed to load user credentials");
                        GoogleError::AuthenticationFailed(format!(
                            "Failed to load user credentials from {origin}: {e}"
                        ))
                    })
            }
            other => Err(GoogleError::ConfigurationError(format!(
                "Unsupported credential type '{other}' in {origin}. \
                 Expected 'service_account' or 'authorized_user'"
            ))),
        }
    }

    fn extract_token_from_headers(
        &self,
        headers: google_cloud_auth::credentials::CacheableResource<http::HeaderMap>,
    ) -> Result<String, GoogleError> {
        use google_cloud_auth::credentials::CacheableResource;

        let header_map = match headers {
            CacheableResource::New { data, .. } => data,
            CacheableResource::NotModified => {
                return Err(GoogleError::AuthenticationFailed(
                    "Received NotModified response but no cached token available".to_string(),
                ));
            }
        };

        let auth_value = header_map.get(http::header::AUTHORIZATION).ok_or_else(|| {
            GoogleError::AuthenticationFailed(
                "No Authorization header in credentials response".to_string(),
            )
        })?;

        let auth_str = auth_value.to_str().map_err(|e| {
            GoogleError::AuthenticationFailed(format!("Invalid Authorization header value: {e}"))
        })?;

        auth_str
            .strip_prefix("Bearer ")
            .map(str::to_string)
            .ok_or_else(|| {
                GoogleError::AuthenticationFailed(
                    "Authorization header is not a Bearer token".to_string(),
                )
            })
    }
}

#[async_trait::async_trait]
impl TokenProvider for GoogleAuthClient {
    async fn get_token(&self) -> Result<String, GoogleError> {
        let headers = self
            .credentials
            .headers(Extensions::new())
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to fetch access token");
                GoogleError::AuthenticationFailed(format!("Failed to fetch access token: {e}"))
            })?;

        self.extract_token_from_headers(headers)
    }
}

/// A mock token provider for tests.
#[cfg(test)]
pub struct MockTokenProvider {
    pub token: Option<String>,
    pub error: Option<String>,
}

#[cfg(test)]
impl MockTokenProvider {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            error: None,
        }
    }

    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            token: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl TokenProvider for MockTokenProvider {
    async fn get_token(&self) -> Result<String, GoogleError> {
        match (&self.error, &self.token) {
            (Some(error), _) => Err(GoogleError::AuthenticationFailed(error.clone())),
            (None, Some(token)) => Ok(token.clone()),
            (None, None) => Err(GoogleError::AuthenticationFailed(
                "Mock provider not configured".to_string(),
            )),
        }
    }
}
