//! gRPC channel creation for Google Cloud endpoints.

use std::sync::Arc;

use tracing::{debug, error};

use super::auth::TokenProvider;
use super::error::GoogleError;

/// Turns a bare `host[:port]` endpoint into a URI tonic accepts.
///
/// Telephony configs traditionally carry `dialogflow.googleapis.com`
/// without a scheme; gRPC over TLS always means `https`.
pub fn endpoint_uri(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("https://") || endpoint.starts_with("http://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

/// Creates a TLS-secured gRPC channel to a Google Cloud API endpoint.
///
/// The connection is established eagerly so an unreachable endpoint is
/// reported here rather than on the first RPC.
///
/// # Errors
///
/// Returns `GoogleError::ConfigurationError` for a malformed endpoint and
/// `GoogleError::ConnectionFailed` if the connection cannot be established.
pub async fn create_grpc_channel(endpoint: &str) -> Result<tonic::transport::Channel, GoogleError> {
    let uri = endpoint_uri(endpoint);

    let channel = tonic::transport::Channel::from_shared(uri.clone())
        .map_err(|e| {
            error!(error = %e, endpoint = %uri, "Invalid endpoint URL");
            GoogleError::ConfigurationError(format!("Invalid endpoint URL '{uri}': {e}"))
        })?
        .tls_config(tonic::transport::ClientTlsConfig::new().with_native_roots())
        .map_err(|e| {
            error!(error = %e, "Failed to configure TLS");
            GoogleError::ConnectionFailed(format!("Failed to configure TLS: {e}"))
        })?
        .connect()
        .await
        .map_err(|e| {
            error!(error = %e, endpoint = %uri, "Failed to connect to Google API");
            GoogleError::ConnectionFailed(format!("Failed to connect to '{uri}': {e}"))
        })?;

    debug!(endpoint = %uri, "Connected to Google Cloud API");

    Ok(channel)
}

/// A gRPC channel paired with the token provider that authorizes its calls.
#[derive(Clone)]
pub struct AuthenticatedChannel {
    channel: tonic::transport::Channel,
    token_provider: Arc<dyn TokenProvider>,
}

impl AuthenticatedChannel {
    pub fn new(channel: tonic::transport::Channel, token_provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            channel,
            token_provider,
        }
    }

    /// Clones the underlying gRPC channel (cheap, tonic channels are shared).
    pub fn clone_channel(&self) -> tonic::transport::Channel {
        self.channel.clone()
    }

    /// Gets the authorization header value (including "Bearer " prefix).
    pub async fn get_authorization_header(&self) -> Result<String, GoogleError> {
        let token = self.token_provider.get_token().await?;
        Ok(format!("Bearer {token}"))
    }

    /// Attaches a fresh bearer token to an outgoing request.
    ///
    /// Tokens are fetched per call so long-lived sessions survive token
    /// expiry; the credentials layer caches them between calls.
    pub async fn authorize<T>(&self, request: &mut tonic::Request<T>) -> Result<(), GoogleError> {
        let header = self.get_authorization_header().await?;
        let value: tonic::metadata::MetadataValue<_> = header.parse().map_err(|_| {
            GoogleError::AuthenticationFailed("Failed to parse authorization header".to_string())
        })?;
        request.metadata_mut().insert("authorization", value);
        Ok(())
    }
}

/// Creates an authenticated gRPC channel for a Google Cloud API.
pub async fn create_authenticated_channel(
    endpoint: &str,
    token_provider: Arc<dyn TokenProvider>,
) -> Result<AuthenticatedChannel, GoogleError> {
    let channel = create_grpc_channel(endpoint).await?;
    Ok(AuthenticatedChannel::new(channel, token_provider))
}
