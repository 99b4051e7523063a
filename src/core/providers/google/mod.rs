//! Google Cloud provider infrastructure.
//!
//! Shared plumbing for the Google Cloud services this crate talks to
//! (Dialogflow sessions and Text-to-Speech):
//!
//! - **auth**: credential sources and bearer token acquisition
//! - **client**: TLS gRPC channel creation and request authorization
//! - **error**: provider-level error type

pub mod auth;
pub mod client;
pub mod error;

pub use auth::{CredentialSource, GoogleAuthClient, TokenProvider};
pub use client::{
    AuthenticatedChannel, create_authenticated_channel, create_grpc_channel, endpoint_uri,
};
pub use error::GoogleError;

#[cfg(test)]
pub use auth::MockTokenProvider;

/// OAuth2 scope covering every Google Cloud API.
pub const GOOGLE_CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Default Dialogflow endpoint, in the scheme-less form hosts configure.
pub const DIALOGFLOW_ENDPOINT: &str = "dialogflow.googleapis.com";

/// Default Text-to-Speech endpoint.
pub const TEXT_TO_SPEECH_ENDPOINT: &str = "texttospeech.googleapis.com";
