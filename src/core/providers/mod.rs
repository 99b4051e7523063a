//! Provider infrastructure for external cloud services.
//!
//! # Available Providers
//!
//! - **google**: Google Cloud authentication and gRPC channel infrastructure

pub mod google;

pub use google::{
    AuthenticatedChannel, CredentialSource, DIALOGFLOW_ENDPOINT, GOOGLE_CLOUD_PLATFORM_SCOPE,
    GoogleAuthClient, GoogleError, TEXT_TO_SPEECH_ENDPOINT, TokenProvider,
    create_authenticated_channel, create_grpc_channel, endpoint_uri,
};
