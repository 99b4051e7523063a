//! Process-scoped client context.
//!
//! A [`DialogflowClient`] is built once per process. It carries the
//! channel provider and the call logger every session reports to, and
//! hands out sessions.
//!
//! # Init and teardown
//!
//! [`DialogflowClient::init`] installs the rustls crypto provider before
//! any channel is built. Sessions keep the context alive through an `Arc`,
//! so dropping the client while sessions exist is safe; the transport is
//! released when the last session goes away.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use super::error::DialogflowError;
use super::grpc::GrpcChannelProvider;
use super::session::Session;
use super::synth::{SynthesisRequest, synthesize_to_file};
use super::telemetry::{CallLogger, UserData};
use super::transport::ChannelProvider;
use crate::core::providers::TEXT_TO_SPEECH_ENDPOINT;

/// Collaborators shared by every session of one client.
pub(crate) struct ClientContext {
    pub(crate) provider: Arc<dyn ChannelProvider>,
    pub(crate) call_logger: Arc<dyn CallLogger>,
}

/// Entry point of the library.
#[derive(Clone)]
pub struct DialogflowClient {
    context: Arc<ClientContext>,
}

impl DialogflowClient {
    /// Builds a client backed by the gRPC transport.
    pub fn init(call_logger: Arc<dyn CallLogger>) -> Self {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider already installed");
        }

        Self::with_provider(Arc::new(GrpcChannelProvider::new()), call_logger)
    }

    /// Builds a client on top of any transport.
    pub fn with_provider(
        provider: Arc<dyn ChannelProvider>,
        call_logger: Arc<dyn CallLogger>,
    ) -> Self {
        info!("Dialogflow client initialized");
        Self {
            context: Arc::new(ClientContext {
                provider,
                call_logger,
            }),
        }
    }

    /// Creates a new idle session. `user_data` is handed back to the call
    /// logger with every event of this session.
    pub fn create_session(&self, user_data: Option<UserData>) -> Session {
        Session::new(self.context.clone(), user_data)
    }

    /// Synthesizes speech and returns the raw audio.
    ///
    /// An empty `endpoint` selects the public text-to-speech endpoint.
    pub async fn synthesize(
        &self,
        endpoint: &str,
        auth_key: &str,
        request: SynthesisRequest,
    ) -> Result<Bytes, DialogflowError> {
        let synthesizer = self
            .context
            .provider
            .connect_synthesizer(tts_endpoint(endpoint), auth_key)
            .await?;
        Ok(synthesizer.synthesize(request).await?)
    }

    /// Synthesizes speech and writes it to `destination`. Returns the
    /// number of bytes written.
    pub async fn synthesize_to_file(
        &self,
        endpoint: &str,
        auth_key: &str,
        request: SynthesisRequest,
        destination: impl AsRef<Path>,
    ) -> Result<usize, DialogflowError> {
        let synthesizer = self
            .context
            .provider
            .connect_synthesizer(tts_endpoint(endpoint), auth_key)
            .await?;
        synthesize_to_file(synthesizer.as_ref(), request, destination.as_ref()).await
    }
}

fn tts_endpoint(endpoint: &str) -> &str {
    if endpoint.trim().is_empty() {
        TEXT_TO_SPEECH_ENDPOINT
    } else {
        endpoint.trim()
    }
}

impl std::fmt::Debug for DialogflowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogflowClient").finish_non_exhaustive()
    }
}
