//! The generation endpoint the session client talks to.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{GenerateContentRequest, GenerateContentResponse};
use crate::core::chat_stream::{FragmentStream, SseDecoder, StreamSender, TransportError};
use crate::core::providers::{resolve_env_credentials, ConfigurationError, ProviderCredentials};
use crate::utils::url::model_endpoint;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate(
        &self,
        request: GenerateContentRequest,
    ) -> Result<GenerateContentResponse, TransportError>;

    /// Resolves once the provider has accepted the request; fragments follow
    /// on the returned stream.
    async fn generate_stream(
        &self,
        request: GenerateContentRequest,
    ) -> Result<FragmentStream, TransportError>;
}

/// Gemini REST backend.
pub struct GeminiBackend {
    client: reqwest::Client,
    credentials: ProviderCredentials,
}

impl GeminiBackend {
    pub fn new(credentials: ProviderCredentials) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            credentials,
        }
    }

    pub fn from_env(configured_base_url: Option<&str>) -> Result<Self, ConfigurationError> {
        resolve_env_credentials(configured_base_url).map(Self::new)
    }

    pub fn base_url(&self) -> &str {
        &self.credentials.base_url
    }

    async fn post(
        &self,
        url: String,
        request: &GenerateContentRequest,
    ) -> Result<reqwest::Response, TransportError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.credentials.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(TransportError::Status {
                code: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerativeBackend for GeminiBackend {
    async fn generate(
        &self,
        request: GenerateContentRequest,
    ) -> Result<GenerateContentResponse, TransportError> {
        let url = model_endpoint(self.base_url(), &request.model, "generateContent", false);
        debug!(model = %request.model, contents = request.contents.len(), "generateContent");
        let response = self.post(url, &request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Stream(e.to_string()))?;
        serde_json::from_str(&body).map_err(|_| TransportError::Decode(body))
    }

    async fn generate_stream(
        &self,
        request: GenerateContentRequest,
    ) -> Result<FragmentStream, TransportError> {
        let url = model_endpoint(self.base_url(), &request.model, "streamGenerateContent", true);
        debug!(model = %request.model, contents = request.contents.len(), "streamGenerateContent");
        let response = self.post(url, &request).await?;

        let cancel_token = CancellationToken::new();
        let (tx, stream) = FragmentStream::channel();
        let stream = stream.with_cancel_guard(cancel_token.clone().drop_guard());

        tokio::spawn(async move {
            tokio::select! {
                _ = pump_body(response, &tx) => {}
                _ = cancel_token.cancelled() => {
                    debug!("stream consumer went away; closing response body");
                }
            }
        });

        Ok(stream)
    }
}

async fn pump_body(response: reqwest::Response, tx: &StreamSender) {
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                if decoder.push(&bytes, tx) {
                    return;
                }
            }
            Err(e) => {
                tx.error(TransportError::Stream(e.to_string()));
                return;
            }
        }
    }

    if !decoder.finish(tx) {
        tx.end();
    }
}
