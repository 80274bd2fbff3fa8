//! The seam between the controller and the hosted model.

use anyhow::Result;
use async_trait::async_trait;
use providers::gemini::GeminiClient;
use shared::gateway_api::{StreamChunk, TextRequest, TextResponse};
use tokio::sync::mpsc::UnboundedSender;

/// Black-box capability the controller talks to. Implemented by the
/// Gemini client in production and by scripted fakes in tests.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn generate_text(&self, request: TextRequest) -> Result<TextResponse>;

    /// Streaming generation. A failure before any chunk is sent returns
    /// `Err`; once chunks flow, failures arrive as [`StreamChunk::Error`]
    /// and the call returns `Ok(())`.
    async fn stream_text(
        &self,
        request: TextRequest,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()>;

    /// Generate one image and return a data URL for it.
    async fn generate_image(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
impl ModelGateway for GeminiClient {
    async fn generate_text(&self, request: TextRequest) -> Result<TextResponse> {
        self.generate(&request).await
    }

    async fn stream_text(
        &self,
        request: TextRequest,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        self.generate_stream(&request, tx).await
    }

    async fn generate_image(&self, prompt: &str) -> Result<String> {
        GeminiClient::generate_image(self, prompt).await
    }
}
