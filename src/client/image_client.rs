use super::session::Session;
use crate::error::{Result, SdError};
use crate::logger;
use crate::models::{GenerationRequest, GenerationResponse, RawGenerationResponse};
use crate::transport::Method;
use std::sync::Arc;

/// Text-to-image and image-to-image submission.
#[derive(Clone)]
pub(crate) struct ImageClient {
    session: Arc<Session>,
}

impl ImageClient {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn generate(&self, mut request: GenerationRequest) -> Result<GenerationResponse> {
        request.prepare()?;
        let body = request.to_json()?;
        let endpoint = request.endpoint();

        log::info!(
            "Generating image ({}) {}x{}, {} steps, cfg {}, seed {}",
            request.kind(),
            request.params.width,
            request.params.height,
            request.params.steps,
            request.params.cfg_scale,
            request.params.seed
        );
        log::debug!("Prompt: {}", request.params.prompt);

        let _timer = logger::timer(&format!("{} generation", request.kind()));
        let text = self.session.call(Method::Post, endpoint, Some(body)).await?;

        let raw: RawGenerationResponse = serde_json::from_str(&text).map_err(|e| {
            SdError::MalformedResponse(format!("{} response has an unexpected shape: {}", request.kind(), e))
        })?;

        let response = GenerationResponse::from_raw(raw, &request.params).map_err(|e| {
            if matches!(e, SdError::EmptyResult) {
                log::error!(
                    "No image was returned by the server. Verify that the server is correctly set up."
                );
            }
            e
        })?;

        log::info!(
            "Received {} image(s), seed {}",
            response.images().len(),
            response.seed()
        );
        Ok(response)
    }
}
