use super::session::Session;
use crate::config::Endpoint;
use crate::error::{Result, SdError};
use crate::models::{ModelDescriptor, ModelOption};
use crate::transport::Method;
use std::sync::Arc;

/// Checkpoint listing and selection.
#[derive(Clone)]
pub(crate) struct ModelClient {
    session: Arc<Session>,
}

impl ModelClient {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn list(&self) -> Result<Vec<ModelDescriptor>> {
        let body = self.session.call(Method::Get, Endpoint::Models, None).await?;

        let models: Vec<ModelDescriptor> = serde_json::from_str(&body).map_err(|e| {
            SdError::MalformedResponse(format!("model list is not an array of models: {}", e))
        })?;

        log::info!("Server lists {} model(s)", models.len());
        for model in &models {
            log::debug!("  {} ({})", model.model_name, model.title);
        }
        Ok(models)
    }

    pub async fn select(&self, model_name: &str) -> Result<()> {
        let option = ModelOption {
            sd_model_checkpoint: model_name.to_string(),
        };
        let body = serde_json::to_string(&option)?;

        log::info!("Setting active model: {}", model_name);
        self.session
            .call(Method::Post, Endpoint::Options, Some(body))
            .await
            .map_err(|e| {
                log::error!("Failed to set model '{}': {}", model_name, e);
                e
            })?;
        Ok(())
    }
}
