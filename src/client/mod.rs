mod image_client;
mod model_client;
pub mod progress;
mod session;
mod state;

pub use state::ClientState;

use crate::config::ServerConfig;
use crate::error::{Result, SdError};
use crate::models::{GenerationRequest, GenerationResponse, ModelDescriptor, ProgressState};
use crate::transport::{ReqwestTransport, Transport};
use image_client::ImageClient;
use model_client::ModelClient;
use progress::{ProgressClient, ProgressMonitor, ProgressSlot};
use session::Session;
use state::StateCell;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Client for one Stable Diffusion server.
///
/// The server runs one job at a time, so each instance runs at most one
/// operation at a time too: a call made while another is outstanding fails
/// with [`SdError::AlreadyInProgress`] before anything is sent. Progress
/// polling is the exception and may run at any time.
pub struct SdClient {
    session: Arc<Session>,
    models: ModelClient,
    images: ImageClient,
    progress: ProgressClient,
    state: StateCell,
    model_cache: Mutex<Vec<ModelDescriptor>>,
    active_model: Mutex<Option<String>>,
    progress_slot: ProgressSlot,
}

impl SdClient {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let transport = ReqwestTransport::new()?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: ServerConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        log::info!("Stable Diffusion server: {}", config.endpoints.server_url);

        let session = Arc::new(Session::new(transport, config));
        let (progress_tx, _) = watch::channel(None);

        Ok(Self {
            models: ModelClient::new(session.clone()),
            images: ImageClient::new(session.clone()),
            progress: ProgressClient::new(session.clone()),
            session,
            state: StateCell::default(),
            model_cache: Mutex::new(Vec::new()),
            active_model: Mutex::new(None),
            progress_slot: Arc::new(progress_tx),
        })
    }

    pub fn state(&self) -> ClientState {
        self.state.get()
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> ServerConfig {
        self.session.config().clone()
    }

    /// Applies `update` to the live configuration; later requests see the change.
    pub fn update_config(&self, update: impl FnOnce(&mut ServerConfig)) -> Result<()> {
        let mut config = self.session.config_mut();
        let mut candidate = config.clone();
        update(&mut candidate);
        candidate.validate()?;
        *config = candidate;
        Ok(())
    }

    pub fn set_credentials(&self, username: impl Into<String>, password: impl Into<String>) {
        self.session.config_mut().set_credentials(username, password);
    }

    pub fn cached_models(&self) -> Vec<ModelDescriptor> {
        lock(&self.model_cache).clone()
    }

    /// Checkpoint last set through this client, if any.
    pub fn active_model(&self) -> Option<String> {
        lock(&self.active_model).clone()
    }

    pub async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        let _guard = self.state.begin(ClientState::ModelSelecting)?;
        self.refresh_models().await
    }

    /// Switches the server's active checkpoint, listing models first when
    /// none have been fetched yet.
    pub async fn select_model(&self, model_name: &str) -> Result<()> {
        let _guard = self.state.begin(ClientState::ModelSelecting)?;
        self.set_model(model_name).await
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse> {
        let _guard = self.state.begin(ClientState::Generating)?;
        self.images.generate(request).await
    }

    /// One progress request. Does not touch the client state or the progress slot.
    pub async fn poll_progress(&self) -> Result<ProgressState> {
        self.progress.poll().await
    }

    /// Full flow: make sure `model` is active, then generate while the
    /// progress slot is kept up to date in the background.
    pub async fn generate_with_progress(
        &self,
        model: Option<&str>,
        request: GenerationRequest,
    ) -> Result<GenerationResponse> {
        let guard = self.state.begin(ClientState::ModelSelecting)?;

        if let Some(name) = model {
            let already_active = self.active_model().as_deref() == Some(name);
            if already_active {
                log::debug!("Model '{}' already active", name);
            } else {
                self.set_model(name).await?;
            }
        }

        guard.transition(ClientState::Polling);
        self.progress_slot.send_replace(None);
        let monitor = ProgressMonitor::spawn(self.progress.clone(), self.progress_slot.clone());

        let result = self.images.generate(request).await;
        if monitor.is_finished() {
            log::debug!("Progress monitor ended before the response arrived");
        }
        monitor.stop().await;

        if result.is_ok() {
            self.progress_slot.send_replace(Some(ProgressState::finished()));
        }
        result
    }

    /// Receiver on the progress slot filled by [`SdClient::generate_with_progress`].
    pub fn subscribe_progress(&self) -> watch::Receiver<Option<ProgressState>> {
        self.progress_slot.subscribe()
    }

    pub fn progress_stream(&self) -> WatchStream<Option<ProgressState>> {
        WatchStream::new(self.subscribe_progress())
    }

    /// Latest progress snapshot, if a monitored generation has reported one.
    pub fn latest_progress(&self) -> Option<ProgressState> {
        self.progress_slot.borrow().clone()
    }

    async fn refresh_models(&self) -> Result<Vec<ModelDescriptor>> {
        let models = self.models.list().await?;
        *lock(&self.model_cache) = models.clone();
        Ok(models)
    }

    async fn set_model(&self, model_name: &str) -> Result<()> {
        if model_name.trim().is_empty() {
            return Err(SdError::InvalidParameter("model name must not be empty".into()));
        }

        let cache_empty = lock(&self.model_cache).is_empty();
        if cache_empty {
            log::debug!("Model list empty, fetching it first");
            self.refresh_models().await?;
        }

        let known = lock(&self.model_cache).iter().any(|m| m.matches(model_name));
        if !known {
            log::warn!("Model '{}' is not in the server's model list", model_name);
        }

        self.models.select(model_name).await?;
        *lock(&self.active_model) = Some(model_name.to_string());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
