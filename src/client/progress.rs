use super::session::Session;
use crate::config::Endpoint;
use crate::error::{Result, SdError};
use crate::models::{ProgressState, RawProgress};
use crate::transport::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub type ProgressSlot = Arc<watch::Sender<Option<ProgressState>>>;

#[derive(Clone)]
pub(crate) struct ProgressClient {
    session: Arc<Session>,
}

impl ProgressClient {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn poll(&self) -> Result<ProgressState> {
        let body = self.session.call(Method::Get, Endpoint::Progress, None).await?;
        let raw: RawProgress = serde_json::from_str(&body)
            .map_err(|e| SdError::MalformedResponse(format!("progress payload: {}", e)))?;
        ProgressState::from_raw(raw)
    }

    pub fn poll_interval(&self) -> Duration {
        self.session.config().poll_interval
    }
}

/// Background poller feeding a watch slot while a generation is outstanding.
///
/// Failed or unparsable polls are dropped, so the slot always holds the last
/// good snapshot. The monitor ends on its own once progress has been seen
/// above zero and then reads zero again, which the server reports once the
/// job is done.
pub(crate) struct ProgressMonitor {
    handle: JoinHandle<()>,
}

impl ProgressMonitor {
    pub fn spawn(client: ProgressClient, slot: ProgressSlot) -> Self {
        let interval = client.poll_interval();
        let handle = tokio::spawn(run(client, interval, slot));
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

async fn run(client: ProgressClient, interval: Duration, slot: ProgressSlot) {
    let mut seen_progress = false;

    loop {
        tokio::time::sleep(interval).await;

        let state = match client.poll().await {
            Ok(state) => state,
            Err(e) => {
                log::debug!("Progress poll failed, keeping last state: {}", e);
                continue;
            }
        };

        if state.progress > 0.0 {
            seen_progress = true;
            log::debug!(
                "Progress {:.0}% (step {}/{}, eta {:.1}s)",
                state.percent(),
                state.sampling_step,
                state.sampling_steps,
                state.eta_relative.as_secs_f32()
            );
            slot.send_replace(Some(state));
        } else if seen_progress {
            log::debug!("Progress dropped back to zero, job has ended");
            slot.send_replace(Some(ProgressState::finished()));
            break;
        } else {
            slot.send_replace(Some(state));
        }
    }
}
