use super::response::decode_base64_image;
use crate::error::{Result, SdError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProgress {
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub eta_relative: f32,
    #[serde(default)]
    pub state: RawProgressState,
    #[serde(default)]
    pub current_image: Option<String>,
    #[serde(default)]
    pub textinfo: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProgressState {
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub job_count: i32,
    #[serde(default)]
    pub job_timestamp: Option<String>,
    #[serde(default)]
    pub job_no: i32,
    #[serde(default)]
    pub sampling_step: i32,
    #[serde(default)]
    pub sampling_steps: i32,
}

/// Snapshot of the server's progress for the running job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressState {
    /// Completion in [0, 1].
    pub progress: f32,
    pub eta_relative: Duration,
    /// Decoded preview of the image being denoised, when the server sends one.
    #[serde(skip)]
    pub preview: Option<Vec<u8>>,
    pub text_info: Option<String>,
    pub interrupted: bool,
    pub skipped: bool,
    pub job: Option<String>,
    pub job_count: i32,
    pub job_no: i32,
    pub sampling_step: i32,
    pub sampling_steps: i32,
}

impl ProgressState {
    pub fn from_raw(raw: RawProgress) -> Result<Self> {
        let preview = match raw.current_image.as_deref() {
            Some(data) if !data.is_empty() => Some(decode_base64_image(data).map_err(|e| {
                SdError::MalformedResponse(format!("preview image is not valid base64: {}", e))
            })?),
            _ => None,
        };

        let progress = if raw.progress.is_finite() {
            raw.progress.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let eta = Duration::try_from_secs_f32(raw.eta_relative).unwrap_or(Duration::ZERO);

        Ok(ProgressState {
            progress,
            eta_relative: eta,
            preview,
            text_info: raw.textinfo.filter(|t| !t.is_empty()),
            interrupted: raw.state.interrupted,
            skipped: raw.state.skipped,
            job: raw.state.job.filter(|j| !j.is_empty()),
            job_count: raw.state.job_count,
            job_no: raw.state.job_no,
            sampling_step: raw.state.sampling_step,
            sampling_steps: raw.state.sampling_steps,
        })
    }

    /// State published once the job is known to be over.
    pub fn finished() -> Self {
        ProgressState {
            progress: 1.0,
            ..Default::default()
        }
    }

    pub fn percent(&self) -> f32 {
        self.progress * 100.0
    }

    pub fn is_finished(&self) -> bool {
        self.progress >= 1.0 || self.interrupted || self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    #[test]
    fn test_progress_from_server_payload() {
        let json = format!(
            r#"{{
                "progress": 0.42,
                "eta_relative": 3.5,
                "state": {{"skipped": false, "interrupted": false, "job": "txt2img",
                           "job_count": 1, "job_timestamp": "20240101120000", "job_no": 0,
                           "sampling_step": 8, "sampling_steps": 20}},
                "current_image": "{}",
                "textinfo": null
            }}"#,
            STANDARD.encode(b"preview")
        );
        let raw: RawProgress = serde_json::from_str(&json).unwrap();
        let state = ProgressState::from_raw(raw).unwrap();

        assert!((state.progress - 0.42).abs() < f32::EPSILON);
        assert_eq!(state.eta_relative, Duration::from_secs_f32(3.5));
        assert_eq!(state.preview.as_deref(), Some(&b"preview"[..]));
        assert_eq!(state.sampling_step, 8);
        assert_eq!(state.job.as_deref(), Some("txt2img"));
        assert!(state.text_info.is_none());
        assert!(!state.is_finished());
    }

    #[test]
    fn test_progress_is_clamped_and_tolerant() {
        let raw: RawProgress =
            serde_json::from_str(r#"{"progress": 1.7, "eta_relative": -2}"#).unwrap();
        let state = ProgressState::from_raw(raw).unwrap();
        assert_eq!(state.progress, 1.0);
        assert_eq!(state.eta_relative, Duration::ZERO);
        assert!(state.is_finished());
        assert_eq!(ProgressState::finished().percent(), 100.0);
    }

    #[test]
    fn test_interrupted_counts_as_finished() {
        let raw: RawProgress =
            serde_json::from_str(r#"{"progress": 0.3, "state": {"interrupted": true}}"#).unwrap();
        assert!(ProgressState::from_raw(raw).unwrap().is_finished());
    }
}
