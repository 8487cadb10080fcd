use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_SIDE_LENGTH: i32 = 128;
pub const MAX_SIDE_LENGTH: i32 = 2048;
pub const DEFAULT_SIDE_LENGTH: i32 = 512;
pub const MIN_CFG_SCALE: f32 = 1.0;
pub const MAX_CFG_SCALE: f32 = 30.0;
pub const DEFAULT_CFG_SCALE: f32 = 7.0;
pub const MIN_SAMPLING_STEPS: i32 = 1;
pub const MAX_SAMPLING_STEPS: i32 = 150;
pub const DEFAULT_STEPS: i32 = 50;
pub const MAX_BATCH_SIZE: i32 = 8;
pub const MAX_BATCH_COUNT: i32 = 10;

/// A checkpoint as listed by the models endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub title: String,
    pub model_name: String,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub config: Option<String>,
}

impl ModelDescriptor {
    /// Whether `name` designates this checkpoint (the server accepts either form).
    pub fn matches(&self, name: &str) -> bool {
        self.model_name == name || self.title == name
    }
}

/// Body of the options call that switches the active checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOption {
    pub sd_model_checkpoint: String,
}

/// Samplers shipped with the server. Requests carry the display name as a
/// plain string, so extension samplers can still be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sampler {
    EulerA,
    Euler,
    Lms,
    Heun,
    Dpm2,
    Dpm2A,
    DpmPlusPlus2SA,
    DpmPlusPlus2M,
    DpmPlusPlusSde,
    DpmFast,
    DpmAdaptive,
    LmsKarras,
    Dpm2Karras,
    Dpm2AKarras,
    DpmPlusPlus2SAKarras,
    DpmPlusPlus2MKarras,
    DpmPlusPlusSdeKarras,
    Ddim,
    Plms,
}

impl Sampler {
    pub const ALL: [Sampler; 19] = [
        Sampler::EulerA,
        Sampler::Euler,
        Sampler::Lms,
        Sampler::Heun,
        Sampler::Dpm2,
        Sampler::Dpm2A,
        Sampler::DpmPlusPlus2SA,
        Sampler::DpmPlusPlus2M,
        Sampler::DpmPlusPlusSde,
        Sampler::DpmFast,
        Sampler::DpmAdaptive,
        Sampler::LmsKarras,
        Sampler::Dpm2Karras,
        Sampler::Dpm2AKarras,
        Sampler::DpmPlusPlus2SAKarras,
        Sampler::DpmPlusPlus2MKarras,
        Sampler::DpmPlusPlusSdeKarras,
        Sampler::Ddim,
        Sampler::Plms,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sampler::EulerA => "Euler a",
            Sampler::Euler => "Euler",
            Sampler::Lms => "LMS",
            Sampler::Heun => "Heun",
            Sampler::Dpm2 => "DPM2",
            Sampler::Dpm2A => "DPM2 a",
            Sampler::DpmPlusPlus2SA => "DPM++ 2S a",
            Sampler::DpmPlusPlus2M => "DPM++ 2M",
            Sampler::DpmPlusPlusSde => "DPM++ SDE",
            Sampler::DpmFast => "DPM fast",
            Sampler::DpmAdaptive => "DPM adaptive",
            Sampler::LmsKarras => "LMS Karras",
            Sampler::Dpm2Karras => "DPM2 Karras",
            Sampler::Dpm2AKarras => "DPM2 a Karras",
            Sampler::DpmPlusPlus2SAKarras => "DPM++ 2S a Karras",
            Sampler::DpmPlusPlus2MKarras => "DPM++ 2M Karras",
            Sampler::DpmPlusPlusSdeKarras => "DPM++ SDE Karras",
            Sampler::Ddim => "DDIM",
            Sampler::Plms => "PLMS",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(Sampler::as_str).collect()
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Sampler::EulerA
    }
}

impl fmt::Display for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sampler {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sampler::ALL
            .iter()
            .copied()
            .find(|sampler| sampler.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown sampler '{}'", s))
    }
}

impl From<Sampler> for String {
    fn from(sampler: Sampler) -> Self {
        sampler.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_names_round_trip() {
        for sampler in Sampler::ALL {
            assert_eq!(sampler.as_str().parse::<Sampler>(), Ok(sampler));
        }
        assert_eq!("dpm++ 2m karras".parse::<Sampler>(), Ok(Sampler::DpmPlusPlus2MKarras));
        assert!("Restart".parse::<Sampler>().is_err());
        assert_eq!(Sampler::names().len(), 19);
    }

    #[test]
    fn test_model_descriptor_tolerates_missing_fields() {
        let json = r#"[
            {"title": "v1-5-pruned-emaonly.safetensors [6ce0161689]",
             "model_name": "v1-5-pruned-emaonly",
             "hash": "6ce0161689",
             "sha256": null,
             "filename": "/models/Stable-diffusion/v1-5-pruned-emaonly.safetensors",
             "config": null},
            {"title": "dreamshaper_8", "model_name": "dreamshaper_8"}
        ]"#;
        let models: Vec<ModelDescriptor> = serde_json::from_str(json).unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].hash.as_deref(), Some("6ce0161689"));
        assert!(models[0].sha256.is_none());
        assert!(models[1].filename.is_none());
        assert!(models[0].matches("v1-5-pruned-emaonly"));
        assert!(models[0].matches("v1-5-pruned-emaonly.safetensors [6ce0161689]"));
        assert!(!models[1].matches("v1-5-pruned-emaonly"));
    }

    #[test]
    fn test_model_option_shape() {
        let body = serde_json::to_string(&ModelOption {
            sd_model_checkpoint: "dreamshaper_8".into(),
        })
        .unwrap();
        assert_eq!(body, r#"{"sd_model_checkpoint":"dreamshaper_8"}"#);
    }
}
