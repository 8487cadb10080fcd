use super::request::GenerationParams;
use crate::error::{Result, SdError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Response body as sent by txt2img and img2img.
#[derive(Debug, Clone, Deserialize)]
pub struct RawGenerationResponse {
    #[serde(default)]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub parameters: Option<Value>,
    /// The server sends a JSON document encoded as a string; some proxies
    /// forward it already parsed.
    #[serde(default)]
    pub info: Option<Value>,
}

/// Generation info block, carrying the seed that was actually used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationInfo {
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub all_seeds: Vec<i64>,
    #[serde(default)]
    pub subseed: Option<i64>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub sampler_name: Option<String>,
    #[serde(default)]
    pub steps: Option<i32>,
    #[serde(default)]
    pub cfg_scale: Option<f32>,
    #[serde(default)]
    pub width: Option<i32>,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GenerationInfo {
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(GenerationInfo::default()),
            Value::String(text) if text.trim().is_empty() => Ok(GenerationInfo::default()),
            Value::String(text) => serde_json::from_str(text)
                .map_err(|e| SdError::MalformedResponse(format!("info is not valid JSON: {}", e))),
            Value::Object(_) => serde_json::from_value(value.clone())
                .map_err(|e| SdError::MalformedResponse(format!("unexpected info shape: {}", e))),
            other => Err(SdError::MalformedResponse(format!(
                "info must be an object or a JSON string, got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    /// Decoded image files, PNG as produced by the server. Never empty.
    images: Vec<Vec<u8>>,
    /// Echoed parameters, `seed` rewritten to the seed actually used.
    pub parameters: GenerationParams,
    pub info: GenerationInfo,
    seed: i64,
}

impl GenerationResponse {
    /// Decodes a raw response. `submitted` backs fields the echo omits.
    pub fn from_raw(raw: RawGenerationResponse, submitted: &GenerationParams) -> Result<Self> {
        let encoded = raw.images.unwrap_or_default();
        if encoded.is_empty() {
            return Err(SdError::EmptyResult);
        }

        let images = encoded
            .iter()
            .enumerate()
            .map(|(i, data)| {
                decode_base64_image(data).map_err(|e| {
                    SdError::MalformedResponse(format!("image {} is not valid base64: {}", i, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let info = match &raw.info {
            Some(value) => GenerationInfo::from_value(value)?,
            None => GenerationInfo::default(),
        };

        let mut parameters = match raw.parameters {
            Some(value) if !value.is_null() => match serde_json::from_value(value) {
                Ok(params) => params,
                Err(e) => {
                    log::warn!("Could not read echoed parameters, keeping submitted ones: {}", e);
                    submitted.clone()
                }
            },
            _ => submitted.clone(),
        };

        let seed = info
            .seed
            .or_else(|| info.all_seeds.first().copied())
            .filter(|seed| *seed >= 0)
            .or_else(|| Some(parameters.seed).filter(|seed| *seed >= 0))
            .ok_or_else(|| {
                SdError::MalformedResponse("response does not report the seed used".into())
            })?;
        parameters.seed = seed;

        Ok(GenerationResponse {
            images,
            parameters,
            info,
            seed,
        })
    }

    /// Seed the server used; reuse it to reproduce this result.
    pub fn seed(&self) -> i64 {
        self.seed
    }

    pub fn images(&self) -> &[Vec<u8>] {
        &self.images
    }

    pub fn into_images(self) -> Vec<Vec<u8>> {
        self.images
    }

    pub fn first_image(&self) -> &[u8] {
        self.images.first().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn decode_first(&self) -> Result<image::DynamicImage> {
        Ok(image::load_from_memory(self.first_image())?)
    }
}

/// Decodes a base64 image, accepting an optional `data:...;base64,` prefix.
pub fn decode_base64_image(data: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let payload = match data.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, b64)| b64).unwrap_or(rest),
        None => data,
    };
    STANDARD.decode(payload.trim())
}
