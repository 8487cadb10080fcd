use super::common::*;
use crate::config::{Endpoint, GenerationDefaults};
use crate::error::{Result, SdError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize};
use std::io::Cursor;

/// Parameters shared by text-to-image and image-to-image requests.
///
/// Field names follow the server's JSON schema so the struct serializes
/// as-is and can also be read back from the `parameters` echo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    #[serde(deserialize_with = "null_as_default")]
    pub prompt: String,
    #[serde(deserialize_with = "null_as_default")]
    pub negative_prompt: String,
    #[serde(deserialize_with = "null_as_default")]
    pub styles: Vec<String>,
    /// -1 lets the server pick.
    pub seed: i64,
    pub subseed: i64,
    pub subseed_strength: f32,
    pub seed_resize_from_h: i32,
    pub seed_resize_from_w: i32,
    #[serde(deserialize_with = "null_as_default")]
    pub sampler_name: String,
    /// Batch size, images per batch.
    pub batch_size: i32,
    /// Batch count, number of batches run back to back.
    pub n_iter: i32,
    pub steps: i32,
    pub cfg_scale: f32,
    pub width: i32,
    pub height: i32,
    pub restore_faces: bool,
    pub tiling: bool,
    pub eta: f32,
    pub s_churn: f32,
    pub s_tmax: f32,
    pub s_tmin: f32,
    pub s_noise: f32,
    pub override_settings_restore_afterwards: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub sampler_index: String,
}

impl Default for GenerationParams {
    fn default() -> Self {
        GenerationParams {
            prompt: String::new(),
            negative_prompt: String::new(),
            styles: Vec::new(),
            seed: -1,
            subseed: -1,
            subseed_strength: 0.0,
            seed_resize_from_h: -1,
            seed_resize_from_w: -1,
            sampler_name: Sampler::EulerA.as_str().to_string(),
            batch_size: 1,
            n_iter: 1,
            steps: DEFAULT_STEPS,
            cfg_scale: DEFAULT_CFG_SCALE,
            width: DEFAULT_SIDE_LENGTH,
            height: DEFAULT_SIDE_LENGTH,
            restore_faces: false,
            tiling: false,
            eta: 0.0,
            s_churn: 0.0,
            s_tmax: 0.0,
            s_tmin: 0.0,
            s_noise: 1.0,
            override_settings_restore_afterwards: true,
            sampler_index: Sampler::Euler.as_str().to_string(),
        }
    }
}

impl GenerationParams {
    pub fn from_defaults(defaults: &GenerationDefaults) -> Self {
        GenerationParams {
            sampler_name: defaults.sampler.clone(),
            steps: defaults.steps,
            cfg_scale: defaults.cfg_scale,
            width: defaults.width,
            height: defaults.height,
            seed: defaults.seed,
            ..Default::default()
        }
    }

    /// Pulls every bounded field back into the range the server accepts.
    pub fn clamp_to_bounds(&mut self) {
        self.width = self.width.clamp(MIN_SIDE_LENGTH, MAX_SIDE_LENGTH);
        self.height = self.height.clamp(MIN_SIDE_LENGTH, MAX_SIDE_LENGTH);
        self.steps = self.steps.clamp(MIN_SAMPLING_STEPS, MAX_SAMPLING_STEPS);
        self.cfg_scale = self.cfg_scale.clamp(MIN_CFG_SCALE, MAX_CFG_SCALE);
        self.batch_size = self.batch_size.clamp(1, MAX_BATCH_SIZE);
        self.n_iter = self.n_iter.clamp(1, MAX_BATCH_COUNT);
        self.subseed_strength = self.subseed_strength.clamp(0.0, 1.0);
    }

    /// Checks what clamping cannot fix.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(SdError::InvalidParameter("prompt must not be empty".into()));
        }
        require_finite("cfg_scale", self.cfg_scale)?;
        require_finite("subseed_strength", self.subseed_strength)?;
        for (name, value) in [
            ("eta", self.eta),
            ("s_churn", self.s_churn),
            ("s_tmax", self.s_tmax),
            ("s_tmin", self.s_tmin),
            ("s_noise", self.s_noise),
        ] {
            require_finite(name, value)?;
        }
        if !(MIN_SIDE_LENGTH..=MAX_SIDE_LENGTH).contains(&self.width)
            || !(MIN_SIDE_LENGTH..=MAX_SIDE_LENGTH).contains(&self.height)
        {
            return Err(SdError::InvalidParameter(format!(
                "size {}x{} outside [{}, {}] after clamping",
                self.width, self.height, MIN_SIDE_LENGTH, MAX_SIDE_LENGTH
            )));
        }
        Ok(())
    }
}

/// Two-pass "highres fix" block of a text-to-image request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighresFix {
    pub enable_hr: bool,
    pub hr_upscaler: String,
    /// Ignored when `hr_resize_x`/`hr_resize_y` are set.
    pub hr_scale: f32,
    pub hr_resize_x: i32,
    pub hr_resize_y: i32,
    /// 0 reuses the first pass step count.
    pub hr_second_pass_steps: i32,
    pub denoising_strength: f32,
    pub firstphase_width: i32,
    pub firstphase_height: i32,
}

impl Default for HighresFix {
    fn default() -> Self {
        HighresFix {
            enable_hr: false,
            hr_upscaler: String::new(),
            hr_scale: 2.0,
            hr_resize_x: 0,
            hr_resize_y: 0,
            hr_second_pass_steps: 0,
            denoising_strength: 0.75,
            firstphase_width: 0,
            firstphase_height: 0,
        }
    }
}

impl HighresFix {
    pub fn upscale(upscaler: impl Into<String>, scale: f32) -> Self {
        HighresFix {
            enable_hr: true,
            hr_upscaler: upscaler.into(),
            hr_scale: scale,
            ..Default::default()
        }
    }

    pub fn with_resize(mut self, width: i32, height: i32) -> Self {
        self.hr_resize_x = width;
        self.hr_resize_y = height;
        self
    }

    pub fn with_second_pass(mut self, steps: i32, denoising_strength: f32) -> Self {
        self.hr_second_pass_steps = steps;
        self.denoising_strength = denoising_strength;
        self
    }

    fn clamp_to_bounds(&mut self) {
        self.hr_scale = self.hr_scale.max(1.0);
        self.hr_resize_x = self.hr_resize_x.clamp(0, MAX_SIDE_LENGTH);
        self.hr_resize_y = self.hr_resize_y.clamp(0, MAX_SIDE_LENGTH);
        self.hr_second_pass_steps = self.hr_second_pass_steps.clamp(0, MAX_SAMPLING_STEPS);
        self.denoising_strength = self.denoising_strength.clamp(0.0, 1.0);
        self.firstphase_width = self.firstphase_width.clamp(0, MAX_SIDE_LENGTH);
        self.firstphase_height = self.firstphase_height.clamp(0, MAX_SIDE_LENGTH);
    }

    fn validate(&self) -> Result<()> {
        require_finite("hr_scale", self.hr_scale)?;
        require_finite("denoising_strength", self.denoising_strength)
    }
}

/// Image-to-image specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Img2ImgParams {
    /// Base64-encoded source images.
    pub init_images: Vec<String>,
    /// 0 resize, 1 crop and resize, 2 resize and fill, 3 latent upscale.
    pub resize_mode: i32,
    pub denoising_strength: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    pub mask_blur: i32,
    pub inpainting_fill: i32,
    pub inpaint_full_res: bool,
    pub inpaint_full_res_padding: i32,
    pub inpainting_mask_invert: i32,
    pub initial_noise_multiplier: f32,
    pub include_init_images: bool,
}

impl Default for Img2ImgParams {
    fn default() -> Self {
        Img2ImgParams {
            init_images: Vec::new(),
            resize_mode: 0,
            denoising_strength: 0.75,
            mask: None,
            mask_blur: 4,
            inpainting_fill: 0,
            inpaint_full_res: true,
            inpaint_full_res_padding: 0,
            inpainting_mask_invert: 0,
            initial_noise_multiplier: 1.0,
            include_init_images: false,
        }
    }
}

impl Img2ImgParams {
    pub fn from_png_bytes(png: &[u8]) -> Self {
        Img2ImgParams {
            init_images: vec![STANDARD.encode(png)],
            ..Default::default()
        }
    }

    /// Encodes `image` as PNG and uses it as the single source image.
    pub fn from_image(image: &image::DynamicImage) -> Result<Self> {
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
        Ok(Self::from_png_bytes(&png))
    }

    pub fn with_denoising_strength(mut self, strength: f32) -> Self {
        self.denoising_strength = strength;
        self
    }

    pub fn with_mask_png(mut self, png: &[u8], blur: i32) -> Self {
        self.mask = Some(STANDARD.encode(png));
        self.mask_blur = blur;
        self
    }

    fn clamp_to_bounds(&mut self) {
        self.resize_mode = self.resize_mode.clamp(0, 3);
        self.denoising_strength = self.denoising_strength.clamp(0.0, 1.0);
        self.mask_blur = self.mask_blur.max(0);
        self.inpaint_full_res_padding = self.inpaint_full_res_padding.max(0);
        self.inpainting_mask_invert = self.inpainting_mask_invert.clamp(0, 1);
        self.initial_noise_multiplier = self.initial_noise_multiplier.max(0.0);
    }

    fn validate(&self) -> Result<()> {
        if self.init_images.is_empty() || self.init_images.iter().any(|img| img.is_empty()) {
            return Err(SdError::InvalidParameter(
                "img2img requires at least one non-empty source image".into(),
            ));
        }
        if matches!(self.mask.as_deref(), Some("")) {
            return Err(SdError::InvalidParameter("mask is set but empty".into()));
        }
        require_finite("denoising_strength", self.denoising_strength)?;
        require_finite("initial_noise_multiplier", self.initial_noise_multiplier)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationMode {
    Txt2Img { highres: Option<HighresFix> },
    Img2Img(Img2ImgParams),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub params: GenerationParams,
    pub mode: GenerationMode,
}

#[derive(Serialize)]
struct Txt2ImgPayload<'a> {
    #[serde(flatten)]
    params: &'a GenerationParams,
    #[serde(flatten)]
    highres: &'a HighresFix,
}

#[derive(Serialize)]
struct Img2ImgPayload<'a> {
    #[serde(flatten)]
    params: &'a GenerationParams,
    #[serde(flatten)]
    img2img: &'a Img2ImgParams,
}

impl GenerationRequest {
    pub fn txt2img(prompt: impl Into<String>) -> Self {
        GenerationRequest {
            params: GenerationParams {
                prompt: prompt.into(),
                ..Default::default()
            },
            mode: GenerationMode::Txt2Img { highres: None },
        }
    }

    pub fn img2img(prompt: impl Into<String>, source: Img2ImgParams) -> Self {
        GenerationRequest {
            params: GenerationParams {
                prompt: prompt.into(),
                ..Default::default()
            },
            mode: GenerationMode::Img2Img(source),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        let prompt = std::mem::take(&mut self.params.prompt);
        self.params = params;
        if self.params.prompt.is_empty() {
            self.params.prompt = prompt;
        }
        self
    }

    pub fn with_negative_prompt(mut self, negative: impl Into<String>) -> Self {
        self.params.negative_prompt = negative.into();
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.params.seed = seed;
        self
    }

    pub fn with_steps(mut self, steps: i32) -> Self {
        self.params.steps = steps;
        self
    }

    pub fn with_cfg_scale(mut self, cfg_scale: f32) -> Self {
        self.params.cfg_scale = cfg_scale;
        self
    }

    pub fn with_size(mut self, width: i32, height: i32) -> Self {
        self.params.width = width;
        self.params.height = height;
        self
    }

    pub fn with_sampler(mut self, sampler: impl Into<String>) -> Self {
        self.params.sampler_name = sampler.into();
        self
    }

    pub fn with_batch(mut self, batch_size: i32, batch_count: i32) -> Self {
        self.params.batch_size = batch_size;
        self.params.n_iter = batch_count;
        self
    }

    pub fn with_tiling(mut self, tiling: bool) -> Self {
        self.params.tiling = tiling;
        self
    }

    /// Only meaningful for text-to-image; ignored with a warning otherwise.
    pub fn with_highres(mut self, highres: HighresFix) -> Self {
        match &mut self.mode {
            GenerationMode::Txt2Img { highres: slot } => *slot = Some(highres),
            GenerationMode::Img2Img(_) => {
                log::warn!("Highres fix is not supported for img2img requests, ignoring it")
            }
        }
        self
    }

    pub fn endpoint(&self) -> Endpoint {
        match self.mode {
            GenerationMode::Txt2Img { .. } => Endpoint::TextToImage,
            GenerationMode::Img2Img(_) => Endpoint::ImageToImage,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.mode {
            GenerationMode::Txt2Img { .. } => "txt2img",
            GenerationMode::Img2Img(_) => "img2img",
        }
    }

    /// Clamps every bounded field, then rejects what has no safe default.
    pub fn prepare(&mut self) -> Result<()> {
        self.params.clamp_to_bounds();
        match &mut self.mode {
            GenerationMode::Txt2Img { highres } => {
                if let Some(hr) = highres {
                    hr.clamp_to_bounds();
                    hr.validate()?;
                }
            }
            GenerationMode::Img2Img(img2img) => {
                img2img.clamp_to_bounds();
                img2img.validate()?;
            }
        }
        self.params.validate()
    }

    /// Serializes the request body for its endpoint.
    pub fn to_json(&self) -> Result<String> {
        let body = match &self.mode {
            GenerationMode::Txt2Img { highres } => {
                let disabled = HighresFix::default();
                serde_json::to_string(&Txt2ImgPayload {
                    params: &self.params,
                    highres: highres.as_ref().unwrap_or(&disabled),
                })?
            }
            GenerationMode::Img2Img(img2img) => serde_json::to_string(&Img2ImgPayload {
                params: &self.params,
                img2img,
            })?,
        };
        Ok(body)
    }
}

fn require_finite(name: &str, value: f32) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SdError::InvalidParameter(format!(
            "{} must be a finite number, got {}",
            name, value
        )))
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
