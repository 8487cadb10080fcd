use crate::client::SdClient;
use crate::error::Result;
use crate::models::GenerationRequest;
use crate::normal_map::{EdgeMode, NormalMapSynthesizer, DEFAULT_NORMAL_STRENGTH};
use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Surface settings handed to whatever renders the generated texture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialSettings {
    pub tiling_x: u32,
    pub tiling_y: u32,
    pub metallic: f32,
    pub smoothness: f32,
    pub generate_normal_map: bool,
    /// Bump scale for the renderer. Synthesis itself always runs at 0.5.
    pub normal_map_strength: f32,
    /// Edge reads of the normal-map filter; repeating by default, like the texture itself.
    pub edge_mode: EdgeMode,
}

impl Default for MaterialSettings {
    fn default() -> Self {
        MaterialSettings {
            tiling_x: 1,
            tiling_y: 1,
            metallic: 0.1,
            smoothness: 0.5,
            generate_normal_map: true,
            normal_map_strength: DEFAULT_NORMAL_STRENGTH,
            edge_mode: EdgeMode::default(),
        }
    }
}

/// Which parts of the settings differ between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SettingsChange {
    pub normal_map_strength: bool,
    pub surface: bool,
}

impl SettingsChange {
    pub fn any(&self) -> bool {
        self.normal_map_strength || self.surface
    }
}

impl MaterialSettings {
    pub fn with_tiling(mut self, x: u32, y: u32) -> Self {
        self.tiling_x = x;
        self.tiling_y = y;
        self
    }

    pub fn with_surface(mut self, metallic: f32, smoothness: f32) -> Self {
        self.metallic = metallic;
        self.smoothness = smoothness;
        self
    }

    pub fn with_normal_map(mut self, enabled: bool, strength: f32) -> Self {
        self.generate_normal_map = enabled;
        self.normal_map_strength = strength;
        self
    }

    pub fn with_edge_mode(mut self, edge_mode: EdgeMode) -> Self {
        self.edge_mode = edge_mode;
        self
    }

    /// Copy with every field pulled into its accepted range. NaN falls back to the default.
    pub fn clamped(&self) -> Self {
        let defaults = MaterialSettings::default();
        MaterialSettings {
            tiling_x: self.tiling_x.clamp(1, 100),
            tiling_y: self.tiling_y.clamp(1, 100),
            metallic: clamp_or(self.metallic, 0.0, 1.0, defaults.metallic),
            smoothness: clamp_or(self.smoothness, 0.0, 1.0, defaults.smoothness),
            generate_normal_map: self.generate_normal_map,
            normal_map_strength: clamp_or(
                self.normal_map_strength,
                0.0,
                10.0,
                defaults.normal_map_strength,
            ),
            edge_mode: self.edge_mode,
        }
    }

    pub fn changes_from(&self, previous: &MaterialSettings) -> SettingsChange {
        SettingsChange {
            normal_map_strength: self.normal_map_strength != previous.normal_map_strength,
            surface: self.tiling_x != previous.tiling_x
                || self.tiling_y != previous.tiling_y
                || self.metallic != previous.metallic
                || self.smoothness != previous.smoothness,
        }
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedMaterial {
    pub albedo: RgbaImage,
    /// PNG bytes exactly as returned by the server.
    pub albedo_png: Vec<u8>,
    pub normal: Option<RgbaImage>,
    pub normal_png: Option<Vec<u8>>,
    pub settings: MaterialSettings,
    pub seed: i64,
}

impl GeneratedMaterial {
    pub fn from_albedo(
        albedo: RgbaImage,
        albedo_png: Vec<u8>,
        settings: &MaterialSettings,
        seed: i64,
    ) -> Result<Self> {
        let mut material = GeneratedMaterial {
            albedo,
            albedo_png,
            normal: None,
            normal_png: None,
            settings: settings.clamped(),
            seed,
        };
        material.refresh_normal_map()?;
        Ok(material)
    }

    /// Replaces the settings, creating or dropping the normal map to match.
    pub fn apply_settings(&mut self, settings: &MaterialSettings) -> Result<SettingsChange> {
        let settings = settings.clamped();
        let change = settings.changes_from(&self.settings);
        if settings.edge_mode != self.settings.edge_mode {
            self.normal = None;
            self.normal_png = None;
        }
        self.settings = settings;
        self.refresh_normal_map()?;
        Ok(change)
    }

    fn refresh_normal_map(&mut self) -> Result<()> {
        if !self.settings.generate_normal_map {
            self.normal = None;
            self.normal_png = None;
            return Ok(());
        }
        if self.normal.is_some() {
            return Ok(());
        }

        let normal = NormalMapSynthesizer::new(DEFAULT_NORMAL_STRENGTH)
            .with_edge_mode(self.settings.edge_mode)
            .synthesize(&self.albedo)?;
        self.normal_png = Some(encode_png(&normal)?);
        self.normal = Some(normal);
        Ok(())
    }
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

impl SdClient {
    /// Generates a texture and turns the first image into a material.
    pub async fn generate_material(
        &self,
        model: Option<&str>,
        request: GenerationRequest,
        settings: &MaterialSettings,
    ) -> Result<GeneratedMaterial> {
        let response = self.generate_with_progress(model, request).await?;
        let albedo = response.decode_first()?.to_rgba8();
        log::info!(
            "Building material from {}x{} texture (normal map: {})",
            albedo.width(),
            albedo.height(),
            settings.generate_normal_map
        );

        GeneratedMaterial::from_albedo(
            albedo,
            response.first_image().to_vec(),
            settings,
            response.seed(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::transport::mock::{ok, MockTransport};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use image::Rgba;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn texture() -> RgbaImage {
        RgbaImage::from_fn(8, 8, |x, y| Rgba([(x * 30) as u8, (y * 30) as u8, 90, 255]))
    }

    fn client_returning(texture: &RgbaImage) -> SdClient {
        let png = STANDARD.encode(encode_png(texture).unwrap());
        let transport = MockTransport::new(move |request| {
            if request.url.ends_with("/sdapi/v1/progress") {
                return ok(r#"{"progress": 0.0}"#);
            }
            ok(json!({"images": [png], "parameters": {}, "info": {"seed": 4242}}).to_string())
        });
        let config = ServerConfig::new().with_poll_interval(Duration::from_millis(5));
        SdClient::with_transport(config, Arc::new(transport)).unwrap()
    }

    #[test]
    fn test_defaults_match_surface_presets() {
        let settings = MaterialSettings::default();
        assert_eq!((settings.tiling_x, settings.tiling_y), (1, 1));
        assert_eq!(settings.metallic, 0.1);
        assert_eq!(settings.smoothness, 0.5);
        assert!(settings.generate_normal_map);
        assert_eq!(settings.normal_map_strength, 0.5);
    }

    #[test]
    fn test_clamped() {
        let settings = MaterialSettings::default()
            .with_tiling(0, 500)
            .with_surface(-1.0, f32::NAN)
            .with_normal_map(true, 42.0)
            .clamped();
        assert_eq!((settings.tiling_x, settings.tiling_y), (1, 100));
        assert_eq!(settings.metallic, 0.0);
        assert_eq!(settings.smoothness, 0.5);
        assert_eq!(settings.normal_map_strength, 10.0);
    }

    #[test]
    fn test_changes_from() {
        let base = MaterialSettings::default();
        assert!(!base.changes_from(&base).any());

        let stronger = base.clone().with_normal_map(true, 2.0);
        assert_eq!(
            stronger.changes_from(&base),
            SettingsChange {
                normal_map_strength: true,
                surface: false
            }
        );
        let tiled = base.clone().with_tiling(4, 4);
        assert_eq!(
            tiled.changes_from(&base),
            SettingsChange {
                normal_map_strength: false,
                surface: true
            }
        );
    }

    #[test]
    fn test_normal_map_follows_setting() {
        let albedo = texture();
        let mut material =
            GeneratedMaterial::from_albedo(albedo.clone(), Vec::new(), &MaterialSettings::default(), 1)
                .unwrap();
        let expected = NormalMapSynthesizer::new(0.5).synthesize(&albedo).unwrap();
        assert_eq!(material.normal.as_ref(), Some(&expected));
        let decoded = image::load_from_memory(material.normal_png.as_ref().unwrap()).unwrap();
        assert_eq!(decoded.to_rgba8(), expected);

        material
            .apply_settings(&MaterialSettings::default().with_normal_map(false, 0.5))
            .unwrap();
        assert!(material.normal.is_none());
        assert!(material.normal_png.is_none());

        // bump scale never changes the synthesized texels
        material
            .apply_settings(&MaterialSettings::default().with_normal_map(true, 8.0))
            .unwrap();
        assert_eq!(material.normal.as_ref(), Some(&expected));
    }

    #[tokio::test]
    async fn test_generate_material() {
        let albedo = texture();
        let client = client_returning(&albedo);

        let material = client
            .generate_material(
                None,
                GenerationRequest::txt2img("cobblestone").with_tiling(true),
                &MaterialSettings::default().with_tiling(2, 3),
            )
            .await
            .unwrap();

        assert_eq!(material.seed, 4242);
        assert_eq!(material.albedo, albedo);
        assert_eq!(material.settings.tiling_y, 3);
        assert!(material.normal.is_some());
        assert_eq!(
            image::load_from_memory(&material.albedo_png).unwrap().to_rgba8(),
            albedo
        );
    }

    #[tokio::test]
    async fn test_generated_normal_map_edges_and_corners() {
        let albedo = texture();
        let client = client_returning(&albedo);

        let material = client
            .generate_material(None, GenerationRequest::txt2img("tiles"), &MaterialSettings::default())
            .await
            .unwrap();
        let normal = material.normal.unwrap();

        let wrapped = NormalMapSynthesizer::new(0.5)
            .with_edge_mode(EdgeMode::Wrap)
            .synthesize(&albedo)
            .unwrap();
        assert_eq!(normal, wrapped);

        for (x, y, rgb) in [
            (0, 0, [142, 98, 251]),
            (7, 0, [142, 98, 251]),
            (0, 7, [142, 98, 251]),
            (7, 7, [142, 98, 251]),
            (3, 0, [123, 98, 252]),
            (0, 4, [142, 137, 254]),
            (3, 4, [123, 137, 255]),
        ] {
            let [r, g, b] = rgb;
            assert_eq!(*normal.get_pixel(x, y), Rgba([r, g, b, 255]), "texel ({}, {})", x, y);
        }
    }

    #[test]
    fn test_edge_mode_setting_rebuilds_normal_map() {
        let mut material =
            GeneratedMaterial::from_albedo(texture(), Vec::new(), &MaterialSettings::default(), 1)
                .unwrap();
        assert_eq!(material.normal.as_ref().unwrap().get_pixel(0, 0), &Rgba([142, 98, 251, 255]));

        material
            .apply_settings(&MaterialSettings::default().with_edge_mode(EdgeMode::Clamp))
            .unwrap();
        assert_eq!(material.normal.as_ref().unwrap().get_pixel(0, 0), &Rgba([125, 132, 255, 255]));
        assert_eq!(material.settings.edge_mode, EdgeMode::Clamp);
    }

    #[tokio::test]
    async fn test_generate_material_without_normal_map() {
        let client = client_returning(&texture());
        let settings = MaterialSettings::default().with_normal_map(false, 0.5);

        let material = client
            .generate_material(None, GenerationRequest::txt2img("sand"), &settings)
            .await
            .unwrap();
        assert!(material.normal.is_none());
        assert!(material.normal_png.is_none());
    }
}
