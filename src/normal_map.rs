use crate::error::{Result, SdError};
use image::{DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

pub const DEFAULT_NORMAL_STRENGTH: f32 = 0.5;

const LUMA_WEIGHT: f32 = 0.3333;

/// How the 3x3 window reads texels that fall outside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeMode {
    /// Out-of-range reads take the nearest edge texel.
    Clamp,
    /// Reads repeat from the opposite edge, as a repeating texture samples.
    #[default]
    Wrap,
}

impl EdgeMode {
    /// Maps a possibly out-of-range coordinate onto `0..len`. `len` must be non-zero.
    pub fn resolve(&self, coord: i64, len: u32) -> u32 {
        let len = i64::from(len);
        let resolved = match self {
            EdgeMode::Clamp => coord.clamp(0, len - 1),
            EdgeMode::Wrap => coord.rem_euclid(len),
        };
        resolved as u32
    }
}

/// Derives a tangent-space normal map from a color texture, treating its
/// luminance as a height field.
///
/// Images are stored top row first, but the vertical gradient is taken along
/// the texture's up axis (Y+ normal maps, green brighter where the surface
/// faces up).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalMapSynthesizer {
    pub strength: f32,
    pub edge_mode: EdgeMode,
}

impl Default for NormalMapSynthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_NORMAL_STRENGTH)
    }
}

impl NormalMapSynthesizer {
    pub fn new(strength: f32) -> Self {
        Self {
            strength,
            edge_mode: EdgeMode::default(),
        }
    }

    pub fn with_edge_mode(mut self, edge_mode: EdgeMode) -> Self {
        self.edge_mode = edge_mode;
        self
    }

    pub fn synthesize(&self, source: &RgbaImage) -> Result<RgbaImage> {
        if !self.strength.is_finite() {
            return Err(SdError::InvalidParameter(format!(
                "normal map strength must be a finite number, got {}",
                self.strength
            )));
        }

        let (width, height) = source.dimensions();
        let mut output = RgbaImage::new(width, height);
        if width == 0 || height == 0 {
            return Ok(output);
        }

        let heights: Vec<f32> = source.pixels().map(luminance).collect();
        // `dy` points up the texture, i.e. towards lower buffer rows
        let sample = |x: u32, y: u32, dx: i64, dy: i64| -> f32 {
            let sx = self.edge_mode.resolve(i64::from(x) + dx, width);
            let sy = self.edge_mode.resolve(i64::from(y) - dy, height);
            heights[(sy as usize) * (width as usize) + sx as usize]
        };

        for (x, y, pixel) in output.enumerate_pixels_mut() {
            let neg_x_neg_y = sample(x, y, -1, -1);
            let zer_x_neg_y = sample(x, y, 0, -1);
            let pos_x_neg_y = sample(x, y, 1, -1);
            let neg_x_zer_y = sample(x, y, -1, 0);
            let pos_x_zer_y = sample(x, y, 1, 0);
            let neg_x_pos_y = sample(x, y, -1, 1);
            let zer_x_pos_y = sample(x, y, 0, 1);
            let pos_x_pos_y = sample(x, y, 1, 1);

            let edge_x = (neg_x_neg_y - pos_x_neg_y) * 0.25
                + (neg_x_zer_y - pos_x_zer_y) * 0.5
                + (neg_x_pos_y - pos_x_pos_y) * 0.25;
            let edge_y = (neg_x_neg_y - neg_x_pos_y) * 0.25
                + (zer_x_neg_y - zer_x_pos_y) * 0.5
                + (pos_x_neg_y - pos_x_pos_y) * 0.25;

            *pixel = encode_normal(edge_x * self.strength, edge_y * self.strength);
        }

        Ok(output)
    }

    /// Convenience over [`NormalMapSynthesizer::synthesize`] for decoded images of any color type.
    pub fn synthesize_image(&self, source: &DynamicImage) -> Result<RgbaImage> {
        self.synthesize(&source.to_rgba8())
    }
}

/// Height proxy: red plus green counted twice, blue ignored.
fn luminance(pixel: &Rgba<u8>) -> f32 {
    let r = f32::from(pixel[0]) / 255.0;
    let g = f32::from(pixel[1]) / 255.0;
    r * LUMA_WEIGHT + g * LUMA_WEIGHT + g * LUMA_WEIGHT
}

fn encode_normal(edge_x: f32, edge_y: f32) -> Rgba<u8> {
    let length = (edge_x * edge_x + edge_y * edge_y + 1.0).sqrt();
    let (nx, ny, nz) = (edge_x / length, edge_y / length, 1.0 / length);
    Rgba([to_channel(nx), to_channel(ny), to_channel(nz), 255])
}

/// Remaps a unit-vector component from [-1, 1] to an 8-bit channel.
fn to_channel(component: f32) -> u8 {
    ((component * 0.5 + 0.5) * 255.0).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLAT_NORMAL: Rgba<u8> = Rgba([128, 128, 255, 255]);

    /// 4x4 texture with independent gradients in red and green.
    fn fixture() -> RgbaImage {
        RgbaImage::from_fn(4, 4, |x, y| {
            Rgba([
                ((x * 60 + y * 13) % 256) as u8,
                ((x * 17 + y * 70) % 256) as u8,
                200,
                255,
            ])
        })
    }

    fn rgb_rows(image: &RgbaImage) -> Vec<Vec<[u8; 3]>> {
        (0..image.height())
            .map(|y| {
                (0..image.width())
                    .map(|x| {
                        let p = image.get_pixel(x, y);
                        [p[0], p[1], p[2]]
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_flat_input_is_straight_up_everywhere() {
        let flat = RgbaImage::from_pixel(5, 3, Rgba([90, 170, 30, 255]));
        for mode in [EdgeMode::Clamp, EdgeMode::Wrap] {
            let normal = NormalMapSynthesizer::default()
                .with_edge_mode(mode)
                .synthesize(&flat)
                .unwrap();
            assert!(normal.pixels().all(|p| *p == FLAT_NORMAL), "{:?}", mode);
        }
    }

    #[test]
    fn test_golden_fixture_clamp() {
        let normal = NormalMapSynthesizer::new(0.5)
            .with_edge_mode(EdgeMode::Clamp)
            .synthesize(&fixture())
            .unwrap();
        let expected = vec![
            vec![[120, 140, 254], [112, 140, 253], [112, 140, 253], [120, 140, 254]],
            vec![[120, 152, 252], [112, 152, 252], [112, 152, 252], [120, 152, 252]],
            vec![[120, 152, 252], [112, 152, 252], [123, 142, 254], [130, 121, 255]],
            vec![[120, 140, 254], [112, 140, 253], [144, 130, 254], [151, 109, 251]],
        ];
        assert_eq!(rgb_rows(&normal), expected);
        assert!(normal.pixels().all(|p| p[3] == 255));
    }

    #[test]
    fn test_golden_fixture_wrap() {
        let normal = NormalMapSynthesizer::new(0.5)
            .with_edge_mode(EdgeMode::Wrap)
            .synthesize(&fixture())
            .unwrap();
        let expected = vec![
            vec![[132, 113, 254], [112, 103, 252], [123, 113, 254], [143, 123, 254]],
            vec![[143, 152, 252], [112, 152, 252], [112, 152, 252], [143, 152, 252]],
            vec![[132, 142, 254], [112, 152, 252], [123, 142, 254], [143, 132, 254]],
            vec![[122, 103, 252], [112, 103, 252], [133, 103, 252], [143, 103, 252]],
        ];
        assert_eq!(rgb_rows(&normal), expected);
    }

    #[test]
    fn test_default_reads_edges_like_a_repeating_texture() {
        assert_eq!(EdgeMode::default(), EdgeMode::Wrap);

        let ramp = RgbaImage::from_fn(4, 4, |x, _| Rgba([(x * 60) as u8, (x * 60) as u8, 0, 255]));
        let default = NormalMapSynthesizer::default().synthesize(&ramp).unwrap();
        let wrapped = NormalMapSynthesizer::default()
            .with_edge_mode(EdgeMode::Wrap)
            .synthesize(&ramp)
            .unwrap();
        let clamped = NormalMapSynthesizer::default()
            .with_edge_mode(EdgeMode::Clamp)
            .synthesize(&ramp)
            .unwrap();
        assert_eq!(default, wrapped);
        assert_ne!(default.get_pixel(0, 0), clamped.get_pixel(0, 0));
    }

    #[test]
    fn test_green_follows_the_up_axis() {
        // rows listed top to bottom: bright at the top, dark at the bottom
        let rows = [200u8, 100, 0];
        let slope = RgbaImage::from_fn(3, 3, |_, y| {
            let v = rows[y as usize];
            Rgba([v, v, 0, 255])
        });
        let normal = NormalMapSynthesizer::new(1.0)
            .with_edge_mode(EdgeMode::Clamp)
            .synthesize(&slope)
            .unwrap();
        assert_eq!(*normal.get_pixel(1, 1), Rgba([128, 49, 228, 255]));
        assert!(normal.get_pixel(1, 1)[1] < 128);
    }

    #[test]
    fn test_wrap_commutes_with_cyclic_shift() {
        let source = fixture();
        let shifted = RgbaImage::from_fn(4, 4, |x, y| *source.get_pixel((x + 1) % 4, (y + 3) % 4));
        let synth = NormalMapSynthesizer::new(2.0).with_edge_mode(EdgeMode::Wrap);

        let normal = synth.synthesize(&source).unwrap();
        let normal_shifted = synth.synthesize(&shifted).unwrap();
        for (x, y, pixel) in normal_shifted.enumerate_pixels() {
            assert_eq!(pixel, normal.get_pixel((x + 1) % 4, (y + 3) % 4));
        }
    }

    #[test]
    fn test_edge_resolution() {
        assert_eq!(EdgeMode::Clamp.resolve(-1, 4), 0);
        assert_eq!(EdgeMode::Clamp.resolve(4, 4), 3);
        assert_eq!(EdgeMode::Clamp.resolve(2, 4), 2);
        assert_eq!(EdgeMode::Wrap.resolve(-1, 4), 3);
        assert_eq!(EdgeMode::Wrap.resolve(4, 4), 0);
        assert_eq!(EdgeMode::Clamp.resolve(-1, 1), 0);
        assert_eq!(EdgeMode::Wrap.resolve(1, 1), 0);
    }

    #[test]
    fn test_zero_strength_is_flat() {
        let normal = NormalMapSynthesizer::new(0.0).synthesize(&fixture()).unwrap();
        assert!(normal.pixels().all(|p| *p == FLAT_NORMAL));
    }

    #[test]
    fn test_blue_is_ignored() {
        let a = RgbaImage::from_fn(3, 3, |x, _| Rgba([(x * 100) as u8, 40, 0, 255]));
        let b = RgbaImage::from_fn(3, 3, |x, y| Rgba([(x * 100) as u8, 40, (x * 30 + y * 80) as u8, 7]));
        let synth = NormalMapSynthesizer::default();
        assert_eq!(synth.synthesize(&a).unwrap(), synth.synthesize(&b).unwrap());
    }

    #[test]
    fn test_brighter_right_tilts_normal_left() {
        let ramp = RgbaImage::from_fn(3, 3, |x, _| Rgba([(x * 120) as u8, (x * 120) as u8, 0, 255]));
        let normal = NormalMapSynthesizer::new(1.0).synthesize(&ramp).unwrap();
        let center = normal.get_pixel(1, 1);
        assert!(center[0] < 128);
        assert_eq!(center[1], 128);
    }

    #[test]
    fn test_rejects_non_finite_strength() {
        for strength in [f32::NAN, f32::INFINITY] {
            let result = NormalMapSynthesizer::new(strength).synthesize(&fixture());
            assert!(matches!(result, Err(SdError::InvalidParameter(_))));
        }
    }

    #[test]
    fn test_empty_image() {
        let normal = NormalMapSynthesizer::default()
            .synthesize(&RgbaImage::new(0, 0))
            .unwrap();
        assert_eq!(normal.dimensions(), (0, 0));
    }
}
