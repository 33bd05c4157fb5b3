//! Source textures and the working pixel representation.
//!
//! Sources are decoded with the `image` crate (PNG, TGA, JPG) into a
//! float RGBA buffer. All filtering happens in f32 to avoid quantization
//! drift across mip levels; bytes only appear again at serialization time.

use crate::error::ConvertError;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Semantic role of a texture. Filtering behavior is keyed off this tag
/// explicitly - the generator never infers intent from a filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureType {
    Albedo,
    Normal,
    Gloss,
    Roughness,
    Metallic,
    AmbientOcclusion,
    Height,
    Emissive,
    Generic,
}

impl TextureType {
    /// Common filename suffixes for this type (lowercase, without extension).
    pub fn suffixes(&self) -> &'static [&'static str] {
        match self {
            TextureType::Albedo => &["albedo", "basecolor", "diffuse", "color", "col"],
            TextureType::Normal => &["normal", "norm", "nrm", "n"],
            TextureType::Gloss => &["gloss", "glossiness", "smoothness"],
            TextureType::Roughness => &["roughness", "rough", "rgh"],
            TextureType::Metallic => &["metallic", "metal", "met"],
            TextureType::AmbientOcclusion => &["ao", "occlusion", "ambientocclusion"],
            TextureType::Height => &["height", "displacement", "disp", "bump"],
            TextureType::Emissive => &["emissive", "emission", "glow"],
            TextureType::Generic => &[],
        }
    }

    /// Whether this type carries perceptual color data (gamma-encoded)
    /// rather than raw data channels.
    pub fn is_color(&self) -> bool {
        matches!(self, TextureType::Albedo | TextureType::Emissive)
    }

    /// Whether Toksvig correction is applicable to this type.
    pub fn is_specular(&self) -> bool {
        matches!(self, TextureType::Gloss | TextureType::Roughness)
    }
}

/// RGBA pixel buffer in f32, values nominally 0.0..=1.0, row-major.
///
/// This is the working representation for the whole filter pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<[f32; 4]>,
}

impl PixelBuffer {
    /// Create a buffer filled with the given texel.
    pub fn filled(width: u32, height: u32, texel: [f32; 4]) -> Self {
        PixelBuffer {
            width,
            height,
            data: vec![texel; (width * height) as usize],
        }
    }

    /// Build from a raw texel vector. Length must be `width * height`.
    pub(crate) fn from_raw(width: u32, height: u32, data: Vec<[f32; 4]>) -> Self {
        debug_assert_eq!(data.len(), (width * height) as usize);
        PixelBuffer {
            width,
            height,
            data,
        }
    }

    /// Convert from an 8-bit RGBA image.
    pub fn from_rgba8(image: &RgbaImage) -> Self {
        let data = image
            .pixels()
            .map(|p| {
                [
                    p[0] as f32 / 255.0,
                    p[1] as f32 / 255.0,
                    p[2] as f32 / 255.0,
                    p[3] as f32 / 255.0,
                ]
            })
            .collect();
        PixelBuffer {
            width: image.width(),
            height: image.height(),
            data,
        }
    }

    /// Quantize back to 8-bit RGBA for serialization.
    pub fn to_rgba8(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        for (i, p) in out.pixels_mut().enumerate() {
            let t = self.data[i];
            *p = image::Rgba([
                quantize(t[0]),
                quantize(t[1]),
                quantize(t[2]),
                quantize(t[3]),
            ]);
        }
        out
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Texel at (x, y). Coordinates are clamped to the edge.
    pub fn get(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        self.data[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, texel: [f32; 4]) {
        self.data[(y * self.width + x) as usize] = texel;
    }

    pub fn texels(&self) -> &[[f32; 4]] {
        &self.data
    }

    pub fn texels_mut(&mut self) -> &mut [[f32; 4]] {
        &mut self.data
    }

    /// Apply a function to every texel in place.
    pub fn map_in_place<F: Fn([f32; 4]) -> [f32; 4] + Sync>(&mut self, f: F) {
        use rayon::prelude::*;
        self.data.par_iter_mut().for_each(|t| *t = f(*t));
    }

    /// Bilinear resample to a new resolution. Used when packed channel
    /// sources disagree on per-level resolution, and to align a mismatched
    /// normal map before variance computation.
    pub fn resized_bilinear(&self, width: u32, height: u32) -> PixelBuffer {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut out = PixelBuffer::filled(width, height, [0.0; 4]);
        let sx = self.width as f32 / width as f32;
        let sy = self.height as f32 / height as f32;
        for y in 0..height {
            for x in 0..width {
                // Sample at the destination texel center.
                let fx = (x as f32 + 0.5) * sx - 0.5;
                let fy = (y as f32 + 0.5) * sy - 0.5;
                let x0 = fx.floor() as i64;
                let y0 = fy.floor() as i64;
                let tx = fx - x0 as f32;
                let ty = fy - y0 as f32;

                let p00 = self.get(x0, y0);
                let p10 = self.get(x0 + 1, y0);
                let p01 = self.get(x0, y0 + 1);
                let p11 = self.get(x0 + 1, y0 + 1);

                let mut texel = [0.0f32; 4];
                for c in 0..4 {
                    let top = p00[c] * (1.0 - tx) + p10[c] * tx;
                    let bottom = p01[c] * (1.0 - tx) + p11[c] * tx;
                    texel[c] = top * (1.0 - ty) + bottom * ty;
                }
                out.set(x, y, texel);
            }
        }
        out
    }
}

fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

/// A decoded source raster tagged with its semantic type.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub path: PathBuf,
    pub texture_type: TextureType,
    pub pixels: PixelBuffer,
}

/// Decode a source texture from disk.
///
/// Zero-dimension or undecodable files are `ConvertError::Input`.
pub fn load_source(path: &Path, texture_type: TextureType) -> Result<SourceImage, ConvertError> {
    let image = image::open(path)
        .map_err(|e| ConvertError::unreadable(path, e))?
        .to_rgba8();

    if image.width() == 0 || image.height() == 0 {
        return Err(ConvertError::Input(format!(
            "zero-dimension source: {}",
            path.display()
        )));
    }

    debug!(
        "loaded {} ({}x{}, {:?})",
        path.display(),
        image.width(),
        image.height(),
        texture_type
    );

    Ok(SourceImage {
        path: path.to_path_buf(),
        texture_type,
        pixels: PixelBuffer::from_rgba8(&image),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba8_round_trip() {
        let mut img = RgbaImage::new(2, 2);
        img.put_pixel(0, 0, image::Rgba([10, 200, 50, 255]));
        img.put_pixel(1, 0, image::Rgba([0, 0, 0, 0]));
        img.put_pixel(0, 1, image::Rgba([255, 255, 255, 255]));
        img.put_pixel(1, 1, image::Rgba([128, 64, 32, 16]));

        let buffer = PixelBuffer::from_rgba8(&img);
        assert_eq!(buffer.to_rgba8(), img);
    }

    #[test]
    fn test_get_clamps_to_edge() {
        let mut buffer = PixelBuffer::filled(2, 2, [0.0; 4]);
        buffer.set(1, 1, [1.0, 0.5, 0.25, 1.0]);
        assert_eq!(buffer.get(5, 5), [1.0, 0.5, 0.25, 1.0]);
        assert_eq!(buffer.get(-3, 0), buffer.get(0, 0));
    }

    #[test]
    fn test_resize_constant_stays_constant() {
        let buffer = PixelBuffer::filled(8, 8, [0.5, 0.25, 1.0, 1.0]);
        let resized = buffer.resized_bilinear(3, 5);
        assert_eq!(resized.width(), 3);
        assert_eq!(resized.height(), 5);
        for t in resized.texels() {
            for c in 0..4 {
                assert!((t[c] - [0.5, 0.25, 1.0, 1.0][c]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_resize_identity_is_noop() {
        let buffer = PixelBuffer::filled(4, 4, [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(buffer.resized_bilinear(4, 4), buffer);
    }

    #[test]
    fn test_load_missing_file_is_input_error() {
        let err = load_source(Path::new("/nonexistent/tex.png"), TextureType::Albedo)
            .expect_err("should fail");
        assert!(matches!(err, ConvertError::Input(_)));
    }

    #[test]
    fn test_texture_type_flags() {
        assert!(TextureType::Albedo.is_color());
        assert!(!TextureType::Normal.is_color());
        assert!(TextureType::Gloss.is_specular());
        assert!(TextureType::Roughness.is_specular());
        assert!(!TextureType::Metallic.is_specular());
    }
}
