//! Mip pyramid generation.
//!
//! Builds a finite chain of progressively half-resolution levels from one
//! source buffer under a configurable filter/gamma/normalization profile.
//! Level 0 is the source; each following level halves width and height
//! (floor, minimum 1) until both dimensions are at or below `min_mip_size`.

mod filters;

pub use filters::{downsample, FilterKind, Kernel};

use crate::error::ConvertError;
use crate::texture::{PixelBuffer, TextureType};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How one texture's mip pyramid is generated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MipGenerationProfile {
    /// Resampling filter.
    pub filter: FilterKind,
    /// Linearize samples before filtering and re-encode after. Required for
    /// perceptual (albedo-like) data; data channels bypass this.
    pub apply_gamma_correction: bool,
    /// Gamma exponent used when `apply_gamma_correction` is set.
    pub gamma: f32,
    /// Kernel footprint scale. 1.0 is nominal; larger blurs more.
    pub blur: f32,
    /// The chain stops once both dimensions are at or below this.
    pub min_mip_size: u32,
    /// Re-normalize each resampled texel as a unit normal vector. Prevents
    /// shortened normals from biasing shading.
    pub normalize_normals: bool,
    /// Drop out-of-bounds taps and renormalize weights at borders instead of
    /// clamping, so the kernel never gains or loses energy at edges.
    pub energy_preserving: bool,
}

impl Default for MipGenerationProfile {
    fn default() -> Self {
        MipGenerationProfile {
            filter: FilterKind::Box,
            apply_gamma_correction: false,
            gamma: 2.2,
            blur: 1.0,
            min_mip_size: 1,
            normalize_normals: false,
            energy_preserving: false,
        }
    }
}

impl MipGenerationProfile {
    /// Default profile for a texture type. Explicit dispatch - no filename
    /// sniffing happens at this layer.
    pub fn for_texture_type(texture_type: TextureType) -> Self {
        let base = MipGenerationProfile::default();
        match texture_type {
            TextureType::Albedo | TextureType::Emissive => MipGenerationProfile {
                filter: FilterKind::Kaiser,
                apply_gamma_correction: true,
                ..base
            },
            TextureType::Normal => MipGenerationProfile {
                filter: FilterKind::Box,
                normalize_normals: true,
                ..base
            },
            TextureType::Gloss | TextureType::Roughness => MipGenerationProfile {
                filter: FilterKind::Box,
                energy_preserving: true,
                ..base
            },
            TextureType::Metallic
            | TextureType::AmbientOcclusion
            | TextureType::Height
            | TextureType::Generic => base,
        }
    }
}

/// Ordered, finite sequence of mip levels. Level 0 is full resolution.
#[derive(Debug, Clone)]
pub struct MipChain {
    levels: Vec<PixelBuffer>,
}

impl MipChain {
    pub fn new(levels: Vec<PixelBuffer>) -> Self {
        debug_assert!(!levels.is_empty());
        MipChain { levels }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level(&self, i: usize) -> &PixelBuffer {
        &self.levels[i]
    }

    pub fn level_mut(&mut self, i: usize) -> &mut PixelBuffer {
        &mut self.levels[i]
    }

    pub fn levels(&self) -> &[PixelBuffer] {
        &self.levels
    }

    pub fn iter(&self) -> impl Iterator<Item = &PixelBuffer> {
        self.levels.iter()
    }
}

/// Chain length produced for a `w` x `h` source with the given minimum mip
/// dimension. Always at least 1.
pub fn expected_chain_len(mut w: u32, mut h: u32, min_mip_size: u32) -> usize {
    let min = min_mip_size.max(1);
    let mut len = 1;
    while w.max(h) > min {
        w = (w / 2).max(1);
        h = (h / 2).max(1);
        len += 1;
    }
    len
}

/// Generate a mip pyramid from one source buffer.
///
/// Each level is produced by resampling the previous level with the profile's
/// filter. A `min_mip_size` at or above the source dimensions yields a chain
/// of length 1.
pub fn generate_mipmaps(
    source: &PixelBuffer,
    profile: &MipGenerationProfile,
) -> Result<MipChain, ConvertError> {
    if source.width() == 0 || source.height() == 0 {
        return Err(ConvertError::Input("zero-dimension source image".into()));
    }

    let min = profile.min_mip_size.max(1);
    let kernel = Kernel::new(profile.filter, profile.blur);

    // Level 0 is emitted untouched; the gamma round trip only applies to
    // filtered levels so re-running a conversion stays byte-stable.
    let mut levels = vec![source.clone()];

    // Filtering happens in linear space when gamma correction is on.
    let mut working = if profile.apply_gamma_correction {
        let mut linear = source.clone();
        apply_gamma(&mut linear, profile.gamma);
        linear
    } else {
        source.clone()
    };

    let mut width = source.width();
    let mut height = source.height();

    while width.max(height) > min {
        width = (width / 2).max(1);
        height = (height / 2).max(1);

        working = downsample(&working, width, height, &kernel, profile.energy_preserving);

        if profile.normalize_normals {
            renormalize_normals(&mut working);
        }

        let emitted = if profile.apply_gamma_correction {
            let mut encoded = working.clone();
            apply_gamma(&mut encoded, 1.0 / profile.gamma);
            encoded
        } else {
            working.clone()
        };
        levels.push(emitted);
    }

    debug!(
        "generated {} mip levels ({}x{} down to {}x{})",
        levels.len(),
        source.width(),
        source.height(),
        width,
        height
    );

    Ok(MipChain::new(levels))
}

/// Raise RGB to the given exponent in place. Alpha is never gamma-handled.
fn apply_gamma(buffer: &mut PixelBuffer, exponent: f32) {
    buffer.map_in_place(|t| {
        [
            t[0].max(0.0).powf(exponent),
            t[1].max(0.0).powf(exponent),
            t[2].max(0.0).powf(exponent),
            t[3],
        ]
    });
}

/// Decode each texel as a tangent-space normal, renormalize to unit length,
/// re-encode. Degenerate (near-zero) vectors become straight-up normals.
fn renormalize_normals(buffer: &mut PixelBuffer) {
    buffer.map_in_place(|t| {
        let v = decode_normal(t);
        let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        let n = if len > 1e-6 {
            [v[0] / len, v[1] / len, v[2] / len]
        } else {
            [0.0, 0.0, 1.0]
        };
        [
            n[0] * 0.5 + 0.5,
            n[1] * 0.5 + 0.5,
            n[2] * 0.5 + 0.5,
            t[3],
        ]
    });
}

/// Decode an RGB texel to a signed normal vector (not normalized).
pub(crate) fn decode_normal(texel: [f32; 4]) -> [f32; 3] {
    [
        texel[0] * 2.0 - 1.0,
        texel[1] * 2.0 - 1.0,
        texel[2] * 2.0 - 1.0,
    ]
}
