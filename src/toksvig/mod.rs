//! Toksvig specular-variance correction.
//!
//! When a normal map is mip-filtered, divergent micro-facets average out and
//! the mean normal shortens; shading with the original gloss then aliases
//! because the lost directional detail is no longer accounted for. This
//! module attenuates gloss (or boosts roughness) per mip level in proportion
//! to that shortening: the average-normal length `L` in (0, 1] measures how
//! much detail survived filtering, and a monotonic factor `f(L)` scales the
//! specular term. Level 0 is always the identity (L is ~1 at full
//! resolution).

use crate::error::ConvertError;
use crate::mips::{decode_normal, generate_mipmaps, MipChain, MipGenerationProfile};
use crate::texture::PixelBuffer;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Settings for the Toksvig pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToksvigSettings {
    /// Whether the pass runs at all.
    pub enabled: bool,
    /// Strength tunable `s` in the factor mapping. 1.0 is the reference
    /// correction; higher values attenuate harder.
    pub composite_power: f32,
    /// Explicit path to the companion normal map. When absent the caller
    /// resolves one by filename convention.
    pub normal_map_path: Option<PathBuf>,
    /// Also emit a diagnostic chain holding the raw per-pixel factor.
    pub emit_variance: bool,
}

impl Default for ToksvigSettings {
    fn default() -> Self {
        ToksvigSettings {
            enabled: false,
            composite_power: 1.0,
            normal_map_path: None,
            emit_variance: false,
        }
    }
}

/// Which specular convention the corrected chain stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecularKind {
    /// Gloss/smoothness: higher = sharper highlight. Corrected as `g * f`.
    Gloss,
    /// Roughness: higher = duller highlight. Corrected as `1 - (1-r) * f`.
    Roughness,
}

/// Output of the correction pass.
#[derive(Debug)]
pub struct ToksvigOutput {
    /// The corrected gloss/roughness chain, same shape as the input.
    pub chain: MipChain,
    /// Raw per-pixel factor per level, for visual inspection.
    pub variance: Option<MipChain>,
}

/// Toksvig factor for an average-normal length `len` and strength `s`.
///
/// `f(L) = L / (L + s * (1 - L))`: the standard `1 / (1 + s * sigma^2)` form
/// with `sigma^2 = (1 - L) / L`, rewritten so it stays finite as L tends to
/// zero. f(1) = 1 for any s, f is monotonic in L, and f(0) = 0.
pub fn toksvig_factor(len: f32, s: f32) -> f32 {
    let len = len.clamp(0.0, 1.0);
    let denom = len + s * (1.0 - len);
    if denom <= 1e-6 {
        0.0
    } else {
        len / denom
    }
}

/// Apply Toksvig correction to a gloss or roughness mip chain.
///
/// The normal map is independently mip-mapped with the same box resampling
/// but WITHOUT renormalization, so each level carries the true average
/// normal. A normal map whose dimensions differ from the chain's level 0 is
/// rescaled before variance computation.
pub fn apply_toksvig(
    chain: &MipChain,
    normal_map: &PixelBuffer,
    settings: &ToksvigSettings,
    kind: SpecularKind,
) -> Result<ToksvigOutput, ConvertError> {
    let base = chain.level(0);
    let aligned;
    let normal_map = if normal_map.width() != base.width() || normal_map.height() != base.height()
    {
        debug!(
            "rescaling normal map {}x{} to match source {}x{}",
            normal_map.width(),
            normal_map.height(),
            base.width(),
            base.height()
        );
        aligned = normal_map.resized_bilinear(base.width(), base.height());
        &aligned
    } else {
        normal_map
    };

    // Average normals per level: plain box filtering, no renormalization,
    // full pyramid so every chain level has a counterpart.
    let normal_profile = MipGenerationProfile::default();
    let normal_chain = generate_mipmaps(normal_map, &normal_profile)?;

    let mut corrected = Vec::with_capacity(chain.len());
    let mut variance = settings.emit_variance.then(Vec::new);

    for (i, level) in chain.iter().enumerate() {
        if i == 0 || i >= normal_chain.len() {
            // Level 0 is the identity; levels past the normal pyramid (only
            // possible with degenerate inputs) pass through unchanged.
            corrected.push(level.clone());
            if let Some(v) = &mut variance {
                v.push(PixelBuffer::filled(level.width(), level.height(), [1.0, 1.0, 1.0, 1.0]));
            }
            continue;
        }

        let normals = normal_chain.level(i);
        let mut out = level.clone();
        let mut factors = settings
            .emit_variance
            .then(|| PixelBuffer::filled(level.width(), level.height(), [1.0; 4]));

        for y in 0..level.height() {
            for x in 0..level.width() {
                let n = decode_normal(normals.get(x as i64, y as i64));
                let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
                let f = toksvig_factor(len, settings.composite_power);

                let t = level.get(x as i64, y as i64);
                let corrected_texel = match kind {
                    SpecularKind::Gloss => [t[0] * f, t[1] * f, t[2] * f, t[3]],
                    SpecularKind::Roughness => [
                        1.0 - (1.0 - t[0]) * f,
                        1.0 - (1.0 - t[1]) * f,
                        1.0 - (1.0 - t[2]) * f,
                        t[3],
                    ],
                };
                out.set(x, y, corrected_texel);

                if let Some(fb) = &mut factors {
                    fb.set(x, y, [f, f, f, 1.0]);
                }
            }
        }

        corrected.push(out);
        if let (Some(v), Some(fb)) = (&mut variance, factors) {
            v.push(fb);
        }
    }

    debug!(
        "toksvig {:?} correction applied to {} levels (s = {})",
        kind,
        chain.len(),
        settings.composite_power
    );

    Ok(ToksvigOutput {
        chain: MipChain::new(corrected),
        variance: variance.map(MipChain::new),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mips::generate_mipmaps;

    /// Deterministic normal map with divergent per-texel tilts; every mip
    /// level averages more directions, so the mean normal keeps shortening.
    fn noisy_normal_map(size: u32) -> PixelBuffer {
        let mut buffer = PixelBuffer::filled(size, size, [0.5, 0.5, 1.0, 1.0]);
        let mut state = 0x2545f491u32;
        for y in 0..size {
            for x in 0..size {
                // xorshift
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                let angle = (state % 6283) as f32 / 1000.0;
                let tilt = 0.85;
                let n = [
                    angle.cos() * tilt,
                    angle.sin() * tilt,
                    (1.0 - tilt * tilt).sqrt(),
                ];
                buffer.set(x, y, [n[0] * 0.5 + 0.5, n[1] * 0.5 + 0.5, n[2] * 0.5 + 0.5, 1.0]);
            }
        }
        buffer
    }

    fn mean_red(level: &PixelBuffer) -> f32 {
        let sum: f32 = level.texels().iter().map(|t| t[0]).sum();
        sum / level.texels().len() as f32
    }

    #[test]
    fn test_factor_boundary_values() {
        for s in [0.25, 1.0, 4.0] {
            assert!((toksvig_factor(1.0, s) - 1.0).abs() < 1e-6);
            assert_eq!(toksvig_factor(0.0, s), 0.0);
        }
    }

    #[test]
    fn test_factor_monotonic_in_length() {
        let mut prev = 0.0;
        for i in 0..=100 {
            let f = toksvig_factor(i as f32 / 100.0, 1.0);
            assert!(f >= prev);
            prev = f;
        }
    }

    #[test]
    fn test_factor_stronger_power_attenuates_more() {
        let weak = toksvig_factor(0.5, 0.5);
        let strong = toksvig_factor(0.5, 2.0);
        assert!(strong < weak);
    }

    #[test]
    fn test_level_zero_is_identity() {
        let gloss = PixelBuffer::filled(16, 16, [0.8, 0.8, 0.8, 1.0]);
        let chain = generate_mipmaps(&gloss, &MipGenerationProfile::default()).unwrap();
        let normals = noisy_normal_map(16);

        let out = apply_toksvig(
            &chain,
            &normals,
            &ToksvigSettings {
                enabled: true,
                ..Default::default()
            },
            SpecularKind::Gloss,
        )
        .unwrap();

        assert_eq!(out.chain.level(0), chain.level(0));
    }

    #[test]
    fn test_gloss_attenuation_monotonic_over_levels() {
        let gloss = PixelBuffer::filled(32, 32, [0.9, 0.9, 0.9, 1.0]);
        let chain = generate_mipmaps(&gloss, &MipGenerationProfile::default()).unwrap();
        let normals = noisy_normal_map(32);

        let out = apply_toksvig(
            &chain,
            &normals,
            &ToksvigSettings {
                enabled: true,
                ..Default::default()
            },
            SpecularKind::Gloss,
        )
        .unwrap();

        let means: Vec<f32> = out.chain.iter().map(mean_red).collect();
        for i in 1..means.len() {
            assert!(
                means[i] <= means[i - 1] + 1e-4,
                "gloss rose from level {} to {}: {:?}",
                i - 1,
                i,
                means
            );
        }
        // Deep levels of a divergent map must show clear attenuation.
        assert!(means[means.len() - 1] < 0.8 * means[0]);
    }

    #[test]
    fn test_roughness_boost_is_inverse_relation() {
        let roughness = PixelBuffer::filled(32, 32, [0.2, 0.2, 0.2, 1.0]);
        let chain = generate_mipmaps(&roughness, &MipGenerationProfile::default()).unwrap();
        let normals = noisy_normal_map(32);

        let out = apply_toksvig(
            &chain,
            &normals,
            &ToksvigSettings {
                enabled: true,
                ..Default::default()
            },
            SpecularKind::Roughness,
        )
        .unwrap();

        let means: Vec<f32> = out.chain.iter().map(mean_red).collect();
        for i in 1..means.len() {
            assert!(
                means[i] >= means[i - 1] - 1e-4,
                "roughness fell from level {} to {}: {:?}",
                i - 1,
                i,
                means
            );
        }
        assert!(means[means.len() - 1] > means[0]);
    }

    #[test]
    fn test_flat_normal_map_leaves_gloss_untouched() {
        let gloss = PixelBuffer::filled(16, 16, [0.7, 0.7, 0.7, 1.0]);
        let chain = generate_mipmaps(&gloss, &MipGenerationProfile::default()).unwrap();
        let flat = PixelBuffer::filled(16, 16, [0.5, 0.5, 1.0, 1.0]);

        let out = apply_toksvig(
            &chain,
            &flat,
            &ToksvigSettings {
                enabled: true,
                ..Default::default()
            },
            SpecularKind::Gloss,
        )
        .unwrap();

        for i in 0..out.chain.len() {
            let t = out.chain.level(i).get(0, 0);
            assert!((t[0] - 0.7).abs() < 1e-3, "level {i} drifted to {}", t[0]);
        }
    }

    #[test]
    fn test_mismatched_normal_map_is_rescaled() {
        let gloss = PixelBuffer::filled(16, 16, [0.9, 0.9, 0.9, 1.0]);
        let chain = generate_mipmaps(&gloss, &MipGenerationProfile::default()).unwrap();
        let normals = noisy_normal_map(64);

        let out = apply_toksvig(
            &chain,
            &normals,
            &ToksvigSettings {
                enabled: true,
                ..Default::default()
            },
            SpecularKind::Gloss,
        )
        .unwrap();
        assert_eq!(out.chain.len(), chain.len());
        assert_eq!(out.chain.level(0).width(), 16);
    }

    #[test]
    fn test_variance_chain_emitted_with_matching_shape() {
        let gloss = PixelBuffer::filled(16, 16, [0.9, 0.9, 0.9, 1.0]);
        let chain = generate_mipmaps(&gloss, &MipGenerationProfile::default()).unwrap();
        let normals = noisy_normal_map(16);

        let out = apply_toksvig(
            &chain,
            &normals,
            &ToksvigSettings {
                enabled: true,
                emit_variance: true,
                ..Default::default()
            },
            SpecularKind::Gloss,
        )
        .unwrap();

        let variance = out.variance.expect("variance chain requested");
        assert_eq!(variance.len(), chain.len());
        // Level 0 factor is identity.
        assert_eq!(variance.level(0).get(0, 0), [1.0, 1.0, 1.0, 1.0]);
        for i in 0..variance.len() {
            assert_eq!(variance.level(i).width(), chain.level(i).width());
        }
    }
}
