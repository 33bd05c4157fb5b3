//! Channel packing: merge up to four single-channel maps into one texture.
//!
//! Ambient occlusion, gloss/roughness, metallic and height each occupy one
//! color channel of the packed output (the OG/OGM/OGMH conventions), cutting
//! per-material texture fetches. Every source is independently mip-mapped
//! with a profile appropriate for its channel type; the gloss slot can be
//! routed through Toksvig correction first. Each packed channel stores one
//! 8-bit scalar read from the red channel of its source - no cross-talk.

use crate::error::ConvertError;
use crate::mips::{generate_mipmaps, MipChain, MipGenerationProfile};
use crate::resolver::NormalMapResolver;
use crate::texture::{load_source, PixelBuffer, TextureType};
use crate::toksvig::{apply_toksvig, SpecularKind, ToksvigSettings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Which packed layout a composite uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PackingMode {
    /// No packing; channels export as independent textures.
    #[default]
    None,
    /// R = occlusion, G = gloss/roughness.
    Og,
    /// R = occlusion, G = gloss/roughness, B = metallic.
    Ogm,
    /// R = occlusion, G = gloss/roughness, B = metallic, A = height.
    Ogmh,
}

impl PackingMode {
    /// Number of channel slots this mode consumes.
    pub fn channel_count(&self) -> usize {
        match self {
            PackingMode::None => 0,
            PackingMode::Og => 2,
            PackingMode::Ogm => 3,
            PackingMode::Ogmh => 4,
        }
    }
}

/// One configured channel slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSourceSettings {
    pub channel_type: TextureType,
    pub source_path: PathBuf,
    /// Route this slot through Toksvig correction (specular slots only).
    pub apply_toksvig: bool,
}

/// Settings for one packed composite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPackingSettings {
    pub mode: PackingMode,
    /// Slots in R/G/B/A order. Unconfigured slots receive `fill`.
    pub slots: [Option<ChannelSourceSettings>; 4],
    /// Byte written to unconfigured channels. 255 by convention: an absent
    /// occlusion map means "no occlusion".
    pub fill: u8,
    pub toksvig: ToksvigSettings,
    /// Minimum mip dimension for every per-channel chain.
    pub min_mip_size: u32,
}

impl Default for ChannelPackingSettings {
    fn default() -> Self {
        ChannelPackingSettings {
            mode: PackingMode::None,
            slots: [None, None, None, None],
            fill: 255,
            toksvig: ToksvigSettings::default(),
            min_mip_size: 1,
        }
    }
}

impl ChannelPackingSettings {
    /// Build settings from a loose set of channel sources: the mode is
    /// selected from what is present and each source lands in its
    /// conventional slot (R = AO, G = gloss/roughness, B = metallic,
    /// A = height).
    pub fn from_sources(
        sources: Vec<ChannelSourceSettings>,
        toksvig: ToksvigSettings,
    ) -> Self {
        let mode = determine_packing_mode(&sources);
        let mut slots: [Option<ChannelSourceSettings>; 4] = [None, None, None, None];
        for source in sources {
            let slot = match source.channel_type {
                TextureType::AmbientOcclusion => 0,
                TextureType::Gloss | TextureType::Roughness => 1,
                TextureType::Metallic => 2,
                TextureType::Height => 3,
                other => {
                    warn!("ignoring unpackable channel source {:?}", other);
                    continue;
                }
            };
            slots[slot] = Some(source);
        }
        ChannelPackingSettings {
            mode,
            slots,
            toksvig,
            ..Default::default()
        }
    }
}

/// Output chain of a packing run; level `i` combines channel `i` images from
/// every configured source at a common per-level resolution.
pub type PackedMipChain = MipChain;

/// Select the packing mode for a set of channel sources.
///
/// Requires at least two sources whose backing files exist; with Height and
/// Metallic present the full OGMH layout is used, Metallic alone upgrades to
/// OGM, AO plus gloss/roughness packs as OG, and anything else falls back to
/// independent textures.
pub fn determine_packing_mode(sources: &[ChannelSourceSettings]) -> PackingMode {
    let existing: Vec<&ChannelSourceSettings> = sources
        .iter()
        .filter(|s| s.source_path.exists())
        .collect();

    if existing.len() < 2 {
        return PackingMode::None;
    }

    let has = |t: fn(&TextureType) -> bool| existing.iter().any(|s| t(&s.channel_type));
    let has_metallic = has(|t| *t == TextureType::Metallic);
    let has_height = has(|t| *t == TextureType::Height);
    let has_ao = has(|t| *t == TextureType::AmbientOcclusion);
    let has_gloss = has(|t| t.is_specular());

    if has_metallic && has_height {
        PackingMode::Ogmh
    } else if has_metallic {
        PackingMode::Ogm
    } else if has_ao && has_gloss {
        PackingMode::Og
    } else {
        PackingMode::None
    }
}

/// Build the packed mip chain for one composite.
///
/// Fails with `ConvertError::Computation` when fewer than two slots are
/// configured; the caller is expected to log and fall back to exporting the
/// channels independently rather than aborting its batch.
pub async fn pack_channels(
    settings: &ChannelPackingSettings,
    resolver: &dyn NormalMapResolver,
) -> Result<PackedMipChain, ConvertError> {
    // Mode bounds how many slots participate. None means "do not pack":
    // callers export the configured channels as independent textures.
    let active = match settings.mode {
        PackingMode::None => {
            return Err(ConvertError::Computation(
                "packing mode is None; channels export as independent textures".into(),
            ));
        }
        mode => mode.channel_count(),
    };
    let configured: Vec<(usize, &ChannelSourceSettings)> = settings
        .slots
        .iter()
        .take(active)
        .enumerate()
        .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
        .collect();

    if configured.len() < 2 {
        return Err(ConvertError::Computation(
            "channel packing requires at least two configured sources".into(),
        ));
    }

    // Each source gets its own chain under a per-channel-type profile.
    let mut chains: Vec<(usize, MipChain)> = Vec::with_capacity(configured.len());
    for (slot, source) in &configured {
        let chain = build_channel_chain(source, settings, resolver)?;
        chains.push((*slot, chain));
    }

    // Never extrapolate beyond the shortest chain.
    let mip_count = chains.iter().map(|(_, c)| c.len()).min().unwrap_or(1);

    let fill = settings.fill as f32 / 255.0;
    let mut levels = Vec::with_capacity(mip_count);

    for level in 0..mip_count {
        // Per-level output resolution is the maximum among the sources.
        let width = chains
            .iter()
            .map(|(_, c)| c.level(level).width())
            .max()
            .unwrap_or(1);
        let height = chains
            .iter()
            .map(|(_, c)| c.level(level).height())
            .max()
            .unwrap_or(1);

        let mut packed = PixelBuffer::filled(width, height, [fill; 4]);

        for (slot, chain) in &chains {
            let source_level = chain.level(level);
            let resampled;
            let aligned = if source_level.width() != width || source_level.height() != height {
                resampled = source_level.resized_bilinear(width, height);
                &resampled
            } else {
                source_level
            };

            for y in 0..height {
                for x in 0..width {
                    // The scalar always comes from the source's red channel.
                    let value = aligned.get(x as i64, y as i64)[0];
                    let mut texel = packed.get(x as i64, y as i64);
                    texel[*slot] = value;
                    packed.set(x, y, texel);
                }
            }
        }

        levels.push(packed);
    }

    info!(
        "packed {} channels into {} mip levels ({:?})",
        configured.len(),
        mip_count,
        settings.mode
    );

    Ok(MipChain::new(levels))
}

/// Load one channel source and build its (optionally Toksvig-corrected)
/// chain.
fn build_channel_chain(
    source: &ChannelSourceSettings,
    settings: &ChannelPackingSettings,
    resolver: &dyn NormalMapResolver,
) -> Result<MipChain, ConvertError> {
    let image = load_source(&source.source_path, source.channel_type)?;
    let profile = MipGenerationProfile {
        min_mip_size: settings.min_mip_size,
        ..MipGenerationProfile::for_texture_type(source.channel_type)
    };
    let chain = generate_mipmaps(&image.pixels, &profile)?;

    let wants_toksvig =
        source.apply_toksvig && settings.toksvig.enabled && source.channel_type.is_specular();
    if !wants_toksvig {
        return Ok(chain);
    }

    let normal_path = settings
        .toksvig
        .normal_map_path
        .clone()
        .or_else(|| resolver.resolve(&source.source_path));

    let Some(normal_path) = normal_path else {
        // Toksvig is optional inside packing: no normal map means the slot
        // packs uncorrected.
        warn!(
            "no normal map resolvable for {}, packing uncorrected gloss",
            source.source_path.display()
        );
        return Ok(chain);
    };

    let kind = match source.channel_type {
        TextureType::Roughness => SpecularKind::Roughness,
        _ => SpecularKind::Gloss,
    };

    match load_source(&normal_path, TextureType::Normal)
        .and_then(|normal| apply_toksvig(&chain, &normal.pixels, &settings.toksvig, kind))
    {
        Ok(output) => {
            debug!(
                "toksvig-corrected packed slot from {}",
                normal_path.display()
            );
            Ok(output.chain)
        }
        Err(e) => {
            warn!("toksvig failed for packed slot, using uncorrected chain: {e}");
            Ok(chain)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::FilenameNormalMapResolver;
    use image::RgbaImage;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_constant_png(path: &Path, size: u32, value: u8) {
        let mut img = RgbaImage::new(size, size);
        for p in img.pixels_mut() {
            *p = image::Rgba([value, value, value, 255]);
        }
        img.save(path).unwrap();
    }

    fn source(channel_type: TextureType, path: &Path) -> ChannelSourceSettings {
        ChannelSourceSettings {
            channel_type,
            source_path: path.to_path_buf(),
            apply_toksvig: false,
        }
    }

    #[test]
    fn test_mode_selection_table() {
        let dir = tempdir().unwrap();
        let ao = dir.path().join("m_ao.png");
        let gloss = dir.path().join("m_gloss.png");
        let metal = dir.path().join("m_metal.png");
        let height = dir.path().join("m_height.png");
        for p in [&ao, &gloss, &metal, &height] {
            write_constant_png(p, 4, 128);
        }

        let ao_s = source(TextureType::AmbientOcclusion, &ao);
        let gloss_s = source(TextureType::Gloss, &gloss);
        let metal_s = source(TextureType::Metallic, &metal);
        let height_s = source(TextureType::Height, &height);

        assert_eq!(
            determine_packing_mode(&[ao_s.clone(), gloss_s.clone()]),
            PackingMode::Og
        );
        assert_eq!(
            determine_packing_mode(&[ao_s.clone(), gloss_s.clone(), metal_s.clone()]),
            PackingMode::Ogm
        );
        assert_eq!(
            determine_packing_mode(&[ao_s.clone(), gloss_s.clone(), metal_s, height_s]),
            PackingMode::Ogmh
        );
        assert_eq!(determine_packing_mode(&[ao_s.clone()]), PackingMode::None);
        assert_eq!(determine_packing_mode(&[]), PackingMode::None);

        // Roughness counts as the gloss slot.
        let rough = dir.path().join("m_rough.png");
        write_constant_png(&rough, 4, 20);
        assert_eq!(
            determine_packing_mode(&[ao_s, source(TextureType::Roughness, &rough)]),
            PackingMode::Og
        );
    }

    #[test]
    fn test_mode_requires_existing_files() {
        let dir = tempdir().unwrap();
        let ao = dir.path().join("m_ao.png");
        write_constant_png(&ao, 4, 128);
        let missing = dir.path().join("does_not_exist.png");

        let sources = [
            source(TextureType::AmbientOcclusion, &ao),
            source(TextureType::Gloss, &missing),
        ];
        assert_eq!(determine_packing_mode(&sources), PackingMode::None);
    }

    #[tokio::test]
    async fn test_pack_round_trip_no_cross_talk() {
        let dir = tempdir().unwrap();
        let ao = dir.path().join("m_ao.png");
        let gloss = dir.path().join("m_gloss.png");
        let metal = dir.path().join("m_metal.png");
        write_constant_png(&ao, 8, 10);
        write_constant_png(&gloss, 8, 200);
        write_constant_png(&metal, 8, 50);

        let settings = ChannelPackingSettings::from_sources(
            vec![
                source(TextureType::AmbientOcclusion, &ao),
                source(TextureType::Gloss, &gloss),
                source(TextureType::Metallic, &metal),
            ],
            ToksvigSettings::default(),
        );
        assert_eq!(settings.mode, PackingMode::Ogm);

        let packed = pack_channels(&settings, &FilenameNormalMapResolver)
            .await
            .unwrap();

        let level0 = packed.level(0).to_rgba8();
        let p = level0.get_pixel(3, 3);
        assert_eq!(p[0], 10, "R must carry AO exactly");
        assert_eq!(p[1], 200, "G must carry gloss exactly");
        assert_eq!(p[2], 50, "B must carry metallic exactly");
        assert_eq!(p[3], 255, "unconfigured A takes the fill value");
    }

    #[tokio::test]
    async fn test_packed_count_is_min_chain_and_resolution_is_max() {
        let dir = tempdir().unwrap();
        let ao = dir.path().join("m_ao.png");
        let gloss = dir.path().join("m_gloss.png");
        write_constant_png(&ao, 16, 100);
        write_constant_png(&gloss, 8, 180);

        let settings = ChannelPackingSettings::from_sources(
            vec![
                source(TextureType::AmbientOcclusion, &ao),
                source(TextureType::Gloss, &gloss),
            ],
            ToksvigSettings::default(),
        );

        let packed = pack_channels(&settings, &FilenameNormalMapResolver)
            .await
            .unwrap();

        // 8x8 chain has 4 levels; 16x16 has 5. Shortest wins.
        assert_eq!(packed.len(), 4);
        // Per-level resolution follows the larger source.
        assert_eq!(packed.level(0).width(), 16);
        assert_eq!(packed.level(3).width(), 2);

        // The 8x8 gloss is upsampled into level 0 without value drift
        // (constant source).
        let p = packed.level(0).to_rgba8();
        assert_eq!(p.get_pixel(0, 0)[1], 180);
        assert_eq!(p.get_pixel(0, 0)[0], 100);
    }

    #[tokio::test]
    async fn test_custom_fill_value() {
        let dir = tempdir().unwrap();
        let ao = dir.path().join("m_ao.png");
        let gloss = dir.path().join("m_gloss.png");
        write_constant_png(&ao, 4, 10);
        write_constant_png(&gloss, 4, 20);

        let mut settings = ChannelPackingSettings::from_sources(
            vec![
                source(TextureType::AmbientOcclusion, &ao),
                source(TextureType::Gloss, &gloss),
            ],
            ToksvigSettings::default(),
        );
        settings.fill = 0;

        let packed = pack_channels(&settings, &FilenameNormalMapResolver)
            .await
            .unwrap();
        let p = packed.level(0).to_rgba8();
        assert_eq!(p.get_pixel(0, 0)[2], 0);
        assert_eq!(p.get_pixel(0, 0)[3], 0);
    }

    #[tokio::test]
    async fn test_mode_none_refuses_to_pack() {
        let dir = tempdir().unwrap();
        let ao = dir.path().join("m_ao.png");
        let gloss = dir.path().join("m_gloss.png");
        write_constant_png(&ao, 4, 10);
        write_constant_png(&gloss, 4, 200);

        // Two perfectly packable slots, but the caller asked for None.
        let mut settings = ChannelPackingSettings::default();
        settings.slots[0] = Some(source(TextureType::AmbientOcclusion, &ao));
        settings.slots[1] = Some(source(TextureType::Gloss, &gloss));
        assert_eq!(settings.mode, PackingMode::None);

        let err = pack_channels(&settings, &FilenameNormalMapResolver)
            .await
            .expect_err("mode None must fall back to independent textures");
        assert!(matches!(err, ConvertError::Computation(_)));
    }

    #[tokio::test]
    async fn test_single_source_is_computation_error() {
        let dir = tempdir().unwrap();
        let ao = dir.path().join("m_ao.png");
        write_constant_png(&ao, 4, 10);

        let mut settings = ChannelPackingSettings::default();
        settings.slots[0] = Some(source(TextureType::AmbientOcclusion, &ao));
        settings.mode = PackingMode::Og;

        let err = pack_channels(&settings, &FilenameNormalMapResolver)
            .await
            .expect_err("one source must not pack");
        assert!(matches!(err, ConvertError::Computation(_)));
    }

    #[tokio::test]
    async fn test_unreadable_source_aborts_composite() {
        let dir = tempdir().unwrap();
        let ao = dir.path().join("m_ao.png");
        let broken = dir.path().join("m_gloss.png");
        write_constant_png(&ao, 4, 10);
        std::fs::write(&broken, b"not a png").unwrap();

        let mut settings = ChannelPackingSettings::default();
        settings.mode = PackingMode::Og;
        settings.slots[0] = Some(source(TextureType::AmbientOcclusion, &ao));
        settings.slots[1] = Some(source(TextureType::Gloss, &broken));

        let err = pack_channels(&settings, &FilenameNormalMapResolver)
            .await
            .expect_err("corrupt source must abort this composite");
        assert!(matches!(err, ConvertError::Input(_)));
    }

    #[tokio::test]
    async fn test_toksvig_routed_gloss_slot_darkens_deep_mips() {
        let dir = tempdir().unwrap();
        let ao = dir.path().join("m_ao.png");
        let gloss = dir.path().join("m_gloss.png");
        let normal = dir.path().join("m_n.png");
        write_constant_png(&ao, 16, 255);
        write_constant_png(&gloss, 16, 230);

        // Divergent normal map: alternating strong X tilts.
        let mut img = RgbaImage::new(16, 16);
        for (x, _y, p) in img.enumerate_pixels_mut() {
            *p = if x % 2 == 0 {
                image::Rgba([240, 128, 180, 255])
            } else {
                image::Rgba([15, 128, 180, 255])
            };
        }
        img.save(&normal).unwrap();

        let mut sources = vec![
            source(TextureType::AmbientOcclusion, &ao),
            source(TextureType::Gloss, &gloss),
        ];
        sources[1].apply_toksvig = true;

        let settings = ChannelPackingSettings::from_sources(
            sources,
            ToksvigSettings {
                enabled: true,
                ..Default::default()
            },
        );

        let packed = pack_channels(&settings, &FilenameNormalMapResolver)
            .await
            .unwrap();

        let deep = packed.len() - 1;
        let g0 = packed.level(0).get(0, 0)[1];
        let gn = packed.level(deep).get(0, 0)[1];
        assert!((g0 - 230.0 / 255.0).abs() < 1e-3);
        assert!(gn < g0 * 0.9, "deep mip gloss {gn} not attenuated vs {g0}");
    }
}
