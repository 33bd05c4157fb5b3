//! Filename heuristics, isolated behind pluggable resolver traits.
//!
//! Matching a companion normal map or detecting Gloss vs Roughness from a
//! suffix is inherently fuzzy, so it lives here - unit-testable on its own
//! and swappable by engines with other naming conventions. A failed
//! resolution is a normal `None`, never an error.

use crate::texture::TextureType;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Finds the companion normal map for a gloss/roughness source.
pub trait NormalMapResolver: Send + Sync {
    fn resolve(&self, source: &Path) -> Option<PathBuf>;
}

/// Detects the semantic type of a texture from its path.
pub trait TextureTypeResolver: Send + Sync {
    fn detect(&self, path: &Path) -> TextureType;
}

/// Image extensions tried when probing for companion files, in order.
const CANDIDATE_EXTENSIONS: &[&str] = &["png", "tga", "jpg", "jpeg"];

/// Suffixes that mark a normal map, tried in order.
const NORMAL_SUFFIXES: &[&str] = &["_n", "_normal", "_nrm", "_norm"];

/// Default resolver: strips the source's own type suffix from the stem and
/// probes the same directory for `{stem}{normal_suffix}.{ext}`.
///
/// `armor_gloss.png` -> `armor_n.png`, `armor_normal.tga`, ...
#[derive(Debug, Default)]
pub struct FilenameNormalMapResolver;

impl NormalMapResolver for FilenameNormalMapResolver {
    fn resolve(&self, source: &Path) -> Option<PathBuf> {
        let dir = source.parent()?;
        let stem = source.file_stem()?.to_str()?;
        let base = strip_type_suffix(stem);

        for suffix in NORMAL_SUFFIXES {
            for ext in CANDIDATE_EXTENSIONS {
                let candidate = dir.join(format!("{base}{suffix}.{ext}"));
                if candidate.exists() {
                    debug!(
                        "resolved normal map {} for {}",
                        candidate.display(),
                        source.display()
                    );
                    return Some(candidate);
                }
            }
        }
        None
    }
}

/// Default type detector: matches the last `_suffix` of the stem against each
/// type's suffix table. Unmatched stems are `Generic`.
#[derive(Debug, Default)]
pub struct SuffixTextureTypeResolver;

impl TextureTypeResolver for SuffixTextureTypeResolver {
    fn detect(&self, path: &Path) -> TextureType {
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s.to_lowercase(),
            None => return TextureType::Generic,
        };
        let suffix = match stem.rsplit_once(['_', '-']) {
            Some((_, s)) => s,
            None => return TextureType::Generic,
        };

        for texture_type in [
            TextureType::Albedo,
            TextureType::Normal,
            TextureType::Gloss,
            TextureType::Roughness,
            TextureType::Metallic,
            TextureType::AmbientOcclusion,
            TextureType::Height,
            TextureType::Emissive,
        ] {
            if texture_type.suffixes().contains(&suffix) {
                return texture_type;
            }
        }
        TextureType::Generic
    }
}

/// Drop a recognized trailing type suffix (`_gloss`, `_ao`, ...) so companion
/// lookups share the material's base name.
fn strip_type_suffix(stem: &str) -> &str {
    if let Some((base, suffix)) = stem.rsplit_once(['_', '-']) {
        let lower = suffix.to_lowercase();
        let known = [
            TextureType::Albedo,
            TextureType::Normal,
            TextureType::Gloss,
            TextureType::Roughness,
            TextureType::Metallic,
            TextureType::AmbientOcclusion,
            TextureType::Height,
            TextureType::Emissive,
        ]
        .iter()
        .any(|t| t.suffixes().contains(&lower.as_str()));
        if known {
            return base;
        }
    }
    stem
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_detect_type_from_suffix() {
        let resolver = SuffixTextureTypeResolver;
        assert_eq!(resolver.detect(Path::new("armor_gloss.png")), TextureType::Gloss);
        assert_eq!(
            resolver.detect(Path::new("Armor_Roughness.TGA")),
            TextureType::Roughness
        );
        assert_eq!(resolver.detect(Path::new("crate_ao.png")), TextureType::AmbientOcclusion);
        assert_eq!(resolver.detect(Path::new("wall-height.png")), TextureType::Height);
        assert_eq!(resolver.detect(Path::new("thing.png")), TextureType::Generic);
        assert_eq!(resolver.detect(Path::new("screenshot_17.png")), TextureType::Generic);
    }

    #[test]
    fn test_gloss_vs_roughness_disambiguation() {
        let resolver = SuffixTextureTypeResolver;
        assert_eq!(
            resolver.detect(Path::new("m_smoothness.png")),
            TextureType::Gloss
        );
        assert_eq!(resolver.detect(Path::new("m_rough.png")), TextureType::Roughness);
    }

    #[test]
    fn test_strip_type_suffix() {
        assert_eq!(strip_type_suffix("armor_gloss"), "armor");
        assert_eq!(strip_type_suffix("armor_07"), "armor_07");
        assert_eq!(strip_type_suffix("plain"), "plain");
    }

    #[test]
    fn test_resolve_normal_map_in_same_directory() {
        let dir = tempdir().unwrap();
        let gloss = dir.path().join("armor_gloss.png");
        let normal = dir.path().join("armor_n.png");
        fs::write(&gloss, b"x").unwrap();
        fs::write(&normal, b"x").unwrap();

        let resolver = FilenameNormalMapResolver;
        assert_eq!(resolver.resolve(&gloss), Some(normal));
    }

    #[test]
    fn test_resolve_prefers_short_suffix_then_falls_back() {
        let dir = tempdir().unwrap();
        let gloss = dir.path().join("wall_rough.png");
        let normal = dir.path().join("wall_normal.tga");
        fs::write(&gloss, b"x").unwrap();
        fs::write(&normal, b"x").unwrap();

        let resolver = FilenameNormalMapResolver;
        assert_eq!(resolver.resolve(&gloss), Some(normal));
    }

    #[test]
    fn test_resolve_missing_is_none_not_error() {
        let dir = tempdir().unwrap();
        let gloss = dir.path().join("lonely_gloss.png");
        fs::write(&gloss, b"x").unwrap();

        let resolver = FilenameNormalMapResolver;
        assert_eq!(resolver.resolve(&gloss), None);
    }
}
