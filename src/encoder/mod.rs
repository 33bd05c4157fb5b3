//! External GPU-texture encoder collaborator.
//!
//! The engine never compresses textures itself; it hands an ordered list of
//! per-mip PNGs to an opaque command-line encoder (`toktx` from
//! KTX-Software) that produces the final `.ktx2` container. The binary is
//! probed before use - a missing encoder is a hard configuration error, not
//! a silent skip.
//!
//! The encoder contract is positional: infiles are mip levels, largest
//! first, so serialization order upstream is strict.

use crate::cancel::CancelToken;
use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// GPU target format family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TargetFormat {
    /// ETC1S: small, transcodes everywhere, lower quality ceiling.
    #[default]
    Etc1s,
    /// UASTC: larger, high quality, good for normal maps and detail.
    Uastc,
}

/// Optional lossless layer applied atop the already GPU-compressed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Supercompression {
    None,
    Zstd { level: u32 },
}

/// Knobs forwarded to the external encoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionSettings {
    pub format: TargetFormat,
    /// ETC1S quality level (toktx `--qlevel`, 1..=255).
    pub quality_level: u32,
    /// ETC1S compression effort (toktx `--clevel`, 0..=5).
    pub compression_level: u32,
    /// UASTC quality (toktx `--uastc_quality`, 0..=4).
    pub uastc_quality: u32,
    /// UASTC rate-distortion optimization lambda; None disables RDO.
    pub rdo_lambda: Option<f32>,
    pub supercompression: Supercompression,
    /// Tag the container sRGB instead of linear.
    pub srgb: bool,
    /// Premultiply color by alpha during encoding.
    pub premultiply_alpha: bool,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        CompressionSettings {
            format: TargetFormat::Etc1s,
            quality_level: 128,
            compression_level: 2,
            uastc_quality: 2,
            rdo_lambda: None,
            supercompression: Supercompression::Zstd { level: 3 },
            srgb: false,
            premultiply_alpha: false,
        }
    }
}

/// The external encoder seam. Implementations take the ordered per-mip image
/// list and produce one compressed container.
pub trait MipEncoder: Send + Sync {
    /// Human-readable name for logs and reports.
    fn name(&self) -> &str;

    /// Encode `levels` (largest first) into `output`.
    fn encode<'a>(
        &'a self,
        levels: &'a [PathBuf],
        output: &'a Path,
        settings: &'a CompressionSettings,
        cancel: &'a CancelToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConvertError>> + Send + 'a>>;
}

/// `toktx`-backed encoder producing KTX2 containers.
#[derive(Debug, Clone)]
pub struct ToktxEncoder {
    binary: PathBuf,
}

impl ToktxEncoder {
    /// Probe for the encoder and fail hard if it is absent.
    pub fn new() -> Result<Self, ConvertError> {
        Ok(ToktxEncoder {
            binary: locate_toktx()?,
        })
    }

    /// Use an explicit binary path (tests, nonstandard installs).
    pub fn with_binary(binary: PathBuf) -> Self {
        ToktxEncoder { binary }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Assemble the toktx argument list for one invocation.
    fn build_args(
        levels: &[PathBuf],
        output: &Path,
        settings: &CompressionSettings,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec!["--t2".into()];

        match settings.format {
            TargetFormat::Etc1s => {
                args.push("--encode".into());
                args.push("etc1s".into());
                args.push("--clevel".into());
                args.push(settings.compression_level.to_string());
                args.push("--qlevel".into());
                args.push(settings.quality_level.to_string());
            }
            TargetFormat::Uastc => {
                args.push("--encode".into());
                args.push("uastc".into());
                args.push("--uastc_quality".into());
                args.push(settings.uastc_quality.to_string());
                if let Some(lambda) = settings.rdo_lambda {
                    args.push("--uastc_rdo_l".into());
                    args.push(format!("{lambda}"));
                }
            }
        }

        if let Supercompression::Zstd { level } = settings.supercompression {
            args.push("--zcmp".into());
            args.push(level.to_string());
        }

        args.push("--assign_oetf".into());
        args.push(if settings.srgb { "srgb" } else { "linear" }.into());

        if settings.premultiply_alpha {
            args.push("--pre_multiply".into());
        }

        // Infiles are the mip levels of the pyramid, largest first.
        if levels.len() > 1 {
            args.push("--mipmap".into());
        }

        args.push(output.to_string_lossy().into_owned());
        for level in levels {
            args.push(level.to_string_lossy().into_owned());
        }

        args
    }
}

impl MipEncoder for ToktxEncoder {
    fn name(&self) -> &str {
        "toktx"
    }

    fn encode<'a>(
        &'a self,
        levels: &'a [PathBuf],
        output: &'a Path,
        settings: &'a CompressionSettings,
        cancel: &'a CancelToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConvertError>> + Send + 'a>> {
        Box::pin(async move {
            if levels.is_empty() {
                return Err(ConvertError::Input("no mip levels to encode".into()));
            }

            let args = Self::build_args(levels, output, settings);
            debug!("invoking {} {}", self.binary.display(), args.join(" "));

            let mut child = Command::new(&self.binary)
                .args(&args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    ConvertError::Configuration(format!(
                        "failed to spawn {}: {e}",
                        self.binary.display()
                    ))
                })?;

            // Dropping the wait future drops the child, and kill_on_drop
            // terminates the process rather than orphaning it.
            let result = tokio::select! {
                out = child.wait_with_output() => out,
                _ = cancel.cancelled() => {
                    warn!("encoder cancelled, killing child process");
                    return Err(ConvertError::Cancelled);
                }
            };

            let out = result
                .map_err(|e| ConvertError::Encoding(format!("failed to await encoder: {e}")))?;

            if !out.status.success() {
                let stderr = String::from_utf8_lossy(&out.stderr);
                return Err(ConvertError::Encoding(format!(
                    "toktx exited with {}: {}",
                    out.status,
                    stderr.trim()
                )));
            }

            Ok(())
        })
    }
}

/// Locate the toktx binary.
///
/// Tries, in order: `bin/toktx` next to the executable, `toktx` next to the
/// executable, then the system PATH.
pub fn locate_toktx() -> Result<PathBuf, ConvertError> {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            for candidate in [exe_dir.join("bin/toktx"), exe_dir.join("toktx")] {
                if candidate.exists() {
                    return Ok(candidate);
                }
            }
        }
    }

    if let Ok(path) = which::which("toktx") {
        return Ok(path);
    }

    Err(ConvertError::encoder_missing("toktx"))
}
