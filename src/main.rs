//! mipforge - texture conversion engine CLI.
//!
//! Converts source rasters into mip-mapped, Toksvig-corrected, optionally
//! channel-packed KTX2 containers via the external toktx encoder.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use mipforge::{
    cancel_pair, CancelToken, ChannelPackingSettings, ChannelSourceSettings, CompressionSettings,
    ConversionRequest, PackingMode, Supercompression, TargetFormat, TextureConversionPipeline,
    TextureType, ToksvigSettings, ToktxEncoder,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mipforge")]
#[command(version)]
#[command(about = "Texture conversion engine - mip pyramids, Toksvig correction, channel packing, KTX2 export")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a single texture to a KTX2 container
    Convert {
        /// Source image (PNG, TGA, JPG)
        input: PathBuf,

        /// Output container path (default: input with .ktx2 extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Semantic type (albedo, normal, gloss, roughness, metallic, ao,
        /// height, emissive); detected from the filename suffix if omitted
        #[arg(short, long)]
        texture_type: Option<String>,

        /// Minimum mip dimension; the chain stops at this size
        #[arg(long, default_value = "1")]
        min_mip_size: u32,

        /// Keep per-stage mip copies in a sibling mipmaps/ directory
        #[arg(long)]
        keep_mips: bool,

        #[command(flatten)]
        toksvig: ToksvigArgs,

        #[command(flatten)]
        compression: CompressionArgs,
    },

    /// Pack channel maps (AO/gloss/metallic/height) into one composite
    Pack {
        /// Output container path
        #[arg(short, long)]
        output: PathBuf,

        /// Ambient occlusion map (red slot)
        #[arg(long)]
        ao: Option<PathBuf>,

        /// Gloss map (green slot)
        #[arg(long)]
        gloss: Option<PathBuf>,

        /// Roughness map (green slot, alternative to --gloss)
        #[arg(long)]
        roughness: Option<PathBuf>,

        /// Metallic map (blue slot)
        #[arg(long)]
        metallic: Option<PathBuf>,

        /// Height map (alpha slot)
        #[arg(long)]
        height: Option<PathBuf>,

        /// Fill value for unconfigured channels
        #[arg(long, default_value = "255")]
        fill: u8,

        /// Keep per-stage mip copies in a sibling mipmaps/ directory
        #[arg(long)]
        keep_mips: bool,

        #[command(flatten)]
        toksvig: ToksvigArgs,

        #[command(flatten)]
        compression: CompressionArgs,
    },

    /// Convert every texture listed in a JSON manifest
    Batch {
        /// Manifest file: {"textures": [{"input": ..., "output": ...}, ...]}
        manifest: PathBuf,

        /// Maximum concurrent conversions (defaults to CPU thread count)
        #[arg(short, long)]
        concurrent: Option<usize>,

        /// Write the full JSON report here
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Check that the external encoder binary is available
    Probe,
}

#[derive(Args)]
struct ToksvigArgs {
    /// Apply Toksvig specular-variance correction to gloss/roughness mips
    #[arg(long)]
    toksvig: bool,

    /// Toksvig strength tunable
    #[arg(long, default_value = "1.0")]
    composite_power: f32,

    /// Explicit normal map (default: resolved by filename convention)
    #[arg(long)]
    normal_map: Option<PathBuf>,

    /// Emit the per-pixel correction factor as a diagnostic chain
    #[arg(long)]
    variance: bool,
}

impl ToksvigArgs {
    fn to_settings(&self) -> ToksvigSettings {
        ToksvigSettings {
            enabled: self.toksvig,
            composite_power: self.composite_power,
            normal_map_path: self.normal_map.clone(),
            emit_variance: self.variance,
        }
    }
}

#[derive(Args)]
struct CompressionArgs {
    /// Target format: etc1s or uastc
    #[arg(long, default_value = "etc1s")]
    format: String,

    /// ETC1S quality level (1-255)
    #[arg(long, default_value = "128")]
    qlevel: u32,

    /// ETC1S compression effort (0-5)
    #[arg(long, default_value = "2")]
    clevel: u32,

    /// UASTC quality (0-4)
    #[arg(long, default_value = "2")]
    uastc_quality: u32,

    /// UASTC RDO lambda (disables RDO when omitted)
    #[arg(long)]
    rdo_lambda: Option<f32>,

    /// Zstandard supercompression level (0 disables it)
    #[arg(long, default_value = "3")]
    zcmp: u32,

    /// Tag the container sRGB instead of linear
    #[arg(long)]
    srgb: bool,

    /// Premultiply color by alpha during encoding
    #[arg(long)]
    premultiply: bool,
}

impl CompressionArgs {
    fn to_settings(&self) -> Result<CompressionSettings> {
        let format = match self.format.to_lowercase().as_str() {
            "etc1s" => TargetFormat::Etc1s,
            "uastc" => TargetFormat::Uastc,
            other => bail!("unknown format '{other}' (expected etc1s or uastc)"),
        };
        Ok(CompressionSettings {
            format,
            quality_level: self.qlevel,
            compression_level: self.clevel,
            uastc_quality: self.uastc_quality,
            rdo_lambda: self.rdo_lambda,
            supercompression: if self.zcmp == 0 {
                Supercompression::None
            } else {
                Supercompression::Zstd { level: self.zcmp }
            },
            srgb: self.srgb,
            premultiply_alpha: self.premultiply,
        })
    }
}

#[derive(Deserialize)]
struct BatchManifest {
    textures: Vec<ConversionRequest>,
}

fn parse_texture_type(name: &str) -> Result<TextureType> {
    Ok(match name.to_lowercase().as_str() {
        "albedo" | "diffuse" | "basecolor" => TextureType::Albedo,
        "normal" => TextureType::Normal,
        "gloss" | "smoothness" => TextureType::Gloss,
        "roughness" | "rough" => TextureType::Roughness,
        "metallic" | "metal" => TextureType::Metallic,
        "ao" | "occlusion" => TextureType::AmbientOcclusion,
        "height" | "displacement" => TextureType::Height,
        "emissive" => TextureType::Emissive,
        "generic" => TextureType::Generic,
        other => bail!("unknown texture type '{other}'"),
    })
}

/// Cancel on Ctrl-C so in-flight encoder children get killed instead of
/// orphaned.
fn ctrl_c_token() -> CancelToken {
    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            handle.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive(
                if cli.verbose {
                    "mipforge=debug".parse()?
                } else {
                    "mipforge=warn".parse()?
                },
            ))
            .init();
    }

    match cli.command {
        Commands::Convert {
            input,
            output,
            texture_type,
            min_mip_size,
            keep_mips,
            toksvig,
            compression,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("ktx2"));
            let texture_type = texture_type.as_deref().map(parse_texture_type).transpose()?;

            let mut request = ConversionRequest::new(&input, &output);
            request.texture_type = texture_type;
            request.compression = compression.to_settings()?;
            request.toksvig = toksvig.to_settings();
            request.keep_debug_mips = keep_mips;
            if min_mip_size > 1 {
                request.min_mip_size = Some(min_mip_size);
            }

            let pipeline = build_pipeline()?;
            let result = pipeline.convert_texture(&request, &ctrl_c_token()).await;

            if result.success {
                println!(
                    "Converted {} -> {} ({} mip levels{}) in {:.2}s",
                    input.display(),
                    output.display(),
                    result.mip_levels,
                    if result.toksvig_applied {
                        ", toksvig-corrected"
                    } else {
                        ""
                    },
                    result.duration.as_secs_f32()
                );
            } else {
                bail!(
                    "conversion failed: {}",
                    result.error.unwrap_or_else(|| "unknown error".into())
                );
            }
        }

        Commands::Pack {
            output,
            ao,
            gloss,
            roughness,
            metallic,
            height,
            fill,
            keep_mips,
            toksvig,
            compression,
        } => {
            let mut sources = Vec::new();
            let toksvig_settings = toksvig.to_settings();
            if let Some(path) = ao {
                sources.push(channel_source(TextureType::AmbientOcclusion, path, false));
            }
            if let Some(path) = gloss {
                sources.push(channel_source(TextureType::Gloss, path, toksvig_settings.enabled));
            }
            if let Some(path) = roughness {
                sources.push(channel_source(
                    TextureType::Roughness,
                    path,
                    toksvig_settings.enabled,
                ));
            }
            if let Some(path) = metallic {
                sources.push(channel_source(TextureType::Metallic, path, false));
            }
            if let Some(path) = height {
                sources.push(channel_source(TextureType::Height, path, false));
            }
            if sources.is_empty() {
                bail!("no channel sources given (use --ao/--gloss/--roughness/--metallic/--height)");
            }

            let mut settings = ChannelPackingSettings::from_sources(sources, toksvig_settings);
            settings.fill = fill;
            let compression = compression.to_settings()?;

            let pipeline = build_pipeline()?;
            let cancel = ctrl_c_token();

            if settings.mode == PackingMode::None {
                println!("Packing requirements not met; exporting channels independently.");
                export_independently(&pipeline, &settings, &compression, &cancel).await?;
                return Ok(());
            }

            println!("Packing mode: {:?}", settings.mode);
            let result = pipeline
                .convert_packed(&settings, &output, &compression, keep_mips, &cancel)
                .await;

            if result.success {
                println!(
                    "Packed composite {} ({} mip levels) in {:.2}s",
                    output.display(),
                    result.mip_levels,
                    result.duration.as_secs_f32()
                );
            } else {
                // One composite's failure falls back to independent exports
                // instead of losing the configured channels entirely.
                println!(
                    "Packing failed ({}); exporting channels independently.",
                    result.error.unwrap_or_else(|| "unknown error".into())
                );
                export_independently(&pipeline, &settings, &compression, &cancel).await?;
            }
        }

        Commands::Batch {
            manifest,
            concurrent,
            report,
        } => {
            let data = std::fs::read_to_string(&manifest)
                .with_context(|| format!("failed to read manifest {}", manifest.display()))?;
            let manifest: BatchManifest = serde_json::from_str(&data)
                .with_context(|| "failed to parse batch manifest")?;

            let thread_count = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4);
            let concurrent = concurrent.unwrap_or(thread_count);

            println!("mipforge batch conversion");
            println!("Textures:   {}", manifest.textures.len());
            println!("Concurrent: {}", concurrent);
            println!();

            let pipeline = Arc::new(build_pipeline()?);
            let batch_report = pipeline
                .convert_batch(manifest.textures, concurrent, &ctrl_c_token())
                .await;

            println!("\n=== Conversion Summary ===");
            println!(
                "Converted: {} succeeded, {} failed",
                batch_report.success_count(),
                batch_report.failure_count()
            );
            for failure in batch_report.failures() {
                println!(
                    "  FAILED {}: {}",
                    failure.input.display(),
                    failure.error.as_deref().unwrap_or("unknown error")
                );
            }

            if let Some(report_path) = report {
                let json = serde_json::to_string_pretty(&batch_report)?;
                std::fs::write(&report_path, json)
                    .with_context(|| format!("failed to write report {}", report_path.display()))?;
                println!("\nReport written to {}", report_path.display());
            }

            if batch_report.failure_count() > 0 {
                std::process::exit(1);
            }
        }

        Commands::Probe => match mipforge::encoder::locate_toktx() {
            Ok(path) => println!("Encoder found: {}", path.display()),
            Err(e) => bail!("{e}"),
        },
    }

    Ok(())
}

fn build_pipeline() -> Result<TextureConversionPipeline> {
    let encoder = ToktxEncoder::new()?;
    Ok(TextureConversionPipeline::new(Arc::new(encoder)))
}

fn channel_source(
    channel_type: TextureType,
    source_path: PathBuf,
    apply_toksvig: bool,
) -> ChannelSourceSettings {
    ChannelSourceSettings {
        channel_type,
        source_path,
        apply_toksvig,
    }
}

/// Fallback path: convert each configured channel source as its own texture.
async fn export_independently(
    pipeline: &TextureConversionPipeline,
    settings: &ChannelPackingSettings,
    compression: &CompressionSettings,
    cancel: &CancelToken,
) -> Result<()> {
    let mut failures = 0;
    for source in settings.slots.iter().flatten() {
        let output = source.source_path.with_extension("ktx2");
        let mut request = ConversionRequest::new(&source.source_path, &output);
        request.texture_type = Some(source.channel_type);
        request.compression = compression.clone();
        request.toksvig = settings.toksvig.clone();

        let result = pipeline.convert_texture(&request, cancel).await;
        if result.success {
            println!("  exported {}", output.display());
        } else {
            failures += 1;
            println!(
                "  FAILED {}: {}",
                source.source_path.display(),
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    if failures > 0 {
        bail!("{failures} independent channel exports failed");
    }
    Ok(())
}
