//! End-to-end texture conversion orchestration.
//!
//! One conversion call owns all of its intermediate state: decode the
//! source, build the mip chain, optionally Toksvig-correct it, serialize the
//! levels to a unique scratch directory in strict index order, hand the
//! ordered list to the external encoder, and clean the scratch up on every
//! exit path. Failures never escape as errors to batch callers; they land in
//! the `ConversionResult` record so one texture can never abort its
//! siblings.

mod scratch;

pub use scratch::ScratchDir;

use crate::cancel::CancelToken;
use crate::encoder::{CompressionSettings, MipEncoder};
use crate::error::ConvertError;
use crate::mips::{generate_mipmaps, MipChain, MipGenerationProfile};
use crate::packing::{pack_channels, ChannelPackingSettings};
use crate::resolver::{
    FilenameNormalMapResolver, NormalMapResolver, SuffixTextureTypeResolver, TextureTypeResolver,
};
use crate::texture::{load_source, TextureType};
use crate::toksvig::{apply_toksvig, SpecularKind, ToksvigSettings};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// One texture conversion job. Deserializable so batch manifests can list
/// jobs in JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Explicit semantic type; None lets the type resolver decide.
    #[serde(default)]
    pub texture_type: Option<TextureType>,
    /// Explicit mip profile; None uses the per-type default.
    #[serde(default)]
    pub profile: Option<MipGenerationProfile>,
    /// Override just the minimum mip dimension, keeping the rest of the
    /// (possibly type-detected) profile intact.
    #[serde(default)]
    pub min_mip_size: Option<u32>,
    #[serde(default)]
    pub compression: CompressionSettings,
    #[serde(default)]
    pub toksvig: ToksvigSettings,
    /// Copy scratch mips to a sibling `mipmaps/` directory for inspection.
    #[serde(default)]
    pub keep_debug_mips: bool,
}

impl ConversionRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        ConversionRequest {
            input: input.into(),
            output: output.into(),
            texture_type: None,
            profile: None,
            min_mip_size: None,
            compression: CompressionSettings::default(),
            toksvig: ToksvigSettings::default(),
            keep_debug_mips: false,
        }
    }
}

/// Record of one conversion attempt. Always produced, success or not.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    pub input: PathBuf,
    pub success: bool,
    pub error: Option<String>,
    pub mip_levels: usize,
    pub toksvig_applied: bool,
    pub normal_map: Option<PathBuf>,
    pub duration: Duration,
}

impl ConversionResult {
    fn failure(input: PathBuf, error: &ConvertError, duration: Duration) -> Self {
        ConversionResult {
            input,
            success: false,
            error: Some(error.to_string()),
            mip_levels: 0,
            toksvig_applied: false,
            normal_map: None,
            duration,
        }
    }
}

/// Partial-success report for a batch of conversions.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub started: DateTime<Utc>,
    pub results: Vec<ConversionResult>,
}

impl BatchReport {
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ConversionResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

/// What a successful conversion produced, before it is folded into the
/// public result record.
struct ConversionOutcome {
    mip_levels: usize,
    toksvig_applied: bool,
    normal_map: Option<PathBuf>,
}

/// The conversion orchestrator. Cheap to share behind an `Arc`; each call is
/// independently schedulable and owns its own scratch state.
pub struct TextureConversionPipeline {
    encoder: Arc<dyn MipEncoder>,
    normal_resolver: Arc<dyn NormalMapResolver>,
    type_resolver: Arc<dyn TextureTypeResolver>,
    scratch_root: PathBuf,
}

impl TextureConversionPipeline {
    pub fn new(encoder: Arc<dyn MipEncoder>) -> Self {
        TextureConversionPipeline {
            encoder,
            normal_resolver: Arc::new(FilenameNormalMapResolver),
            type_resolver: Arc::new(SuffixTextureTypeResolver),
            scratch_root: std::env::temp_dir().join("mipforge"),
        }
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    pub fn with_normal_resolver(mut self, resolver: Arc<dyn NormalMapResolver>) -> Self {
        self.normal_resolver = resolver;
        self
    }

    pub fn with_type_resolver(mut self, resolver: Arc<dyn TextureTypeResolver>) -> Self {
        self.type_resolver = resolver;
        self
    }

    /// Convert one texture end to end.
    ///
    /// Never returns an error: every failure is folded into the result
    /// record so batch callers stay isolated from individual textures.
    pub async fn convert_texture(
        &self,
        request: &ConversionRequest,
        cancel: &CancelToken,
    ) -> ConversionResult {
        let start = Instant::now();
        match self.run_conversion(request, cancel).await {
            Ok(outcome) => ConversionResult {
                input: request.input.clone(),
                success: true,
                error: None,
                mip_levels: outcome.mip_levels,
                toksvig_applied: outcome.toksvig_applied,
                normal_map: outcome.normal_map,
                duration: start.elapsed(),
            },
            Err(e) => {
                warn!("conversion of {} failed: {e}", request.input.display());
                remove_partial_output(&request.output);
                ConversionResult::failure(request.input.clone(), &e, start.elapsed())
            }
        }
    }

    async fn run_conversion(
        &self,
        request: &ConversionRequest,
        cancel: &CancelToken,
    ) -> Result<ConversionOutcome, ConvertError> {
        cancel.check()?;

        let texture_type = request
            .texture_type
            .unwrap_or_else(|| self.type_resolver.detect(&request.input));
        let source = load_source(&request.input, texture_type)?;

        let mut profile = request
            .profile
            .unwrap_or_else(|| MipGenerationProfile::for_texture_type(texture_type));
        if let Some(min) = request.min_mip_size {
            profile.min_mip_size = min;
        }
        let mut chain = generate_mipmaps(&source.pixels, &profile)?;
        cancel.check()?;

        // Optional Toksvig pass: specular types only, and a resolution
        // failure downgrades to the uncorrected chain.
        let mut toksvig_applied = false;
        let mut normal_map_used = None;
        let mut variance_chain = None;
        if texture_type.is_specular() && request.toksvig.enabled {
            match self.toksvig_pass(&request.input, &request.toksvig, texture_type, &chain) {
                Some((corrected, variance, normal_path)) => {
                    chain = corrected;
                    variance_chain = variance;
                    toksvig_applied = true;
                    normal_map_used = Some(normal_path);
                }
                None => {
                    debug!(
                        "no usable normal map for {}, proceeding uncorrected",
                        request.input.display()
                    );
                }
            }
        }
        cancel.check()?;

        // Serialize levels 0..N in strict order; the encoder contract is
        // positional.
        let scratch = ScratchDir::new(&self.scratch_root)?;
        let base = file_base_name(&request.input);
        let level_paths = write_levels(&chain, scratch.path(), &base, cancel)?;

        cancel.check()?;
        self.encoder
            .encode(&level_paths, &request.output, &request.compression, cancel)
            .await?;

        if request.keep_debug_mips {
            let stage = if toksvig_applied { "_gloss" } else { "" };
            retain_debug_mips(&request.input, &level_paths, stage);
            if let Some(variance) = &variance_chain {
                retain_debug_chain(&request.input, variance, &base, "_toksvig_variance");
            }
        }

        info!(
            "converted {} -> {} ({} levels{})",
            request.input.display(),
            request.output.display(),
            chain.len(),
            if toksvig_applied { ", toksvig" } else { "" }
        );

        Ok(ConversionOutcome {
            mip_levels: chain.len(),
            toksvig_applied,
            normal_map: normal_map_used,
        })
        // `scratch` drops here: the per-call directory is deleted on every
        // exit path, including the ? returns above.
    }

    /// Resolve and apply the Toksvig correction. None means "not possible";
    /// the caller proceeds uncorrected.
    fn toksvig_pass(
        &self,
        input: &Path,
        settings: &ToksvigSettings,
        texture_type: TextureType,
        chain: &MipChain,
    ) -> Option<(MipChain, Option<MipChain>, PathBuf)> {
        let normal_path = settings
            .normal_map_path
            .clone()
            .or_else(|| self.normal_resolver.resolve(input))?;

        let kind = match texture_type {
            TextureType::Roughness => SpecularKind::Roughness,
            _ => SpecularKind::Gloss,
        };

        match load_source(&normal_path, TextureType::Normal)
            .and_then(|normal| apply_toksvig(chain, &normal.pixels, settings, kind))
        {
            Ok(output) => Some((output.chain, output.variance, normal_path)),
            Err(e) => {
                warn!(
                    "toksvig pass failed for {} ({e}), proceeding uncorrected",
                    input.display()
                );
                None
            }
        }
    }

    /// Convert an already packed composite chain: serialize and encode it.
    ///
    /// Packing failures (`ConvertError::Computation`) surface in the result;
    /// callers fall back to converting the configured channels as
    /// independent textures instead of aborting their batch.
    pub async fn convert_packed(
        &self,
        settings: &ChannelPackingSettings,
        output: &Path,
        compression: &CompressionSettings,
        keep_debug_mips: bool,
        cancel: &CancelToken,
    ) -> ConversionResult {
        let start = Instant::now();
        let input = settings
            .slots
            .iter()
            .flatten()
            .next()
            .map(|s| s.source_path.clone())
            .unwrap_or_default();

        let result: Result<usize, ConvertError> = async {
            cancel.check()?;
            let packed = pack_channels(settings, self.normal_resolver.as_ref()).await?;
            cancel.check()?;

            let scratch = ScratchDir::new(&self.scratch_root)?;
            let base = file_base_name(output);
            let level_paths = write_levels(&packed, scratch.path(), &base, cancel)?;

            cancel.check()?;
            self.encoder
                .encode(&level_paths, output, compression, cancel)
                .await?;

            if keep_debug_mips {
                retain_debug_mips(&input, &level_paths, "_composite");
            }
            Ok(packed.len())
        }
        .await;

        match result {
            Ok(mip_levels) => ConversionResult {
                input,
                success: true,
                error: None,
                mip_levels,
                toksvig_applied: settings.toksvig.enabled,
                normal_map: settings.toksvig.normal_map_path.clone(),
                duration: start.elapsed(),
            },
            Err(e) => {
                warn!("packed conversion failed: {e}");
                remove_partial_output(output);
                ConversionResult::failure(input, &e, start.elapsed())
            }
        }
    }

    /// Run many conversions with bounded concurrency.
    ///
    /// One texture's failure never blocks or corrupts sibling conversions;
    /// the report enumerates each failure's cause.
    pub async fn convert_batch(
        self: &Arc<Self>,
        requests: Vec<ConversionRequest>,
        concurrency: usize,
        cancel: &CancelToken,
    ) -> BatchReport {
        let started = Utc::now();
        let total = requests.len();
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

        let progress = ProgressBar::new(total as u64);
        progress.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
                .expect("static progress template"),
        );

        info!("converting {} textures ({} concurrent)", total, concurrency);

        // Kept so a panicked task can still be attributed to its input.
        let inputs: Vec<PathBuf> = requests.iter().map(|r| r.input.clone()).collect();

        let mut tasks = JoinSet::new();
        for (index, request) in requests.into_iter().enumerate() {
            let pipeline = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = pipeline.convert_texture(&request, &cancel).await;
                (index, result)
            });
        }

        let mut indexed: Vec<(usize, ConversionResult)> = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    progress.inc(1);
                    if !result.success {
                        progress.set_message(format!("failed: {}", result.input.display()));
                    }
                    indexed.push((index, result));
                }
                Err(e) => {
                    progress.inc(1);
                    warn!("conversion task panicked: {e}");
                }
            }
        }
        progress.finish_and_clear();

        // A panicked task never reported a result; the report still carries
        // one entry per request.
        for (index, input) in inputs.iter().enumerate() {
            if !indexed.iter().any(|(i, _)| *i == index) {
                indexed.push((
                    index,
                    ConversionResult {
                        input: input.clone(),
                        success: false,
                        error: Some("conversion task panicked".into()),
                        mip_levels: 0,
                        toksvig_applied: false,
                        normal_map: None,
                        duration: Duration::ZERO,
                    },
                ));
            }
        }

        indexed.sort_by_key(|(index, _)| *index);
        let results: Vec<ConversionResult> = indexed.into_iter().map(|(_, r)| r).collect();

        let report = BatchReport { started, results };
        info!(
            "batch complete: {}/{} succeeded",
            report.success_count(),
            total
        );
        report
    }
}

/// `{stem}` of the input, used for scratch file naming.
fn file_base_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "texture".to_string())
}

/// Serialize every chain level as `{base}_mip{N}.png`, in index order.
fn write_levels(
    chain: &MipChain,
    scratch: &Path,
    base: &str,
    cancel: &CancelToken,
) -> Result<Vec<PathBuf>, ConvertError> {
    let mut paths = Vec::with_capacity(chain.len());
    for (i, level) in chain.iter().enumerate() {
        cancel.check()?;
        let path = scratch.join(format!("{base}_mip{i}.png"));
        level
            .to_rgba8()
            .save(&path)
            .map_err(|e| ConvertError::Encoding(format!("failed to write scratch level {i}: {e}")))?;
        paths.push(path);
    }
    Ok(paths)
}

/// Copy scratch levels into a `mipmaps/` directory next to the source, with
/// a stage tag in the filename. Best-effort: failures only log.
fn retain_debug_mips(input: &Path, level_paths: &[PathBuf], stage: &str) {
    let Some(parent) = input.parent() else { return };
    let debug_dir = parent.join("mipmaps");
    if let Err(e) = std::fs::create_dir_all(&debug_dir) {
        warn!("could not create debug mip directory: {e}");
        return;
    }
    for path in level_paths {
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let target = debug_dir.join(format!("{name}{stage}.png"));
        if let Err(e) = std::fs::copy(path, &target) {
            warn!("debug mip copy failed for {}: {e}", path.display());
        }
    }
}

/// Write an in-memory diagnostic chain into the debug directory.
fn retain_debug_chain(input: &Path, chain: &MipChain, base: &str, stage: &str) {
    let Some(parent) = input.parent() else { return };
    let debug_dir = parent.join("mipmaps");
    if let Err(e) = std::fs::create_dir_all(&debug_dir) {
        warn!("could not create debug mip directory: {e}");
        return;
    }
    for (i, level) in chain.iter().enumerate() {
        let target = debug_dir.join(format!("{base}_mip{i}{stage}.png"));
        if let Err(e) = level.to_rgba8().save(&target) {
            warn!("debug chain write failed for level {i}: {e}");
        }
    }
}

/// A failed conversion must not leave a partial container behind.
fn remove_partial_output(output: &Path) {
    if output.exists() {
        if let Err(e) = std::fs::remove_file(output) {
            warn!("could not remove partial output {}: {e}", output.display());
        }
    }
}
