//! mipforge - texture conversion engine for real-time 3D pipelines.
//!
//! Builds correct mipmap pyramids, applies Toksvig specular-variance
//! correction so micro-detail loss doesn't alias in shaders, packs
//! independent single-channel maps into one ORM-style texture, and drives an
//! external KTX2 encoder to produce the compressed container.

pub mod cancel;
pub mod encoder;
pub mod error;
pub mod mips;
pub mod packing;
pub mod pipeline;
pub mod resolver;
pub mod texture;
pub mod toksvig;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use encoder::{CompressionSettings, MipEncoder, Supercompression, TargetFormat, ToktxEncoder};
pub use error::ConvertError;
pub use mips::{generate_mipmaps, FilterKind, MipChain, MipGenerationProfile};
pub use packing::{
    determine_packing_mode, pack_channels, ChannelPackingSettings, ChannelSourceSettings,
    PackedMipChain, PackingMode,
};
pub use pipeline::{
    BatchReport, ConversionRequest, ConversionResult, ScratchDir, TextureConversionPipeline,
};
pub use resolver::{
    FilenameNormalMapResolver, NormalMapResolver, SuffixTextureTypeResolver, TextureTypeResolver,
};
pub use texture::{load_source, PixelBuffer, SourceImage, TextureType};
pub use toksvig::{apply_toksvig, SpecularKind, ToksvigSettings};
