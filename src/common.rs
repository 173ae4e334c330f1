use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::{fmt::Display, fs::File, path::Path, str::FromStr};

pub const DEFAULT_CACHE_DIR: &str = ".outfit_embed_cache";

/// Environment variable that overrides [DEFAULT_CACHE_DIR]
pub const CACHE_DIR_ENV: &str = "OUTFIT_EMBED_CACHE_PATH";

/// Type alias for the feature vector
pub type Embedding = Vec<f32>;

/// Returns the model cache directory, honouring `OUTFIT_EMBED_CACHE_PATH`.
pub fn get_cache_dir() -> String {
    std::env::var(CACHE_DIR_ENV).unwrap_or_else(|_| DEFAULT_CACHE_DIR.into())
}

/// Memory layout of the image tensor a model consumes and of the feature map it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// Channels first, `N×C×H×W`. PyTorch and most hub exports.
    #[default]
    Nchw,
    /// Channels last, `N×H×W×C`. Keras exports.
    Nhwc,
}

impl Display for TensorLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TensorLayout::Nchw => write!(f, "nchw"),
            TensorLayout::Nhwc => write!(f, "nhwc"),
        }
    }
}

impl FromStr for TensorLayout {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nchw" => Ok(TensorLayout::Nchw),
            "nhwc" => Ok(TensorLayout::Nhwc),
            other => Err(format!("unknown tensor layout `{other}`, expected nchw or nhwc")),
        }
    }
}

/// L2-normalizes a vector
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = (v.iter().map(|val| val * val).sum::<f32>()).sqrt();
    let epsilon = 1e-12;

    // epsilon keeps an all-zero vector finite
    v.iter().map(|&val| val / (norm + epsilon)).collect()
}

/// Read a whole file to bytes.
///
/// Used to assemble a [UserDefinedExtractorModel](crate::UserDefinedExtractorModel) from local files.
pub fn read_file_to_bytes<P: AsRef<Path>>(file: P) -> Result<Vec<u8>> {
    let path = file.as_ref();
    let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let file_size = file.metadata()?.len() as usize;
    let mut buffer = Vec::with_capacity(file_size);
    file.read_to_end(&mut buffer)?;
    Ok(buffer)
}
