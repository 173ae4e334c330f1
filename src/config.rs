//! Run configuration, loadable from a JSON file.
//!
//! Every field has a default, so `{}` is a valid configuration and matches the
//! zero-argument behaviour of the binary: read `images/`, run the channels-last
//! Keras ResNet50 export `resnet50_notop.onnx` with global max pooling, write
//! `embeddings.pkl` and `filenames.pkl` to the working directory.
//!
//! ```json
//! {
//!   "input_dir": "wardrobe",
//!   "output": { "embeddings": "out/embeddings.pkl", "filenames": "out/filenames.pkl" },
//!   "format": "bincode",
//!   "extractor": { "onnx_file": "models/resnet50_notop.onnx", "layout": "nhwc", "pooling": "max" }
//! }
//! ```
//!
//! Setting `"model": "resnet50"` switches to the hosted hub model instead. That
//! graph pools internally with a global average, so it also needs `"pooling": "mean"`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    feature_extractor::{
        ExtractorInitOptionsUserDefined, FeatureExtractor, PreprocessorConfig,
        UserDefinedExtractorModel, DEFAULT_INPUT_SIZE,
    },
    get_cache_dir, read_file_to_bytes, ExtractorModel, OutputFormat, OutputPaths, Pooling,
    TensorLayout,
};

pub const DEFAULT_INPUT_DIR: &str = "images";

/// `tf.keras.applications.ResNet50(include_top=False)` exported to ONNX
pub const DEFAULT_ONNX_FILE: &str = "resnet50_notop.onnx";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub input_dir: PathBuf,
    pub output: OutputPaths,
    pub format: OutputFormat,
    pub extractor: ExtractorConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from(DEFAULT_INPUT_DIR),
            output: OutputPaths::default(),
            format: OutputFormat::default(),
            extractor: ExtractorConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn with_input_dir(mut self, input_dir: PathBuf) -> Self {
        self.input_dir = input_dir;
        self
    }

    pub fn with_output(mut self, output: OutputPaths) -> Self {
        self.output = output;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

/// Which model to load and how to post-process its output.
///
/// With `model` unset, the local `onnx_file` is loaded and preprocessed per
/// `preprocessor_file` or, without one, with the Keras caffe convention at
/// `input_size`. With `model` set, the hosted model is downloaded instead and
/// the local file settings are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub model: Option<ExtractorModel>,
    pub cache_dir: PathBuf,
    pub show_download_progress: bool,
    pub onnx_file: PathBuf,
    pub preprocessor_file: Option<PathBuf>,
    pub input_size: (u32, u32),
    pub layout: TensorLayout,
    pub pooling: Pooling,
    pub normalize: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            model: None,
            cache_dir: get_cache_dir().into(),
            show_download_progress: true,
            onnx_file: PathBuf::from(DEFAULT_ONNX_FILE),
            preprocessor_file: None,
            input_size: DEFAULT_INPUT_SIZE,
            layout: TensorLayout::Nhwc,
            pooling: Pooling::default(),
            normalize: false,
        }
    }
}

impl ExtractorConfig {
    /// Loads the configured model.
    pub fn build(&self) -> Result<FeatureExtractor> {
        match &self.model {
            Some(model) => self.build_hosted(model),
            None => self.build_local(),
        }
    }

    fn build_local(&self) -> Result<FeatureExtractor> {
        let onnx_file = &self.onnx_file;
        let preprocessor = match &self.preprocessor_file {
            Some(file) => PreprocessorConfig::Json(read_file_to_bytes(file)?),
            None => PreprocessorConfig::KerasCaffe {
                size: self.input_size,
            },
        };
        let model = UserDefinedExtractorModel::new(read_file_to_bytes(onnx_file)?, preprocessor)
            .with_layout(self.layout);
        let options = ExtractorInitOptionsUserDefined::new()
            .with_pooling(self.pooling)
            .with_normalize(self.normalize);
        FeatureExtractor::try_new_from_user_defined(model, options)
            .with_context(|| format!("Failed to load model {}", onnx_file.display()))
    }

    #[cfg(feature = "online")]
    fn build_hosted(&self, model: &ExtractorModel) -> Result<FeatureExtractor> {
        let options = crate::ExtractorInitOptions::new(model.clone())
            .with_cache_dir(self.cache_dir.clone())
            .with_show_download_progress(self.show_download_progress)
            .with_pooling(self.pooling)
            .with_normalize(self.normalize);
        FeatureExtractor::try_new(options)
            .with_context(|| format!("Failed to load model {}", model))
    }

    #[cfg(not(feature = "online"))]
    fn build_hosted(&self, model: &ExtractorModel) -> Result<FeatureExtractor> {
        anyhow::bail!(
            "Hosted model {} needs the `online` feature; unset `model` to use a local ONNX file",
            model
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_is_the_default_run() {
        let config: RunConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.input_dir, PathBuf::from("images"));
        assert_eq!(config.output.embeddings, PathBuf::from("embeddings.pkl"));
        assert_eq!(config.output.filenames, PathBuf::from("filenames.pkl"));
        assert_eq!(config.format, OutputFormat::Bincode);
        assert_eq!(config.extractor.model, None);
        assert_eq!(config.extractor.onnx_file, PathBuf::from(DEFAULT_ONNX_FILE));
        assert_eq!(config.extractor.layout, TensorLayout::Nhwc);
        assert_eq!(config.extractor.pooling, Pooling::Max);
        assert_eq!(config.extractor.input_size, (224, 224));
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config: RunConfig = serde_json::from_str(
            r#"{
                "input_dir": "wardrobe",
                "format": "json",
                "output": { "filenames": "names.json" },
                "extractor": { "layout": "nchw", "onnx_file": "resnet.onnx" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.input_dir, PathBuf::from("wardrobe"));
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.output.embeddings, PathBuf::from("embeddings.pkl"));
        assert_eq!(config.output.filenames, PathBuf::from("names.json"));
        assert_eq!(config.extractor.layout, TensorLayout::Nchw);
        assert_eq!(config.extractor.onnx_file, PathBuf::from("resnet.onnx"));
        assert_eq!(config.extractor.pooling, Pooling::Max);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunConfig::from_file(dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn missing_local_model_fails_to_build() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExtractorConfig {
            onnx_file: dir.path().join("missing.onnx"),
            ..Default::default()
        };
        assert!(config.build().is_err());
    }

    #[test]
    fn hosted_model_is_named_by_variant() {
        let config: RunConfig =
            serde_json::from_str(r#"{ "extractor": { "model": "Resnet50", "pooling": "mean" } }"#)
                .unwrap();
        assert_eq!(config.extractor.model, Some(ExtractorModel::Resnet50));
        assert_eq!(config.extractor.pooling, Pooling::Mean);
    }

    #[cfg(feature = "online")]
    #[test]
    fn hosted_model_refuses_max_pooling() {
        let cache = tempfile::tempdir().unwrap();
        let config = ExtractorConfig {
            model: Some(ExtractorModel::Resnet50),
            cache_dir: cache.path().to_path_buf(),
            show_download_progress: false,
            pooling: Pooling::Max,
            ..Default::default()
        };

        // rejected before anything is downloaded
        let err = config.build().err().unwrap();
        assert!(format!("{:#}", err).contains("global mean pooling"));
        assert!(std::fs::read_dir(cache.path()).unwrap().next().is_none());
    }
}
