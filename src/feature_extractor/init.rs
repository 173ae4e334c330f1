use std::path::PathBuf;

use ort::{execution_providers::ExecutionProviderDispatch, session::Session};

use crate::{get_cache_dir, pooling::Pooling, TensorLayout};

use super::{transform::Compose, DEFAULT_EXTRACTOR_MODEL, DEFAULT_INPUT_SIZE};
use crate::models::feature_extractor::ExtractorModel;

/// Options for initializing a hosted [FeatureExtractor] model
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ExtractorInitOptions {
    pub model_name: ExtractorModel,
    pub execution_providers: Vec<ExecutionProviderDispatch>,
    pub cache_dir: PathBuf,
    pub show_download_progress: bool,
    pub pooling: Pooling,
    pub normalize: bool,
}

impl Default for ExtractorInitOptions {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_EXTRACTOR_MODEL,
            execution_providers: Default::default(),
            cache_dir: get_cache_dir().into(),
            show_download_progress: true,
            pooling: Pooling::default(),
            normalize: false,
        }
    }
}

impl ExtractorInitOptions {
    /// Create new options for the given model
    pub fn new(model_name: ExtractorModel) -> Self {
        Self {
            model_name,
            ..Default::default()
        }
    }

    /// Set the cache directory for the model files
    pub fn with_cache_dir(mut self, cache_dir: PathBuf) -> Self {
        self.cache_dir = cache_dir;
        self
    }

    /// Set the execution providers for the model
    pub fn with_execution_providers(
        mut self,
        execution_providers: Vec<ExecutionProviderDispatch>,
    ) -> Self {
        self.execution_providers = execution_providers;
        self
    }

    /// Set whether to show download progress
    pub fn with_show_download_progress(mut self, show_download_progress: bool) -> Self {
        self.show_download_progress = show_download_progress;
        self
    }

    /// Set the reduction applied to 4D feature maps
    pub fn with_pooling(mut self, pooling: Pooling) -> Self {
        self.pooling = pooling;
        self
    }

    /// L2-normalize every vector
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }
}

/// Options for initializing a [UserDefinedExtractorModel]
///
/// Model files are held by the UserDefinedExtractorModel struct
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct ExtractorInitOptionsUserDefined {
    pub execution_providers: Vec<ExecutionProviderDispatch>,
    pub pooling: Pooling,
    pub normalize: bool,
}

impl ExtractorInitOptionsUserDefined {
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the execution providers for the model
    pub fn with_execution_providers(
        mut self,
        execution_providers: Vec<ExecutionProviderDispatch>,
    ) -> Self {
        self.execution_providers = execution_providers;
        self
    }

    /// Set the reduction applied to 4D feature maps
    pub fn with_pooling(mut self, pooling: Pooling) -> Self {
        self.pooling = pooling;
        self
    }

    /// L2-normalize every vector
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }
}

/// Convert ExtractorInitOptions to ExtractorInitOptionsUserDefined
///
/// Lets a local copy of a hosted model reuse the same options.
impl From<ExtractorInitOptions> for ExtractorInitOptionsUserDefined {
    fn from(options: ExtractorInitOptions) -> Self {
        ExtractorInitOptionsUserDefined {
            execution_providers: options.execution_providers,
            pooling: options.pooling,
            normalize: options.normalize,
        }
    }
}

/// How images are turned into model input for a user defined model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreprocessorConfig {
    /// Bytes of a Hugging Face style `preprocessor_config.json`
    Json(Vec<u8>),
    /// Keras ResNet "caffe" convention at the given (width, height)
    KerasCaffe { size: (u32, u32) },
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        PreprocessorConfig::KerasCaffe {
            size: DEFAULT_INPUT_SIZE,
        }
    }
}

impl PreprocessorConfig {
    pub(crate) fn build(&self) -> anyhow::Result<Compose> {
        match self {
            PreprocessorConfig::Json(bytes) => Compose::from_bytes(bytes),
            PreprocessorConfig::KerasCaffe { size } => Ok(Compose::keras_caffe(*size)),
        }
    }
}

/// Struct for "bring your own" extractor models
///
/// The onnx_file is expecting the file's bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDefinedExtractorModel {
    pub onnx_file: Vec<u8>,
    pub preprocessor: PreprocessorConfig,
    pub layout: TensorLayout,
    /// Pooling the graph applies itself, for models whose output is already `N×C`
    pub output_pooling: Option<Pooling>,
}

impl UserDefinedExtractorModel {
    pub fn new(onnx_file: Vec<u8>, preprocessor: PreprocessorConfig) -> Self {
        Self {
            onnx_file,
            preprocessor,
            layout: TensorLayout::default(),
            output_pooling: None,
        }
    }

    /// Set the tensor layout the model consumes and produces
    pub fn with_layout(mut self, layout: TensorLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Declare that the graph ends in its own global pooling
    pub fn with_output_pooling(mut self, pooling: Pooling) -> Self {
        self.output_pooling = Some(pooling);
        self
    }
}

/// Rust representation of the feature extraction model
pub struct FeatureExtractor {
    pub(crate) preprocessor: Compose,
    pub(crate) session: Session,
    pub(crate) layout: TensorLayout,
    pub(crate) pooling: Pooling,
    pub(crate) output_pooling: Option<Pooling>,
    pub(crate) normalize: bool,
}
