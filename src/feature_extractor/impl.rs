#[cfg(feature = "online")]
use hf_hub::{
    api::sync::{ApiBuilder, ApiRepo},
    Cache,
};
use image::DynamicImage;
use ndarray::{Array2, Array3, ArrayView3, Axis};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
#[cfg(feature = "online")]
use std::path::PathBuf;
use std::{path::Path, thread::available_parallelism};
use tracing::{debug, info};

use crate::{
    common::normalize,
    models::feature_extractor::{models_list, ExtractorModel},
    pooling::{global_pool_dyn, Pooling},
    Embedding, ModelInfo, TensorLayout,
};
use anyhow::{anyhow, Result};
#[cfg(feature = "online")]
use anyhow::Context;

#[cfg(feature = "online")]
use super::{transform::Compose, ExtractorInitOptions};
use super::{
    init::{ExtractorInitOptionsUserDefined, UserDefinedExtractorModel},
    transform::open_image,
    ExtractFeatures, FeatureExtractor, DEFAULT_BATCH_SIZE,
};

/// Output names tried, in order, when the graph has more than one output
const KNOWN_OUTPUT_KEYS: [&str; 3] = ["pooled", "image_embeds", "last_hidden_state"];

impl FeatureExtractor {
    /// Try to generate a new FeatureExtractor instance from a hosted model
    ///
    /// Uses the highest level of Graph optimization
    ///
    /// Uses the total number of CPUs available as the number of intra-threads
    #[cfg(feature = "online")]
    pub fn try_new(options: ExtractorInitOptions) -> Result<Self> {
        let ExtractorInitOptions {
            model_name,
            execution_providers,
            cache_dir,
            show_download_progress,
            pooling,
            normalize,
        } = options;

        let threads = available_parallelism()?.get();
        let model_info = FeatureExtractor::get_model_info(&model_name)?;
        if let Some(graph_pooling) = model_info.output_pooling {
            if graph_pooling != pooling {
                return Err(anyhow!(
                    "{} ends in global {} pooling and cannot produce {} pooled vectors; \
                     use {} pooling or a feature-map model",
                    model_name,
                    graph_pooling,
                    pooling,
                    graph_pooling
                ));
            }
        }
        info!(model = %model_name, cache_dir = %cache_dir.display(), "loading feature extractor");

        let model_repo =
            FeatureExtractor::retrieve_model(model_name, cache_dir, show_download_progress)?;

        let preprocessor_file = model_repo
            .get("preprocessor_config.json")
            .context("Failed to retrieve preprocessor_config.json")?;
        let preprocessor = Compose::from_file(preprocessor_file)?;

        let model_file_reference = model_repo
            .get(&model_info.model_file)
            .context(format!("Failed to retrieve {}", model_info.model_file))?;

        let session = Session::builder()?
            .with_execution_providers(execution_providers)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads)?
            .commit_from_file(model_file_reference)?;

        Ok(Self::new(
            preprocessor,
            session,
            model_info.layout,
            pooling,
            model_info.output_pooling,
            normalize,
        ))
    }

    /// Create a FeatureExtractor instance from model files provided by the user.
    ///
    /// This is how a Keras-exported ResNet50 (channels last, caffe preprocessing) is loaded
    pub fn try_new_from_user_defined(
        model: UserDefinedExtractorModel,
        options: ExtractorInitOptionsUserDefined,
    ) -> Result<Self> {
        let ExtractorInitOptionsUserDefined {
            execution_providers,
            pooling,
            normalize,
        } = options;

        let threads = available_parallelism()?.get();

        let preprocessor = model.preprocessor.build()?;

        let session = Session::builder()?
            .with_execution_providers(execution_providers)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads)?
            .commit_from_memory(&model.onnx_file)?;

        Ok(Self::new(
            preprocessor,
            session,
            model.layout,
            pooling,
            model.output_pooling,
            normalize,
        ))
    }

    fn new(
        preprocessor: super::transform::Compose,
        session: Session,
        layout: TensorLayout,
        pooling: Pooling,
        output_pooling: Option<Pooling>,
        normalize: bool,
    ) -> Self {
        Self {
            preprocessor,
            session,
            layout,
            pooling,
            output_pooling,
            normalize,
        }
    }

    /// Return the model's directory from cache or remote retrieval
    #[cfg(feature = "online")]
    fn retrieve_model(
        model: ExtractorModel,
        cache_dir: PathBuf,
        show_download_progress: bool,
    ) -> Result<ApiRepo> {
        let cache = Cache::new(cache_dir);
        let api = ApiBuilder::from_cache(cache)
            .with_progress(show_download_progress)
            .build()?;

        let repo = api.model(model.to_string());
        Ok(repo)
    }

    /// Retrieve a list of supported models
    pub fn list_supported_models() -> Vec<ModelInfo<ExtractorModel>> {
        models_list()
    }

    /// Get ModelInfo from ExtractorModel
    pub fn get_model_info(model: &ExtractorModel) -> Result<ModelInfo<ExtractorModel>> {
        FeatureExtractor::list_supported_models()
            .into_iter()
            .find(|m| &m.model == model)
            .ok_or_else(|| anyhow!("Model {:?} not found", model))
    }

    /// Generate feature vectors for a Vec of image paths
    ///
    /// Unlike the batch runner, a single unreadable image fails the whole call
    // Generic type to accept String, &str, OsString, &OsStr, PathBuf
    pub fn extract<S: AsRef<Path>>(
        &self,
        images: Vec<S>,
        batch_size: Option<usize>,
    ) -> Result<Vec<Embedding>> {
        let batch_size = batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1);

        let mut output = Vec::with_capacity(images.len());
        for batch in images.chunks(batch_size) {
            let inputs = batch
                .iter()
                .map(|path| self.preprocessor.to_array(open_image(path)?))
                .collect::<Result<Vec<Array3<f32>>>>()?;
            output.extend(self.run_batch(inputs)?);
        }
        Ok(output)
    }

    /// Feature vector for one decoded image
    pub fn extract_image(&self, image: DynamicImage) -> Result<Embedding> {
        let pixels = self.preprocessor.to_array(image)?;
        self.run_batch(vec![pixels])?
            .pop()
            .ok_or_else(|| anyhow!("Model returned no feature vector"))
    }

    fn run_batch(&self, inputs: Vec<Array3<f32>>) -> Result<Vec<Embedding>> {
        let views: Vec<ArrayView3<f32>> = inputs.iter().map(|img| img.view()).collect();
        // N×C×H×W
        let mut pixel_values = ndarray::stack(Axis(0), &views)?;
        if self.layout == TensorLayout::Nhwc {
            pixel_values = pixel_values
                .permuted_axes([0, 2, 3, 1])
                .as_standard_layout()
                .into_owned();
        }

        let input_name = self.session.inputs[0].name.clone();
        let session_inputs = ort::inputs![
            input_name => Value::from_array(pixel_values)?,
        ]?;

        let outputs = self.session.run(session_inputs)?;

        let output_keys: Vec<String> = match outputs.len() {
            1 => outputs.keys().map(|key| key.to_string()).collect(),
            _ => KNOWN_OUTPUT_KEYS.iter().map(|key| key.to_string()).collect(),
        };
        let output_data = output_keys
            .iter()
            .find_map(|key| {
                outputs
                    .get(key.as_str())
                    .and_then(|v| v.try_extract_tensor::<f32>().ok())
            })
            .ok_or_else(|| anyhow!("Could not extract tensor from any known output key"))?;
        let shape = output_data.shape().to_vec();
        debug!(?shape, "model output");

        let pooled: Array2<f32> = match shape.len() {
            // feature map, batch × channels × spatial
            4 => global_pool_dyn(&output_data, self.layout, self.pooling)?,
            // pooled inside the graph
            2 => match self.output_pooling {
                Some(graph_pooling) if graph_pooling == self.pooling => {
                    output_data.into_dimensionality::<ndarray::Ix2>()?.to_owned()
                }
                Some(graph_pooling) => {
                    return Err(anyhow!(
                        "Model output is already {} pooled, cannot apply {} pooling",
                        graph_pooling,
                        self.pooling
                    ))
                }
                None => {
                    return Err(anyhow!(
                        "Model returned pooled output {:?} but its pooling is undeclared; \
                         {} pooling needs a feature map",
                        shape,
                        self.pooling
                    ))
                }
            },
            _ => return Err(anyhow!("Unexpected output tensor shape: {:?}", shape)),
        };

        if pooled.nrows() != inputs.len() {
            return Err(anyhow!(
                "Model returned {} feature vectors for {} images",
                pooled.nrows(),
                inputs.len()
            ));
        }

        let embeddings = pooled
            .rows()
            .into_iter()
            .map(|row| {
                let row = row.to_vec();
                if self.normalize {
                    normalize(&row)
                } else {
                    row
                }
            })
            .collect();
        Ok(embeddings)
    }
}

impl ExtractFeatures for FeatureExtractor {
    fn extract_file(&mut self, path: &Path) -> Result<Embedding> {
        self.extract_image(open_image(path)?)
    }
}
