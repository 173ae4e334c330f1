//! outfit-embed - offline feature extraction for outfit similarity search.
//!
//! Every image in a directory is run through a pretrained convolutional
//! network (ResNet50 without its classification head, global max pooled), and
//! the resulting vectors are written next to the file names they belong to.
//! A recommender can then load both lists and look up visually similar items.
//!
//! ### Extracting a directory
//! ```no_run
//! use outfit_embed::{run, RunConfig};
//!
//!# fn extract_demo() -> anyhow::Result<()> {
//! // Runs ./resnet50_notop.onnx over ./images,
//! // writes ./embeddings.pkl and ./filenames.pkl
//! let output = run(&RunConfig::default())?;
//!
//! println!("{} images, {} skipped", output.store.len(), output.skipped.len());
//! # Ok(())
//! # }
//! ```
//!
//! ### Using the extractor directly
//! ```no_run
//! use outfit_embed::{ExtractorInitOptions, ExtractorModel, FeatureExtractor, Pooling};
//!
//!# fn model_demo() -> anyhow::Result<()> {
//! // The hosted export pools inside the graph with a global average
//! let extractor = FeatureExtractor::try_new(
//!     ExtractorInitOptions::new(ExtractorModel::Resnet50)
//!         .with_pooling(Pooling::Mean)
//!         .with_show_download_progress(false),
//! )?;
//!
//! let vectors = extractor.extract(vec!["images/red-dress.jpg", "images/blue-jeans.jpg"], None)?;
//! assert_eq!(vectors[0].len(), 2048);
//! # Ok(())
//! # }
//! ```
//!
//! ### Loading the artifacts
//! ```no_run
//! use outfit_embed::{FeatureStore, OutputFormat, OutputPaths};
//!
//!# fn store_demo() -> anyhow::Result<()> {
//! let store = FeatureStore::load(&OutputPaths::default(), OutputFormat::Bincode)?;
//! let query = store.embeddings()[0].clone();
//! for (filename, distance) in store.nearest(&query, 5)? {
//!     println!("{filename}: {distance}");
//! }
//! # Ok(())
//! # }
//! ```

mod batch;
mod common;
mod config;
pub mod feature_extractor;
mod models;
pub mod pooling;
mod store;

pub use ort::execution_providers::ExecutionProviderDispatch;

pub use crate::batch::{extract_directory, run, run_with, BatchOutput, SkippedImage};
pub use crate::common::{
    get_cache_dir, normalize, read_file_to_bytes, Embedding, TensorLayout, CACHE_DIR_ENV,
    DEFAULT_CACHE_DIR,
};
pub use crate::config::{ExtractorConfig, RunConfig, DEFAULT_INPUT_DIR, DEFAULT_ONNX_FILE};
pub use crate::feature_extractor::{
    ExtractFeatures, ExtractorInitOptions, ExtractorInitOptionsUserDefined, FeatureExtractor,
    PreprocessorConfig, UserDefinedExtractorModel,
};
pub use crate::models::{feature_extractor::ExtractorModel, model_info::ModelInfo};
pub use crate::pooling::Pooling;
pub use crate::store::{
    FeatureStore, OutputFormat, OutputPaths, DEFAULT_EMBEDDINGS_FILE, DEFAULT_FILENAMES_FILE,
};
