//! Pretrained convolutional feature extractor, containing the main struct
//! [FeatureExtractor] and its initialization options.

use std::path::Path;

use crate::{models::feature_extractor::ExtractorModel, Embedding};

const DEFAULT_BATCH_SIZE: usize = 32;
const DEFAULT_EXTRACTOR_MODEL: ExtractorModel = ExtractorModel::Resnet50;

/// Input size of the ImageNet ResNet family, (width, height)
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (224, 224);

// Image decoding and preprocessing pipelines.
pub mod transform;

// Initialization options.
mod init;
pub use init::*;

// The implementation of the extractor.
mod r#impl;

/// Anything that turns one image file into one feature vector.
pub trait ExtractFeatures {
    fn extract_file(&mut self, path: &Path) -> anyhow::Result<Embedding>;
}
