use crate::{pooling::Pooling, TensorLayout};

/// Data struct about the available models
#[derive(Debug, Clone)]
pub struct ModelInfo<T> {
    pub model: T,
    /// Length of the pooled feature vector
    pub dim: usize,
    pub description: String,
    pub model_code: String,
    pub model_file: String,
    pub layout: TensorLayout,
    /// Global pooling the graph already applies to its output, `None` for a feature map
    pub output_pooling: Option<Pooling>,
}
