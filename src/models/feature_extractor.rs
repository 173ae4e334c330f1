use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use super::model_info::ModelInfo;
use crate::{pooling::Pooling, TensorLayout};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExtractorModel {
    /// Qdrant/resnet50-onnx
    #[default]
    Resnet50,
}

pub fn models_list() -> Vec<ModelInfo<ExtractorModel>> {
    vec![ModelInfo {
        model: ExtractorModel::Resnet50,
        dim: 2048,
        description: String::from("ResNet-50 from `Deep Residual Learning for Image Recognition <https://arxiv.org/abs/1512.03385>`__, ImageNet weights, classification head removed after the global average pool."),
        model_code: String::from("Qdrant/resnet50-onnx"),
        model_file: String::from("model.onnx"),
        layout: TensorLayout::Nchw,
        // the hub export ends in ResNet's own average pool
        output_pooling: Some(Pooling::Mean),
    }]
}

impl Display for ExtractorModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match models_list().into_iter().find(|model| model.model == *self) {
            Some(model_info) => write!(f, "{}", model_info.model_code),
            None => write!(f, "{:?}", self),
        }
    }
}

impl FromStr for ExtractorModel {
    type Err = String;

    /// Accepts either the variant name or the hub repository id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        models_list()
            .into_iter()
            .find(|info| {
                info.model_code.eq_ignore_ascii_case(s)
                    || format!("{:?}", info.model).eq_ignore_ascii_case(s)
            })
            .map(|info| info.model)
            .ok_or_else(|| format!("unknown model `{s}`"))
    }
}
