use std::{fmt::Display, str::FromStr};

use anyhow::{anyhow, Result};
use ndarray::{Array2, ArrayView4, ArrayViewD, Axis, Ix4};
use serde::{Deserialize, Serialize};

use crate::TensorLayout;

/// Reduction applied to the spatial extent of a convolutional feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    /// Global max pooling: the maximum activation per channel
    #[default]
    Max,
    /// Global average pooling: the mean activation per channel
    Mean,
}

impl Display for Pooling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pooling::Max => write!(f, "max"),
            Pooling::Mean => write!(f, "mean"),
        }
    }
}

impl FromStr for Pooling {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "max" => Ok(Pooling::Max),
            "mean" | "avg" => Ok(Pooling::Mean),
            other => Err(format!("unknown pooling `{other}`, expected max or mean")),
        }
    }
}

/// Pools a dynamic-rank model output that is known to be a 4D feature map.
pub fn global_pool_dyn(
    tensor: &ArrayViewD<f32>,
    layout: TensorLayout,
    pooling: Pooling,
) -> Result<Array2<f32>> {
    let features = tensor.view().into_dimensionality::<Ix4>()?;
    global_pool(features, layout, pooling)
}

/// Reduces a `batch × channels × spatial` feature map to `batch × channels`.
pub fn global_pool(
    features: ArrayView4<f32>,
    layout: TensorLayout,
    pooling: Pooling,
) -> Result<Array2<f32>> {
    // bring everything to N×C×H×W
    let features = match layout {
        TensorLayout::Nchw => features,
        TensorLayout::Nhwc => features.permuted_axes([0, 3, 1, 2]),
    };
    let (batch, channels, height, width) = features.dim();
    let spatial = height * width;
    if spatial == 0 {
        return Err(anyhow!(
            "Feature map has an empty spatial extent: {:?}",
            features.shape()
        ));
    }

    let lanes = features.to_shape((batch, channels, spatial))?;
    let pooled = match pooling {
        Pooling::Max => lanes.map_axis(Axis(2), |lane| {
            lane.fold(f32::NEG_INFINITY, |acc, &value| acc.max(value))
        }),
        Pooling::Mean => lanes.map_axis(Axis(2), |lane| lane.sum() / spatial as f32),
    };
    Ok(pooled)
}
