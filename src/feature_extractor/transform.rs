//! Image preprocessing: decoded image in, normalized `C×H×W` array out.

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageReader};
use ndarray::{Array, Array3, Axis};
use std::{fs::read_to_string, path::Path};

/// ImageNet channel means in BGR order, on the 0-255 scale
pub const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

/// Opens and decodes an image, sniffing the format from its content.
pub fn open_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path = path.as_ref();
    let image = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|err| anyhow!("image decode: {}", err))?;
    Ok(image)
}

pub enum TransformData {
    Image(DynamicImage),
    NdArray(Array3<f32>),
}

impl TransformData {
    pub fn image(self) -> Result<DynamicImage> {
        match self {
            TransformData::Image(img) => Ok(img),
            TransformData::NdArray(_) => Err(anyhow!("expected an image, found an array")),
        }
    }

    pub fn array(self) -> Result<Array3<f32>> {
        match self {
            TransformData::NdArray(array) => Ok(array),
            TransformData::Image(_) => Err(anyhow!("expected an array, found an image")),
        }
    }
}

pub trait Transform: Send + Sync {
    fn transform(&self, data: TransformData) -> Result<TransformData>;
}

pub struct ConvertToRGB;

impl Transform for ConvertToRGB {
    fn transform(&self, data: TransformData) -> Result<TransformData> {
        let image = data.image()?;
        Ok(TransformData::Image(image.into_rgb8().into()))
    }
}

/// Resizes to exactly `size` (width, height), ignoring aspect ratio.
pub struct Resize {
    pub size: (u32, u32),
    pub resample: FilterType,
}

impl Transform for Resize {
    fn transform(&self, data: TransformData) -> Result<TransformData> {
        let image = data.image()?;
        let (width, height) = self.size;
        Ok(TransformData::Image(
            image.resize_exact(width, height, self.resample),
        ))
    }
}

/// Crops the central `size` (width, height) window.
///
/// An image smaller than the window along either axis is cropped as far as it
/// goes and then stretched up to the window.
pub struct CenterCrop {
    pub size: (u32, u32),
}

impl Transform for CenterCrop {
    fn transform(&self, data: TransformData) -> Result<TransformData> {
        let image = data.image()?;
        let (width, height) = image.dimensions();
        let (crop_width, crop_height) = self.size;

        let (w, h) = (width.min(crop_width), height.min(crop_height));
        let cropped = image.crop_imm((width - w) / 2, (height - h) / 2, w, h);
        if (w, h) == (crop_width, crop_height) {
            Ok(TransformData::Image(cropped))
        } else {
            Ok(TransformData::Image(cropped.resize_exact(
                crop_width,
                crop_height,
                FilterType::CatmullRom,
            )))
        }
    }
}

/// Converts RGB pixels to a `3×H×W` float array on the 0-255 scale.
pub struct ToArray;

impl Transform for ToArray {
    fn transform(&self, data: TransformData) -> Result<TransformData> {
        match data {
            TransformData::Image(image) => {
                let image = image.to_rgb8();
                let (width, height) = image.dimensions();
                // hwc -> chw
                let mut pixels = Array3::zeros((3usize, height as usize, width as usize));
                for (x, y, pixel) in image.enumerate_pixels() {
                    for channel in 0..3 {
                        pixels[[channel, y as usize, x as usize]] = pixel[channel] as f32;
                    }
                }
                Ok(TransformData::NdArray(pixels))
            }
            array => Ok(array),
        }
    }
}

pub struct Rescale {
    pub scale: f32,
}

impl Transform for Rescale {
    fn transform(&self, data: TransformData) -> Result<TransformData> {
        let array = data.array()?;
        Ok(TransformData::NdArray(array * self.scale))
    }
}

/// Reverses the channel axis, RGB <-> BGR.
pub struct SwapRedBlue;

impl Transform for SwapRedBlue {
    fn transform(&self, data: TransformData) -> Result<TransformData> {
        let mut array = data.array()?;
        array.invert_axis(Axis(0));
        Ok(TransformData::NdArray(array.as_standard_layout().into_owned()))
    }
}

/// `(x - mean) / std` per channel.
pub struct Normalize {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl Transform for Normalize {
    fn transform(&self, data: TransformData) -> Result<TransformData> {
        let array = data.array()?;
        let channels = array.len_of(Axis(0));
        if self.mean.len() != channels || self.std.len() != channels {
            return Err(anyhow!(
                "Normalize expects {} channel statistics, array has shape {:?}",
                self.mean.len(),
                array.shape()
            ));
        }
        let mean = Array::from_vec(self.mean.clone()).into_shape_with_order((channels, 1, 1))?;
        let std = Array::from_vec(self.std.clone()).into_shape_with_order((channels, 1, 1))?;
        Ok(TransformData::NdArray((array - &mean) / &std))
    }
}

pub struct Compose {
    transforms: Vec<Box<dyn Transform>>,
}

impl Compose {
    pub fn new(transforms: Vec<Box<dyn Transform>>) -> Self {
        Self { transforms }
    }

    /// Keras "caffe" preprocessing used by ResNet50: 0-255 BGR with the ImageNet mean removed.
    pub fn keras_caffe(size: (u32, u32)) -> Self {
        Self::new(vec![
            Box::new(ConvertToRGB),
            Box::new(Resize {
                size,
                resample: FilterType::CatmullRom,
            }),
            Box::new(ToArray),
            Box::new(SwapRedBlue),
            Box::new(Normalize {
                mean: CAFFE_MEAN_BGR.to_vec(),
                std: vec![1.0; 3],
            }),
        ])
    }

    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let content = read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let config = serde_json::from_str(&content)?;
        load_preprocessor(config)
    }

    pub fn from_bytes<P: AsRef<[u8]>>(bytes: P) -> Result<Compose> {
        let config = serde_json::from_slice(bytes.as_ref())?;
        load_preprocessor(config)
    }

    /// Runs the pipeline and requires it to end in an array.
    pub fn to_array(&self, image: DynamicImage) -> Result<Array3<f32>> {
        self.transform(TransformData::Image(image))?
            .array()
            .context("Preprocessor configuration error: pipeline did not produce an array")
    }
}

impl Transform for Compose {
    fn transform(&self, mut data: TransformData) -> Result<TransformData> {
        for transform in &self.transforms {
            data = transform.transform(data)?;
        }
        Ok(data)
    }
}

/// `size` may be a bare integer, `{shortest_edge}` or `{height, width}`.
fn read_size(size: &serde_json::Value) -> Result<(u32, u32)> {
    if let Some(edge) = size.as_u64().or_else(|| size["shortest_edge"].as_u64()) {
        let edge = read_edge(edge)?;
        return Ok((edge, edge));
    }
    match (size["width"].as_u64(), size["height"].as_u64()) {
        (Some(width), Some(height)) => Ok((read_edge(width)?, read_edge(height)?)),
        _ => Err(anyhow!(
            "Size must contain either 'shortest_edge' or 'height' and 'width', got {}",
            size
        )),
    }
}

fn read_edge(edge: u64) -> Result<u32> {
    u32::try_from(edge).with_context(|| format!("Image size {} is out of range", edge))
}

fn read_stats(config: &serde_json::Value, key: &str) -> Result<Vec<f32>> {
    config[key]
        .as_array()
        .ok_or_else(|| anyhow!("{} must be present", key))?
        .iter()
        .map(|value| {
            value
                .as_f64()
                .map(|num| num as f32)
                .ok_or_else(|| anyhow!("{} must contain floats", key))
        })
        .collect()
}

fn load_preprocessor(config: serde_json::Value) -> Result<Compose> {
    let mut transforms: Vec<Box<dyn Transform>> = vec![Box::new(ConvertToRGB)];

    let mode = config["image_processor_type"]
        .as_str()
        .or_else(|| config["feature_extractor_type"].as_str())
        .unwrap_or("CLIPImageProcessor");
    match mode {
        "CLIPImageProcessor" => {
            if config["do_resize"].as_bool().unwrap_or(false) {
                transforms.push(Box::new(Resize {
                    size: read_size(&config["size"])?,
                    resample: FilterType::CatmullRom,
                }));
            }
            if config["do_center_crop"].as_bool().unwrap_or(false) {
                transforms.push(Box::new(CenterCrop {
                    size: read_size(&config["crop_size"])?,
                }));
            }
        }
        "ConvNextFeatureExtractor" | "ConvNextImageProcessor" => {
            let (edge, _) = read_size(&config["size"])?;
            let crop_pct = config["crop_pct"].as_f64().unwrap_or(0.875);
            if edge < 384 {
                let scaled = (edge as f64 / crop_pct) as u32;
                transforms.push(Box::new(Resize {
                    size: (scaled, scaled),
                    resample: FilterType::CatmullRom,
                }));
                transforms.push(Box::new(CenterCrop { size: (edge, edge) }));
            } else {
                transforms.push(Box::new(Resize {
                    size: (edge, edge),
                    resample: FilterType::CatmullRom,
                }));
            }
        }
        mode => return Err(anyhow!("Preprocessor {} is not supported", mode)),
    }

    transforms.push(Box::new(ToArray));

    if config["do_rescale"].as_bool().unwrap_or(true) {
        let factor = config["rescale_factor"].as_f64().unwrap_or(1.0 / 255.0);
        transforms.push(Box::new(Rescale {
            scale: factor as f32,
        }));
    }

    if config["do_normalize"].as_bool().unwrap_or(false) {
        transforms.push(Box::new(Normalize {
            mean: read_stats(&config, "image_mean")?,
            std: read_stats(&config, "image_std")?,
        }));
    }

    Ok(Compose::new(transforms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, RgbaImage};

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        RgbImage::from_pixel(width, height, Rgb(color)).into()
    }

    #[test]
    fn keras_caffe_reorders_channels_and_subtracts_mean() {
        let array = Compose::keras_caffe((4, 4))
            .to_array(solid(10, 6, [200, 100, 50]))
            .unwrap();

        assert_eq!(array.shape(), &[3, 4, 4]);
        // channel 0 is blue after the swap
        assert!((array[[0, 0, 0]] - (50.0 - 103.939)).abs() < 1e-3);
        assert!((array[[1, 2, 3]] - (100.0 - 116.779)).abs() < 1e-3);
        assert!((array[[2, 3, 1]] - (200.0 - 123.68)).abs() < 1e-3);
    }

    #[test]
    fn rgba_input_is_reduced_to_three_channels() {
        let image: DynamicImage = RgbaImage::from_pixel(5, 5, image::Rgba([1, 2, 3, 4])).into();
        let array = Compose::keras_caffe((2, 2)).to_array(image).unwrap();
        assert_eq!(array.len_of(Axis(0)), 3);
    }

    #[test]
    fn center_crop_keeps_the_middle() {
        let mut image = RgbImage::from_pixel(6, 4, Rgb([0, 0, 0]));
        image.put_pixel(2, 1, Rgb([255, 255, 255]));
        let cropped = CenterCrop { size: (2, 2) }
            .transform(TransformData::Image(image.into()))
            .unwrap()
            .image()
            .unwrap();
        assert_eq!(cropped.dimensions(), (2, 2));
        assert_eq!(cropped.to_rgb8().get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn center_crop_stretches_small_images() {
        let cropped = CenterCrop { size: (8, 8) }
            .transform(TransformData::Image(solid(3, 3, [9, 9, 9])))
            .unwrap()
            .image()
            .unwrap();
        assert_eq!(cropped.dimensions(), (8, 8));
    }

    #[test]
    fn convnext_config_builds_resize_crop_rescale_normalize() {
        let config = br#"{
            "crop_pct": 0.875,
            "do_normalize": true,
            "do_rescale": true,
            "do_resize": true,
            "image_mean": [0.5, 0.5, 0.5],
            "image_std": [0.5, 0.5, 0.5],
            "image_processor_type": "ConvNextImageProcessor",
            "rescale_factor": 0.00392156862745098,
            "size": {"shortest_edge": 224}
        }"#;
        let array = Compose::from_bytes(config)
            .unwrap()
            .to_array(solid(300, 500, [255, 0, 255]))
            .unwrap();

        assert_eq!(array.shape(), &[3, 224, 224]);
        assert!((array[[0, 10, 10]] - 1.0).abs() < 1e-4);
        assert!((array[[1, 10, 10]] + 1.0).abs() < 1e-4);
    }

    #[test]
    fn clip_config_accepts_integer_crop_size() {
        let config = br#"{
            "do_resize": true,
            "size": {"height": 32, "width": 48},
            "do_center_crop": true,
            "crop_size": 16
        }"#;
        let array = Compose::from_bytes(config)
            .unwrap()
            .to_array(solid(64, 64, [0, 0, 0]))
            .unwrap();
        assert_eq!(array.shape(), &[3, 16, 16]);
    }

    #[test]
    fn oversized_size_is_rejected() {
        let config = br#"{
            "do_resize": true,
            "size": {"height": 32, "width": 4294967297}
        }"#;
        let err = Compose::from_bytes(config).err().unwrap();
        assert!(err.to_string().contains("4294967297"));

        let config = br#"{"do_resize": true, "size": 4294967296}"#;
        assert!(Compose::from_bytes(config).is_err());
    }

    #[test]
    fn unknown_processor_is_rejected() {
        let config = br#"{"image_processor_type": "ViTImageProcessor"}"#;
        assert!(Compose::from_bytes(config).is_err());
    }

    #[test]
    fn normalize_rejects_mismatched_statistics() {
        let normalize = Normalize {
            mean: vec![0.0; 2],
            std: vec![1.0; 2],
        };
        let data = TransformData::NdArray(Array3::zeros((3, 2, 2)));
        assert!(normalize.transform(data).is_err());
    }

    #[test]
    fn open_image_reports_undecodable_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();
        assert!(open_image(&path).is_err());
    }
}
