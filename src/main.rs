//! `outfit-embed` command line.
//!
//! The default model is `resnet50_notop.onnx` in the working directory: Keras'
//! `ResNet50(weights="imagenet", include_top=False)` exported with `tf2onnx`.
//! Its `N×7×7×2048` feature map is max pooled here.
//!
//! ```bash
//! # images/ -> embeddings.pkl + filenames.pkl
//! outfit-embed
//!
//! # another export location and JSON artifacts
//! outfit-embed extract --onnx models/resnet50_notop.onnx --format json \
//!     --embeddings out/embeddings.json --filenames out/filenames.json
//!
//! # the hosted ResNet50, which only offers average pooled vectors
//! outfit-embed extract --model resnet50 --pooling mean
//!
//! # the five stored images closest to a query image
//! outfit-embed similar query.jpg -k 5
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use outfit_embed::{
    feature_extractor::transform::open_image, run, ExtractorModel, FeatureStore, OutputFormat,
    Pooling, RunConfig, TensorLayout,
};

#[derive(Parser, Debug)]
#[command(name = "outfit-embed", version)]
#[command(about = "Extract pretrained CNN feature vectors for a directory of images")]
struct Cli {
    /// Defaults to `extract` with no flags
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Embed every image in a directory and save vectors and file names
    Extract(ExtractArgs),
    /// Embed one image and list the closest stored images
    Similar(SimilarArgs),
}

#[derive(Args, Debug, Default)]
struct ExtractArgs {
    /// Directory of images to embed
    #[arg(long)]
    input_dir: Option<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct SimilarArgs {
    /// Query image
    image: PathBuf,

    /// Number of neighbours to print
    #[arg(short, default_value_t = 5)]
    k: usize,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug, Default)]
struct CommonArgs {
    /// JSON run configuration; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Embeddings artifact path
    #[arg(long)]
    embeddings: Option<PathBuf>,

    /// Filenames artifact path
    #[arg(long)]
    filenames: Option<PathBuf>,

    /// Artifact serialization: bincode or json
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Hosted model to download instead of the local ONNX file
    #[arg(long, conflicts_with = "onnx")]
    model: Option<ExtractorModel>,

    /// Model cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Local ONNX model [default: resnet50_notop.onnx]
    #[arg(long)]
    onnx: Option<PathBuf>,

    /// preprocessor_config.json for --onnx; Keras caffe preprocessing without it
    #[arg(long, requires = "onnx")]
    preprocessor: Option<PathBuf>,

    /// Tensor layout of the local model: nchw or nhwc [default: nhwc]
    #[arg(long)]
    layout: Option<TensorLayout>,

    /// Feature map reduction: max or mean
    #[arg(long)]
    pooling: Option<Pooling>,

    /// L2-normalize every vector
    #[arg(long)]
    normalize: bool,

    /// Hide the model download progress bar
    #[arg(long)]
    no_progress: bool,
}

impl CommonArgs {
    fn resolve(self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_file(path)?,
            None => RunConfig::default(),
        };

        if let Some(embeddings) = self.embeddings {
            config.output.embeddings = embeddings;
        }
        if let Some(filenames) = self.filenames {
            config.output.filenames = filenames;
        }
        if let Some(format) = self.format {
            config.format = format;
        }

        let extractor = &mut config.extractor;
        if let Some(model) = self.model {
            extractor.model = Some(model);
        }
        if let Some(cache_dir) = self.cache_dir {
            extractor.cache_dir = cache_dir;
        }
        if let Some(onnx) = self.onnx {
            extractor.model = None;
            extractor.onnx_file = onnx;
        }
        if let Some(preprocessor) = self.preprocessor {
            extractor.preprocessor_file = Some(preprocessor);
        }
        if let Some(layout) = self.layout {
            extractor.layout = layout;
        }
        if let Some(pooling) = self.pooling {
            extractor.pooling = pooling;
        }
        extractor.normalize |= self.normalize;
        extractor.show_download_progress &= !self.no_progress;

        Ok(config)
    }
}

fn extract(args: ExtractArgs) -> Result<()> {
    let mut config = args.common.resolve()?;
    if let Some(input_dir) = args.input_dir {
        config.input_dir = input_dir;
    }

    let output = run(&config)?;
    println!(
        "Embedded {} images, skipped {}",
        output.store.len(),
        output.skipped.len()
    );
    Ok(())
}

fn similar(args: SimilarArgs) -> Result<()> {
    let config = args.common.resolve()?;
    let store = FeatureStore::load(&config.output, config.format)?;

    let extractor = config.extractor.build()?;
    let query = extractor.extract_image(open_image(&args.image)?)?;

    for (filename, distance) in store.nearest(&query, args.k)? {
        println!("{distance:.4}\t{filename}");
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("outfit_embed=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        None => extract(ExtractArgs::default()),
        Some(Command::Extract(args)) => extract(args),
        Some(Command::Similar(args)) => similar(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_arguments_means_default_extract() {
        let cli = Cli::try_parse_from(["outfit-embed"]).unwrap();
        assert!(cli.command.is_none());
        let config = ExtractArgs::default().common.resolve().unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "outfit-embed",
            "extract",
            "--input-dir",
            "wardrobe",
            "--format",
            "json",
            "--onnx",
            "resnet.onnx",
            "--layout",
            "nchw",
            "--pooling",
            "mean",
            "--no-progress",
        ])
        .unwrap();
        let Some(Command::Extract(args)) = cli.command else {
            panic!("expected extract");
        };
        assert_eq!(args.input_dir, Some(PathBuf::from("wardrobe")));

        let config = args.common.resolve().unwrap();
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.extractor.onnx_file, PathBuf::from("resnet.onnx"));
        assert_eq!(config.extractor.model, None);
        assert_eq!(config.extractor.layout, TensorLayout::Nchw);
        assert_eq!(config.extractor.pooling, Pooling::Mean);
        assert!(!config.extractor.show_download_progress);
    }

    #[test]
    fn model_flag_selects_hosted_model() {
        let cli = Cli::try_parse_from([
            "outfit-embed",
            "extract",
            "--model",
            "resnet50",
            "--pooling",
            "mean",
        ])
        .unwrap();
        let Some(Command::Extract(args)) = cli.command else {
            panic!("expected extract");
        };

        let config = args.common.resolve().unwrap();
        assert_eq!(config.extractor.model, Some(ExtractorModel::Resnet50));
        assert_eq!(config.extractor.pooling, Pooling::Mean);
    }

    #[test]
    fn model_and_onnx_conflict() {
        let parsed = Cli::try_parse_from([
            "outfit-embed",
            "extract",
            "--model",
            "resnet50",
            "--onnx",
            "resnet.onnx",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn preprocessor_requires_onnx() {
        let parsed = Cli::try_parse_from([
            "outfit-embed",
            "extract",
            "--preprocessor",
            "preprocessor_config.json",
        ]);
        assert!(parsed.is_err());
    }
}
