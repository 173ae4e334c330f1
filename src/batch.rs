//! One pass over an image directory.

use std::{fs::read_dir, path::Path};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

use crate::{ExtractFeatures, FeatureStore, RunConfig};

/// An image left out of the store, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedImage {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct BatchOutput {
    pub store: FeatureStore,
    pub skipped: Vec<SkippedImage>,
}

/// Extracts a feature vector for every entry of `dir`, in listing order.
///
/// An entry that cannot be opened, decoded or embedded, or whose vector length
/// differs from the first accepted one, is logged and left out of the store.
/// A missing or unreadable `dir` is an error. File names that are not valid
/// UTF-8 are stored with replacement characters and logged.
pub fn extract_directory<E: ExtractFeatures>(extractor: &mut E, dir: &Path) -> Result<BatchOutput> {
    let entries = read_dir(dir)
        .with_context(|| format!("Failed to read image directory {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    info!(dir = %dir.display(), entries = entries.len(), "extracting features");

    let mut output = BatchOutput::default();
    for (index, entry) in entries.iter().enumerate() {
        let raw_name = entry.file_name();
        let filename = match raw_name.to_str() {
            Some(name) => name.to_owned(),
            None => {
                let lossy = raw_name.to_string_lossy().into_owned();
                warn!(original = ?raw_name, stored = %lossy, "File name is not valid UTF-8");
                lossy
            }
        };

        let extracted = extractor.extract_file(&entry.path()).and_then(|embedding| {
            match output.store.dim() {
                Some(dim) if dim != embedding.len() => Err(anyhow!(
                    "unexpected feature vector length {}, expected {}",
                    embedding.len(),
                    dim
                )),
                _ => Ok(embedding),
            }
        });

        match extracted {
            Ok(embedding) => {
                debug!(index, %filename, "extracted");
                output.store.push(filename, embedding);
            }
            Err(err) => {
                warn!("Skipping {}: {:#}", filename, err);
                output.skipped.push(SkippedImage {
                    filename,
                    reason: format!("{:#}", err),
                });
            }
        }
    }

    info!(
        extracted = output.store.len(),
        skipped = output.skipped.len(),
        "finished extracting features"
    );
    Ok(output)
}

/// Loads the configured model, extracts the input directory and saves both artifacts.
pub fn run(config: &RunConfig) -> Result<BatchOutput> {
    let mut extractor = config.extractor.build()?;
    run_with(&mut extractor, config)
}

/// [run] with an already constructed extractor.
///
/// The artifacts are written even when nothing was extracted.
pub fn run_with<E: ExtractFeatures>(extractor: &mut E, config: &RunConfig) -> Result<BatchOutput> {
    let output = extract_directory(extractor, &config.input_dir)?;
    output.store.save(&config.output, config.format)?;
    Ok(output)
}
