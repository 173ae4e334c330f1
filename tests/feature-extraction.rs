#![cfg(feature = "online")]

use std::path::Path;

use image::{Rgb, RgbImage};
use outfit_embed::{
    extract_directory, run_with, ExtractorInitOptions, FeatureExtractor, FeatureStore,
    OutputFormat, OutputPaths, Pooling, RunConfig,
};

fn extractor() -> FeatureExtractor {
    FeatureExtractor::try_new(
        ExtractorInitOptions::default()
            .with_pooling(Pooling::Mean)
            .with_show_download_progress(false),
    )
    .unwrap()
}

fn write_outfit(dir: &Path, name: &str, seed: u8) {
    RgbImage::from_fn(96, 128, |x, y| {
        Rgb([
            (x as u8).wrapping_mul(seed),
            (y as u8).wrapping_add(seed),
            seed.wrapping_mul(31),
        ])
    })
    .save(dir.join(name))
    .unwrap();
}

/// Three valid images and one corrupt file
fn wardrobe() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_outfit(dir.path(), "dress.png", 3);
    write_outfit(dir.path(), "jacket.png", 7);
    write_outfit(dir.path(), "sneakers.jpg", 11);
    std::fs::write(dir.path().join("notes.jpg"), b"this is not an image").unwrap();
    dir
}

#[test]
fn test_supported_models_have_pooled_dimension() {
    let mut extractor = extractor();
    let dir = wardrobe();

    let output = extract_directory(&mut extractor, dir.path()).unwrap();

    assert_eq!(output.store.len(), 3);
    assert_eq!(output.skipped.len(), 1);
    assert_eq!(output.skipped[0].filename, "notes.jpg");
    let dim = FeatureExtractor::list_supported_models()[0].dim;
    for embedding in output.store.embeddings() {
        assert_eq!(embedding.len(), dim);
    }
}

#[test]
fn test_hosted_model_rejects_max_pooling() {
    let result = FeatureExtractor::try_new(
        ExtractorInitOptions::default()
            .with_pooling(Pooling::Max)
            .with_show_download_progress(false),
    );
    assert!(result.is_err());
}

#[test]
fn test_extraction_is_deterministic() {
    let mut extractor = extractor();
    let dir = wardrobe();

    let first = extract_directory(&mut extractor, dir.path()).unwrap();
    let second = extract_directory(&mut extractor, dir.path()).unwrap();

    assert_eq!(first.store, second.store);
}

#[test]
fn test_batch_api_matches_single_images() {
    let extractor = extractor();
    let dir = wardrobe();
    let images = vec![dir.path().join("dress.png"), dir.path().join("jacket.png")];

    let batched = extractor.extract(images.clone(), Some(2)).unwrap();
    let single = extractor.extract(images, Some(1)).unwrap();

    assert_eq!(batched.len(), 2);
    for (a, b) in batched.iter().zip(&single) {
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-3);
        }
    }
}

#[test]
fn test_batch_api_fails_on_corrupt_image() {
    let extractor = extractor();
    let dir = wardrobe();
    let images = vec![dir.path().join("dress.png"), dir.path().join("notes.jpg")];
    assert!(extractor.extract(images, None).is_err());
}

#[test]
fn test_run_writes_artifacts_that_find_themselves() {
    let mut extractor = extractor();
    let input = wardrobe();
    let out = tempfile::tempdir().unwrap();
    let config = RunConfig::default()
        .with_input_dir(input.path().to_path_buf())
        .with_output(OutputPaths::in_dir(out.path()));

    run_with(&mut extractor, &config).unwrap();
    let store = FeatureStore::load(&config.output, OutputFormat::Bincode).unwrap();

    let (name, query) = store.iter().next().unwrap();
    let hits = store.nearest(query, 1).unwrap();
    assert_eq!(hits[0].0, name);
    assert!(hits[0].1.abs() < 1e-6);
}
