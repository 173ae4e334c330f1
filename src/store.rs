//! The two parallel output lists and their on-disk form.

use std::{
    fmt::Display,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::info;

use crate::Embedding;

pub const DEFAULT_EMBEDDINGS_FILE: &str = "embeddings.pkl";
pub const DEFAULT_FILENAMES_FILE: &str = "filenames.pkl";

/// Serialization used for both artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Bincode,
    Json,
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Bincode => write!(f, "bincode"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bincode" | "bin" => Ok(OutputFormat::Bincode),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format `{other}`, expected bincode or json")),
        }
    }
}

/// Where the embeddings and filenames artifacts live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputPaths {
    pub embeddings: PathBuf,
    pub filenames: PathBuf,
}

impl Default for OutputPaths {
    fn default() -> Self {
        Self {
            embeddings: PathBuf::from(DEFAULT_EMBEDDINGS_FILE),
            filenames: PathBuf::from(DEFAULT_FILENAMES_FILE),
        }
    }
}

impl OutputPaths {
    /// Default file names inside `dir`
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            embeddings: dir.join(DEFAULT_EMBEDDINGS_FILE),
            filenames: dir.join(DEFAULT_FILENAMES_FILE),
        }
    }
}

/// Feature vectors and the file names they came from, index-aligned.
///
/// Appending goes through [FeatureStore::push] only, so both lists always have the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureStore {
    embeddings: Vec<Embedding>,
    filenames: Vec<String>,
}

impl FeatureStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Builds a store from two lists that must already be parallel.
    pub fn from_parts(embeddings: Vec<Embedding>, filenames: Vec<String>) -> Result<Self> {
        if embeddings.len() != filenames.len() {
            return Err(anyhow!(
                "{} embeddings but {} filenames",
                embeddings.len(),
                filenames.len()
            ));
        }
        Ok(Self {
            embeddings,
            filenames,
        })
    }

    pub fn push(&mut self, filename: impl Into<String>, embedding: Embedding) {
        self.filenames.push(filename.into());
        self.embeddings.push(embedding);
    }

    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }

    /// Length of the stored vectors, `None` while empty
    pub fn dim(&self) -> Option<usize> {
        self.embeddings.first().map(Vec::len)
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.filenames
            .iter()
            .map(String::as_str)
            .zip(self.embeddings.iter())
    }

    /// Writes both artifacts, replacing whatever is at those paths.
    pub fn save(&self, paths: &OutputPaths, format: OutputFormat) -> Result<()> {
        write_artifact(&paths.embeddings, &self.embeddings, format)?;
        write_artifact(&paths.filenames, &self.filenames, format)?;
        info!(
            count = self.len(),
            embeddings = %paths.embeddings.display(),
            filenames = %paths.filenames.display(),
            %format,
            "saved features"
        );
        Ok(())
    }

    pub fn load(paths: &OutputPaths, format: OutputFormat) -> Result<Self> {
        let embeddings = read_artifact(&paths.embeddings, format)?;
        let filenames = read_artifact(&paths.filenames, format)?;
        Self::from_parts(embeddings, filenames).with_context(|| {
            format!(
                "{} and {} are not parallel",
                paths.embeddings.display(),
                paths.filenames.display()
            )
        })
    }

    /// The `k` stored images closest to `query` by Euclidean distance, closest first.
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<(&str, f32)>> {
        if let Some(dim) = self.dim() {
            if dim != query.len() {
                return Err(anyhow!(
                    "Query has {} dimensions, stored vectors have {}",
                    query.len(),
                    dim
                ));
            }
        }

        let mut scored: Vec<(&str, f32)> = self
            .iter()
            .map(|(name, embedding)| (name, euclidean(query, embedding)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        Ok(scored)
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn write_artifact<T: Serialize>(path: &Path, value: &T, format: OutputFormat) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    match format {
        OutputFormat::Bincode => bincode::serialize_into(&mut writer, value)?,
        OutputFormat::Json => serde_json::to_writer(&mut writer, value)?,
    }
    writer.flush()?;
    Ok(())
}

fn read_artifact<T: DeserializeOwned>(path: &Path, format: OutputFormat) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let value = match format {
        OutputFormat::Bincode => bincode::deserialize_from(reader)?,
        OutputFormat::Json => serde_json::from_reader(reader)?,
    };
    Ok(value)
}
