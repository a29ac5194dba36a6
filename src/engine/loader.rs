// Artifact loader: reads the on-disk model directory into an Engine.
//
// Layout:
//   <model_dir>/scaler.json
//   <model_dir>/<category>/model.safetensors
//   <model_dir>/<category>/vocab.json
//   <model_dir>/<category>/config.json   (optional)

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use super::category::Category;
use super::pipeline::{Engine, EngineOptions, ModelArtifacts};
use crate::model::{ModelConfig, WeightStore};
use crate::text::features::FeatureScaler;
use crate::text::vocab::Vocabulary;

pub const SCALER_FILE: &str = "scaler.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const VOCAB_FILE: &str = "vocab.json";
pub const CONFIG_FILE: &str = "config.json";

/// `vocab.json` is either the ordered token list (position = id) or a
/// Keras-style `{"word": id}` index.
#[derive(Deserialize)]
#[serde(untagged)]
enum VocabFile {
    Tokens(Vec<String>),
    WordIndex(HashMap<String, u32>),
}

pub fn load_scaler(path: &Path) -> Result<FeatureScaler> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scaler constants from {}", path.display()))?;
    let scaler = FeatureScaler::from_json(&json)
        .with_context(|| format!("Invalid scaler file {}", path.display()))?;
    Ok(scaler)
}

pub fn load_vocabulary(path: &Path) -> Result<Vocabulary> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read vocabulary from {}", path.display()))?;
    let file: VocabFile = serde_json::from_str(&json)
        .with_context(|| format!("Invalid vocabulary file {}", path.display()))?;
    let vocabulary = match file {
        VocabFile::Tokens(tokens) => Vocabulary::from_tokens(tokens),
        VocabFile::WordIndex(index) => Vocabulary::from_word_index(&index)
            .with_context(|| format!("Invalid word index in {}", path.display()))?,
    };
    Ok(vocabulary)
}

/// Read one category's artifacts. `max_len` overrides the padded length of
/// capsule-attention models.
pub fn load_category(model_dir: &Path, category: Category, max_len: Option<usize>) -> Result<ModelArtifacts> {
    let dir = model_dir.join(category.name());

    let config_path = dir.join(CONFIG_FILE);
    let mut config = if config_path.exists() {
        let json = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        ModelConfig::from_json(&json)
            .with_context(|| format!("Invalid model config {}", config_path.display()))?
    } else {
        ModelConfig::default()
    };
    if let (Some(len), ModelConfig::CapsuleAttention(c)) = (max_len, &mut config) {
        c.max_len = len;
    }

    let weights_path = dir.join(WEIGHTS_FILE);
    let bytes = fs::read(&weights_path)
        .with_context(|| format!("Failed to read model weights from {}", weights_path.display()))?;
    let weights = WeightStore::from_safetensors(&bytes)
        .with_context(|| format!("Invalid weights file {}", weights_path.display()))?;

    let vocabulary = load_vocabulary(&dir.join(VOCAB_FILE))?;

    debug!(
        category = %category,
        architecture = config.architecture(),
        tensors = weights.len(),
        vocabulary = vocabulary.len(),
        "loaded artifacts"
    );

    Ok(ModelArtifacts {
        config,
        weights,
        vocabulary,
    })
}

/// Required files that do not exist for the given categories.
pub fn missing_artifacts(model_dir: &Path, categories: &[Category]) -> Vec<PathBuf> {
    let mut required = vec![model_dir.join(SCALER_FILE)];
    for category in categories {
        let dir = model_dir.join(category.name());
        required.push(dir.join(WEIGHTS_FILE));
        required.push(dir.join(VOCAB_FILE));
    }
    required.into_iter().filter(|p| !p.exists()).collect()
}

/// Load the scaler and every requested category, then build the engine.
pub fn load_engine(
    model_dir: &Path,
    categories: &[Category],
    options: EngineOptions,
    max_len: Option<usize>,
) -> Result<Engine> {
    let scaler = load_scaler(&model_dir.join(SCALER_FILE))?;

    let mut artifacts = HashMap::with_capacity(categories.len());
    for &category in categories {
        if artifacts.contains_key(&category) {
            continue;
        }
        artifacts.insert(category, load_category(model_dir, category, max_len)?);
    }

    let engine = Engine::new(artifacts, scaler, options).context("Failed to build inference engine")?;
    info!(
        model_dir = %model_dir.display(),
        categories = engine.categories().len(),
        "inference engine ready"
    );
    Ok(engine)
}
