use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use youtoxic::engine::loader::missing_artifacts;
use youtoxic::engine::{Category, EngineOptions, DEFAULT_BATCH_SIZE, DEFAULT_THRESHOLD};

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded automatically at startup via dotenvy.
pub struct Config {
    /// Root of the model artifacts (scaler.json plus one directory per category)
    pub model_dir: PathBuf,
    /// Decision threshold shared by every category
    pub threshold: f32,
    /// Categories to load, in display order
    pub categories: Vec<Category>,
    /// Padded sequence length override for capsule-attention models.
    /// Unset means each model's own config decides (70 for the stock models).
    pub max_len: Option<usize>,
    /// Texts per forward pass
    pub batch_size: usize,
    /// Drop @mentions and links before scoring
    pub strip_mentions: bool,
}

impl Config {
    /// Load configuration from environment variables. Everything has a
    /// default; a value that is set but unparseable is an error.
    pub fn load() -> Result<Self> {
        let model_dir = env::var("YOUTOXIC_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_model_dir());

        let categories = match env::var("YOUTOXIC_CATEGORIES") {
            Ok(list) if !list.trim().is_empty() => parse_categories(&list)?,
            _ => Category::ALL.to_vec(),
        };

        Ok(Self {
            model_dir,
            threshold: parse_var("YOUTOXIC_THRESHOLD")?.unwrap_or(DEFAULT_THRESHOLD),
            categories,
            max_len: parse_var("YOUTOXIC_MAX_LEN")?,
            batch_size: parse_var("YOUTOXIC_BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE),
            strip_mentions: parse_var("YOUTOXIC_STRIP_MENTIONS")?.unwrap_or(false),
        })
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            threshold: self.threshold,
            category_thresholds: HashMap::new(),
            batch_size: self.batch_size,
            strip_mentions: self.strip_mentions,
        }
    }

    /// Check that every artifact for the configured categories is on disk.
    /// Call this before loading the engine for a friendlier error.
    pub fn require_artifacts(&self) -> Result<()> {
        let missing = missing_artifacts(&self.model_dir, &self.categories);
        if !missing.is_empty() {
            let list: Vec<String> = missing.iter().map(|p| format!("  {}", p.display())).collect();
            anyhow::bail!(
                "Model artifacts missing from {}:\n{}\n\
                 Set YOUTOXIC_MODEL_DIR or YOUTOXIC_CATEGORIES in your .env file.",
                self.model_dir.display(),
                list.join("\n")
            );
        }
        Ok(())
    }
}

/// Default artifact location: `<data dir>/youtoxic/models`.
pub fn default_model_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("youtoxic")
        .join("models")
}

/// Comma-separated category names or aliases.
pub fn parse_categories(list: &str) -> Result<Vec<Category>> {
    let mut categories = Vec::new();
    for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let category: Category = name
            .parse()
            .with_context(|| format!("Unknown category: {name}"))?;
        if !categories.contains(&category) {
            categories.push(category);
        }
    }
    Ok(categories)
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            let parsed = value
                .trim()
                .parse::<T>()
                .with_context(|| format!("{name} has an invalid value: {value}"))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}
