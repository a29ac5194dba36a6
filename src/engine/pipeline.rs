// Category ensemble: text in, per-category probabilities and judgements out.
//
// Each loaded category owns its model, vocabulary and tokenizer, since the
// two model families were trained on different tokenizations. The feature
// scaler and options are shared. Everything is read-only after `Engine::new`,
// so one engine can serve any number of threads without locking.

use std::collections::{HashMap, HashSet};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info, warn};

use super::category::Category;
use crate::error::{EngineError, EngineResult};
use crate::model::{EncodedBatch, ModelConfig, ToxicityModel, WeightStore};
use crate::nn::dropout::Mode;
use crate::output::truncate_chars;
use crate::text::features::{FeatureScaler, LexicalFeatures};
use crate::text::strip_mentions_and_links;
use crate::text::tokenizer::Tokenizer;
use crate::text::vocab::Vocabulary;

pub const DEFAULT_THRESHOLD: f32 = 0.4;
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Round a probability to 3 decimals for display.
pub fn round_probability(p: f32) -> f32 {
    (p * 1000.0).round() / 1000.0
}

/// Everything needed to build one category's model.
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    pub config: ModelConfig,
    pub weights: WeightStore,
    pub vocabulary: Vocabulary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Decision threshold for every category without an override.
    pub threshold: f32,
    pub category_thresholds: HashMap<Category, f32>,
    /// Texts per forward pass. Larger batches are split.
    pub batch_size: usize,
    /// Drop words containing `@` or `http` before tokenizing.
    pub strip_mentions: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            category_thresholds: HashMap::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            strip_mentions: false,
        }
    }
}

impl EngineOptions {
    pub fn threshold_for(&self, category: Category) -> f32 {
        self.category_thresholds
            .get(&category)
            .copied()
            .unwrap_or(self.threshold)
    }

    fn validate(&self) -> EngineResult<()> {
        let thresholds = std::iter::once(self.threshold).chain(self.category_thresholds.values().copied());
        for t in thresholds {
            if !(0.0..=1.0).contains(&t) {
                return Err(EngineError::startup(format!(
                    "threshold {t} is outside [0, 1]"
                )));
            }
        }
        if self.batch_size == 0 {
            return Err(EngineError::startup("batch size must be at least 1"));
        }
        Ok(())
    }
}

/// Probability and judgement for one text in one category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub category: Category,
    pub probability: f32,
    pub positive: bool,
    pub label: &'static str,
}

impl Prediction {
    /// Positive iff `probability > threshold`; a tie is negative.
    pub fn judge(category: Category, probability: f32, threshold: f32) -> Self {
        let positive = probability > threshold;
        Self {
            category,
            probability,
            positive,
            label: category.label(positive),
        }
    }

    pub fn rounded(&self) -> f32 {
        round_probability(self.probability)
    }
}

/// Results of `predict_many`, in the order categories were requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionTable {
    entries: Vec<(Category, Vec<Prediction>)>,
}

impl PredictionTable {
    /// Fold another table into this one. Rows for a category already present
    /// are appended after the existing rows; new categories go at the end.
    pub fn append(&mut self, other: PredictionTable) {
        for (category, predictions) in other.entries {
            match self.entries.iter_mut().find(|(c, _)| *c == category) {
                Some((_, existing)) => existing.extend(predictions),
                None => self.entries.push((category, predictions)),
            }
        }
    }

    pub fn get(&self, category: Category) -> Option<&[Prediction]> {
        self.entries
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, p)| p.as_slice())
    }

    pub fn categories(&self) -> Vec<Category> {
        self.entries.iter().map(|(c, _)| *c).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &[Prediction])> {
        self.entries.iter().map(|(c, p)| (*c, p.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for PredictionTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (category, predictions) in &self.entries {
            map.serialize_entry(category.name(), predictions)?;
        }
        map.end()
    }
}

/// A single text or an ordered batch of texts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextInput {
    Single(String),
    Batch(Vec<String>),
}

impl TextInput {
    /// Parse `"text"` or `["a", "b"]`. Anything else (null, numbers, nested
    /// arrays, non-string elements) is `MalformedInput`.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::MalformedInput(e.to_string()))
    }

    pub fn texts(&self) -> Vec<&str> {
        match self {
            TextInput::Single(text) => vec![text.as_str()],
            TextInput::Batch(texts) => texts.iter().map(String::as_str).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TextInput::Single(_) => 1,
            TextInput::Batch(texts) => texts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for TextInput {
    fn from(text: &str) -> Self {
        TextInput::Single(text.to_string())
    }
}

impl From<String> for TextInput {
    fn from(text: String) -> Self {
        TextInput::Single(text)
    }
}

impl From<Vec<String>> for TextInput {
    fn from(texts: Vec<String>) -> Self {
        TextInput::Batch(texts)
    }
}

struct CategoryModel {
    model: ToxicityModel,
    vocabulary: Vocabulary,
    tokenizer: Box<dyn Tokenizer>,
}

pub struct Engine {
    models: HashMap<Category, CategoryModel>,
    scaler: FeatureScaler,
    options: EngineOptions,
}

impl Engine {
    /// Build every category model. Fails fast on the first missing or
    /// mis-shaped artifact.
    pub fn new(
        artifacts: HashMap<Category, ModelArtifacts>,
        scaler: FeatureScaler,
        options: EngineOptions,
    ) -> EngineResult<Self> {
        options.validate()?;
        if artifacts.is_empty() {
            return Err(EngineError::startup("no category models supplied"));
        }

        let mut models = HashMap::with_capacity(artifacts.len());
        for (category, artifact) in artifacts {
            let model = ToxicityModel::from_store(&artifact.weights, &artifact.config).map_err(|e| match e {
                EngineError::StartupFailure(msg) => EngineError::startup(format!("{category}: {msg}")),
                other => other,
            })?;
            if artifact.vocabulary.is_empty() {
                return Err(EngineError::startup(format!("{category}: vocabulary is empty")));
            }

            let rows = model.vocab_rows();
            if artifact.vocabulary.len() > rows {
                warn!(
                    category = %category,
                    vocabulary = artifact.vocabulary.len(),
                    embedding_rows = rows,
                    "vocabulary larger than embedding table, extra tokens map to unknown"
                );
            }
            let vocabulary = artifact.vocabulary.with_limit(rows);

            info!(
                category = %category,
                architecture = artifact.config.architecture(),
                tokenizer = ?artifact.config.tokenizer(),
                vocabulary = vocabulary.usable_len(),
                threshold = options.threshold_for(category),
                "category model ready"
            );
            models.insert(
                category,
                CategoryModel {
                    model,
                    vocabulary,
                    tokenizer: artifact.config.tokenizer().build(),
                },
            );
        }

        Ok(Self {
            models,
            scaler,
            options,
        })
    }

    /// Replace one category's tokenizer.
    pub fn with_tokenizer(
        mut self,
        category: Category,
        tokenizer: impl Tokenizer + 'static,
    ) -> EngineResult<Self> {
        let entry = self
            .models
            .get_mut(&category)
            .ok_or_else(|| EngineError::UnsupportedCategory(category.name().to_string()))?;
        entry.tokenizer = Box::new(tokenizer);
        Ok(self)
    }

    /// Loaded categories in canonical order.
    pub fn categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.models.contains_key(c))
            .collect()
    }

    pub fn supports(&self, category: Category) -> bool {
        self.models.contains_key(&category)
    }

    pub fn predict(&self, category: Category, text: &str) -> EngineResult<Prediction> {
        let entry = self.model(category)?;
        let batch = self.encode(entry, &[text]);
        let probability = entry
            .model
            .probabilities(&batch, &mut Mode::Eval)
            .first()
            .copied()
            .unwrap_or(0.0);
        debug!(
            category = %category,
            probability,
            text_preview = %truncate_chars(text, 50),
            "scored text"
        );
        Ok(self.judge(category, probability))
    }

    /// One prediction per text, same order. An empty batch returns an empty
    /// result without running the model.
    pub fn predict_batch<S: AsRef<str>>(
        &self,
        category: Category,
        texts: &[S],
    ) -> EngineResult<Vec<Prediction>> {
        let entry = self.model(category)?;
        let mut predictions = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.options.batch_size) {
            let batch = self.encode(entry, chunk);
            let probabilities = entry.model.probabilities(&batch, &mut Mode::Eval);
            debug!(category = %category, texts = chunk.len(), "scored chunk");
            predictions.extend(probabilities.into_iter().map(|p| self.judge(category, p)));
        }

        Ok(predictions)
    }

    /// Run every requested category over the input. Categories are answered
    /// in request order; a repeated category is answered once. All categories
    /// are checked before any inference runs.
    pub fn predict_many(
        &self,
        categories: &[Category],
        input: &TextInput,
    ) -> EngineResult<PredictionTable> {
        let mut seen = HashSet::new();
        let mut requested = Vec::with_capacity(categories.len());
        for &category in categories {
            self.model(category)?;
            if seen.insert(category) {
                requested.push(category);
            }
        }

        let texts = input.texts();
        let mut entries = Vec::with_capacity(requested.len());
        for category in requested {
            entries.push((category, self.predict_batch(category, &texts)?));
        }
        Ok(PredictionTable { entries })
    }

    fn model(&self, category: Category) -> EngineResult<&CategoryModel> {
        self.models
            .get(&category)
            .ok_or_else(|| EngineError::UnsupportedCategory(category.name().to_string()))
    }

    fn judge(&self, category: Category, probability: f32) -> Prediction {
        Prediction::judge(category, probability, self.options.threshold_for(category))
    }

    /// Tokenize, look up ids and compute standardized features for each text.
    fn encode<S: AsRef<str>>(&self, entry: &CategoryModel, texts: &[S]) -> EncodedBatch {
        let mut batch = EncodedBatch {
            token_ids: Vec::with_capacity(texts.len()),
            features: Vec::with_capacity(texts.len()),
        };
        for text in texts {
            let text = text.as_ref();
            let cleaned;
            let text = if self.options.strip_mentions {
                cleaned = strip_mentions_and_links(text);
                cleaned.as_str()
            } else {
                text
            };
            let tokens = entry.tokenizer.tokenize(text);
            batch.token_ids.push(entry.vocabulary.encode(&tokens));
            batch
                .features
                .push(self.scaler.standardize(&LexicalFeatures::from_text(text)));
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_tie_is_negative() {
        let at = Prediction::judge(Category::Toxic, 0.4, 0.4);
        assert!(!at.positive);
        assert_eq!(at.label, "Not toxic");
        let above = Prediction::judge(Category::Toxic, 0.4001, 0.4);
        assert!(above.positive);
        assert_eq!(above.label, "Toxic");
    }

    #[test]
    fn test_rounding_is_display_only() {
        let p = Prediction::judge(Category::Insult, 0.40049, 0.4);
        assert!(p.positive);
        assert!((p.rounded() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_text_input_json() {
        assert_eq!(TextInput::from_json(r#""hi""#).unwrap(), TextInput::from("hi"));
        assert_eq!(
            TextInput::from_json(r#"["a", "b"]"#).unwrap().texts(),
            vec!["a", "b"]
        );
        assert!(matches!(
            TextInput::from_json("null"),
            Err(EngineError::MalformedInput(_))
        ));
        assert!(matches!(
            TextInput::from_json(r#"["a", 3]"#),
            Err(EngineError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_options_validation() {
        let bad = EngineOptions {
            threshold: 1.5,
            ..EngineOptions::default()
        };
        assert!(bad.validate().is_err());
        let zero_batch = EngineOptions {
            batch_size: 0,
            ..EngineOptions::default()
        };
        assert!(zero_batch.validate().is_err());
        assert!(EngineOptions::default().validate().is_ok());
    }

    #[test]
    fn test_category_threshold_override() {
        let mut options = EngineOptions::default();
        options.category_thresholds.insert(Category::Obscene, 0.5);
        assert_eq!(options.threshold_for(Category::Obscene), 0.5);
        assert_eq!(options.threshold_for(Category::Toxic), DEFAULT_THRESHOLD);
    }
}
