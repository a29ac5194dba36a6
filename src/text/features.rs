// Hand-engineered lexical features and their standardization.
//
// Two scalars per text: the share of uppercase characters and the share of
// distinct words. Both are standardized with constants fit offline, and the
// same transform runs on the single-text and batch paths.

use serde::Deserialize;

use crate::error::{EngineError, EngineResult};

/// Number of lexical features fed to the fusion head.
pub const FEATURE_COUNT: usize = 2;

/// Raw (unstandardized) features for one text. Both ratios lie in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LexicalFeatures {
    /// Uppercase characters in the original text / characters in the lowercased text.
    pub caps_ratio: f32,
    /// Distinct whitespace tokens / total whitespace tokens (lowercased).
    pub unique_ratio: f32,
}

impl LexicalFeatures {
    /// Compute both ratios. Empty text (or text with no tokens) yields 0.0 for
    /// the ratio whose denominator is zero.
    pub fn from_text(text: &str) -> Self {
        let lowered = text.to_lowercase();

        let length = lowered.chars().count();
        let capitals = text.chars().filter(|c| c.is_uppercase()).count();
        let caps_ratio = if length == 0 {
            0.0
        } else {
            capitals as f32 / length as f32
        };

        let words: Vec<&str> = lowered.split_whitespace().collect();
        let unique_ratio = if words.is_empty() {
            0.0
        } else {
            let mut distinct = words.clone();
            distinct.sort_unstable();
            distinct.dedup();
            distinct.len() as f32 / words.len() as f32
        };

        Self {
            caps_ratio,
            unique_ratio,
        }
    }

    pub fn as_array(&self) -> [f32; FEATURE_COUNT] {
        [self.caps_ratio, self.unique_ratio]
    }
}

/// Features for each text, in input order.
pub fn extract_features<S: AsRef<str>>(texts: &[S]) -> Vec<LexicalFeatures> {
    texts
        .iter()
        .map(|t| LexicalFeatures::from_text(t.as_ref()))
        .collect()
}

/// Pre-fit standardization constants: `(x - mean) / scale` per feature.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FeatureScaler {
    mean: [f32; FEATURE_COUNT],
    scale: [f32; FEATURE_COUNT],
}

impl FeatureScaler {
    /// Validate and wrap the constants. A zero or non-finite scale would turn
    /// every standardized feature into inf/NaN, so it is a startup failure.
    pub fn new(mean: [f32; FEATURE_COUNT], scale: [f32; FEATURE_COUNT]) -> EngineResult<Self> {
        let scaler = Self { mean, scale };
        scaler.validate()?;
        Ok(scaler)
    }

    /// Parse `{"mean": [..], "scale": [..]}` and validate.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let scaler: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::startup(format!("invalid scaler constants: {e}")))?;
        scaler.validate()?;
        Ok(scaler)
    }

    fn validate(&self) -> EngineResult<()> {
        for i in 0..FEATURE_COUNT {
            if !self.mean[i].is_finite() {
                return Err(EngineError::startup(format!(
                    "scaler mean[{i}] is not finite"
                )));
            }
            if !self.scale[i].is_finite() || self.scale[i] == 0.0 {
                return Err(EngineError::startup(format!(
                    "scaler scale[{i}] must be finite and non-zero, got {}",
                    self.scale[i]
                )));
            }
        }
        Ok(())
    }

    pub fn standardize(&self, features: &LexicalFeatures) -> [f32; FEATURE_COUNT] {
        let raw = features.as_array();
        let mut out = [0.0; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            out[i] = (raw[i] - self.mean[i]) / self.scale[i];
        }
        out
    }

    pub fn standardize_all(&self, features: &[LexicalFeatures]) -> Vec<[f32; FEATURE_COUNT]> {
        features.iter().map(|f| self.standardize(f)).collect()
    }
}
