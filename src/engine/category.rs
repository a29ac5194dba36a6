// Toxicity categories and their judgement labels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Toxic,
    Insult,
    Obscene,
    Prejudice,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Toxic,
        Category::Insult,
        Category::Obscene,
        Category::Prejudice,
    ];

    /// Canonical name, also the artifact subdirectory.
    pub fn name(self) -> &'static str {
        match self {
            Category::Toxic => "toxic",
            Category::Insult => "insult",
            Category::Obscene => "obscene",
            Category::Prejudice => "prejudice",
        }
    }

    /// Judgement shown when probability > threshold.
    pub fn positive_label(self) -> &'static str {
        match self {
            Category::Toxic => "Toxic",
            Category::Insult => "Insult",
            Category::Obscene => "Obscene",
            Category::Prejudice => "Prejudice",
        }
    }

    pub fn negative_label(self) -> &'static str {
        match self {
            Category::Toxic => "Not toxic",
            Category::Insult => "Not an insult",
            Category::Obscene => "Not obscene",
            Category::Prejudice => "Not prejudice",
        }
    }

    pub fn label(self, positive: bool) -> &'static str {
        if positive {
            self.positive_label()
        } else {
            self.negative_label()
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "toxic" | "toxicity" => Ok(Category::Toxic),
            "insult" => Ok(Category::Insult),
            "obscene" | "obscenity" => Ok(Category::Obscene),
            "prejudice" | "identity" | "identity_hate" | "identity hate" => Ok(Category::Prejudice),
            _ => Err(EngineError::UnsupportedCategory(s.to_string())),
        }
    }
}
