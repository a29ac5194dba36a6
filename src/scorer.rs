// Async scorer: the boundary between async callers and the synchronous engine.
//
// The engine does CPU-bound work and never awaits. Async callers (request
// handlers, the CLI) go through this trait so inference runs on the blocking
// pool and each category can run on its own thread.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::debug;

use crate::engine::{Category, Engine, PredictionTable, TextInput};
use crate::error::EngineError;

/// Trait for scoring text across toxicity categories.
#[async_trait]
pub trait ToxicityScorer: Send + Sync {
    /// Score texts for the given categories, results in request order.
    async fn score(&self, categories: &[Category], input: TextInput) -> Result<PredictionTable>;

    /// Score a single text for every loaded category.
    async fn score_text(&self, text: &str) -> Result<PredictionTable> {
        self.score(&self.categories(), TextInput::from(text)).await
    }

    /// Categories this scorer can answer.
    fn categories(&self) -> Vec<Category>;
}

/// Scorer backed by a shared local engine.
#[derive(Clone)]
pub struct EngineScorer {
    engine: Arc<Engine>,
}

impl EngineScorer {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn from_shared(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ToxicityScorer for EngineScorer {
    /// One spawn_blocking task per distinct category, joined in request order.
    async fn score(&self, categories: &[Category], input: TextInput) -> Result<PredictionTable> {
        let mut distinct: Vec<Category> = Vec::with_capacity(categories.len());
        for &category in categories {
            if !distinct.contains(&category) {
                distinct.push(category);
            }
        }
        // Reject unknown categories before spawning anything.
        for &category in &distinct {
            if !self.engine.supports(category) {
                return Err(EngineError::UnsupportedCategory(category.name().to_string()).into());
            }
        }

        let input = Arc::new(input);
        let tasks = distinct.into_iter().map(|category| {
            let engine = Arc::clone(&self.engine);
            let input = Arc::clone(&input);
            async move {
                let table = tokio::task::spawn_blocking(move || engine.predict_many(&[category], &input))
                    .await
                    .context("spawn_blocking panicked")?;
                Ok::<_, anyhow::Error>(table?)
            }
        });
        let tables = try_join_all(tasks).await?;

        debug!(categories = tables.len(), texts = input.len(), "scored input");
        let mut table = PredictionTable::default();
        for t in tables {
            table.append(t);
        }
        Ok(table)
    }

    fn categories(&self) -> Vec<Category> {
        self.engine.categories()
    }
}
