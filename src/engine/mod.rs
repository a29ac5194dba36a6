// Inference engine: the category registry and its prediction surface, plus
// the loader that builds it from a model directory.

pub mod category;
pub mod loader;
pub mod pipeline;

pub use category::Category;
pub use pipeline::{
    round_probability, Engine, EngineOptions, ModelArtifacts, Prediction, PredictionTable, TextInput,
    DEFAULT_BATCH_SIZE, DEFAULT_THRESHOLD,
};
