// Trained classifier models: parameter storage, configuration and the two
// network variants.

pub mod classifier;
pub mod config;
pub mod weights;

pub use classifier::{EncodedBatch, ToxicityModel};
pub use config::ModelConfig;
pub use weights::WeightStore;
