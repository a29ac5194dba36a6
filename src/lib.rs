// youtoxic: multi-category toxicity classification
//
// This is the library root. `engine` is the public entry point; `text`, `nn`
// and `model` are the layers it is built from.

pub mod engine;
pub mod error;
pub mod model;
pub mod nn;
pub mod output;
pub mod scorer;
pub mod text;
