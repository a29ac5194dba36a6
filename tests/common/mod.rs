// Shared fixtures: tiny deterministic models built from a seeded StdRng.
//
// Shapes are small enough to run in milliseconds but keep every tensor the
// real artifacts carry, under the same names.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use ndarray::{Array2, ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use youtoxic::engine::loader::{CONFIG_FILE, SCALER_FILE, VOCAB_FILE, WEIGHTS_FILE};
use youtoxic::engine::{Category, Engine, EngineOptions, ModelArtifacts};
use youtoxic::model::config::{CapsuleConfig, PoolingConfig};
use youtoxic::model::{ModelConfig, WeightStore};
use youtoxic::nn::encoder::{DropoutConfig, EncoderConfig, LayerSpec};
use youtoxic::nn::recurrent::CellKind;
use youtoxic::text::features::FeatureScaler;
use youtoxic::text::tokenizer::TokenizerKind;
use youtoxic::text::vocab::Vocabulary;

/// The last two only ever come out of the rule tokenizer.
pub const TOKENS: [&str; 12] = [
    "<unk>", "you", "are", "an", "idiot", "have", "a", "nice", "day", "stupid", "xxmaj", "!",
];

pub const EMBEDDING_DIM: usize = 8;
pub const MAX_LEN: usize = 12;

pub fn vocabulary() -> Vocabulary {
    Vocabulary::from_tokens(TOKENS.iter().map(|t| t.to_string()).collect())
}

pub fn scaler() -> FeatureScaler {
    FeatureScaler::new([0.05, 0.9], [0.1, 0.15]).unwrap()
}

fn random_values(rng: &mut StdRng, len: usize, scale: f32) -> Vec<f32> {
    (0..len).map(|_| rng.random_range(-scale..scale)).collect()
}

fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize, scale: f32) -> Array2<f32> {
    Array2::from_shape_vec((rows, cols), random_values(rng, rows * cols, scale)).unwrap()
}

fn insert_linear(store: &mut WeightStore, rng: &mut StdRng, prefix: &str, input: usize, output: usize) {
    store.insert_matrix(format!("{prefix}.weight"), random_matrix(rng, output, input, 0.5));
    store.insert_vector(format!("{prefix}.bias"), random_values(rng, output, 0.1));
}

fn insert_batch_norm(store: &mut WeightStore, rng: &mut StdRng, prefix: &str, features: usize) {
    store.insert_vector(
        format!("{prefix}.weight"),
        (0..features).map(|_| rng.random_range(0.8..1.2)).collect(),
    );
    store.insert_vector(format!("{prefix}.bias"), random_values(rng, features, 0.1));
    store.insert_vector(format!("{prefix}.running_mean"), random_values(rng, features, 0.2));
    store.insert_vector(
        format!("{prefix}.running_var"),
        (0..features).map(|_| rng.random_range(0.5..1.5)).collect(),
    );
}

fn insert_recurrent(
    store: &mut WeightStore,
    rng: &mut StdRng,
    index: usize,
    layer: LayerSpec,
    input: usize,
    bidirectional: bool,
) {
    let gates = layer.kind.gate_count() * layer.hidden_size;
    let suffixes: &[&str] = if bidirectional { &["", "_reverse"] } else { &[""] };
    for suffix in suffixes {
        let prefix = format!("rnns.{index}");
        store.insert_matrix(
            format!("{prefix}.weight_ih_l0{suffix}"),
            random_matrix(rng, gates, input, 0.4),
        );
        store.insert_matrix(
            format!("{prefix}.weight_hh_l0{suffix}"),
            random_matrix(rng, gates, layer.hidden_size, 0.4),
        );
        store.insert_vector(format!("{prefix}.bias_ih_l0{suffix}"), random_values(rng, gates, 0.1));
        store.insert_vector(format!("{prefix}.bias_hh_l0{suffix}"), random_values(rng, gates, 0.1));
    }
}

fn insert_encoder(store: &mut WeightStore, rng: &mut StdRng, config: &EncoderConfig) {
    store.insert_matrix(
        "embedding.weight",
        random_matrix(rng, TOKENS.len(), config.embedding_dim, 1.0),
    );
    let directions = if config.bidirectional { 2 } else { 1 };
    let mut input = config.embedding_dim;
    for (index, layer) in config.layers.iter().enumerate() {
        insert_recurrent(store, rng, index, *layer, input, config.bidirectional);
        input = layer.hidden_size * directions;
    }
}

/// BiLSTM(4) -> BiGRU(4) over 8-wide embeddings, 3 capsules of dim 2.
pub fn capsule_config() -> CapsuleConfig {
    CapsuleConfig {
        encoder: EncoderConfig {
            embedding_dim: EMBEDDING_DIM,
            bidirectional: true,
            layers: vec![
                LayerSpec {
                    kind: CellKind::Lstm,
                    hidden_size: 4,
                },
                LayerSpec {
                    kind: CellKind::Gru,
                    hidden_size: 4,
                },
            ],
            dropout: DropoutConfig::default(),
        },
        max_len: MAX_LEN,
        num_capsules: 3,
        capsule_dim: 2,
        routings: 3,
        attention_layers: vec![0, 1],
        hidden: 6,
        dropout: 0.1,
        tokenizer: TokenizerKind::Word,
    }
}

pub fn capsule_weights(seed: u64) -> WeightStore {
    let config = capsule_config();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut store = WeightStore::default();
    insert_encoder(&mut store, &mut rng, &config.encoder);

    let width = 8; // 2 directions x 4 hidden
    let caps = config.num_capsules * config.capsule_dim;
    // Stored with the leading unit axis the exported kernel has.
    let kernel = random_values(&mut rng, width * caps, 0.5);
    store.insert("caps_layer.W", ArrayD::from_shape_vec(IxDyn(&[1, width, caps]), kernel).unwrap());
    insert_linear(&mut store, &mut rng, "lincaps", caps, 1);

    for i in 0..2 {
        // Column-vector weight, as nn.Parameter(hidden, 1) exports it.
        let weight = random_values(&mut rng, width, 0.5);
        store.insert(
            format!("attention.{i}.weight"),
            ArrayD::from_shape_vec(IxDyn(&[width, 1]), weight).unwrap(),
        );
        store.insert_vector(format!("attention.{i}.b"), random_values(&mut rng, MAX_LEN, 0.1));
    }

    // attention 8 + 8, capsule scalar 1, mean 8, max 8, features 2
    let fused = 8 + 8 + 1 + 8 + 8 + 2;
    insert_linear(&mut store, &mut rng, "linear", fused, config.hidden);
    insert_batch_norm(&mut store, &mut rng, "bn", config.hidden);
    insert_linear(&mut store, &mut rng, "out", config.hidden, 1);
    store
}

/// Unidirectional LSTM(6) -> LSTM(5), windows of 4, at most 8 steps kept.
pub fn pooling_config() -> PoolingConfig {
    PoolingConfig {
        encoder: EncoderConfig {
            embedding_dim: EMBEDDING_DIM,
            bidirectional: false,
            layers: vec![
                LayerSpec {
                    kind: CellKind::Lstm,
                    hidden_size: 6,
                },
                LayerSpec {
                    kind: CellKind::Lstm,
                    hidden_size: 5,
                },
            ],
            dropout: DropoutConfig {
                embedding: 0.025,
                input: 0.2,
                hidden: 0.15,
                weight: 0.25,
            },
        },
        bptt: 4,
        max_seq: 8,
        head_sizes: vec![15, 7, 2],
        head_dropouts: vec![0.2, 0.1],
        tokenizer: TokenizerKind::Rules,
    }
}

pub fn pooling_weights(seed: u64) -> WeightStore {
    let config = pooling_config();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut store = WeightStore::default();
    insert_encoder(&mut store, &mut rng, &config.encoder);
    for (i, pair) in config.head_sizes.windows(2).enumerate() {
        insert_batch_norm(&mut store, &mut rng, &format!("layers.{i}.bn"), pair[0]);
        insert_linear(&mut store, &mut rng, &format!("layers.{i}.lin"), pair[0], pair[1]);
    }
    store
}

pub fn capsule_artifacts(seed: u64) -> ModelArtifacts {
    ModelArtifacts {
        config: ModelConfig::CapsuleAttention(capsule_config()),
        weights: capsule_weights(seed),
        vocabulary: vocabulary(),
    }
}

pub fn pooling_artifacts(seed: u64) -> ModelArtifacts {
    ModelArtifacts {
        config: ModelConfig::Pooling(pooling_config()),
        weights: pooling_weights(seed),
        vocabulary: vocabulary(),
    }
}

/// Toxic and insult as capsule-attention models, obscene as a pooling
/// model. Prejudice is deliberately not loaded.
pub fn artifacts() -> HashMap<Category, ModelArtifacts> {
    HashMap::from([
        (Category::Toxic, capsule_artifacts(1)),
        (Category::Insult, capsule_artifacts(2)),
        (Category::Obscene, pooling_artifacts(3)),
    ])
}

pub fn engine_with(options: EngineOptions) -> Engine {
    Engine::new(artifacts(), scaler(), options).unwrap()
}

pub fn engine() -> Engine {
    engine_with(EngineOptions::default())
}

/// Write `artifacts()` in the on-disk layout the loader reads.
pub fn write_model_dir(dir: &Path) {
    fs::write(
        dir.join(SCALER_FILE),
        r#"{"mean": [0.05, 0.9], "scale": [0.1, 0.15]}"#,
    )
    .unwrap();

    for (category, artifact) in artifacts() {
        let category_dir = dir.join(category.name());
        fs::create_dir_all(&category_dir).unwrap();
        fs::write(
            category_dir.join(WEIGHTS_FILE),
            artifact.weights.to_safetensors().unwrap(),
        )
        .unwrap();
        fs::write(
            category_dir.join(VOCAB_FILE),
            serde_json::to_string(&TOKENS).unwrap(),
        )
        .unwrap();
        fs::write(
            category_dir.join(CONFIG_FILE),
            serde_json::to_string(&artifact.config).unwrap(),
        )
        .unwrap();
    }
}
