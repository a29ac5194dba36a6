use std::io::Read;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use youtoxic::engine::loader::{load_engine, missing_artifacts};
use youtoxic::engine::{Category, PredictionTable, TextInput};
use youtoxic::output::terminal;
use youtoxic::scorer::{EngineScorer, ToxicityScorer};

mod config;

/// youtoxic: multi-category toxicity classification.
///
/// Scores text for toxicity, insults, obscenity and identity-based prejudice
/// with locally stored recurrent models.
#[derive(Parser)]
#[command(name = "youtoxic", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a single text
    Predict {
        /// Text to score
        text: String,

        /// Category to score (repeatable; default: every configured category)
        #[arg(short = 'c', long = "category")]
        categories: Vec<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Score texts read from stdin, one per line
    Batch {
        /// Read a JSON string or array of strings from stdin and print JSON
        #[arg(long)]
        json: bool,

        /// Category to score (repeatable; default: every configured category)
        #[arg(short = 'c', long = "category")]
        categories: Vec<String>,

        /// Texts per progress step (default: YOUTOXIC_BATCH_SIZE)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Verify the model artifacts are in place
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("youtoxic=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Predict {
            text,
            categories,
            json,
        } => {
            let mut config = config::Config::load()?;
            config.categories = resolve_categories(&categories, &config.categories)?;
            let scorer = create_scorer(&config)?;

            let table = scorer
                .score(&config.categories, TextInput::Single(text.clone()))
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&table)?);
            } else {
                let predictions: Vec<_> = table.iter().flat_map(|(_, p)| p.iter().copied()).collect();
                terminal::display_prediction(&text, &predictions);
            }
        }

        Commands::Batch {
            json,
            categories,
            chunk_size,
        } => {
            let mut config = config::Config::load()?;
            config.categories = resolve_categories(&categories, &config.categories)?;

            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read texts from stdin")?;
            let texts: Vec<String> = if json {
                TextInput::from_json(&raw)?.texts().into_iter().map(String::from).collect()
            } else {
                raw.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(String::from)
                    .collect()
            };

            if texts.is_empty() {
                println!("No texts on stdin.");
                return Ok(());
            }

            let scorer = create_scorer(&config)?;
            let chunk_size = chunk_size.unwrap_or(config.batch_size).max(1);
            info!(texts = texts.len(), chunk_size, "scoring batch");

            let pb = ProgressBar::new(texts.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  Scoring [{bar:30}] {pos}/{len} ({eta})")
                    .context("Invalid progress bar template")?,
            );

            let mut table = PredictionTable::default();
            for chunk in texts.chunks(chunk_size) {
                let part = scorer
                    .score(&config.categories, TextInput::Batch(chunk.to_vec()))
                    .await?;
                table.append(part);
                pb.inc(chunk.len() as u64);
            }
            pb.finish_and_clear();

            if json {
                println!("{}", serde_json::to_string_pretty(&table)?);
            } else {
                terminal::display_table(&texts, &table);
            }
        }

        Commands::Check => {
            let config = config::Config::load()?;
            let missing = missing_artifacts(&config.model_dir, &config.categories);
            terminal::display_check(&config.model_dir, &config.categories, &missing);
            if !missing.is_empty() {
                anyhow::bail!("{} model artifacts missing", missing.len());
            }

            // Files exist; make sure they also load and agree on shapes.
            load_engine(
                &config.model_dir,
                &config.categories,
                config.engine_options(),
                config.max_len,
            )?;
            println!("  {} models load cleanly", "ok".green().bold());
        }
    }

    Ok(())
}

/// Categories named on the command line, or the configured ones when none were given.
fn resolve_categories(requested: &[String], configured: &[Category]) -> Result<Vec<Category>> {
    if requested.is_empty() {
        return Ok(configured.to_vec());
    }
    config::parse_categories(&requested.join(","))
}

fn create_scorer(config: &config::Config) -> Result<EngineScorer> {
    config.require_artifacts()?;
    info!(model_dir = %config.model_dir.display(), "loading models");
    let engine = load_engine(
        &config.model_dir,
        &config.categories,
        config.engine_options(),
        config.max_len,
    )?;
    Ok(EngineScorer::new(engine))
}
