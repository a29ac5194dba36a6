// Colored terminal output for predictions.
//
// main.rs decides what to show; the formatting lives here.

use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::engine::{Category, Prediction, PredictionTable};

/// Show every category's verdict for a single text.
pub fn display_prediction(text: &str, predictions: &[Prediction]) {
    println!(
        "\n{}",
        format!("=== \"{}\" ===", super::truncate_chars(text, 60)).bold()
    );
    println!();
    println!(
        "  {:<10} {:>11}  {}",
        "Category".dimmed(),
        "Probability".dimmed(),
        "Judgement".dimmed()
    );
    println!("  {}", "-".repeat(40).dimmed());

    for prediction in predictions {
        println!(
            "  {:<10} {:>11.3}  {}",
            prediction.category.name(),
            prediction.rounded(),
            colorize_judgement(prediction),
        );
    }
    println!();
}

/// One line per text with the judgement for each requested category.
pub fn display_table(texts: &[String], table: &PredictionTable) {
    let categories = table.categories();
    if texts.is_empty() || categories.is_empty() {
        println!("Nothing to score.");
        return;
    }

    println!(
        "\n{}",
        format!(
            "=== {} texts x {} categories ===",
            texts.len(),
            categories.len()
        )
        .bold()
    );
    println!();

    let header: Vec<String> = categories.iter().map(|c| format!("{:>10}", c.name())).collect();
    println!("  {:>4}  {}  {}", "#".dimmed(), header.join(" ").dimmed(), "Text".dimmed());

    for (i, text) in texts.iter().enumerate() {
        let cells: Vec<String> = categories
            .iter()
            .map(|&c| match table.get(c).and_then(|p| p.get(i)) {
                Some(p) => format!("{:>10}", format!("{:.3}", p.rounded()))
                    .color(if p.positive { colored::Color::Red } else { colored::Color::Green })
                    .to_string(),
                None => format!("{:>10}", "-"),
            })
            .collect();
        println!(
            "  {:>4}. {} {}",
            i + 1,
            cells.join(" "),
            super::truncate_chars(text, 60).dimmed()
        );
    }
    println!();

    for category in categories {
        let flagged = table
            .get(category)
            .map(|p| p.iter().filter(|p| p.positive).count())
            .unwrap_or(0);
        if flagged > 0 {
            println!(
                "  {} {} flagged {}",
                "!".bright_red(),
                flagged,
                category.positive_label().to_lowercase()
            );
        }
    }
}

/// Report which artifacts are present for `youtoxic check`.
pub fn display_check(model_dir: &Path, categories: &[Category], missing: &[PathBuf]) {
    println!("\n{}", "=== Model artifacts ===".bold());
    println!("  Directory: {}", model_dir.display());
    let names: Vec<&str> = categories.iter().map(|c| c.name()).collect();
    println!("  Categories: {}", names.join(", "));

    if missing.is_empty() {
        println!("  {} all artifacts present", "ok".green().bold());
        return;
    }
    println!("  {} {} missing:", "!!".red().bold(), missing.len());
    for path in missing {
        println!("    {}", path.display().to_string().dimmed());
    }
}

fn colorize_judgement(prediction: &Prediction) -> colored::ColoredString {
    if prediction.positive {
        prediction.label.red().bold()
    } else {
        prediction.label.green()
    }
}
