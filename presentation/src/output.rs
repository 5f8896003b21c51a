//! Terminal rendering. Answers go to stdout, everything else the user needs
//! to see goes to stdout in colour; diagnostics go through `tracing`.

use colored::Colorize;
use domain::models::{ModelInfo, SearchHit};
use infrastructure::pdf_converter::ConversionReport;
use infrastructure::vector_index::VectorIndex;
use shared::types::RagError;

/// Each source document once, with its best score, nearest first.
pub fn summarize_sources(hits: &[SearchHit]) -> Vec<(&str, f32)> {
    let mut sources: Vec<(&str, f32)> = Vec::new();
    for hit in hits {
        if !sources.iter().any(|(doc, _)| *doc == hit.chunk.document_id) {
            sources.push((&hit.chunk.document_id, hit.score));
        }
    }
    sources
}

pub fn print_sources(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("{}", "(no matching course material; answered without document context)".yellow());
        return;
    }
    let listed: Vec<String> = summarize_sources(hits)
        .into_iter()
        .map(|(doc, score)| format!("{doc} ({score:.2})"))
        .collect();
    println!("{} {}", "Sources:".cyan().bold(), listed.join(", ").dimmed());
}

pub fn format_size(bytes: u64) -> String {
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    let bytes = bytes as f64;
    if bytes >= GB {
        format!("{:.1} GB", bytes / GB)
    } else {
        format!("{:.0} MB", bytes / MB)
    }
}

pub fn print_models(models: &[ModelInfo], active: &[&str]) {
    if models.is_empty() {
        println!("{}", "No models installed. Try `ollama pull gemma2:2b`.".yellow());
        return;
    }
    println!("{}", "Installed models:".green().bold());
    for model in models {
        let marker = if active.iter().any(|a| infrastructure::ollama_client::model_matches(a, &model.name)) {
            "*".green().bold()
        } else {
            " ".normal()
        };
        println!("  {marker} {:<32} {}", model.name, format_size(model.size).dimmed());
    }
}

pub fn print_index_summary(index: &VectorIndex) {
    let manifest = index.manifest();
    println!(
        "{} {} documents, {} chunks, {} dims ({}, {}), built {}",
        "Index:".green().bold(),
        manifest.document_count,
        manifest.chunk_count,
        manifest.dimensions,
        manifest.embedding_model,
        manifest.metric,
        manifest.built_at.format("%Y-%m-%d %H:%M UTC"),
    );
}

pub fn print_conversion_report(report: &ConversionReport) {
    if report.is_empty() {
        println!("{}", "No PDF files found.".yellow());
        return;
    }
    for file in &report.converted {
        println!("  {} {} -> {}", "ok".green(), file.source.display(), file.output.display());
    }
    for failure in &report.failed {
        println!("  {} {failure}", "failed".red());
    }
    println!(
        "{} {} converted, {} failed",
        "Conversion:".green().bold(),
        report.converted.len(),
        report.failed.len()
    );
}

pub fn print_rag_error(error: &RagError) {
    eprintln!("{} {error}", "error:".red().bold());
    if let Some(hint) = error.hint() {
        eprintln!("{} {hint}", "hint:".yellow().bold());
    }
}

/// Top-level failure: the message chain, plus advice when the root cause is
/// one of ours.
pub fn print_error(error: &anyhow::Error) {
    match error.downcast_ref::<RagError>() {
        Some(rag) => print_rag_error(rag),
        None => {
            eprintln!("{} {error}", "error:".red().bold());
            for cause in error.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
        }
    }
}
