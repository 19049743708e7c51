use std::io::Write;
use std::time::Duration;

use bibenrich_core::{CitationRecord, IdentifierKind, InjectionSummary, ResolutionSummary};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Per-citation progress on stderr. Hidden when stderr is not a terminal.
pub fn progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.green/dim}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// List what extraction found, without any lookups.
pub fn print_dry_run(
    w: &mut dyn Write,
    citations: &[CitationRecord],
    color: ColorMode,
) -> std::io::Result<()> {
    let header = format!("DRY RUN: {} citations extracted", citations.len());
    if color.enabled() {
        writeln!(w, "{}", header.bold())?;
    } else {
        writeln!(w, "{}", header)?;
    }
    writeln!(w)?;

    for (i, citation) in citations.iter().enumerate() {
        if color.enabled() {
            writeln!(w, "[{}] {}", i + 1, citation.key.bold().cyan())?;
        } else {
            writeln!(w, "[{}] {}", i + 1, citation.key)?;
        }
        for kind in IdentifierKind::ALL {
            if let Some(value) = citation.extracted.get(kind) {
                writeln!(w, "    {}: {}", kind.annotation(), value)?;
            }
        }
        if color.enabled() {
            writeln!(w, "    {}", citation.normalized_text.dimmed())?;
        } else {
            writeln!(w, "    {}", citation.normalized_text)?;
        }
        writeln!(w)?;
    }
    Ok(())
}

pub fn print_resolution_summary(
    w: &mut dyn Write,
    summary: &ResolutionSummary,
    color: ColorMode,
) -> std::io::Result<()> {
    let line = format!("Resolved {} of {} citations", summary.resolved, summary.total);
    if color.enabled() {
        writeln!(w, "{}", line.bold().green())?;
    } else {
        writeln!(w, "{}", line)?;
    }

    for (source, count) in &summary.by_source {
        writeln!(w, "  {:<12} {}", source.name(), count)?;
    }

    let unresolved = summary.unresolved();
    if unresolved > 0 {
        let line = format!("  {} left as raw text", unresolved);
        if color.enabled() {
            writeln!(w, "{}", line.yellow())?;
        } else {
            writeln!(w, "{}", line)?;
        }
    }
    if summary.failed_queries > 0 {
        let line = format!(
            "  ({} queries failed and were counted as not found)",
            summary.failed_queries
        );
        if color.enabled() {
            writeln!(w, "{}", line.dimmed())?;
        } else {
            writeln!(w, "{}", line)?;
        }
    }
    Ok(())
}

pub fn print_injection_summary(
    w: &mut dyn Write,
    kind: IdentifierKind,
    summary: &InjectionSummary,
    color: ColorMode,
) -> std::io::Result<()> {
    let line = format!(
        "Added {} to {} of {} entries",
        kind.bib_field(),
        summary.added,
        summary.entries
    );
    if color.enabled() {
        writeln!(w, "{}", line.bold().green())?;
    } else {
        writeln!(w, "{}", line)?;
    }
    if summary.already_present > 0 {
        writeln!(w, "  {} already had one", summary.already_present)?;
    }
    if summary.not_found > 0 {
        let line = format!("  {} not found", summary.not_found);
        if color.enabled() {
            writeln!(w, "{}", line.yellow())?;
        } else {
            writeln!(w, "{}", line)?;
        }
    }
    Ok(())
}

pub fn print_deposit_summary(
    w: &mut dyn Write,
    batch_id: &str,
    papers: usize,
    issues: usize,
    citations: usize,
    color: ColorMode,
) -> std::io::Result<()> {
    let line = format!(
        "Deposit batch {}: {} articles in {} issues, {} citations",
        batch_id, papers, issues, citations
    );
    if color.enabled() {
        writeln!(w, "{}", line.bold().green())?;
    } else {
        writeln!(w, "{}", line)?;
    }
    Ok(())
}
