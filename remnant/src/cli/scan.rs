use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{format, Cell, Row, Table};
use remnant_common::config::{CollectorId, ScanConfig};
use remnant_common::error::{RemnantError, Result};
use remnant_common::model::{
    human_size, ConfidenceTier, RecommendedAction, ScanReport, StoreSkip,
};
use remnant_core::{ScanEngine, ScanSignal};
use tracing::debug;

fn parse_tier(s: &str) -> std::result::Result<ConfidenceTier, String> {
    match s.to_lowercase().as_str() {
        "confirmed" => Ok(ConfidenceTier::Confirmed),
        "orphan" => Ok(ConfidenceTier::Orphan),
        "heuristic" => Ok(ConfidenceTier::Heuristic),
        "low" | "low-confidence" => Ok(ConfidenceTier::LowConfidence),
        other => Err(format!(
            "unknown tier '{other}' (expected one of: confirmed, orphan, heuristic, low)"
        )),
    }
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Path to a scan configuration file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run only these collectors (repeatable)
    #[arg(long = "collector", value_name = "ID")]
    pub collectors: Vec<CollectorId>,

    /// Hide findings below this confidence tier
    #[arg(long, value_parser = parse_tier, default_value = "low")]
    pub min_tier: ConfidenceTier,

    /// Include artifacts still owned by installed software
    #[arg(long)]
    pub all: bool,

    /// Emit the full report as JSON instead of a table
    #[arg(long)]
    pub json: bool,

    /// Write the JSON report to a file
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

impl ScanArgs {
    pub async fn run(&self) -> Result<()> {
        let mut config = ScanConfig::load(self.config.as_deref())?;
        if !self.collectors.is_empty() {
            config.collectors = self.collectors.clone();
        }
        let engine = ScanEngine::new(config)?;

        let signal = ScanSignal::new();
        let cancel = signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupt received, finishing with partial results");
                cancel.cancel();
            }
        });

        // A spinner on stderr keeps stdout clean for --json.
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.blue} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message("Scanning evidence stores...");
        spinner.enable_steady_tick(std::time::Duration::from_millis(120));

        let report = engine.run(signal).await;
        spinner.finish_and_clear();
        let report = report?;

        if let Some(path) = &self.output {
            let raw = serde_json::to_string_pretty(&report)?;
            std::fs::write(path, raw).map_err(|e| {
                RemnantError::Report(format!("could not write {}: {e}", path.display()))
            })?;
            println!("Report written to {}", path.display());
        } else if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        self.print_table(&report);
        Ok(())
    }

    fn visible<'a>(
        &self,
        report: &'a ScanReport,
    ) -> Vec<&'a remnant_common::model::ClassifiedArtifact> {
        report
            .artifacts
            .iter()
            .filter(|a| self.all || a.action != RecommendedAction::Ignore)
            .filter(|a| a.tier >= self.min_tier)
            .collect()
    }

    fn print_table(&self, report: &ScanReport) {
        let visible = self.visible(report);
        if visible.is_empty() {
            println!("{}", "No residual artifacts found".green());
        } else {
            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
            table.add_row(Row::new(vec![
                Cell::new("Tier").style_spec("b"),
                Cell::new("Action").style_spec("b"),
                Cell::new("Name").style_spec("b"),
                Cell::new("Location").style_spec("b"),
                Cell::new("Size").style_spec("b"),
            ]));
            for artifact in &visible {
                let tier_style = match artifact.tier {
                    ConfidenceTier::Confirmed => "Fg",
                    ConfidenceTier::Orphan => "Fb",
                    ConfidenceTier::Heuristic => "Fy",
                    ConfidenceTier::LowConfidence => "Fr",
                };
                let size = artifact
                    .candidate
                    .size_bytes
                    .map(human_size)
                    .unwrap_or_else(|| "-".to_string());
                table.add_row(Row::new(vec![
                    Cell::new(artifact.tier.as_str()).style_spec(tier_style),
                    Cell::new(artifact.action.as_str()),
                    Cell::new(&artifact.candidate.observed_name),
                    Cell::new(&artifact.candidate.location.dedup_key()),
                    Cell::new(&size),
                ]));
            }
            table.printstd();
        }

        let summary = &report.summary;
        println!(
            "{}",
            format!(
                "{} findings, {} reclaimable ({} stores scanned)",
                summary.candidate_count,
                human_size(summary.total_reclaimable_bytes),
                summary.stores_scanned
            )
            .bold()
        );
        for skip in &summary.stores_skipped {
            print_skip(skip);
        }
    }
}

fn print_skip(skip: &StoreSkip) {
    println!(
        "{} {} store '{}' skipped: {}",
        "Warning:".yellow(),
        format!("{:?}", skip.source).to_lowercase(),
        skip.store,
        skip.detail
    );
}
