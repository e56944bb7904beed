//! Persisting a finished run as JSON plus a short text summary.

use crate::{
    state::{AttackReport, RunStatus},
    CrackMode,
};

use chrono::Local;
use thiserror::Error;

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("could not write run summary: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not serialize run summary: {0}")]
    Json(#[from] serde_json::Error),
}

/// Seconds with 12 decimal places.
pub fn format_secs(d: Duration) -> String {
    format!("{:.12}s", d.as_secs_f64())
}

pub fn render_summary(report: &AttackReport) -> String {
    let rule = "=".repeat(60);
    let config = &report.config;
    let mode = match config.mode {
        CrackMode::Exhaustive { samples } => format!("exhaustive ({samples} samples)"),
        CrackMode::Ranking {
            prepass_samples,
            survivors,
            verify_samples,
        } => format!(
            "ranking (prepass {prepass_samples}, top-{survivors}, verify {verify_samples})"
        ),
    };
    let status = match &report.status {
        RunStatus::Completed => "completed".to_string(),
        RunStatus::Aborted { reason } => format!("aborted ({reason})"),
    };
    let length = report
        .length
        .map_or_else(|| "unknown".to_string(), |n| n.to_string());

    let mut lines = vec![
        rule.clone(),
        "TIMING SIDE-CHANNEL RUN SUMMARY".to_string(),
        rule,
        format!("Start: {}", report.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")),
        format!("End:   {}", report.finished_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")),
        format!("Duration: {}", format_secs(report.elapsed)),
        String::new(),
        "CONFIG:".to_string(),
        format!("  - username: {}", config.username),
        format!("  - alphabet: {}", config.alphabet),
        format!("  - length range: {}..={}", config.min_length, config.max_length),
        format!("  - length samples: {}", config.length_samples),
        format!("  - mode: {mode}"),
        format!("  - max in flight: {}", config.max_in_flight),
        String::new(),
        "RESULT:".to_string(),
        format!("  - Status: {status}"),
        format!("  - Password length: {length}"),
        format!("  - Discovered password: {}", report.recovered),
        format!("  - Per-character results: {}", report.positions.len()),
    ];
    if !report.low_confidence_positions.is_empty() {
        lines.push(format!("  - Low-confidence positions: {:?}", report.low_confidence_positions));
    }
    lines.push(format!("  - Oracle calls: {}", report.oracle_calls));
    lines.push(String::new());
    lines.push("(For details see JSON file.)".to_string());
    lines.join("\n") + "\n"
}

/// Write `run_summary_<timestamp>.json` and `.txt` into `dir`.
pub fn write_run_summary(
    dir: &Path,
    report: &AttackReport,
) -> Result<(PathBuf, PathBuf), ReportError> {
    fs::create_dir_all(dir)?;
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let json_path = dir.join(format!("run_summary_{stamp}.json"));
    let txt_path = dir.join(format!("run_summary_{stamp}.txt"));

    fs::write(&json_path, serde_json::to_string_pretty(report)?)?;
    fs::write(&txt_path, render_summary(report))?;
    Ok((txt_path, json_path))
}
