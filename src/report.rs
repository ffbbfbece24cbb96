//! Run statistics and export of the collected records.

use crate::config::{Config, OutputFormat};
use crate::crawler::CrawlOutcome;
use crate::error::Result;
use crate::models::{AdvisorRecord, EmailPresence};
use crate::tracker::ProgressTracker;
use chrono::Local;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Summary figures for one run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RunStatistics {
    pub total_records: usize,
    pub with_email: usize,
    pub with_website: usize,
    /// Distinct non-empty cities.
    pub unique_cities: usize,
    pub processed_items: usize,
    pub failed_items: usize,
    /// Share of processed rows that produced a record, in percent.
    pub success_rate: f64,
    pub elapsed: Option<Duration>,
}

impl RunStatistics {
    pub(crate) fn compute(records: &[AdvisorRecord], tracker: &ProgressTracker) -> Self {
        let unique_cities: HashSet<&str> = records
            .iter()
            .map(|r| r.city.as_str())
            .filter(|c| !c.is_empty())
            .collect();
        let processed = tracker.processed();
        let success_rate = if processed == 0 {
            0.0
        } else {
            tracker.succeeded() as f64 / processed as f64 * 100.0
        };

        Self {
            total_records: records.len(),
            with_email: records
                .iter()
                .filter(|r| r.email_present == EmailPresence::Yes)
                .count(),
            with_website: records.iter().filter(|r| !r.website.is_empty()).count(),
            unique_cities: unique_cities.len(),
            processed_items: processed,
            failed_items: tracker.failed(),
            success_rate,
            elapsed: tracker.elapsed(),
        }
    }

    pub(crate) fn log(&self) {
        tracing::info!(target: "report_task", "Collection Statistics:");
        tracing::info!(target: "report_task", "Total records: {}", self.total_records);
        tracing::info!(target: "report_task", "Entries with email: {}", self.with_email);
        tracing::info!(target: "report_task", "Entries with website: {}", self.with_website);
        tracing::info!(target: "report_task", "Unique cities: {}", self.unique_cities);
        tracing::info!(target: "report_task", "Processed items: {}", self.processed_items);
        tracing::info!(target: "report_task", "Failed items: {}", self.failed_items);
        tracing::info!(target: "report_task", "Success rate: {:.2}%", self.success_rate);
        if let Some(elapsed) = self.elapsed {
            tracing::info!(target: "report_task", "Duration: {:.2?}", elapsed);
        }
    }
}

/// What the reporter produced for a run.
#[derive(Debug)]
pub(crate) struct RunReport {
    pub statistics: RunStatistics,
    pub export_path: Option<PathBuf>,
    pub error_log_path: Option<PathBuf>,
}

/// Computes and logs statistics, exports the records and writes the error log.
///
/// Only a failed export is an error; a failed error-log write is logged.
pub(crate) fn finalize(outcome: &CrawlOutcome, config: &Config) -> Result<RunReport> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

    let statistics = RunStatistics::compute(&outcome.records, &outcome.tracker);
    statistics.log();

    let export_path = export_records(
        &outcome.records,
        &config.output_dir,
        config.mode_label(),
        config.output_format,
        &timestamp,
    )?;
    // The error log is a side artifact; losing it must not fail the run.
    let error_log_path = match write_error_log(outcome.tracker.errors(), &config.log_dir, &timestamp) {
        Ok(path) => path,
        Err(e) => {
            tracing::error!(target: "report_task",
                "Failed to write error log to {}: {}", config.log_dir.display(), e
            );
            None
        }
    };

    Ok(RunReport {
        statistics,
        export_path,
        error_log_path,
    })
}

/// Writes `advisors_{mode}_{timestamp}.{ext}` to `output_dir`.
///
/// Returns `None` without touching the disk when there is nothing to export.
pub(crate) fn export_records(
    records: &[AdvisorRecord],
    output_dir: &Path,
    mode: &str,
    format: OutputFormat,
    timestamp: &str,
) -> Result<Option<PathBuf>> {
    if records.is_empty() {
        tracing::warn!(target: "report_task", "No data was collected!");
        return Ok(None);
    }

    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!(
        "advisors_{}_{}.{}",
        mode,
        timestamp,
        format.extension()
    ));

    match format {
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_path(&path)?;
            for record in records {
                writer.serialize(record)?;
            }
            writer.flush()?;
        }
        OutputFormat::Json => {
            fs::write(&path, serde_json::to_string_pretty(records)?)?;
        }
    }

    tracing::info!(target: "report_task", "Results saved to: {}", path.display());
    Ok(Some(path))
}

/// Writes one error message per line to `errors_{timestamp}.log`, if any.
pub(crate) fn write_error_log(errors: &[String], log_dir: &Path, timestamp: &str) -> Result<Option<PathBuf>> {
    if errors.is_empty() {
        return Ok(None);
    }

    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(format!("errors_{}.log", timestamp));
    let mut file = fs::File::create(&path)?;
    for error in errors {
        writeln!(file, "{}", error)?;
    }

    tracing::warn!(target: "report_task", "Errors have been saved to: {}", path.display());
    Ok(Some(path))
}
