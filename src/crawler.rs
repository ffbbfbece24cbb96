//! Crawl orchestration: one listing fetch, then bounded concurrent detail fetches.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::extract::{extract_detail_fields, parse_listing};
use crate::fetch::{Pacer, PageFetcher, RetryPolicy, fetch_with_retry};
use crate::models::{AdvisorRecord, ListingRow};
use crate::tracker::ProgressTracker;
use crate::validate::validate;
use futures::stream::{self, StreamExt};
use std::future::Future;
use url::Url;

/// Everything a run produced, handed to the reporter once.
pub(crate) struct CrawlOutcome {
    /// Validated records, in completion order.
    pub records: Vec<AdvisorRecord>,
    /// Finished tracker with counters and the error log.
    pub tracker: ProgressTracker,
    /// The run was stopped by the shutdown signal before all rows finished.
    pub interrupted: bool,
}

/// Terminal result of one detail row.
enum RowOutcome {
    Accepted(AdvisorRecord),
    Failed(String),
}

pub(crate) struct Crawler<F> {
    fetcher: F,
    config: Config,
    retry: RetryPolicy,
    pacer: Pacer,
}

impl<F: PageFetcher> Crawler<F> {
    pub(crate) fn new(fetcher: F, config: Config) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config),
            pacer: Pacer::new(config.request_delay),
            fetcher,
            config,
        }
    }

    /// Runs the crawl to completion.
    #[cfg(test)]
    pub(crate) async fn run(&self) -> Result<CrawlOutcome> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the crawl until every row is done or `shutdown` resolves.
    ///
    /// Only an unreachable listing page is an error. On shutdown the
    /// in-flight requests are dropped and the records gathered so far are
    /// returned.
    pub(crate) async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<CrawlOutcome> {
        let mut tracker = ProgressTracker::new(self.config.show_progress, self.config.debug_mode);
        tokio::pin!(shutdown);

        let listing_url = self.config.listing_url()?;
        tracing::info!(target: "crawl_task",
            "Fetching listing page in {} mode: {}", self.config.mode_label(), listing_url
        );

        let listing = tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::warn!(target: "crawl_task", "Shutdown requested before the listing page arrived.");
                tracker.finish();
                return Ok(CrawlOutcome { records: Vec::new(), tracker, interrupted: true });
            }
            listing = fetch_with_retry(&self.fetcher, &self.pacer, &self.retry, &listing_url) => {
                listing.map_err(|e| AppError::ListingUnavailable {
                    url: listing_url.to_string(),
                    reason: e.to_string(),
                })?
            }
        };

        let mut entries = parse_listing(&listing.body, &listing.url);
        if let Some(limit) = self.config.row_limit() {
            if entries.len() > limit {
                tracing::debug!(target: "crawl_task", "TEST MODE: Limited to {} of {} rows", limit, entries.len());
                entries.truncate(limit);
            }
        }

        // Spacer and sub-heading rows are neither work nor failures.
        let entries: Vec<(usize, Result<ListingRow>)> = entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let row_number = index + 1;
                match entry {
                    Ok(Some(row)) => Some((row_number, Ok(row))),
                    Ok(None) => {
                        tracing::debug!(target: "crawl_task", "Row {} is not a data row, skipping.", row_number);
                        None
                    }
                    Err(e) => Some((row_number, Err(e))),
                }
            })
            .collect();
        tracing::info!(target: "crawl_task", "Found {} rows to process", entries.len());
        tracker.set_total(entries.len());

        let mut jobs: Vec<(ListingRow, Url)> = Vec::with_capacity(entries.len());
        for (row_number, entry) in entries {
            match entry {
                Ok(row) => match row.detail_url.clone() {
                    Some(url) => jobs.push((row, url)),
                    None => {
                        tracing::warn!(target: "crawl_task", "Row {} ({}) has no detail link.", row_number, row.name);
                        tracker.add_error(format!("Row {}: no detail link for '{}'", row_number, row.name));
                        tracker.record_outcome(false);
                    }
                },
                Err(e) => {
                    tracing::error!(target: "crawl_task", "Error processing row {}: {}", row_number, e);
                    tracker.add_error(format!("Row {}: {}", row_number, e));
                    tracker.record_outcome(false);
                }
            }
        }

        tracing::info!(target: "crawl_task",
            "Dispatching {} detail requests ({} concurrent, {:?} apart)",
            jobs.len(), self.config.max_concurrency, self.config.request_delay
        );

        let mut records = Vec::with_capacity(jobs.len());
        let mut interrupted = false;
        let mut outcomes = stream::iter(jobs)
            .map(|(row, url)| self.process_row(row, url))
            .buffer_unordered(self.config.max_concurrency.max(1));

        // The only writer of `records` and `tracker`.
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::warn!(target: "crawl_task",
                        "Shutdown requested; abandoning in-flight requests with {} records collected.",
                        records.len()
                    );
                    interrupted = true;
                    break;
                }
                outcome = outcomes.next() => match outcome {
                    Some(RowOutcome::Accepted(record)) => {
                        tracing::debug!(target: "crawl_task", "Successfully processed advisor: {}", record.name);
                        records.push(record);
                        tracker.record_outcome(true);
                    }
                    Some(RowOutcome::Failed(message)) => {
                        tracker.add_error(message);
                        tracker.record_outcome(false);
                    }
                    None => break,
                },
            }
        }
        drop(outcomes);

        tracker.finish();
        tracing::info!(target: "crawl_task",
            "Crawl finished: {} records, {} of {} rows failed{}",
            records.len(), tracker.failed(), tracker.total(),
            if interrupted { " (interrupted)" } else { "" }
        );

        Ok(CrawlOutcome {
            records,
            tracker,
            interrupted,
        })
    }

    /// Fetch, extract and validate one advisor. Never fails the crawl.
    async fn process_row(&self, row: ListingRow, url: Url) -> RowOutcome {
        let mut record = AdvisorRecord::from_listing(&row);
        if let Some(seat) = &row.seat {
            tracing::debug!(target: "crawl_task", "Processing {} ({}), seat: {}", row.name, url, seat);
        }

        let page = match fetch_with_retry(&self.fetcher, &self.pacer, &self.retry, &url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(target: "crawl_task", "Request failed for {}: {}", url, e);
                return RowOutcome::Failed(format!("Request failed for '{}' ({}): {}", row.name, url, e));
            }
        };

        if let Err(e) = extract_detail_fields(&mut record, &page, &self.config.site_domain) {
            tracing::error!(target: "crawl_task", "Error extracting contact details from {}: {}", url, e);
            return RowOutcome::Failed(format!("Extraction failed for '{}' ({}): {}", row.name, url, e));
        }

        match validate(record) {
            Ok(record) => RowOutcome::Accepted(record),
            Err(e) => {
                tracing::warn!(target: "crawl_task", "Data validation failed for {}: {}", url, e);
                RowOutcome::Failed(format!("{} ({})", e, url))
            }
        }
    }
}
