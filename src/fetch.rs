//! Page fetching: the HTTP client, retry policy and request pacing.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::FetchedPage;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};
use url::Url;

/// Fetches a single URL. Transport failures are errors; any HTTP status,
/// including non-2xx, is returned as data.
pub(crate) trait PageFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage>;
}

/// `PageFetcher` backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub(crate) struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub(crate) fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::Generic(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        tracing::debug!(target: "fetch_task", "Attempting to GET: {}", url);
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let body = response.text().await?;
        tracing::debug!(target: "fetch_task", "GET {} status: {} ({} bytes)", url, status, body.len());
        Ok(FetchedPage {
            url: final_url,
            status,
            body,
        })
    }
}

/// How often and how patiently a failed request is retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    /// Seconds; scaled by `2^(attempt-1)`.
    pub multiplier: f32,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            multiplier: config.backoff_multiplier,
            min_wait: config.backoff_min,
            max_wait: config.backoff_max.max(config.backoff_min),
        }
    }

    /// Wait after the failed attempt number `attempt` (1-based).
    pub(crate) fn wait_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let raw = (self.multiplier as f64) * 2f64.powi(exponent);
        let raw = if raw.is_finite() && raw > 0.0 {
            Duration::from_secs_f64(raw.min(self.max_wait.as_secs_f64()))
        } else {
            Duration::ZERO
        };
        raw.clamp(self.min_wait, self.max_wait)
    }
}

/// Spaces out request dispatches across all concurrent fetches.
#[derive(Debug)]
pub(crate) struct Pacer {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Waits until this caller's dispatch slot comes up.
    pub(crate) async fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.interval);
            slot
        };
        sleep_until(slot).await;
    }
}

/// Fetches `url`, retrying transport errors and non-2xx responses per `policy`.
///
/// Every attempt waits for its pacing slot first. Returns the last failure
/// once all attempts are used.
pub(crate) async fn fetch_with_retry<F: PageFetcher>(
    fetcher: &F,
    pacer: &Pacer,
    policy: &RetryPolicy,
    url: &Url,
) -> Result<FetchedPage> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        pacer.wait().await;
        let error = match fetcher.fetch(url).await {
            Ok(page) if page.is_success() => return Ok(page),
            Ok(page) => AppError::HttpStatus {
                url: url.to_string(),
                status: page.status,
            },
            Err(e) => e,
        };

        if attempt >= max_attempts {
            tracing::error!(target: "fetch_task",
                "Request for {} failed after {} attempts: {}", url, attempt, error
            );
            return Err(error);
        }

        let wait = policy.wait_after(attempt);
        tracing::warn!(target: "fetch_task",
            "Attempt {}/{} for {} failed: {}. Retrying in {:?}.",
            attempt, max_attempts, url, error, wait
        );
        sleep(wait).await;
        attempt += 1;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::Mutex as StdMutex;

    /// In-memory fetcher: each URL maps to a queue of scripted responses;
    /// the last entry repeats. Unknown URLs fail at transport level.
    #[derive(Default)]
    pub(crate) struct FakeFetcher {
        responses: StdMutex<HashMap<String, VecDeque<std::result::Result<(u16, String), String>>>>,
        stalled: HashSet<String>,
        calls: StdMutex<Vec<String>>,
    }

    impl FakeFetcher {
        pub(crate) fn page(self, url: &str, body: impl Into<String>) -> Self {
            self.script(url, vec![Ok((200, body.into()))])
        }

        pub(crate) fn script(
            self,
            url: &str,
            responses: Vec<std::result::Result<(u16, String), String>>,
        ) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), responses.into());
            self
        }

        /// Requests to `url` never complete.
        pub(crate) fn stall(mut self, url: &str) -> Self {
            self.stalled.insert(url.to_string());
            self
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn calls_to(&self, url: &str) -> usize {
            self.calls().iter().filter(|u| u.as_str() == url).count()
        }
    }

    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
            self.calls.lock().unwrap().push(url.to_string());
            if self.stalled.contains(url.as_str()) {
                std::future::pending::<()>().await;
            }
            let next = {
                let mut responses = self.responses.lock().unwrap();
                match responses.get_mut(url.as_str()) {
                    Some(queue) if queue.len() > 1 => queue.pop_front(),
                    Some(queue) => queue.front().cloned(),
                    None => None,
                }
            };
            match next {
                Some(Ok((status, body))) => Ok(FetchedPage {
                    url: url.clone(),
                    status,
                    body,
                }),
                Some(Err(message)) => Err(AppError::Generic(anyhow::anyhow!(message))),
                None => Err(AppError::Generic(anyhow::anyhow!("connection refused: {}", url))),
            }
        }
    }

    pub(crate) fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            multiplier: 1.0,
            min_wait: Duration::ZERO,
            max_wait: Duration::ZERO,
        }
    }

    #[test]
    fn test_default_backoff_schedule() {
        let policy = RetryPolicy::from_config(&Config::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.wait_after(1), Duration::from_secs(4));
        assert_eq!(policy.wait_after(2), Duration::from_secs(4));
        assert_eq!(policy.wait_after(3), Duration::from_secs(4));
        assert_eq!(policy.wait_after(4), Duration::from_secs(8));
        assert_eq!(policy.wait_after(5), Duration::from_secs(10));
        assert_eq!(policy.wait_after(40), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let url = Url::parse("https://example.org/d?id=1").unwrap();
        let fetcher = FakeFetcher::default().script(
            url.as_str(),
            vec![Err("timeout".into()), Ok((503, String::new())), Ok((200, "ok".into()))],
        );
        let page = fetch_with_retry(&fetcher, &Pacer::new(Duration::ZERO), &instant_policy(3), &url)
            .await
            .unwrap();
        assert_eq!(page.body, "ok");
        assert_eq!(fetcher.calls_to(url.as_str()), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted_returns_last_error() {
        let url = Url::parse("https://example.org/d?id=2").unwrap();
        let fetcher = FakeFetcher::default().script(url.as_str(), vec![Ok((500, String::new()))]);
        let err = fetch_with_retry(&fetcher, &Pacer::new(Duration::ZERO), &instant_policy(3), &url)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::HttpStatus { status: 500, .. }));
        assert_eq!(fetcher.calls_to(url.as_str()), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_fetches_once() {
        let url = Url::parse("https://example.org/d?id=3").unwrap();
        let fetcher = FakeFetcher::default();
        assert!(
            fetch_with_retry(&fetcher, &Pacer::new(Duration::ZERO), &instant_policy(0), &url)
                .await
                .is_err()
        );
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_pacer_spaces_dispatches() {
        let pacer = Pacer::new(Duration::from_millis(20));
        let start = Instant::now();
        for _ in 0..3 {
            pacer.wait().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
