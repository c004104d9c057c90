//! Per-host request pacing with exponential backoff.
//!
//! Every host gets an independent delay window drawn uniformly from the base
//! range. A 429 or 503 doubles the host's window (capped at `max_delay`) and
//! counts against `max_retries`; any other status decays the window back
//! toward the base range. State is in-process only.

use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

#[derive(Debug, Clone, Copy)]
struct HostState {
    current_delay: f64,
    last_request: Option<Instant>,
    retry_count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    base_delay: (f64, f64),
    max_delay: f64,
    max_retries: u32,
    state: Mutex<HashMap<String, HostState>>,
}

impl RateLimiter {
    pub fn new(base_delay: (f64, f64), max_delay: f64, max_retries: u32) -> Self {
        let (lo, hi) = base_delay;
        Self {
            base_delay: (lo.max(0.0), hi.max(lo.max(0.0))),
            max_delay: max_delay.max(0.0),
            max_retries,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Matches the run-config knobs: delays drawn from
    /// `[mean_delay, mean_delay + max_range]`.
    pub fn from_delays(mean_delay: f64, max_range: f64) -> Self {
        Self::new((mean_delay, mean_delay + max_range.max(0.0)), 60.0, 3)
    }

    fn host_of(url: &str) -> String {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| url.to_string())
    }

    fn fresh_state(&self) -> HostState {
        HostState {
            current_delay: self.draw_base(),
            last_request: None,
            retry_count: 0,
        }
    }

    fn draw_base(&self) -> f64 {
        let (lo, hi) = self.base_delay;
        if hi > lo {
            rand::thread_rng().gen_range(lo..=hi)
        } else {
            lo
        }
    }

    /// Sleep until this host's delay window has elapsed since its previous
    /// request, then claim the slot.
    pub async fn wait_if_needed(&self, url: &str) {
        let host = Self::host_of(url);
        let scheduled = {
            let mut state = self.state.lock().await;
            let entry = state.entry(host.clone()).or_insert_with(|| self.fresh_state());
            let now = Instant::now();
            // Claim a slot one delay window after the previous claim, so
            // concurrent callers for the same host queue rather than overlap.
            let scheduled = match entry.last_request {
                Some(last) => (last + Duration::from_secs_f64(entry.current_delay)).max(now),
                None => now,
            };
            entry.last_request = Some(scheduled);
            scheduled
        };
        if scheduled > Instant::now() {
            tracing::debug!(host, "rate limit wait");
            tokio::time::sleep_until(scheduled).await;
        }
    }

    /// Record the response status for a host. Returns `true` when the caller
    /// may retry (429/503 within the retry budget); `false` means the budget
    /// is exhausted. Non-throttle statuses reset the host and return `false`.
    pub async fn update_delay(&self, url: &str, status_code: u16) -> bool {
        let host = Self::host_of(url);
        let mut state = self.state.lock().await;
        let entry = state.entry(host.clone()).or_insert_with(|| self.fresh_state());

        if matches!(status_code, 429 | 503) {
            entry.retry_count += 1;
            entry.current_delay = (entry.current_delay * 2.0).min(self.max_delay);
            let allowed = entry.retry_count <= self.max_retries;
            tracing::debug!(
                host,
                status_code,
                delay = entry.current_delay,
                retry = entry.retry_count,
                allowed,
                "rate limit backoff"
            );
            allowed
        } else {
            entry.current_delay = self.draw_base();
            entry.retry_count = 0;
            false
        }
    }

    /// Current delay window for the host of `url`, if any request was made.
    pub async fn current_delay(&self, url: &str) -> Option<Duration> {
        let state = self.state.lock().await;
        state
            .get(&Self::host_of(url))
            .map(|s| Duration::from_secs_f64(s.current_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_host_requests_are_spaced() {
        let limiter = RateLimiter::new((0.2, 0.2), 10.0, 3);
        let url = "https://example.com/a";

        let start = Instant::now();
        limiter.wait_if_needed(url).await;
        limiter.wait_if_needed(url).await;
        assert!(
            start.elapsed() >= Duration::from_millis(200),
            "second request must wait the delay window"
        );
    }

    #[tokio::test]
    async fn different_hosts_are_independent() {
        let limiter = RateLimiter::new((5.0, 5.0), 10.0, 3);
        limiter.wait_if_needed("https://a.com/").await;

        let start = Instant::now();
        limiter.wait_if_needed("https://b.com/").await;
        assert!(
            start.elapsed() < Duration::from_millis(100),
            "first request to a new host must not wait"
        );
    }

    #[tokio::test]
    async fn throttle_status_doubles_delay_up_to_cap() {
        let limiter = RateLimiter::new((1.0, 1.0), 3.0, 10);
        let url = "https://example.com/";
        limiter.wait_if_needed(url).await;

        assert!(limiter.update_delay(url, 429).await);
        let d1 = limiter.current_delay(url).await.unwrap();
        assert!(d1 >= Duration::from_secs_f64(1.9), "{d1:?}");

        assert!(limiter.update_delay(url, 503).await);
        assert!(limiter.update_delay(url, 429).await);
        let capped = limiter.current_delay(url).await.unwrap();
        assert!(capped <= Duration::from_secs_f64(3.0) + Duration::from_millis(1));
    }

    #[tokio::test]
    async fn retry_budget_exhausts() {
        let limiter = RateLimiter::new((0.0, 0.0), 1.0, 2);
        let url = "https://example.com/";
        assert!(limiter.update_delay(url, 429).await);
        assert!(limiter.update_delay(url, 429).await);
        assert!(!limiter.update_delay(url, 429).await, "third retry denied");
    }

    #[tokio::test]
    async fn success_resets_retry_count_and_delay() {
        let limiter = RateLimiter::new((0.1, 0.1), 8.0, 2);
        let url = "https://example.com/";
        limiter.update_delay(url, 429).await;
        limiter.update_delay(url, 429).await;
        limiter.update_delay(url, 200).await;

        // Budget is fresh again after a success.
        assert!(limiter.update_delay(url, 429).await);
        // Delay fell back to the base window before the new backoff.
        let d = limiter.current_delay(url).await.unwrap();
        assert!(d <= Duration::from_secs_f64(0.2) + Duration::from_millis(1), "{d:?}");
    }

    #[tokio::test]
    async fn zero_delay_does_not_block() {
        let limiter = RateLimiter::from_delays(0.0, 0.0);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.wait_if_needed("https://example.com/").await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
