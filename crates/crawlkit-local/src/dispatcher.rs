//! Memory-adaptive batch execution.
//!
//! A bounded worker pool drains a URL queue. A background observer samples
//! memory usage every `check_interval`; while usage sits at or above the
//! threshold no worker may start a new URL, though in-flight work runs to
//! completion. Cancellation stops admission within one check interval and
//! lets workers finish cooperatively.

use crate::rate_limit::RateLimiter;
use crawlkit_core::CrawlResult;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Returns current memory usage as a percentage of total.
pub type MemoryProbe = Arc<dyn Fn() -> f32 + Send + Sync>;

pub struct MemoryAdaptiveDispatcher {
    pub memory_threshold_percent: f32,
    pub check_interval: Duration,
    pub max_session_permit: usize,
    rate_limiter: Option<Arc<RateLimiter>>,
    memory_probe: MemoryProbe,
}

fn system_memory_probe() -> MemoryProbe {
    let sys = Mutex::new(sysinfo::System::new());
    Arc::new(move || {
        let mut sys = sys.lock().unwrap_or_else(|e| e.into_inner());
        sys.refresh_memory();
        let total = sys.total_memory() as f32;
        if total <= 0.0 {
            return 0.0;
        }
        sys.used_memory() as f32 / total * 100.0
    })
}

impl MemoryAdaptiveDispatcher {
    pub fn new(
        memory_threshold_percent: f32,
        check_interval: Duration,
        max_session_permit: usize,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        Self {
            memory_threshold_percent,
            check_interval,
            max_session_permit: max_session_permit.max(1),
            rate_limiter,
            memory_probe: system_memory_probe(),
        }
    }

    /// Replace the sysinfo-backed probe, mainly for tests.
    pub fn with_memory_probe(mut self, probe: MemoryProbe) -> Self {
        self.memory_probe = probe;
        self
    }

    /// Run `job` over `urls`, yielding results as they complete.
    pub fn run_stream<F, Fut>(
        &self,
        urls: Vec<String>,
        job: F,
        cancel: CancellationToken,
    ) -> ReceiverStream<CrawlResult>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CrawlResult> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<CrawlResult>(64);
        let queue: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(urls.into()));
        let job = Arc::new(job);

        // Admission gate driven by the memory observer. Seeded from an
        // immediate probe so workers cannot slip in before the first tick.
        let initial_admit = (self.memory_probe)() < self.memory_threshold_percent;
        let (gate_tx, gate_rx) = watch::channel(initial_admit);
        {
            let probe = Arc::clone(&self.memory_probe);
            let threshold = self.memory_threshold_percent;
            let interval = self.check_interval;
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let pct = probe();
                    let admit = pct < threshold;
                    if gate_tx.send(admit).is_err() {
                        break;
                    }
                    if !admit {
                        tracing::warn!(pct, threshold, "memory pressure, pausing admission");
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            });
        }

        for _ in 0..self.max_session_permit {
            let queue = Arc::clone(&queue);
            let job = Arc::clone(&job);
            let tx = tx.clone();
            let cancel = cancel.clone();
            let mut gate = gate_rx.clone();
            let limiter = self.rate_limiter.clone();

            tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }

                    // Admission check happens before every new URL.
                    while !*gate.borrow() {
                        tokio::select! {
                            changed = gate.changed() => {
                                if changed.is_err() {
                                    return;
                                }
                            }
                            _ = cancel.cancelled() => return,
                        }
                    }

                    let Some(url) = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
                    else {
                        break;
                    };

                    if let Some(limiter) = &limiter {
                        tokio::select! {
                            _ = limiter.wait_if_needed(&url) => {}
                            _ = cancel.cancelled() => return,
                        }
                    }

                    let result = job(url.clone()).await;

                    // Throttled responses go back on the queue while the
                    // host's retry budget lasts.
                    if let (Some(limiter), Some(status @ (429 | 503))) =
                        (&limiter, result.status_code)
                    {
                        if limiter.update_delay(&url, status).await {
                            tracing::debug!(url, status, "requeueing throttled url");
                            queue
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .push_back(url);
                            continue;
                        }
                    } else if let (Some(limiter), Some(status)) = (&limiter, result.status_code) {
                        limiter.update_delay(&url, status).await;
                    }

                    if tx.send(result).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        ReceiverStream::new(rx)
    }

    /// Run `job` over `urls` and return the buffered results.
    pub async fn run_batch<F, Fut>(
        &self,
        urls: Vec<String>,
        job: F,
        cancel: CancellationToken,
    ) -> Vec<CrawlResult>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CrawlResult> + Send + 'static,
    {
        use tokio_stream::StreamExt;
        let mut stream = self.run_stream(urls, job, cancel);
        let mut out = Vec::new();
        while let Some(result) = stream.next().await {
            out.push(result);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio_stream::StreamExt;

    fn dispatcher(permits: usize) -> MemoryAdaptiveDispatcher {
        MemoryAdaptiveDispatcher::new(95.0, Duration::from_millis(20), permits, None)
            .with_memory_probe(Arc::new(|| 0.0))
    }

    fn ok_result(url: &str) -> CrawlResult {
        let mut r = CrawlResult::empty(url);
        r.status_code = Some(200);
        r
    }

    #[tokio::test]
    async fn batch_returns_every_result() {
        let urls: Vec<String> = (0..20).map(|i| format!("https://h{i}.test/")).collect();
        let results = dispatcher(4)
            .run_batch(
                urls.clone(),
                |url| async move { ok_result(&url) },
                CancellationToken::new(),
            )
            .await;
        assert_eq!(results.len(), 20);
        let mut seen: Vec<String> = results.into_iter().map(|r| r.url).collect();
        seen.sort();
        let mut expected = urls;
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn per_url_failure_does_not_abort_siblings() {
        let urls = vec![
            "https://a.test/".to_string(),
            "https://bad.test/".to_string(),
            "https://c.test/".to_string(),
        ];
        let results = dispatcher(2)
            .run_batch(
                urls,
                |url| async move {
                    if url.contains("bad") {
                        CrawlResult::failure(&url, "boom")
                    } else {
                        ok_result(&url)
                    }
                },
                CancellationToken::new(),
            )
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| !r.success).count(), 1);
    }

    #[tokio::test]
    async fn memory_pressure_blocks_admission_until_it_drops() {
        let pressure = Arc::new(AtomicBool::new(true));
        let probe_pressure = Arc::clone(&pressure);
        let dispatcher = MemoryAdaptiveDispatcher::new(70.0, Duration::from_millis(20), 2, None)
            .with_memory_probe(Arc::new(move || {
                if probe_pressure.load(Ordering::SeqCst) {
                    99.0
                } else {
                    10.0
                }
            }));

        let started = Arc::new(AtomicUsize::new(0));
        let started2 = Arc::clone(&started);
        let urls = vec!["https://a.test/".to_string(), "https://b.test/".to_string()];
        let handle = {
            let dispatcher = dispatcher;
            tokio::spawn(async move {
                dispatcher
                    .run_batch(
                        urls,
                        move |url| {
                            let started = Arc::clone(&started2);
                            async move {
                                started.fetch_add(1, Ordering::SeqCst);
                                ok_result(&url)
                            }
                        },
                        CancellationToken::new(),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            started.load(Ordering::SeqCst),
            0,
            "no worker may start under memory pressure"
        );

        pressure.store(false, Ordering::SeqCst);
        let results = handle.await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn cancellation_stops_admission_and_completes() {
        let urls: Vec<String> = (0..50).map(|i| format!("https://h{i}.test/")).collect();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let mut stream = dispatcher(1).run_stream(
            urls,
            |url| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ok_result(&url)
            },
            cancel,
        );

        let first = stream.next().await;
        assert!(first.is_some());
        cancel2.cancel();

        let mut rest = 0;
        while stream.next().await.is_some() {
            rest += 1;
        }
        assert!(rest < 49, "cancellation must stop pending admissions, got {rest}");
    }

    #[tokio::test]
    async fn streaming_yields_before_batch_completes() {
        let urls = vec!["https://fast.test/".to_string(), "https://slow.test/".to_string()];
        let mut stream = dispatcher(2).run_stream(
            urls,
            |url| async move {
                if url.contains("slow") {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                ok_result(&url)
            },
            CancellationToken::new(),
        );

        let start = tokio::time::Instant::now();
        let first = stream.next().await.unwrap();
        assert!(first.url.contains("fast"));
        assert!(start.elapsed() < Duration::from_millis(400));
        let second = stream.next().await.unwrap();
        assert!(second.url.contains("slow"));
    }

    #[tokio::test]
    async fn throttled_urls_are_retried_within_budget() {
        let limiter = Arc::new(RateLimiter::new((0.0, 0.0), 0.1, 3));
        let dispatcher =
            MemoryAdaptiveDispatcher::new(95.0, Duration::from_millis(20), 1, Some(limiter))
                .with_memory_probe(Arc::new(|| 0.0));

        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts2 = Arc::clone(&attempts);
        let results = dispatcher
            .run_batch(
                vec!["https://flaky.test/".to_string()],
                move |url| {
                    let attempts = Arc::clone(&attempts2);
                    async move {
                        let n = attempts.fetch_add(1, Ordering::SeqCst);
                        let mut r = ok_result(&url);
                        if n == 0 {
                            r.status_code = Some(429);
                            r.success = false;
                        }
                        r
                    }
                },
                CancellationToken::new(),
            )
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].success, "retry should have succeeded");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
