use futures::stream::{self, Stream};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use url::Url;

use super::worker::{spawn_worker, Job, WorkerContext};
use crate::core::retry::RetryConfig;
use crate::core::{ConfigError, Disposition, FetchFailure};
use crate::http::{FetchOutcome, FetchResult, Target};
use crate::proxy::{ProxyEndpoint, ProxyPool};
use crate::rate_limit::{RateBudget, RateKey, RateKeying, RatePolicy};
use crate::scrapers::Scraper;
use crate::stats::StatsTracker;

#[derive(Debug, Clone)]
pub struct FetchLoopConfig {
    pub rate_policy: RatePolicy,
    pub rate_keying: RateKeying,
    pub retry: RetryConfig,
    /// Per-attempt deadline.
    pub timeout: Duration,
    /// Refuse to start without at least one proxy.
    pub proxy_required: bool,
}

impl Default for FetchLoopConfig {
    fn default() -> Self {
        Self {
            rate_policy: RatePolicy::default(),
            rate_keying: RateKeying::default(),
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
            proxy_required: false,
        }
    }
}

/// Turns targets into fetch results under a rate limit and retry policy.
///
/// Construction validates the configuration; this is the only place the
/// loop can fail. Per-target problems come back as [`FetchFailure`] values.
///
/// Clones share rate budgets, proxies, cancellation and stats, so several
/// runs of one loop (e.g. follow-up rounds) stay within the same limits.
#[derive(Clone)]
pub struct FetchLoop {
    scraper: Arc<dyn Scraper>,
    config: FetchLoopConfig,
    spacing: Duration,
    proxies: Option<Arc<ProxyPool>>,
    budgets: Arc<Mutex<HashMap<RateKey, Arc<RateBudget>>>>,
    cancel: CancellationToken,
    stats: StatsTracker,
}

impl FetchLoop {
    pub fn new(
        scraper: Arc<dyn Scraper>,
        config: FetchLoopConfig,
        proxies: Option<ProxyPool>,
    ) -> Result<Self, ConfigError> {
        config.retry.validate()?;
        let spacing = config.rate_policy.min_spacing()?;
        if config.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "timeout".to_string(),
                value: "0".to_string(),
            });
        }

        let proxies = proxies.filter(|pool| !pool.is_empty());
        if config.proxy_required && proxies.is_none() {
            return Err(ConfigError::EmptyProxyPool);
        }

        Ok(Self {
            scraper,
            config,
            spacing,
            proxies: proxies.map(Arc::new),
            budgets: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            stats: StatsTracker::new(),
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_stats(mut self, stats: StatsTracker) -> Self {
        self.stats = stats;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> &StatsTracker {
        &self.stats
    }

    fn rate_key(&self, url: &Url, proxy: Option<&ProxyEndpoint>) -> RateKey {
        match self.config.rate_keying {
            RateKeying::Global => RateKey::global(),
            RateKeying::PerProxy => proxy
                .map(|p| RateKey::new(p.key()))
                .unwrap_or_else(|| RateKey::new(RateKey::DIRECT)),
            RateKeying::PerHost => RateKey::new(url.host_str().unwrap_or_default()),
        }
    }

    /// The budget for `key`, created on first use and kept for later runs.
    fn budget(&self, key: RateKey) -> Arc<RateBudget> {
        let mut budgets = self.budgets.lock();
        let budget = budgets
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RateBudget::new(key, self.spacing)));
        Arc::clone(budget)
    }

    /// Consumes the loop and returns one outcome per target, in input
    /// order. Nothing is dispatched until the stream is first polled.
    /// Dropping the stream cancels outstanding work of this run only.
    pub fn run(self, targets: Vec<Target>) -> impl Stream<Item = FetchOutcome> + Send {
        stream::unfold(RunState::Idle(self, targets), |state| async move {
            let mut state = match state {
                RunState::Idle(fetch_loop, targets) => fetch_loop.start(targets),
                other => other,
            };

            let RunState::Running(ref mut run) = state else {
                return None;
            };
            let outcome = run.next_outcome().await?;
            Some((outcome, state))
        })
    }

    fn start(self, targets: Vec<Target>) -> RunState {
        let total = targets.len();
        let cancel = self.cancel.child_token();
        let mut buffer = BTreeMap::new();

        // Key order follows first appearance so worker spawn order is stable.
        let mut keys: Vec<RateKey> = Vec::new();
        let mut queues: HashMap<RateKey, Vec<Job>> = HashMap::new();

        for (index, target) in targets.into_iter().enumerate() {
            let url = match self.scraper.resolve(&target) {
                Ok(url) => url,
                Err(error) => {
                    warn!("Skipping {}: {}", target, error);
                    self.stats.record_failure(Disposition::Permanent);
                    buffer.insert(index, Err(FetchFailure::permanent(target, 0, error)));
                    continue;
                }
            };

            let proxy = self.proxies.as_ref().and_then(|pool| pool.select()).cloned();
            let rate_key = self.rate_key(&url, proxy.as_ref());
            if !queues.contains_key(&rate_key) {
                keys.push(rate_key.clone());
            }
            queues.entry(rate_key).or_default().push(Job {
                index,
                target,
                url,
                proxy,
            });
        }

        info!(
            "Starting {} fetch loop: {} targets across {} rate key(s), spacing {:?}",
            self.scraper.name(),
            total,
            keys.len(),
            self.spacing
        );

        let context = Arc::new(WorkerContext {
            scraper: Arc::clone(&self.scraper),
            retry: self.config.retry.clone(),
            timeout: self.config.timeout,
            cancel: cancel.clone(),
            stats: self.stats.clone(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        for key in keys {
            let jobs = queues.remove(&key).unwrap_or_default();
            debug!("Worker for key {} takes {} target(s)", key, jobs.len());
            let budget = self.budget(key);
            spawn_worker(Arc::clone(&context), budget, jobs, tx.clone());
        }
        drop(tx);

        RunState::Running(Run {
            rx,
            buffer,
            next: 0,
            total,
            stats: self.stats,
            _guard: cancel.drop_guard(),
        })
    }
}

enum RunState {
    Idle(FetchLoop, Vec<Target>),
    Running(Run),
}

struct Run {
    rx: mpsc::UnboundedReceiver<(usize, FetchResult)>,
    buffer: BTreeMap<usize, FetchResult>,
    next: usize,
    total: usize,
    stats: StatsTracker,
    _guard: DropGuard,
}

impl Run {
    async fn next_outcome(&mut self) -> Option<FetchOutcome> {
        let outcome = self.next_in_order().await;
        if outcome.is_none() {
            self.stats.finish();
        }
        outcome
    }

    async fn next_in_order(&mut self) -> Option<FetchOutcome> {
        loop {
            if let Some(result) = self.buffer.remove(&self.next) {
                let index = self.next;
                self.next += 1;
                return Some(FetchOutcome { index, result });
            }
            if self.next >= self.total {
                return None;
            }

            match self.rx.recv().await {
                Some((index, result)) => {
                    self.buffer.insert(index, result);
                }
                None => {
                    // Every worker is gone. After cancellation some indices
                    // never arrive; flush what did, still in order.
                    let (&first, _) = self.buffer.first_key_value()?;
                    if first > self.next {
                        debug!(
                            "Fetch loop cancelled, skipping targets {}..{}",
                            self.next, first
                        );
                    }
                    self.next = first;
                }
            }
        }
    }
}
