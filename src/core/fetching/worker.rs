use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::retry::{RetryConfig, RetryState};
use crate::core::{FetchErrorKind, FetchFailure};
use crate::http::{FetchRequest, FetchResponse, FetchResult, Target};
use crate::proxy::ProxyEndpoint;
use crate::rate_limit::RateBudget;
use crate::scrapers::Scraper;
use crate::stats::StatsTracker;

/// A resolved target waiting for its worker.
pub(super) struct Job {
    pub index: usize,
    pub target: Target,
    pub url: Url,
    pub proxy: Option<ProxyEndpoint>,
}

pub(super) struct WorkerContext {
    pub scraper: Arc<dyn Scraper>,
    pub retry: RetryConfig,
    pub timeout: Duration,
    pub cancel: CancellationToken,
    pub stats: StatsTracker,
}

type ResultSender = mpsc::UnboundedSender<(usize, FetchResult)>;

/// Spawns the worker for one key together with a supervisor. If the worker
/// panics, every target it had not delivered yet comes back as a
/// [`FetchErrorKind::WorkerFailed`] failure instead of going missing.
pub(super) fn spawn_worker(
    ctx: Arc<WorkerContext>,
    budget: Arc<RateBudget>,
    jobs: Vec<Job>,
    tx: ResultSender,
) {
    let key = budget.key().clone();
    let stats = ctx.stats.clone();
    let pending: Vec<(usize, Target)> = jobs.iter().map(|j| (j.index, j.target.clone())).collect();
    let delivered = Arc::new(AtomicUsize::new(0));

    let handle = tokio::spawn(run_worker(
        ctx,
        budget,
        jobs,
        tx.clone(),
        Arc::clone(&delivered),
    ));

    tokio::spawn(async move {
        let Err(join_error) = handle.await else {
            return;
        };
        if !join_error.is_panic() {
            return;
        }

        let done = delivered.load(Ordering::Acquire);
        let reason = panic_message(join_error.into_panic());
        error!(
            "Worker for key {} panicked ({}), failing {} remaining target(s)",
            key,
            reason,
            pending.len().saturating_sub(done)
        );
        for (index, target) in pending.into_iter().skip(done) {
            let failure =
                FetchFailure::permanent(target, 0, FetchErrorKind::WorkerFailed(reason.clone()));
            stats.record_failure(failure.disposition);
            if tx.send((index, Err(failure))).is_err() {
                break;
            }
        }
    });
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Drains one key's jobs in order. Stops at cancellation or when the
/// consumer has gone away.
async fn run_worker(
    ctx: Arc<WorkerContext>,
    budget: Arc<RateBudget>,
    jobs: Vec<Job>,
    tx: ResultSender,
    delivered: Arc<AtomicUsize>,
) {
    for job in jobs {
        if ctx.cancel.is_cancelled() {
            break;
        }

        let index = job.index;
        let Some(result) = fetch_target(&ctx, &budget, job).await else {
            debug!("Worker for {} stopped by cancellation", budget.key());
            break;
        };
        if tx.send((index, result)).is_err() {
            break;
        }
        delivered.fetch_add(1, Ordering::Release);
    }
}

/// Runs every attempt for one target. `None` means cancellation cut the
/// target short and it has no result.
async fn fetch_target(ctx: &WorkerContext, budget: &RateBudget, job: Job) -> Option<FetchResult> {
    let Job {
        index,
        target,
        url,
        proxy,
    } = job;
    let max_attempts = ctx.retry.max_attempts;
    let mut retry_state = RetryState::new();
    let mut attempt = 0;

    loop {
        attempt += 1;
        if ctx.cancel.is_cancelled() {
            return None;
        }
        budget.acquire(&ctx.cancel).await?;

        let request = FetchRequest {
            index,
            target: target.clone(),
            url: url.clone(),
            proxy: proxy.clone(),
            rate_key: budget.key().clone(),
            timeout: ctx.timeout,
            attempt,
            dispatched_at: Instant::now(),
        };

        info!(
            "Fetching {} (attempt {}/{}, key {})",
            target,
            attempt,
            max_attempts,
            budget.key()
        );
        ctx.stats.record_dispatch(budget.key().as_str());

        match attempt_once(ctx, &request).await {
            Ok(mut response) => {
                response.attempts = attempt;
                response.retry_history = retry_state.counts;
                response.latency = request.dispatched_at.elapsed();
                ctx.stats.record_success();
                debug!(
                    "Fetched {} with HTTP {} after {} attempt(s)",
                    target, response.status, attempt
                );
                return Some(Ok(response));
            }
            Err(error) => {
                if let Some(hint) = ctx.retry.retry_after_hint(&error) {
                    budget.defer_for(hint);
                }

                let Some(delay) = ctx.retry.next_delay(&error, attempt) else {
                    let failure = if error.is_retriable() {
                        FetchFailure::exhausted(target, attempt, error)
                    } else {
                        FetchFailure::permanent(target, attempt, error)
                    };
                    warn!("Giving up on {}", failure);
                    ctx.stats.record_failure(failure.disposition);
                    return Some(Err(failure));
                };

                if let Some(category) = error.category() {
                    ctx.stats.record_retry(&category);
                    retry_state.record(category);
                }
                warn!(
                    "Retrying {} after {} (attempt {}/{}, key {}, delay {:?})",
                    target,
                    error,
                    attempt,
                    max_attempts,
                    budget.key(),
                    delay
                );

                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// One dispatch under the deadline, classified into success or failure.
/// The fetch itself is not raced against cancellation; an in-flight
/// request finishes or times out.
async fn attempt_once(
    ctx: &WorkerContext,
    request: &FetchRequest,
) -> Result<FetchResponse, FetchErrorKind> {
    let response = match tokio::time::timeout(ctx.timeout, ctx.scraper.fetch(request)).await {
        Ok(result) => result?,
        Err(_) => return Err(FetchErrorKind::Timeout),
    };

    ctx.stats.record_response(
        response.status,
        response.raw_body.len(),
        request.dispatched_at.elapsed(),
    );

    if let Some(error) = ctx.scraper.classify(&response) {
        return Err(error);
    }
    if let Some(error) = ctx
        .retry
        .match_conditions(response.status, &response.decoded_body)
    {
        return Err(error);
    }
    match FetchErrorKind::from_status(response.status, response.retry_after()) {
        Some(error) => Err(error),
        None => Ok(response),
    }
}
