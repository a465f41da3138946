//! Batch executor
//!
//! Runs work items through the progress store, the rate limiter and the retry
//! loop. Items are dequeued in input order by up to `concurrency` workers.
//! Before an item starts, the executor checks the stop signal and the abort
//! flag. An item already running when either fires is cut short at its next
//! rate limiter wait or retry backoff and settles as an interrupted failure.
//! Every started item settles and persists its outcome.

use super::classify::{classify, ErrorKind, Failure};
use super::config::BatchConfig;
use super::progress::BatchProgress;
use super::rate_limit::{Acquire, RateLimiter};
use super::result::{BatchAbort, BatchResult, ItemOutcome, ItemStatus};
use super::retry::{execute_with_policy, RetryPolicy};
use super::BatchError;
use crate::fingerprint::{Fingerprint, WorkItem};
use crate::metrics::{record_item_settled, CallMetrics};
use crate::remote::RemoteCaller;
use crate::resume::ProgressStore;
use crate::shutdown::{global_stop, SharedStop, StopSignal};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Default time between periodic progress log lines.
const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(60);

/// Notification sent to the `on_settled` observer.
#[derive(Debug, Clone, Copy)]
pub struct SettledEvent<'a> {
    /// Position of the item in the input
    pub index: usize,
    /// Item key
    pub fingerprint: &'a Fingerprint,
    /// Final status
    pub status: ItemStatus,
    /// Remote call attempts made
    pub attempts: u32,
}

/// Observer invoked once per settled item.
pub type SettledHook = Arc<dyn Fn(&SettledEvent<'_>) + Send + Sync>;

/// Drives batches of work items.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use xhs_crawler::executor::{BatchConfig, BatchExecutor, Failure};
/// use xhs_crawler::remote::caller_fn;
/// use xhs_crawler::resume::ProgressStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(ProgressStore::load("datas/.progress.json")?);
/// let executor = BatchExecutor::new().with_progress_store(store);
/// let caller = caller_fn(|id: String| async move { Ok::<_, Failure>(id.len()) });
///
/// let items = vec!["note-a".to_string(), "note-b".to_string()];
/// let result = executor.run(items, &caller, &BatchConfig::default()).await?;
/// println!("{}", result.format_report());
/// # Ok(())
/// # }
/// ```
pub struct BatchExecutor {
    limiter: Option<Arc<RateLimiter>>,
    store: Option<Arc<ProgressStore>>,
    stop: Option<SharedStop>,
    on_settled: Option<SettledHook>,
    progress_interval: Duration,
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchExecutor {
    /// Executor without a progress store, picking up the global stop signal
    /// if one is registered.
    pub fn new() -> Self {
        Self {
            limiter: None,
            store: None,
            stop: global_stop(),
            on_settled: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Share a rate limiter across runs. Without one, each run builds a
    /// limiter from its config.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Persist progress to `store` when resume is enabled.
    pub fn with_progress_store(mut self, store: Arc<ProgressStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `stop` instead of the global stop signal.
    pub fn with_stop(mut self, stop: SharedStop) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Call `hook` once for every settled item, including skipped ones.
    pub fn with_on_settled<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SettledEvent<'_>) + Send + Sync + 'static,
    {
        self.on_settled = Some(Arc::new(hook));
        self
    }

    /// Override the time between periodic progress log lines.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// The attached progress store.
    pub fn progress_store(&self) -> Option<&Arc<ProgressStore>> {
        self.store.as_ref()
    }

    /// Run `items` through `caller`.
    ///
    /// Returns `Ok` for every run that reached its items, including runs where
    /// items failed or the batch was aborted by an auth or fatal failure.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid config, an invalid or duplicate
    /// fingerprint, or a progress store failure.
    pub async fn run<I, C>(
        &self,
        items: Vec<I>,
        caller: &C,
        config: &BatchConfig,
    ) -> Result<BatchResult<C::Output>, BatchError>
    where
        I: WorkItem,
        C: RemoteCaller<I>,
    {
        config.validate()?;
        let fingerprints = fingerprint_all(&items)?;

        let limiter = match &self.limiter {
            Some(limiter) => Arc::clone(limiter),
            None => Arc::new(RateLimiter::new(
                config.rate_per_second,
                config.burst_capacity,
            )?),
        };

        let store = if config.resume_enabled {
            self.store.as_deref()
        } else {
            None
        };
        if let Some(store) = store {
            let added = store.register(fingerprints.iter())?;
            debug!(added, path = %store.path().display(), "Progress store ready");
        }

        let span = info_span!(
            "run_batch",
            items = items.len(),
            concurrency = config.concurrency,
            resume = store.is_some(),
        );

        let ctx = RunContext {
            config,
            policy: RetryPolicy::from_config(config),
            limiter: &limiter,
            store,
            halt: StopSignal::new(),
            interrupted: AtomicBool::new(false),
            abort: Mutex::new(None),
            progress: Mutex::new(
                BatchProgress::new(items.len() as u64).with_update_interval(self.progress_interval),
            ),
        };

        self.drive(items, fingerprints, caller, &ctx)
            .instrument(span)
            .await
    }

    async fn drive<I, C>(
        &self,
        items: Vec<I>,
        fingerprints: Vec<Fingerprint>,
        caller: &C,
        ctx: &RunContext<'_>,
    ) -> Result<BatchResult<C::Output>, BatchError>
    where
        I: WorkItem,
        C: RemoteCaller<I>,
    {
        let started = Instant::now();
        info!(rate = ctx.config.rate_per_second, "Starting batch");

        let work = stream::iter(items.into_iter().zip(fingerprints).enumerate())
            .map(move |(index, (item, fingerprint))| async move {
                let outcome = self.process_item(item, fingerprint, caller, ctx).await;
                match outcome {
                    Ok(outcome) => {
                        self.settle(index, &outcome, ctx);
                        Ok((index, outcome))
                    }
                    Err(err) => {
                        error!(index, error = %err, "Progress store failure, halting batch");
                        ctx.halt.request_stop();
                        Err(err)
                    }
                }
            })
            .buffer_unordered(ctx.config.concurrency)
            .collect::<Vec<Result<(usize, ItemOutcome<C::Output>), BatchError>>>();

        let settled = tokio::select! {
            settled = work => settled,
            never = self.forward_stop(ctx) => match never {},
        };

        let mut outcomes = Vec::with_capacity(settled.len());
        for entry in settled {
            outcomes.push(entry?);
        }
        outcomes.sort_by_key(|(index, _)| *index);
        let outcomes: Vec<_> = outcomes.into_iter().map(|(_, outcome)| outcome).collect();

        let abort = ctx
            .abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let cancelled = self.stop_requested()
            && (ctx.interrupted.load(Ordering::SeqCst)
                || outcomes.iter().any(|o| o.status == ItemStatus::NotAttempted));

        let result = BatchResult::from_outcomes(outcomes, abort, cancelled, started.elapsed());
        info!(
            completed = result.completed,
            failed = result.failed,
            skipped = result.skipped,
            not_attempted = result.not_attempted,
            aborted = result.is_aborted(),
            cancelled = result.cancelled,
            elapsed_secs = result.elapsed.as_secs_f64(),
            "Batch finished"
        );
        Ok(result)
    }

    async fn process_item<I, C>(
        &self,
        item: I,
        fingerprint: Fingerprint,
        caller: &C,
        ctx: &RunContext<'_>,
    ) -> Result<ItemOutcome<C::Output>, BatchError>
    where
        I: WorkItem,
        C: RemoteCaller<I>,
    {
        if let Some(store) = ctx.store {
            if store.is_completed(&fingerprint) {
                debug!(fingerprint = %fingerprint, "Already completed, skipping");
                return Ok(ItemOutcome::without_attempt(fingerprint, ItemStatus::Skipped));
            }
        }

        if ctx.halt.is_stop_requested() || self.stop_requested() {
            return Ok(ItemOutcome::without_attempt(
                fingerprint,
                ItemStatus::NotAttempted,
            ));
        }

        if let Some(store) = ctx.store {
            store.mark_in_progress(&fingerprint)?;
        }

        let config = ctx.config;
        let limiter = ctx.limiter;
        let halt = &ctx.halt;
        let item = &item;
        let retry = execute_with_policy(&ctx.policy, &fingerprint, Some(halt), move |attempt| {
            call_once(caller, item, limiter, halt, config, attempt)
        })
        .await;

        match retry.result {
            Ok(value) => {
                if let Some(store) = ctx.store {
                    store.mark_completed(&fingerprint)?;
                }
                debug!(fingerprint = %fingerprint, attempts = retry.attempts, "Item completed");
                Ok(ItemOutcome {
                    fingerprint,
                    status: ItemStatus::Completed,
                    attempts: retry.attempts,
                    kind: None,
                    reason: None,
                    value: Some(value),
                    history: retry.history,
                })
            }
            Err(terminal) => {
                let reason = terminal.reason();
                if let Some(store) = ctx.store {
                    store.mark_failed(&fingerprint, reason.as_str())?;
                }
                if terminal.interrupted {
                    ctx.interrupted.store(true, Ordering::SeqCst);
                } else if terminal.kind.aborts_batch() {
                    ctx.trigger_abort(&fingerprint, terminal.kind, &reason);
                }
                Ok(ItemOutcome {
                    fingerprint,
                    status: ItemStatus::Failed,
                    attempts: retry.attempts,
                    kind: Some(terminal.kind),
                    reason: Some(reason),
                    value: None,
                    history: retry.history,
                })
            }
        }
    }

    fn settle<T>(&self, index: usize, outcome: &ItemOutcome<T>, ctx: &RunContext<'_>) {
        record_item_settled(outcome.status.as_str());

        {
            let mut progress = ctx
                .progress
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            progress.record(outcome.status);
            if progress.should_emit_update() {
                info!("{}", progress.format_progress());
                progress.mark_emitted();
            }
        }

        if let Some(hook) = &self.on_settled {
            hook(&SettledEvent {
                index,
                fingerprint: &outcome.fingerprint,
                status: outcome.status,
                attempts: outcome.attempts,
            });
        }
    }

    /// Relay the caller's stop signal into the run's halt signal. Never
    /// resolves.
    async fn forward_stop(&self, ctx: &RunContext<'_>) -> Infallible {
        if let Some(stop) = &self.stop {
            stop.stopped().await;
            ctx.halt.request_stop();
        }
        std::future::pending().await
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|stop| stop.is_stop_requested())
    }
}

/// State shared by the workers of one run.
struct RunContext<'a> {
    config: &'a BatchConfig,
    policy: RetryPolicy,
    limiter: &'a RateLimiter,
    store: Option<&'a ProgressStore>,
    /// Ends the run early. See `trigger_abort` and `forward_stop`.
    halt: StopSignal,
    interrupted: AtomicBool,
    abort: Mutex<Option<BatchAbort>>,
    progress: Mutex<BatchProgress>,
}

impl RunContext<'_> {
    fn trigger_abort(&self, fingerprint: &Fingerprint, kind: ErrorKind, reason: &str) {
        let mut abort = self.abort.lock().unwrap_or_else(PoisonError::into_inner);
        if abort.is_none() {
            error!(
                fingerprint = %fingerprint,
                kind = %kind,
                reason,
                "Aborting batch; remaining items will not be attempted"
            );
            *abort = Some(BatchAbort {
                fingerprint: fingerprint.clone(),
                kind,
                reason: reason.to_string(),
            });
        }
        drop(abort);
        self.halt.request_stop();
    }
}

/// One attempt: wait for a token, then call under the request timeout.
///
/// Nothing is sent once `halt` has fired.
async fn call_once<I, C>(
    caller: &C,
    item: &I,
    limiter: &RateLimiter,
    halt: &StopSignal,
    config: &BatchConfig,
    attempt: u32,
) -> Result<C::Output, Failure>
where
    C: RemoteCaller<I>,
{
    let acquired = tokio::select! {
        biased;
        _ = halt.stopped() => {
            debug!(attempt, "Batch halted before the call was sent");
            return Err(Failure::of_kind(
                ErrorKind::Transient,
                "batch halted before the call was sent",
            ));
        }
        acquired = limiter.acquire(config.acquire_timeout) => acquired,
    };
    if acquired == Acquire::TimedOut {
        warn!(attempt, "Timed out waiting for rate limiter token");
        return Err(Failure::of_kind(
            ErrorKind::Transient,
            "timed out waiting for rate limiter token",
        ));
    }

    let metrics = CallMetrics::start(attempt);
    let result = match tokio::time::timeout(config.request_timeout, caller.call(item)).await {
        Ok(result) => result,
        Err(_) => Err(Failure::timeout(format!(
            "request exceeded timeout of {:.1}s",
            config.request_timeout.as_secs_f64()
        ))),
    };

    match &result {
        Ok(_) => metrics.record_success(),
        Err(failure) => metrics.record_failure(classify(failure)),
    }
    result
}

fn fingerprint_all<I: WorkItem>(items: &[I]) -> Result<Vec<Fingerprint>, BatchError> {
    let mut seen = HashSet::with_capacity(items.len());
    let mut fingerprints = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let fingerprint = item
            .fingerprint()
            .map_err(|source| BatchError::InvalidFingerprint { index, source })?;
        if !seen.insert(fingerprint.clone()) {
            return Err(BatchError::DuplicateFingerprint(fingerprint.into_inner()));
        }
        fingerprints.push(fingerprint);
    }
    Ok(fingerprints)
}
