use core::borrow::Borrow;
use std::{
    collections::BTreeMap,
    panic::{self, AssertUnwindSafe},
    sync::{Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use super::{fetch::fetch_with_retry, ChunkedAggregator, Outcome, RunStats};
use crate::{
    aggregator::Aggregator,
    cancel::CancellationToken,
    config::{AggregationConfig, CombineOrder},
    partition::{Partition, PartitionId},
    source::{PartitionCursor, PartitionSource, PayloadSize},
    AggregationError,
};

/// A partition handed to a worker, tagged with its enumeration position
struct Task {
    seq: usize,
    partition: Partition,
}

enum Reduced<P> {
    Partial(P),
    Skipped,
}

struct TaskResult<P> {
    seq: usize,
    partition: PartitionId,
    attempts: u32,
    payload_bytes: Option<usize>,
    result: Result<Reduced<P>, AggregationError>,
}

// Slack per attempt before the coordinator gives up on a fetch itself
const DEADLINE_GRACE: Duration = Duration::from_millis(10);

/// Partitions whose fetch is running, keyed by sequence number, with the instant their
/// whole retry budget runs out
#[derive(Default)]
struct Fetching(Mutex<BTreeMap<usize, (PartitionId, Instant)>>);

impl Fetching {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<usize, (PartitionId, Instant)>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&self, seq: usize, partition: PartitionId, deadline: Instant) {
        self.lock().insert(seq, (partition, deadline));
    }

    fn finish(&self, seq: usize) {
        self.lock().remove(&seq);
    }

    fn earliest_deadline(&self) -> Option<Instant> {
        self.lock().values().map(|(_, deadline)| *deadline).min()
    }

    /// Lowest sequence number whose budget ran out
    fn expired(&self, now: Instant) -> Option<PartitionId> {
        self.lock()
            .values()
            .find(|(_, deadline)| *deadline <= now)
            .map(|(partition, _)| *partition)
    }
}

/// Upper bound on the time every attempt of one fetch may take, `None` without a timeout
fn fetch_budget(config: &AggregationConfig) -> Option<Duration> {
    let timeout = config.fetch_timeout?;
    let retry = &config.retry;
    let attempts = retry.max_attempts.max(1);
    let delays = retry
        .max_delay
        .max(retry.initial_delay)
        .saturating_mul(attempts - 1);
    Some(
        timeout
            .saturating_add(DEADLINE_GRACE)
            .saturating_mul(attempts)
            .saturating_add(delays),
    )
}

enum Stop {
    Exhausted,
    Cancelled(Option<PartitionId>),
    Failed(AggregationError),
}

/// Runs fetch and reduce on `config.workers` scoped threads and folds every partial on the
/// calling thread.
///
/// At most `workers` partitions are dispatched and not yet folded, which bounds both the
/// payloads held by workers and the partials buffered for ordered combining.
///
/// With a fetch timeout the coordinator stops waiting once a running fetch exhausts its
/// retry budget and reports it as timed out. Workers are scoped threads, so the call still
/// returns only after a source that ignores its [FetchContext](crate::FetchContext) lets go.
pub(crate) fn run<A, S>(
    engine: &ChunkedAggregator<A>,
    source: &S,
    init: A::Aggregate,
) -> Outcome<A::Aggregate>
where
    A: Aggregator + Sync,
    S: PartitionSource + Sync,
    S::Payload: Borrow<A::Input>,
{
    let config = engine.config();
    let workers = config.workers.max(1);
    info!(?config, "starting parallel chunked aggregation");

    let started = Instant::now();
    // Workers skip queued tasks once the coordinator stops
    let halt = CancellationToken::new();
    let fetching = Fetching::default();
    let (task_tx, task_rx) = flume::bounded::<Task>(workers);
    let (result_tx, result_rx) = flume::unbounded::<TaskResult<A::Partial>>();
    let mut coordinator = Coordinator::new(engine, init, workers, &fetching);

    let stop = thread::scope(|scope| {
        for _ in 0..workers {
            let tasks = task_rx.clone();
            let results = result_tx.clone();
            let halt = &halt;
            let fetching = &fetching;
            scope.spawn(move || worker(engine, source, tasks, results, halt, fetching));
        }
        drop(task_rx);
        drop(result_tx);

        let stop = coordinator.drive(source.cursor(), &task_tx, &result_rx);
        halt.cancel();
        drop(task_tx);
        stop
    });

    let Coordinator {
        aggregate,
        mut stats,
        ..
    } = coordinator;
    stats.elapsed = started.elapsed();

    let outcome = match stop {
        Stop::Exhausted => Outcome::Done { aggregate, stats },
        Stop::Cancelled(next) => Outcome::Cancelled {
            partial: aggregate,
            next,
            stats,
        },
        Stop::Failed(error) => {
            warn!(%error, "parallel chunked aggregation failed");
            Outcome::Failed {
                error,
                partial: aggregate,
                stats,
            }
        }
    };
    let stats = outcome.stats();
    info!(
        state = %outcome.state(),
        workers,
        fetched = stats.fetched,
        combined = stats.combined,
        skipped = stats.skipped,
        peak_payload_bytes = stats.peak_payload_bytes,
        elapsed = ?stats.elapsed,
        "parallel chunked aggregation finished"
    );
    outcome
}

fn worker<A, S>(
    engine: &ChunkedAggregator<A>,
    source: &S,
    tasks: Receiver<Task>,
    results: Sender<TaskResult<A::Partial>>,
    halt: &CancellationToken,
    fetching: &Fetching,
) where
    A: Aggregator,
    S: PartitionSource,
    S::Payload: Borrow<A::Input>,
{
    let budget = fetch_budget(engine.config());
    for task in tasks.iter() {
        if halt.is_cancelled() {
            continue;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            process(engine, source, &task, budget, fetching)
        }))
            .unwrap_or_else(|_| {
                warn!(partition = %task.partition, "worker panicked");
                TaskResult {
                    seq: task.seq,
                    partition: task.partition.id,
                    attempts: 0,
                    payload_bytes: None,
                    result: Err(AggregationError::WorkerPanicked {
                        partition: task.partition.id,
                    }),
                }
            });
        if results.send(result).is_err() {
            break;
        }
    }
}

/// Fetches, filters and reduces one partition, the payload is dropped before returning
fn process<A, S>(
    engine: &ChunkedAggregator<A>,
    source: &S,
    task: &Task,
    budget: Option<Duration>,
    fetching: &Fetching,
) -> TaskResult<A::Partial>
where
    A: Aggregator,
    S: PartitionSource,
    S::Payload: Borrow<A::Input>,
{
    let partition = &task.partition;
    if let Some(deadline) = budget.and_then(|budget| Instant::now().checked_add(budget)) {
        fetching.start(task.seq, partition.id, deadline);
    }
    let fetched = fetch_with_retry(
        source,
        partition,
        engine.config(),
        engine.cancellation_token(),
    );
    fetching.finish(task.seq);
    let mut out = TaskResult {
        seq: task.seq,
        partition: partition.id,
        attempts: fetched.attempts,
        payload_bytes: None,
        result: Ok(Reduced::Skipped),
    };
    let payload = match fetched.result {
        Ok(payload) => payload,
        Err(err) => {
            out.result = Err(err);
            return out;
        }
    };
    let bytes = payload.payload_bytes();
    out.payload_bytes = Some(bytes);
    debug!(%partition, bytes, "fetched partition");

    if !engine.keeps(partition, payload.borrow()) {
        debug!(%partition, "partition filtered out");
        return out;
    }
    out.result = engine
        .aggregator()
        .reduce(payload.borrow())
        .map(Reduced::Partial)
        .map_err(|source| AggregationError::Reduce {
            partition: partition.id,
            source,
        });
    out
}

struct Coordinator<'a, A: Aggregator> {
    engine: &'a ChunkedAggregator<A>,
    workers: usize,
    fetching: &'a Fetching,
    aggregate: A::Aggregate,
    stats: RunStats,
    /// Dispatched partitions not folded yet, keyed by sequence number
    pending: BTreeMap<usize, PartitionId>,
    /// Ordered mode only: results waiting for a predecessor
    reorder: BTreeMap<usize, TaskResult<A::Partial>>,
    next_seq: usize,
    /// Set once an error arrived, nothing is dispatched afterwards
    draining: bool,
}

impl<'a, A: Aggregator> Coordinator<'a, A> {
    fn new(
        engine: &'a ChunkedAggregator<A>,
        init: A::Aggregate,
        workers: usize,
        fetching: &'a Fetching,
    ) -> Self {
        Self {
            engine,
            workers,
            fetching,
            aggregate: init,
            stats: RunStats::default(),
            pending: BTreeMap::new(),
            reorder: BTreeMap::new(),
            next_seq: 0,
            draining: false,
        }
    }

    fn drive<C: PartitionCursor>(
        &mut self,
        mut cursor: C,
        tasks: &Sender<Task>,
        results: &Receiver<TaskResult<A::Partial>>,
    ) -> Stop {
        let engine = self.engine;
        let cancel = engine.cancellation_token();
        let mut dispatched = 0;
        let mut exhausted = false;

        loop {
            while !exhausted && !self.draining && self.pending.len() < self.workers {
                let partition = match cursor.next_partition() {
                    Some(partition) => partition,
                    None => {
                        exhausted = true;
                        break;
                    }
                };
                if cancel.is_cancelled() {
                    return Stop::Cancelled(self.first_missing().or(Some(partition.id)));
                }
                let id = partition.id;
                self.pending.insert(dispatched, id);
                let task = Task {
                    seq: dispatched,
                    partition,
                };
                if tasks.send(task).is_err() {
                    return Stop::Failed(AggregationError::WorkerPanicked { partition: id });
                }
                dispatched += 1;
            }

            if self.pending.is_empty() {
                return Stop::Exhausted;
            }
            if cancel.is_cancelled() {
                return Stop::Cancelled(self.first_missing());
            }

            let received = match self.fetching.earliest_deadline() {
                Some(deadline) => results.recv_deadline(deadline),
                None => results.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            let result = match received {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => match self.fetching.expired(Instant::now()) {
                    Some(partition) => {
                        let config = engine.config();
                        return Stop::Failed(AggregationError::Timeout {
                            partition,
                            timeout: config.fetch_timeout.unwrap_or_default(),
                            attempts: config.retry.max_attempts,
                        });
                    }
                    // the fetch finished in the meantime
                    None => continue,
                },
                Err(RecvTimeoutError::Disconnected) => {
                    // every worker is gone while partitions are pending
                    let partition = self.first_missing().unwrap_or(PartitionId(dispatched));
                    return Stop::Failed(AggregationError::WorkerPanicked { partition });
                }
            };
            if let Err(stop) = self.accept(result) {
                return stop;
            }
        }
    }

    fn accept(&mut self, result: TaskResult<A::Partial>) -> Result<(), Stop> {
        // a panicking fetch never clears its own entry
        self.fetching.finish(result.seq);
        self.stats.fetch_attempts += result.attempts as u64;
        if let Some(bytes) = result.payload_bytes {
            self.stats.record_payload(bytes);
        }

        match &result.result {
            Err(AggregationError::Cancelled { .. }) => {
                return Err(Stop::Cancelled(self.first_missing()));
            }
            Err(_) => self.draining = true,
            Ok(_) => {}
        }

        match self.engine.config().order {
            CombineOrder::Unordered => self.fold(result),
            CombineOrder::Ordered => {
                self.reorder.insert(result.seq, result);
                while let Some(next) = self.reorder.remove(&self.next_seq) {
                    self.next_seq += 1;
                    self.fold(next)?;
                }
                Ok(())
            }
        }
    }

    fn fold(&mut self, result: TaskResult<A::Partial>) -> Result<(), Stop> {
        let partial = match result.result {
            Ok(Reduced::Partial(partial)) => partial,
            Ok(Reduced::Skipped) => {
                self.stats.skipped += 1;
                self.pending.remove(&result.seq);
                return Ok(());
            }
            Err(error) => return Err(Stop::Failed(error)),
        };
        match self.engine.aggregator().combine(&self.aggregate, partial) {
            Ok(next) => {
                self.aggregate = next;
                self.stats.combined += 1;
                self.pending.remove(&result.seq);
                Ok(())
            }
            Err(source) => Err(Stop::Failed(AggregationError::Combine {
                partition: result.partition,
                source,
            })),
        }
    }

    /// Lowest dispatched partition whose result is not part of the aggregate
    fn first_missing(&self) -> Option<PartitionId> {
        self.pending.values().next().copied()
    }
}
