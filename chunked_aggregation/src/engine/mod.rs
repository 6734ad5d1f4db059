use core::{borrow::Borrow, fmt};
use std::time::Duration;

use crate::{
    aggregator::Aggregator,
    cancel::CancellationToken,
    config::{AggregationConfig, ConfigError},
    partition::{Partition, PartitionId},
    source::PartitionSource,
    AggregationError,
};

mod fetch;
mod parallel;
mod run;

pub use run::AggregationRun;

/// Predicate deciding, after fetch and before reduce, whether a partition takes part
pub type KeepFn<I> = dyn Fn(&Partition, &I) -> bool + Send + Sync;

/// Lifecycle of an aggregation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Nothing fetched yet
    Idle,
    /// Fetching, reducing and combining partitions
    Processing,
    /// Source exhausted, final aggregate available
    Done,
    /// Stopped by the cancellation token
    Cancelled,
    /// Stopped by an error
    Failed,
}

impl RunState {
    /// Done, Cancelled and Failed are never left again
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Cancelled | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Processing => "processing",
            RunState::Done => "done",
            RunState::Cancelled => "cancelled",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Counters collected while a run progresses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Partitions fetched successfully
    pub fetched: usize,
    /// Partitions reduced and combined into the aggregate
    pub combined: usize,
    /// Partitions rejected by the keep predicate
    pub skipped: usize,
    /// Fetch attempts including retries
    pub fetch_attempts: u64,
    /// Largest single payload held, in bytes
    pub peak_payload_bytes: usize,
    /// Sum of all fetched payload sizes, in bytes
    pub total_payload_bytes: u64,
    pub elapsed: Duration,
}

impl RunStats {
    pub(crate) fn record_payload(&mut self, bytes: usize) {
        self.fetched += 1;
        self.peak_payload_bytes = self.peak_payload_bytes.max(bytes);
        self.total_payload_bytes += bytes as u64;
    }
}

/// Result of an aggregation run
///
/// The aggregate is only ever observable through one of these tagged variants.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Every partition was processed
    Done { aggregate: T, stats: RunStats },
    /// Cancellation stopped the run; `partial` covers every partition combined before it
    Cancelled {
        partial: T,
        /// First partition whose result is missing from `partial`, if one was enumerated
        next: Option<PartitionId>,
        stats: RunStats,
    },
    /// An error stopped the run; `partial` covers every partition combined before it
    Failed {
        error: AggregationError,
        partial: T,
        stats: RunStats,
    },
}

impl<T> Outcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done { .. })
    }
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled { .. })
    }
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    pub fn state(&self) -> RunState {
        match self {
            Outcome::Done { .. } => RunState::Done,
            Outcome::Cancelled { .. } => RunState::Cancelled,
            Outcome::Failed { .. } => RunState::Failed,
        }
    }

    pub fn stats(&self) -> &RunStats {
        match self {
            Outcome::Done { stats, .. }
            | Outcome::Cancelled { stats, .. }
            | Outcome::Failed { stats, .. } => stats,
        }
    }

    /// The final aggregate of a completed run, or the partial aggregate otherwise
    pub fn aggregate(&self) -> &T {
        match self {
            Outcome::Done { aggregate, .. } => aggregate,
            Outcome::Cancelled { partial, .. } | Outcome::Failed { partial, .. } => partial,
        }
    }

    pub fn error(&self) -> Option<&AggregationError> {
        match self {
            Outcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Converts into the final aggregate, turning cancellation into [AggregationError::Cancelled]
    pub fn into_result(self) -> Result<T, AggregationError> {
        match self {
            Outcome::Done { aggregate, .. } => Ok(aggregate),
            Outcome::Cancelled { next, .. } => Err(AggregationError::Cancelled { next }),
            Outcome::Failed { error, .. } => Err(error),
        }
    }

    /// Converts into the aggregate regardless of how the run ended
    pub fn into_aggregate(self) -> T {
        match self {
            Outcome::Done { aggregate, .. } => aggregate,
            Outcome::Cancelled { partial, .. } | Outcome::Failed { partial, .. } => partial,
        }
    }
}

/// Drives an [Aggregator] over a [PartitionSource]
pub struct ChunkedAggregator<A: Aggregator> {
    aggregator: A,
    keep: Option<Box<KeepFn<A::Input>>>,
    config: AggregationConfig,
    cancel: CancellationToken,
}

impl<A: Aggregator> ChunkedAggregator<A> {
    pub fn new(aggregator: A) -> Self {
        Self {
            aggregator,
            keep: None,
            config: AggregationConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Only partitions for which `keep` returns true are reduced and combined
    pub fn with_filter<F>(mut self, keep: F) -> Self
    where
        F: Fn(&Partition, &A::Input) -> bool + Send + Sync + 'static,
    {
        self.keep = Some(Box::new(keep));
        self
    }

    /// Uses `config` as given, see [ChunkedAggregator::try_with_config] to validate it first
    pub fn with_config(mut self, config: AggregationConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `config` once [AggregationConfig::validate] accepts it
    pub fn try_with_config(self, config: AggregationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(self.with_config(config))
    }

    /// Uses `token` instead of the aggregator's own cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn aggregator(&self) -> &A {
        &self.aggregator
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Token checked between partitions, cancelling it stops every run of this aggregator
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn keeps(&self, partition: &Partition, input: &A::Input) -> bool {
        self.keep
            .as_ref()
            .map(|keep| keep(partition, input))
            .unwrap_or(true)
    }

    /// Starts a stepwise sequential run over `source`
    pub fn start<S>(&self, source: S, init: A::Aggregate) -> AggregationRun<'_, A, S>
    where
        S: PartitionSource,
        S::Payload: Borrow<A::Input>,
    {
        AggregationRun::new(self, source, init)
    }

    /// Aggregates every partition of `source` sequentially
    ///
    /// At most one payload is held at a time: each partition is fetched, filtered, reduced
    /// and combined before the next one is fetched.
    pub fn run<S>(&self, source: S, init: A::Aggregate) -> Outcome<A::Aggregate>
    where
        S: PartitionSource,
        S::Payload: Borrow<A::Input>,
    {
        self.start(source, init).finish()
    }

    /// Aggregates every partition of `source` with `config.workers` worker threads
    ///
    /// Workers fetch, filter and reduce disjoint partitions while the calling thread performs
    /// every combine. At most `workers` partitions are outstanding at any time.
    /// A single worker falls back to [ChunkedAggregator::run].
    pub fn run_parallel<S>(&self, source: S, init: A::Aggregate) -> Outcome<A::Aggregate>
    where
        A: Sync,
        S: PartitionSource + Sync,
        S::Payload: Borrow<A::Input>,
    {
        if self.config.workers <= 1 {
            return self.run(source, init);
        }
        parallel::run(self, &source, init)
    }
}

impl<A: Aggregator + fmt::Debug> fmt::Debug for ChunkedAggregator<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ChunkedAggregator")
            .field("aggregator", &self.aggregator)
            .field("filtered", &self.keep.is_some())
            .field("config", &self.config)
            .finish()
    }
}
