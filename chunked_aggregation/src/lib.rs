//! # Chunked Aggregation
//!
//! ## What it is
//!
//! Chunked Aggregation computes aggregates over partitioned datasets (raster tiles, row groups,
//! byte ranges of a file) without ever materialising the whole dataset in memory.
//! Partitions are pulled lazily from a [PartitionSource], each payload is reduced to a partial
//! result and folded into a running aggregate before the next partition is fetched.
//!
//! Key features:
//!
//! * Bounded memory: one payload at a time (sequential) or one per worker (parallel)
//! * Same result as reducing the fully materialised dataset
//! * Filtering of partitions after fetch and before reduce
//! * Fetch timeouts, fetch retries with backoff and cooperative cancellation
//! * Tagged outcomes that expose the partial aggregate on failure or cancellation
//!
//! ## How it works
//!
//! An [Aggregator] defines `reduce` (payload to partial result) and `combine`
//! (running aggregate plus partial result to next aggregate). A [ChunkedAggregator] drives the
//! loop below until the source is exhausted:
//!
//! ```text
//!   cursor.next_partition() -> fetch -> keep? -> reduce -> combine
//! ```
//!
//! Sequential runs are exposed as a stepwise [AggregationRun] whose [RunState] moves from
//! `Idle` to `Processing` and ends in `Done`, `Cancelled` or `Failed`.
//! Parallel runs fan fetch and reduce out to a bounded pool of worker threads while a single
//! thread performs every combine, either in enumeration order or in arrival order.
//!
//! ```
//! use chunked_aggregation::{aggregator::CountAggregator, source::RowSource, ChunkedAggregator};
//!
//! let rows = vec!["forest", "other", "forest", "forest", "other"];
//! let source = RowSource::new(rows, 2);
//! let aggregator = ChunkedAggregator::new(CountAggregator::new(|label: &&str| *label == "forest"));
//!
//! let outcome = aggregator.run(&source, 0u64);
//! assert_eq!(outcome.into_result().unwrap(), 3);
//! ```
//!
//! # Feature Flags
//!
//! - `serde` (_enabled by default_)
//!     - Enables (de)serialisation of the configuration types and loading them from TOML
//! - `histogram` (_enabled by default_)
//!     - Enables the [hdrhistogram](https://docs.rs/hdrhistogram) backed quantile aggregator
//! - `rkyv`
//!     - Enables serialisation & deserialisation of [aggregator::AggState] using the [rkyv](https://docs.rs/rkyv/latest/rkyv/) framework.

use std::time::Duration;
use thiserror::Error;

/// Aggregation interface and built-in aggregators
pub mod aggregator;
/// Cooperative cancellation signal
pub mod cancel;
/// Run configuration
pub mod config;
/// Sequential and parallel aggregation engines
pub mod engine;
/// Partition addressing and chunking strategies
pub mod partition;
/// Fetch retry policy
pub mod retry;
/// Data source contract and bundled sources
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::Aggregator;
pub use cancel::CancellationToken;
pub use config::{AggregationConfig, CombineOrder, ConfigError};
pub use engine::{AggregationRun, ChunkedAggregator, Outcome, RunState, RunStats};
pub use partition::{Chunking, Partition, PartitionId, PartitionKey, Window};
pub use retry::{Backoff, RetryPolicy};
pub use source::{FetchContext, PartitionCursor, PartitionSource, PayloadSize};

/// Error type returned by user supplied sources, reducers and combiners
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A type containing error variants that may end an aggregation run
#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("failed to fetch {partition} after {attempts} attempt(s): {source}")]
    Fetch {
        partition: PartitionId,
        attempts: u32,
        source: BoxError,
    },
    #[error("fetch of {partition} exceeded its {timeout:?} deadline after {attempts} attempt(s)")]
    Timeout {
        partition: PartitionId,
        timeout: Duration,
        attempts: u32,
    },
    #[error("reducer failed on {partition}: {source}")]
    Reduce {
        partition: PartitionId,
        source: BoxError,
    },
    #[error("combiner failed on {partition}: {source}")]
    Combine {
        partition: PartitionId,
        source: BoxError,
    },
    #[error("aggregation cancelled before {}", display_next(.next))]
    Cancelled { next: Option<PartitionId> },
    #[error("worker thread panicked while processing {partition}")]
    WorkerPanicked { partition: PartitionId },
}

fn display_next(next: &Option<PartitionId>) -> String {
    match next {
        Some(id) => format!("partition {}", id),
        None => "the first partition".to_string(),
    }
}

impl AggregationError {
    /// The partition the error is attributed to
    pub fn partition(&self) -> Option<PartitionId> {
        match self {
            AggregationError::Fetch { partition, .. }
            | AggregationError::Timeout { partition, .. }
            | AggregationError::Reduce { partition, .. }
            | AggregationError::Combine { partition, .. }
            | AggregationError::WorkerPanicked { partition } => Some(*partition),
            AggregationError::Cancelled { next } => *next,
        }
    }
    pub fn is_fetch(&self) -> bool {
        matches!(self, AggregationError::Fetch { .. })
    }
    pub fn is_timeout(&self) -> bool {
        matches!(self, AggregationError::Timeout { .. })
    }
    pub fn is_reduce(&self) -> bool {
        matches!(self, AggregationError::Reduce { .. })
    }
    pub fn is_combine(&self) -> bool {
        matches!(self, AggregationError::Combine { .. })
    }
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AggregationError::Cancelled { .. })
    }
}
