use core::borrow::Borrow;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{fetch::fetch_with_retry, ChunkedAggregator, Outcome, RunState, RunStats};
use crate::{
    aggregator::Aggregator,
    partition::PartitionId,
    source::{PartitionCursor, PartitionSource, PayloadSize},
    AggregationError,
};

/// A sequential aggregation run advanced one partition at a time
///
/// Created by [ChunkedAggregator::start]. Each [AggregationRun::step] performs one
/// fetch, filter, reduce and combine cycle; [AggregationRun::finish] steps until the run
/// reaches a terminal state.
pub struct AggregationRun<'a, A: Aggregator, S: PartitionSource> {
    engine: &'a ChunkedAggregator<A>,
    source: S,
    cursor: Option<S::Cursor>,
    state: RunState,
    aggregate: A::Aggregate,
    error: Option<AggregationError>,
    next: Option<PartitionId>,
    stats: RunStats,
    started: Option<Instant>,
}

impl<'a, A, S> AggregationRun<'a, A, S>
where
    A: Aggregator,
    S: PartitionSource,
    S::Payload: Borrow<A::Input>,
{
    pub(crate) fn new(engine: &'a ChunkedAggregator<A>, source: S, init: A::Aggregate) -> Self {
        Self {
            engine,
            source,
            cursor: None,
            state: RunState::Idle,
            aggregate: init,
            error: None,
            next: None,
            stats: RunStats::default(),
            started: None,
        }
    }

    #[inline]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// The aggregate of every partition combined so far
    #[inline]
    pub fn aggregate(&self) -> &A::Aggregate {
        &self.aggregate
    }

    #[inline]
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// The error that moved the run to [RunState::Failed]
    pub fn error(&self) -> Option<&AggregationError> {
        self.error.as_ref()
    }

    /// Processes the next partition and returns the resulting state
    ///
    /// Stepping a run in a terminal state does nothing.
    pub fn step(&mut self) -> RunState {
        if self.state.is_terminal() {
            return self.state;
        }
        if self.state == RunState::Idle {
            info!(config = ?self.engine.config(), "starting chunked aggregation");
            self.cursor = Some(self.source.cursor());
            self.started = Some(Instant::now());
            self.state = RunState::Processing;
        }

        let partition = match self.cursor.as_mut().and_then(|c| c.next_partition()) {
            Some(partition) => partition,
            None => return self.transition(RunState::Done),
        };

        let engine = self.engine;
        if engine.cancellation_token().is_cancelled() {
            self.next = Some(partition.id);
            return self.transition(RunState::Cancelled);
        }

        let fetched = fetch_with_retry(
            &self.source,
            &partition,
            engine.config(),
            engine.cancellation_token(),
        );
        self.stats.fetch_attempts += fetched.attempts as u64;
        let payload = match fetched.result {
            Ok(payload) => payload,
            Err(AggregationError::Cancelled { next }) => {
                self.next = next;
                return self.transition(RunState::Cancelled);
            }
            Err(err) => return self.fail(err),
        };

        let bytes = payload.payload_bytes();
        self.stats.record_payload(bytes);
        debug!(%partition, bytes, "fetched partition");

        if !engine.keeps(&partition, payload.borrow()) {
            self.stats.skipped += 1;
            debug!(%partition, "partition filtered out");
            return self.state;
        }

        let reduced = engine.aggregator().reduce(payload.borrow());
        // release the payload before combining
        drop(payload);
        let partial = match reduced {
            Ok(partial) => partial,
            Err(source) => {
                return self.fail(AggregationError::Reduce {
                    partition: partition.id,
                    source,
                })
            }
        };

        match engine.aggregator().combine(&self.aggregate, partial) {
            Ok(next) => {
                self.aggregate = next;
                self.stats.combined += 1;
                self.state
            }
            Err(source) => self.fail(AggregationError::Combine {
                partition: partition.id,
                source,
            }),
        }
    }

    /// Steps until the run is done, cancelled or failed
    pub fn finish(mut self) -> Outcome<A::Aggregate> {
        while !self.state.is_terminal() {
            self.step();
        }
        self.into_outcome()
    }

    /// Ends the run where it stands
    ///
    /// A run that has not reached a terminal state is reported as cancelled.
    pub fn into_outcome(mut self) -> Outcome<A::Aggregate> {
        if !self.state.is_terminal() {
            self.transition(RunState::Cancelled);
        }
        let stats = self.stats;
        match (self.state, self.error) {
            (RunState::Failed, Some(error)) => Outcome::Failed {
                error,
                partial: self.aggregate,
                stats,
            },
            (RunState::Done, _) => Outcome::Done {
                aggregate: self.aggregate,
                stats,
            },
            _ => Outcome::Cancelled {
                partial: self.aggregate,
                next: self.next,
                stats,
            },
        }
    }

    fn fail(&mut self, error: AggregationError) -> RunState {
        warn!(%error, "chunked aggregation failed");
        self.error = Some(error);
        self.transition(RunState::Failed)
    }

    fn transition(&mut self, state: RunState) -> RunState {
        debug_assert!(!self.state.is_terminal());
        self.state = state;
        if let Some(started) = self.started {
            self.stats.elapsed = started.elapsed();
        }
        if state.is_terminal() {
            info!(
                %state,
                fetched = self.stats.fetched,
                combined = self.stats.combined,
                skipped = self.stats.skipped,
                peak_payload_bytes = self.stats.peak_payload_bytes,
                elapsed = ?self.stats.elapsed,
                "chunked aggregation finished"
            );
        }
        state
    }
}
