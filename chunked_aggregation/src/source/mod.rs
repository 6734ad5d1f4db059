//! Data source contract consumed by the aggregation engines.
//!
//! A source is split in two halves: a [PartitionCursor] that enumerates partitions
//! one at a time, and [PartitionSource::fetch] which loads the payload of a single partition.
//! Keeping the cursor as an owned value lets parallel workers share `&source` for fetching
//! while the engine advances the cursor.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::{
    cancel::CancellationToken,
    partition::{Partition, PartitionKey},
    BoxError,
};

/// In-memory rows grouped into fixed-size row groups
pub mod mem;
/// Windowed reads over a raster band
pub mod raster;
/// Fixed-size byte ranges of a file
pub mod file;

pub use file::{file_size_mb, FileSource};
pub use mem::RowSource;
pub use raster::{RasterBand, RasterSource, Tile};

/// Errors raised by the sources shipped with this crate
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("{source_kind} cannot address partition key {key}")]
    UnsupportedKey {
        source_kind: &'static str,
        key: PartitionKey,
    },
    #[error("partition key {key} lies outside the dataset")]
    OutOfBounds { key: PartitionKey },
    #[error("fetch abandoned after deadline passed")]
    DeadlineExceeded,
    #[error("fetch abandoned after cancellation")]
    Cancelled,
}

impl SourceError {
    pub(crate) fn unsupported(source_kind: &'static str, key: &PartitionKey) -> Self {
        SourceError::UnsupportedKey {
            source_kind,
            key: key.clone(),
        }
    }
}

/// Pull-based enumeration of partitions
pub trait PartitionCursor {
    /// Returns the next partition or `None` once the dataset is exhausted
    ///
    /// Must keep returning `None` when called again after exhaustion.
    fn next_partition(&mut self) -> Option<Partition>;
}

impl<I> PartitionCursor for I
where
    I: Iterator<Item = Partition>,
{
    #[inline]
    fn next_partition(&mut self) -> Option<Partition> {
        self.next()
    }
}

/// A partitioned dataset
pub trait PartitionSource {
    /// Payload obtained by fetching a single partition
    type Payload: PayloadSize;
    /// Cursor type enumerating the partitions of this source
    type Cursor: PartitionCursor;

    /// Returns a fresh cursor positioned before the first partition
    fn cursor(&self) -> Self::Cursor;

    /// Loads the payload of `partition`
    ///
    /// Implementations performing blocking I/O should give up once [FetchContext::is_expired]
    /// or [FetchContext::is_cancelled] returns true.
    fn fetch(&self, partition: &Partition, ctx: &FetchContext) -> Result<Self::Payload, BoxError>;
}

impl<S: PartitionSource + ?Sized> PartitionSource for &S {
    type Payload = S::Payload;
    type Cursor = S::Cursor;

    fn cursor(&self) -> Self::Cursor {
        (**self).cursor()
    }
    fn fetch(&self, partition: &Partition, ctx: &FetchContext) -> Result<Self::Payload, BoxError> {
        (**self).fetch(partition, ctx)
    }
}

/// Size in bytes a fetched payload occupies in memory
pub trait PayloadSize {
    fn payload_bytes(&self) -> usize;
}

impl<T> PayloadSize for Vec<T> {
    #[inline]
    fn payload_bytes(&self) -> usize {
        self.len() * std::mem::size_of::<T>()
    }
}

impl<T> PayloadSize for Box<[T]> {
    #[inline]
    fn payload_bytes(&self) -> usize {
        self.len() * std::mem::size_of::<T>()
    }
}

/// Per-attempt information handed to [PartitionSource::fetch]
#[derive(Debug, Clone)]
pub struct FetchContext {
    attempt: u32,
    started: Instant,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl FetchContext {
    pub fn new(attempt: u32, timeout: Option<Duration>, cancel: CancellationToken) -> Self {
        let started = Instant::now();
        Self {
            attempt,
            started,
            deadline: timeout.map(|t| started + t),
            cancel,
        }
    }

    /// Attempt number starting at 1
    #[inline]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left until the deadline, `None` if no deadline is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails once the fetch should be abandoned, cancellation takes precedence
    pub fn check(&self) -> Result<(), SourceError> {
        if self.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        if self.is_expired() {
            return Err(SourceError::DeadlineExceeded);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_deadline() {
        let ctx = FetchContext::new(1, None, CancellationToken::new());
        assert!(!ctx.is_expired());
        assert!(ctx.remaining().is_none());
        assert_eq!(ctx.attempt(), 1);

        let ctx = FetchContext::new(2, Some(Duration::ZERO), CancellationToken::new());
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn context_sees_cancellation() {
        let token = CancellationToken::new();
        let ctx = FetchContext::new(1, None, token.clone());
        assert!(!ctx.is_cancelled());
        assert!(ctx.check().is_ok());
        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.check(), Err(SourceError::Cancelled)));
    }

    #[test]
    fn expired_context_fails_check() {
        let ctx = FetchContext::new(1, Some(Duration::ZERO), CancellationToken::new());
        assert!(matches!(ctx.check(), Err(SourceError::DeadlineExceeded)));
    }

    #[test]
    fn vec_payload_size() {
        let payload: Vec<u32> = vec![0; 16];
        assert_eq!(payload.payload_bytes(), 64);
    }
}
