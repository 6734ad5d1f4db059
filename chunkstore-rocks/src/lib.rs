//! RocksDB backed partition stores for [chunked_aggregation].
//!
//! * [table::RowGroupStore] keeps tables of [table::Record]s as row groups, one column family per table.
//! * [tiles::TileStore] keeps raster bands as their native blocks and maintains per band
//!   statistics through a merge operator.
//!
//! Values are archived with rkyv and compressed with lz4. Every fetch is timed into a
//! [FetchLatency] histogram.

use hdrhistogram::Histogram;
use std::{sync::Mutex, time::Duration};
use thiserror::Error;

pub mod codec;
pub mod table;
pub mod tiles;

pub use table::{Record, RowGroup, RowGroupStore, Table, TableMeta, TableSource};
pub use tiles::{BandMeta, TileSource, TileStore};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Rocks(#[from] rocksdb::Error),
    #[error("unknown table {0}")]
    UnknownTable(String),
    #[error("no value stored under {0}")]
    Missing(String),
    #[error("corrupt value under {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("failed to encode value: {0}")]
    Encode(String),
    #[error("histogram error: {0}")]
    Histogram(String),
}

impl StoreError {
    pub(crate) fn corrupt(key: &[u8], reason: impl ToString) -> Self {
        StoreError::Corrupt {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: reason.to_string(),
        }
    }
}

/// Latency of store fetches in microseconds
pub struct FetchLatency {
    hist: Mutex<Histogram<u64>>,
}

impl FetchLatency {
    pub fn new() -> Result<Self, StoreError> {
        let hist =
            Histogram::new(4).map_err(|err| StoreError::Histogram(format!("{:?}", err)))?;
        Ok(Self {
            hist: Mutex::new(hist),
        })
    }

    pub fn record(&self, elapsed: Duration) {
        if let Ok(mut hist) = self.hist.lock() {
            hist.saturating_record(elapsed.as_micros() as u64);
        }
    }

    /// A copy of the histogram recorded so far
    pub fn snapshot(&self) -> Histogram<u64> {
        match self.hist.lock() {
            Ok(hist) => hist.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl std::fmt::Debug for FetchLatency {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let hist = self.snapshot();
        f.debug_struct("FetchLatency")
            .field("count", &hist.len())
            .field("p99_us", &hist.value_at_quantile(0.99))
            .finish()
    }
}
