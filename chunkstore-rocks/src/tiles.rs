use chunked_aggregation::{
    aggregator::{AggState, AllAggregator},
    partition::{Partition, PartitionId, PartitionKey, Window, WindowIter},
    source::{RasterBand, Tile},
    Aggregator, BoxError, Chunking, FetchContext, PartitionSource,
};
use rkyv::{Archive, Deserialize, Serialize};
use rocksdb::{MergeOperands, Options, WriteBatch, DB};
use std::{path::Path, sync::Arc};
use tracing::{debug, error, info};

use crate::{codec, FetchLatency, StoreError};

/// Shape of a stored band
#[derive(Archive, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct BandMeta {
    pub width: u64,
    pub height: u64,
    pub block_width: u64,
    pub block_height: u64,
}

impl BandMeta {
    fn windows(&self) -> WindowIter {
        WindowIter::new(
            self.width as usize,
            self.height as usize,
            self.block_width as usize,
            self.block_height as usize,
        )
    }
}

fn meta_key(band: &str) -> Vec<u8> {
    format!("{}/meta", band).into_bytes()
}

fn stats_key(band: &str) -> Vec<u8> {
    format!("{}/stats", band).into_bytes()
}

/// Tiles sort by band and then by their position in row-major block order
fn tile_key(band: &str, index: usize) -> Vec<u8> {
    let mut key = format!("{}/tile/", band).into_bytes();
    key.extend_from_slice(&(index as u64).to_be_bytes());
    key
}

// Folds AggState operands into the band statistics, partial merges use the same function
fn merge_stats(
    key: &[u8],
    existing: Option<&[u8]>,
    operands: &MergeOperands,
) -> Option<Vec<u8>> {
    let mut state = match existing {
        Some(bytes) => match codec::decode::<AggState>(key, bytes) {
            Ok(state) => state,
            Err(err) => {
                error!(%err, "dropping undecodable band statistics");
                return None;
            }
        },
        None => AggState::default(),
    };
    for op in operands {
        match codec::decode::<AggState>(key, op) {
            Ok(partial) => state.merge(partial),
            Err(err) => {
                error!(%err, "dropping undecodable statistics operand");
                return None;
            }
        }
    }
    codec::encode(&state).ok()
}

/// Raster bands of `u16` pixels stored block by block
///
/// Writing a band also merges the statistics of each block into a per band [AggState],
/// which RocksDB folds with a merge operator.
pub struct TileStore {
    db: Arc<DB>,
    latency: Arc<FetchLatency>,
}

impl TileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_merge_operator_associative("band stats", merge_stats);
        let db = DB::open(&opts, path.as_ref())?;
        Ok(Self {
            db: Arc::new(db),
            latency: Arc::new(FetchLatency::new()?),
        })
    }

    /// Stores every native block of `pixels` under `band`, replacing what was stored before
    pub fn write_band(&self, band: &str, pixels: &RasterBand<u16>) -> Result<BandMeta, StoreError> {
        let (block_width, block_height) = pixels.block_shape();
        let meta = BandMeta {
            width: pixels.width() as u64,
            height: pixels.height() as u64,
            block_width: block_width as u64,
            block_height: block_height as u64,
        };
        let all = AllAggregator::<u16>::new();
        let mut batch = WriteBatch::default();
        batch.delete(stats_key(band));
        for (index, window) in pixels.windows(Chunking::Native).enumerate() {
            let tile = pixels
                .read(&window)
                .map_err(|err| StoreError::Encode(err.to_string()))?;
            let stats = all
                .reduce(&tile.data)
                .map_err(|err| StoreError::Encode(err.to_string()))?;
            batch.put(tile_key(band, index), codec::encode(&tile.data)?);
            batch.merge(stats_key(band), codec::encode(&stats)?);
        }
        batch.put(meta_key(band), codec::encode(&meta)?);
        self.db.write(batch)?;
        info!(band, width = meta.width, height = meta.height, "wrote band");
        Ok(meta)
    }

    pub fn meta(&self, band: &str) -> Result<Option<BandMeta>, StoreError> {
        let key = meta_key(band);
        match self.db.get(&key)? {
            Some(bytes) => codec::decode(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Statistics over every pixel of `band` as maintained by the merge operator
    pub fn stats(&self, band: &str) -> Result<Option<AggState>, StoreError> {
        let key = stats_key(band);
        match self.db.get(&key)? {
            Some(bytes) => codec::decode(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn read_tile(&self, band: &str, index: usize, window: Window) -> Result<Tile<u16>, StoreError> {
        let key = tile_key(band, index);
        let now = minstant::Instant::now();
        let bytes = self
            .db
            .get_pinned(&key)?
            .ok_or_else(|| StoreError::Missing(format!("{}/tile/{}", band, index)))?;
        let data: Vec<u16> = codec::decode(&key, &bytes)?;
        self.latency.record(now.elapsed());
        if data.len() != window.area() {
            return Err(StoreError::corrupt(
                &key,
                format!("expected {} pixels, found {}", window.area(), data.len()),
            ));
        }
        Ok(Tile { window, data })
    }

    /// A partition source over the stored blocks of `band`
    pub fn source(&self, band: &str) -> Result<TileSource<'_>, StoreError> {
        let meta = self
            .meta(band)?
            .ok_or_else(|| StoreError::Missing(format!("{}/meta", band)))?;
        Ok(TileSource {
            store: self,
            band: band.to_string(),
            meta,
        })
    }

    pub fn fetch_latency(&self) -> &FetchLatency {
        &self.latency
    }

    // force materialization of pending merge operands
    pub fn compact(&self) {
        self.db.compact_range(None::<&[u8]>, None::<&[u8]>);
    }
}

/// Native blocks of a stored band exposed as partitions
pub struct TileSource<'a> {
    store: &'a TileStore,
    band: String,
    meta: BandMeta,
}

impl<'a> TileSource<'a> {
    pub fn meta(&self) -> &BandMeta {
        &self.meta
    }
}

/// Cursor over the stored blocks of a band
pub struct BlockCursor {
    windows: WindowIter,
    index: usize,
}

impl Iterator for BlockCursor {
    type Item = Partition;

    fn next(&mut self) -> Option<Partition> {
        let window = self.windows.next()?;
        let index = self.index;
        self.index += 1;
        Some(Partition::new(PartitionId(index), PartitionKey::Tile(window)))
    }
}

impl<'a> PartitionSource for TileSource<'a> {
    type Payload = Tile<u16>;
    type Cursor = BlockCursor;

    fn cursor(&self) -> BlockCursor {
        BlockCursor {
            windows: self.meta.windows(),
            index: 0,
        }
    }

    fn fetch(&self, partition: &Partition, ctx: &FetchContext) -> Result<Tile<u16>, BoxError> {
        let window = match partition.window() {
            Some(window) => *window,
            None => return Err(format!("tile sources cannot address {}", partition.key).into()),
        };
        ctx.check()?;
        let tile = self
            .store
            .read_tile(&self.band, partition.id.index(), window)?;
        debug!(band = %self.band, %window, attempt = ctx.attempt(), "read tile");
        Ok(tile)
    }
}
