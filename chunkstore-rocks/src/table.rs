use chunked_aggregation::{
    partition::{Partition, PartitionId, PartitionKey, RangeIter},
    BoxError, FetchContext, PartitionSource, PayloadSize,
};
use rkyv::{Archive, Deserialize, Serialize};
use rocksdb::{Options, WriteBatch, DB};
use std::{borrow::Borrow, iter::Enumerate, iter::Map, ops::Range, path::Path, sync::Arc};
use tracing::{debug, info};

use crate::{codec, FetchLatency, StoreError};

const META_KEY: &[u8] = b"__meta";

/// A labelled measurement, one row of a table
#[derive(Archive, Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
#[archive(check_bytes)]
pub struct Record {
    pub class: u32,
    pub value: f64,
}

impl Record {
    pub fn new(class: u32, value: f64) -> Self {
        Self { class, value }
    }
}

/// Layout of a table as it was last written
#[derive(Archive, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct TableMeta {
    pub num_rows: u64,
    pub rows_per_group: u64,
}

impl TableMeta {
    pub fn num_row_groups(&self) -> u64 {
        if self.rows_per_group == 0 {
            return 0;
        }
        self.num_rows.div_ceil(self.rows_per_group)
    }
}

/// The records of one row group
#[derive(Debug, Clone, PartialEq)]
pub struct RowGroup {
    pub index: usize,
    pub records: Vec<Record>,
}

impl Borrow<[Record]> for RowGroup {
    fn borrow(&self) -> &[Record] {
        &self.records
    }
}

impl PayloadSize for RowGroup {
    fn payload_bytes(&self) -> usize {
        self.records.payload_bytes()
    }
}

/// Row groups are keyed by their big-endian index so they iterate in order
fn row_group_key(index: usize) -> [u8; 8] {
    (index as u64).to_be_bytes()
}

fn row_group_partition((index, rows): (usize, Range<usize>)) -> Partition {
    Partition::new(PartitionId(index), PartitionKey::RowGroup { index, rows })
}

/// Tables of [Record]s split into row groups, one column family per table
pub struct RowGroupStore {
    db: Arc<DB>,
    latency: Arc<FetchLatency>,
}

impl RowGroupStore {
    /// Opens or creates the store at `path`, creating any of `tables` that do not exist yet
    pub fn open(path: impl AsRef<Path>, tables: &[&str]) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        // listing fails for a store that does not exist yet
        let existing: Vec<String> = DB::list_cf(&opts, path)
            .unwrap_or_default()
            .into_iter()
            .filter(|name| name != "default")
            .collect();

        let mut db = DB::open_cf(&opts, path, &existing)?;
        for table in tables {
            if !existing.iter().any(|name| name == table) {
                db.create_cf(*table, &Options::default())?;
                info!(table, "created table");
            }
        }
        Ok(Self {
            db: Arc::new(db),
            latency: Arc::new(FetchLatency::new()?),
        })
    }

    pub fn table(&self, name: impl Into<String>) -> Result<Table, StoreError> {
        let name = name.into();
        if self.db.cf_handle(&name).is_none() {
            return Err(StoreError::UnknownTable(name));
        }
        Ok(Table {
            name,
            db: self.db.clone(),
            latency: self.latency.clone(),
        })
    }

    /// Latency of every row group fetch served by this store
    pub fn fetch_latency(&self) -> &FetchLatency {
        &self.latency
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        Ok(self.db.flush()?)
    }
}

/// A handle to one table of a [RowGroupStore]
#[derive(Clone)]
pub struct Table {
    name: String,
    db: Arc<DB>,
    latency: Arc<FetchLatency>,
}

impl Table {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(&self.name)
            .ok_or_else(|| StoreError::UnknownTable(self.name.clone()))
    }

    /// Replaces the content of the table with `records` in groups of `rows_per_group`
    ///
    /// Row groups and metadata are written in a single batch.
    pub fn write(&self, records: &[Record], rows_per_group: usize) -> Result<TableMeta, StoreError> {
        let rows_per_group = rows_per_group.max(1);
        let cf = self.cf()?;
        let meta = TableMeta {
            num_rows: records.len() as u64,
            rows_per_group: rows_per_group as u64,
        };
        let mut batch = WriteBatch::default();
        for (index, rows) in RangeIter::new(records.len(), rows_per_group).enumerate() {
            let bytes = codec::encode(&records[rows].to_vec())?;
            batch.put_cf(cf, row_group_key(index), bytes);
        }
        // drop row groups left over from a larger previous write, the range also spans
        // META_KEY so the metadata must be written after it
        batch.delete_range_cf(
            cf,
            row_group_key(meta.num_row_groups() as usize),
            [u8::MAX; 8],
        );
        batch.put_cf(cf, META_KEY, codec::encode(&meta)?);
        self.db.write(batch)?;
        info!(
            table = %self.name,
            rows = meta.num_rows,
            row_groups = meta.num_row_groups(),
            "wrote table"
        );
        Ok(meta)
    }

    pub fn meta(&self) -> Result<Option<TableMeta>, StoreError> {
        match self.db.get_cf(self.cf()?, META_KEY)? {
            Some(bytes) => codec::decode(META_KEY, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Reads a single row group
    pub fn row_group(&self, index: usize) -> Result<RowGroup, StoreError> {
        let key = row_group_key(index);
        let now = minstant::Instant::now();
        let bytes = self
            .db
            .get_pinned_cf(self.cf()?, key)?
            .ok_or_else(|| StoreError::Missing(format!("{}/{}", self.name, index)))?;
        let records: Vec<Record> = codec::decode(&key, &bytes)?;
        self.latency.record(now.elapsed());
        Ok(RowGroup { index, records })
    }

    /// A partition source over the row groups as currently stored
    pub fn source(&self) -> Result<TableSource, StoreError> {
        let meta = self
            .meta()?
            .ok_or_else(|| StoreError::Missing(format!("{}/meta", self.name)))?;
        Ok(TableSource {
            table: self.clone(),
            meta,
        })
    }
}

/// Row groups of a [Table] exposed as partitions
pub struct TableSource {
    table: Table,
    meta: TableMeta,
}

impl TableSource {
    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }
}

impl PartitionSource for TableSource {
    type Payload = RowGroup;
    type Cursor = Map<Enumerate<RangeIter>, fn((usize, Range<usize>)) -> Partition>;

    fn cursor(&self) -> Self::Cursor {
        let rows = RangeIter::new(
            self.meta.num_rows as usize,
            self.meta.rows_per_group.max(1) as usize,
        );
        rows.enumerate()
            .map(row_group_partition as fn((usize, Range<usize>)) -> Partition)
    }

    fn fetch(&self, partition: &Partition, ctx: &FetchContext) -> Result<RowGroup, BoxError> {
        let index = match &partition.key {
            PartitionKey::RowGroup { index, .. } => *index,
            key => return Err(format!("table sources cannot address {}", key).into()),
        };
        ctx.check()?;
        let group = self.table.row_group(index)?;
        debug!(
            table = %self.table.name,
            index,
            attempt = ctx.attempt(),
            rows = group.records.len(),
            "read row group"
        );
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunked_aggregation::{
        aggregator::{AggState, AllAggregator, FnAggregator, GroupCountAggregator},
        source::SourceError,
        Aggregator, CancellationToken, ChunkedAggregator,
    };
    use std::time::Duration;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new((i % 3) as u32, i as f64 * 0.5))
            .collect()
    }

    /// Statistics over the value column
    fn values() -> impl Aggregator<Input = [Record], Aggregate = AggState> {
        let all = AllAggregator::<f64>::new();
        FnAggregator::new(
            move |rows: &[Record]| -> Result<AggState, BoxError> {
                let values: Vec<f64> = rows.iter().map(|r| r.value).collect();
                all.reduce(&values)
            },
            move |acc: &AggState, partial: AggState| -> Result<AggState, BoxError> {
                all.combine(acc, partial)
            },
        )
    }

    #[test]
    fn write_and_read_row_groups() {
        let dir = tempfile::tempdir().unwrap();
        let store = RowGroupStore::open(dir.path(), &["landcover"]).unwrap();
        let table = store.table("landcover").unwrap();

        let meta = table.write(&records(10), 4).unwrap();
        assert_eq!(meta.num_row_groups(), 3);
        assert_eq!(table.meta().unwrap(), Some(meta));

        let group = table.row_group(2).unwrap();
        assert_eq!(group.records, records(10)[8..].to_vec());
        assert!(matches!(table.row_group(3), Err(StoreError::Missing(_))));
        assert_eq!(store.fetch_latency().snapshot().len(), 1);
    }

    #[test]
    fn rewrite_drops_stale_row_groups() {
        let dir = tempfile::tempdir().unwrap();
        let store = RowGroupStore::open(dir.path(), &["landcover"]).unwrap();
        let table = store.table("landcover").unwrap();

        table.write(&records(10), 2).unwrap();
        assert!(table.row_group(4).is_ok());

        let meta = table.write(&records(3), 2).unwrap();
        assert_eq!(meta.num_row_groups(), 2);
        assert_eq!(table.meta().unwrap(), Some(meta));
        assert_eq!(table.row_group(1).unwrap().records, records(3)[2..].to_vec());
        for index in 2..5 {
            assert!(matches!(table.row_group(index), Err(StoreError::Missing(_))));
        }
    }

    #[test]
    fn fetch_respects_context() {
        let dir = tempfile::tempdir().unwrap();
        let store = RowGroupStore::open(dir.path(), &["t"]).unwrap();
        let table = store.table("t").unwrap();
        table.write(&records(4), 2).unwrap();
        let source = table.source().unwrap();
        let first = source.cursor().next().unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let cancelled = FetchContext::new(1, None, token);
        let err = source.fetch(&first, &cancelled).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SourceError>(),
            Some(SourceError::Cancelled)
        ));

        let expired = FetchContext::new(1, Some(Duration::ZERO), CancellationToken::new());
        let err = source.fetch(&first, &expired).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SourceError>(),
            Some(SourceError::DeadlineExceeded)
        ));
        // neither attempt reached RocksDB
        assert_eq!(store.fetch_latency().snapshot().len(), 0);
    }

    #[test]
    fn unknown_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = RowGroupStore::open(dir.path(), &["a"]).unwrap();
        assert!(matches!(store.table("b"), Err(StoreError::UnknownTable(_))));
    }

    #[test]
    fn tables_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = RowGroupStore::open(dir.path(), &["a"]).unwrap();
            store.table("a").unwrap().write(&records(5), 2).unwrap();
            store.flush().unwrap();
        }
        let store = RowGroupStore::open(dir.path(), &["a", "b"]).unwrap();
        let meta = store.table("a").unwrap().meta().unwrap().unwrap();
        assert_eq!(meta.num_rows, 5);
        assert_eq!(store.table("b").unwrap().meta().unwrap(), None);
    }

    #[test]
    fn chunked_aggregation_over_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = RowGroupStore::open(dir.path(), &["landcover"]).unwrap();
        let table = store.table("landcover").unwrap();
        let rows = records(1000);
        table.write(&rows, 64).unwrap();
        let source = table.source().unwrap();

        let stats = ChunkedAggregator::new(values())
            .run(&source, Default::default())
            .into_result()
            .unwrap();
        assert_eq!(stats.count(), 1000);
        assert_eq!(stats.sum(), rows.iter().map(|r| r.value).sum::<f64>());

        let classes = ChunkedAggregator::new(GroupCountAggregator::new(|r: &Record| r.class))
            .with_config(chunked_aggregation::AggregationConfig::default().with_workers(3))
            .run_parallel(&source, Default::default())
            .into_result()
            .unwrap();
        assert_eq!(classes.get(&0u32), 334);
        assert_eq!(classes.total(), 1000);
        assert_eq!(store.fetch_latency().snapshot().len(), 32);
    }

    #[test]
    fn missing_row_group_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = RowGroupStore::open(dir.path(), &["t"]).unwrap();
        let table = store.table("t").unwrap();
        table.write(&records(8), 2).unwrap();
        let source = table.source().unwrap();

        // drop row group 2 behind the source's back
        let cf = table.cf().unwrap();
        table.db.delete_cf(cf, row_group_key(2)).unwrap();

        let outcome = ChunkedAggregator::new(values()).run(&source, Default::default());
        let error = outcome.error().unwrap();
        assert!(error.is_fetch());
        assert_eq!(error.partition(), Some(PartitionId(2)));
        assert_eq!(outcome.aggregate().count(), 4);
    }
}
