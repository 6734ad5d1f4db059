use std::sync::Arc;

use super::{FetchContext, PartitionSource, SourceError};
use crate::{
    partition::{Partition, PartitionId, PartitionKey, RangeIter},
    BoxError,
};

/// Rows held in memory and exposed as row groups of `rows_per_group` rows
///
/// Stands in for a columnar file read batch by batch: every fetch copies one row group out,
/// so the payload size is bounded by `rows_per_group`.
#[derive(Debug, Clone)]
pub struct RowSource<T> {
    rows: Arc<[T]>,
    rows_per_group: usize,
}

impl<T: Clone> RowSource<T> {
    /// Panics if `rows_per_group` is zero
    pub fn new(rows: impl Into<Arc<[T]>>, rows_per_group: usize) -> Self {
        assert!(rows_per_group > 0, "rows_per_group must be non-zero");
        Self {
            rows: rows.into(),
            rows_per_group,
        }
    }

    /// Returns a source over the same rows with a different row group size
    pub fn regroup(&self, rows_per_group: usize) -> Self {
        assert!(rows_per_group > 0, "rows_per_group must be non-zero");
        Self {
            rows: self.rows.clone(),
            rows_per_group,
        }
    }

    #[inline]
    pub fn rows_per_group(&self) -> usize {
        self.rows_per_group
    }

    #[inline]
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_row_groups(&self) -> usize {
        self.rows.len().div_ceil(self.rows_per_group)
    }

    /// All rows at once, the way a non-chunked reader would load them
    pub fn materialize(&self) -> Vec<T> {
        self.rows.to_vec()
    }
}

/// Cursor over the row groups of a [RowSource]
#[derive(Debug, Clone)]
pub struct RowGroupCursor {
    ranges: RangeIter,
    index: usize,
}

impl Iterator for RowGroupCursor {
    type Item = Partition;

    fn next(&mut self) -> Option<Partition> {
        let rows = self.ranges.next()?;
        let index = self.index;
        self.index += 1;
        Some(Partition::new(
            PartitionId(index),
            PartitionKey::RowGroup { index, rows },
        ))
    }
}

impl<T: Clone> PartitionSource for RowSource<T> {
    type Payload = Vec<T>;
    type Cursor = RowGroupCursor;

    fn cursor(&self) -> RowGroupCursor {
        RowGroupCursor {
            ranges: RangeIter::new(self.rows.len(), self.rows_per_group),
            index: 0,
        }
    }

    fn fetch(&self, partition: &Partition, ctx: &FetchContext) -> Result<Vec<T>, BoxError> {
        ctx.check()?;
        match &partition.key {
            PartitionKey::RowGroup { rows, .. } => match self.rows.get(rows.clone()) {
                Some(slice) => Ok(slice.to_vec()),
                None => Err(SourceError::OutOfBounds {
                    key: partition.key.clone(),
                }
                .into()),
            },
            key => Err(SourceError::unsupported("RowSource", key).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cancel::CancellationToken, source::PartitionCursor};

    fn ctx() -> FetchContext {
        FetchContext::new(1, None, CancellationToken::new())
    }

    #[test]
    fn row_groups_in_order() {
        let source = RowSource::new((0..10u32).collect::<Vec<_>>(), 4);
        assert_eq!(source.num_row_groups(), 3);

        let mut cursor = source.cursor();
        let mut payloads = Vec::new();
        while let Some(partition) = cursor.next_partition() {
            payloads.push(source.fetch(&partition, &ctx()).unwrap());
        }
        assert_eq!(payloads, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);

        // stays exhausted
        assert!(cursor.next_partition().is_none());
        assert!(cursor.next_partition().is_none());
    }

    #[test]
    fn out_of_bounds_group_fails() {
        let source = RowSource::new(vec![1u8, 2, 3], 2);
        let partition = Partition::new(
            PartitionId(5),
            PartitionKey::RowGroup {
                index: 5,
                rows: 10..12,
            },
        );
        let err = source.fetch(&partition, &ctx()).unwrap_err();
        assert!(err.to_string().contains("outside the dataset"));
    }

    #[test]
    fn wrong_key_kind_fails() {
        let source = RowSource::new(vec![1u8], 1);
        let partition = Partition::new(
            PartitionId(0),
            PartitionKey::ByteRange { offset: 0, len: 1 },
        );
        assert!(source.fetch(&partition, &ctx()).is_err());
    }

    #[test]
    fn regroup_keeps_rows() {
        let source = RowSource::new(vec!["a", "b", "c"], 1);
        let regrouped = source.regroup(2);
        assert_eq!(regrouped.num_rows(), 3);
        assert_eq!(regrouped.num_row_groups(), 2);
        assert_eq!(regrouped.materialize(), vec!["a", "b", "c"]);
    }
}
