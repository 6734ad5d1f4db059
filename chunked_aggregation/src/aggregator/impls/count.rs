use ahash::AHashMap;
use core::{fmt, hash::Hash, marker::PhantomData};

use crate::{aggregator::Aggregator, BoxError};

/// Counts rows satisfying a predicate
pub struct CountAggregator<T, F> {
    predicate: F,
    _marker: PhantomData<fn(&T)>,
}

impl<T, F> CountAggregator<T, F>
where
    F: Fn(&T) -> bool,
{
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _marker: PhantomData,
        }
    }
}

impl<T> CountAggregator<T, fn(&T) -> bool> {
    /// Counts every row
    pub fn all() -> Self {
        Self::new(|_| true)
    }
}

impl<T, F> fmt::Debug for CountAggregator<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("CountAggregator")
    }
}

impl<T, F> Aggregator for CountAggregator<T, F>
where
    F: Fn(&T) -> bool,
{
    type Input = [T];
    type Partial = u64;
    type Aggregate = u64;

    #[inline]
    fn reduce(&self, input: &[T]) -> Result<u64, BoxError> {
        Ok(input.iter().filter(|row| (self.predicate)(row)).count() as u64)
    }
    #[inline]
    fn combine(&self, acc: &u64, partial: u64) -> Result<u64, BoxError> {
        Ok(acc + partial)
    }
}

/// Row counts per key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCounts<K: Eq + Hash> {
    counts: AHashMap<K, u64>,
}

impl<K: Eq + Hash> Default for GroupCounts<K> {
    fn default() -> Self {
        Self {
            counts: AHashMap::default(),
        }
    }
}

impl<K: Eq + Hash> GroupCounts<K> {
    pub fn get<Q>(&self, key: &Q) -> u64
    where
        K: core::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn add(&mut self, key: K, count: u64) {
        *self.counts.entry(key).or_insert(0) += count;
    }

    pub fn merge(&mut self, other: GroupCounts<K>) {
        for (key, count) in other.counts {
            self.add(key, count);
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> {
        self.counts.iter().map(|(k, v)| (k, *v))
    }

    /// Entries sorted by key
    pub fn sorted(&self) -> Vec<(&K, u64)>
    where
        K: Ord,
    {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

/// Counts rows per key extracted by `key_fn`
pub struct GroupCountAggregator<T, K, F> {
    key_fn: F,
    _marker: PhantomData<fn(&T) -> K>,
}

impl<T, K, F> GroupCountAggregator<T, K, F>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    pub fn new(key_fn: F) -> Self {
        Self {
            key_fn,
            _marker: PhantomData,
        }
    }
}

impl<T, K, F> fmt::Debug for GroupCountAggregator<T, K, F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("GroupCountAggregator")
    }
}

impl<T, K, F> Aggregator for GroupCountAggregator<T, K, F>
where
    K: Eq + Hash + Clone + Send,
    F: Fn(&T) -> K,
{
    type Input = [T];
    type Partial = GroupCounts<K>;
    type Aggregate = GroupCounts<K>;

    fn reduce(&self, input: &[T]) -> Result<GroupCounts<K>, BoxError> {
        let mut counts = GroupCounts::default();
        for row in input {
            counts.add((self.key_fn)(row), 1);
        }
        Ok(counts)
    }

    fn combine(
        &self,
        acc: &GroupCounts<K>,
        partial: GroupCounts<K>,
    ) -> Result<GroupCounts<K>, BoxError> {
        let mut next = acc.clone();
        next.merge(partial);
        Ok(next)
    }
}
