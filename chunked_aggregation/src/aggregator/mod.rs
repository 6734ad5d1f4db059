pub mod impls;

pub use impls::all::{AggState, AllAggregator};
pub use impls::count::{CountAggregator, GroupCountAggregator, GroupCounts};
pub use impls::func::FnAggregator;
#[cfg(feature = "histogram")]
pub use impls::histogram::{HistogramAggregator, QuantileBounds};
pub use impls::sum::*;

use crate::BoxError;

/// Aggregation interface driven by the chunked engines
///
/// An aggregator turns one partition payload into a partial result (`reduce`)
/// and folds partial results into a running aggregate (`combine`).
/// `combine` borrows the running aggregate and returns the next one, so a failing
/// combine never leaves a half-updated aggregate behind.
pub trait Aggregator {
    /// Payload view consumed by `reduce`
    type Input: ?Sized;
    /// Partial result of a single partition
    type Partial: Send;
    /// Running and final aggregate
    type Aggregate;

    /// Reduce a single partition payload to a partial result
    fn reduce(&self, input: &Self::Input) -> Result<Self::Partial, BoxError>;
    /// Fold a partial result into the running aggregate
    fn combine(
        &self,
        acc: &Self::Aggregate,
        partial: Self::Partial,
    ) -> Result<Self::Aggregate, BoxError>;
}

impl<A: Aggregator + ?Sized> Aggregator for &A {
    type Input = A::Input;
    type Partial = A::Partial;
    type Aggregate = A::Aggregate;

    #[inline]
    fn reduce(&self, input: &Self::Input) -> Result<Self::Partial, BoxError> {
        (**self).reduce(input)
    }
    #[inline]
    fn combine(
        &self,
        acc: &Self::Aggregate,
        partial: Self::Partial,
    ) -> Result<Self::Aggregate, BoxError> {
        (**self).combine(acc, partial)
    }
}

/// Reduces a fully materialised dataset in one go
///
/// This is the reference result chunked aggregation must reproduce.
pub fn reduce_whole<A: Aggregator>(
    aggregator: &A,
    init: &A::Aggregate,
    input: &A::Input,
) -> Result<A::Aggregate, BoxError> {
    let partial = aggregator.reduce(input)?;
    aggregator.combine(init, partial)
}
