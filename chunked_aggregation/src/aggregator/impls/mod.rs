/// An All Aggregator enabling the following functions (MAX, MIN, SUM, COUNT, AVG).
pub mod all;
/// Counting rows, optionally grouped by a key
pub mod count;
/// Aggregator built from reducer and combiner closures
pub mod func;
/// Value distribution for chunked quantiles
#[cfg(feature = "histogram")]
pub mod histogram;
/// Numeric sum aggregation
pub mod sum;

pub use all::{AggState, AllAggregator};
pub use sum::*;
