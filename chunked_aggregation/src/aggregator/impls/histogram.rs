use core::{fmt, marker::PhantomData};
use hdrhistogram::Histogram;
use thiserror::Error;

use crate::{aggregator::Aggregator, BoxError};

// significant value digits kept by every histogram
const SIGFIG: u8 = 3;

#[derive(Error, Debug)]
pub enum HistogramError {
    #[error("failed to create histogram: {0}")]
    Create(String),
    #[error("failed to record value {value}: {reason}")]
    Record { value: u64, reason: String },
    #[error("failed to merge histograms: {0}")]
    Merge(String),
}

/// Records every value of a partition into an auto-resizing histogram
///
/// Merging histograms is associative, so quantiles computed chunk by chunk
/// match the quantiles of the whole dataset within the histogram precision.
pub struct HistogramAggregator<T>(PhantomData<fn(&T)>);

impl<T> HistogramAggregator<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }

    /// Initial aggregate holding no values
    pub fn empty() -> Result<Histogram<u64>, HistogramError> {
        Histogram::new(SIGFIG).map_err(|err| HistogramError::Create(format!("{:?}", err)))
    }
}

impl<T> Default for HistogramAggregator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for HistogramAggregator<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("HistogramAggregator")
    }
}

impl<T: Copy + Into<u64>> Aggregator for HistogramAggregator<T> {
    type Input = [T];
    type Partial = Histogram<u64>;
    type Aggregate = Histogram<u64>;

    fn reduce(&self, input: &[T]) -> Result<Histogram<u64>, BoxError> {
        let mut hist = Self::empty()?;
        for value in input {
            let value: u64 = (*value).into();
            hist.record(value).map_err(|err| HistogramError::Record {
                value,
                reason: format!("{:?}", err),
            })?;
        }
        Ok(hist)
    }

    fn combine(
        &self,
        acc: &Histogram<u64>,
        partial: Histogram<u64>,
    ) -> Result<Histogram<u64>, BoxError> {
        let mut next = acc.clone();
        next.add(&partial)
            .map_err(|err| HistogramError::Merge(format!("{:?}", err)))?;
        Ok(next)
    }
}

/// Value range kept after clipping the tails of a distribution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantileBounds {
    pub lower: u64,
    pub upper: u64,
}

impl QuantileBounds {
    /// Bounds at the `low` and `high` quantiles, `None` for an empty histogram
    pub fn from_histogram(hist: &Histogram<u64>, low: f64, high: f64) -> Option<Self> {
        if hist.len() == 0 {
            return None;
        }
        Some(Self {
            lower: hist.value_at_quantile(low),
            upper: hist.value_at_quantile(high),
        })
    }

    /// The 0.1% / 99.9% bounds used to stretch imagery for display
    pub fn display_stretch(hist: &Histogram<u64>) -> Option<Self> {
        Self::from_histogram(hist, 0.001, 0.999)
    }

    /// Values outside the bounds are masked to zero
    #[inline]
    pub fn mask(&self, value: u64) -> u64 {
        if value >= self.lower && value <= self.upper {
            value
        } else {
            0
        }
    }

    /// Linearly maps `value` in `[lower, upper]` to `0..=255`, clamping outside values
    pub fn rescale_u8(&self, value: u64) -> u8 {
        if self.upper <= self.lower {
            return 0;
        }
        let clamped = value.clamp(self.lower, self.upper);
        ((clamped - self.lower) as f64 / (self.upper - self.lower) as f64 * 255.0).round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_quantiles_match_whole() {
        let aggregator = HistogramAggregator::<u16>::new();
        let values: Vec<u16> = (1..=1000).collect();

        let empty = HistogramAggregator::<u16>::empty().unwrap();
        let whole = aggregator
            .combine(&empty, aggregator.reduce(&values).unwrap())
            .unwrap();

        let mut chunked = empty;
        for chunk in values.chunks(37) {
            let partial = aggregator.reduce(chunk).unwrap();
            chunked = aggregator.combine(&chunked, partial).unwrap();
        }

        assert_eq!(chunked.len(), 1000);
        for q in [0.001, 0.25, 0.5, 0.99, 0.999] {
            assert_eq!(chunked.value_at_quantile(q), whole.value_at_quantile(q));
        }
    }

    #[test]
    fn bounds_and_rescale() {
        let aggregator = HistogramAggregator::<u16>::new();
        let values: Vec<u16> = (0..=1000).collect();
        let hist = aggregator.reduce(&values).unwrap();
        let bounds = QuantileBounds::from_histogram(&hist, 0.0, 1.0).unwrap();
        assert_eq!(bounds.lower, 0);
        assert_eq!(bounds.upper, 1000);
        assert_eq!(bounds.rescale_u8(0), 0);
        assert_eq!(bounds.rescale_u8(1000), 255);
        assert_eq!(bounds.rescale_u8(5000), 255);
        assert_eq!(bounds.mask(5000), 0);
        assert_eq!(bounds.mask(500), 500);

        let empty = HistogramAggregator::<u16>::empty().unwrap();
        assert!(QuantileBounds::display_stretch(&empty).is_none());
    }
}
