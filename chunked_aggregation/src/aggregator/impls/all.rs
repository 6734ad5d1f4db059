use core::{fmt, marker::PhantomData};

use crate::{aggregator::Aggregator, BoxError};

/// Running MIN, MAX, SUM and COUNT from which AVG is derived
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "rkyv",
    derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize),
    archive(check_bytes)
)]
pub struct AggState {
    min: f64,
    max: f64,
    sum: f64,
    count: u64,
}

impl Default for AggState {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            count: 0,
        }
    }
}

impl AggState {
    pub fn new(value: f64) -> Self {
        Self {
            min: value,
            max: value,
            sum: value,
            count: 1,
        }
    }

    #[inline]
    pub fn update(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }

    #[inline]
    pub fn merge(&mut self, other: AggState) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.count += other.count;
    }

    /// Smallest value seen, `None` if empty
    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }
    /// Largest value seen, `None` if empty
    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }
    pub fn sum(&self) -> f64 {
        self.sum
    }
    pub fn count(&self) -> u64 {
        self.count
    }
    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Maps `value` linearly from `[min, max]` onto `[0, 1]`
    ///
    /// Returns 0.0 for an empty state or when every value seen was identical.
    pub fn normalize(&self, value: f64) -> f64 {
        let range = self.max - self.min;
        if self.count == 0 || range <= 0.0 {
            return 0.0;
        }
        (value - self.min) / range
    }
}

impl fmt::Display for AggState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.min(), self.max(), self.avg()) {
            (Some(min), Some(max), Some(avg)) => write!(
                f,
                "min: {min}, max: {max}, sum: {}, count: {}, avg: {avg}",
                self.sum, self.count
            ),
            _ => write!(f, "empty"),
        }
    }
}

/// Computes an [AggState] over numeric partitions
pub struct AllAggregator<T = f64>(PhantomData<fn(&T)>);

impl<T> AllAggregator<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for AllAggregator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for AllAggregator<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}
impl<T> Copy for AllAggregator<T> {}

impl<T> fmt::Debug for AllAggregator<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("AllAggregator")
    }
}

impl<T: Copy + Into<f64>> Aggregator for AllAggregator<T> {
    type Input = [T];
    type Partial = AggState;
    type Aggregate = AggState;

    #[inline]
    fn reduce(&self, input: &[T]) -> Result<AggState, BoxError> {
        let mut state = AggState::default();
        for value in input {
            state.update((*value).into());
        }
        Ok(state)
    }
    #[inline]
    fn combine(&self, acc: &AggState, partial: AggState) -> Result<AggState, BoxError> {
        let mut next = *acc;
        next.merge(partial);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_functions() {
        let aggregator = AllAggregator::<f64>::new();
        let a = aggregator.reduce(&[1.0, 5.0, 3.0]).unwrap();
        let b = aggregator.reduce(&[-2.0, 4.0]).unwrap();
        let total = aggregator.combine(&a, b).unwrap();

        assert_eq!(total.min(), Some(-2.0));
        assert_eq!(total.max(), Some(5.0));
        assert_eq!(total.sum(), 11.0);
        assert_eq!(total.count(), 5);
        assert_eq!(total.avg(), Some(2.2));
    }

    #[test]
    fn empty_state() {
        let aggregator = AllAggregator::<u16>::new();
        let state = aggregator.reduce(&[]).unwrap();
        assert!(state.is_empty());
        assert_eq!(state.min(), None);
        assert_eq!(state.avg(), None);
        assert_eq!(state.to_string(), "empty");

        // merging an empty partial is a no-op
        let one = AggState::new(3.0);
        assert_eq!(aggregator.combine(&one, state).unwrap(), one);
    }

    #[test]
    fn normalize_values() {
        let aggregator = AllAggregator::<u16>::new();
        let state = aggregator.reduce(&[10, 20, 30]).unwrap();
        assert_eq!(state.normalize(10.0), 0.0);
        assert_eq!(state.normalize(20.0), 0.5);
        assert_eq!(state.normalize(30.0), 1.0);

        let flat = AggState::new(4.0);
        assert_eq!(flat.normalize(4.0), 0.0);
    }
}
