use core::{fmt, marker::PhantomData};

use crate::{aggregator::Aggregator, BoxError};

/// An [Aggregator] made of a reducer and a combiner closure
pub struct FnAggregator<I: ?Sized, P, A, R, C> {
    reduce: R,
    combine: C,
    _marker: PhantomData<fn(&I, &A) -> P>,
}

impl<I, P, A, R, C> FnAggregator<I, P, A, R, C>
where
    I: ?Sized,
    P: Send,
    R: Fn(&I) -> Result<P, BoxError>,
    C: Fn(&A, P) -> Result<A, BoxError>,
{
    pub fn new(reduce: R, combine: C) -> Self {
        Self {
            reduce,
            combine,
            _marker: PhantomData,
        }
    }
}

impl<I: ?Sized, P: Send, A> FnAggregator<I, P, A, (), ()> {
    /// Builds an aggregator from closures that cannot fail
    #[allow(clippy::type_complexity)]
    pub fn infallible<R, C>(
        reduce: R,
        combine: C,
    ) -> FnAggregator<
        I,
        P,
        A,
        impl Fn(&I) -> Result<P, BoxError>,
        impl Fn(&A, P) -> Result<A, BoxError>,
    >
    where
        R: Fn(&I) -> P,
        C: Fn(&A, P) -> A,
    {
        FnAggregator::new(
            move |input: &I| Ok(reduce(input)),
            move |acc: &A, partial: P| Ok(combine(acc, partial)),
        )
    }
}

impl<I: ?Sized, P, A, R, C> fmt::Debug for FnAggregator<I, P, A, R, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("FnAggregator")
    }
}

impl<I, P, A, R, C> Aggregator for FnAggregator<I, P, A, R, C>
where
    I: ?Sized,
    P: Send,
    R: Fn(&I) -> Result<P, BoxError>,
    C: Fn(&A, P) -> Result<A, BoxError>,
{
    type Input = I;
    type Partial = P;
    type Aggregate = A;

    #[inline]
    fn reduce(&self, input: &I) -> Result<P, BoxError> {
        (self.reduce)(input)
    }
    #[inline]
    fn combine(&self, acc: &A, partial: P) -> Result<A, BoxError> {
        (self.combine)(acc, partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures() {
        let aggregator = FnAggregator::infallible(
            |rows: &[u32]| rows.iter().filter(|v| **v % 2 == 0).count(),
            |acc: &usize, partial| acc + partial,
        );
        let partial = aggregator.reduce(&[1, 2, 4][..]).unwrap();
        assert_eq!(aggregator.combine(&1, partial).unwrap(), 3);
    }

    #[test]
    fn failing_reducer() {
        let aggregator = FnAggregator::new(
            |rows: &[i32]| -> Result<i32, BoxError> {
                if rows.iter().any(|v| *v < 0) {
                    return Err("negative value".into());
                }
                Ok(rows.iter().sum())
            },
            |acc: &i32, partial: i32| -> Result<i32, BoxError> { Ok(acc + partial) },
        );
        assert_eq!(aggregator.reduce(&[1, 2][..]).unwrap(), 3);
        let err = aggregator.reduce(&[1, -2][..]).unwrap_err();
        assert_eq!(err.to_string(), "negative value");
    }
}
