use crate::{aggregator::Aggregator, BoxError};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("sum overflowed")]
pub struct SumOverflow;

macro_rules! integer_sum_impl {
    ($struct:tt, $type:ty) => {
        #[derive(Default, Debug, Clone, Copy)]
        pub struct $struct;

        impl Aggregator for $struct {
            type Input = [$type];
            type Partial = $type;
            type Aggregate = $type;

            #[inline]
            fn reduce(&self, input: &[$type]) -> Result<$type, BoxError> {
                input
                    .iter()
                    .try_fold(0 as $type, |acc, v| acc.checked_add(*v))
                    .ok_or_else(|| SumOverflow.into())
            }
            #[inline]
            fn combine(&self, acc: &$type, partial: $type) -> Result<$type, BoxError> {
                acc.checked_add(partial).ok_or_else(|| SumOverflow.into())
            }
        }
    };
}

macro_rules! float_sum_impl {
    ($struct:tt, $type:ty) => {
        #[derive(Default, Debug, Clone, Copy)]
        pub struct $struct;

        impl Aggregator for $struct {
            type Input = [$type];
            type Partial = $type;
            type Aggregate = $type;

            #[inline]
            fn reduce(&self, input: &[$type]) -> Result<$type, BoxError> {
                Ok(input.iter().sum())
            }
            #[inline]
            fn combine(&self, acc: &$type, partial: $type) -> Result<$type, BoxError> {
                Ok(acc + partial)
            }
        }
    };
}

integer_sum_impl!(U16SumAggregator, u16);
integer_sum_impl!(U32SumAggregator, u32);
integer_sum_impl!(U64SumAggregator, u64);
integer_sum_impl!(I32SumAggregator, i32);
integer_sum_impl!(I64SumAggregator, i64);
float_sum_impl!(F32SumAggregator, f32);
float_sum_impl!(F64SumAggregator, f64);
