use tracing::warn;

use crate::{
    cancel::CancellationToken,
    config::AggregationConfig,
    partition::Partition,
    retry::sleep_cancellable,
    source::{FetchContext, PartitionSource},
    AggregationError, BoxError,
};

/// Outcome of fetching one partition under the retry policy
pub(crate) struct Fetched<P> {
    pub result: Result<P, AggregationError>,
    pub attempts: u32,
}

enum AttemptError {
    Timeout,
    Failed(BoxError),
}

/// Fetches `partition`, retrying failed and timed out attempts as the policy allows
///
/// A payload that arrives after the deadline is dropped and counted as a timeout.
pub(crate) fn fetch_with_retry<S: PartitionSource>(
    source: &S,
    partition: &Partition,
    config: &AggregationConfig,
    cancel: &CancellationToken,
) -> Fetched<S::Payload> {
    let policy = &config.retry;
    let cancelled = || AggregationError::Cancelled {
        next: Some(partition.id),
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Fetched {
                result: Err(cancelled()),
                attempts: attempt - 1,
            };
        }

        let ctx = FetchContext::new(attempt, config.fetch_timeout, cancel.clone());
        let error = match source.fetch(partition, &ctx) {
            Ok(payload) => match config.fetch_timeout {
                Some(timeout) if ctx.elapsed() > timeout => {
                    drop(payload);
                    AttemptError::Timeout
                }
                _ => {
                    return Fetched {
                        result: Ok(payload),
                        attempts: attempt,
                    }
                }
            },
            Err(_) if cancel.is_cancelled() => {
                return Fetched {
                    result: Err(cancelled()),
                    attempts: attempt,
                };
            }
            Err(_) if ctx.is_expired() => AttemptError::Timeout,
            Err(err) => AttemptError::Failed(err),
        };

        if !policy.allows_retry(attempt) {
            let result = match error {
                AttemptError::Timeout => Err(AggregationError::Timeout {
                    partition: partition.id,
                    timeout: config.fetch_timeout.unwrap_or_default(),
                    attempts: attempt,
                }),
                AttemptError::Failed(source) => Err(AggregationError::Fetch {
                    partition: partition.id,
                    attempts: attempt,
                    source,
                }),
            };
            return Fetched {
                result,
                attempts: attempt,
            };
        }

        let delay = policy.delay_for(attempt);
        match &error {
            AttemptError::Timeout => warn!(
                %partition,
                attempt,
                ?delay,
                "fetch exceeded its deadline, retrying"
            ),
            AttemptError::Failed(err) => warn!(
                %partition,
                attempt,
                ?delay,
                error = %err,
                "fetch failed, retrying"
            ),
        }
        if !sleep_cancellable(delay, cancel) {
            return Fetched {
                result: Err(cancelled()),
                attempts: attempt,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        partition::{PartitionId, PartitionKey},
        retry::RetryPolicy,
    };
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    /// Fails the first `failures` fetches, optionally sleeping on every attempt
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        sleep: Duration,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                sleep: Duration::ZERO,
            }
        }
    }

    impl PartitionSource for Flaky {
        type Payload = Vec<u8>;
        type Cursor = std::vec::IntoIter<Partition>;

        fn cursor(&self) -> Self::Cursor {
            vec![partition()].into_iter()
        }

        fn fetch(&self, _: &Partition, _: &FetchContext) -> Result<Vec<u8>, BoxError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::thread::sleep(self.sleep);
            if call <= self.failures {
                Err(format!("transient failure {}", call).into())
            } else {
                Ok(vec![1, 2, 3])
            }
        }
    }

    fn partition() -> Partition {
        Partition::new(PartitionId(3), PartitionKey::ByteRange { offset: 0, len: 3 })
    }

    #[test]
    fn no_retry_surfaces_first_failure() {
        let source = Flaky::new(1);
        let fetched = fetch_with_retry(
            &source,
            &partition(),
            &AggregationConfig::default(),
            &CancellationToken::new(),
        );
        let err = fetched.result.unwrap_err();
        assert!(err.is_fetch());
        assert_eq!(err.partition(), Some(PartitionId(3)));
        assert_eq!(fetched.attempts, 1);
        assert!(err.to_string().contains("transient failure 1"));
    }

    #[test]
    fn retries_until_success() {
        let source = Flaky::new(2);
        let config = AggregationConfig::default()
            .with_retry(RetryPolicy::fixed(3, Duration::from_millis(1)));
        let fetched = fetch_with_retry(&source, &partition(), &config, &CancellationToken::new());
        assert_eq!(fetched.result.unwrap(), vec![1, 2, 3]);
        assert_eq!(fetched.attempts, 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retries_exhausted() {
        let source = Flaky::new(5);
        let config = AggregationConfig::default()
            .with_retry(RetryPolicy::fixed(2, Duration::from_millis(1)));
        let fetched = fetch_with_retry(&source, &partition(), &config, &CancellationToken::new());
        assert!(fetched.result.unwrap_err().is_fetch());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn late_payload_is_a_timeout() {
        let mut source = Flaky::new(0);
        source.sleep = Duration::from_millis(30);
        let config = AggregationConfig::default().with_fetch_timeout(Duration::from_millis(5));
        let fetched = fetch_with_retry(&source, &partition(), &config, &CancellationToken::new());
        let err = fetched.result.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.partition(), Some(PartitionId(3)));
    }

    #[test]
    fn cancelled_before_fetch() {
        let source = Flaky::new(0);
        let token = CancellationToken::new();
        token.cancel();
        let fetched = fetch_with_retry(&source, &partition(), &AggregationConfig::default(), &token);
        assert!(fetched.result.unwrap_err().is_cancelled());
        assert_eq!(fetched.attempts, 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
