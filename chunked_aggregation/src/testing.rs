//! Partition sources used by the engine tests

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    cancel::CancellationToken,
    partition::{Partition, PartitionId, PartitionKey},
    source::{FetchContext, PartitionSource},
    BoxError,
};

/// Row groups of `u64` held in memory that record how they are fetched
#[derive(Default)]
pub(crate) struct VecSource {
    groups: Vec<Vec<u64>>,
    fail_at: Option<usize>,
    panic_at: Option<usize>,
    delays: Vec<Duration>,
    stall: Option<(usize, Duration)>,
    cancel_on: Option<(usize, CancellationToken)>,
    fetched: Mutex<Vec<usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl VecSource {
    pub fn new(groups: Vec<Vec<u64>>) -> Self {
        Self {
            groups,
            ..Default::default()
        }
    }

    /// Every fetch of partition `index` fails
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Fetching partition `index` panics
    pub fn panicking_at(mut self, index: usize) -> Self {
        self.panic_at = Some(index);
        self
    }

    /// Fetching partition `i` sleeps for `delays[i]`
    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }

    /// Fetching partition `index` takes `duration` unless the fetch context gives up first
    pub fn stalling_at(mut self, index: usize, duration: Duration) -> Self {
        self.stall = Some((index, duration));
        self
    }

    /// Cancels `token` once partition `index` has been fetched
    pub fn cancelling_on(mut self, index: usize, token: CancellationToken) -> Self {
        self.cancel_on = Some((index, token));
        self
    }

    /// Partition indices in the order their fetches started
    pub fn fetched(&self) -> Vec<usize> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn flatten(&self) -> Vec<u64> {
        self.groups.iter().flatten().copied().collect()
    }
}

impl PartitionSource for VecSource {
    type Payload = Vec<u64>;
    type Cursor = std::vec::IntoIter<Partition>;

    fn cursor(&self) -> Self::Cursor {
        let mut start = 0;
        self.groups
            .iter()
            .enumerate()
            .map(|(index, group)| {
                let rows = start..start + group.len();
                start = rows.end;
                Partition::new(PartitionId(index), PartitionKey::RowGroup { index, rows })
            })
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn fetch(&self, partition: &Partition, ctx: &FetchContext) -> Result<Vec<u64>, BoxError> {
        let index = partition.id.index();
        self.fetched.lock().unwrap().push(index);

        if let Some((at, duration)) = self.stall {
            if at == index {
                let until = Instant::now() + duration;
                while Instant::now() < until {
                    ctx.check()?;
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(index) {
            thread::sleep(*delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panic_at == Some(index) {
            panic!("source panicked on partition {}", index);
        }
        if self.fail_at == Some(index) {
            return Err(format!("partition {} unavailable", index).into());
        }
        if let Some((on, token)) = &self.cancel_on {
            if *on == index {
                token.cancel();
            }
        }
        Ok(self.groups[index].clone())
    }
}
