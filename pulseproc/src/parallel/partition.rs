use std::ops::Range;

use serde::{Deserialize, Serialize};

/// How events are dealt out to workers.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionScheme {
    /// Balanced contiguous blocks, the first `n % workers` blocks one event longer.
    #[default]
    Contiguous,
    /// Event `i` goes to rank `i % workers`.
    RoundRobin,
}

/// The events one rank processes. Rank 0 is the master.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub rank: usize,
    pub events: Vec<usize>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Splits `events` into exactly `workers` partitions (some possibly empty).
///
/// # Example
///
/// ```rust
/// # use pulseproc::parallel::partition::{partition, PartitionScheme};
/// let parts = partition(0..10, 3, PartitionScheme::Contiguous);
/// assert_eq!(parts[0].events, vec![0, 1, 2, 3]);
/// assert_eq!(parts[2].events, vec![7, 8, 9]);
/// let parts = partition(0..5, 2, PartitionScheme::RoundRobin);
/// assert_eq!(parts[1].events, vec![1, 3]);
/// ```
pub fn partition(events: Range<usize>, workers: usize, scheme: PartitionScheme) -> Vec<Partition> {
    let workers = workers.max(1);
    let n = events.len();
    match scheme {
        PartitionScheme::Contiguous => {
            let base = n / workers;
            let extra = n % workers;
            let mut start = events.start;
            (0..workers)
                .map(|rank| {
                    let size = base + usize::from(rank < extra);
                    let block = start..start + size;
                    start += size;
                    Partition {
                        rank,
                        events: block.collect(),
                    }
                })
                .collect()
        }
        PartitionScheme::RoundRobin => (0..workers)
            .map(|rank| Partition {
                rank,
                events: events.clone().skip(rank).step_by(workers).collect(),
            })
            .collect(),
    }
}
