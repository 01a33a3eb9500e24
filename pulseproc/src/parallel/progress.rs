use std::sync::mpsc::{Receiver, Sender};

use log::info;

/// Cumulative number of events a rank has processed so far.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub rank: usize,
    pub processed: usize,
}

/// Worker-side handle that reports every `interval` events and at completion.
pub struct ProgressReporter {
    rank: usize,
    interval: usize,
    processed: usize,
    sender: Sender<ProgressUpdate>,
}

impl ProgressReporter {
    pub fn new(rank: usize, interval: usize, sender: Sender<ProgressUpdate>) -> Self {
        ProgressReporter {
            rank,
            interval: interval.max(1),
            processed: 0,
            sender,
        }
    }

    pub fn tick(&mut self) {
        self.processed += 1;
        if self.processed % self.interval == 0 {
            self.send();
        }
    }

    pub fn finish(self) {
        self.send();
    }

    fn send(&self) {
        // progress is cosmetic, a gone monitor is not an error
        let _ = self.sender.send(ProgressUpdate {
            rank: self.rank,
            processed: self.processed,
        });
    }
}

/// Aggregates worker updates until every sender is dropped.
///
/// Logs the overall percentage in steps of ten and returns the final event
/// count seen over the channel.
pub fn monitor(receiver: Receiver<ProgressUpdate>, workers: usize, total: usize) -> usize {
    let mut per_rank = vec![0usize; workers];
    let mut next_step = 10;
    for update in receiver {
        if update.rank >= per_rank.len() {
            per_rank.resize(update.rank + 1, 0);
        }
        per_rank[update.rank] = update.processed;

        let processed: usize = per_rank.iter().sum();
        if total > 0 {
            let percent = processed * 100 / total;
            if percent >= next_step {
                info!("processed {} of {} events ({}%)", processed, total, percent);
                next_step = (percent / 10 + 1) * 10;
            }
        }
    }
    per_rank.iter().sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_monitor_counts_all_ranks() {
        let (sender, receiver) = channel();
        std::thread::scope(|scope| {
            let handle = scope.spawn(|| monitor(receiver, 2, 25));
            let mut a = ProgressReporter::new(0, 4, sender.clone());
            let mut b = ProgressReporter::new(1, 4, sender.clone());
            for _ in 0..10 {
                a.tick();
            }
            for _ in 0..15 {
                b.tick();
            }
            a.finish();
            b.finish();
            drop(sender);
            assert_eq!(handle.join().unwrap(), 25);
        });
    }

    #[test]
    fn test_reporter_interval() {
        let (sender, receiver) = channel();
        let mut reporter = ProgressReporter::new(3, 5, sender);
        for _ in 0..12 {
            reporter.tick();
        }
        reporter.finish();
        let updates: Vec<usize> = receiver.iter().map(|u| u.processed).collect();
        assert_eq!(updates, vec![5, 10, 12]);
    }
}
