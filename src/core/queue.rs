//! Scheduling of independent units of work.
//!
//! Sequential mode runs units one after another on the calling thread.
//! Parallel mode hands them to a bounded pool of scoped worker threads.
//! Either way results come back in submission order, and a unit that panics
//! yields `None` without affecting its siblings.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread;

use crate::options::{CommandOptions, DEFAULT_WORKERS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    Sequential,
    Parallel { workers: usize },
}

impl Default for QueueMode {
    fn default() -> Self {
        QueueMode::Sequential
    }
}

impl QueueMode {
    pub fn from_options(options: &CommandOptions) -> Self {
        if options.parallel {
            QueueMode::Parallel {
                workers: options.worker_count(),
            }
        } else {
            QueueMode::Sequential
        }
    }

    pub fn parallel() -> Self {
        QueueMode::Parallel {
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, QueueMode::Parallel { .. })
    }
}

/// Run every unit and collect its result, in submission order.
pub fn run_queue<T, F>(mode: QueueMode, units: Vec<F>) -> Vec<Option<T>>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    match mode {
        QueueMode::Sequential => units.into_iter().map(run_unit).collect(),
        QueueMode::Parallel { workers } => run_pool(workers.max(1), units),
    }
}

fn run_unit<T, F: FnOnce() -> T>(unit: F) -> Option<T> {
    panic::catch_unwind(AssertUnwindSafe(unit)).ok()
}

fn run_pool<T, F>(workers: usize, units: Vec<F>) -> Vec<Option<T>>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    let total = units.len();
    let pending: Mutex<VecDeque<(usize, F)>> = Mutex::new(units.into_iter().enumerate().collect());
    let results: Mutex<Vec<Option<T>>> = Mutex::new((0..total).map(|_| None).collect());

    thread::scope(|scope| {
        for _ in 0..workers.min(total) {
            scope.spawn(|| loop {
                let next = match pending.lock() {
                    Ok(mut queue) => queue.pop_front(),
                    Err(_) => None,
                };
                let Some((index, unit)) = next else {
                    break;
                };

                let result = run_unit(unit);
                if let Ok(mut results) = results.lock() {
                    results[index] = result;
                }
            });
        }
    });

    results
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn sequential_runs_in_order_on_one_thread() {
        let caller = thread::current().id();
        let units: Vec<_> = (0..4)
            .map(|i| move || (i, thread::current().id()))
            .collect();

        let results = run_queue(QueueMode::Sequential, units);
        for (expected, result) in results.into_iter().enumerate() {
            let (i, id) = result.unwrap();
            assert_eq!(i, expected);
            assert_eq!(id, caller);
        }
    }

    #[test]
    fn parallel_keeps_submission_order() {
        let units: Vec<_> = (0..10u64)
            .map(|i| {
                move || {
                    thread::sleep(Duration::from_millis((10 - i) * 2));
                    i * i
                }
            })
            .collect();

        let results = run_queue(QueueMode::Parallel { workers: 4 }, units);
        let values: Vec<u64> = results.into_iter().map(Option::unwrap).collect();
        assert_eq!(values, (0..10u64).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn parallel_never_exceeds_worker_bound() {
        let active = &AtomicUsize::new(0);
        let peak = &AtomicUsize::new(0);

        let units: Vec<_> = (0..12)
            .map(|_| {
                move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .collect();

        let results = run_queue(QueueMode::Parallel { workers: 3 }, units);
        assert!(results.iter().all(Option::is_some));
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn panicking_unit_does_not_affect_siblings() {
        for mode in [QueueMode::Sequential, QueueMode::Parallel { workers: 2 }] {
            let units: Vec<Box<dyn FnOnce() -> u32 + Send>> = vec![
                Box::new(|| 1),
                Box::new(|| panic!("boom")),
                Box::new(|| 3),
            ];
            assert_eq!(run_queue(mode, units), vec![Some(1), None, Some(3)]);
        }
    }

    #[test]
    fn mode_follows_parallel_option() {
        let mut options = CommandOptions::default();
        assert_eq!(QueueMode::from_options(&options), QueueMode::Sequential);

        options.parallel = true;
        options.workers = Some(2);
        assert_eq!(QueueMode::from_options(&options), QueueMode::Parallel { workers: 2 });
    }
}
