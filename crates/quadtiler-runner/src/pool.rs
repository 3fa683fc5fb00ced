//! Fixed-size worker pool over independent units of work.

use std::thread;

use crossbeam_channel::{bounded, unbounded};
use tracing::trace;

/// Runs a closure over a list of inputs on `size` scoped threads.
///
/// Results come back in submission order. A size of 1 runs inline on the
/// calling thread. Panics in the closure propagate to the caller once all
/// workers stop; callers that need isolation catch them inside the closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    /// Pool of `size` workers (at least 1).
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    /// Serial pool.
    pub fn serial() -> Self {
        Self::new(1)
    }

    /// Pool sized to the available parallelism.
    pub fn available() -> Self {
        Self::new(thread::available_parallelism().map_or(1, |n| n.get()))
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether work runs on the calling thread.
    pub fn is_serial(&self) -> bool {
        self.size == 1
    }

    /// Apply `f` to every input and collect the results in input order.
    pub fn run<T, R, F>(&self, inputs: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        let count = inputs.len();
        let workers = self.size.min(count);
        if workers <= 1 {
            return inputs.into_iter().map(f).collect();
        }

        let (task_tx, task_rx) = bounded::<(usize, T)>(workers * 2);
        let (result_tx, result_rx) = unbounded::<(usize, R)>();
        let f = &f;

        let mut slots: Vec<Option<R>> = Vec::with_capacity(count);
        slots.resize_with(count, || None);

        thread::scope(|scope| {
            for worker in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    let mut handled = 0usize;
                    while let Ok((index, input)) = task_rx.recv() {
                        if result_tx.send((index, f(input))).is_err() {
                            break;
                        }
                        handled += 1;
                    }
                    trace!(worker, handled, "Worker finished");
                });
            }
            drop(task_rx);
            drop(result_tx);

            for task in inputs.into_iter().enumerate() {
                if task_tx.send(task).is_err() {
                    break;
                }
            }
            drop(task_tx);

            for (index, result) in result_rx.iter() {
                slots[index] = Some(result);
            }
        });

        slots.into_iter().flatten().collect()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::serial()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_size_clamped() {
        assert_eq!(WorkerPool::new(0).size(), 1);
        assert!(WorkerPool::new(0).is_serial());
        assert!(WorkerPool::available().size() >= 1);
    }

    #[test]
    fn test_results_in_submission_order() {
        let pool = WorkerPool::new(4);
        let inputs: Vec<u64> = (0..50).collect();
        // Later inputs finish first
        let out = pool.run(inputs, |i| {
            thread::sleep(Duration::from_micros((50 - i) * 20));
            i * 2
        });
        assert_eq!(out, (0..50).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_serial_runs_on_caller_thread() {
        let caller = thread::current().id();
        let out = WorkerPool::serial().run(vec![1, 2, 3], |x| (x, thread::current().id()));
        assert!(out.iter().all(|(_, id)| *id == caller));
    }

    #[test]
    fn test_runs_every_input_once() {
        let seen = AtomicUsize::new(0);
        let out = WorkerPool::new(3).run((0..100).collect(), |x: usize| {
            seen.fetch_add(1, Ordering::SeqCst);
            x
        });
        assert_eq!(out.len(), 100);
        assert_eq!(seen.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_empty_input() {
        let out: Vec<u8> = WorkerPool::new(4).run(Vec::<u8>::new(), |x| x);
        assert!(out.is_empty());
    }
}
