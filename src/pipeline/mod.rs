//! Bounded, throttled fan-out of independent per-example work.
//!
//! A single producer (the calling thread) streams inputs into a rayon pool.
//! Once more than `throttle` tasks are in flight the producer blocks until
//! the backlog drains to the thread count. Results come back over a channel
//! and are handed to the sink on the producer thread, either in submission
//! order or as they complete.
//!
//! A task that fails is logged and skipped; the batch carries on.

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::error::{PipelineError, ProResult};

/// Counts of one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub submitted: usize,
    /// Tasks that produced an output.
    pub emitted: usize,
    /// Tasks that finished without output.
    pub skipped: usize,
    /// Tasks that returned an error.
    pub failed: usize,
}

/// In-flight task counter with a wake-up for the producer.
#[derive(Debug, Default)]
struct Backlog {
    in_flight: Mutex<usize>,
    drained: Condvar,
}

impl Backlog {
    fn submit(&self) {
        *lock_or_recover(&self.in_flight, "backlog") += 1;
    }

    fn finish(&self) {
        {
            let mut n = lock_or_recover(&self.in_flight, "backlog");
            *n = n.saturating_sub(1);
        }
        self.drained.notify_all();
    }

    /// Block while more than `limit` tasks are in flight, until at most `low` remain.
    fn throttle(&self, limit: usize, low: usize) {
        let mut n = lock_or_recover(&self.in_flight, "backlog");
        if *n <= limit {
            return;
        }
        tracing::trace!(in_flight = *n, limit, "throttling producer");
        while *n > low {
            n = self.drained.wait(n).unwrap_or_else(|poisoned| {
                tracing::warn!(lock = "backlog", "lock poisoned by a panicking task; recovering");
                poisoned.into_inner()
            });
        }
    }
}

/// Lock `mutex`, taking over the data if a panicking thread poisoned it.
pub(crate) fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &'static str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(lock = what, "lock poisoned by a panicking task; recovering");
        poisoned.into_inner()
    })
}

/// What one task handed back.
enum Outcome<O> {
    Output(O),
    Skipped,
    Failed,
}

/// Releases one backlog slot when a task ends, panicking or not.
struct Finished<'a>(&'a Backlog);

impl Drop for Finished<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Copy)]
pub struct Pipeline {
    threads: usize,
    throttle: usize,
    maintain_order: bool,
}

impl Pipeline {
    /// `throttle` is the in-flight limit; `maintain_order` emits results in
    /// submission order.
    pub fn new(threads: usize, throttle: usize, maintain_order: bool) -> Self {
        let threads = threads.max(1);
        Self {
            threads,
            throttle: throttle.max(threads),
            maintain_order,
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `work(id, input)` for every input (ids count from 1) and pass
    /// each output to `sink(id, output)`.
    pub fn run<I, T, O, W, S>(&self, inputs: I, work: W, mut sink: S) -> ProResult<PipelineStats>
    where
        I: IntoIterator<Item = T>,
        T: Send,
        O: Send,
        W: Fn(usize, T) -> ProResult<Option<O>> + Sync,
        S: FnMut(usize, O) -> ProResult<()>,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("proppr-worker-{i}"))
            .build()
            .map_err(|e| PipelineError::Pool { message: e.to_string() })?;

        let backlog = Backlog::default();
        let (tx, rx) = mpsc::channel::<(usize, Outcome<O>)>();
        let mut stats = PipelineStats::default();
        let mut sink_error = None;
        let mut reorder: BTreeMap<usize, Outcome<O>> = BTreeMap::new();
        let mut next_out = 1;

        let mut deliver = |id: usize, out: Outcome<O>, stats: &mut PipelineStats| {
            if self.maintain_order {
                reorder.insert(id, out);
                while let Some(out) = reorder.remove(&next_out) {
                    emit(&mut sink, next_out, out, stats, &mut sink_error);
                    next_out += 1;
                }
            } else {
                emit(&mut sink, id, out, stats, &mut sink_error);
            }
        };

        let work = &work;
        let backlog_ref = &backlog;
        let mut received = 0;
        pool.in_place_scope(|scope| {
            for (i, input) in inputs.into_iter().enumerate() {
                let id = i + 1;
                backlog_ref.throttle(self.throttle, self.threads);
                backlog_ref.submit();
                stats.submitted += 1;
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let _done = Finished(backlog_ref);
                    let out = match work(id, input) {
                        Ok(Some(out)) => Outcome::Output(out),
                        Ok(None) => Outcome::Skipped,
                        Err(e) => {
                            tracing::warn!(example = id, error = %e, "task failed; skipping");
                            Outcome::Failed
                        }
                    };
                    let _ = tx.send((id, out));
                });
                while let Ok((id, out)) = rx.try_recv() {
                    received += 1;
                    deliver(id, out, &mut stats);
                }
            }
            drop(tx);
            while received < stats.submitted {
                let Ok((id, out)) = rx.recv() else {
                    break;
                };
                received += 1;
                deliver(id, out, &mut stats);
            }
        });
        drop(deliver);

        if let Some(e) = sink_error {
            return Err(e);
        }
        Ok(stats)
    }
}

/// One instance of `T` per pool thread, so per-walk scratch state is never shared.
pub struct PerWorker<T> {
    slots: Vec<Mutex<T>>,
}

impl<T> PerWorker<T> {
    /// `threads` instances made by `make`.
    pub fn new(threads: usize, mut make: impl FnMut() -> T) -> Self {
        Self {
            slots: (0..threads.max(1)).map(|_| Mutex::new(make())).collect(),
        }
    }

    /// Run `f` on the current pool thread's instance.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let slot = rayon::current_thread_index().unwrap_or(0) % self.slots.len();
        f(&mut lock_or_recover(&self.slots[slot], "worker instance"))
    }
}

fn emit<O, S>(sink: &mut S, id: usize, out: Outcome<O>, stats: &mut PipelineStats, error: &mut Option<crate::error::ProPprError>)
where
    S: FnMut(usize, O) -> ProResult<()>,
{
    let out = match out {
        Outcome::Output(out) => out,
        Outcome::Skipped => {
            stats.skipped += 1;
            return;
        }
        Outcome::Failed => {
            stats.failed += 1;
            return;
        }
    };
    if error.is_some() {
        return;
    }
    match sink(id, out) {
        Ok(()) => stats.emitted += 1,
        Err(e) => *error = Some(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

    #[test]
    fn ordered_output_follows_submission() {
        let pipeline = Pipeline::new(4, 6, true);
        let mut seen = Vec::new();
        let stats = pipeline
            .run(
                (0..50u64).collect::<Vec<_>>(),
                |_, x| {
                    std::thread::sleep(std::time::Duration::from_micros((50 - x) * 20));
                    Ok(Some(x * 2))
                },
                |id, out| {
                    seen.push((id, out));
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(stats.submitted, 50);
        assert_eq!(stats.emitted, 50);
        let expected: Vec<(usize, u64)> = (0..50u64).map(|x| (x as usize + 1, x * 2)).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn each_worker_gets_its_own_instance() {
        let pipeline = Pipeline::new(3, 4, false);
        let workers = PerWorker::new(pipeline.threads(), || 0usize);
        let mut total = 0;
        pipeline
            .run(
                0..30,
                |_, _| Ok(Some(workers.with(|n| {
                    *n += 1;
                    *n
                }))),
                |_, _| {
                    total += 1;
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(total, 30);
        let counted: usize = (0..3).map(|i| *workers.slots[i].lock().unwrap()).sum();
        assert_eq!(counted, 30);
    }

    #[test]
    fn unordered_output_is_complete() {
        let pipeline = Pipeline::new(3, 4, false);
        let mut seen = Vec::new();
        pipeline
            .run(0..20, |_, x| Ok(Some(x)), |_, out| {
                seen.push(out);
                Ok(())
            })
            .unwrap();
        seen.sort();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn failures_and_skips_do_not_stop_the_batch() {
        let pipeline = Pipeline::new(2, 3, true);
        let mut seen = Vec::new();
        let stats = pipeline
            .run(
                1..=6,
                |_, x: i32| match x % 3 {
                    0 => Err(ConfigError::InvalidOption {
                        option: "x".into(),
                        reason: "boom".into(),
                    }
                    .into()),
                    1 => Ok(None),
                    _ => Ok(Some(x)),
                },
                |_, out| {
                    seen.push(out);
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(seen, [2, 5]);
        assert_eq!(stats.submitted, 6);
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.failed, 2);
    }

    #[test]
    fn poisoned_locks_are_recovered() {
        let counter = std::sync::Arc::new(Mutex::new(3usize));
        let shared = std::sync::Arc::clone(&counter);
        let _ = std::thread::spawn(move || {
            let _guard = shared.lock().unwrap();
            panic!("worker died holding the lock");
        })
        .join();
        assert!(counter.is_poisoned());
        *lock_or_recover(&counter, "test") += 1;
        assert_eq!(*lock_or_recover(&counter, "test"), 4);

        let backlog = Backlog::default();
        backlog.submit();
        backlog.submit();
        backlog.finish();
        assert_eq!(*lock_or_recover(&backlog.in_flight, "backlog"), 1);
    }
}

