use std::hint::black_box;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Starting value of the burn accumulator. Any small positive number works;
/// it only needs `sqrt` to stay well defined.
pub const ACCUMULATOR_SEED: f64 = 0.0001;

/// Outcome of a CPU burn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuBurn {
    pub operations: u64,
    pub elapsed: Duration,
    pub workers: usize,
}

/// Broadcast stop flag shared by every loop taking part in one burn.
///
/// Loops only ever read it, with a relaxed load, so polling it on every
/// iteration does not bounce a cache line between cores.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns a guard that raises the signal when dropped. Request handlers
    /// hold one so that a cancelled request stops its burn.
    pub fn stop_on_drop(&self) -> StopOnDrop {
        StopOnDrop(self.clone())
    }
}

#[derive(Debug)]
pub struct StopOnDrop(StopSignal);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.stop();
    }
}

#[inline(always)]
fn step(x: f64) -> f64 {
    black_box(x + x.sqrt())
}

/// Busy-loops on the calling thread until `duration` has elapsed, `operations`
/// iterations have run (when non-zero), or `stop` is raised.
///
/// Never yields. Both bounds are checked before each iteration, so a zero
/// duration performs no work at all.
pub fn burn(duration: Duration, operations: u64, stop: &StopSignal) -> CpuBurn {
    let start = Instant::now();
    let mut x = ACCUMULATOR_SEED;
    let mut performed = 0u64;
    while start.elapsed() < duration && !stop.is_stopped() {
        if operations != 0 && performed == operations {
            break;
        }
        x = step(x);
        performed += 1;
    }
    black_box(x);
    CpuBurn {
        operations: performed,
        elapsed: start.elapsed(),
        workers: 1,
    }
}

fn spin_until_stopped(stop: &StopSignal) -> u64 {
    let mut x = ACCUMULATOR_SEED;
    let mut performed = 0u64;
    while !stop.is_stopped() {
        x = step(x);
        performed += 1;
    }
    black_box(x);
    performed
}

/// Number of logical processors the parallel burner saturates.
pub fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Saturates every logical processor for `duration`.
///
/// One blocking task per processor spins until the shared `stop` signal is
/// raised, either by this function once the duration has elapsed or by the
/// caller. The function only returns after all workers have exited. The
/// reported operation count is the sum over workers; the operation bound of
/// [`burn`] does not apply here.
pub async fn burn_parallel(duration: Duration, stop: StopSignal) -> CpuBurn {
    let workers = available_workers();
    let start = Instant::now();
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let stop = stop.clone();
            tokio::task::spawn_blocking(move || spin_until_stopped(&stop))
        })
        .collect();

    // raise the signal even if this future is dropped mid-sleep
    let guard = stop.stop_on_drop();
    tokio::time::sleep(duration).await;
    drop(guard);

    let mut operations = 0u64;
    for joined in futures::future::join_all(handles).await {
        match joined {
            Ok(count) => operations = operations.saturating_add(count),
            Err(e) => tracing::warn!(error = %e, "cpu worker did not finish cleanly"),
        }
    }

    CpuBurn {
        operations,
        elapsed: start.elapsed(),
        workers,
    }
}
