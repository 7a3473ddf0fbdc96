use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delay {
    pub requested: Duration,
    pub elapsed: Duration,
    pub completed: bool,
}

/// Suspends the calling task for `duration` without using CPU. Returns early,
/// with `completed` unset, if `cancel` fires first.
pub async fn sleep_for(duration: Duration, cancel: &CancellationToken) -> Delay {
    let start = Instant::now();
    let completed = tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    };
    Delay {
        requested: duration,
        elapsed: start.elapsed(),
        completed,
    }
}
