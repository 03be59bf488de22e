//! # Timer Service Abstraction
//!
//! Provides a platform-neutral clock for everything in the runtime that
//! sleeps: `wait` suspensions inside handler chains and the scheduling of
//! repeat effects.
//!
//! Keeping the clock behind a trait means the evaluator never names a
//! runtime directly, and tests can substitute a deterministic timer. Under
//! Tokio's paused test clock (`#[tokio::test(start_paused = true)]`) the
//! default [`TokioTimer`] is already deterministic, so most tests simply
//! use virtual time.

use std::future::Future;
use std::time::Duration;

/// Shortest scheduling period the effect runner will honor, in seconds.
///
/// Repeat effects without an explicit delay tick once per frame; repeat
/// effects whose delay resolves below this floor are clamped up to it.
/// One 60 Hz frame is the documented minimum.
pub const FRAME_SECS: f64 = 1.0 / 60.0;

/// Platform-neutral timer service for async sleep operations.
///
/// The associated future type lets the compiler know the exact future at
/// compile time, so no boxing is needed on the hot path.
pub trait TimerService {
    /// The future type returned by the sleep operation.
    type SleepFuture: Future<Output = ()>;

    /// Sleep for the specified duration.
    ///
    /// Returns a future that resolves after the given duration has elapsed.
    fn sleep(duration: Duration) -> Self::SleepFuture;
}

/// The Tokio-backed timer used by the runtime.
pub struct TokioTimer;

impl TimerService for TokioTimer {
    type SleepFuture = tokio::time::Sleep;

    fn sleep(duration: Duration) -> Self::SleepFuture {
        tokio::time::sleep(duration)
    }
}

/// The active timer implementation.
pub type Timer = TokioTimer;

/// Deterministic timer for unit tests.
///
/// Completes immediately while preserving the requested duration so tests
/// can assert on the timing that was asked for without real delays.
#[cfg(test)]
pub struct TestTimer;

/// Future returned by [`TestTimer::sleep`].
#[cfg(test)]
pub struct TestSleepFuture {
    /// The duration that was requested for the sleep operation.
    pub duration: Duration,
}

#[cfg(test)]
impl Future for TestSleepFuture {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        std::task::Poll::Ready(())
    }
}

#[cfg(test)]
impl TimerService for TestTimer {
    type SleepFuture = TestSleepFuture;

    fn sleep(duration: Duration) -> Self::SleepFuture {
        TestSleepFuture { duration }
    }
}
