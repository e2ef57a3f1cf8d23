// ============================================================================
// Cancellation token and throttled progress reporting
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Shared cooperative cancellation flag.
///
/// Clones share the same flag, so one token can be handed to every shard of
/// a computation and to the UI thread that wants to abort it.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// One progress report handed to the caller's callback.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressUpdate {
    /// 0..=100, never decreasing within one computation.
    pub percent: u8,
    pub elapsed_secs: f64,
    pub remaining_secs: f64,
}

/// Callback signature: return `true` to request cancellation.
pub type ProgressFn<'a> = dyn FnMut(ProgressUpdate) -> bool + 'a;

/// Time-throttled, monotonic wrapper around an optional progress callback.
pub(crate) struct ProgressReporter<'a, 'b> {
    callback: Option<&'a mut ProgressFn<'b>>,
    start: Instant,
    last_report: Instant,
    interval: Duration,
    last_percent: u8,
}

impl<'a, 'b> ProgressReporter<'a, 'b> {
    pub(crate) fn new(callback: Option<&'a mut ProgressFn<'b>>, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            callback,
            start: now,
            last_report: now,
            interval,
            last_percent: 0,
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Report `done / total` of the band `[from, to]` percent.
    /// Returns `true` when the callback asked to cancel.
    pub(crate) fn report_fraction(&mut self, from: u8, to: u8, done: usize, total: usize) -> bool {
        let span = to.saturating_sub(from) as usize;
        let pct = if total == 0 { to } else { from + (done.min(total) * span / total) as u8 };
        self.report(pct, false)
    }

    /// Invoke the callback if the throttle interval has passed (or `force`).
    pub(crate) fn report(&mut self, percent: u8, force: bool) -> bool {
        let Some(cb) = self.callback.as_deref_mut() else {
            return false;
        };
        let now = Instant::now();
        if !force && now.duration_since(self.last_report) < self.interval {
            return false;
        }
        self.last_report = now;

        let percent = percent.min(100).max(self.last_percent);
        self.last_percent = percent;

        let elapsed = now.duration_since(self.start).as_secs_f64();
        let remaining = if percent > 0 {
            elapsed / percent as f64 * (100 - percent) as f64
        } else {
            0.0
        };
        cb(ProgressUpdate {
            percent,
            elapsed_secs: elapsed,
            remaining_secs: remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn reporter_is_monotonic_and_throttled() {
        let mut seen = Vec::new();
        {
            let mut cb = |u: ProgressUpdate| {
                seen.push(u.percent);
                false
            };
            let mut reporter = ProgressReporter::new(Some(&mut cb), Duration::ZERO);
            reporter.report(10, false);
            reporter.report(5, false);
            reporter.report_fraction(50, 100, 1, 2);
            reporter.report(200, true);
        }
        assert_eq!(seen, vec![10, 10, 75, 100]);

        let mut calls = 0;
        {
            let mut cb = |_u: ProgressUpdate| {
                calls += 1;
                false
            };
            let mut reporter = ProgressReporter::new(Some(&mut cb), Duration::from_secs(3600));
            reporter.report(10, false);
            reporter.report(20, false);
            reporter.report(100, true);
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn reporter_forwards_cancel_request() {
        let mut cb = |u: ProgressUpdate| u.percent >= 50;
        let mut reporter = ProgressReporter::new(Some(&mut cb), Duration::ZERO);
        assert!(!reporter.report(20, false));
        assert!(reporter.report(60, false));
    }

    #[test]
    fn reporter_without_callback_never_cancels() {
        let mut reporter = ProgressReporter::new(None, Duration::ZERO);
        assert!(!reporter.report(100, true));
    }
}
