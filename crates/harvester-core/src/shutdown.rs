//! Graceful stop: external interruption flag plus an optional run deadline

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Why new work stopped being admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// SIGINT/SIGTERM (or a caller) requested shutdown
    Interrupted,
    /// Total run timeout elapsed
    DeadlineReached,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupted => f.write_str("interrupted"),
            Self::DeadlineReached => f.write_str("run deadline reached"),
        }
    }
}

/// Checked before each page fetch and each task claim.
///
/// Owned per run; the flag is shared with whatever signal handler sets it.
#[derive(Debug, Clone)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl StopSignal {
    pub fn new(flag: Arc<AtomicBool>, total_timeout: Option<Duration>) -> Self {
        Self {
            flag,
            deadline: total_timeout.map(|t| Instant::now() + t),
        }
    }

    /// Never stops unless [`request_stop`](Self::request_stop) is called
    pub fn never() -> Self {
        Self::new(Arc::new(AtomicBool::new(false)), None)
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Interruption wins over the deadline when both apply
    pub fn check(&self) -> Option<StopReason> {
        if self.flag.load(Ordering::Relaxed) {
            return Some(StopReason::Interrupted);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(StopReason::DeadlineReached),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_stops() {
        assert_eq!(StopSignal::never().check(), None);
    }

    #[test]
    fn flag_interrupts() {
        let stop = StopSignal::never();
        stop.request_stop();
        assert_eq!(stop.check(), Some(StopReason::Interrupted));
    }

    #[test]
    fn deadline_expires() {
        let stop = StopSignal::new(Arc::new(AtomicBool::new(false)), Some(Duration::ZERO));
        assert_eq!(stop.check(), Some(StopReason::DeadlineReached));
    }

    #[test]
    fn shared_flag_visible_to_clones() {
        let flag = Arc::new(AtomicBool::new(false));
        let stop = StopSignal::new(flag.clone(), None);
        let clone = stop.clone();
        flag.store(true, Ordering::Relaxed);
        assert_eq!(clone.check(), Some(StopReason::Interrupted));
    }
}
