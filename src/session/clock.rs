use std::time::{SystemTime, UNIX_EPOCH};

/// Source of "now" in unix seconds, injected so expiry can be tested.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
            })
    }
}

#[cfg(test)]
pub(crate) use fixed::FixedClock;

#[cfg(test)]
mod fixed {
    use super::Clock;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Manually advanced clock for tests.
    #[derive(Debug)]
    pub(crate) struct FixedClock(AtomicI64);

    impl FixedClock {
        pub(crate) fn new(now: i64) -> Self {
            Self(AtomicI64::new(now))
        }

        pub(crate) fn advance(&self, seconds: i64) {
            self.0.fetch_add(seconds, Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now_unix(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }
}
