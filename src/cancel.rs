use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation signal shared between the coordinator and a
/// running strategy.
///
/// Strategies check the flag between iterations and pipeline stages;
/// outbound clients check it before and after each call. Cancellation is
/// one-way: once set, the flag never resets.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_starts_clear_and_latches() {
        let flag = CancellationFlag::new();
        assert!(!flag.is_cancelled());

        let clone = flag.clone();
        clone.cancel();

        assert!(flag.is_cancelled());
        assert!(clone.is_cancelled());
    }
}
