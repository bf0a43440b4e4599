//! Cross-context trigger flag
//!
//! Single writer (the delivery callback, running on the session runner) and
//! single reader (the control loop). Only "at least one command pending"
//! matters, so repeated sets collapse into one.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared "command pending" flag
#[derive(Debug, Clone, Default)]
pub struct TriggerSignal {
    pending: Arc<AtomicBool>,
}

impl TriggerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a command as pending. Never blocks.
    ///
    /// Returns `false` if a command was already pending.
    pub fn set(&self) -> bool {
        !self.pending.swap(true, Ordering::AcqRel)
    }

    /// Atomically observe and clear the flag
    ///
    /// A `set` racing with `take` is either observed by this call or left
    /// pending for the next one; it is never lost.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_set_is_idempotent() {
        let signal = TriggerSignal::new();
        assert!(!signal.is_set());
        assert!(signal.set());
        assert!(!signal.set());
        assert!(signal.is_set());

        assert!(signal.take());
        assert!(!signal.take());
        assert!(!signal.is_set());
    }

    #[test]
    fn test_clones_share_state() {
        let writer = TriggerSignal::new();
        let reader = writer.clone();
        writer.set();
        assert!(reader.take());
        assert!(!writer.is_set());
    }

    #[test]
    fn test_no_lost_sets_across_threads() {
        let signal = TriggerSignal::new();
        let rounds = 1_000;

        for _ in 0..rounds {
            let writer = signal.clone();
            let handle = thread::spawn(move || {
                writer.set();
            });
            handle.join().unwrap();
            // Every set that happened after the previous take must be seen.
            assert!(signal.take());
        }
        assert!(!signal.is_set());
    }

    #[test]
    fn test_concurrent_sets_collapse() {
        let signal = TriggerSignal::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let writer = signal.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        writer.set();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(signal.take());
        assert!(!signal.take());
    }
}
