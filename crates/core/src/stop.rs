//! Cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A shared stop flag, polled at chunk and step boundaries.
///
/// Clones share the same flag, so a sub-agent stops with its parent.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear the flag before a new query.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = StopFlag::new();
        let child = flag.clone();
        assert!(!child.is_stopped());
        flag.stop();
        assert!(child.is_stopped());
        child.reset();
        assert!(!flag.is_stopped());
    }
}
