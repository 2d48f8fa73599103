//! Thinking-loop detection.
//!
//! The guard collects a run of identical `thinking` texts. A different
//! thinking does not break the run at once: only after
//! `delay_empty` mismatches is the run discarded, so a model alternating
//! between one stuck thought and noise is still caught.

#[derive(Debug, Clone)]
pub struct LoopGuard {
    repetitions: Vec<String>,
    mismatches: usize,
    threshold: usize,
    delay_empty: usize,
}

impl LoopGuard {
    pub fn new(threshold: usize, delay_empty: usize) -> Self {
        Self {
            repetitions: Vec::new(),
            mismatches: 0,
            threshold: threshold.max(1),
            delay_empty: delay_empty.max(1),
        }
    }

    /// Record the thinking of one step. Empty thinking is not a repeat.
    pub fn observe(&mut self, thinking: &str) {
        if thinking.trim().is_empty() {
            return;
        }
        if self.repetitions.first().is_none_or(|first| first == thinking) {
            self.repetitions.push(thinking.to_string());
            return;
        }
        self.mismatches += 1;
        if self.mismatches >= self.delay_empty {
            self.repetitions.clear();
            self.mismatches = 0;
        }
    }

    /// Length of the current run once it reached the threshold.
    pub fn tripped(&self) -> Option<usize> {
        let count = self.repetitions.len();
        (count >= self.threshold).then_some(count)
    }

    /// Forget the current run after a warning was issued.
    pub fn clear(&mut self) {
        self.repetitions.clear();
    }

    pub fn reset(&mut self) {
        self.repetitions.clear();
        self.mismatches = 0;
    }

    pub fn count(&self) -> usize {
        self.repetitions.len()
    }
}
