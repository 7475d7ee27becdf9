use std::sync::atomic::{AtomicI32, Ordering};

pub const PROGRESS_FAILED: i32 = -1;
pub const PROGRESS_DONE: i32 = 100;

/// Percentage of the edit currently running, shared with whoever polls it.
/// `-1` after a failure, `100` after success.
#[derive(Debug, Default)]
pub struct EditProgress(AtomicI32);

impl EditProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }

    pub fn set(&self, value: i32) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Stores `value` when it moved by at least one point. Returns whether it did.
    pub fn advance(&self, value: i32) -> bool {
        let current = self.get();
        if (value - current).abs() >= 1 {
            self.set(value);
            true
        } else {
            false
        }
    }

    pub fn complete(&self) {
        self.set(PROGRESS_DONE);
    }

    pub fn fail(&self) {
        self.set(PROGRESS_FAILED);
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.get(), PROGRESS_DONE | PROGRESS_FAILED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let p = EditProgress::new();
        assert_eq!(p.get(), 0);
        assert!(p.advance(12));
        assert!(!p.advance(12));
        assert!(!p.is_finished());
        p.complete();
        assert!(p.is_finished());
        p.reset();
        assert_eq!(p.get(), 0);
        p.fail();
        assert_eq!(p.get(), PROGRESS_FAILED);
    }
}
