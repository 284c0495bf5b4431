use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// How the scheduler is being driven.
///
/// - `Interactive`: a front-end pushes tasks one request at a time; failures
///   only abandon the failing chain and the process never exits on its own.
/// - `Unattended`: batch execution; any failure aborts the whole run, and
///   the process exits once the scheduler goes idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Interactive,
    Unattended,
}

impl RunMode {
    pub fn from_batch_flag(batch: bool) -> Self {
        if batch {
            RunMode::Unattended
        } else {
            RunMode::Interactive
        }
    }

    pub fn is_unattended(self) -> bool {
        self == RunMode::Unattended
    }
}

/// Shared ceiling on concurrently running external processes.
///
/// Cloned handles observe the same value; the scheduler reads it once per
/// decision, so a front-end may change it between decisions. Values are
/// clamped to at least 1.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimit(Arc<AtomicUsize>);

impl ConcurrencyLimit {
    pub fn new(limit: usize) -> Self {
        Self(Arc::new(AtomicUsize::new(limit.max(1))))
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed).max(1)
    }

    pub fn set(&self, limit: usize) {
        self.0.store(limit.max(1), Ordering::Relaxed);
    }
}

impl Default for ConcurrencyLimit {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_shared_and_clamped() {
        let limit = ConcurrencyLimit::new(0);
        assert_eq!(limit.get(), 1);

        let view = limit.clone();
        limit.set(4);
        assert_eq!(view.get(), 4);

        view.set(0);
        assert_eq!(limit.get(), 1);
    }

    #[test]
    fn batch_flag_selects_unattended_mode() {
        assert_eq!(RunMode::from_batch_flag(true), RunMode::Unattended);
        assert!(!RunMode::from_batch_flag(false).is_unattended());
        assert_eq!(RunMode::default(), RunMode::Interactive);
    }
}
