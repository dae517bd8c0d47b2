// Checkpoint-daemon gating.
//
// A deferred-update merge must not race the checkpoint machinery: the file
// synchronizer would thrash against the heavy page traffic, and a
// checkpoint taken mid-merge breaks automatic recovery. Merges take scoped
// disablers on both for their whole duration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Daemons that can be suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonCategory {
    FileSynchronizer,
    Executor,
}

impl DaemonCategory {
    fn slot(self) -> usize {
        match self {
            DaemonCategory::FileSynchronizer => 0,
            DaemonCategory::Executor => 1,
        }
    }
}

/// Per-process disable counters for the checkpoint daemons. A daemon runs
/// only while its counter is zero; disablers nest.
#[derive(Debug, Default)]
pub struct DaemonControl {
    counts: [AtomicUsize; 2],
}

impl DaemonControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable(self: &Arc<Self>, category: DaemonCategory) -> Disabler {
        self.counts[category.slot()].fetch_add(1, Ordering::AcqRel);
        Disabler {
            control: Arc::clone(self),
            category,
        }
    }

    pub fn is_enabled(&self, category: DaemonCategory) -> bool {
        self.counts[category.slot()].load(Ordering::Acquire) == 0
    }
}

/// Scoped suspension of one daemon; re-enables on drop, exceptions
/// included.
pub struct Disabler {
    control: Arc<DaemonControl>,
    category: DaemonCategory,
}

impl Drop for Disabler {
    fn drop(&mut self) {
        self.control.counts[self.category.slot()].fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disablers_nest() {
        let control = Arc::new(DaemonControl::new());
        assert!(control.is_enabled(DaemonCategory::Executor));
        {
            let _a = control.disable(DaemonCategory::Executor);
            {
                let _b = control.disable(DaemonCategory::Executor);
                assert!(!control.is_enabled(DaemonCategory::Executor));
            }
            assert!(!control.is_enabled(DaemonCategory::Executor));
            assert!(control.is_enabled(DaemonCategory::FileSynchronizer));
        }
        assert!(control.is_enabled(DaemonCategory::Executor));
    }
}
