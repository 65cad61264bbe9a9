use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};

/// Cooperative cancellation flag, polled by the parser while it runs.
pub trait Interrupt: Sync {
    fn is_interrupted(&self) -> bool;

    fn reason(&self) -> String {
        "interrupted".to_string()
    }
}

impl Interrupt for AtomicBool {
    fn is_interrupted(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

pub struct NoInterrupt;

impl Interrupt for NoInterrupt {
    fn is_interrupted(&self) -> bool {
        false
    }
}

/// Epoch-based interrupt shared by one endpoint.
///
/// Every request observes the epoch current at submission; bumping the
/// epoch interrupts all requests submitted before the bump.
#[derive(Clone, Default)]
pub struct InterruptToken {
    epoch: Arc<AtomicU64>,
    reason: Arc<Mutex<String>>,
    observed: u64,
}

impl InterruptToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// A token for a request submitted at `epoch`.
    pub fn at_epoch(&self, epoch: u64) -> Self {
        InterruptToken {
            epoch: Arc::clone(&self.epoch),
            reason: Arc::clone(&self.reason),
            observed: epoch,
        }
    }

    /// A token observing the current epoch.
    pub fn snapshot(&self) -> Self {
        self.at_epoch(self.current_epoch())
    }

    /// Interrupts every request observing an earlier epoch; returns the
    /// new epoch.
    pub fn interrupt(&self, reason: &str) -> u64 {
        self.set_reason(reason);
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Moves the epoch to `epoch` if it is ahead of the current one.
    pub fn advance_to(&self, epoch: u64, reason: &str) {
        self.set_reason(reason);
        self.epoch.fetch_max(epoch, Ordering::SeqCst);
    }

    fn set_reason(&self, reason: &str) {
        let mut r = self.reason.lock().unwrap();
        r.clear();
        r.push_str(reason);
    }
}

impl Interrupt for InterruptToken {
    fn is_interrupted(&self) -> bool {
        self.current_epoch() != self.observed
    }

    fn reason(&self) -> String {
        let r = self.reason.lock().unwrap();
        if r.is_empty() {
            "interrupted".to_string()
        } else {
            r.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_interrupts_earlier_requests_only() {
        let token = InterruptToken::new();
        let first = token.snapshot();
        assert!(!first.is_interrupted());
        token.interrupt("new keystroke");
        let second = token.snapshot();
        assert!(first.is_interrupted());
        assert!(!second.is_interrupted());
        assert_eq!(first.reason(), "new keystroke");
    }

    #[test]
    fn atomic_bool_flag() {
        let flag = AtomicBool::new(false);
        assert!(!flag.is_interrupted());
        flag.store(true, Ordering::Relaxed);
        assert!(flag.is_interrupted());
    }
}
