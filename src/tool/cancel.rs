use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag checked by every tool invocation
///
/// Clones share the same flag; cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the current run
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            tracing::info!("Cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());

        token.cancel();
        assert!(other.is_cancelled());

        // idempotent
        other.cancel();
        assert!(token.is_cancelled());
    }
}
