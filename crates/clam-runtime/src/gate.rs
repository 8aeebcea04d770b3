//! [`ForegroundGate`] – keeps background model calls out of the way of a
//! user-facing turn.
//!
//! The model server answers one request at a time, in arrival order. While any
//! [`ForegroundTurn`] is alive the coordinator skips its model-dependent
//! stages and the critic stops between facts.
//!
//! ```rust
//! use clam_runtime::gate::ForegroundGate;
//!
//! let gate = ForegroundGate::new();
//! {
//!     let _turn = gate.enter();
//!     assert!(gate.is_active());
//! }
//! assert!(!gate.is_active());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counting gate shared by the conversation surface and the background stages.
#[derive(Debug, Clone, Default)]
pub struct ForegroundGate {
    active: Arc<AtomicUsize>,
}

impl ForegroundGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a foreground turn as in flight until the returned guard drops.
    pub fn enter(&self) -> ForegroundTurn {
        self.active.fetch_add(1, Ordering::SeqCst);
        ForegroundTurn {
            active: Arc::clone(&self.active),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active_turns() > 0
    }

    pub fn active_turns(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// RAII guard for one foreground turn.
#[derive(Debug)]
pub struct ForegroundTurn {
    active: Arc<AtomicUsize>,
}

impl Drop for ForegroundTurn {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_turns_keep_gate_active() {
        let gate = ForegroundGate::new();
        let a = gate.enter();
        let b = gate.clone().enter();
        assert_eq!(gate.active_turns(), 2);
        drop(a);
        assert!(gate.is_active());
        drop(b);
        assert!(!gate.is_active());
    }

    #[test]
    fn guard_released_on_panic() {
        let gate = ForegroundGate::new();
        let inner = gate.clone();
        let result = std::panic::catch_unwind(move || {
            let _turn = inner.enter();
            panic!("turn failed");
        });
        assert!(result.is_err());
        assert!(!gate.is_active());
    }
}
