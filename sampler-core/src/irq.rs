//! Interrupt callback latch.
//!
//! The hardware interrupt handler only records that it fired; the scheduler
//! consumes the latch from thread context.

use portable_atomic::{AtomicBool, Ordering};

/// Flag set from interrupt context and consumed by the scheduler.
#[derive(Debug, Default)]
pub struct IrqLatch {
    pending: AtomicBool,
}

impl IrqLatch {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
        }
    }

    /// Called from the interrupt handler. Never touches the chip.
    pub fn notify(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Returns `true` once per notification burst.
    #[must_use]
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_is_consumed_once() {
        static LATCH: IrqLatch = IrqLatch::new();
        LATCH.notify();
        LATCH.notify();
        assert!(LATCH.is_pending());
        assert!(LATCH.take());
        assert!(!LATCH.take(), "second take must see an empty latch");
    }
}
