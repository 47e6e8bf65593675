use std::sync::atomic::{AtomicUsize, Ordering};

/// Indicates the underlying signal was raised.
const RAISED: usize = 1;

/// Indicates the underlying signal was not raised.
const LOWERED: usize = 0;

/// `AbortSignal` is the cooperative cancellation flag shared between a
/// client task and its producers.
///
/// Raising it never interrupts anything by itself, the owning task only
/// observes it at its checkpoints.
#[derive(Debug)]
pub struct AbortSignal {
    state: AtomicUsize,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicUsize::new(LOWERED),
        }
    }

    /// `raise` flips the state from LOWERED to RAISED, returning false
    /// if the signal was already raised.
    #[inline]
    pub fn raise(&self) -> bool {
        self.state
            .compare_exchange(LOWERED, RAISED, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    /// probe returns true when the signal was raised.
    #[inline]
    #[must_use]
    pub fn probe(&self) -> bool {
        self.state.load(Ordering::Acquire) == RAISED
    }
}
