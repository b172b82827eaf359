//! Retry policy for response polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::protocol::constants::{AVR_DEFAULT_TIMEOUT_MS, AVR_RETRY_DELAY_MS};

/// Cooperative cancellation flag shared between a poller and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// How long to keep polling for a response.
#[derive(Debug, Clone)]
pub enum RetryPolicy {
    /// Give up after `ceil(timeout_ms / retry_delay_ms)` polls.
    Bounded { timeout_ms: u64, retry_delay_ms: u64 },
    /// Poll until a response arrives or `cancel` is set.
    ///
    /// For remote operations of unknown duration such as long erase cycles.
    Unbounded {
        retry_delay_ms: u64,
        cancel: CancelToken,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Bounded {
            timeout_ms: AVR_DEFAULT_TIMEOUT_MS,
            retry_delay_ms: AVR_RETRY_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    pub fn bounded(timeout_ms: u64) -> Self {
        RetryPolicy::Bounded {
            timeout_ms,
            retry_delay_ms: AVR_RETRY_DELAY_MS,
        }
    }

    pub fn unbounded(cancel: CancelToken) -> Self {
        RetryPolicy::Unbounded {
            retry_delay_ms: AVR_RETRY_DELAY_MS,
            cancel,
        }
    }

    /// Maximum number of polls, `None` when unbounded.
    pub fn max_polls(&self) -> Option<u64> {
        match self {
            RetryPolicy::Bounded {
                timeout_ms,
                retry_delay_ms,
            } => Some(timeout_ms.div_ceil((*retry_delay_ms).max(1))),
            RetryPolicy::Unbounded { .. } => None,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        match self {
            RetryPolicy::Bounded { retry_delay_ms, .. }
            | RetryPolicy::Unbounded { retry_delay_ms, .. } => {
                Duration::from_millis(*retry_delay_ms)
            }
        }
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        match self {
            RetryPolicy::Bounded { timeout_ms, .. } => Some(*timeout_ms),
            RetryPolicy::Unbounded { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            RetryPolicy::Bounded { .. } => false,
            RetryPolicy::Unbounded { cancel, .. } => cancel.is_cancelled(),
        }
    }
}
