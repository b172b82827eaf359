//! State machine for one AVR command/response exchange.

use std::fmt;

/// Exchange state of the fragmented command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    /// No exchange has run yet.
    #[default]
    Idle,
    /// Command fragments are being sent and acknowledged.
    Sending,
    /// Polling until the first response fragment arrives.
    AwaitingCompletion,
    /// Pulling the remaining response fragments.
    ReassemblingResponse,
    /// Full response delivered.
    Done,
    /// Exchange aborted with an error.
    Failed,
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeState::Idle => write!(f, "IDLE"),
            ExchangeState::Sending => write!(f, "SENDING"),
            ExchangeState::AwaitingCompletion => write!(f, "AWAITING_COMPLETION"),
            ExchangeState::ReassemblingResponse => write!(f, "REASSEMBLING_RESPONSE"),
            ExchangeState::Done => write!(f, "DONE"),
            ExchangeState::Failed => write!(f, "FAILED"),
        }
    }
}

impl ExchangeState {
    /// Check if the exchange has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeState::Done | ExchangeState::Failed)
    }

    /// Check if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: ExchangeState) -> bool {
        use ExchangeState::*;
        match (self, next) {
            (_, Failed) => !self.is_terminal() && *self != Idle,
            (Idle | Done | Failed, Sending) => true,
            (Sending, AwaitingCompletion) => true,
            (AwaitingCompletion, ReassemblingResponse) => true,
            (AwaitingCompletion | ReassemblingResponse, Done) => true,
            _ => false,
        }
    }
}

/// Progress of the response side of one exchange.
#[derive(Debug, Default)]
pub struct ReassemblyTracker {
    /// Total response fragments announced by the first fragment.
    pub total_fragments: usize,
    /// Fragments received so far.
    pub received_fragments: usize,
    /// Completion polls issued so far (busy replies included).
    pub polls: u64,
}

impl ReassemblyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fragment(&mut self, total: usize) {
        if self.received_fragments == 0 {
            self.total_fragments = total;
        }
        self.received_fragments += 1;
    }

    pub fn remaining(&self) -> usize {
        self.total_fragments.saturating_sub(self.received_fragments)
    }

    pub fn is_done(&self) -> bool {
        self.received_fragments > 0 && self.remaining() == 0
    }
}
