//! Observer seam for UI decoupling.
//!
//! Lets a CLI or GUI watch frame traffic and exchange progress without
//! tight coupling to the channel logic.

use std::fmt;
use std::sync::Mutex;

use crate::state::ExchangeState;

/// HID frame direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted by an [`AvrCommandChannel`](crate::avr::AvrCommandChannel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Frame size settled after negotiation.
    FrameSizeNegotiated { frame_size: usize },
    /// Exchange state changed.
    StateChanged {
        from: ExchangeState,
        to: ExchangeState,
    },
    /// HID frame sent or received.
    Frame {
        direction: PacketDirection,
        kind: &'static str,
        length: usize,
    },
    /// Device still busy after a response poll.
    Busy { polls: u64 },
    /// Response fragment delivered.
    ResponseFragment { index: u8, total: u8, length: usize },
    /// Device event received.
    DeviceEvent { length: usize },
    /// Exchange failed.
    Error { message: String },
}

/// Observer trait for receiving channel events.
pub trait ChannelObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &ChannelEvent);
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl ChannelObserver for TracingObserver {
    fn on_event(&self, event: &ChannelEvent) {
        match event {
            ChannelEvent::FrameSizeNegotiated { frame_size } => {
                tracing::info!(frame_size, "Frame size negotiated");
            }
            ChannelEvent::StateChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Exchange state changed");
            }
            ChannelEvent::Frame {
                direction,
                kind,
                length,
            } => {
                tracing::trace!(dir = %direction, type_ = %kind, len = length, "HID frame");
            }
            ChannelEvent::Busy { polls } => {
                tracing::trace!(polls, "Device busy");
            }
            ChannelEvent::ResponseFragment {
                index,
                total,
                length,
            } => {
                tracing::debug!(index, total, len = length, "Response fragment");
            }
            ChannelEvent::DeviceEvent { length } => {
                tracing::debug!(len = length, "Device event");
            }
            ChannelEvent::Error { message } => {
                tracing::error!("Exchange failed: {}", message);
            }
        }
    }
}

/// Observer that records every event, for tests and replay.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ChannelEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ChannelEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ChannelObserver for RecordingObserver {
    fn on_event(&self, event: &ChannelEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer() {
        let observer = RecordingObserver::new();
        observer.on_event(&ChannelEvent::Busy { polls: 1 });
        observer.on_event(&ChannelEvent::StateChanged {
            from: ExchangeState::Idle,
            to: ExchangeState::Sending,
        });

        let events = observer.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ChannelEvent::Busy { polls: 1 });
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(PacketDirection::Tx.to_string(), "TX");
        assert_eq!(PacketDirection::Rx.to_string(), "RX");
    }
}
