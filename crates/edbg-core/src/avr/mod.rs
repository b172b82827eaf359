//! AVR command channel over CMSIS-DAP vendor commands.
//!
//! Wraps a [`FrameTransport`] and layers the fragmented AVR command/response
//! protocol and event polling on top of plain frame transfers.

mod command;
mod event;

use std::sync::Arc;

use tracing::trace;

use crate::error::ChannelError;
use crate::observer::{ChannelEvent, ChannelObserver, PacketDirection, TracingObserver};
use crate::retry::RetryPolicy;
use crate::state::ExchangeState;
use crate::transport::{FrameTransport, TransportError};

/// Exclusive owner of one open device handle.
///
/// All exchanges take `&mut self`, so one channel never runs two exchanges
/// at once and the transport is never shared.
pub struct AvrCommandChannel<T: FrameTransport> {
    transport: T,
    policy: RetryPolicy,
    state: ExchangeState,
    observer: Arc<dyn ChannelObserver>,
}

impl<T: FrameTransport> AvrCommandChannel<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        tracing::debug!(frame_size = transport.frame_size(), "Created AVR command channel");
        Self {
            transport,
            policy,
            state: ExchangeState::Idle,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the default tracing observer.
    pub fn with_observer(mut self, observer: Arc<dyn ChannelObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Negotiated frame size of the underlying transport.
    pub fn frame_size(&self) -> usize {
        self.transport.frame_size()
    }

    /// State of the most recent exchange.
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send one raw CMSIS-DAP command and return the raw reply frame.
    pub fn dap_command_response(&mut self, command: &[u8]) -> Result<Vec<u8>, ChannelError> {
        Ok(self.transfer("DAP", command)?)
    }

    /// Write-then-read one frame, reporting both directions to the observer.
    fn transfer(&self, kind: &'static str, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        trace!(kind, len = data.len(), "Frame transfer");
        self.transport.write_frame(data)?;
        self.observer.on_event(&ChannelEvent::Frame {
            direction: PacketDirection::Tx,
            kind,
            length: data.len(),
        });

        let frame = self.transport.read_frame()?;
        self.observer.on_event(&ChannelEvent::Frame {
            direction: PacketDirection::Rx,
            kind,
            length: frame.len(),
        });
        Ok(frame)
    }

    fn goto_state(&mut self, new_state: ExchangeState) {
        debug_assert!(
            self.state.can_transition_to(new_state),
            "illegal transition {} -> {}",
            self.state,
            new_state
        );
        tracing::debug!(from = %self.state, to = %new_state, "State transition");
        self.observer.on_event(&ChannelEvent::StateChanged {
            from: self.state,
            to: new_state,
        });
        self.state = new_state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;
    use crate::transport::MockTransport;

    #[test]
    fn test_dap_command_passthrough() {
        let mock = MockTransport::new();
        mock.queue_response(&[0x00, 0x02, 0x40, 0x00]);

        let observer = Arc::new(RecordingObserver::new());
        let mut channel = AvrCommandChannel::new(mock.clone(), RetryPolicy::default())
            .with_observer(observer.clone());

        let reply = channel.dap_command_response(&[0x00, 0xFF]).unwrap();
        assert_eq!(&reply[..4], &[0x00, 0x02, 0x40, 0x00]);
        assert_eq!(mock.get_writes()[0][..2], [0x00, 0xFF]);
        // Raw commands do not touch the exchange state
        assert_eq!(channel.state(), ExchangeState::Idle);

        let events = observer.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            ChannelEvent::Frame {
                direction: PacketDirection::Rx,
                length: 64,
                ..
            }
        ));
    }

    #[test]
    fn test_transport_error_propagates() {
        let mock = MockTransport::new();
        mock.disconnect();
        let mut channel = AvrCommandChannel::new(mock, RetryPolicy::default());
        assert!(matches!(
            channel.dap_command_response(&[0x00, 0x01]),
            Err(ChannelError::Transport(TransportError::Disconnected))
        ));
    }
}
