//! Fragmented command/response exchange.

use std::thread;

use tracing::{debug, instrument};

use super::AvrCommandChannel;
use crate::error::{ChannelError, ProtocolError};
use crate::observer::ChannelEvent;
use crate::protocol::{
    AVR_FINAL_FRAGMENT, AVR_MORE_FRAGMENTS, AVR_RESPONSE, ResponseFragment, ResponsePoll,
    decode_command_ack, decode_response_poll, fragment_command,
};
use crate::state::{ExchangeState, ReassemblyTracker};
use crate::transport::FrameTransport;

impl<T: FrameTransport> AvrCommandChannel<T> {
    /// Send an AVR command and return the reassembled response.
    ///
    /// The command is split into at most 15 fragments at the current frame
    /// size. On any error the exchange ends in [`ExchangeState::Failed`] and
    /// no partial response is returned.
    #[instrument(level = "debug", skip(self, command), fields(len = command.len(), frame_size = self.frame_size()))]
    pub fn command_response(&mut self, command: &[u8]) -> Result<Vec<u8>, ChannelError> {
        match self.run_exchange(command) {
            Ok(response) => {
                self.goto_state(ExchangeState::Done);
                debug!(len = response.len(), "AVR response complete");
                Ok(response)
            }
            Err(e) => {
                self.observer.on_event(&ChannelEvent::Error {
                    message: e.to_string(),
                });
                self.goto_state(ExchangeState::Failed);
                Err(e)
            }
        }
    }

    fn run_exchange(&mut self, command: &[u8]) -> Result<Vec<u8>, ChannelError> {
        self.goto_state(ExchangeState::Sending);
        // A command sent now would leave its response unread for the next exchange
        if self.policy.is_cancelled() {
            return Err(ChannelError::Cancelled { polls: 0 });
        }
        self.send_command(command)?;

        self.goto_state(ExchangeState::AwaitingCompletion);
        let mut tracker = ReassemblyTracker::new();
        let first = self.receive_fragment(&mut tracker)?;
        tracker.record_fragment(first.info.total() as usize);
        let mut response = first.payload;

        if !tracker.is_done() {
            self.goto_state(ExchangeState::ReassemblingResponse);
        }
        while !tracker.is_done() {
            let fragment = self.receive_fragment(&mut tracker)?;
            tracker.record_fragment(fragment.info.total() as usize);
            response.extend_from_slice(&fragment.payload);
        }

        debug!(
            fragments = tracker.received_fragments,
            polls = tracker.polls,
            "AVR response reassembled"
        );
        Ok(response)
    }

    fn send_command(&self, command: &[u8]) -> Result<(), ChannelError> {
        let fragments = fragment_command(command, self.frame_size())?;
        let last = fragments.len() - 1;
        debug!(fragments = fragments.len(), "Sending AVR command");

        for (i, fragment) in fragments.iter().enumerate() {
            let reply = self.transfer("AVR_CMD", fragment)?;
            let code = decode_command_ack(&reply)?;
            if i == last {
                if code != AVR_FINAL_FRAGMENT {
                    return Err(ProtocolError::InvalidFinalAck(code).into());
                }
            } else if code != AVR_MORE_FRAGMENTS {
                return Err(ProtocolError::InvalidNonFinalAck(code).into());
            }
        }
        Ok(())
    }

    /// Poll until one response fragment arrives, within the retry budget.
    fn receive_fragment(
        &self,
        tracker: &mut ReassemblyTracker,
    ) -> Result<ResponseFragment, ChannelError> {
        let max_polls = self.policy.max_polls();
        let delay = self.policy.retry_delay();
        let mut polls: u64 = 0;

        loop {
            if max_polls.is_some_and(|max| polls >= max) {
                return Err(ChannelError::Timeout {
                    polls,
                    timeout_ms: self.policy.timeout_ms().unwrap_or_default(),
                });
            }
            if self.policy.is_cancelled() {
                return Err(ChannelError::Cancelled { polls });
            }
            if polls > 0 {
                thread::sleep(delay);
            }

            let frame = self.transfer("AVR_RSP", &[AVR_RESPONSE])?;
            polls += 1;
            tracker.polls += 1;

            match decode_response_poll(&frame)? {
                ResponsePoll::Fragment(fragment) => {
                    self.observer.on_event(&ChannelEvent::ResponseFragment {
                        index: fragment.info.index(),
                        total: fragment.info.total(),
                        length: fragment.payload.len(),
                    });
                    return Ok(fragment);
                }
                ResponsePoll::Busy => {
                    self.observer.on_event(&ChannelEvent::Busy { polls });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tracing_test::traced_test;

    use super::*;
    use crate::observer::{ChannelObserver, RecordingObserver};
    use crate::protocol::{AVR_COMMAND, FragmentInfo};
    use crate::retry::{CancelToken, RetryPolicy};
    use crate::transport::{MockTransport, TransportError};

    const ACK_MORE: [u8; 2] = [AVR_COMMAND, AVR_MORE_FRAGMENTS];
    const ACK_FINAL: [u8; 2] = [AVR_COMMAND, AVR_FINAL_FRAGMENT];
    const BUSY: [u8; 2] = [AVR_RESPONSE, 0x00];

    fn response_frame(index: u8, total: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![AVR_RESPONSE, FragmentInfo::new(index, total).raw()];
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    fn channel_with(mock: &MockTransport, policy: RetryPolicy) -> AvrCommandChannel<MockTransport> {
        AvrCommandChannel::new(mock.clone(), policy)
    }

    #[test]
    fn test_two_fragment_exchange_at_high_speed() {
        let mut mock = MockTransport::new();
        mock.set_frame_size(512);

        mock.queue_response(&ACK_MORE);
        mock.queue_response(&ACK_FINAL);
        for _ in 0..3 {
            mock.queue_response(&BUSY);
        }
        mock.queue_response(&response_frame(1, 2, &[0xAA; 300]));
        mock.queue_response(&response_frame(2, 2, &[0xBB; 50]));

        let mut channel = channel_with(&mock, RetryPolicy::default());
        let command: Vec<u8> = (0..700).map(|i| i as u8).collect();
        let response = channel.command_response(&command).unwrap();

        assert_eq!(response.len(), 350);
        assert!(response[..300].iter().all(|&b| b == 0xAA));
        assert!(response[300..].iter().all(|&b| b == 0xBB));
        assert_eq!(channel.state(), ExchangeState::Done);

        let writes = mock.get_writes();
        // Two command fragments then five response polls
        assert_eq!(writes.len(), 7);
        assert_eq!(&writes[0][..4], &[AVR_COMMAND, 0x12, 0x01, 0xFC]);
        assert_eq!(&writes[1][..4], &[AVR_COMMAND, 0x22, 0x00, 0xC0]);
        assert_eq!(&writes[1][4..196], &command[508..]);
        assert!(writes[2..].iter().all(|w| w[0] == AVR_RESPONSE));
        assert_eq!(mock.pending_responses(), 0);
    }

    #[test]
    fn test_single_fragment_exchange() {
        let mock = MockTransport::new();
        mock.queue_response(&ACK_FINAL);
        mock.queue_response(&response_frame(1, 1, &[0x80, 0x00]));

        let observer = Arc::new(RecordingObserver::new());
        let mut channel =
            channel_with(&mock, RetryPolicy::default()).with_observer(observer.clone());
        let response = channel.command_response(&[0x01, 0x02]).unwrap();
        assert_eq!(response, vec![0x80, 0x00]);
        assert_eq!(channel.state(), ExchangeState::Done);

        let states: Vec<_> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ChannelEvent::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                ExchangeState::Sending,
                ExchangeState::AwaitingCompletion,
                ExchangeState::Done
            ]
        );
    }

    #[test]
    fn test_poll_budget_exhausted() {
        let mock = MockTransport::new();
        mock.queue_response(&ACK_FINAL);
        for _ in 0..5 {
            mock.queue_response(&BUSY);
        }

        let policy = RetryPolicy::Bounded {
            timeout_ms: 200,
            retry_delay_ms: 50,
        };
        let mut channel = channel_with(&mock, policy);
        let err = channel.command_response(&[0x01]).unwrap_err();

        assert!(matches!(
            err,
            ChannelError::Timeout {
                polls: 4,
                timeout_ms: 200
            }
        ));
        assert!(err.is_timeout());
        assert_eq!(channel.state(), ExchangeState::Failed);
        // One command fragment plus exactly four polls
        assert_eq!(mock.get_writes().len(), 5);
        assert_eq!(mock.pending_responses(), 1);
    }

    #[test]
    fn test_final_ack_on_non_final_fragment() {
        let mock = MockTransport::new();
        mock.queue_response(&ACK_FINAL);

        let mut channel = channel_with(&mock, RetryPolicy::default());
        let err = channel.command_response(&[0u8; 100]).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::InvalidNonFinalAck(AVR_FINAL_FRAGMENT))
        ));
        assert_eq!(channel.state(), ExchangeState::Failed);
        assert_eq!(mock.get_writes().len(), 1);
    }

    #[test]
    fn test_more_ack_on_final_fragment() {
        let mock = MockTransport::new();
        mock.queue_response(&ACK_MORE);

        let mut channel = channel_with(&mock, RetryPolicy::default());
        let err = channel.command_response(&[0x01]).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::InvalidFinalAck(AVR_MORE_FRAGMENTS))
        ));
    }

    #[test]
    fn test_foreign_ack_token() {
        let mock = MockTransport::new();
        mock.queue_response(&[0x00, 0x01]);

        let mut channel = channel_with(&mock, RetryPolicy::default());
        let err = channel.command_response(&[0x01]).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::InvalidCommandToken(0x00))
        ));
    }

    #[test]
    #[traced_test]
    fn test_failure_logged_once() {
        let mock = MockTransport::new();
        mock.queue_response(&[0x00, 0x01]);

        let mut channel = channel_with(&mock, RetryPolicy::default());
        assert!(channel.command_response(&[0x01]).is_err());
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.to_lowercase().contains("exchange failed"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one failure log, got {n}")),
            }
        });
    }

    #[test]
    fn test_wrong_response_token() {
        let mock = MockTransport::new();
        mock.queue_response(&ACK_FINAL);
        mock.queue_response(&ACK_FINAL);

        let mut channel = channel_with(&mock, RetryPolicy::default());
        let err = channel.command_response(&[0x01]).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::InvalidResponseToken(AVR_COMMAND))
        ));
    }

    #[test]
    fn test_oversized_response_is_fatal() {
        let mock = MockTransport::new();
        mock.queue_response(&ACK_FINAL);
        mock.queue_response(&[AVR_RESPONSE, 0x11, 0x00, 100]);

        let mut channel = channel_with(&mock, RetryPolicy::default());
        let err = channel.command_response(&[0x01]).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::ResponseSizeMismatch {
                declared: 100,
                available: 60
            })
        ));
        assert_eq!(channel.state(), ExchangeState::Failed);
    }

    #[test]
    fn test_too_many_fragments_sends_nothing() {
        let mock = MockTransport::new();
        let mut channel = channel_with(&mock, RetryPolicy::default());

        let err = channel.command_response(&[0u8; 15 * 60 + 1]).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::TooManyFragments { count: 16, .. })
        ));
        assert!(mock.get_writes().is_empty());
        assert_eq!(channel.state(), ExchangeState::Failed);
    }

    #[test]
    fn test_partial_response_is_discarded() {
        let mock = MockTransport::new();
        mock.queue_response(&ACK_FINAL);
        mock.queue_response(&response_frame(1, 3, &[0x11; 10]));
        // Queue runs dry before the second fragment

        let mut channel = channel_with(&mock, RetryPolicy::default());
        let err = channel.command_response(&[0x01]).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Transport(TransportError::Timeout { .. })
        ));
        assert_eq!(channel.state(), ExchangeState::Failed);
    }

    #[test]
    fn test_channel_recovers_after_failure() {
        let mock = MockTransport::new();
        mock.queue_response(&[0x00, 0x00]);
        mock.queue_response(&ACK_FINAL);
        mock.queue_response(&response_frame(1, 1, &[0x42]));

        let mut channel = channel_with(&mock, RetryPolicy::default());
        assert!(channel.command_response(&[0x01]).is_err());
        assert_eq!(channel.command_response(&[0x01]).unwrap(), vec![0x42]);
        assert_eq!(channel.state(), ExchangeState::Done);
    }

    struct CancelAfter {
        token: CancelToken,
        polls: u64,
    }

    impl ChannelObserver for CancelAfter {
        fn on_event(&self, event: &ChannelEvent) {
            if let ChannelEvent::Busy { polls } = event
                && *polls >= self.polls
            {
                self.token.cancel();
            }
        }
    }

    #[test]
    fn test_cancelled_before_send_writes_nothing() {
        let mock = MockTransport::new();
        mock.queue_response(&ACK_FINAL);
        mock.queue_response(&response_frame(1, 1, &[0x42]));

        let token = CancelToken::new();
        token.cancel();
        let mut channel = channel_with(&mock, RetryPolicy::unbounded(token.clone()));

        let err = channel.command_response(&[0x01]).unwrap_err();
        assert!(matches!(err, ChannelError::Cancelled { polls: 0 }));
        assert!(mock.get_writes().is_empty());
        assert_eq!(mock.pending_responses(), 2);
        assert_eq!(channel.state(), ExchangeState::Failed);

        // Nothing stale is left behind for the next exchange
        token.reset();
        assert_eq!(channel.command_response(&[0x01]).unwrap(), vec![0x42]);
    }

    #[test]
    fn test_unbounded_polling_cancelled() {
        let mock = MockTransport::new();
        mock.queue_response(&ACK_FINAL);
        for _ in 0..10 {
            mock.queue_response(&BUSY);
        }

        let token = CancelToken::new();
        let observer = Arc::new(CancelAfter {
            token: token.clone(),
            polls: 2,
        });
        let mut channel =
            channel_with(&mock, RetryPolicy::unbounded(token)).with_observer(observer);

        let err = channel.command_response(&[0x01]).unwrap_err();
        assert!(matches!(err, ChannelError::Cancelled { polls: 2 }));
        assert_eq!(mock.pending_responses(), 8);
    }
}
