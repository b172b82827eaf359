//! Protocol module - CMSIS-DAP and AVR vendor protocol definitions.

pub mod constants;
pub mod fragment;
pub mod frame;

pub use constants::*;
pub use fragment::{
    FragmentInfo, ResponseFragment, ResponsePoll, decode_command_ack, decode_event,
    decode_response_poll, fragment_command, fragment_count, payload_capacity,
};
pub use frame::pad_frame;
