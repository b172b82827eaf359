//! edbg-core: AVR command channel over CMSIS-DAP HID in Rust.
//!
//! This crate talks to Atmel/Microchip debuggers (EDBG, Atmel-ICE, PICkit 4,
//! nEDBG, ...) through their CMSIS-DAP HID interface and carries the AVR
//! vendor command protocol on top: fragmented commands, polled and
//! reassembled responses, and asynchronous device events.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, frame padding, AVR fragment encoding
//! - **Transport**: Fixed-size HID frame I/O (hidapi, mock)
//! - **Device**: Enumeration, filtering and selection of tools
//! - **Negotiate**: HID report size detection for dual-configuration tools
//! - **AVR**: Command/response and event channel
//! - **DAP**: `DAP_Info` queries
//! - **Observer**: Event seam for UI decoupling
//! - **Session**: Configuration and connect orchestration
//!
//! # Example
//!
//! ```no_run
//! use edbg_core::session::{ProbeSession, SessionConfig};
//!
//! let config = SessionConfig {
//!     product: Some("atmelice".to_string()),
//!     ..Default::default()
//! };
//!
//! let mut channel = ProbeSession::new(config).connect().expect("no tool");
//! let response = channel.command_response(&[0x01, 0x00, 0x00]).expect("exchange failed");
//! ```

pub mod avr;
pub mod dap;
pub mod device;
pub mod error;
pub mod negotiate;
pub mod observer;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod state;
pub mod toolinfo;
pub mod transport;

// Re-exports for convenience
pub use avr::AvrCommandChannel;
pub use dap::ToolIdentity;
pub use device::{DeviceDescriptor, DeviceRegistry};
pub use error::{ChannelError, ProtocolError};
pub use negotiate::{FrameSizeNegotiator, NegotiationError, NegotiationStrategy};
pub use observer::{ChannelEvent, ChannelObserver, TracingObserver};
pub use retry::{CancelToken, RetryPolicy};
pub use session::{ChannelConfig, ProbeSession, SessionConfig};
pub use state::ExchangeState;
pub use transport::{FrameTransport, HidApiTransport, MockTransport, ReadMode, TransportError};
