//! Transport layer module.

pub mod hidapi;
pub mod mock;
pub mod traits;

pub use self::hidapi::HidApiTransport;
pub use mock::MockTransport;
pub use traits::{FrameTransport, ReadMode, TransportError};
