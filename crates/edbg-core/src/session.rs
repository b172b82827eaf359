//! Probe session: configuration and connect orchestration.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::avr::AvrCommandChannel;
use crate::device::{DeviceDescriptor, DeviceRegistry};
use crate::negotiate::{FrameSizeNegotiator, NegotiationStrategy};
use crate::observer::{ChannelEvent, ChannelObserver, TracingObserver};
use crate::protocol::constants::{AVR_DEFAULT_TIMEOUT_MS, AVR_RETRY_DELAY_MS};
use crate::retry::{CancelToken, RetryPolicy};
use crate::transport::{FrameTransport, HidApiTransport, ReadMode, TransportError};

/// Whether response polling gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    #[default]
    Bounded,
    Unbounded,
}

/// Channel tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Response timeout in milliseconds (bounded mode).
    pub timeout_ms: u64,
    /// Delay between response polls in milliseconds.
    pub retry_delay_ms: u64,
    pub retry: RetryMode,
    /// Override the host default negotiation strategy.
    pub negotiation: Option<NegotiationStrategy>,
    pub read_mode: ReadMode,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timeout_ms: AVR_DEFAULT_TIMEOUT_MS,
            retry_delay_ms: AVR_RETRY_DELAY_MS,
            retry: RetryMode::Bounded,
            negotiation: None,
            read_mode: ReadMode::Blocking,
        }
    }
}

impl ChannelConfig {
    pub fn retry_policy(&self, cancel: CancelToken) -> RetryPolicy {
        match self.retry {
            RetryMode::Bounded => RetryPolicy::Bounded {
                timeout_ms: self.timeout_ms,
                retry_delay_ms: self.retry_delay_ms,
            },
            RetryMode::Unbounded => RetryPolicy::Unbounded {
                retry_delay_ms: self.retry_delay_ms,
                cancel,
            },
        }
    }

    pub fn negotiation_strategy(&self) -> NegotiationStrategy {
        self.negotiation.unwrap_or_else(NegotiationStrategy::for_host)
    }
}

/// Configuration for a probe session.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Exact USB serial number of the tool.
    pub serial_number: Option<String>,
    /// Tool short name (`atmelice`) or product string fragment.
    pub product: Option<String>,
    pub channel: ChannelConfig,
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: SessionConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Turns a [`SessionConfig`] into an open, negotiated command channel.
pub struct ProbeSession {
    config: SessionConfig,
    negotiator: FrameSizeNegotiator,
    observer: Arc<dyn ChannelObserver>,
    cancel: CancelToken,
}

impl ProbeSession {
    pub fn new(config: SessionConfig) -> Self {
        let negotiator = FrameSizeNegotiator::new(config.channel.negotiation_strategy());
        Self {
            config,
            negotiator,
            observer: Arc::new(TracingObserver),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ChannelObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_negotiator(mut self, negotiator: FrameSizeNegotiator) -> Self {
        self.negotiator = negotiator;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Token stopping unbounded polling on channels opened by this session.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Pick the configured tool out of an enumeration result.
    pub fn select(&self, registry: DeviceRegistry) -> Result<DeviceDescriptor, TransportError> {
        registry.select(
            self.config.serial_number.as_deref(),
            self.config.product.as_deref(),
        )
    }

    /// Enumerate, select, negotiate and open the configured tool.
    #[instrument(level = "info", skip(self))]
    pub fn connect(&self) -> Result<AvrCommandChannel<HidApiTransport>, TransportError> {
        let registry = DeviceRegistry::enumerate()?;
        info!(count = registry.len(), "CMSIS-DAP tools found");
        let device = self.select(registry)?;
        let channel = self.open_with(device, HidApiTransport::open)?;
        channel.transport().log_info()?;
        Ok(channel)
    }

    /// Negotiate around `open` and wrap the transport in a channel.
    pub fn open_with<T, F>(
        &self,
        mut device: DeviceDescriptor,
        open: F,
    ) -> Result<AvrCommandChannel<T>, TransportError>
    where
        T: FrameTransport,
        F: FnOnce(DeviceDescriptor, ReadMode) -> Result<T, TransportError>,
    {
        self.negotiator.before_open(&mut device);
        let mut transport = open(device, self.config.channel.read_mode)?;
        let frame_size = self.negotiator.after_open(&mut transport);
        self.observer
            .on_event(&ChannelEvent::FrameSizeNegotiated { frame_size });

        let policy = self.config.channel.retry_policy(self.cancel.clone());
        Ok(AvrCommandChannel::new(transport, policy).with_observer(self.observer.clone()))
    }
}
