//! USB/serial byte channel.
//!
//! Z-Wave controller dongles present a USB CDC serial port; this module
//! provides the [`ByteChannel`] implementation for it.

use std::future::Future;
use std::pin::Pin;

use tokio_serial::SerialPortBuilderExt;

use crate::error::{Error, Result};
use crate::transport::{ByteChannel, ChannelReader, ChannelWriter};

/// Default baud rate for Z-Wave serial controllers.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Configuration for the serial channel.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub path: String,
    /// Baud rate.
    pub baud_rate: u32,
}

impl SerialConfig {
    /// Creates a configuration with the default 115200 8-N-1 settings.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }
}

/// Serial [`ByteChannel`] built on `tokio-serial`.
pub struct SerialChannel {
    config: SerialConfig,
}

impl SerialChannel {
    /// Creates a channel for the given configuration (not yet opened).
    #[must_use]
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }

    /// Creates a channel for the given port with default settings.
    #[must_use]
    pub fn with_path(path: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(path))
    }
}

impl ByteChannel for SerialChannel {
    fn open(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<(ChannelReader, ChannelWriter)>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!("opening serial port: {}", self.config.path);

            let stream = tokio_serial::new(&self.config.path, self.config.baud_rate)
                .open_native_async()
                .map_err(Error::Serial)?;

            let (reader, writer) = tokio::io::split(stream);
            Ok((
                Box::new(reader) as ChannelReader,
                Box::new(writer) as ChannelWriter,
            ))
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!("closed serial port: {}", self.config.path);
            Ok(())
        })
    }
}

/// Lists available serial ports.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
