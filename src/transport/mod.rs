//! Byte-stream transport layer.
//!
//! The controller state machine is written against an injectable byte
//! channel so the protocol logic stays independent of the USB serial
//! plumbing. Opening a channel yields separate read and write halves: the
//! reader worker owns one, the dispatcher worker the other.

pub mod serial;

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Reading end of an open channel.
pub type ChannelReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writing end of an open channel.
pub type ChannelWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An openable duplex byte stream.
///
/// Implementations only move bytes; framing, timeouts and retries all live
/// above this trait. `open` after `close` must yield a fully fresh stream.
pub trait ByteChannel: Send + 'static {
    /// Opens the channel and returns its two halves.
    fn open(&mut self)
        -> Pin<Box<dyn Future<Output = Result<(ChannelReader, ChannelWriter)>> + Send + '_>>;

    /// Closes the channel. Dropping the halves releases the stream; this
    /// hook exists for implementations with extra teardown.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

pub use serial::{SerialChannel, SerialConfig};
