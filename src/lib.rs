//! # zwave
//!
//! An async Rust client library for Z-Wave USB serial controllers.
//!
//! The controller dongle bridges the host to a radio mesh of up to 232
//! nodes. This crate turns its raw serial byte stream into reliable,
//! concurrent, per-node command/response interactions.
//!
//! ## Quick start
//!
//! ```no_run
//! use zwave::Network;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), zwave::Error> {
//!     let network = Network::serial("/dev/ttyUSB0");
//!     network.open().await?;
//!     network.initialize().await?;
//!
//!     if let Some(node) = network.get_node(5).await {
//!         node.load(None).await?;
//!         if let Some(switch) = node.binary_switch().await {
//!             switch.on().await?;
//!         }
//!     }
//!
//!     network.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Three layers sit between the serial port and the typed node API:
//!
//! - [`protocol`] - frame codec, incremental parser, message types
//! - [`controller`] - request/ACK/response state machine over the wire
//! - [`network`] / [`node`] - node table, unsolicited-report routing and
//!   the per-node command-class façades
//!
//! The byte stream itself is injectable through [`transport::ByteChannel`],
//! with the `tokio-serial` implementation in [`transport::serial`].

pub mod controller;
pub mod error;
pub mod network;
pub mod node;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use controller::SerialController;
pub use error::{Error, FrameError, Result};
pub use network::Network;
pub use node::{ApplicationCommandData, CommandData, Node, SubscriberToken};
pub use protocol::{Packet, PacketType, Parser, Preamble};
pub use transport::{ByteChannel, SerialChannel, SerialConfig};
