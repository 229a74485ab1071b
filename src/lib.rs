//! # Rich Presence Client
//!
//! Embeddable client runtime for a desktop chat client's local RPC endpoint.
//!
//! The client keeps a persistent session with the local peer over an
//! inter-process channel, reconnecting with exponential backoff. The embedding
//! application (usually a game main loop) queues presence updates without
//! blocking and receives peer events through callbacks it runs on its own
//! thread.
//!
//! ## Features
//!
//! - **Non-blocking producers**: requests are encoded into a fixed-size,
//!   lock-free send queue; a full queue is reported as `false`
//! - **Consumer-driven callbacks**: inbound events wait in a last-value-wins
//!   mailbox until [`RpcClient::run_callbacks`] is called
//! - **Background or manual I/O**: the default `io-thread` feature runs the
//!   connection on a dedicated thread; [`IoMode::Manual`] leaves ticking to
//!   the embedder
//! - **Transport-agnostic**: implement [`Transport`] for any framed channel;
//!   the `transport-ipc` feature provides the unix socket transport
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rich_presence_client::{EventHandlers, RichPresence, RpcClient, RpcConfig};
//!
//! # fn main() -> rich_presence_client::Result<()> {
//! let mut client = RpcClient::connect(
//!     RpcConfig::new("345229890980937739"),
//!     EventHandlers::new().on_ready(|| println!("ready")),
//! )?;
//! client.update_presence(
//!     &RichPresence::new()
//!         .with_details("Ranked match")
//!         .with_party("party-1", 2, 4),
//! );
//! client.run_callbacks();
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod client;
pub mod error;
pub mod error_codes;
pub mod fixed_str;
pub mod handlers;
#[cfg(feature = "io-thread")]
mod io_loop;
pub mod mailbox;
pub mod protocol;
pub mod send_queue;
mod shared;
pub mod supervisor;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use backoff::Backoff;
pub use client::{IoMode, PresenceHandle, RpcClient, RpcConfig};
pub use error::{Result, RpcError, TransportError};
pub use error_codes::ErrorCode;
pub use handlers::EventHandlers;
pub use protocol::{RichPresence, Subscription};
pub use transport::{OpenStatus, Transport};
