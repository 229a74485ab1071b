//! Built-in [`Transport`](crate::Transport) implementations.
//!
//! | Feature         | Platform | Transport        |
//! |-----------------|----------|------------------|
//! | `transport-ipc` | unix     | [`IpcTransport`] |

#[cfg(all(unix, feature = "transport-ipc"))]
pub mod ipc;

#[cfg(all(unix, feature = "transport-ipc"))]
pub use ipc::IpcTransport;
