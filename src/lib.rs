//! Swarmhub — a Unix-socket hub that lets one sandboxed coding agent (the
//! *director*, address 0) spawn, message, and supervise a tree of
//! subordinate sandboxed agents (*helpers*), each of which may spawn
//! further helpers.
//!
//! Three pieces:
//!
//! - [`addressing`] — collision-free B-ary tree numbering usable without a
//!   central allocator: each agent computes its children's addresses from
//!   its own.
//! - [`hub`] — the server: accepts connections on a local socket, binds
//!   addresses, routes `send`/`broadcast` payloads, and delegates container
//!   lifecycle to a [`runtime::ContainerRuntime`].
//! - [`client`] — the library used inside helper containers: register,
//!   spawn children, exchange payloads, or fire one-shot commands.
//!
//! The wire format is one compact JSON object per newline-terminated
//! frame; see [`protocol`].

pub mod addressing;
pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod msglog;
pub mod protocol;
pub mod runtime;

pub use addressing::{Address, Breadth};
pub use client::{send_request, HelperConnection};
pub use config::Config;
pub use error::HubError;
pub use hub::{Hub, HubOptions};
pub use msglog::MessageLog;
pub use protocol::{Event, Request, Response, Status};
pub use runtime::{CommandRuntime, ContainerRuntime};
