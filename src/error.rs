//! Crate-wide failure taxonomy.
//!
//! Request-scoped failures (registration, routing, ownership, runtime) are
//! converted to `{status: "error", message}` responses by the hub; transport
//! failures surface directly to the caller since no response frame can be
//! produced for them.

use thiserror::Error;

use crate::addressing::Address;

/// Errors produced by the hub, the client, and the addressing arithmetic.
#[derive(Debug, Error)]
pub enum HubError {
    /// Breadth value is neither positive nor the `-1` unbounded sentinel.
    #[error("breadth must be positive or -1, got {0}")]
    InvalidBreadth(i64),

    /// Child index outside `[0, effective_breadth)`.
    #[error("child index {index} out of range for breadth {breadth}")]
    ChildIndexOutOfRange {
        /// Requested 0-based child index.
        index: u64,
        /// Effective breadth the index was checked against.
        breadth: u64,
    },

    /// Malformed frame or missing required field; scoped to one request.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Duplicate or invalid address at `register` time.
    #[error("registration failed: {0}")]
    Registration(String),

    /// `send`/`broadcast` target unknown or disconnected.
    #[error("{0}")]
    Routing(String),

    /// `spawn` target outside the caller's child range.
    #[error("address {address} outside child range [{first}, {last}] of caller {caller}")]
    AddressNotOwned {
        /// Requested child address.
        address: Address,
        /// Calling agent's address.
        caller: Address,
        /// First address the caller owns.
        first: Address,
        /// Last address the caller owns.
        last: Address,
    },

    /// Container runtime start/stop failed; surfaced verbatim to the caller.
    #[error("{0}")]
    Runtime(String),

    /// Transport-level failure: peer closed mid-request, connect refused,
    /// or a one-shot request exceeded its time bound.
    #[error("connection error: {0}")]
    Connection(String),
}
