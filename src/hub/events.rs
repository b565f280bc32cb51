//! Unified event channel for the hub event loop.
//!
//! All producers — the accept loop, per-connection read tasks, and finished
//! container-runtime jobs — send events through a single
//! `mpsc::UnboundedSender<HubEvent>`. The hub loop receives on the
//! corresponding receiver and owns every piece of mutable state, so no
//! registry access ever races. Events are processed in arrival order, which
//! is what guarantees a disconnect is applied before any later request can
//! observe the dead session as live.

use crate::addressing::Address;
use crate::protocol::Request;

use super::session::SessionConn;

/// Identifier for one accepted connection, unique for the hub's lifetime.
pub(crate) type SessionId = u64;

/// Event delivered to the hub loop.
#[derive(Debug)]
pub(crate) enum HubEvent {
    /// A connection was accepted. The loop records the session and starts
    /// its read task; frames cannot arrive before this is processed.
    Connected {
        /// The freshly accepted connection.
        conn: SessionConn,
    },

    /// A frame arrived on a session.
    ///
    /// `Err` carries the decode failure text for a malformed frame; the
    /// loop answers it with a request-scoped protocol error.
    Request {
        /// Originating session.
        session_id: SessionId,
        /// Parsed request, or the parse error for this one frame.
        request: Result<Request, String>,
    },

    /// A session's peer closed the connection (zero-length read) or its
    /// stream failed.
    Disconnected {
        /// Session to remove.
        session_id: SessionId,
    },

    /// A container start finished on the blocking pool.
    SpawnFinished {
        /// Session awaiting the response.
        session_id: SessionId,
        /// Address the spawn targeted.
        helper_num: Address,
        /// Model override the caller asked for (for the message log).
        model: Option<String>,
        /// Container name, or the runtime failure text.
        result: Result<String, String>,
    },

    /// A container stop finished on the blocking pool.
    StopFinished {
        /// Session awaiting the response.
        session_id: SessionId,
        /// Container the stop targeted.
        container_name: String,
        /// `Ok(false)` means the container was not running.
        result: Result<bool, String>,
    },

    /// Stop the loop, stop tracked containers, drop all sessions.
    Shutdown,
}
