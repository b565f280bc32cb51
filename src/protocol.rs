//! Wire protocol for hub IPC: newline-delimited JSON frames.
//!
//! One frame is exactly one JSON object, UTF-8 encoded in compact form (the
//! encoder never emits an embedded newline), terminated by a single `\n`.
//!
//! Client → hub frames are [`Request`]s, tagged by their `action` field.
//! Hub → client frames are either a [`Response`] (carries a `status` field)
//! or a push [`Event`] (carries an `event` field). The two shapes are
//! disjoint, so a single reader can demultiplex responses from pushes
//! without correlation ids — see [`ServerFrame`].

// Rust guideline compliant 2026-02

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::addressing::Address;

/// Maximum frame size (16 MB). A line that grows past this without a
/// terminating newline is unrecoverable: there is no request boundary left
/// to scope the failure to, so the decoder reports a fatal error.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

// ─── Request types (client → hub) ──────────────────────────────────────────

/// A client request, one variant per action.
///
/// Unknown actions fail at decode time ("unknown variant"), which the hub
/// reports back as a request-scoped protocol error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    /// Bind the calling session to an agent address.
    Register {
        /// Address to bind. Fails if already bound to a live session.
        helper_num: Address,
    },

    /// Start a helper container for a child address of the caller.
    Spawn {
        /// Child address to spawn. Must fall within the caller's child range.
        helper_num: Address,
        /// Optional model variant override for the child agent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        /// Optional helpers directory to mount into the child container.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        helpers_dir: Option<String>,
    },

    /// Stop a helper container by name.
    Stop {
        /// Name of the container to stop.
        container_name: String,
    },

    /// Route a payload to a specific registered agent.
    Send {
        /// Target agent address.
        to: Address,
        /// Application payload, delivered verbatim.
        payload: serde_json::Value,
    },

    /// Route a payload to every registered agent except the sender.
    Broadcast {
        /// Application payload, delivered verbatim.
        payload: serde_json::Value,
    },
}

// ─── Response / push types (hub → client) ──────────────────────────────────

/// Response status: `"ok"` or `"error"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Request accepted.
    Ok,
    /// Request failed; `message` says why.
    Error,
}

/// Response to exactly one [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Outcome of the request.
    pub status: Status,
    /// Human-readable failure description (present on `error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Name of the launched container (present on successful `spawn`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
}

impl Response {
    /// A bare `{status: ok}` response.
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            message: None,
            container_name: None,
        }
    }

    /// Successful spawn response carrying the container name.
    pub fn ok_container(container_name: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            message: None,
            container_name: Some(container_name.into()),
        }
    }

    /// `{status: error, message}` response.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            container_name: None,
        }
    }

    /// Whether the request succeeded.
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// Payload pushed to a session outside the request/response cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A routed `send`/`broadcast` payload.
    Message {
        /// Address of the sending agent.
        from: Address,
        /// Application payload, delivered verbatim.
        payload: serde_json::Value,
    },
}

/// A decoded hub → client frame: push event or request response.
///
/// Deserialization tries the event shape first (tagged by its `event`
/// field), then the response shape (tagged by `status`), so the two never
/// collide.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// Push delivery.
    Event(Event),
    /// Response to the session's outstanding request.
    Response(Response),
}

// ─── Encoding ──────────────────────────────────────────────────────────────

/// Encode one message as a newline-terminated compact JSON frame.
///
/// Compact encoding guarantees no embedded newline.
pub fn encode_frame<T: Serialize>(message: &T) -> Vec<u8> {
    let mut bytes =
        serde_json::to_vec(message).expect("frame types serialize infallibly");
    bytes.push(b'\n');
    bytes
}

// ─── Decoding ──────────────────────────────────────────────────────────────

/// Incremental line decoder that handles partial reads.
///
/// Feed raw bytes via [`LineDecoder::feed`]; complete lines come back with
/// the terminating newline stripped, anything after the last newline stays
/// buffered for the next call. Blank lines are skipped. JSON parsing is the
/// caller's job, so a malformed frame can be scoped to one request while
/// decoder errors (oversized line) stay fatal for the connection.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    /// Create a decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and extract all complete lines.
    ///
    /// # Errors
    ///
    /// Fails if the buffered partial line exceeds the frame size cap.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // strip the newline
            if line.iter().any(|b| !b.is_ascii_whitespace()) {
                lines.push(line);
            }
        }

        if self.buf.len() > MAX_FRAME_SIZE {
            bail!(
                "frame exceeds {} bytes without a newline",
                MAX_FRAME_SIZE
            );
        }

        Ok(lines)
    }

    /// Returns true if a partial line is buffered.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

/// Parse one decoded line as a [`Request`].
///
/// # Errors
///
/// Returns the serde error text for malformed JSON, a missing `action`
/// field, or an unknown action. The failure is scoped to this one frame.
pub fn parse_request(line: &[u8]) -> Result<Request, serde_json::Error> {
    serde_json::from_slice(line)
}
