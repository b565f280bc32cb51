//! Per-connection state on the hub side.
//!
//! Each accepted socket gets a [`SessionConn`] owning its write task and
//! (once the hub loop has recorded the session) its read task. Frames are
//! decoded in the read task and handed to the loop as [`HubEvent::Request`];
//! outgoing frames are queued on an unbounded channel and written by the
//! write task.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::protocol::{parse_request, LineDecoder};

use super::events::{HubEvent, SessionId};

/// Hub-side connection state for a single session.
pub(crate) struct SessionConn {
    session_id: SessionId,
    /// Sender for pre-encoded outgoing frames.
    frame_tx: UnboundedSender<Vec<u8>>,
    /// Read half, held until the hub loop records the session. Deferring
    /// the read task to that point is what keeps a session's first frame
    /// from reaching the loop before its `Connected` event.
    read_half: Option<OwnedReadHalf>,
    read_handle: Option<JoinHandle<()>>,
    write_handle: JoinHandle<()>,
}

impl std::fmt::Debug for SessionConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConn")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl SessionConn {
    /// Wrap an accepted stream: splits it and spawns the write task.
    pub(crate) fn new(session_id: SessionId, stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let write_handle = tokio::spawn(Self::write_loop(session_id, write_half, frame_rx));

        Self {
            session_id,
            frame_tx,
            read_half: Some(read_half),
            read_handle: None,
            write_handle,
        }
    }

    /// Start the read task. Called by the hub loop when it records the
    /// session; a second call is a no-op.
    pub(crate) fn start_reading(&mut self, hub_event_tx: UnboundedSender<HubEvent>) {
        if let Some(read_half) = self.read_half.take() {
            self.read_handle = Some(tokio::spawn(Self::read_loop(
                self.session_id,
                read_half,
                hub_event_tx,
            )));
        }
    }

    /// Queue a pre-encoded frame for this session.
    ///
    /// Returns `false` if the write task is gone (peer disconnected).
    pub(crate) fn send_frame(&self, encoded: Vec<u8>) -> bool {
        self.frame_tx.send(encoded).is_ok()
    }

    /// Session identifier.
    pub(crate) fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Read loop — decodes newline frames and forwards them to the hub loop.
    async fn read_loop(
        session_id: SessionId,
        mut reader: OwnedReadHalf,
        hub_event_tx: UnboundedSender<HubEvent>,
    ) {
        let mut decoder = LineDecoder::new();
        let mut buf = [0u8; 64 * 1024];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    // EOF — peer closed the connection.
                    let _ = hub_event_tx.send(HubEvent::Disconnected { session_id });
                    break;
                }
                Ok(n) => {
                    let lines = match decoder.feed(&buf[..n]) {
                        Ok(lines) => lines,
                        Err(e) => {
                            // Unterminated oversize line: no frame boundary
                            // left, the connection cannot recover.
                            log::error!("[Session {session_id}] Frame decode error: {e}");
                            let _ = hub_event_tx.send(HubEvent::Disconnected { session_id });
                            break;
                        }
                    };
                    for line in lines {
                        let request =
                            parse_request(&line).map_err(|e| e.to_string());
                        if hub_event_tx
                            .send(HubEvent::Request {
                                session_id,
                                request,
                            })
                            .is_err()
                        {
                            return; // Hub loop is gone.
                        }
                    }
                }
                Err(e) => {
                    log::error!("[Session {session_id}] Read error: {e}");
                    let _ = hub_event_tx.send(HubEvent::Disconnected { session_id });
                    break;
                }
            }
        }
    }

    /// Write loop — drains the frame channel into the socket.
    async fn write_loop(
        session_id: SessionId,
        mut writer: OwnedWriteHalf,
        mut frame_rx: UnboundedReceiver<Vec<u8>>,
    ) {
        while let Some(data) = frame_rx.recv().await {
            if let Err(e) = writer.write_all(&data).await {
                log::error!("[Session {session_id}] Write error: {e}");
                break;
            }
        }
    }
}

impl Drop for SessionConn {
    fn drop(&mut self) {
        // Removing a session tears both tasks down with it.
        if let Some(handle) = self.read_handle.take() {
            handle.abort();
        }
        self.write_handle.abort();
    }
}
