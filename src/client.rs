//! Container-side client: socket communication with the hub.
//!
//! [`HelperConnection`] is the persistent connection used by agents that
//! send and receive messages over time; [`send_request`] is the one-shot
//! convenience for fire-and-forget `spawn`/`stop` commands.
//!
//! A single background reader owns the stream's read half and
//! demultiplexes every incoming frame by shape: responses (frames with a
//! `status` field) are handed to the pending request, push events (frames
//! with an `event` field) land in an inbox queue. `request` and `recv`
//! therefore never compete for the same bytes, even when the hub pushes a
//! delivery while a request is outstanding.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::addressing::Address;
use crate::error::HubError;
use crate::protocol::{encode_frame, Event, LineDecoder, Request, Response, ServerFrame};

/// Upper bound on a one-shot request's total round trip.
pub const ONE_SHOT_TIMEOUT: Duration = Duration::from_secs(30);

/// Persistent connection to the hub.
pub struct HelperConnection {
    frame_tx: UnboundedSender<Vec<u8>>,
    /// Response stream. Locking it is what serializes `request` callers:
    /// one outstanding request per connection.
    responses: Mutex<UnboundedReceiver<Response>>,
    /// Push-delivery inbox, fed by the reader task.
    inbox: Mutex<UnboundedReceiver<Event>>,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
}

impl std::fmt::Debug for HelperConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelperConnection")
            .field("frame_tx_closed", &self.frame_tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl HelperConnection {
    /// Connect to the hub socket, optionally registering an address.
    ///
    /// # Errors
    ///
    /// [`HubError::Connection`] if the socket cannot be reached;
    /// [`HubError::Registration`] if the hub rejects the registration.
    pub async fn connect(
        socket_path: &Path,
        helper_num: Option<Address>,
    ) -> Result<Self, HubError> {
        let stream = UnixStream::connect(socket_path).await.map_err(|e| {
            HubError::Connection(format!("connect {}: {e}", socket_path.display()))
        })?;
        let (read_half, write_half) = stream.into_split();

        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (response_tx, response_rx) = mpsc::unbounded_channel::<Response>();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel::<Event>();

        let read_handle = tokio::spawn(Self::read_loop(read_half, response_tx, inbox_tx));
        let write_handle = tokio::spawn(Self::write_loop(write_half, frame_rx));

        let conn = Self {
            frame_tx,
            responses: Mutex::new(response_rx),
            inbox: Mutex::new(inbox_rx),
            read_handle,
            write_handle,
        };

        if let Some(helper_num) = helper_num {
            let resp = conn.register(helper_num).await?;
            if !resp.is_ok() {
                return Err(HubError::Registration(
                    resp.message.unwrap_or_else(|| "unknown".to_string()),
                ));
            }
        }

        Ok(conn)
    }

    /// Send one request and await its response.
    ///
    /// Concurrent callers block until the previous call's response (or
    /// failure) is observed.
    ///
    /// # Errors
    ///
    /// [`HubError::Connection`] if the hub closes before responding.
    pub async fn request(&self, request: &Request) -> Result<Response, HubError> {
        let mut responses = self.responses.lock().await;
        self.frame_tx
            .send(encode_frame(request))
            .map_err(|_| HubError::Connection("connection closed".to_string()))?;
        responses
            .recv()
            .await
            .ok_or_else(|| HubError::Connection("connection closed before response".to_string()))
    }

    /// Bind this connection to an agent address.
    pub async fn register(&self, helper_num: Address) -> Result<Response, HubError> {
        self.request(&Request::Register { helper_num }).await
    }

    /// Ask the hub to spawn a helper container for a child address.
    pub async fn spawn(
        &self,
        helper_num: Address,
        model: Option<&str>,
        helpers_dir: Option<&str>,
    ) -> Result<Response, HubError> {
        self.request(&Request::Spawn {
            helper_num,
            model: model.map(String::from),
            helpers_dir: helpers_dir.map(String::from),
        })
        .await
    }

    /// Ask the hub to stop a helper container.
    pub async fn stop(&self, container_name: &str) -> Result<Response, HubError> {
        self.request(&Request::Stop {
            container_name: container_name.to_string(),
        })
        .await
    }

    /// Route a payload to a specific agent.
    pub async fn send(
        &self,
        to: Address,
        payload: serde_json::Value,
    ) -> Result<Response, HubError> {
        self.request(&Request::Send { to, payload }).await
    }

    /// Route a payload to every other registered agent.
    pub async fn broadcast(&self, payload: serde_json::Value) -> Result<Response, HubError> {
        self.request(&Request::Broadcast { payload }).await
    }

    /// Await the next pushed delivery.
    ///
    /// Returns `Ok(Some(event))` on delivery and `Ok(None)` when the
    /// timeout expires first — timing out is an expected outcome, not an
    /// error.
    ///
    /// # Errors
    ///
    /// [`HubError::Connection`] once the hub side is gone.
    pub async fn recv(&self, timeout: Option<Duration>) -> Result<Option<Event>, HubError> {
        let mut inbox = self.inbox.lock().await;
        let event = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, inbox.recv()).await {
                Err(_) => return Ok(None), // timed out
                Ok(event) => event,
            },
            None => inbox.recv().await,
        };
        event
            .map(Some)
            .ok_or_else(|| HubError::Connection("disconnected".to_string()))
    }

    /// Close the connection, aborting the background tasks.
    pub fn close(self) {
        drop(self);
    }

    /// Reader task: demultiplexes responses from push events.
    async fn read_loop(
        mut reader: tokio::net::unix::OwnedReadHalf,
        response_tx: UnboundedSender<Response>,
        inbox_tx: UnboundedSender<Event>,
    ) {
        let mut decoder = LineDecoder::new();
        let mut buf = [0u8; 64 * 1024];

        loop {
            match reader.read(&mut buf).await {
                // EOF or transport error: dropping the senders is what
                // surfaces the disconnect to request()/recv().
                Ok(0) => break,
                Ok(n) => {
                    let lines = match decoder.feed(&buf[..n]) {
                        Ok(lines) => lines,
                        Err(e) => {
                            log::error!("[Client] Frame decode error: {e}");
                            break;
                        }
                    };
                    for line in lines {
                        match serde_json::from_slice::<ServerFrame>(&line) {
                            Ok(ServerFrame::Response(response)) => {
                                if response_tx.send(response).is_err() {
                                    return;
                                }
                            }
                            Ok(ServerFrame::Event(event)) => {
                                if inbox_tx.send(event).is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                log::warn!("[Client] Ignoring malformed frame: {e}");
                            }
                        }
                    }
                }
                Err(e) => {
                    log::error!("[Client] Read error: {e}");
                    break;
                }
            }
        }
    }

    /// Writer task: drains the frame channel into the socket.
    async fn write_loop(
        mut writer: tokio::net::unix::OwnedWriteHalf,
        mut frame_rx: UnboundedReceiver<Vec<u8>>,
    ) {
        while let Some(data) = frame_rx.recv().await {
            if let Err(e) = writer.write_all(&data).await {
                log::error!("[Client] Write error: {e}");
                break;
            }
        }
    }
}

impl Drop for HelperConnection {
    fn drop(&mut self) {
        self.read_handle.abort();
        self.write_handle.abort();
    }
}

/// One-shot convenience: connect, send one request, read its response,
/// disconnect — for fire-and-forget `spawn`/`stop` commands issued by a
/// process that does not want a persistent session.
///
/// The whole round trip is bounded by [`ONE_SHOT_TIMEOUT`]; exceeding it
/// is a hard failure, never retried.
///
/// # Errors
///
/// [`HubError::Connection`] on connect failure, mid-request disconnect,
/// or deadline overrun.
pub async fn send_request(socket_path: &Path, request: &Request) -> Result<Response, HubError> {
    let round_trip = async {
        let conn = HelperConnection::connect(socket_path, None).await?;
        conn.request(request).await
    };
    tokio::time::timeout(ONE_SHOT_TIMEOUT, round_trip)
        .await
        .map_err(|_| {
            HubError::Connection(format!(
                "no response within {} seconds",
                ONE_SHOT_TIMEOUT.as_secs()
            ))
        })?
}
