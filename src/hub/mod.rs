//! Hub — the server arbitrating addresses and routing messages.
//!
//! The hub owns all mutable state (session table, address registry,
//! launched-container table) inside a single event loop; the accept loop,
//! per-connection read tasks, and finished container-runtime jobs reach it
//! only through the [`HubEvent`] channel. Because the loop processes events
//! in arrival order, a disconnect is applied to the registry before any
//! later `send` can observe the dead session, and no lock is ever held
//! across container-runtime I/O — runtime calls run on the blocking pool
//! and re-enter the loop as completion events.
//!
//! ```text
//!  accept loop ──┐
//!  read tasks ───┼── mpsc<HubEvent> ──► event loop ──► session write tasks
//!  runtime jobs ─┘                      (owns registry)
//! ```
//!
//! Per-session state machine: `Connected → Registered → Closed`. Only
//! `register` is valid before registration (plus `spawn`/`stop`, which
//! anonymous sessions may issue as the director); a closed session's state
//! is discarded and never revived.

// Rust guideline compliant 2026-02

pub(crate) mod events;
pub(crate) mod server;
pub(crate) mod session;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::addressing::{agent_depth, children_of, owns_child, Address, Breadth};
use crate::error::HubError;
use crate::msglog::{MessageLog, Recipient};
use crate::protocol::{encode_frame, Event, Request, Response};
use crate::runtime::{parse_helper_num, ContainerRuntime};

use events::{HubEvent, SessionId};
use server::SocketServer;
use session::SessionConn;

/// Everything the hub needs to start.
pub struct HubOptions {
    /// Where to bind the Unix socket.
    pub socket_path: PathBuf,
    /// Branching factor of the helper tree.
    pub breadth: Breadth,
    /// Maximum tree depth a spawn may reach; `-1` means unlimited.
    pub spawn_depth: i64,
    /// Container runtime collaborator.
    pub runtime: Arc<dyn ContainerRuntime>,
    /// Optional inter-agent message log.
    pub message_log: Option<MessageLog>,
}

/// Handle to a running hub.
///
/// Dropping it does not stop the hub; call [`Hub::shutdown`] to stop all
/// tracked helper containers and close the socket.
pub struct Hub {
    event_tx: UnboundedSender<HubEvent>,
    server: SocketServer,
    loop_handle: JoinHandle<()>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("socket_path", &self.server.socket_path())
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Bind the socket and start the accept and event loops.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn start(options: HubOptions) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel::<HubEvent>();
        let server = SocketServer::start(options.socket_path, event_tx.clone())?;

        let core = HubCore {
            breadth: options.breadth,
            spawn_depth: options.spawn_depth,
            runtime: options.runtime,
            msglog: options.message_log,
            event_tx: event_tx.clone(),
            sessions: HashMap::new(),
            registry: HashMap::new(),
            containers: HashMap::new(),
        };
        let loop_handle = tokio::spawn(core.run(event_rx));

        Ok(Self {
            event_tx,
            server,
            loop_handle,
        })
    }

    /// Path of the bound socket.
    pub fn socket_path(&self) -> &Path {
        self.server.socket_path()
    }

    /// Stop the hub: stop all tracked helper containers, drop every
    /// session, close the listener, remove the socket file.
    pub async fn shutdown(self) {
        let _ = self.event_tx.send(HubEvent::Shutdown);
        let _ = self.loop_handle.await;
        self.server.shutdown();
    }
}

/// A recorded session: its connection plus the address it registered, if any.
struct Session {
    conn: SessionConn,
    addr: Option<Address>,
}

/// The event loop's exclusively-owned state.
struct HubCore {
    breadth: Breadth,
    spawn_depth: i64,
    runtime: Arc<dyn ContainerRuntime>,
    msglog: Option<MessageLog>,
    /// For completion events from blocking runtime jobs.
    event_tx: UnboundedSender<HubEvent>,
    sessions: HashMap<SessionId, Session>,
    /// Address → live session. Entries added on successful registration,
    /// removed on disconnect or explicit stop; never reused while bound.
    registry: HashMap<Address, SessionId>,
    /// Containers launched by this hub: name → helper address.
    containers: HashMap<String, Address>,
}

impl HubCore {
    async fn run(mut self, mut event_rx: UnboundedReceiver<HubEvent>) {
        while let Some(event) = event_rx.recv().await {
            if matches!(event, HubEvent::Shutdown) {
                break;
            }
            self.handle_event(event);
        }
        self.stop_all_containers().await;
        // Dropping the sessions aborts their read/write tasks.
    }

    fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Connected { mut conn } => {
                conn.start_reading(self.event_tx.clone());
                self.sessions
                    .insert(conn.session_id(), Session { conn, addr: None });
            }
            HubEvent::Request {
                session_id,
                request,
            } => match request {
                Ok(request) => self.dispatch(session_id, request),
                Err(message) => {
                    // Malformed frame: fails this one request, the
                    // connection stays open.
                    log::warn!("[Hub] Session {session_id} sent a malformed frame: {message}");
                    self.respond(
                        session_id,
                        Response::error(HubError::Protocol(message).to_string()),
                    );
                }
            },
            HubEvent::Disconnected { session_id } => self.remove_session(session_id),
            HubEvent::SpawnFinished {
                session_id,
                helper_num,
                model,
                result,
            } => self.finish_spawn(session_id, helper_num, model, result),
            HubEvent::StopFinished {
                session_id,
                container_name,
                result,
            } => self.finish_stop(session_id, container_name, result),
            HubEvent::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    fn dispatch(&mut self, session_id: SessionId, request: Request) {
        match request {
            Request::Register { helper_num } => self.handle_register(session_id, helper_num),
            Request::Spawn {
                helper_num,
                model,
                helpers_dir,
            } => self.handle_spawn(session_id, helper_num, model, helpers_dir),
            Request::Stop { container_name } => self.handle_stop(session_id, container_name),
            Request::Send { to, payload } => self.handle_send(session_id, to, payload),
            Request::Broadcast { payload } => self.handle_broadcast(session_id, payload),
        }
    }

    // ─── register ───────────────────────────────────────────────────────

    fn handle_register(&mut self, session_id: SessionId, helper_num: Address) {
        if let Some(addr) = self.session_addr(session_id) {
            self.respond(
                session_id,
                Response::error(
                    HubError::Registration(format!("session already registered as {addr}"))
                        .to_string(),
                ),
            );
            return;
        }
        if self.registry.contains_key(&helper_num) {
            self.respond(
                session_id,
                Response::error(
                    HubError::Registration(format!("address {helper_num} already registered"))
                        .to_string(),
                ),
            );
            return;
        }
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        session.addr = Some(helper_num);
        self.registry.insert(helper_num, session_id);
        log::info!("[Hub] Session {session_id} registered as agent {helper_num}");
        if let Some(log) = &self.msglog {
            log.log_control("register", helper_num, None);
        }
        self.respond(session_id, Response::ok());
    }

    // ─── spawn ──────────────────────────────────────────────────────────

    fn handle_spawn(
        &mut self,
        session_id: SessionId,
        helper_num: Address,
        model: Option<String>,
        helpers_dir: Option<String>,
    ) {
        // Anonymous sessions act as the director; see DESIGN.md.
        let caller = self.session_addr(session_id).unwrap_or(0);

        if !owns_child(caller, helper_num, self.breadth) {
            let (first, last) = children_of(caller, self.breadth);
            self.respond(
                session_id,
                Response::error(
                    HubError::AddressNotOwned {
                        address: helper_num,
                        caller,
                        first,
                        last,
                    }
                    .to_string(),
                ),
            );
            return;
        }

        if self.spawn_depth >= 0 && u64::from(agent_depth(helper_num, self.breadth)) > self.spawn_depth as u64
        {
            self.respond(
                session_id,
                Response::error(format!(
                    "spawn depth exhausted (limit {})",
                    self.spawn_depth
                )),
            );
            return;
        }

        // A tracked container already running under this address means the
        // slot is occupied; a stopped one may be respawned.
        let existing = self
            .containers
            .iter()
            .find(|(_, &addr)| addr == helper_num)
            .map(|(name, _)| name.clone());

        let runtime = Arc::clone(&self.runtime);
        let event_tx = self.event_tx.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(name) = existing {
                if runtime.is_running(&name).unwrap_or(false) {
                    let _ = event_tx.send(HubEvent::SpawnFinished {
                        session_id,
                        helper_num,
                        model,
                        result: Err(format!(
                            "container {name} already running for helper {helper_num}"
                        )),
                    });
                    return;
                }
            }
            let result = runtime
                .start(helper_num, model.as_deref(), helpers_dir.as_deref())
                .map_err(|e| e.to_string());
            let _ = event_tx.send(HubEvent::SpawnFinished {
                session_id,
                helper_num,
                model,
                result,
            });
        });
    }

    fn finish_spawn(
        &mut self,
        session_id: SessionId,
        helper_num: Address,
        model: Option<String>,
        result: Result<String, String>,
    ) {
        match result {
            Ok(container_name) => {
                self.containers.insert(container_name.clone(), helper_num);
                log::info!("[Hub] Spawned helper {helper_num} as {container_name}");
                if let Some(log) = &self.msglog {
                    log.log_control("spawn", helper_num, model.as_deref());
                }
                self.respond(session_id, Response::ok_container(container_name));
            }
            // Runtime failure: surfaced verbatim, the address stays unreserved.
            Err(message) => self.respond(
                session_id,
                Response::error(HubError::Runtime(message).to_string()),
            ),
        }
    }

    // ─── stop ───────────────────────────────────────────────────────────

    fn handle_stop(&mut self, session_id: SessionId, container_name: String) {
        let runtime = Arc::clone(&self.runtime);
        let event_tx = self.event_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = runtime.stop(&container_name).map_err(|e| e.to_string());
            let _ = event_tx.send(HubEvent::StopFinished {
                session_id,
                container_name,
                result,
            });
        });
    }

    fn finish_stop(
        &mut self,
        session_id: SessionId,
        container_name: String,
        result: Result<bool, String>,
    ) {
        match result {
            Ok(true) => {
                let addr = self
                    .containers
                    .remove(&container_name)
                    .or_else(|| parse_helper_num(&container_name));
                if let Some(addr) = addr {
                    self.unbind(addr);
                    if let Some(log) = &self.msglog {
                        log.log_control("stop", addr, None);
                    }
                }
                self.respond(session_id, Response::ok());
            }
            // "Already stopped" is reportable, never a crash.
            Ok(false) => self.respond(
                session_id,
                Response::error(format!("container {container_name} was not running")),
            ),
            Err(message) => self.respond(
                session_id,
                Response::error(HubError::Runtime(message).to_string()),
            ),
        }
    }

    // ─── send / broadcast ───────────────────────────────────────────────

    fn handle_send(&mut self, session_id: SessionId, to: Address, payload: serde_json::Value) {
        let Some(from) = self.session_addr(session_id) else {
            self.respond(session_id, Response::error("not registered"));
            return;
        };

        let frame = encode_frame(&Event::Message {
            from,
            payload: payload.clone(),
        });
        let delivered = self
            .registry
            .get(&to)
            .and_then(|target| self.sessions.get(target))
            .map(|session| session.conn.send_frame(frame))
            .unwrap_or(false);

        if delivered {
            if let Some(log) = &self.msglog {
                log.log_message(from, Recipient::Addr(to), &payload);
            }
            // Accepted for delivery; consumption by the target is not
            // acknowledged to the sender.
            self.respond(session_id, Response::ok());
        } else {
            self.respond(
                session_id,
                Response::error(
                    HubError::Routing("unknown or disconnected target".into()).to_string(),
                ),
            );
        }
    }

    fn handle_broadcast(&mut self, session_id: SessionId, payload: serde_json::Value) {
        let Some(from) = self.session_addr(session_id) else {
            self.respond(session_id, Response::error("not registered"));
            return;
        };

        let frame = encode_frame(&Event::Message {
            from,
            payload: payload.clone(),
        });
        for (&addr, target) in &self.registry {
            if *target == session_id {
                continue; // The sender does not hear its own broadcast.
            }
            if let Some(session) = self.sessions.get(target) {
                if !session.conn.send_frame(frame.clone()) {
                    log::debug!("[Hub] Failed to deliver broadcast to agent {addr}");
                }
            }
        }
        if let Some(log) = &self.msglog {
            log.log_message(from, Recipient::All, &payload);
        }
        self.respond(session_id, Response::ok());
    }

    // ─── session bookkeeping ────────────────────────────────────────────

    /// Best-effort response delivery; the session may already be gone.
    fn respond(&self, session_id: SessionId, response: Response) {
        if let Some(session) = self.sessions.get(&session_id) {
            if !session.conn.send_frame(encode_frame(&response)) {
                log::debug!("[Hub] Session {session_id} vanished before its response");
            }
        }
    }

    fn session_addr(&self, session_id: SessionId) -> Option<Address> {
        self.sessions.get(&session_id).and_then(|s| s.addr)
    }

    /// Release an address binding without dropping the connection.
    fn unbind(&mut self, addr: Address) {
        if let Some(session_id) = self.registry.remove(&addr) {
            if let Some(session) = self.sessions.get_mut(&session_id) {
                session.addr = None;
            }
        }
    }

    fn remove_session(&mut self, session_id: SessionId) {
        if let Some(session) = self.sessions.remove(&session_id) {
            if let Some(addr) = session.addr {
                self.registry.remove(&addr);
                log::info!("[Hub] Agent {addr} disconnected");
                if let Some(log) = &self.msglog {
                    log.log_control("disconnect", addr, None);
                }
            } else {
                log::info!("[Hub] Session {session_id} disconnected");
            }
        }
    }

    async fn stop_all_containers(&mut self) {
        let names: Vec<String> = self.containers.drain().map(|(name, _)| name).collect();
        if names.is_empty() {
            return;
        }
        let runtime = Arc::clone(&self.runtime);
        let _ = tokio::task::spawn_blocking(move || {
            for name in names {
                if let Err(e) = runtime.stop(&name) {
                    log::warn!("[Hub] Failed to stop {name} during shutdown: {e}");
                }
            }
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HelperConnection;
    use crate::protocol::Status;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records runtime calls; `fail_start` makes `start` report a failure.
    struct FakeRuntime {
        started: Mutex<Vec<(Address, Option<String>)>>,
        stopped: Mutex<Vec<String>>,
        fail_start: bool,
    }

    impl FakeRuntime {
        fn new() -> Self {
            Self {
                started: Mutex::new(Vec::new()),
                stopped: Mutex::new(Vec::new()),
                fail_start: false,
            }
        }
    }

    impl ContainerRuntime for FakeRuntime {
        fn start(
            &self,
            helper_num: Address,
            model: Option<&str>,
            _helpers_dir: Option<&str>,
        ) -> anyhow::Result<String> {
            if self.fail_start {
                anyhow::bail!("image pull failed");
            }
            self.started
                .lock()
                .unwrap()
                .push((helper_num, model.map(String::from)));
            Ok(crate::runtime::container_name("test", helper_num))
        }

        fn stop(&self, container_name: &str) -> anyhow::Result<bool> {
            let mut stopped = self.stopped.lock().unwrap();
            let first_time = !stopped.contains(&container_name.to_string());
            stopped.push(container_name.to_string());
            Ok(first_time)
        }

        fn is_running(&self, container_name: &str) -> anyhow::Result<bool> {
            let started = self.started.lock().unwrap();
            let stopped = self.stopped.lock().unwrap();
            let launched = started
                .iter()
                .any(|(num, _)| crate::runtime::container_name("test", *num) == container_name);
            Ok(launched && !stopped.contains(&container_name.to_string()))
        }
    }

    fn start_hub(breadth: i64) -> (Hub, Arc<FakeRuntime>, tempfile::TempDir) {
        let tmp = tempfile::TempDir::new().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let hub = Hub::start(HubOptions {
            socket_path: tmp.path().join("hub.sock"),
            breadth: Breadth::from_raw(breadth).unwrap(),
            spawn_depth: -1,
            runtime: Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
            message_log: None,
        })
        .unwrap();
        (hub, runtime, tmp)
    }

    #[tokio::test]
    async fn register_then_duplicate_register_fails() {
        let (hub, _runtime, _tmp) = start_hub(2);

        let first = HelperConnection::connect(hub.socket_path(), Some(1))
            .await
            .unwrap();

        let second = HelperConnection::connect(hub.socket_path(), Some(1)).await;
        match second {
            Err(HubError::Registration(msg)) => assert!(msg.contains("already registered")),
            other => panic!("Expected Registration error, got: {other:?}"),
        }

        drop(first);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn spawn_inside_child_range_starts_container() {
        let (hub, runtime, _tmp) = start_hub(2);

        let conn = HelperConnection::connect(hub.socket_path(), Some(1))
            .await
            .unwrap();

        // children_of(1, 2) == (3, 4)
        let resp = conn.spawn(3, Some("sonnet"), None).await.unwrap();
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.container_name.as_deref(), Some("test-helper-3"));
        assert_eq!(
            runtime.started.lock().unwrap().as_slice(),
            &[(3, Some("sonnet".to_string()))]
        );

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn spawn_outside_child_range_is_rejected() {
        let (hub, runtime, _tmp) = start_hub(2);

        let conn = HelperConnection::connect(hub.socket_path(), Some(1))
            .await
            .unwrap();

        let resp = conn.spawn(7, None, None).await.unwrap();
        assert_eq!(resp.status, Status::Error);
        assert!(resp.message.unwrap().contains("outside child range"));
        assert!(runtime.started.lock().unwrap().is_empty());

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn spawn_depth_limit_is_enforced() {
        let tmp = tempfile::TempDir::new().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let hub = Hub::start(HubOptions {
            socket_path: tmp.path().join("hub.sock"),
            breadth: Breadth::Bounded(2),
            spawn_depth: 1,
            runtime: Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
            message_log: None,
        })
        .unwrap();

        // Depth 1 is allowed, depth 2 is not.
        let director = HelperConnection::connect(hub.socket_path(), Some(0))
            .await
            .unwrap();
        assert!(director.spawn(1, None, None).await.unwrap().is_ok());

        let child = HelperConnection::connect(hub.socket_path(), Some(1))
            .await
            .unwrap();
        let resp = child.spawn(3, None, None).await.unwrap();
        assert_eq!(resp.status, Status::Error);
        assert!(resp.message.unwrap().contains("depth exhausted"));

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn runtime_failure_is_surfaced_verbatim() {
        let tmp = tempfile::TempDir::new().unwrap();
        let runtime = Arc::new(FakeRuntime {
            fail_start: true,
            ..FakeRuntime::new()
        });
        let hub = Hub::start(HubOptions {
            socket_path: tmp.path().join("hub.sock"),
            breadth: Breadth::Bounded(2),
            spawn_depth: -1,
            runtime: Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
            message_log: None,
        })
        .unwrap();

        let conn = HelperConnection::connect(hub.socket_path(), Some(0))
            .await
            .unwrap();
        let resp = conn.spawn(1, None, None).await.unwrap();
        assert_eq!(resp.status, Status::Error);
        assert_eq!(resp.message.as_deref(), Some("image pull failed"));

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn send_routes_to_target_inbox() {
        let (hub, _runtime, _tmp) = start_hub(-1);

        let alice = HelperConnection::connect(hub.socket_path(), Some(1))
            .await
            .unwrap();
        let bob = HelperConnection::connect(hub.socket_path(), Some(2))
            .await
            .unwrap();

        let resp = alice.send(2, json!({"text": "hi"})).await.unwrap();
        assert!(resp.is_ok());

        let event = bob.recv(Some(Duration::from_secs(2))).await.unwrap();
        match event {
            Some(Event::Message { from, payload }) => {
                assert_eq!(from, 1);
                assert_eq!(payload, json!({"text": "hi"}));
            }
            other => panic!("Expected a message, got: {other:?}"),
        }

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn send_from_unregistered_session_is_rejected() {
        let (hub, _runtime, _tmp) = start_hub(2);

        let anon = HelperConnection::connect(hub.socket_path(), None)
            .await
            .unwrap();
        let resp = anon.send(1, json!({})).await.unwrap();
        assert_eq!(resp.status, Status::Error);
        assert_eq!(resp.message.as_deref(), Some("not registered"));

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn broadcast_excludes_sender() {
        let (hub, _runtime, _tmp) = start_hub(-1);

        let alice = HelperConnection::connect(hub.socket_path(), Some(1))
            .await
            .unwrap();
        let bob = HelperConnection::connect(hub.socket_path(), Some(2))
            .await
            .unwrap();
        let carol = HelperConnection::connect(hub.socket_path(), Some(3))
            .await
            .unwrap();

        assert!(alice.broadcast(json!({"text": "all hands"})).await.unwrap().is_ok());

        for peer in [&bob, &carol] {
            let event = peer.recv(Some(Duration::from_secs(2))).await.unwrap();
            assert!(matches!(event, Some(Event::Message { from: 1, .. })));
        }
        // The sender's own inbox stays empty.
        assert!(alice
            .recv(Some(Duration::from_millis(100)))
            .await
            .unwrap()
            .is_none());

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_unregisters_address() {
        let (hub, _runtime, _tmp) = start_hub(-1);

        let alice = HelperConnection::connect(hub.socket_path(), Some(1))
            .await
            .unwrap();
        let bob = HelperConnection::connect(hub.socket_path(), Some(2))
            .await
            .unwrap();

        drop(alice);

        // The hub observes the EOF asynchronously; poll until the registry
        // reflects it.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let resp = bob.send(1, json!({"text": "anyone?"})).await.unwrap();
            if resp.status == Status::Error {
                assert!(resp.message.unwrap().contains("unknown or disconnected"));
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "hub never noticed the disconnect"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn stop_is_reportable_when_already_stopped() {
        let (hub, _runtime, _tmp) = start_hub(2);

        let conn = HelperConnection::connect(hub.socket_path(), Some(0))
            .await
            .unwrap();
        let spawned = conn.spawn(1, None, None).await.unwrap();
        let name = spawned.container_name.unwrap();

        let first = conn.stop(&name).await.unwrap();
        assert!(first.is_ok());

        let second = conn.stop(&name).await.unwrap();
        assert_eq!(second.status, Status::Error);
        assert!(second.message.unwrap().contains("was not running"));

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_frame_gets_error_but_connection_survives() {
        use tokio::io::AsyncWriteExt;

        let (hub, _runtime, _tmp) = start_hub(2);

        let mut raw = tokio::net::UnixStream::connect(hub.socket_path())
            .await
            .unwrap();
        raw.write_all(b"this is not json\n").await.unwrap();
        raw.write_all(&encode_frame(&Request::Register { helper_num: 5 }))
            .await
            .unwrap();

        let mut reader = tokio::io::BufReader::new(raw);
        let mut line = String::new();
        use tokio::io::AsyncBufReadExt;

        tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        let first: Response = serde_json::from_str(&line).unwrap();
        assert_eq!(first.status, Status::Error);
        assert!(first.message.unwrap().contains("protocol error"));

        line.clear();
        tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        let second: Response = serde_json::from_str(&line).unwrap();
        assert!(second.is_ok());

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_tracked_containers() {
        let (hub, runtime, _tmp) = start_hub(2);

        let conn = HelperConnection::connect(hub.socket_path(), Some(0))
            .await
            .unwrap();
        assert!(conn.spawn(1, None, None).await.unwrap().is_ok());
        assert!(conn.spawn(2, None, None).await.unwrap().is_ok());

        hub.shutdown().await;

        let stopped = runtime.stopped.lock().unwrap();
        assert_eq!(stopped.len(), 2);
        assert!(stopped.contains(&"test-helper-1".to_string()));
        assert!(stopped.contains(&"test-helper-2".to_string()));
    }
}
