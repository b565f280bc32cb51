//! Unix domain socket server for accepting helper connections.
//!
//! Binds the hub socket and runs an accept loop that wraps each connection
//! in a [`SessionConn`] and announces it to the hub loop via
//! [`HubEvent::Connected`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tokio::net::UnixListener;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::events::{HubEvent, SessionId};
use super::session::SessionConn;

/// Unix domain socket server for hub IPC.
#[derive(Debug)]
pub(crate) struct SocketServer {
    /// Path to the socket file (for cleanup).
    socket_path: PathBuf,
    /// Handle to the accept loop task.
    accept_handle: JoinHandle<()>,
}

impl SocketServer {
    /// Start the socket server at the given path.
    ///
    /// Removes any stale socket file, binds the listener, sets permissions
    /// to 0600 (the socket path is the only access control there is), and
    /// spawns the accept loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is over the OS limit or the socket
    /// cannot be bound.
    pub(crate) fn start(
        socket_path: PathBuf,
        hub_event_tx: UnboundedSender<HubEvent>,
    ) -> Result<Self> {
        // sun_path is 104 bytes on macOS, 108 on Linux; use the conservative limit.
        const MAX_SOCKET_PATH: usize = 104;
        let path_len = socket_path.as_os_str().len();
        if path_len >= MAX_SOCKET_PATH {
            anyhow::bail!(
                "Socket path too long ({path_len} bytes, max {}): {}",
                MAX_SOCKET_PATH - 1,
                socket_path.display()
            );
        }

        if socket_path.exists() {
            std::fs::remove_file(&socket_path).with_context(|| {
                format!("Failed to remove stale socket: {}", socket_path.display())
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = std::os::unix::net::UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind socket: {}", socket_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&socket_path, perms)?;
        }

        listener.set_nonblocking(true)?;
        let listener = UnixListener::from_std(listener)?;

        log::info!("[Socket] Hub listening on {}", socket_path.display());

        let path_clone = socket_path.clone();
        let accept_handle = tokio::spawn(Self::accept_loop(listener, hub_event_tx, path_clone));

        Ok(Self {
            socket_path,
            accept_handle,
        })
    }

    /// Accept loop — runs as a tokio task.
    async fn accept_loop(
        listener: UnixListener,
        hub_event_tx: UnboundedSender<HubEvent>,
        socket_path: PathBuf,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let session_id = next_session_id();
                    log::info!("[Socket] Session {session_id} connected");

                    let conn = SessionConn::new(session_id, stream);
                    if hub_event_tx.send(HubEvent::Connected { conn }).is_err() {
                        log::warn!("[Socket] Hub event channel closed, stopping accept loop");
                        break;
                    }
                }
                Err(e) => {
                    // Socket file gone means the server is shutting down.
                    if !socket_path.exists() {
                        log::info!("[Socket] Socket file removed, stopping accept loop");
                        break;
                    }
                    log::error!("[Socket] Accept error: {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Stop accepting and remove the socket file.
    pub(crate) fn shutdown(self) {
        self.accept_handle.abort();
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            log::debug!(
                "[Socket] Could not remove {}: {e}",
                self.socket_path.display()
            );
        }
    }

    /// Path to the socket file.
    pub(crate) fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Next session identifier, unique for the process lifetime.
fn next_session_id() -> SessionId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
