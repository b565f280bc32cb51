//! Append-only JSONL log of inter-agent traffic.
//!
//! Every routed payload and every control event (register, disconnect,
//! spawn, stop) is appended as one JSON line with a UTC timestamp. The
//! `log` CLI subcommand renders the file human-readably.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde_json::json;

use crate::addressing::Address;

/// Recipient of a logged message: a specific agent or everyone.
#[derive(Debug, Clone, Copy)]
pub enum Recipient {
    /// A single agent.
    Addr(Address),
    /// All registered agents (broadcast).
    All,
}

impl Recipient {
    fn to_json(self) -> serde_json::Value {
        match self {
            Recipient::Addr(addr) => json!(addr),
            Recipient::All => json!("all"),
        }
    }
}

/// Append-only JSONL message log.
pub struct MessageLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl std::fmt::Debug for MessageLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl MessageLog {
    /// Open (or create) the log file in append mode.
    ///
    /// # Errors
    ///
    /// Fails if the parent directory cannot be created or the file opened.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening message log {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path the log writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a routed payload.
    pub fn log_message(&self, from: Address, to: Recipient, payload: &serde_json::Value) {
        self.write(json!({
            "type": "message",
            "from": from,
            "to": to.to_json(),
            "payload": payload,
        }));
    }

    /// Record a control event (`register`, `disconnect`, `spawn`, `stop`).
    pub fn log_control(&self, event: &str, helper: Address, model: Option<&str>) {
        let mut entry = json!({
            "type": "control",
            "event": event,
            "helper": helper,
        });
        if let Some(model) = model {
            entry["model"] = json!(model);
        }
        self.write(entry);
    }

    fn write(&self, mut entry: serde_json::Value) {
        entry["ts"] = json!(chrono::Utc::now().to_rfc3339());
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        // A full disk must not take the hub down with it.
        if let Err(e) = writeln!(file, "{entry}") {
            log::warn!("[MsgLog] Failed to append to {}: {e}", self.path.display());
        }
    }
}
