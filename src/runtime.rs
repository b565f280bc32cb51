//! Container runtime collaborator: the seam the hub uses to start and stop
//! helper containers.
//!
//! The hub only needs three operations, so the seam is a trait object; the
//! production implementation shells out to `podman` (preferred) or `docker`.
//! Tests substitute an in-memory fake.

use std::process::Command;

use anyhow::{bail, Context, Result};

use crate::addressing::Address;

/// Starts and stops helper containers on behalf of the hub.
///
/// All calls are blocking; the hub runs them on the blocking pool so a slow
/// container start never stalls registry operations.
pub trait ContainerRuntime: Send + Sync {
    /// Start a detached container for a helper address.
    ///
    /// Returns the container name on success.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime command fails; the message is
    /// surfaced verbatim in the hub's response.
    fn start(
        &self,
        helper_num: Address,
        model: Option<&str>,
        helpers_dir: Option<&str>,
    ) -> Result<String>;

    /// Stop (and remove) a container.
    ///
    /// Returns `false` if the container was not running — a reportable
    /// condition, not a failure.
    fn stop(&self, container_name: &str) -> Result<bool>;

    /// Whether a container with this name is currently running.
    fn is_running(&self, container_name: &str) -> Result<bool>;
}

/// Container name for a helper: `{prefix}-helper-{N}`.
pub fn container_name(prefix: &str, helper_num: Address) -> String {
    format!("{prefix}-helper-{helper_num}")
}

/// Recover the helper number from a container name.
///
/// Handles both the current `{prefix}-helper-{N}` form and the legacy
/// `{prefix}-helper-{N}-{hash}` form: walk backwards looking for a
/// `helper` part followed by a numeric part.
pub fn parse_helper_num(container_name: &str) -> Option<Address> {
    let parts: Vec<&str> = container_name.split('-').collect();
    for i in (1..parts.len()).rev() {
        if parts[i - 1] == "helper" {
            if let Ok(num) = parts[i].parse::<Address>() {
                return Some(num);
            }
        }
    }
    None
}

/// Production runtime: drives `podman` or `docker` subprocesses.
#[derive(Debug, Clone)]
pub struct CommandRuntime {
    /// Runtime binary (`podman` or `docker`).
    command: String,
    /// Image to launch helpers from.
    image: String,
    /// Container name prefix (usually the project container name).
    prefix: String,
}

impl CommandRuntime {
    /// Create a runtime driving the given binary.
    pub fn new(
        command: impl Into<String>,
        image: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            image: image.into(),
            prefix: prefix.into(),
        }
    }

    /// Autodetect the runtime binary: prefer `podman`, fall back to `docker`.
    ///
    /// # Errors
    ///
    /// Fails if neither binary responds to `--version`.
    pub fn detect(image: impl Into<String>, prefix: impl Into<String>) -> Result<Self> {
        for candidate in ["podman", "docker"] {
            let found = Command::new(candidate)
                .arg("--version")
                .output()
                .map(|out| out.status.success())
                .unwrap_or(false);
            if found {
                log::debug!("[Runtime] Using container runtime: {candidate}");
                return Ok(Self::new(candidate, image, prefix));
            }
        }
        bail!("no container runtime found (tried podman, docker)")
    }

    fn run_checked(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.command)
            .args(args)
            .output()
            .with_context(|| format!("failed to run {}", self.command))?;
        if !output.status.success() {
            bail!(
                "{} {} failed: {}",
                self.command,
                args.first().copied().unwrap_or(""),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ContainerRuntime for CommandRuntime {
    fn start(
        &self,
        helper_num: Address,
        model: Option<&str>,
        helpers_dir: Option<&str>,
    ) -> Result<String> {
        let name = container_name(&self.prefix, helper_num);

        let num_env = format!("HELPER_NUM={helper_num}");
        let mut args = vec!["run", "--detach", "--name", &name, "--env", &num_env];

        let model_env = model.map(|m| format!("HELPER_MODEL={m}"));
        if let Some(env) = model_env.as_deref() {
            args.extend(["--env", env]);
        }

        // Mount the helper's own subdirectory as its workspace.
        let volume = helpers_dir.map(|dir| format!("{dir}/{helper_num}:/home/agent"));
        if let Some(vol) = volume.as_deref() {
            args.extend(["--volume", vol]);
        }

        args.push(&self.image);
        self.run_checked(&args)?;
        log::info!("[Runtime] Started container {name}");
        Ok(name)
    }

    fn stop(&self, container_name: &str) -> Result<bool> {
        let stopped = Command::new(&self.command)
            .args(["stop", container_name])
            .output()
            .with_context(|| format!("failed to run {}", self.command))?
            .status
            .success();

        // Remove regardless: a created-but-stopped container still holds
        // the name, which would block a future spawn to the same slot.
        let _ = Command::new(&self.command)
            .args(["rm", container_name])
            .output();

        if stopped {
            log::info!("[Runtime] Stopped container {container_name}");
        }
        Ok(stopped)
    }

    fn is_running(&self, container_name: &str) -> Result<bool> {
        let filter = format!("name=^{container_name}$");
        let out = self.run_checked(&["ps", "--filter", &filter, "--format", "{{.Names}}"])?;
        Ok(out.lines().any(|line| line.trim() == container_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_scheme() {
        assert_eq!(container_name("swarmhub-myapp", 3), "swarmhub-myapp-helper-3");
    }

    #[test]
    fn parse_helper_num_current_format() {
        assert_eq!(parse_helper_num("swarmhub-myapp-helper-7"), Some(7));
    }

    #[test]
    fn parse_helper_num_legacy_format() {
        assert_eq!(parse_helper_num("swarmhub-helper-12-a3f9"), Some(12));
    }

    #[test]
    fn parse_helper_num_rejects_unrelated_names() {
        assert_eq!(parse_helper_num("swarmhub-myapp"), None);
        assert_eq!(parse_helper_num("helper"), None);
        assert_eq!(parse_helper_num("swarmhub-helper-x"), None);
    }
}
