//! Local shell transport for development without show hardware
//!
//! Every system is simulated by the local machine: commands run through
//! `sh -c` on this host regardless of the configured address.

use crate::transport::traits::{ConnectParams, ExecOutput, RemoteSession, RemoteTransport};
use animatronic_shared::TransportError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Shell used to interpret commands
const SHELL: &str = "sh";

/// Session that executes commands on the local host
pub struct LocalSession {
    system_id: String,
    closed: AtomicBool,
}

impl LocalSession {
    fn new(system_id: String) -> Self {
        Self {
            system_id,
            closed: AtomicBool::new(false),
        }
    }
}

async fn run_shell(command: &str) -> Result<ExecOutput, TransportError> {
    let output = Command::new(SHELL)
        .arg("-c")
        .arg(command)
        .kill_on_drop(true)
        .output()
        .await?;

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        // Killed by a signal: report like a shell would
        exit_code: output.status.code().unwrap_or(128),
    })
}

#[async_trait]
impl RemoteSession for LocalSession {
    async fn exec(&self, command: &str) -> Result<ExecOutput, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::closed(format!(
                "local session for {} is closed",
                self.system_id
            )));
        }
        debug!("[LOCAL] {} $ {}", self.system_id, command);
        run_shell(command).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

/// Connector that simulates every system with the local shell
#[derive(Debug, Default, Clone)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteTransport for LocalTransport {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn RemoteSession>, TransportError> {
        // Make sure a shell is actually available before handing out a session
        let probe = timeout(params.ready_timeout, run_shell("true"))
            .await
            .map_err(|_| TransportError::timeout("local shell did not become ready"))??;
        if !probe.is_success() {
            return Err(TransportError::refused(format!(
                "local shell probe exited with {}",
                probe.exit_code
            )));
        }

        Ok(Box::new(LocalSession::new(params.system_id.clone())))
    }

    fn name(&self) -> &'static str {
        "Local"
    }
}
