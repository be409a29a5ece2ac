//! Transport trait abstraction for pluggable remote shell backends

use animatronic_shared::TransportError;
use async_trait::async_trait;
use std::time::Duration;

/// Everything a transport needs to open a session to one system
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub system_id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Bound on TCP connect + handshake + authentication
    pub ready_timeout: Duration,
    pub keepalive_interval: Duration,
    /// Unanswered keep-alives tolerated before the session is declared dead
    pub keepalive_count_max: u32,
    /// Upper bound on a single command; transports may enforce it themselves
    pub command_timeout: Duration,
}

/// Raw outcome of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An open remote command-execution session bound to one system
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a shell command and collect its output
    async fn exec(&self, command: &str) -> Result<ExecOutput, TransportError>;

    /// Close the session gracefully
    async fn close(&self) -> Result<(), TransportError>;

    /// Whether the session is still usable (keep-alives answered, not closed)
    fn is_alive(&self) -> bool;
}

/// Factory for opening remote sessions
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Attempt to open a session, returning it on success
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn RemoteSession>, TransportError>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
