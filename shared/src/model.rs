//! Data model for animatronic systems, their connection status and tracked commands

use crate::defaults;
use crate::state_machine::ConnectionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel used for a telemetry field whose probe failed
pub const NOT_AVAILABLE: &str = "N/A";

/// A remote embedded computer driving physical show hardware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimatronicSystem {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_enabled() -> bool {
    true
}

fn default_port() -> u16 {
    defaults::SSH_PORT
}

impl AnimatronicSystem {
    /// Create an enabled system on the default SSH port
    pub fn new(id: impl Into<String>, name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            host: host.into(),
            description: String::new(),
            enabled: true,
            port: defaults::SSH_PORT,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Three-valued reachability assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Healthy => write!(f, "healthy"),
            Health::Degraded => write!(f, "degraded"),
            Health::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Per-system connection bookkeeping, owned by the connection manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub id: String,
    pub connected: bool,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub health: Health,
    pub state: ConnectionState,
}

impl ConnectionStatus {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            connected: false,
            last_connected: None,
            last_error: None,
            retry_count: 0,
            health: Health::Healthy,
            state: ConnectionState::Disconnected,
        }
    }
}

/// Lifecycle of a tracked command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl CommandStatus {
    /// Completed and failed commands never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }

    /// Check whether `self -> next` is a legal lifecycle step
    pub fn can_transition_to(self, next: CommandStatus) -> bool {
        matches!(
            (self, next),
            (CommandStatus::Pending, CommandStatus::Executing)
                | (CommandStatus::Executing, CommandStatus::Completed)
                | (CommandStatus::Executing, CommandStatus::Failed)
        )
    }
}

/// One remote command invocation issued through the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimatronicCommand {
    pub id: String,
    pub animatronic_id: String,
    pub command: String,
    pub timestamp: DateTime<Utc>,
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time from dispatch to outcome, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<u64>,
}

impl AnimatronicCommand {
    /// Create a pending record
    pub fn pending(
        id: impl Into<String>,
        animatronic_id: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            animatronic_id: animatronic_id.into(),
            command: command.into(),
            timestamp: Utc::now(),
            status: CommandStatus::Pending,
            result: None,
            error: None,
            execution_time: None,
        }
    }
}

/// Live telemetry collected from a connected system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub uptime: String,
    pub temperature: String,
    pub memory: String,
    pub disk: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            uptime: NOT_AVAILABLE.into(),
            temperature: NOT_AVAILABLE.into(),
            memory: NOT_AVAILABLE.into(),
            disk: NOT_AVAILABLE.into(),
        }
    }
}

/// Registry entry merged with its connection status and, when reachable, telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimatronicStatus {
    #[serde(flatten)]
    pub system: AnimatronicSystem,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_info: Option<SystemInfo>,
}
