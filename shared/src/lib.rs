//! Animatronic Shared Types
//!
//! This crate provides the data model, error taxonomy and connection state
//! machine shared between the connection manager, the animatronic service and
//! whatever boundary layer exposes them.

pub mod error;
pub mod model;
pub mod state_machine;

pub use error::{ControlError, ControlResult, TransportError, TransportErrorKind};
pub use model::{
    AnimatronicCommand, AnimatronicStatus, AnimatronicSystem, CommandStatus, ConnectionStatus,
    Health, SystemInfo, NOT_AVAILABLE,
};
pub use state_machine::ConnectionState;

/// Default tunables for remote sessions, retries and health checks
pub mod defaults {
    /// SSH port used when a system does not specify one
    pub const SSH_PORT: u16 = 22;

    /// How long a session may take to become ready (TCP + handshake + auth)
    pub const READY_TIMEOUT_MS: u64 = 20_000;

    /// Interval between keep-alive probes on an idle session
    pub const KEEPALIVE_INTERVAL_MS: u64 = 10_000;

    /// Unanswered keep-alives before a session is considered dead
    pub const KEEPALIVE_COUNT_MAX: u32 = 3;

    /// Total attempts made by a retried command
    pub const MAX_RETRIES: u32 = 3;

    /// First backoff delay, doubled on every further attempt
    pub const BASE_DELAY_MS: u64 = 1_000;

    /// Upper bound on a single backoff delay
    pub const MAX_DELAY_MS: u64 = 10_000;

    /// Bound on a single remote command execution
    pub const COMMAND_TIMEOUT_MS: u64 = 30_000;

    /// Period of the background health probe
    pub const HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;

    /// Bound on a single health probe
    pub const HEALTH_PROBE_TIMEOUT_MS: u64 = 5_000;

    /// Number of command records retained before the oldest are evicted
    pub const HISTORY_CAPACITY: usize = 1_000;

    /// Records returned by a history query without an explicit limit
    pub const HISTORY_DEFAULT_LIMIT: usize = 100;

    /// Fallback credentials when neither a per-system nor a default pair is configured
    pub const FALLBACK_USER: &str = "pi";
    pub const FALLBACK_PASSWORD: &str = "raspberry";
}
