//! Connection management for remote animatronic controllers
//!
//! This module handles:
//! - Pooled sessions with lazy connect and reuse
//! - Per-system command serialization
//! - Retries with exponential backoff
//! - Health probing and status tracking

mod backoff;
mod manager;

pub use backoff::BackoffPolicy;
pub use manager::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, SessionHandle, HEALTH_PROBE_COMMAND,
};
