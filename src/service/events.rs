//! Events published by the animatronic service

use crate::connection::ConnectionEvent;
use animatronic_shared::{AnimatronicCommand, Health};

/// Service-level events: relayed connection events plus command lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    AnimatronicConnected { system_id: String },
    AnimatronicDisconnected { system_id: String },
    AnimatronicError { system_id: String, error: String },
    AnimatronicHealthChanged {
        system_id: String,
        from: Health,
        to: Health,
    },
    CommandStarted(AnimatronicCommand),
    CommandCompleted(AnimatronicCommand),
    CommandFailed(AnimatronicCommand),
}

impl From<ConnectionEvent> for ServiceEvent {
    fn from(event: ConnectionEvent) -> Self {
        match event {
            ConnectionEvent::Connected { system_id } => {
                ServiceEvent::AnimatronicConnected { system_id }
            }
            ConnectionEvent::Disconnected { system_id } => {
                ServiceEvent::AnimatronicDisconnected { system_id }
            }
            ConnectionEvent::ConnectionError { system_id, error } => {
                ServiceEvent::AnimatronicError { system_id, error }
            }
            ConnectionEvent::HealthChanged {
                system_id,
                from,
                to,
            } => ServiceEvent::AnimatronicHealthChanged {
                system_id,
                from,
                to,
            },
        }
    }
}

impl ServiceEvent {
    /// The system this event concerns
    pub fn system_id(&self) -> &str {
        match self {
            ServiceEvent::AnimatronicConnected { system_id }
            | ServiceEvent::AnimatronicDisconnected { system_id }
            | ServiceEvent::AnimatronicError { system_id, .. }
            | ServiceEvent::AnimatronicHealthChanged { system_id, .. } => system_id,
            ServiceEvent::CommandStarted(cmd)
            | ServiceEvent::CommandCompleted(cmd)
            | ServiceEvent::CommandFailed(cmd) => &cmd.animatronic_id,
        }
    }
}
