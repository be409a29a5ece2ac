//! Connection State Machine
//!
//! Defines the valid per-system connection transitions. The connection manager
//! feeds it link events and records the resulting state in the system's status.

use serde::{Deserialize, Serialize};

/// Connection state of a single system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out a backoff delay before the next attempt
    Retrying,
    /// Retries exhausted; stays here until the next explicit connect
    Failed,
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A session is being opened
    ConnectStarted,
    /// A usable session is available
    ConnectSucceeded,
    /// An attempt (connect or command) failed with a transport error
    AttemptFailed { retries_remaining: bool },
    /// Backoff delay elapsed, the next attempt is starting
    BackoffElapsed,
    /// Session closed locally or by the remote end
    Closed,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid and state changed (or stayed put)
    Success(ConnectionState),
    /// Transition was invalid from current state
    Invalid {
        from: ConnectionState,
        event: LinkEvent,
    },
}

/// Per-system connection state machine
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
}

impl ConnectionStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self {
            current_state: ConnectionState::Disconnected,
        }
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        // Closing is always allowed
        if event == LinkEvent::Closed {
            self.current_state = ConnectionState::Disconnected;
            return TransitionResult::Success(self.current_state);
        }

        match self.get_next_state(&event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    /// Get the next state for a given event, if the transition is valid
    fn get_next_state(&self, event: &LinkEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        use LinkEvent::*;

        match (self.current_state, event) {
            // A manual connect revives a failed system
            (Disconnected | Failed, ConnectStarted) => Some(Connecting),

            (Connecting, ConnectSucceeded) => Some(Connected),
            (Connected, ConnectSucceeded) => Some(Connected),

            // Disconnected covers a session that was evicted by the failed attempt
            (Disconnected | Connecting | Connected, AttemptFailed { retries_remaining: true }) => {
                Some(Retrying)
            }
            (
                Disconnected | Connecting | Connected | Retrying,
                AttemptFailed { retries_remaining: false },
            ) => Some(Failed),

            (Retrying, BackoffElapsed) => Some(Connecting),

            // Invalid transition
            _ => None,
        }
    }
}

/// Check if a transition from one state to another is generally valid
pub fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    match (from, to) {
        // Same state is always valid
        (a, b) if a == b => true,

        // Disconnect can happen from anywhere
        (_, Disconnected) => true,

        (Disconnected | Failed, Connecting) => true,
        (Connecting, Connected) => true,
        (Disconnected | Connecting | Connected, Retrying) => true,
        (Retrying, Connecting) => true,
        (Disconnected | Connecting | Connected | Retrying, Failed) => true,

        _ => false,
    }
}
