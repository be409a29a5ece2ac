//! Animatronic service - tracked command execution and status aggregation
//!
//! Sits on top of the connection manager: wraps every command in a history
//! record with a lifecycle, merges connection status with live telemetry and
//! republishes connection events for consumers.

use super::events::ServiceEvent;
use super::history::CommandHistory;
use super::telemetry;
use crate::connection::ConnectionManager;
use animatronic_shared::{
    defaults, AnimatronicCommand, AnimatronicStatus, AnimatronicSystem, CommandStatus,
    ControlError, ControlResult, SystemInfo,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Records kept before the oldest is evicted
    pub history_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            history_capacity: defaults::HISTORY_CAPACITY,
        }
    }
}

/// Business-level facade over the connection manager
pub struct AnimatronicService {
    manager: Arc<ConnectionManager>,
    history: RwLock<CommandHistory>,
    event_tx: broadcast::Sender<ServiceEvent>,
    relay: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AnimatronicService {
    /// Create the service and start relaying connection events
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(manager: Arc<ConnectionManager>, config: ServiceConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let relay = spawn_relay(&manager, event_tx.clone());

        Self {
            manager,
            history: RwLock::new(CommandHistory::new(config.history_capacity)),
            event_tx,
            relay: std::sync::Mutex::new(Some(relay)),
        }
    }

    /// Subscribe to service events
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.event_tx.subscribe()
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn get_animatronics(&self) -> Vec<AnimatronicSystem> {
        self.manager.get_animatronics()
    }

    /// Every registered system merged with its status and, when reachable, telemetry
    pub async fn get_animatronic_statuses(&self) -> Vec<AnimatronicStatus> {
        let statuses = self.manager.get_connection_status().await;
        let systems = self.manager.get_animatronics();

        let merged = systems.into_iter().zip(statuses).map(|(system, status)| async move {
            let system_info = if status.connected && system.enabled {
                Some(telemetry::collect(&self.manager, &system.id).await)
            } else {
                None
            };
            AnimatronicStatus {
                system,
                status,
                system_info,
            }
        });

        join_all(merged).await
    }

    /// Run the fixed diagnostic set against one system
    pub async fn get_system_info(&self, system_id: &str) -> ControlResult<SystemInfo> {
        self.manager.registry().require(system_id)?;
        Ok(telemetry::collect(&self.manager, system_id).await)
    }

    /// Probe every enabled system
    pub async fn test_connectivity(&self) -> HashMap<String, bool> {
        self.manager.check_health().await
    }

    /// Execute a command with retries and track it in the history
    ///
    /// Validation and unknown-system failures are returned before a record
    /// is created. Any later failure is recorded and then returned.
    pub async fn execute_command(
        &self,
        system_id: &str,
        command: &str,
    ) -> ControlResult<AnimatronicCommand> {
        if command.trim().is_empty() {
            return Err(ControlError::Validation("command must be a non-empty string".into()));
        }
        self.manager.registry().require(system_id)?;

        let mut record =
            AnimatronicCommand::pending(Uuid::new_v4().to_string(), system_id, command);
        if let Some(evicted) = self.history.write().await.push(record.clone()) {
            debug!("[SERVICE] History full, evicted {}", evicted.id);
        }
        info!("[SERVICE] {} <- `{}` ({})", system_id, command, record.id);
        self.emit(ServiceEvent::CommandStarted(record.clone()));

        self.advance(&mut record, CommandStatus::Executing).await;

        let started = Instant::now();
        let outcome = self
            .manager
            .execute_command_with_retry(system_id, command, None)
            .await;
        let elapsed = started.elapsed().as_millis() as u64;
        record.execution_time = Some(elapsed);

        match outcome {
            Ok(stdout) => {
                record.result = Some(stdout);
                self.advance(&mut record, CommandStatus::Completed).await;
                info!("[SERVICE] {} completed in {}ms", record.id, elapsed);
                self.emit(ServiceEvent::CommandCompleted(record.clone()));
                Ok(record)
            }
            Err(e) => {
                record.error = Some(e.to_string());
                self.advance(&mut record, CommandStatus::Failed).await;
                warn!("[SERVICE] {} failed after {}ms: {}", record.id, elapsed, e);
                self.emit(ServiceEvent::CommandFailed(record));
                Err(e)
            }
        }
    }

    /// Up to `limit` records (default 100), newest first
    pub async fn get_command_history(&self, limit: Option<usize>) -> Vec<AnimatronicCommand> {
        self.history
            .read()
            .await
            .recent(limit.unwrap_or(defaults::HISTORY_DEFAULT_LIMIT))
    }

    pub async fn get_command(&self, command_id: &str) -> Option<AnimatronicCommand> {
        self.history.read().await.get(command_id).cloned()
    }

    /// Disconnect everything, drop history and stop relaying events
    pub async fn cleanup(&self) {
        info!("[SERVICE] Cleaning up");
        self.manager.disconnect_all().await;
        self.history.write().await.clear();
        if let Some(relay) = self.take_relay() {
            relay.abort();
        }
    }

    /// Move the caller's record to `next` and mirror it into history
    ///
    /// The caller's copy is authoritative; a record already evicted from
    /// history is not re-inserted.
    async fn advance(&self, record: &mut AnimatronicCommand, next: CommandStatus) {
        if !record.status.can_transition_to(next) {
            warn!(
                "[SERVICE] {} cannot move {:?} -> {:?}",
                record.id, record.status, next
            );
            return;
        }
        record.status = next;
        if let Some(stored) = self.history.write().await.get_mut(&record.id) {
            *stored = record.clone();
        }
    }

    fn take_relay(&self) -> Option<JoinHandle<()>> {
        match self.relay.lock() {
            Ok(mut relay) => relay.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn emit(&self, event: ServiceEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Drop for AnimatronicService {
    fn drop(&mut self) {
        if let Some(relay) = self.take_relay() {
            relay.abort();
        }
    }
}

fn spawn_relay(
    manager: &ConnectionManager,
    event_tx: broadcast::Sender<ServiceEvent>,
) -> JoinHandle<()> {
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let _ = event_tx.send(ServiceEvent::from(event));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("[SERVICE] Relay lagged, dropped {} connection events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("[SERVICE] Relay stopped");
    })
}
