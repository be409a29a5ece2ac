//! Connection manager with pooled sessions, retries and health tracking
//!
//! Owns at most one live session per registered system. Sessions are opened
//! lazily, reused while alive and replaced after a fatal transport error.
//! Commands against one system run one at a time in arrival order; commands
//! against different systems run concurrently.

use super::backoff::BackoffPolicy;
use crate::registry::SystemRegistry;
use crate::transport::{ConnectParams, ExecOutput, RemoteSession, RemoteTransport};
use animatronic_shared::state_machine::{ConnectionStateMachine, LinkEvent, TransitionResult};
use animatronic_shared::{
    defaults, AnimatronicSystem, ConnectionState, ConnectionStatus, ControlError, ControlResult,
    Health, TransportError,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Command used to probe reachability of an idle system
pub const HEALTH_PROBE_COMMAND: &str = "echo health_check";

const EVENT_CAPACITY: usize = 256;

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A new session was opened
    Connected { system_id: String },
    /// A session was closed, locally or by the remote end
    Disconnected { system_id: String },
    /// A connect or command attempt failed at the transport level
    ConnectionError { system_id: String, error: String },
    /// The health assessment of a system changed
    HealthChanged {
        system_id: String,
        from: Health,
        to: Health,
    },
}

/// Configuration for the connection manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Connection timeout (TCP + handshake + auth)
    #[serde(rename = "ready_timeout_ms", with = "crate::config::millis")]
    pub ready_timeout: Duration,
    #[serde(rename = "keepalive_interval_ms", with = "crate::config::millis")]
    pub keepalive_interval: Duration,
    pub keepalive_count_max: u32,
    /// Bound on a single remote command
    #[serde(rename = "command_timeout_ms", with = "crate::config::millis")]
    pub command_timeout: Duration,
    /// Bound on a single health probe
    #[serde(rename = "probe_timeout_ms", with = "crate::config::millis")]
    pub probe_timeout: Duration,
    /// Retry budget shared by connects and commands
    pub retry: BackoffPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_millis(defaults::READY_TIMEOUT_MS),
            keepalive_interval: Duration::from_millis(defaults::KEEPALIVE_INTERVAL_MS),
            keepalive_count_max: defaults::KEEPALIVE_COUNT_MAX,
            command_timeout: Duration::from_millis(defaults::COMMAND_TIMEOUT_MS),
            probe_timeout: Duration::from_millis(defaults::HEALTH_PROBE_TIMEOUT_MS),
            retry: BackoffPolicy::default(),
        }
    }
}

/// An open session to one system, exclusively owned by the manager's pool
pub struct SessionHandle {
    system_id: String,
    generation: u64,
    connected_at: DateTime<Utc>,
    session: Box<dyn RemoteSession>,
    /// Serializes commands on this session (tokio's mutex is FIFO-fair)
    exec_lock: Mutex<()>,
}

impl SessionHandle {
    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    /// Monotonic id distinguishing this session from earlier ones of the same system
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn is_alive(&self) -> bool {
        self.session.is_alive()
    }

    /// Whether a command is currently running on this session
    pub fn is_busy(&self) -> bool {
        self.exec_lock.try_lock().is_err()
    }

    async fn run(&self, command: &str, limit: Duration) -> Result<ExecOutput, TransportError> {
        let _turn = self.exec_lock.lock().await;
        timeout(limit, self.session.exec(command))
            .await
            .map_err(|_| TransportError::timeout(format!("command exceeded {:?}", limit)))?
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.session.close().await
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("system_id", &self.system_id)
            .field("generation", &self.generation)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

struct SlotState {
    status: ConnectionStatus,
    fsm: ConnectionStateMachine,
}

/// Everything the manager tracks for one system
struct SystemSlot {
    /// Pooled session; held across a connect so only one session is opened
    session: Mutex<Option<Arc<SessionHandle>>>,
    state: RwLock<SlotState>,
    /// Wakes retry loops sleeping out a backoff
    cancel: Notify,
    /// Bumped on every disconnect so retry loops notice cancellation
    epoch: AtomicU64,
}

impl SystemSlot {
    fn new(system_id: &str) -> Self {
        Self {
            session: Mutex::new(None),
            state: RwLock::new(SlotState {
                status: ConnectionStatus::new(system_id),
                fsm: ConnectionStateMachine::new(),
            }),
            cancel: Notify::new(),
            epoch: AtomicU64::new(0),
        }
    }
}

/// Manages remote sessions, command execution and health for every known system
pub struct ConnectionManager {
    config: ConnectionConfig,
    registry: Arc<SystemRegistry>,
    transport: Arc<dyn RemoteTransport>,
    slots: HashMap<String, SystemSlot>,
    next_generation: AtomicU64,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a manager with one idle status entry per registered system
    pub fn new(
        registry: Arc<SystemRegistry>,
        transport: Arc<dyn RemoteTransport>,
        config: ConnectionConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let slots = registry
            .all()
            .iter()
            .map(|s| (s.id.clone(), SystemSlot::new(&s.id)))
            .collect();

        info!(
            "[CONN] Managing {} systems over {} transport",
            registry.len(),
            transport.name()
        );

        Self {
            config,
            registry,
            transport,
            slots,
            next_generation: AtomicU64::new(0),
            event_tx,
        }
    }

    /// Subscribe to connection events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn registry(&self) -> &SystemRegistry {
        &self.registry
    }

    /// Snapshot of the registered systems
    pub fn get_animatronics(&self) -> Vec<AnimatronicSystem> {
        self.registry.all().to_vec()
    }

    /// Snapshot of every system's connection status, in registry order
    pub async fn get_connection_status(&self) -> Vec<ConnectionStatus> {
        let mut out = Vec::with_capacity(self.registry.len());
        for system in self.registry.all() {
            if let Some(slot) = self.slots.get(&system.id) {
                out.push(slot.state.read().await.status.clone());
            }
        }
        out
    }

    /// Status of a single system
    pub async fn status_of(&self, system_id: &str) -> ControlResult<ConnectionStatus> {
        let (_, slot) = self.lookup(system_id)?;
        Ok(slot.state.read().await.status.clone())
    }

    /// Open (or reuse) the session for a system
    pub async fn connect(&self, system_id: &str) -> ControlResult<Arc<SessionHandle>> {
        let (system, slot) = self.lookup(system_id)?;
        let result = self.acquire(system, slot).await;
        if result.is_err() {
            self.transition(system_id, slot, LinkEvent::AttemptFailed {
                retries_remaining: false,
            })
            .await;
        }
        result
    }

    /// Run a command once and return its trimmed stdout
    pub async fn execute_command(&self, system_id: &str, command: &str) -> ControlResult<String> {
        let (system, slot) = self.lookup(system_id)?;
        validate_command(command)?;

        let handle = match self.acquire(system, slot).await {
            Ok(handle) => handle,
            Err(e) => {
                self.transition(system_id, slot, LinkEvent::AttemptFailed {
                    retries_remaining: false,
                })
                .await;
                return Err(e);
            }
        };
        self.run_on(system_id, slot, &handle, command).await
    }

    /// Run a command, retrying transport failures with exponential backoff
    ///
    /// `max_retries` is the total number of attempts and defaults to the
    /// configured policy.
    pub async fn execute_command_with_retry(
        &self,
        system_id: &str,
        command: &str,
        max_retries: Option<u32>,
    ) -> ControlResult<String> {
        let (system, slot) = self.lookup(system_id)?;
        validate_command(command)?;

        let policy = &self.config.retry;
        let attempts = max_retries.unwrap_or(policy.max_retries).max(1);
        let epoch = slot.epoch.load(Ordering::SeqCst);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = policy.delay_for_attempt(attempt - 1);
                debug!(
                    "[CONN] {} retrying in {:?} (attempt {}/{})",
                    system_id,
                    delay,
                    attempt + 1,
                    attempts
                );

                let cancelled = slot.cancel.notified();
                tokio::pin!(cancelled);
                if slot.epoch.load(Ordering::SeqCst) != epoch {
                    return Err(ControlError::Cancelled {
                        system_id: system_id.to_string(),
                    });
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = &mut cancelled => {
                        info!("[CONN] {} retry cancelled by disconnect", system_id);
                        return Err(ControlError::Cancelled {
                            system_id: system_id.to_string(),
                        });
                    }
                }
                self.transition(system_id, slot, LinkEvent::BackoffElapsed).await;
            }

            let result = match self.acquire(system, slot).await {
                Ok(handle) => self.run_on(system_id, slot, &handle, command).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(stdout) => return Ok(stdout),
                Err(e) if e.is_retryable() => {
                    let retries_remaining = attempt + 1 < attempts;
                    warn!(
                        "[CONN] {} attempt {}/{} failed: {}",
                        system_id,
                        attempt + 1,
                        attempts,
                        e
                    );
                    self.transition(system_id, slot, LinkEvent::AttemptFailed { retries_remaining })
                        .await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        // Only an exhausted budget may mark the system unhealthy
        self.set_health(system_id, slot, Health::Unhealthy).await;

        Err(ControlError::RetriesExhausted {
            system_id: system_id.to_string(),
            attempts,
            last_error: Box::new(last_error.unwrap_or_else(|| {
                TransportError::io("no attempt was made").into()
            })),
        })
    }

    /// Probe every enabled system and update its health
    ///
    /// Never fails: unreachable systems simply map to `false`.
    pub async fn check_health(&self) -> HashMap<String, bool> {
        let probes = self.registry.enabled().map(|system| async move {
            let reachable = self.probe(system).await;
            (system.id.clone(), reachable)
        });

        join_all(probes).await.into_iter().collect()
    }

    /// Close the session of one system and cancel its pending retries
    pub async fn disconnect(&self, system_id: &str) -> ControlResult<()> {
        let (_, slot) = self.lookup(system_id)?;

        slot.epoch.fetch_add(1, Ordering::SeqCst);
        slot.cancel.notify_waiters();

        let handle = slot.session.lock().await.take();
        let had_session = handle.is_some();
        if let Some(handle) = handle {
            if let Err(e) = handle.close().await {
                warn!("[CONN] {} did not close cleanly: {}", system_id, e);
            }
        }

        {
            let mut state = slot.state.write().await;
            state.status.connected = false;
            state.fsm.process_event(LinkEvent::Closed);
            state.status.state = state.fsm.state();
        }

        if had_session {
            info!("[CONN] Disconnected from {}", system_id);
            self.emit(ConnectionEvent::Disconnected {
                system_id: system_id.to_string(),
            });
        }
        Ok(())
    }

    /// Close every session
    pub async fn disconnect_all(&self) {
        let closes = self.registry.all().iter().map(|s| self.disconnect(&s.id));
        for result in join_all(closes).await {
            if let Err(e) = result {
                warn!("[CONN] Disconnect failed: {}", e);
            }
        }
    }

    fn lookup(&self, system_id: &str) -> ControlResult<(&AnimatronicSystem, &SystemSlot)> {
        let system = self.registry.require(system_id)?;
        let slot = self
            .slots
            .get(system_id)
            .ok_or_else(|| ControlError::UnknownSystem(system_id.to_string()))?;
        Ok((system, slot))
    }

    fn connect_params(&self, system: &AnimatronicSystem) -> ConnectParams {
        let creds = self.registry.credentials_for(&system.id);
        ConnectParams {
            system_id: system.id.clone(),
            host: system.host.clone(),
            port: system.port,
            username: creds.username.clone(),
            password: creds.password.clone(),
            ready_timeout: self.config.ready_timeout,
            keepalive_interval: self.config.keepalive_interval,
            keepalive_count_max: self.config.keepalive_count_max,
            command_timeout: self.config.command_timeout,
        }
    }

    /// Return the pooled session or open a new one.
    ///
    /// Failure bookkeeping (retry count, last error, event) happens here; the
    /// resulting state transition is left to the caller, which knows whether
    /// retries remain.
    async fn acquire(
        &self,
        system: &AnimatronicSystem,
        slot: &SystemSlot,
    ) -> ControlResult<Arc<SessionHandle>> {
        let system_id = system.id.as_str();
        let mut pooled = slot.session.lock().await;

        if let Some(handle) = pooled.as_ref() {
            if handle.is_alive() {
                let handle = handle.clone();
                drop(pooled);
                // Resuming after a backoff on a session that survived
                if slot.state.read().await.fsm.state() != ConnectionState::Connected {
                    self.transition(system_id, slot, LinkEvent::ConnectSucceeded).await;
                }
                return Ok(handle);
            }

            // Remote end went away while pooled
            if let Some(stale) = pooled.take() {
                debug!("[CONN] {} pooled session #{} is dead", system_id, stale.generation);
                let _ = stale.close().await;
                self.mark_closed(system_id, slot).await;
            }
        }

        self.transition(system_id, slot, LinkEvent::ConnectStarted).await;
        let params = self.connect_params(system);

        let opened = match timeout(self.config.ready_timeout, self.transport.connect(&params)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(format!(
                "{} not ready after {:?}",
                system.host, self.config.ready_timeout
            ))),
        };

        match opened {
            Ok(session) => {
                let handle = Arc::new(SessionHandle {
                    system_id: system_id.to_string(),
                    generation: self.next_generation.fetch_add(1, Ordering::SeqCst) + 1,
                    connected_at: Utc::now(),
                    session,
                    exec_lock: Mutex::new(()),
                });
                *pooled = Some(handle.clone());
                drop(pooled);

                let previous_health = {
                    let mut state = slot.state.write().await;
                    let previous = state.status.health;
                    state.status.connected = true;
                    state.status.last_connected = Some(handle.connected_at);
                    state.status.retry_count = 0;
                    state.status.health = Health::Healthy;
                    if let TransitionResult::Success(s) =
                        state.fsm.process_event(LinkEvent::ConnectSucceeded)
                    {
                        state.status.state = s;
                    }
                    previous
                };

                info!(
                    "[CONN] Connected to {} ({}:{}) session #{}",
                    system_id, system.host, system.port, handle.generation
                );
                self.emit(ConnectionEvent::Connected {
                    system_id: system_id.to_string(),
                });
                if previous_health != Health::Healthy {
                    self.emit(ConnectionEvent::HealthChanged {
                        system_id: system_id.to_string(),
                        from: previous_health,
                        to: Health::Healthy,
                    });
                }
                Ok(handle)
            }
            Err(e) => {
                drop(pooled);
                warn!("[CONN] Failed to connect to {}: {}", system_id, e);
                self.record_failure(system_id, slot, &e).await;
                Err(e.into())
            }
        }
    }

    /// Run a command on an acquired session
    async fn run_on(
        &self,
        system_id: &str,
        slot: &SystemSlot,
        handle: &Arc<SessionHandle>,
        command: &str,
    ) -> ControlResult<String> {
        debug!("[CONN] {} $ {}", system_id, command);

        match handle.run(command, self.config.command_timeout).await {
            Ok(output) if output.is_success() => Ok(output.stdout.trim().to_string()),
            Ok(output) => Err(ControlError::RemoteCommand {
                system_id: system_id.to_string(),
                command: command.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            }),
            Err(e) => {
                warn!("[CONN] {} command failed: {}", system_id, e);
                self.record_failure(system_id, slot, &e).await;
                if e.is_fatal_to_session() || !handle.is_alive() {
                    self.evict(system_id, slot, handle).await;
                }
                Err(e.into())
            }
        }
    }

    /// Drop a broken session from the pool, unless it was already replaced
    async fn evict(&self, system_id: &str, slot: &SystemSlot, handle: &Arc<SessionHandle>) {
        let mut pooled = slot.session.lock().await;
        let current = pooled
            .as_ref()
            .is_some_and(|h| h.generation == handle.generation);
        if !current {
            return;
        }
        pooled.take();
        drop(pooled);

        // A hung command may still hold the session; closing must not block the caller
        let stale = handle.clone();
        let id = system_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = stale.close().await {
                debug!("[CONN] {} force-close: {}", id, e);
            }
        });
        self.mark_closed(system_id, slot).await;
    }

    async fn mark_closed(&self, system_id: &str, slot: &SystemSlot) {
        {
            let mut state = slot.state.write().await;
            state.status.connected = false;
            state.fsm.process_event(LinkEvent::Closed);
            state.status.state = state.fsm.state();
        }
        info!("[CONN] Session to {} closed", system_id);
        self.emit(ConnectionEvent::Disconnected {
            system_id: system_id.to_string(),
        });
    }

    /// Book a failed attempt without touching health
    async fn record_failure(&self, system_id: &str, slot: &SystemSlot, error: &TransportError) {
        {
            let mut state = slot.state.write().await;
            state.status.last_error = Some(error.to_string());
            state.status.retry_count = state.status.retry_count.saturating_add(1);
            if slot.session.try_lock().map(|s| s.is_none()).unwrap_or(false) {
                state.status.connected = false;
            }
        }
        self.emit(ConnectionEvent::ConnectionError {
            system_id: system_id.to_string(),
            error: error.to_string(),
        });
    }

    async fn transition(&self, system_id: &str, slot: &SystemSlot, event: LinkEvent) {
        let mut state = slot.state.write().await;
        match state.fsm.process_event(event) {
            TransitionResult::Success(s) => state.status.state = s,
            TransitionResult::Invalid { from, event } => {
                debug!("[CONN] {} ignoring {:?} while {:?}", system_id, event, from);
            }
        }
    }

    async fn set_health(&self, system_id: &str, slot: &SystemSlot, health: Health) {
        let previous = {
            let mut state = slot.state.write().await;
            std::mem::replace(&mut state.status.health, health)
        };
        if previous != health {
            info!("[HEALTH] {} {} -> {}", system_id, previous, health);
            self.emit(ConnectionEvent::HealthChanged {
                system_id: system_id.to_string(),
                from: previous,
                to: health,
            });
        }
    }

    /// Probe one system and record the resulting health
    async fn probe(&self, system: &AnimatronicSystem) -> bool {
        let system_id = system.id.as_str();
        let Some(slot) = self.slots.get(system_id) else {
            return false;
        };

        // A session busy with a command is evidently reachable
        let busy = slot
            .session
            .try_lock()
            .ok()
            .and_then(|pooled| pooled.clone())
            .is_some_and(|h| h.is_alive() && h.is_busy());

        let reachable = busy
            || match timeout(
                self.config.probe_timeout,
                self.execute_command(system_id, HEALTH_PROBE_COMMAND),
            )
            .await
            {
                // The command ran, so the system answered
                Ok(Ok(_)) | Ok(Err(ControlError::RemoteCommand { .. })) => true,
                Ok(Err(e)) => {
                    debug!("[HEALTH] {} probe failed: {}", system_id, e);
                    false
                }
                Err(_) => {
                    let e = TransportError::timeout(format!(
                        "health probe exceeded {:?}",
                        self.config.probe_timeout
                    ));
                    self.record_failure(system_id, slot, &e).await;
                    // The abandoned connect left nothing in flight
                    if slot.state.read().await.fsm.state() == ConnectionState::Connecting {
                        self.transition(system_id, slot, LinkEvent::AttemptFailed {
                            retries_remaining: false,
                        })
                        .await;
                    }
                    false
                }
            };

        let health = if reachable {
            Health::Healthy
        } else if slot.state.read().await.status.retry_count >= self.config.retry.max_retries {
            Health::Unhealthy
        } else {
            Health::Degraded
        };
        self.set_health(system_id, slot, health).await;

        reachable
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

fn validate_command(command: &str) -> ControlResult<()> {
    if command.trim().is_empty() {
        return Err(ControlError::Validation("command must be a non-empty string".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Credentials;
    use crate::transport::stub::StubTransport;
    use animatronic_shared::TransportErrorKind;
    use std::time::Instant;

    fn systems() -> Vec<AnimatronicSystem> {
        vec![
            AnimatronicSystem::new("orlok", "Count Orlok", "10.0.0.21"),
            AnimatronicSystem::new("pumpkin", "Pumpkin Head", "10.0.0.22"),
            AnimatronicSystem::new("crypt", "Crypt Keeper", "10.0.0.23").disabled(),
        ]
    }

    fn fast_config() -> ConnectionConfig {
        ConnectionConfig {
            ready_timeout: Duration::from_millis(500),
            command_timeout: Duration::from_millis(500),
            probe_timeout: Duration::from_millis(500),
            retry: BackoffPolicy::new(3, Duration::from_millis(20), Duration::from_millis(200)),
            ..Default::default()
        }
    }

    fn manager(stub: &StubTransport) -> ConnectionManager {
        manager_with(stub, fast_config())
    }

    fn manager_with(stub: &StubTransport, config: ConnectionConfig) -> ConnectionManager {
        let registry = Arc::new(SystemRegistry::with_credentials(
            systems(),
            Credentials::new("pi", "raspberry"),
        ));
        ConnectionManager::new(registry, Arc::new(stub.clone()), config)
    }

    fn flaky() -> TransportError {
        TransportError::io("channel open failed")
    }

    #[tokio::test]
    async fn test_unknown_system_never_touches_network() {
        let stub = StubTransport::new();
        let mgr = manager(&stub);

        assert!(matches!(
            mgr.connect("ghost").await,
            Err(ControlError::UnknownSystem(_))
        ));
        assert!(matches!(
            mgr.execute_command("ghost", "echo hi").await,
            Err(ControlError::UnknownSystem(_))
        ));
        assert!(matches!(
            mgr.execute_command_with_retry("ghost", "echo hi", None).await,
            Err(ControlError::UnknownSystem(_))
        ));
        assert_eq!(stub.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let stub = StubTransport::new();
        let mgr = manager(&stub);

        let first = mgr.connect("orlok").await.expect("connect");
        let second = mgr.connect("orlok").await.expect("connect again");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(stub.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_connects_open_one_session() {
        let stub = StubTransport::new();
        let mgr = manager(&stub);

        let (a, b) = tokio::join!(mgr.connect("orlok"), mgr.connect("orlok"));
        assert!(Arc::ptr_eq(&a.expect("a"), &b.expect("b")));
        assert_eq!(stub.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_uses_registry_credentials() {
        let stub = StubTransport::new();
        let mgr = manager(&stub);

        mgr.connect("pumpkin").await.expect("connect");
        let params = stub.last_params().expect("params recorded");
        assert_eq!(params.host, "10.0.0.22");
        assert_eq!(params.port, 22);
        assert_eq!(params.username, "pi");
        assert_eq!(params.password, "raspberry");
        assert_eq!(params.ready_timeout, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_connect_success_updates_status_and_emits() {
        let stub = StubTransport::new();
        let mgr = manager(&stub);
        let mut events = mgr.subscribe();

        mgr.connect("orlok").await.expect("connect");

        let status = mgr.status_of("orlok").await.expect("status");
        assert!(status.connected);
        assert!(status.last_connected.is_some());
        assert_eq!(status.retry_count, 0);
        assert_eq!(status.health, Health::Healthy);
        assert_eq!(status.state, ConnectionState::Connected);

        assert_eq!(
            events.recv().await.expect("event"),
            ConnectionEvent::Connected {
                system_id: "orlok".into()
            }
        );
    }

    #[tokio::test]
    async fn test_connect_failure_records_error() {
        let stub = StubTransport::new().fail_connects([TransportError::auth("bad password")]);
        let mgr = manager(&stub);
        let mut events = mgr.subscribe();

        let err = mgr.connect("orlok").await.expect_err("should fail");
        assert_eq!(err.transport().map(|e| e.kind), Some(TransportErrorKind::Auth));

        let status = mgr.status_of("orlok").await.expect("status");
        assert!(!status.connected);
        assert_eq!(status.retry_count, 1);
        assert!(status.last_error.as_deref().unwrap_or("").contains("bad password"));
        // A single failure never makes a system unhealthy
        assert_eq!(status.health, Health::Healthy);
        assert_eq!(status.state, ConnectionState::Failed);

        assert!(matches!(
            events.recv().await.expect("event"),
            ConnectionEvent::ConnectionError { system_id, .. } if system_id == "orlok"
        ));

        // A manual connect recovers and resets the counter
        mgr.connect("orlok").await.expect("reconnect");
        let status = mgr.status_of("orlok").await.expect("status");
        assert_eq!(status.retry_count, 0);
        assert_eq!(status.state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_execute_returns_trimmed_stdout() {
        let stub = StubTransport::new().respond("echo hi", ExecOutput::success("hi\n"));
        let mgr = manager(&stub);

        let out = mgr.execute_command("orlok", "echo hi").await.expect("exec");
        assert_eq!(out, "hi");
        // Auto-connected
        assert_eq!(stub.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_execute_rejects_empty_command() {
        let stub = StubTransport::new();
        let mgr = manager(&stub);

        assert!(matches!(
            mgr.execute_command("orlok", "   ").await,
            Err(ControlError::Validation(_))
        ));
        assert_eq!(stub.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_failure_is_not_retried() {
        let stub = StubTransport::new().respond(
            "false",
            ExecOutput {
                stdout: String::new(),
                stderr: "nope\n".into(),
                exit_code: 1,
            },
        );
        let mgr = manager(&stub);

        let err = mgr
            .execute_command_with_retry("orlok", "false", Some(3))
            .await
            .expect_err("remote failure");
        assert!(matches!(
            err,
            ControlError::RemoteCommand { exit_code: 1, ref stderr, .. } if stderr == "nope"
        ));
        assert_eq!(stub.exec_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_after_exact_attempts() {
        let stub = StubTransport::new().unreachable("10.0.0.21");
        let mgr = manager(&stub);

        let started = Instant::now();
        let err = mgr
            .execute_command_with_retry("orlok", "echo hi", Some(3))
            .await
            .expect_err("always failing");

        assert_eq!(stub.connect_count(), 3);
        assert!(matches!(err, ControlError::RetriesExhausted { attempts: 3, .. }));
        // Two backoff sleeps: 20ms + 40ms
        assert!(started.elapsed() >= Duration::from_millis(60));

        let status = mgr.status_of("orlok").await.expect("status");
        assert_eq!(status.retry_count, 3);
        assert_eq!(status.health, Health::Unhealthy);
        assert_eq!(status.state, ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_retry_does_not_touch_health_before_exhaustion() {
        let stub = StubTransport::new().unreachable("10.0.0.21");
        let mgr = Arc::new(manager_with(
            &stub,
            ConnectionConfig {
                retry: BackoffPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1)),
                ..fast_config()
            },
        ));

        let task = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.execute_command_with_retry("orlok", "echo hi", None).await })
        };

        // Inside the first backoff window
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = mgr.status_of("orlok").await.expect("status");
        assert_eq!(status.retry_count, 1);
        assert_eq!(status.health, Health::Healthy);
        assert_eq!(status.state, ConnectionState::Retrying);

        assert!(task.await.expect("join").is_err());
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_second_attempt() {
        let stub = StubTransport::new()
            .respond("echo hi", ExecOutput::success("hi\n"))
            .fail_execs([flaky()]);
        let mgr = manager(&stub);

        let out = mgr
            .execute_command_with_retry("orlok", "echo hi", Some(3))
            .await
            .expect("second attempt succeeds");
        assert_eq!(out, "hi");
        assert_eq!(stub.exec_count(), 2);
        // The session survived, so it was reused
        assert_eq!(stub.connect_count(), 1);

        let status = mgr.status_of("orlok").await.expect("status");
        assert_eq!(status.retry_count, 1);
        assert_eq!(status.health, Health::Healthy);
        assert_eq!(status.state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_fatal_error_replaces_session() {
        let stub = StubTransport::new()
            .respond("echo hi", ExecOutput::success("hi\n"))
            .fail_execs([TransportError::closed("connection reset")]);
        let mgr = manager(&stub);

        let first = mgr.connect("orlok").await.expect("connect");
        let out = mgr
            .execute_command_with_retry("orlok", "echo hi", Some(2))
            .await
            .expect("recovers on a fresh session");
        assert_eq!(out, "hi");

        let second = mgr.connect("orlok").await.expect("pooled");
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.generation() > first.generation());
        assert_eq!(stub.connect_count(), 2);
        // Fresh connect resets the counter
        assert_eq!(mgr.status_of("orlok").await.expect("status").retry_count, 0);
    }

    #[tokio::test]
    async fn test_command_timeout_force_closes_session() {
        let stub = StubTransport::new().exec_delay(Duration::from_millis(300));
        let mgr = manager_with(
            &stub,
            ConnectionConfig {
                command_timeout: Duration::from_millis(50),
                ..fast_config()
            },
        );

        let err = mgr
            .execute_command("orlok", "sleep 10")
            .await
            .expect_err("times out");
        assert_eq!(err.transport().map(|e| e.kind), Some(TransportErrorKind::Timeout));

        let status = mgr.status_of("orlok").await.expect("status");
        assert!(!status.connected);
        assert_eq!(status.state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_commands_on_one_system_are_serialized() {
        let stub = StubTransport::new().exec_delay(Duration::from_millis(20));
        let mgr = manager(&stub);

        let runs = (0..4).map(|i| mgr.execute_command("orlok", if i % 2 == 0 { "a" } else { "b" }));
        for result in join_all(runs).await {
            result.expect("exec");
        }
        assert_eq!(stub.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_commands_on_different_systems_overlap() {
        let stub = StubTransport::new().exec_delay(Duration::from_millis(50));
        let mgr = manager(&stub);

        let (a, b) = tokio::join!(
            mgr.execute_command("orlok", "a"),
            mgr.execute_command("pumpkin", "b")
        );
        a.expect("orlok");
        b.expect("pumpkin");
        assert_eq!(stub.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_all_clears_connections() {
        let stub = StubTransport::new();
        let mgr = manager(&stub);
        let mut events = mgr.subscribe();

        mgr.connect("orlok").await.expect("orlok");
        mgr.connect("pumpkin").await.expect("pumpkin");
        mgr.disconnect_all().await;

        let statuses = mgr.get_connection_status().await;
        assert_eq!(statuses.len(), 3);
        assert!(statuses.iter().all(|s| !s.connected));
        assert!(statuses.iter().all(|s| s.state == ConnectionState::Disconnected));

        let mut disconnected = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ConnectionEvent::Disconnected { .. }) {
                disconnected += 1;
            }
        }
        assert_eq!(disconnected, 2);

        // Next use opens a fresh session
        mgr.connect("orlok").await.expect("reconnect");
        assert_eq!(stub.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_retry() {
        let stub = StubTransport::new().unreachable("10.0.0.21");
        let mgr = Arc::new(manager_with(
            &stub,
            ConnectionConfig {
                retry: BackoffPolicy::new(5, Duration::from_secs(5), Duration::from_secs(5)),
                ..fast_config()
            },
        ));

        let task = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.execute_command_with_retry("orlok", "echo hi", None).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        mgr.disconnect("orlok").await.expect("disconnect");

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("retry loop woke up")
            .expect("join");
        assert!(matches!(result, Err(ControlError::Cancelled { .. })));
        assert_eq!(stub.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_check_health_covers_enabled_systems_only() {
        let stub = StubTransport::new()
            .unreachable("10.0.0.21")
            .unreachable("10.0.0.22");
        let mgr = manager(&stub);

        let health = mgr.check_health().await;
        assert_eq!(health.len(), 2);
        assert_eq!(health.get("orlok"), Some(&false));
        assert_eq!(health.get("pumpkin"), Some(&false));
        assert!(!health.contains_key("crypt"));

        let status = mgr.status_of("orlok").await.expect("status");
        assert_eq!(status.health, Health::Degraded);
    }

    #[tokio::test]
    async fn test_repeated_failed_probes_become_unhealthy() {
        let stub = StubTransport::new().unreachable("10.0.0.21");
        let mgr = manager(&stub);

        for _ in 0..3 {
            mgr.check_health().await;
        }
        let status = mgr.status_of("orlok").await.expect("status");
        assert_eq!(status.retry_count, 3);
        assert_eq!(status.health, Health::Unhealthy);

        // Pumpkin answered every time
        let status = mgr.status_of("pumpkin").await.expect("status");
        assert_eq!(status.health, Health::Healthy);
        assert!(status.connected);
    }

    #[tokio::test]
    async fn test_busy_session_counts_as_reachable() {
        let stub = StubTransport::new().exec_delay(Duration::from_millis(200));
        let mgr = Arc::new(manager(&stub));
        mgr.connect("orlok").await.expect("connect");

        let running = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.execute_command("orlok", "long").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let health = mgr.check_health().await;
        assert_eq!(health.get("orlok"), Some(&true));
        // Only pumpkin was probed; orlok was not queued behind the long command
        assert_eq!(stub.exec_count(), 2);

        running.await.expect("join").expect("long command");
    }

    #[tokio::test]
    async fn test_command_timeout_does_not_wait_for_close() {
        let stub = StubTransport::new()
            .exec_delay(Duration::from_millis(300))
            .close_delay(Duration::from_secs(5));
        let mgr = manager_with(
            &stub,
            ConnectionConfig {
                command_timeout: Duration::from_millis(50),
                ..fast_config()
            },
        );

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            mgr.execute_command("orlok", "sleep 10"),
        )
        .await
        .expect("returned without waiting on the hung close");
        assert_eq!(
            result.expect_err("times out").transport().map(|e| e.kind),
            Some(TransportErrorKind::Timeout)
        );

        let status = mgr.status_of("orlok").await.expect("status");
        assert!(!status.connected);
        assert_eq!(status.state, ConnectionState::Disconnected);

        // A fresh session is opened next time
        mgr.connect("orlok").await.expect("reconnect");
        assert_eq!(stub.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_command_timeout_reaches_transport() {
        let stub = StubTransport::new();
        let mgr = manager_with(
            &stub,
            ConnectionConfig {
                command_timeout: Duration::from_millis(750),
                ..fast_config()
            },
        );

        mgr.connect("orlok").await.expect("connect");
        let params = stub.last_params().expect("params recorded");
        assert_eq!(params.command_timeout, Duration::from_millis(750));
    }

    #[tokio::test]
    async fn test_abandoned_connect_does_not_stay_connecting() {
        let stub = StubTransport::new().connect_delay(Duration::from_millis(300));
        let mgr = manager_with(
            &stub,
            ConnectionConfig {
                probe_timeout: Duration::from_millis(50),
                ready_timeout: Duration::from_secs(1),
                ..fast_config()
            },
        );

        let health = mgr.check_health().await;
        assert_eq!(health.get("orlok"), Some(&false));

        let status = mgr.status_of("orlok").await.expect("status");
        assert_eq!(status.state, ConnectionState::Failed);
        assert_eq!(status.retry_count, 1);
        assert!(!status.connected);
        assert_eq!(status.health, Health::Degraded);
    }
}
