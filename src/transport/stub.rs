//! Scripted transport used by unit tests

use crate::transport::traits::{ConnectParams, ExecOutput, RemoteSession, RemoteTransport};
use animatronic_shared::TransportError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Script {
    /// Failures returned by the next connect calls, in order
    connect_failures: VecDeque<TransportError>,
    /// Failures returned by the next exec calls, in order
    exec_failures: VecDeque<TransportError>,
    /// Canned responses by exact command; unknown commands echo nothing
    responses: HashMap<String, ExecOutput>,
    /// Hosts that always refuse connections
    unreachable_hosts: Vec<String>,
    exec_delay: Option<Duration>,
    /// Close calls hang this long, like a session stuck behind a blocked read
    close_delay: Option<Duration>,
    connect_delay: Option<Duration>,
}

/// Shared counters and script for a family of stub sessions
#[derive(Clone, Default)]
pub struct StubTransport {
    script: Arc<Mutex<Script>>,
    connects: Arc<AtomicUsize>,
    execs: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    last_params: Arc<Mutex<Option<ConnectParams>>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, command: &str, output: ExecOutput) -> Self {
        self.script
            .lock()
            .unwrap()
            .responses
            .insert(command.to_string(), output);
        self
    }

    pub fn fail_connects(self, errors: impl IntoIterator<Item = TransportError>) -> Self {
        self.script.lock().unwrap().connect_failures.extend(errors);
        self
    }

    pub fn fail_execs(self, errors: impl IntoIterator<Item = TransportError>) -> Self {
        self.script.lock().unwrap().exec_failures.extend(errors);
        self
    }

    pub fn unreachable(self, host: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .unreachable_hosts
            .push(host.to_string());
        self
    }

    pub fn exec_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().exec_delay = Some(delay);
        self
    }

    pub fn close_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().close_delay = Some(delay);
        self
    }

    pub fn connect_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().connect_delay = Some(delay);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn exec_count(&self) -> usize {
        self.execs.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<ConnectParams> {
        self.last_params.lock().unwrap().clone()
    }
}

struct StubSession {
    transport: StubTransport,
    open: AtomicBool,
}

#[async_trait]
impl RemoteSession for StubSession {
    async fn exec(&self, command: &str) -> Result<ExecOutput, TransportError> {
        let t = &self.transport;
        t.execs.fetch_add(1, Ordering::SeqCst);

        let now = t.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        t.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let (delay, outcome) = {
            let mut script = t.script.lock().unwrap();
            let outcome = match script.exec_failures.pop_front() {
                Some(err) => Err(err),
                None => Ok(script.responses.get(command).cloned().unwrap_or_default()),
            };
            (script.exec_delay, outcome)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        t.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        let delay = self.transport.script.lock().unwrap().close_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteTransport for StubTransport {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn RemoteSession>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = Some(params.clone());

        let delay = self.script.lock().unwrap().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut script = self.script.lock().unwrap();
            if script.unreachable_hosts.contains(&params.host) {
                return Err(TransportError::refused(format!("{} unreachable", params.host)));
            }
            if let Some(err) = script.connect_failures.pop_front() {
                return Err(err);
            }
        }

        Ok(Box::new(StubSession {
            transport: self.clone(),
            open: AtomicBool::new(true),
        }))
    }

    fn name(&self) -> &'static str {
        "Stub"
    }
}
