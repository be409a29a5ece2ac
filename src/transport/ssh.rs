//! SSH transport backed by libssh2
//!
//! libssh2 is blocking, so every call into the session runs on tokio's
//! blocking pool. A keep-alive task per session marks it dead once
//! `keepalive_count_max` consecutive probes fail.

use crate::transport::traits::{ConnectParams, ExecOutput, RemoteSession, RemoteTransport};
use animatronic_shared::{TransportError, TransportErrorKind};
use async_trait::async_trait;
use ssh2::{Channel, ErrorCode, Session};
use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

// libssh2 session error codes we classify explicitly
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;
const LIBSSH2_ERROR_EAGAIN: i32 = -37;

/// Pause between polls while neither output stream has data
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 8192;

fn millis_u32(d: Duration) -> u32 {
    d.as_millis().min(u32::MAX as u128) as u32
}

fn classify(err: ssh2::Error) -> TransportError {
    let kind = match err.code() {
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => TransportErrorKind::Timeout,
        ErrorCode::Session(LIBSSH2_ERROR_AUTHENTICATION_FAILED) => TransportErrorKind::Auth,
        ErrorCode::Session(
            LIBSSH2_ERROR_SOCKET_SEND | LIBSSH2_ERROR_SOCKET_DISCONNECT | LIBSSH2_ERROR_SOCKET_RECV,
        ) => TransportErrorKind::Closed,
        _ => TransportErrorKind::Io,
    };
    TransportError::new(kind, err.message().to_string())
}

fn join_error(e: tokio::task::JoinError) -> TransportError {
    TransportError::io(format!("blocking ssh task failed: {}", e))
}

/// Open, handshake and authenticate a session (blocking)
fn open_session(params: &ConnectParams) -> Result<Session, TransportError> {
    let addr = (params.host.as_str(), params.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            TransportError::refused(format!("could not resolve {}:{}", params.host, params.port))
        })?;

    let tcp = TcpStream::connect_timeout(&addr, params.ready_timeout)?;

    let mut session = Session::new().map_err(classify)?;
    session.set_timeout(millis_u32(params.ready_timeout));
    session.set_tcp_stream(tcp);
    session.handshake().map_err(classify)?;
    session
        .userauth_password(&params.username, &params.password)
        .map_err(classify)?;

    if !session.authenticated() {
        return Err(TransportError::auth(format!(
            "{}@{} rejected password authentication",
            params.username, params.host
        )));
    }

    // No blocking libssh2 call may outlive a command
    session.set_timeout(millis_u32(params.command_timeout).max(1));
    session.set_keepalive(true, params.keepalive_interval.as_secs().max(1) as u32);

    Ok(session)
}

/// Run a command on an authenticated session (blocking)
fn exec_blocking(
    session: &Session,
    command: &str,
    limit: Duration,
) -> Result<ExecOutput, TransportError> {
    let mut channel = session.channel_session().map_err(classify)?;
    channel.exec(command).map_err(classify)?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    session.set_blocking(false);
    let drained = drain(&mut channel, &mut stdout, &mut stderr, limit);
    session.set_blocking(true);
    drained?;

    channel.wait_close().map_err(classify)?;
    let exit_code = channel.exit_status().map_err(classify)?;

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
    })
}

/// Read stdout and stderr side by side until both reach EOF.
///
/// Either stream filling the channel window stalls the remote command, so
/// neither may be read to completion before the other. The session must be
/// in non-blocking mode.
fn drain(
    channel: &mut Channel,
    stdout: &mut Vec<u8>,
    stderr: &mut Vec<u8>,
    limit: Duration,
) -> Result<(), TransportError> {
    let started = Instant::now();
    let mut buf = [0u8; READ_CHUNK];
    let mut out_done = false;
    let mut err_done = false;

    while !(out_done && err_done) {
        let mut progressed = false;

        if !out_done {
            match channel.read(&mut buf) {
                Ok(0) => out_done = true,
                Ok(n) => {
                    stdout.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }

        if !err_done {
            match channel.stderr().read(&mut buf) {
                Ok(0) => err_done = true,
                Ok(n) => {
                    stderr.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }

        if !progressed && !(out_done && err_done) {
            if started.elapsed() >= limit {
                return Err(TransportError::timeout(format!(
                    "command exceeded {:?}",
                    limit
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
    Ok(())
}

/// An authenticated SSH session to one system
pub struct SshSession {
    system_id: String,
    session: Session,
    command_timeout: Duration,
    alive: Arc<AtomicBool>,
    keepalive: JoinHandle<()>,
}

impl SshSession {
    fn new(system_id: String, session: Session, params: &ConnectParams) -> Self {
        let alive = Arc::new(AtomicBool::new(true));
        let keepalive = spawn_keepalive(
            system_id.clone(),
            session.clone(),
            alive.clone(),
            params.keepalive_interval,
            params.keepalive_count_max,
        );

        Self {
            system_id,
            session,
            command_timeout: params.command_timeout,
            alive,
            keepalive,
        }
    }
}

/// Periodically send keep-alives, declaring the session dead after too many misses
fn spawn_keepalive(
    system_id: String,
    session: Session,
    alive: Arc<AtomicBool>,
    every: Duration,
    count_max: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every.max(Duration::from_secs(1)));
        // First tick fires immediately
        ticker.tick().await;
        let mut misses = 0u32;

        while alive.load(Ordering::SeqCst) {
            ticker.tick().await;

            let probe = session.clone();
            let sent = tokio::task::spawn_blocking(move || probe.keepalive_send()).await;

            match sent {
                Ok(Ok(_)) => misses = 0,
                // A command is draining output in non-blocking mode
                Ok(Err(e)) if matches!(e.code(), ErrorCode::Session(LIBSSH2_ERROR_EAGAIN)) => {}
                Ok(Err(e)) => {
                    misses += 1;
                    debug!("[SSH] {} keep-alive failed ({}/{}): {}", system_id, misses, count_max, e);
                }
                Err(e) => {
                    misses += 1;
                    debug!("[SSH] {} keep-alive task failed: {}", system_id, e);
                }
            }

            if misses >= count_max {
                warn!("[SSH] {} missed {} keep-alives, marking session dead", system_id, misses);
                alive.store(false, Ordering::SeqCst);
            }
        }
    })
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&self, command: &str) -> Result<ExecOutput, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::closed(format!(
                "ssh session for {} is no longer alive",
                self.system_id
            )));
        }

        let session = self.session.clone();
        let command = command.to_string();
        let limit = self.command_timeout;
        let result = tokio::task::spawn_blocking(move || exec_blocking(&session, &command, limit))
            .await
            .map_err(join_error)?;

        if let Err(ref e) = result {
            if e.kind == TransportErrorKind::Closed {
                self.alive.store(false, Ordering::SeqCst);
            }
        }
        result
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.alive.store(false, Ordering::SeqCst);
        self.keepalive.abort();

        let session = self.session.clone();
        tokio::task::spawn_blocking(move || session.disconnect(None, "closing", None))
            .await
            .map_err(join_error)?
            .map_err(classify)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}

/// Connector that opens password-authenticated SSH sessions
#[derive(Debug, Default, Clone)]
pub struct SshTransport;

impl SshTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn RemoteSession>, TransportError> {
        info!(
            "[SSH] Connecting to {}@{}:{} ({})",
            params.username, params.host, params.port, params.system_id
        );

        let owned = params.clone();
        let opened = tokio::time::timeout(
            params.ready_timeout,
            tokio::task::spawn_blocking(move || open_session(&owned)),
        )
        .await
        .map_err(|_| {
            TransportError::timeout(format!(
                "{} not ready after {:?}",
                params.host, params.ready_timeout
            ))
        })?
        .map_err(join_error)??;

        Ok(Box::new(SshSession::new(params.system_id.clone(), opened, params)))
    }

    fn name(&self) -> &'static str {
        "SSH"
    }
}
