//! Session registry and connection lifecycle.
//!
//! Maps each user identity to its single live [`Session`], creates
//! sessions via the backend login handshake, and tears them down on
//! transport error, close, or inactivity.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use chatgw_core::{Command, Frame, FrameKind, GatewayError, GatewayResult};

use super::{Session, SessionState};
use crate::config::GatewayConfig;

/// Registry of live sessions, keyed by user identity.
///
/// At most one session exists per identity. The registry is the only state
/// shared across requests; it is mutated only by `connect` and `teardown`.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// Per-identity locks serializing concurrent connect attempts, so
    /// duplicate logins collapse onto a single connection.
    connecting: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    config: GatewayConfig,
}

impl SessionRegistry {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            connecting: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Look up a session in any state.
    pub async fn get(&self, identity: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(identity).cloned()
    }

    /// Look up a session that has completed its login handshake.
    pub async fn get_ready(&self, identity: &str) -> Option<Arc<Session>> {
        let session = self.get(identity).await?;
        if session.state().await == SessionState::Ready {
            Some(session)
        } else {
            None
        }
    }

    /// Number of registered sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Return the identity's session, establishing it if absent.
    ///
    /// Opens the TCP connection, performs the login handshake, registers
    /// the session, and spawns its reader task. Idempotent: a Ready
    /// session is returned as-is, and concurrent calls for one identity
    /// share a single connection attempt.
    pub async fn connect(self: Arc<Self>, identity: &str) -> GatewayResult<Arc<Session>> {
        if let Some(existing) = self.get_ready(identity).await {
            debug!(identity, "reusing existing session");
            return Ok(existing);
        }

        let connect_lock = {
            let mut connecting = self.connecting.lock().await;
            connecting
                .entry(identity.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = connect_lock.lock().await;

        // Losers of the race find the winner's session here.
        if let Some(existing) = self.get_ready(identity).await {
            debug!(identity, "adopting session from concurrent login");
            return Ok(existing);
        }

        if self.count().await >= self.config.max_sessions {
            return Err(GatewayError::AtCapacity(self.config.max_sessions));
        }

        let deadline = Instant::now() + Duration::from_secs(self.config.idle_timeout_secs);
        let addr = self.config.backend_addr();
        let stream = match timeout_at(deadline, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(GatewayError::Transport(format!(
                    "connect to {addr} failed: {e}"
                )))
            }
            Err(_) => return Err(GatewayError::ConnectTimeout),
        };

        let (read_half, write_half) = stream.into_split();
        let session = Arc::new(Session::new(
            identity,
            write_half,
            self.config.notification_cap,
        ));

        info!(identity, backend = %addr, "connected, sending login");
        let login = Command::Login {
            username: identity.to_string(),
        };
        session.write_line(&login.encode()).await?;
        session.set_state(SessionState::AwaitingLoginReply).await;

        let mut lines = BufReader::new(read_half).lines();
        loop {
            let line = match timeout_at(deadline, lines.next_line()).await {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => {
                    return Err(GatewayError::Transport(
                        "connection closed during login".to_string(),
                    ))
                }
                Ok(Err(e)) => {
                    return Err(GatewayError::Transport(format!(
                        "read error during login: {e}"
                    )))
                }
                Err(_) => return Err(GatewayError::ConnectTimeout),
            };
            let frame = Frame::parse(&line);
            match frame.kind() {
                FrameKind::LoginSuccess => break,
                FrameKind::LoginError => {
                    session.close_writer().await;
                    return Err(GatewayError::LoginFailed(frame.raw().to_string()));
                }
                _ if frame.raw().is_empty() => continue,
                // The backend broadcasts join announcements between accept
                // and the login reply; keep them for the first drain.
                _ => session.push_notification(frame.raw()).await,
            }
        }

        session.set_state(SessionState::Ready).await;
        self.sessions
            .write()
            .await
            .insert(identity.to_string(), session.clone());
        info!(identity, "login complete, session ready");

        let registry = self.clone();
        let reader_session = session.clone();
        let idle = Duration::from_secs(self.config.idle_timeout_secs);
        tokio::spawn(async move {
            drive_session(registry, reader_session, lines, idle).await;
        });

        Ok(session)
    }

    /// Remove the identity's registry entry, but only if it still points at
    /// this session; a newer login must not be evicted by a stale reader.
    async fn remove_if_current(&self, session: &Arc<Session>) {
        let mut sessions = self.sessions.write().await;
        if let Some(current) = sessions.get(session.identity()) {
            if Arc::ptr_eq(current, session) {
                sessions.remove(session.identity());
            }
        }
    }

    /// Drive a session to Closed: evict it, fail every outstanding command
    /// with the same detail, and shut the transport.
    pub(crate) async fn teardown(&self, session: &Arc<Session>, reason: &str) {
        session.set_state(SessionState::Closed).await;
        self.remove_if_current(session).await;
        session.fail_all_pending(reason).await;
        session.close_writer().await;
        info!(identity = %session.identity(), reason, "session closed");
    }
}

/// Reader task: routes every inbound frame and owns teardown.
///
/// Routing relies on the backend answering commands in the order they were
/// sent and never interleaving a push ahead of a pending reply. The wire
/// protocol has no correlation ids, so the gateway cannot verify this
/// locally.
async fn drive_session(
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    idle_timeout: Duration,
) {
    loop {
        match timeout(idle_timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                debug!(identity = %session.identity(), frame = line, "frame received");
                if !session.resolve_next(line).await {
                    session.push_notification(line).await;
                }
            }
            Ok(Ok(None)) => {
                registry
                    .teardown(&session, "connection closed by backend")
                    .await;
                break;
            }
            Ok(Err(e)) => {
                warn!(identity = %session.identity(), error = %e, "transport error");
                registry
                    .teardown(&session, &format!("read error: {e}"))
                    .await;
                break;
            }
            Err(_) => {
                registry
                    .teardown(&session, "idle timeout, closing dormant session")
                    .await;
                break;
            }
        }
    }
}
