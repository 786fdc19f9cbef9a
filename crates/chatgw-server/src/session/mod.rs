//! One persistent backend connection per logged-in user.
//!
//! A `Session` owns the write half of the TCP stream plus the two queues
//! the multiplexer runs on: the FIFO of commands awaiting their reply and
//! the backlog of frames that arrived with no command outstanding. The
//! paired reader task (spawned by the registry at login) drives frame
//! routing and teardown.

pub mod dispatch;
pub mod registry;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use chatgw_core::{GatewayError, GatewayResult};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingLoginReply,
    Ready,
    Closed,
}

/// A command written to the wire, awaiting the next correlated reply frame.
///
/// The id exists solely so timeout and write-error paths can remove their
/// own entry. Correlation itself is strictly FIFO: the wire protocol
/// carries no request ids, so replies can only be matched by order.
struct PendingReply {
    id: u64,
    tx: oneshot::Sender<GatewayResult<String>>,
}

/// The per-identity connection state.
pub struct Session {
    identity: String,
    writer: Mutex<OwnedWriteHalf>,
    state: Mutex<SessionState>,
    pending: Mutex<VecDeque<PendingReply>>,
    notifications: Mutex<VecDeque<String>>,
    notification_cap: usize,
    next_reply_id: AtomicU64,
}

impl Session {
    pub(crate) fn new(identity: &str, writer: OwnedWriteHalf, notification_cap: usize) -> Self {
        Self {
            identity: identity.to_string(),
            writer: Mutex::new(writer),
            state: Mutex::new(SessionState::Connecting),
            pending: Mutex::new(VecDeque::new()),
            notifications: Mutex::new(VecDeque::new()),
            notification_cap,
            next_reply_id: AtomicU64::new(0),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    pub(crate) async fn set_state(&self, state: SessionState) {
        *self.state.lock().await = state;
    }

    /// Write one command line (newline appended) on the transport.
    pub(crate) async fn write_line(&self, line: &str) -> GatewayResult<()> {
        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        write
            .await
            .map_err(|e| GatewayError::Transport(format!("write failed: {e}")))
    }

    /// Register a correlation slot at the back of the FIFO.
    pub(crate) async fn enqueue_pending(&self) -> (u64, oneshot::Receiver<GatewayResult<String>>) {
        let id = self.next_reply_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.push_back(PendingReply { id, tx });
        (id, rx)
    }

    /// Remove a correlation slot by id (timeout or failed write). Returns
    /// whether the entry was still queued.
    pub(crate) async fn remove_pending(&self, id: u64) -> bool {
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|entry| entry.id != id);
        pending.len() != before
    }

    /// Route a reply frame to the oldest waiting command. Returns false if
    /// no command is outstanding (the frame is a notification).
    pub(crate) async fn resolve_next(&self, line: &str) -> bool {
        let entry = self.pending.lock().await.pop_front();
        match entry {
            Some(entry) => {
                if entry.tx.send(Ok(line.to_string())).is_err() {
                    // Waiter timed out as the frame arrived; the slot was
                    // consumed either way, so the frame is dropped rather
                    // than mis-delivered to a newer command.
                    debug!(identity = %self.identity, "reply arrived for an abandoned slot");
                }
                true
            }
            None => false,
        }
    }

    /// Append an unsolicited frame to the backlog, dropping the oldest
    /// entry when the cap is reached.
    pub(crate) async fn push_notification(&self, line: &str) {
        let mut notifications = self.notifications.lock().await;
        if notifications.len() >= self.notification_cap {
            notifications.pop_front();
            warn!(
                identity = %self.identity,
                cap = self.notification_cap,
                "notification backlog full, dropping oldest"
            );
        }
        notifications.push_back(line.to_string());
    }

    /// Take and clear the notification backlog, in arrival order.
    pub(crate) async fn take_notifications(&self) -> Vec<String> {
        let mut notifications = self.notifications.lock().await;
        notifications.drain(..).collect()
    }

    /// Fail every outstanding correlation slot with the same transport
    /// detail and clear the queue. Called exactly once, at teardown.
    pub(crate) async fn fail_all_pending(&self, detail: &str) {
        let mut pending = self.pending.lock().await;
        let count = pending.len();
        for entry in pending.drain(..) {
            let _ = entry
                .tx
                .send(Err(GatewayError::Transport(detail.to_string())));
        }
        if count > 0 {
            warn!(identity = %self.identity, count, detail, "failed outstanding commands");
        }
    }

    /// Shut the write half down; errors are irrelevant past this point.
    pub(crate) async fn close_writer(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }

    #[cfg(test)]
    pub(crate) async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}
