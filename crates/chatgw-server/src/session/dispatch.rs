//! Command dispatch and notification drain.
//!
//! The dispatcher is the HTTP layer's only entry point into the session
//! multiplexer: it looks up the caller's session, serializes the command
//! onto the wire, and hands back the next correlated reply verbatim. Reply
//! content is never interpreted here.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use chatgw_core::{GatewayError, GatewayResult};

use super::registry::SessionRegistry;
use super::SessionState;

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    command_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let command_timeout = Duration::from_secs(registry.config().command_timeout_secs);
        Self {
            registry,
            command_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Establish (or reuse) the backend session for `username`.
    pub async fn login(&self, username: &str) -> GatewayResult<()> {
        self.registry.clone().connect(username).await.map(|_| ())
    }

    /// Send one encoded command line on `identity`'s session and wait for
    /// the next correlated reply. Requires a completed login; there is no
    /// implicit connect here.
    pub async fn send(&self, identity: &str, line: &str) -> GatewayResult<String> {
        let session = self
            .registry
            .get(identity)
            .await
            .ok_or_else(|| GatewayError::NotConnected(identity.to_string()))?;
        if session.state().await != SessionState::Ready {
            return Err(GatewayError::NotConnected(identity.to_string()));
        }

        let (id, rx) = session.enqueue_pending().await;
        debug!(identity, command = line, "dispatching command");
        if let Err(e) = session.write_line(line).await {
            session.remove_pending(id).await;
            return Err(e);
        }

        match timeout(self.command_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            // Sender dropped without a verdict: teardown won the race
            // between routing the failure and delivering it.
            Ok(Err(_)) => Err(GatewayError::Transport(
                "session closed while awaiting reply".to_string(),
            )),
            Err(_) => {
                // Dequeue so a late frame cannot resolve this dead slot.
                session.remove_pending(id).await;
                Err(GatewayError::CommandTimeout)
            }
        }
    }

    /// Atomically take everything in `identity`'s notification backlog, in
    /// arrival order.
    pub async fn drain(&self, identity: &str) -> GatewayResult<Vec<String>> {
        let session = self
            .registry
            .get(identity)
            .await
            .ok_or_else(|| GatewayError::NotConnected(identity.to_string()))?;
        Ok(session.take_notifications().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use chatgw_core::Command;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// One accepted connection on the fake backend, post-handshake.
    struct BackendConn {
        lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl BackendConn {
        async fn recv_line(&mut self) -> String {
            tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
                .await
                .expect("timed out waiting for a line from the gateway")
                .expect("read error")
                .expect("gateway closed the connection")
        }

        async fn send_line(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }
    }

    /// Scripted stand-in for the backend chat server: accepts connections,
    /// answers the login handshake itself (usernames starting with `bad`
    /// are rejected), then hands the connection over to the test.
    async fn spawn_backend() -> (
        u16,
        mpsc::UnboundedReceiver<BackendConn>,
        Arc<AtomicUsize>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        let counter = accepted.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let (read_half, mut writer) = stream.into_split();
                let mut lines = BufReader::new(read_half).lines();

                let Ok(Some(login)) = lines.next_line().await else {
                    continue;
                };
                let frame = chatgw_core::Frame::parse(&login);
                let username = frame.field("username").unwrap_or("").to_string();
                if username.starts_with("bad") {
                    let _ = writer
                        .write_all(b"type:login_error|message:username invalid or in use\n")
                        .await;
                    continue;
                }
                let greeting = format!("type:login_success|message:Welcome {username}\n");
                if writer.write_all(greeting.as_bytes()).await.is_err() {
                    continue;
                }
                let _ = conn_tx.send(BackendConn { lines, writer });
            }
        });

        (port, conn_rx, accepted)
    }

    fn test_config(backend_port: u16) -> GatewayConfig {
        GatewayConfig {
            port: 0,
            backend_host: "127.0.0.1".to_string(),
            backend_port,
            command_timeout_secs: 1,
            idle_timeout_secs: 5,
            notification_cap: 4,
            max_sessions: 8,
        }
    }

    async fn setup() -> (
        Arc<Dispatcher>,
        mpsc::UnboundedReceiver<BackendConn>,
        Arc<AtomicUsize>,
    ) {
        let (port, conn_rx, accepted) = spawn_backend().await;
        let registry = Arc::new(SessionRegistry::new(test_config(port)));
        (Arc::new(Dispatcher::new(registry)), conn_rx, accepted)
    }

    #[tokio::test]
    async fn concurrent_logins_share_one_connection() {
        let (dispatcher, mut conns, accepted) = setup().await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let d = dispatcher.clone();
            handles.push(tokio::spawn(async move { d.login("alice").await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.registry().count().await, 1);
        let _conn = conns.recv().await.unwrap();
    }

    #[tokio::test]
    async fn replies_resolve_in_send_order() {
        let (dispatcher, mut conns, _) = setup().await;
        dispatcher.login("alice").await.unwrap();
        let mut conn = conns.recv().await.unwrap();

        let d1 = dispatcher.clone();
        let first = tokio::spawn(async move {
            let cmd = Command::GetOnlineUsers {
                username: "alice".into(),
            };
            d1.send("alice", &cmd.encode()).await
        });
        assert!(conn.recv_line().await.contains("get_online_users"));

        let d2 = dispatcher.clone();
        let second = tokio::spawn(async move {
            let cmd = Command::GetGroups {
                username: "alice".into(),
            };
            d2.send("alice", &cmd.encode()).await
        });
        assert!(conn.recv_line().await.contains("get_groups"));

        conn.send_line("type:online_users|users:alice,bob").await;
        conn.send_line("type:groups_list|groups:rust").await;

        assert_eq!(
            first.await.unwrap().unwrap(),
            "type:online_users|users:alice,bob"
        );
        assert_eq!(second.await.unwrap().unwrap(), "type:groups_list|groups:rust");
    }

    #[tokio::test]
    async fn unsolicited_frames_queue_and_drain_once() {
        let (dispatcher, mut conns, _) = setup().await;
        dispatcher.login("alice").await.unwrap();
        let mut conn = conns.recv().await.unwrap();

        conn.send_line("type:system_message|content:bob connected")
            .await;

        let mut drained = Vec::new();
        for _ in 0..100 {
            drained = dispatcher.drain("alice").await.unwrap();
            if !drained.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            drained,
            vec!["type:system_message|content:bob connected".to_string()]
        );

        // Idempotent clearing: nothing left on the second drain.
        assert!(dispatcher.drain("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn command_timeout_dequeues_its_slot() {
        let (dispatcher, mut conns, _) = setup().await;
        dispatcher.login("alice").await.unwrap();
        let mut conn = conns.recv().await.unwrap();

        let cmd = Command::GetGroups {
            username: "alice".into(),
        };
        let err = dispatcher.send("alice", &cmd.encode()).await.unwrap_err();
        assert!(matches!(err, GatewayError::CommandTimeout));
        assert!(conn.recv_line().await.contains("get_groups"));

        let session = dispatcher.registry().get("alice").await.unwrap();
        assert_eq!(session.pending_len().await, 0);

        // A late reply for the dead slot becomes a notification instead of
        // resolving anyone.
        conn.send_line("type:groups_list|groups:stale").await;
        let mut drained = Vec::new();
        for _ in 0..100 {
            drained = dispatcher.drain("alice").await.unwrap();
            if !drained.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(drained, vec!["type:groups_list|groups:stale".to_string()]);

        // The next command still round-trips cleanly.
        let d = dispatcher.clone();
        let next = tokio::spawn(async move {
            let cmd = Command::GetOnlineUsers {
                username: "alice".into(),
            };
            d.send("alice", &cmd.encode()).await
        });
        assert!(conn.recv_line().await.contains("get_online_users"));
        conn.send_line("type:online_users|users:alice").await;
        assert_eq!(next.await.unwrap().unwrap(), "type:online_users|users:alice");
    }

    #[tokio::test]
    async fn content_is_sanitized_on_the_wire() {
        let (dispatcher, mut conns, _) = setup().await;
        dispatcher.login("alice").await.unwrap();
        let mut conn = conns.recv().await.unwrap();

        let d = dispatcher.clone();
        let send = tokio::spawn(async move {
            let cmd = Command::PrivateMessage {
                from: "alice".into(),
                to: "bob".into(),
                content: "hi|there\nfolks".into(),
            };
            d.send("alice", &cmd.encode()).await
        });

        assert_eq!(
            conn.recv_line().await,
            "type:private_message|from:alice|to:bob|content:hi_there folks"
        );
        conn.send_line("type:message_sent|to:bob|status:ok").await;
        send.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn login_success_after_ready_is_a_generic_reply() {
        let (dispatcher, mut conns, _) = setup().await;
        dispatcher.login("alice").await.unwrap();
        let mut conn = conns.recv().await.unwrap();

        let d = dispatcher.clone();
        let send = tokio::spawn(async move {
            let cmd = Command::GetGroups {
                username: "alice".into(),
            };
            d.send("alice", &cmd.encode()).await
        });
        conn.recv_line().await;
        conn.send_line("type:login_success|message:Welcome again")
            .await;

        assert_eq!(
            send.await.unwrap().unwrap(),
            "type:login_success|message:Welcome again"
        );
        // No second handshake was triggered.
        assert_eq!(dispatcher.registry().count().await, 1);
        let session = dispatcher.registry().get("alice").await.unwrap();
        assert_eq!(session.state().await, SessionState::Ready);
    }

    #[tokio::test]
    async fn transport_error_fails_every_pending_caller() {
        let (dispatcher, mut conns, _) = setup().await;
        dispatcher.login("alice").await.unwrap();
        let mut conn = conns.recv().await.unwrap();

        let mut handles = Vec::new();
        for target in ["bob", "carol", "dave"] {
            let d = dispatcher.clone();
            let cmd = Command::PrivateMessage {
                from: "alice".into(),
                to: target.into(),
                content: "hello".into(),
            };
            handles.push(tokio::spawn(
                async move { d.send("alice", &cmd.encode()).await },
            ));
            conn.recv_line().await;
        }

        // Backend dies with three commands in flight.
        drop(conn);

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, GatewayError::Transport(_)), "got {err:?}");
        }
        assert!(dispatcher.registry().get("alice").await.is_none());

        let cmd = Command::GetGroups {
            username: "alice".into(),
        };
        let err = dispatcher.send("alice", &cmd.encode()).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConnected(_)));
    }

    #[tokio::test]
    async fn login_rejection_surfaces_the_backend_detail() {
        let (dispatcher, _conns, _) = setup().await;

        let err = dispatcher.login("bad-apple").await.unwrap_err();
        match err {
            GatewayError::LoginFailed(detail) => assert!(detail.contains("in use")),
            other => panic!("expected LoginFailed, got {other:?}"),
        }
        assert_eq!(dispatcher.registry().count().await, 0);
    }

    #[tokio::test]
    async fn send_and_drain_require_a_session() {
        let (dispatcher, _conns, _) = setup().await;

        let cmd = Command::GetGroups {
            username: "ghost".into(),
        };
        assert!(matches!(
            dispatcher.send("ghost", &cmd.encode()).await.unwrap_err(),
            GatewayError::NotConnected(_)
        ));
        assert!(matches!(
            dispatcher.drain("ghost").await.unwrap_err(),
            GatewayError::NotConnected(_)
        ));
    }

    #[tokio::test]
    async fn backlog_cap_drops_oldest() {
        let (dispatcher, mut conns, _) = setup().await;
        dispatcher.login("alice").await.unwrap();
        let mut conn = conns.recv().await.unwrap();

        for i in 0..6 {
            conn.send_line(&format!("type:system_message|content:n{i}"))
                .await;
        }

        // A full command round-trip fences the reader past the pushes.
        let d = dispatcher.clone();
        let fence = tokio::spawn(async move {
            let cmd = Command::GetGroups {
                username: "alice".into(),
            };
            d.send("alice", &cmd.encode()).await
        });
        conn.recv_line().await;
        conn.send_line("type:groups_list|groups:").await;
        fence.await.unwrap().unwrap();

        // cap is 4: n0 and n1 were dropped oldest-first
        let drained = dispatcher.drain("alice").await.unwrap();
        assert_eq!(
            drained,
            vec![
                "type:system_message|content:n2".to_string(),
                "type:system_message|content:n3".to_string(),
                "type:system_message|content:n4".to_string(),
                "type:system_message|content:n5".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn idle_timeout_tears_down_dormant_sessions() {
        let (port, mut conns, _) = spawn_backend().await;
        let mut config = test_config(port);
        config.idle_timeout_secs = 1;
        let dispatcher = Dispatcher::new(Arc::new(SessionRegistry::new(config)));

        dispatcher.login("alice").await.unwrap();
        let _conn = conns.recv().await.unwrap();
        assert!(dispatcher.registry().get("alice").await.is_some());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(dispatcher.registry().get("alice").await.is_none());
    }

    #[tokio::test]
    async fn broadcasts_during_handshake_become_notifications() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut writer) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let _ = lines.next_line().await;
            writer
                .write_all(
                    b"type:system_message|content:eve connected\n\
                      type:login_success|message:Welcome alice\n",
                )
                .await
                .unwrap();
            // hold the socket open past the assertions
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let dispatcher = Dispatcher::new(Arc::new(SessionRegistry::new(test_config(port))));
        dispatcher.login("alice").await.unwrap();

        let drained = dispatcher.drain("alice").await.unwrap();
        assert_eq!(
            drained,
            vec!["type:system_message|content:eve connected".to_string()]
        );
    }

    #[tokio::test]
    async fn registry_capacity_rejects_new_identities() {
        let (port, mut conns, _) = spawn_backend().await;
        let mut config = test_config(port);
        config.max_sessions = 1;
        let dispatcher = Dispatcher::new(Arc::new(SessionRegistry::new(config)));

        dispatcher.login("alice").await.unwrap();
        let _conn = conns.recv().await.unwrap();

        assert!(matches!(
            dispatcher.login("eve").await.unwrap_err(),
            GatewayError::AtCapacity(1)
        ));
        // The existing identity is still idempotently accepted.
        dispatcher.login("alice").await.unwrap();
    }
}
