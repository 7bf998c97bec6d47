use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use orbit_db::Database;
use orbit_types::events::{ClientCommand, ServerEvent};
use orbit_types::models::{ConversationType, UserSummary};

use crate::auth::{Credentials, Identity};
use crate::registry::{ConnectionId, GroupKey};
use crate::router::{EventRouter, Recipients};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a busy callee's caller keeps ringing before the call is ended.
const BUSY_HANGUP_DELAY: Duration = Duration::from_secs(10);

/// WebSocket close code for a rejected credential.
const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Longest slice of an unparseable command that is logged.
const RAW_LOG_CHARS: usize = 200;

/// Drives one client socket from handshake to disconnect.
pub async fn handle_connection(socket: WebSocket, router: EventRouter, db: Arc<Database>, credentials: Credentials) {
    let (sender, receiver) = socket.split();
    serve(sender, receiver, router, db, credentials).await;
}

async fn serve<S, R>(mut sender: S, mut receiver: R, router: EventRouter, db: Arc<Database>, credentials: Credentials)
where
    S: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
{
    let registry = router.registry().clone();

    let conn = match registry.on_connect(&credentials).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("WebSocket client failed to authenticate: {}", e);
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: "unauthorized".into(),
                })))
                .await;
            return;
        }
    };

    let conn_id = conn.id;
    let identity = conn.identity;
    let user_id = identity.user_id;
    let mut events = conn.events;

    let ready = ServerEvent::Ready {
        user_id,
        first_name: identity.first_name.clone(),
        last_name: identity.last_name.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        registry.on_disconnect(conn_id).await;
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward routed events to the client, with heartbeat
    let heartbeat_registry = registry.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                        heartbeat_registry.refresh_presence(user_id).await;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout for {} (missed {} pongs), dropping connection", user_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let session = Session {
        conn_id,
        identity,
        router: router.clone(),
        db,
    };
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => session.handle_command(cmd).await,
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            session.identity.user_id,
                            e,
                            truncated(&text, RAW_LOG_CHARS)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.on_disconnect(conn_id).await;
}

/// At most `max_chars` characters of `text`, cut on a char boundary.
fn truncated(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

async fn send_event<S>(sender: &mut S, event: &ServerEvent) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize {}: {}", event.name(), e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

/// Per-connection command context.
struct Session {
    conn_id: ConnectionId,
    identity: Identity,
    router: EventRouter,
    db: Arc<Database>,
}

impl Session {
    async fn handle_command(&self, cmd: ClientCommand) {
        let registry = self.router.registry();
        let user_id = self.identity.user_id;

        match cmd {
            ClientCommand::JoinPost { post_id } => {
                registry.join_group(self.conn_id, GroupKey::Post(post_id)).await;
            }

            ClientCommand::LeavePost { post_id } => {
                registry.leave_group(self.conn_id, GroupKey::Post(post_id)).await;
            }

            ClientCommand::JoinConversation { conversation_id } => {
                if self.is_participant(conversation_id).await {
                    registry
                        .join_group(self.conn_id, GroupKey::Conversation(conversation_id))
                        .await;
                } else {
                    warn!("{} tried to join conversation {} without being a participant", user_id, conversation_id);
                }
            }

            ClientCommand::LeaveConversation { conversation_id } => {
                registry
                    .leave_group(self.conn_id, GroupKey::Conversation(conversation_id))
                    .await;
            }

            ClientCommand::CallStart {
                conversation_id,
                friend_id,
                conversation_type,
                conversation_name,
            } => {
                let recipients = match (conversation_id, friend_id) {
                    (Some(conversation), _) => {
                        if !self.is_participant(conversation).await {
                            warn!("{} tried to call conversation {} without being a participant", user_id, conversation);
                            return;
                        }
                        Recipients::ConversationParticipants {
                            conversation,
                            except: Some(user_id),
                        }
                    }
                    (None, Some(friend)) => Recipients::Direct(friend),
                    (None, None) => {
                        warn!("{} sent call:start without a target", user_id);
                        return;
                    }
                };

                let room_id = match conversation_id {
                    Some(id) => GroupKey::Conversation(id).to_string(),
                    None => format!("call-{}", Uuid::new_v4()),
                };
                info!("{} started call in {}", user_id, room_id);

                let conversation_name = match conversation_type {
                    ConversationType::Group => conversation_name,
                    ConversationType::Private => None,
                };
                self.router.publish(
                    ServerEvent::CallIncoming {
                        room_id,
                        conversation_type,
                        caller: self.caller_summary().await,
                        conversation_name,
                    },
                    vec![recipients],
                );
            }

            ClientCommand::CallAnswer { room_id } => {
                debug!("{} answered call in {}", user_id, room_id);
                self.router
                    .publish(ServerEvent::CallJoin { room_id }, vec![Recipients::Direct(user_id)]);
            }

            ClientCommand::CallRefuse { caller_id } => {
                self.router.publish(ServerEvent::CallEnd, vec![Recipients::Direct(caller_id)]);
            }

            ClientCommand::CallEnd { user_id: peer } => {
                self.router.publish(ServerEvent::CallEnd, vec![Recipients::Direct(peer)]);
            }

            ClientCommand::CallBusy { caller_id } => {
                let router = self.router.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(BUSY_HANGUP_DELAY).await;
                    router.publish(ServerEvent::CallEnd, vec![Recipients::Direct(caller_id)]);
                });
            }
        }
    }

    async fn is_participant(&self, conversation_id: Uuid) -> bool {
        let db = self.db.clone();
        let user_id = self.identity.user_id;
        match tokio::task::spawn_blocking(move || db.get_participant(conversation_id, user_id)).await {
            Ok(Ok(found)) => found.is_some(),
            Ok(Err(e)) => {
                warn!("Participant check for {} failed: {}", conversation_id, e);
                false
            }
            Err(e) => {
                warn!("Participant check for {} panicked: {}", conversation_id, e);
                false
            }
        }
    }

    /// The caller's profile, falling back to the token's names.
    async fn caller_summary(&self) -> UserSummary {
        let db = self.db.clone();
        let user_id = self.identity.user_id;
        match tokio::task::spawn_blocking(move || db.user_summary(user_id)).await {
            Ok(Ok(summary)) => summary,
            _ => UserSummary {
                id: user_id,
                first_name: self.identity.first_name.clone(),
                last_name: self.identity.last_name.clone(),
                avatar: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;

    use orbit_db::models::NewConversation;
    use orbit_types::models::{PostVisibility, User};

    use crate::auth::JwtAuthenticator;
    use crate::friends::DbFriendGraph;
    use crate::presence::{MemoryPresence, PresenceStore};
    use crate::registry::ConnectionRegistry;

    struct Fixture {
        db: Arc<Database>,
        auth: Arc<JwtAuthenticator>,
        router: EventRouter,
    }

    /// A socket whose two halves are channels held by the test.
    struct Client {
        to_server: mpsc::UnboundedSender<Message>,
        from_server: mpsc::UnboundedReceiver<Message>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let auth = Arc::new(JwtAuthenticator::new(db.clone(), "access", "refresh"));
        let presence = PresenceStore::new(
            Arc::new(MemoryPresence::new()),
            Arc::new(DbFriendGraph::new(db.clone())),
        );
        let registry = ConnectionRegistry::new(presence, auth.clone());
        let router = EventRouter::new(registry, db.clone());
        Fixture { db, auth, router }
    }

    impl Fixture {
        fn user(&self, name: &str) -> User {
            self.db.create_user(name, "hash", name, "Tester").unwrap()
        }

        fn open(&self, credentials: Credentials) -> Client {
            let (to_server, server_rx) = mpsc::unbounded_channel();
            let (server_tx, from_server) = mpsc::unbounded_channel();

            let sink = Box::pin(futures_util::sink::unfold(server_tx, |tx, msg: Message| async move {
                let _ = tx.send(msg);
                Ok::<_, axum::Error>(tx)
            }));
            let stream = Box::pin(futures_util::stream::unfold(server_rx, |mut rx| async move {
                rx.recv().await.map(|msg| (Ok::<_, axum::Error>(msg), rx))
            }));

            tokio::spawn(serve(sink, stream, self.router.clone(), self.db.clone(), credentials));
            Client { to_server, from_server }
        }

        /// Connects `user` and consumes its `ready` event.
        async fn connect(&self, user: &User) -> Client {
            let token = self.auth.issue_access(&Identity::from(user)).unwrap();
            let mut client = self.open(Credentials::access(token));
            assert!(matches!(client.next_event().await, ServerEvent::Ready { .. }));
            client
        }

        async fn wait_for_members(&self, key: GroupKey, count: usize) {
            for _ in 0..100 {
                if self.router.registry().members(&key).await.len() == count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("{} never reached {} members", key, count);
        }
    }

    impl Client {
        fn send(&self, cmd: ClientCommand) {
            let text = serde_json::to_string(&cmd).unwrap();
            self.to_server.send(Message::Text(text.into())).unwrap();
        }

        async fn next_message(&mut self, wait: Duration) -> Option<Message> {
            loop {
                match tokio::time::timeout(wait, self.from_server.recv()).await {
                    Ok(Some(Message::Ping(_))) => continue,
                    Ok(msg) => return msg,
                    Err(_) => return None,
                }
            }
        }

        async fn next_event(&mut self) -> ServerEvent {
            match self.next_message(Duration::from_secs(1)).await {
                Some(Message::Text(text)) => serde_json::from_str(&text).unwrap(),
                other => panic!("expected an event, got {:?}", other),
            }
        }

        async fn assert_quiet(&mut self) {
            if let Some(msg) = self.next_message(Duration::from_millis(100)).await {
                panic!("unexpected message {:?}", msg);
            }
        }
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = format!("{}é{}", "a".repeat(199), "b".repeat(10));
        let cut = truncated(&text, 200);
        assert_eq!(cut.chars().count(), 200);
        assert!(cut.ends_with('é'));

        assert_eq!(truncated("short", 200), "short");
        assert_eq!(truncated("ééé", 2), "éé");
    }

    #[tokio::test]
    async fn rejected_credential_closes_with_policy_violation() {
        let f = fixture();
        let mut client = f.open(Credentials::access("garbage"));

        match client.next_message(Duration::from_secs(1)).await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, CLOSE_POLICY_VIOLATION),
            other => panic!("expected a close frame, got {:?}", other),
        }
        assert!(client.from_server.recv().await.is_none());
    }

    #[tokio::test]
    async fn ready_carries_the_identity() {
        let f = fixture();
        let ana = f.user("ana");
        let token = f.auth.issue_access(&Identity::from(&ana)).unwrap();
        let mut client = f.open(Credentials::access(token));

        match client.next_event().await {
            ServerEvent::Ready {
                user_id,
                first_name,
                last_name,
            } => {
                assert_eq!(user_id, ana.id);
                assert_eq!(first_name, "ana");
                assert_eq!(last_name, "Tester");
            }
            other => panic!("expected ready, got {}", other.name()),
        }
        assert!(f.router.registry().presence().is_online(ana.id).await);
    }

    #[tokio::test]
    async fn closing_the_socket_marks_the_user_offline() {
        let f = fixture();
        let ana = f.user("ana");
        let client = f.connect(&ana).await;

        client.to_server.send(Message::Close(None)).unwrap();
        for _ in 0..100 {
            if f.router.registry().connection_count(ana.id).await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.router.registry().connection_count(ana.id).await, 0);
        assert!(!f.router.registry().presence().is_online(ana.id).await);
    }

    #[tokio::test]
    async fn only_participants_join_a_conversation_room() {
        let f = fixture();
        let ana = f.user("ana");
        let ben = f.user("ben");
        let cid = f.user("cid");
        let chat = f.db.create_conversation(NewConversation::private(ana.id, ben.id)).unwrap();
        let post = f.db.create_post(ana.id, Some("hi".into()), PostVisibility::Public).unwrap();

        let ana_client = f.connect(&ana).await;
        let cid_client = f.connect(&cid).await;

        // commands are handled in order, so the post join marks the
        // conversation join as processed
        cid_client.send(ClientCommand::JoinConversation { conversation_id: chat.id });
        cid_client.send(ClientCommand::JoinPost { post_id: post.id });
        f.wait_for_members(GroupKey::Post(post.id), 1).await;
        assert!(f.router.registry().members(&GroupKey::Conversation(chat.id)).await.is_empty());

        ana_client.send(ClientCommand::JoinConversation { conversation_id: chat.id });
        f.wait_for_members(GroupKey::Conversation(chat.id), 1).await;
    }

    #[tokio::test]
    async fn group_call_rings_everyone_but_the_caller() {
        let f = fixture();
        let ana = f.user("ana");
        let ben = f.user("ben");
        let cid = f.user("cid");
        let group = f
            .db
            .create_conversation(NewConversation::group(Some("crew".into()), None, ana.id, &[ben.id, cid.id]))
            .unwrap();

        let mut ana_client = f.connect(&ana).await;
        let mut ben_client = f.connect(&ben).await;
        let mut cid_client = f.connect(&cid).await;

        ana_client.send(ClientCommand::CallStart {
            conversation_id: Some(group.id),
            friend_id: None,
            conversation_type: ConversationType::Group,
            conversation_name: Some("crew".into()),
        });

        for client in [&mut ben_client, &mut cid_client] {
            match client.next_event().await {
                ServerEvent::CallIncoming {
                    room_id,
                    caller,
                    conversation_name,
                    ..
                } => {
                    assert_eq!(room_id, GroupKey::Conversation(group.id).to_string());
                    assert_eq!(caller.id, ana.id);
                    assert_eq!(conversation_name.as_deref(), Some("crew"));
                }
                other => panic!("expected call:incoming, got {}", other.name()),
            }
        }
        ana_client.assert_quiet().await;
    }

    #[tokio::test]
    async fn private_call_drops_the_conversation_name() {
        let f = fixture();
        let ana = f.user("ana");
        let ben = f.user("ben");
        let chat = f.db.create_conversation(NewConversation::private(ana.id, ben.id)).unwrap();

        let mut ana_client = f.connect(&ana).await;
        let mut ben_client = f.connect(&ben).await;

        ana_client.send(ClientCommand::CallStart {
            conversation_id: Some(chat.id),
            friend_id: None,
            conversation_type: ConversationType::Private,
            conversation_name: Some("Tester ana".into()),
        });

        match ben_client.next_event().await {
            ServerEvent::CallIncoming {
                conversation_type,
                conversation_name,
                ..
            } => {
                assert_eq!(conversation_type, ConversationType::Private);
                assert!(conversation_name.is_none());
            }
            other => panic!("expected call:incoming, got {}", other.name()),
        }
        ana_client.assert_quiet().await;
    }

    #[tokio::test]
    async fn outsiders_cannot_ring_a_conversation() {
        let f = fixture();
        let ana = f.user("ana");
        let ben = f.user("ben");
        let cid = f.user("cid");
        let chat = f.db.create_conversation(NewConversation::private(ana.id, ben.id)).unwrap();

        let mut ana_client = f.connect(&ana).await;
        let cid_client = f.connect(&cid).await;

        cid_client.send(ClientCommand::CallStart {
            conversation_id: Some(chat.id),
            friend_id: None,
            conversation_type: ConversationType::Private,
            conversation_name: None,
        });
        ana_client.assert_quiet().await;
    }

    #[tokio::test(start_paused = true)]
    async fn busy_callee_ends_the_call_after_the_delay() {
        let f = fixture();
        let ana = f.user("ana");
        let ben = f.user("ben");

        let mut ana_client = f.connect(&ana).await;
        let mut ben_client = f.connect(&ben).await;

        ben_client.send(ClientCommand::CallBusy { caller_id: ana.id });

        let early = ana_client
            .next_message(BUSY_HANGUP_DELAY - Duration::from_secs(1))
            .await;
        assert!(early.is_none(), "call ended early: {:?}", early);

        match ana_client.next_message(Duration::from_secs(2)).await {
            Some(Message::Text(text)) => {
                assert_eq!(serde_json::from_str::<ServerEvent>(&text).unwrap(), ServerEvent::CallEnd);
            }
            other => panic!("expected call:end, got {:?}", other),
        }
        ben_client.assert_quiet().await;
    }
}
