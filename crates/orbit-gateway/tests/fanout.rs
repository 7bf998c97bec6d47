use std::sync::Arc;
use std::time::Duration;

use orbit_db::Database;
use orbit_db::conversations::NewMessage;
use orbit_db::models::NewConversation;
use orbit_gateway::{
    Connection, ConnectionRegistry, Credentials, DbFriendGraph, EventRouter, GroupKey, Identity, JwtAuthenticator,
    MemoryPresence, PresenceStore,
};
use orbit_types::events::ServerEvent;
use orbit_types::models::{PostVisibility, ReactionKind, User};

struct Harness {
    db: Arc<Database>,
    auth: Arc<JwtAuthenticator>,
    registry: ConnectionRegistry,
    router: EventRouter,
}

fn harness() -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let auth = Arc::new(JwtAuthenticator::new(db.clone(), "access", "refresh"));
    let presence = PresenceStore::new(
        Arc::new(MemoryPresence::new()),
        Arc::new(DbFriendGraph::new(db.clone())),
    );
    let registry = ConnectionRegistry::new(presence, auth.clone());
    let router = EventRouter::new(registry.clone(), db.clone());
    Harness { db, auth, registry, router }
}

impl Harness {
    fn user(&self, name: &str) -> User {
        self.db.create_user(name, "hash", name, "Tester").unwrap()
    }

    fn befriend(&self, a: &User, b: &User) {
        let (request, _) = self.db.create_friend_request(a.id, b.id).unwrap();
        self.db.accept_friend_request(request.id, b.id).unwrap();
    }

    async fn connect(&self, user: &User) -> Connection {
        let token = self.auth.issue_access(&Identity::from(user)).unwrap();
        self.registry.on_connect(&Credentials::access(token)).await.unwrap()
    }
}

async fn next_event(conn: &mut Connection) -> ServerEvent {
    let event = tokio::time::timeout(Duration::from_secs(1), conn.events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("connection channel closed");
    (*event).clone()
}

/// Lets spawned fan-outs finish, then checks nothing else arrived.
async fn assert_quiet(conn: &mut Connection) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(conn.events.try_recv().is_err(), "unexpected extra event");
}

#[tokio::test]
async fn new_post_reaches_each_online_friend_connection_once() {
    let h = harness();
    let ana = h.user("ana");
    let ben = h.user("ben");
    let cid = h.user("cid");
    let dan = h.user("dan");
    h.befriend(&ana, &ben);
    h.befriend(&ana, &cid);

    let mut ana_conn = h.connect(&ana).await;
    let mut ben_phone = h.connect(&ben).await;
    let mut ben_laptop = h.connect(&ben).await;
    let mut dan_conn = h.connect(&dan).await;
    // cid is a friend but offline

    let post = h.db.create_post(ana.id, Some("hello".into()), PostVisibility::Friend).unwrap();
    h.router.post_created(post.clone(), ana.summary());

    for conn in [&mut ben_phone, &mut ben_laptop] {
        match next_event(conn).await {
            ServerEvent::NewPost { post: got, poster } => {
                assert_eq!(got.id, post.id);
                assert_eq!(poster.id, ana.id);
            }
            other => panic!("expected newPost, got {}", other.name()),
        }
        assert_quiet(conn).await;
    }

    match next_event(&mut ana_conn).await {
        ServerEvent::MyNewPost { post: got, .. } => assert_eq!(got.id, post.id),
        other => panic!("expected myNewPost, got {}", other.name()),
    }
    assert_quiet(&mut ana_conn).await;
    assert_quiet(&mut dan_conn).await;
}

#[tokio::test]
async fn post_reaction_reaches_room_and_author_once() {
    let h = harness();
    let ana = h.user("ana");
    let ben = h.user("ben");

    let mut ana_conn = h.connect(&ana).await;
    let mut ben_conn = h.connect(&ben).await;

    let post = h.db.create_post(ana.id, Some("hi".into()), PostVisibility::Public).unwrap();
    // the author is both in the room and targeted directly
    h.registry.join_group(ana_conn.id, GroupKey::Post(post.id)).await;
    h.registry.join_group(ben_conn.id, GroupKey::Post(post.id)).await;

    let change = h
        .db
        .set_reaction(orbit_db::reactions::ReactionTarget::Post, post.id, ben.id, Some(ReactionKind::Love))
        .unwrap();
    h.router.post_reaction(post.id, ana.id, ben.summary(), change);

    for conn in [&mut ana_conn, &mut ben_conn] {
        assert!(matches!(next_event(conn).await, ServerEvent::ReactToPost { .. }));
        assert_quiet(conn).await;
    }
}

#[tokio::test]
async fn removed_member_stops_receiving_messages() {
    let h = harness();
    let ana = h.user("ana");
    let ben = h.user("ben");
    let cid = h.user("cid");
    let group = h
        .db
        .create_conversation(NewConversation::group(Some("crew".into()), None, ana.id, &[ben.id, cid.id]))
        .unwrap();

    let mut ben_conn = h.connect(&ben).await;
    let mut cid_conn = h.connect(&cid).await;

    h.db.remove_group_member(group.id, ana.id, cid.id).unwrap();
    h.router.member_removed(group.id, cid.id, ana.id);

    assert!(matches!(next_event(&mut ben_conn).await, ServerEvent::ReduceMemberToGroup { .. }));
    assert!(matches!(next_event(&mut cid_conn).await, ServerEvent::OutGroupChat { .. }));

    let message = h.db.create_message(ana.id, group.id, NewMessage::text("bye")).unwrap();
    h.router.message_created(message, ana.summary());

    assert!(matches!(next_event(&mut ben_conn).await, ServerEvent::NewMessage { .. }));
    assert_quiet(&mut cid_conn).await;
}

#[tokio::test]
async fn friend_request_notification_is_direct_and_deletion_cleans_up() {
    let h = harness();
    let ana = h.user("ana");
    let ben = h.user("ben");
    let mut ben_conn = h.connect(&ben).await;

    let (request, notification) = h.db.create_friend_request(ana.id, ben.id).unwrap();
    h.router.friend_request_sent(&request, ana.summary(), &notification);

    match next_event(&mut ben_conn).await {
        ServerEvent::NewFriendRequestNotification {
            friend_request_id,
            notification_id,
            ..
        } => {
            assert_eq!(friend_request_id, request.id);
            assert_eq!(notification_id, notification.id);
        }
        other => panic!("expected newFriendRequestNotification, got {}", other.name()),
    }

    h.db.delete_friend_request(request.id).unwrap();
    assert!(h.db.get_friend_request_by_user_id(ben.id, ana.id).unwrap().is_none());
    assert!(h.db.get_notifications(ben.id).unwrap().is_empty());
}

#[tokio::test]
async fn new_friendship_is_visible_after_invalidation() {
    let h = harness();
    let ana = h.user("ana");
    let ben = h.user("ben");

    let _ana_conn = h.connect(&ana).await;
    let mut ben_conn = h.connect(&ben).await;

    h.befriend(&ana, &ben);
    h.registry.presence().invalidate_friends(ana.id).await;
    h.registry.presence().invalidate_friends(ben.id).await;

    let post = h.db.create_post(ana.id, None, PostVisibility::Friend).unwrap();
    h.router.post_created(post, ana.summary());

    assert!(matches!(next_event(&mut ben_conn).await, ServerEvent::NewPost { .. }));
}

#[tokio::test]
async fn locked_account_cannot_connect() {
    let h = harness();
    let ana = h.user("ana");
    let token = h.auth.issue_access(&Identity::from(&ana)).unwrap();
    h.db.set_user_active(ana.id, false).unwrap();

    assert!(h.registry.on_connect(&Credentials::access(token)).await.is_err());
    assert!(!h.registry.presence().is_online(ana.id).await);
}
