//! Fan-out of server events to the right set of live connections.
//!
//! Recipients are resolved to connection IDs and collected into a set before
//! anything is sent, so a connection reached through several selectors still
//! receives the event once. Conversation participants are read from the
//! store on every publish.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, trace, warn};
use uuid::Uuid;

use orbit_db::Database;
use orbit_types::events::ServerEvent;
use orbit_types::models::{
    Comment, Conversation, FriendRequest, Message, Notification, Post, ReactionChange, UserSummary,
};

use crate::registry::{ConnectionId, ConnectionRegistry, GroupKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    /// Every connection of one user.
    Direct(Uuid),
    /// Every connection of each listed user.
    Users(Vec<Uuid>),
    /// Online friends of `user`, optionally with the user's own connections.
    OnlineFriends { user: Uuid, include_self: bool },
    Room(GroupKey),
    /// Current participants of a conversation, minus `except`.
    ConversationParticipants { conversation: Uuid, except: Option<Uuid> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct EventRouter {
    registry: ConnectionRegistry,
    db: Arc<Database>,
}

impl EventRouter {
    pub fn new(registry: ConnectionRegistry, db: Arc<Database>) -> Self {
        Self { registry, db }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Fire-and-forget fan-out.
    pub fn publish(&self, event: ServerEvent, recipients: Vec<Recipients>) {
        let router = self.clone();
        tokio::spawn(async move {
            router.deliver(event, &recipients).await;
        });
    }

    /// Resolves `recipients` and sends `event` to each target connection once.
    pub async fn deliver(&self, event: ServerEvent, recipients: &[Recipients]) -> DeliveryReport {
        let targets = self.resolve(recipients).await;
        let name = event.name();
        let event = Arc::new(event);

        let mut report = DeliveryReport::default();
        for (id, tx) in self.registry.senders(&targets).await {
            match tx.send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(_) => {
                    debug!("Dropping {} for closed connection {}", name, id);
                    report.failed += 1;
                }
            }
        }

        trace!(
            "{} delivered to {} connections ({} failed)",
            name, report.delivered, report.failed
        );
        report
    }

    async fn resolve(&self, recipients: &[Recipients]) -> HashSet<ConnectionId> {
        let mut users = HashSet::new();
        let mut targets = HashSet::new();

        for recipient in recipients {
            match recipient {
                Recipients::Direct(user) => {
                    users.insert(*user);
                }
                Recipients::Users(list) => users.extend(list.iter().copied()),
                Recipients::OnlineFriends { user, include_self } => {
                    users.extend(self.registry.presence().online_friends_of(*user).await);
                    if *include_self {
                        users.insert(*user);
                    }
                }
                Recipients::Room(key) => targets.extend(self.registry.members(key).await),
                Recipients::ConversationParticipants { conversation, except } => {
                    let participants = self.participants(*conversation).await;
                    users.extend(participants.into_iter().filter(|p| Some(*p) != *except));
                }
            }
        }

        for user in users {
            targets.extend(self.registry.members(&GroupKey::User(user)).await);
        }
        targets
    }

    async fn participants(&self, conversation_id: Uuid) -> Vec<Uuid> {
        let db = self.db.clone();
        match tokio::task::spawn_blocking(move || db.participant_ids(conversation_id)).await {
            Ok(Ok(ids)) => ids,
            Ok(Err(e)) => {
                warn!("Could not load participants of {}: {}", conversation_id, e);
                Vec::new()
            }
            Err(e) => {
                warn!("Participant lookup for {} panicked: {}", conversation_id, e);
                Vec::new()
            }
        }
    }

    // -- Posts --

    /// Friends that are online get `newPost`; the poster gets `myNewPost`.
    pub fn post_created(&self, post: Post, poster: UserSummary) {
        let poster_id = poster.id;
        self.publish(
            ServerEvent::NewPost {
                post: post.clone(),
                poster: poster.clone(),
            },
            vec![Recipients::OnlineFriends {
                user: poster_id,
                include_self: false,
            }],
        );
        self.publish(ServerEvent::MyNewPost { post, poster }, vec![Recipients::Direct(poster_id)]);
    }

    pub fn comment_created(&self, comment: Comment, commentator: UserSummary) {
        let room = Recipients::Room(GroupKey::Post(comment.post_id));
        let event = if comment.parent_comment_id.is_some() {
            ServerEvent::NewReply { comment, commentator }
        } else {
            ServerEvent::NewComment { comment, commentator }
        };
        self.publish(event, vec![room]);
    }

    /// Goes to the post room and to the author, wherever they are.
    pub fn post_reaction(&self, post_id: Uuid, poster_id: Uuid, user: UserSummary, change: ReactionChange) {
        let event = match change {
            ReactionChange::Created(reaction) => ServerEvent::ReactToPost { post_id, user, reaction },
            ReactionChange::Updated(reaction) => ServerEvent::UpdateReactToPost { post_id, user, reaction },
            ReactionChange::Removed => ServerEvent::DeleteReactToPost { post_id, user_id: user.id },
            ReactionChange::Unchanged => return,
        };
        self.publish(
            event,
            vec![Recipients::Room(GroupKey::Post(post_id)), Recipients::Direct(poster_id)],
        );
    }

    pub fn comment_reaction(&self, post_id: Uuid, comment_id: Uuid, user: UserSummary, change: ReactionChange) {
        let event = match change {
            ReactionChange::Created(reaction) => ServerEvent::ReactToComment { post_id, comment_id, user, reaction },
            ReactionChange::Updated(reaction) => {
                ServerEvent::UpdateReactToComment { post_id, comment_id, user, reaction }
            }
            ReactionChange::Removed => ServerEvent::DeleteReactToComment { post_id, comment_id, user_id: user.id },
            ReactionChange::Unchanged => return,
        };
        self.publish(event, vec![Recipients::Room(GroupKey::Post(post_id))]);
    }

    // -- Conversations --

    pub fn message_created(&self, message: Message, sender: UserSummary) {
        let conversation = message.conversation_id;
        self.publish(
            ServerEvent::NewMessage { message, sender },
            vec![Recipients::ConversationParticipants { conversation, except: None }],
        );
    }

    pub fn message_reaction(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        user: UserSummary,
        change: ReactionChange,
    ) {
        let event = match change {
            ReactionChange::Created(reaction) => ServerEvent::ReactToMessage {
                conversation_id,
                message_id,
                user,
                reaction,
            },
            ReactionChange::Updated(reaction) => ServerEvent::UpdateReactToMessage {
                conversation_id,
                message_id,
                user,
                reaction,
            },
            ReactionChange::Removed => ServerEvent::DeleteReactToMessage {
                conversation_id,
                message_id,
                user_id: user.id,
            },
            ReactionChange::Unchanged => return,
        };
        self.publish(
            event,
            vec![Recipients::ConversationParticipants {
                conversation: conversation_id,
                except: None,
            }],
        );
    }

    pub fn group_created(&self, conversation: Conversation, creator: UserSummary) {
        let recipients = vec![Recipients::ConversationParticipants {
            conversation: conversation.id,
            except: Some(creator.id),
        }];
        self.publish(ServerEvent::NewConversationGroup { conversation, creator }, recipients);
    }

    /// New members get `addedToGroup`; everyone already there gets
    /// `moreMemberToGroup`.
    pub async fn members_added(&self, conversation: Conversation, added_by: UserSummary, added: Vec<UserSummary>) {
        if added.is_empty() {
            return;
        }
        let added_ids: HashSet<Uuid> = added.iter().map(|u| u.id).collect();
        let existing: Vec<Uuid> = self
            .participants(conversation.id)
            .await
            .into_iter()
            .filter(|id| !added_ids.contains(id))
            .collect();

        let conversation_id = conversation.id;
        self.publish(
            ServerEvent::AddedToGroup { conversation, added_by },
            vec![Recipients::Users(added_ids.into_iter().collect())],
        );
        self.publish(
            ServerEvent::MoreMemberToGroup {
                conversation_id,
                members: added,
            },
            vec![Recipients::Users(existing)],
        );
    }

    /// Call after the member row is gone so the remaining participants are
    /// the ones notified.
    pub fn member_removed(&self, conversation_id: Uuid, user_id: Uuid, removed_by: Uuid) {
        self.publish(
            ServerEvent::ReduceMemberToGroup { conversation_id, user_id },
            vec![Recipients::ConversationParticipants {
                conversation: conversation_id,
                except: None,
            }],
        );
        self.publish(
            ServerEvent::OutGroupChat {
                conversation_id,
                removed_by,
            },
            vec![Recipients::Direct(user_id)],
        );
    }

    pub fn member_left(&self, conversation_id: Uuid, user_id: Uuid) {
        self.publish(
            ServerEvent::ReduceMemberToGroup { conversation_id, user_id },
            vec![Recipients::ConversationParticipants {
                conversation: conversation_id,
                except: None,
            }],
        );
    }

    // -- Accounts and friends --

    pub fn account_locked(&self, user_id: Uuid, message: impl Into<String>) {
        self.publish(
            ServerEvent::AccountLocked {
                message: message.into(),
            },
            vec![Recipients::Direct(user_id)],
        );
    }

    pub fn friend_request_sent(&self, request: &FriendRequest, sender: UserSummary, notification: &Notification) {
        self.publish(
            ServerEvent::NewFriendRequestNotification {
                friend_request_id: request.id,
                sender,
                notification_id: notification.id,
                content: notification.content.clone(),
                created_at: notification.created_at,
            },
            vec![Recipients::Direct(request.receiver_id)],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::tests::StaticGraph;
    use crate::registry::tests::{creds, registry};
    use orbit_db::models::NewConversation;

    fn summary(id: Uuid) -> UserSummary {
        UserSummary {
            id,
            first_name: "T".into(),
            last_name: "U".into(),
            avatar: None,
        }
    }

    #[tokio::test]
    async fn overlapping_selectors_deliver_once() {
        let registry = registry(Arc::default());
        let router = EventRouter::new(registry.clone(), Arc::new(Database::open_in_memory().unwrap()));
        let (ana, post) = (Uuid::new_v4(), Uuid::new_v4());

        let mut conn = registry.on_connect(&creds(ana)).await.unwrap();
        registry.join_group(conn.id, GroupKey::Post(post)).await;

        let event = ServerEvent::DeleteReactToPost { post_id: post, user_id: ana };
        let report = router
            .deliver(
                event.clone(),
                &[Recipients::Room(GroupKey::Post(post)), Recipients::Direct(ana)],
            )
            .await;

        assert_eq!(report, DeliveryReport { delivered: 1, failed: 0 });
        assert_eq!(*conn.events.recv().await.unwrap(), event);
        assert!(conn.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_connection_does_not_stop_the_others() {
        let registry = registry(Arc::default());
        let router = EventRouter::new(registry.clone(), Arc::new(Database::open_in_memory().unwrap()));
        let (ana, ben) = (Uuid::new_v4(), Uuid::new_v4());

        let dropped = registry.on_connect(&creds(ana)).await.unwrap();
        let mut live = registry.on_connect(&creds(ben)).await.unwrap();
        drop(dropped.events);

        let report = router
            .deliver(
                ServerEvent::AccountLocked { message: "x".into() },
                &[Recipients::Users(vec![ana, ben])],
            )
            .await;

        assert_eq!(report, DeliveryReport { delivered: 1, failed: 1 });
        assert!(live.events.recv().await.is_some());
    }

    #[tokio::test]
    async fn online_friends_excludes_offline_and_self() {
        let graph = Arc::new(StaticGraph::default());
        let (ana, ben, cid) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        graph.befriend(ana, ben);
        graph.befriend(ana, cid);
        let registry = registry(graph);
        let router = EventRouter::new(registry.clone(), Arc::new(Database::open_in_memory().unwrap()));

        let mut ana_conn = registry.on_connect(&creds(ana)).await.unwrap();
        let mut ben_conn = registry.on_connect(&creds(ben)).await.unwrap();

        let report = router
            .deliver(
                ServerEvent::NewPost {
                    post: Post {
                        id: Uuid::new_v4(),
                        poster_id: ana,
                        visibility: orbit_types::models::PostVisibility::Friend,
                        content: None,
                        created_at: chrono::Utc::now(),
                    },
                    poster: summary(ana),
                },
                &[Recipients::OnlineFriends { user: ana, include_self: false }],
            )
            .await;

        assert_eq!(report.delivered, 1);
        assert!(ben_conn.events.try_recv().is_ok());
        assert!(ana_conn.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn participants_are_read_at_publish_time() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let ana = db.create_user("ana", "h", "Ana", "A").unwrap().id;
        let ben = db.create_user("ben", "h", "Ben", "B").unwrap().id;
        let cid = db.create_user("cid", "h", "Cid", "C").unwrap().id;
        let group = db
            .create_conversation(NewConversation::group(None, None, ana, &[ben, cid]))
            .unwrap();

        let registry = registry(Arc::default());
        let router = EventRouter::new(registry.clone(), db.clone());
        let _a = registry.on_connect(&creds(ana)).await.unwrap();
        let _b = registry.on_connect(&creds(ben)).await.unwrap();
        let mut c = registry.on_connect(&creds(cid)).await.unwrap();

        let everyone = [Recipients::ConversationParticipants { conversation: group.id, except: Some(ana) }];
        let event = ServerEvent::ReduceMemberToGroup { conversation_id: group.id, user_id: cid };
        assert_eq!(router.deliver(event.clone(), &everyone).await.delivered, 2);
        assert!(c.events.try_recv().is_ok());

        db.remove_group_member(group.id, ana, cid).unwrap();
        assert_eq!(router.deliver(event, &everyone).await.delivered, 1);
        assert!(c.events.try_recv().is_err());
    }
}
