use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::bus::{EventBus, FeedEvent};
use crate::cache::{MergeOutcome, QueryCache, QueryKey};
use crate::connection::{ConnectionState, FrameHandler};
use crate::frames::{self, InboundFrame};
use crate::models::{Author, CurrentUser, Message};
use crate::notify::{conversation_path, ActiveRoute, Notification, Notifier};
use crate::presence::PresenceState;

const PREVIEW_CHARS: usize = 80;

/// Routes decoded socket frames to the cache, presence maps, feed bus and notifier.
pub struct Dispatcher {
    current_user: CurrentUser,
    cache: Arc<QueryCache>,
    presence: Arc<PresenceState>,
    bus: Arc<EventBus>,
    notifier: Arc<dyn Notifier>,
    route: Arc<ActiveRoute>,
    /// Set once the socket has been open, so a later `Open` is known to be a reconnect.
    was_open: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        current_user: CurrentUser,
        cache: Arc<QueryCache>,
        presence: Arc<PresenceState>,
        bus: Arc<EventBus>,
        notifier: Arc<dyn Notifier>,
        route: Arc<ActiveRoute>,
    ) -> Self {
        Self { current_user, cache, presence, bus, notifier, route, was_open: AtomicBool::new(false) }
    }

    /// Decodes and applies one raw text frame. Malformed frames are logged and dropped.
    pub fn handle_frame(&self, raw: &str) {
        match frames::decode(raw) {
            Ok(frame) => self.apply(frame),
            Err(e) => warn!(error = %e, "dropping malformed frame"),
        }
    }

    pub fn apply(&self, frame: InboundFrame) {
        debug!(kind = frame.kind(), "frame received");
        match frame {
            InboundFrame::NewMessage { conversation_id, sender_id, message, author } => {
                self.on_new_message(conversation_id, sender_id, message, author)
            }
            InboundFrame::UserStatus { user_id, status } => {
                self.presence.set_status(&user_id, status.is_online())
            }
            InboundFrame::TypingEvent { conversation_id, user_id, is_typing } => {
                self.presence.set_typing(&conversation_id, &user_id, is_typing)
            }
            InboundFrame::MessagesRead { conversation_id, user_id, .. } => {
                debug!(%conversation_id, %user_id, "conversation read");
                self.cache.invalidate(&QueryKey::Conversations);
            }
            InboundFrame::NewComment { comment } => {
                self.on_feed_event(FeedEvent::NewComment(comment))
            }
            InboundFrame::NewPost { post } => self.on_feed_event(FeedEvent::NewPost(post)),
            InboundFrame::PostUpdated { post } => {
                self.on_feed_event(FeedEvent::PostUpdated(post))
            }
            InboundFrame::PostDeleted { post_id } => {
                self.on_feed_event(FeedEvent::PostDeleted(post_id))
            }
            InboundFrame::NewReaction { reaction } => {
                self.on_feed_event(FeedEvent::NewReaction(reaction))
            }
            InboundFrame::Unknown => debug!("ignoring frame of unknown type"),
        }
    }

    /// Feed activity also lands in the user's notification list.
    fn on_feed_event(&self, event: FeedEvent) {
        self.bus.publish(event);
        self.cache.invalidate(&QueryKey::Notifications);
    }

    fn on_new_message(
        &self,
        conversation_id: String,
        sender_id: String,
        mut message: Message,
        author: Option<Author>,
    ) {
        if message.conversation_id.is_empty() {
            message.conversation_id = conversation_id.clone();
        }
        if message.sender_id.is_empty() {
            message.sender_id = sender_id;
        }
        if message.author.is_none() {
            message.author = author;
        }

        let from_self = message.sender_id == self.current_user.id;
        let notification = (!from_self && !self.route.is_viewing_conversation(&conversation_id))
            .then(|| self.notification_for(&conversation_id, &message));

        let outcome = self.cache.merge_new_message(&conversation_id, message, &self.current_user.id);
        if outcome == MergeOutcome::Duplicate {
            return;
        }
        if let Some(notification) = notification {
            self.notifier.notify(notification);
        }
    }

    fn notification_for(&self, conversation_id: &str, message: &Message) -> Notification {
        let title = message
            .author
            .as_ref()
            .map(|a| a.name.trim())
            .filter(|name| !name.is_empty())
            .unwrap_or("New message")
            .to_string();
        Notification {
            title,
            body: message.preview(PREVIEW_CHARS),
            conversation_id: conversation_id.to_string(),
            target: conversation_path(conversation_id),
        }
    }
}

impl FrameHandler for Dispatcher {
    fn on_frame(&self, raw: &str) {
        self.handle_frame(raw);
    }

    fn on_state_change(&self, state: &ConnectionState) {
        // Presence and typing are only meaningful while frames are flowing.
        if !state.is_open() {
            self.presence.clear();
            return;
        }
        // Frames sent while the socket was down are lost; refetch what they would have touched.
        if self.was_open.swap(true, Ordering::AcqRel) {
            debug!("socket reopened, invalidating message histories");
            self.cache.invalidate_all_messages();
            self.cache.invalidate(&QueryKey::Conversations);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::bus::Topic;
    use crate::notify::ChannelNotifier;

    struct Fixture {
        dispatcher: Dispatcher,
        cache: Arc<QueryCache>,
        presence: Arc<PresenceState>,
        bus: Arc<EventBus>,
        route: Arc<ActiveRoute>,
        notifications: mpsc::UnboundedReceiver<Notification>,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(QueryCache::new());
        let presence = Arc::new(PresenceState::new());
        let bus = Arc::new(EventBus::new());
        let route = Arc::new(ActiveRoute::default());
        let (notifier, notifications) = ChannelNotifier::new();
        let dispatcher = Dispatcher::new(
            CurrentUser::new("me", "Me"),
            cache.clone(),
            presence.clone(),
            bus.clone(),
            Arc::new(notifier),
            route.clone(),
        );
        Fixture { dispatcher, cache, presence, bus, route, notifications }
    }

    fn new_message(id: &str, sender: &str) -> String {
        json!({
            "type": "new_message",
            "conversation_id": "c1",
            "sender_id": sender,
            "message": {
                "id": id,
                "sender_id": sender,
                "content": "hello there",
                "created_at": "2024-05-01T10:00:00Z"
            },
            "author": {"id": sender, "name": "Linh"}
        })
        .to_string()
    }

    #[test]
    fn new_message_from_other_merges_and_notifies() {
        let mut f = fixture();
        f.dispatcher.handle_frame(&new_message("m1", "u2"));

        let pages = f.cache.messages("c1").unwrap();
        let stored = pages.get("m1").unwrap();
        assert_eq!(stored.conversation_id, "c1");
        assert_eq!(stored.author.as_ref().unwrap().name, "Linh");
        assert!(f.cache.is_stale(&QueryKey::Conversations));

        let n = f.notifications.try_recv().unwrap();
        assert_eq!(n.title, "Linh");
        assert_eq!(n.body, "hello there");
        assert_eq!(n.target, "/dashboard/messages/c1");
    }

    #[test]
    fn own_echo_does_not_invalidate_or_notify() {
        let mut f = fixture();
        f.dispatcher.handle_frame(&new_message("m1", "me"));
        assert!(f.cache.messages("c1").unwrap().contains("m1"));
        assert!(!f.cache.is_stale(&QueryKey::Conversations));
        assert!(f.notifications.try_recv().is_err());
    }

    #[test]
    fn duplicate_delivery_notifies_once() {
        let mut f = fixture();
        f.dispatcher.handle_frame(&new_message("m1", "u2"));
        f.dispatcher.handle_frame(&new_message("m1", "u2"));
        assert_eq!(f.cache.messages("c1").unwrap().len(), 1);
        assert!(f.notifications.try_recv().is_ok());
        assert!(f.notifications.try_recv().is_err());
    }

    #[test]
    fn no_notification_while_viewing_the_conversation() {
        let mut f = fixture();
        f.route.set(conversation_path("c1"));
        f.dispatcher.handle_frame(&new_message("m1", "u2"));
        assert!(f.notifications.try_recv().is_err());
        assert!(f.cache.messages("c1").unwrap().contains("m1"));
    }

    #[test]
    fn presence_and_typing_frames_update_maps() {
        let f = fixture();
        let d = &f.dispatcher;
        d.handle_frame(r#"{"type":"user_status","user_id":"u2","status":"online"}"#);
        assert!(f.presence.is_online("u2"));
        d.handle_frame(r#"{"type":"user_status","user_id":"u2","status":"offline"}"#);
        assert!(!f.presence.is_online("u2"));

        d.handle_frame(r#"{"type":"typing_event","conversation_id":"c1","user_id":"u2","is_typing":true}"#);
        assert_eq!(f.presence.typing_users("c1"), vec!["u2"]);
        d.handle_frame(r#"{"type":"typing_event","conversation_id":"c1","user_id":"u2","is_typing":false}"#);
        assert!(f.presence.typing_users("c1").is_empty());
    }

    #[test]
    fn messages_read_invalidates_conversation_list() {
        let f = fixture();
        f.dispatcher
            .handle_frame(r#"{"type":"messages_read","conversation_id":"c1","user_id":"u2"}"#);
        assert!(f.cache.is_stale(&QueryKey::Conversations));
    }

    #[tokio::test]
    async fn feed_frames_are_published_verbatim() {
        let f = fixture();
        let mut comments = f.bus.subscribe(Topic::NewComment);
        f.dispatcher
            .handle_frame(r#"{"type":"new_comment","comment":{"id":"k1","body":"nice"}}"#);
        assert_eq!(
            comments.recv().await.unwrap(),
            FeedEvent::NewComment(json!({"id": "k1", "body": "nice"}))
        );
    }

    #[tokio::test]
    async fn feed_frames_mark_notifications_stale() {
        let f = fixture();
        let mut reactions = f.bus.subscribe(Topic::NewReaction);
        assert!(!f.cache.is_stale(&QueryKey::Notifications));

        f.dispatcher.handle_frame(r#"{"type":"new_reaction","reaction":{"post_id":"p1"}}"#);
        assert!(f.cache.is_stale(&QueryKey::Notifications));
        assert!(!f.cache.is_stale(&QueryKey::Conversations));
        assert_eq!(
            reactions.recv().await.unwrap(),
            FeedEvent::NewReaction(json!({"post_id": "p1"}))
        );
    }

    #[test]
    fn message_frames_leave_notifications_alone() {
        let f = fixture();
        f.dispatcher.handle_frame(&new_message("m1", "u2"));
        f.dispatcher
            .handle_frame(r#"{"type":"messages_read","conversation_id":"c1","user_id":"u2"}"#);
        assert!(!f.cache.is_stale(&QueryKey::Notifications));
    }

    #[test]
    fn frame_sender_fills_missing_message_sender() {
        let mut f = fixture();
        let raw = json!({
            "type": "new_message",
            "conversation_id": "c1",
            "sender_id": "me",
            "message": {"id": "m1", "content": "from my phone", "created_at": "2024-05-01T10:00:00Z"}
        });
        f.dispatcher.handle_frame(&raw.to_string());

        assert_eq!(f.cache.messages("c1").unwrap().get("m1").unwrap().sender_id, "me");
        assert!(!f.cache.is_stale(&QueryKey::Conversations));
        assert!(f.notifications.try_recv().is_err());
    }

    #[test]
    fn unknown_and_malformed_frames_change_nothing() {
        let mut f = fixture();
        let mut cache_events = f.cache.subscribe();
        let mut presence_events = f.presence.subscribe();

        f.dispatcher.handle_frame(r#"{"type":"server_maintenance","at":"soon"}"#);
        f.dispatcher.handle_frame("not json");
        f.dispatcher.handle_frame(r#"{"type":"user_status","user_id":"u2"}"#);

        assert!(cache_events.try_recv().is_err());
        assert!(presence_events.try_recv().is_err());
        assert!(f.cache.messages("c1").is_none());
        assert!(f.presence.online_users().is_empty());
        assert!(f.notifications.try_recv().is_err());
    }

    #[test]
    fn leaving_open_clears_presence() {
        let f = fixture();
        f.presence.set_status("u2", true);
        f.presence.set_typing("c1", "u2", true);

        f.dispatcher.on_state_change(&ConnectionState::Open);
        assert!(f.presence.is_online("u2"));

        f.dispatcher.on_state_change(&ConnectionState::Closed);
        assert!(!f.presence.is_online("u2"));
        assert!(f.presence.typing_users("c1").is_empty());
    }

    #[test]
    fn reopening_invalidates_message_histories() {
        let f = fixture();
        f.dispatcher.handle_frame(&new_message("m1", "me"));
        f.cache.set_conversations(Vec::new());

        f.dispatcher.on_state_change(&ConnectionState::Open);
        assert!(!f.cache.is_stale(&QueryKey::Messages("c1".into())));

        f.dispatcher.on_state_change(&ConnectionState::Reconnecting {
            attempt: 1,
            delay: std::time::Duration::from_millis(500),
        });
        f.dispatcher.on_state_change(&ConnectionState::Open);
        assert!(f.cache.is_stale(&QueryKey::Messages("c1".into())));
        assert!(f.cache.is_stale(&QueryKey::Conversations));
    }
}
