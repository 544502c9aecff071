//! In-process publish/subscribe for feed events relayed from the socket.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

const TOPIC_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    NewComment,
    NewPost,
    PostUpdated,
    PostDeleted,
    NewReaction,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::NewComment,
        Topic::NewPost,
        Topic::PostUpdated,
        Topic::PostDeleted,
        Topic::NewReaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::NewComment => "new_comment",
            Topic::NewPost => "new_post",
            Topic::PostUpdated => "post_updated",
            Topic::PostDeleted => "post_deleted",
            Topic::NewReaction => "new_reaction",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feed payload, carried verbatim from the frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    NewComment(Value),
    NewPost(Value),
    PostUpdated(Value),
    PostDeleted(String),
    NewReaction(Value),
}

impl FeedEvent {
    pub fn topic(&self) -> Topic {
        match self {
            FeedEvent::NewComment(_) => Topic::NewComment,
            FeedEvent::NewPost(_) => Topic::NewPost,
            FeedEvent::PostUpdated(_) => Topic::PostUpdated,
            FeedEvent::PostDeleted(_) => Topic::PostDeleted,
            FeedEvent::NewReaction(_) => Topic::NewReaction,
        }
    }
}

/// One broadcast channel per topic. Subscribers only see events published after they
/// subscribed; slow subscribers lose the oldest events rather than blocking dispatch.
pub struct EventBus {
    topics: HashMap<Topic, broadcast::Sender<FeedEvent>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let topics = Topic::ALL
            .into_iter()
            .map(|topic| (topic, broadcast::channel(TOPIC_CAPACITY).0))
            .collect();
        Self { topics }
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<FeedEvent> {
        match self.topics.get(&topic) {
            Some(tx) => tx.subscribe(),
            // Every topic is registered in `new`.
            None => broadcast::channel(1).1,
        }
    }

    /// Publishes an event; returns how many subscribers received it.
    pub fn publish(&self, event: FeedEvent) -> usize {
        let topic = event.topic();
        let delivered = self
            .topics
            .get(&topic)
            .and_then(|tx| tx.send(event).ok())
            .unwrap_or(0);
        debug!(%topic, delivered, "feed event published");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_only_see_their_topic() {
        let bus = EventBus::new();
        let mut posts = bus.subscribe(Topic::NewPost);
        let mut deletes = bus.subscribe(Topic::PostDeleted);

        assert_eq!(bus.publish(FeedEvent::NewPost(json!({"id": "p1"}))), 1);
        assert_eq!(bus.publish(FeedEvent::PostDeleted("p0".into())), 1);

        assert_eq!(posts.recv().await.unwrap(), FeedEvent::NewPost(json!({"id": "p1"})));
        assert_eq!(deletes.recv().await.unwrap(), FeedEvent::PostDeleted("p0".into()));
        assert!(posts.try_recv().is_err());
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(FeedEvent::NewReaction(json!({}))), 0);
    }

    #[test]
    fn every_topic_has_a_wire_name() {
        let names: Vec<_> = Topic::ALL.iter().map(Topic::as_str).collect();
        assert_eq!(
            names,
            vec!["new_comment", "new_post", "post_updated", "post_deleted", "new_reaction"]
        );
    }
}
