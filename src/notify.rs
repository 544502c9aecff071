use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::info;

/// Route prefix of the messaging pages.
pub const MESSAGES_ROUTE: &str = "/dashboard/messages";

pub fn conversation_path(conversation_id: &str) -> String {
    format!("{MESSAGES_ROUTE}/{conversation_id}")
}

/// A user-facing alert for an incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub conversation_id: String,
    /// Where activating the notification navigates to.
    pub target: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: Notification) {
        info!(title = %n.title, route = %n.target, "{}", n.body);
    }
}

/// Forwards notifications to a channel, for a UI loop to display.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        // Receiver gone means nobody displays notifications anymore.
        let _ = self.tx.send(notification);
    }
}

/// The page the user currently has open.
#[derive(Debug, Default)]
pub struct ActiveRoute(RwLock<Option<String>>);

impl ActiveRoute {
    pub fn set(&self, path: impl Into<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(path.into());
    }

    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn current(&self) -> Option<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_viewing_conversation(&self, conversation_id: &str) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            .is_some_and(|path| path == conversation_path(conversation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewing_matches_exact_conversation_path() {
        let route = ActiveRoute::default();
        assert!(!route.is_viewing_conversation("c1"));

        route.set(conversation_path("c1"));
        assert!(route.is_viewing_conversation("c1"));
        assert!(!route.is_viewing_conversation("c12"));

        route.set(MESSAGES_ROUTE);
        assert!(!route.is_viewing_conversation("c1"));
        route.clear();
        assert_eq!(route.current(), None);
    }

    #[tokio::test]
    async fn channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(Notification {
            title: "Linh".into(),
            body: "hi".into(),
            conversation_id: "c1".into(),
            target: conversation_path("c1"),
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.target, "/dashboard/messages/c1");
    }
}
