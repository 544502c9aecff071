//! The owned realtime session: one socket, the shared cache, presence, feed bus and the
//! REST client, created together at login and disposed together at logout.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::bus::EventBus;
use crate::cache::{QueryCache, QueryKey};
use crate::config::{RealtimeConfig, TokenStore};
use crate::connection::{Connection, ConnectionHandle, ConnectionState};
use crate::dispatcher::Dispatcher;
use crate::errors::Result;
use crate::frames::OutboundFrame;
use crate::models::{Conversation, CreateConversationRequest, CurrentUser, Message, MessageType};
use crate::notify::{conversation_path, ActiveRoute, Notifier, MESSAGES_ROUTE};
use crate::pagination::MessageHistory;
use crate::presence::{typing_summary, PresenceState};
use crate::typing::TypingIndicator;

pub struct RealtimeSession {
    config: RealtimeConfig,
    user: CurrentUser,
    api: ApiClient,
    cache: Arc<QueryCache>,
    presence: Arc<PresenceState>,
    bus: Arc<EventBus>,
    route: Arc<ActiveRoute>,
    connection: Connection,
}

impl RealtimeSession {
    /// Opens the socket for `user`. Fails only on a missing token or invalid URLs.
    pub fn start(
        config: RealtimeConfig,
        tokens: &dyn TokenStore,
        user: CurrentUser,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let token = tokens.require()?;
        let api = ApiClient::new(&config.api_base_url, token.clone())?;

        let cache = Arc::new(QueryCache::new());
        let presence = Arc::new(PresenceState::new());
        let bus = Arc::new(EventBus::new());
        let route = Arc::new(ActiveRoute::default());
        let dispatcher = Dispatcher::new(
            user.clone(),
            cache.clone(),
            presence.clone(),
            bus.clone(),
            notifier,
            route.clone(),
        );

        let connection =
            Connection::open(&config.ws_url, &token, config.reconnect.clone(), Arc::new(dispatcher))?;
        info!(user_id = %user.id, ws_url = %config.ws_url, "realtime session started");

        Ok(Self { config, user, api, cache, presence, bus, route, connection })
    }

    pub fn user(&self) -> &CurrentUser {
        &self.user
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn presence(&self) -> &Arc<PresenceState> {
        &self.presence
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn route(&self) -> &Arc<ActiveRoute> {
        &self.route
    }

    pub fn connection(&self) -> ConnectionHandle {
        self.connection.handle()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Paginated history of one conversation, backed by the shared cache.
    pub fn history(&self, conversation_id: &str) -> MessageHistory<ApiClient> {
        MessageHistory::new(
            self.api.clone(),
            self.cache.clone(),
            conversation_id,
            self.config.page_size,
        )
    }

    pub fn typing_indicator(&self, conversation_id: &str) -> TypingIndicator {
        TypingIndicator::with_idle_timeout(
            Arc::new(self.connection.handle()),
            conversation_id,
            &self.user.id,
            self.config.typing_idle,
        )
    }

    /// Sends a one-off typing frame. Dropped if the socket is not open.
    pub fn send_typing(&self, conversation_id: &str, is_typing: bool) -> bool {
        self.connection
            .send_json(&OutboundFrame::typing(conversation_id, &self.user.id, is_typing))
    }

    /// "Linh is typing..." header for a conversation, or `None` when nobody else is typing.
    ///
    /// Typists are named from the author info of their cached messages, falling back to
    /// their user id.
    pub fn typing_summary(&self, conversation_id: &str) -> Option<String> {
        let history = self.cache.messages(conversation_id);
        let names: Vec<String> = self
            .presence
            .typing_in(conversation_id, &self.user.id)
            .into_iter()
            .map(|user_id| {
                let name = history.as_ref().and_then(|pages| {
                    pages
                        .iter()
                        .filter(|m| m.sender_id == user_id)
                        .find_map(|m| m.author.as_ref())
                        .map(|a| a.name.trim().to_string())
                        .filter(|name| !name.is_empty())
                });
                name.unwrap_or(user_id)
            })
            .collect();
        typing_summary(&names)
    }

    /// Refetches the conversation list into the cache.
    pub async fn load_conversations(&self) -> Result<Arc<Vec<Conversation>>> {
        let conversations = self.api.fetch_conversations().await?;
        Ok(self.cache.set_conversations(conversations))
    }

    pub async fn load_unread_count(&self) -> Result<u32> {
        let count = self.api.unread_count().await?;
        self.cache.set_unread_count(count);
        Ok(count)
    }

    /// Creates a conversation and puts it at the top of the cached list.
    pub async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<Conversation> {
        let conversation = self.api.create_conversation(request).await?;
        info!(conversation_id = %conversation.id, kind = ?conversation.kind, "conversation created");
        self.cache.add_conversation(conversation.clone());
        Ok(conversation)
    }

    /// Sends a message with an optimistic placeholder that is replaced by the server's copy,
    /// or removed again if the request fails.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        message_type: MessageType,
    ) -> Result<Message> {
        let placeholder = Message::optimistic(
            conversation_id.to_string(),
            self.user.id.clone(),
            content.to_string(),
            message_type,
        );
        let placeholder_id = placeholder.id.clone();
        self.cache.insert_optimistic(conversation_id, placeholder);

        match self.api.send_message(conversation_id, content, message_type).await {
            Ok(message) => {
                self.cache.confirm_optimistic(conversation_id, &placeholder_id, message.clone());
                self.cache.invalidate(&QueryKey::Conversations);
                Ok(message)
            }
            Err(e) => {
                warn!(error = %e, conversation_id, "send failed, rolling back");
                self.cache.discard_optimistic(conversation_id, &placeholder_id);
                Err(e)
            }
        }
    }

    pub async fn edit_message(&self, conversation_id: &str, message_id: &str, content: &str) -> Result<Message> {
        let message = self.api.update_message(message_id, content).await?;
        if !self.cache.replace_message(conversation_id, message.clone()) {
            self.cache.invalidate(&QueryKey::Messages(conversation_id.to_string()));
        }
        Ok(message)
    }

    pub async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        self.api.delete_message(message_id).await?;
        self.cache.invalidate(&QueryKey::Messages(conversation_id.to_string()));
        self.cache.invalidate(&QueryKey::Conversations);
        Ok(())
    }

    /// Marks the conversation as the page on screen and as read on the server, and loads
    /// its details into the cache.
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<Arc<Conversation>> {
        self.route.set(conversation_path(conversation_id));
        self.api.mark_as_read(conversation_id).await?;
        self.cache.invalidate(&QueryKey::Conversations);
        self.cache.invalidate(&QueryKey::UnreadCount);

        let conversation = self.api.fetch_conversation(conversation_id).await?;
        Ok(self.cache.set_conversation(conversation))
    }

    pub fn leave_conversation(&self) {
        self.route.set(MESSAGES_ROUTE);
    }

    /// Closes the socket and waits for the driver to stop.
    pub async fn dispose(self) {
        info!(user_id = %self.user.id, "disposing realtime session");
        self.connection.close().await;
    }
}
