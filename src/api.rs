//! REST client for the messaging endpoints.

use std::future::Future;

use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{RealtimeError, Result};
use crate::models::{
    Conversation, CreateConversationRequest, CurrentUser, Message, MessageType, SendMessageRequest,
    UpdateMessageRequest,
};
use crate::pagination::MessageSource;

#[derive(Deserialize)]
struct ConversationsEnvelope {
    #[serde(default)]
    conversations: Vec<Conversation>,
}

#[derive(Deserialize)]
struct ConversationEnvelope {
    conversation: Conversation,
}

#[derive(Deserialize)]
struct MessagesEnvelope {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct MessageEnvelope {
    message: Message,
}

#[derive(Deserialize)]
struct CountEnvelope {
    count: u32,
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: CurrentUser,
}

/// Authenticated client for `/api/v1`.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(RealtimeError::MissingToken);
        }
        let base_url = Url::parse(base_url).map_err(|e| RealtimeError::invalid_url(base_url, e))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(RealtimeError::invalid_url(base_url.as_str(), "scheme must be http or https"));
        }
        Ok(Self { http: Client::new(), base_url, token })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RealtimeError::invalid_url(self.base_url.as_str(), "cannot be a base"))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, %url, "api request");
        self.http.request(method, url).bearer_auth(&self.token)
    }

    async fn check(resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RealtimeError::Api { status: status.as_u16(), body })
    }

    async fn json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T> {
        let resp = Self::check(req.send().await?).await?;
        Ok(resp.json::<T>().await?)
    }

    pub async fn fetch_current_user(&self) -> Result<CurrentUser> {
        let url = self.endpoint(&["users", "me"])?;
        let env: UserEnvelope = Self::json(self.request(Method::GET, url)).await?;
        Ok(env.user)
    }

    pub async fn fetch_conversations(&self) -> Result<Vec<Conversation>> {
        let url = self.endpoint(&["conversations"])?;
        let env: ConversationsEnvelope = Self::json(self.request(Method::GET, url)).await?;
        Ok(env.conversations)
    }

    pub async fn fetch_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        let url = self.endpoint(&["conversations", conversation_id])?;
        let env: ConversationEnvelope = Self::json(self.request(Method::GET, url)).await?;
        Ok(env.conversation)
    }

    /// Creates a direct, group, community or event conversation.
    pub async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<Conversation> {
        let url = self.endpoint(&["conversations"])?;
        let env: ConversationEnvelope =
            Self::json(self.request(Method::POST, url).json(request)).await?;
        debug!(conversation_id = %env.conversation.id, kind = ?request.kind, "conversation created");
        Ok(env.conversation)
    }

    /// One page of history, newest first.
    pub async fn fetch_messages(
        &self,
        conversation_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let mut url = self.endpoint(&["conversations", conversation_id, "messages"])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());
        let env: MessagesEnvelope = Self::json(self.request(Method::GET, url)).await?;
        Ok(env.messages)
    }

    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        message_type: MessageType,
    ) -> Result<Message> {
        let url = self.endpoint(&["conversations", conversation_id, "messages"])?;
        let body = SendMessageRequest { content: content.to_string(), message_type };
        let env: MessageEnvelope = Self::json(self.request(Method::POST, url).json(&body)).await?;
        Ok(env.message)
    }

    pub async fn update_message(&self, message_id: &str, content: &str) -> Result<Message> {
        let url = self.endpoint(&["messages", message_id])?;
        let body = UpdateMessageRequest { content: content.to_string() };
        let env: MessageEnvelope = Self::json(self.request(Method::PATCH, url).json(&body)).await?;
        Ok(env.message)
    }

    pub async fn delete_message(&self, message_id: &str) -> Result<()> {
        let url = self.endpoint(&["messages", message_id])?;
        Self::check(self.request(Method::DELETE, url).send().await?).await?;
        Ok(())
    }

    pub async fn mark_as_read(&self, conversation_id: &str) -> Result<()> {
        let url = self.endpoint(&["conversations", conversation_id, "read"])?;
        Self::check(self.request(Method::POST, url).send().await?).await?;
        Ok(())
    }

    pub async fn unread_count(&self) -> Result<u32> {
        let url = self.endpoint(&["conversations", "unread-count"])?;
        let env: CountEnvelope = Self::json(self.request(Method::GET, url)).await?;
        Ok(env.count)
    }
}

impl MessageSource for ApiClient {
    fn fetch_page(
        &self,
        conversation_id: &str,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>>> + Send {
        self.fetch_messages(conversation_id, offset, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_joined_under_api_v1() {
        let api = ApiClient::new("http://localhost:8080", "t").unwrap();
        assert_eq!(
            api.endpoint(&["conversations", "c 1", "messages"]).unwrap().as_str(),
            "http://localhost:8080/api/v1/conversations/c%201/messages"
        );

        let prefixed = ApiClient::new("https://host/backend/", "t").unwrap();
        assert_eq!(
            prefixed.endpoint(&["users", "me"]).unwrap().as_str(),
            "https://host/backend/api/v1/users/me"
        );
    }

    #[test]
    fn rejects_missing_token_and_bad_scheme() {
        assert!(matches!(ApiClient::new("http://x", ""), Err(RealtimeError::MissingToken)));
        assert!(matches!(
            ApiClient::new("ws://x", "t"),
            Err(RealtimeError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn envelopes_decode() {
        let env: CountEnvelope = serde_json::from_str(r#"{"count": 4}"#).unwrap();
        assert_eq!(env.count, 4);
        let env: MessagesEnvelope = serde_json::from_str("{}").unwrap();
        assert!(env.messages.is_empty());
        let env: UserEnvelope =
            serde_json::from_str(r#"{"user": {"id": "u1", "name": "Linh", "email": "l@x"}}"#).unwrap();
        assert_eq!(env.user, CurrentUser::new("u1", "Linh"));
    }
}
