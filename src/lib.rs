//! Realtime messaging client: one owned WebSocket per session, frame dispatch into a
//! shared query cache, paginated history, presence and typing indicators.

pub mod api;
pub mod bus;
pub mod cache;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod errors;
pub mod frames;
pub mod models;
pub mod notify;
pub mod pagination;
pub mod presence;
pub mod reconnect;
pub mod scroll;
pub mod session;
pub mod typing;

pub use api::ApiClient;
pub use bus::{EventBus, FeedEvent, Topic};
pub use cache::{CacheEvent, CacheEventKind, MergeOutcome, MessagePages, QueryCache, QueryKey};
pub use config::{FileTokenStore, MemoryTokenStore, RealtimeConfig, TokenStore};
pub use connection::{Connection, ConnectionHandle, ConnectionState, FrameHandler};
pub use dispatcher::Dispatcher;
pub use errors::{RealtimeError, Result};
pub use frames::{InboundFrame, OutboundFrame, PresenceStatus};
pub use models::{Conversation, CreateConversationRequest, CurrentUser, Message, MessageType};
pub use notify::{ActiveRoute, ChannelNotifier, Notification, Notifier, TracingNotifier};
pub use pagination::{FetchOutcome, MessageHistory, MessageSource, PAGE_SIZE};
pub use presence::PresenceState;
pub use reconnect::ReconnectPolicy;
pub use session::RealtimeSession;
pub use typing::TypingIndicator;
