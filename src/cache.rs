//! Keyed client-side query cache shared by REST page loads and socket merges.
//!
//! Message history is stored per conversation as a list of pages, each ordered
//! newest-first exactly like the server delivers it. Pages are immutable `Arc<[Message]>`
//! slices: every write builds a new slice for the page it touches and shares the rest, so a
//! snapshot handed out earlier keeps iterating over the data it was taken from.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{Conversation, Message};
use crate::pagination;

const EVENT_CAPACITY: usize = 256;

/// Identifies one cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Conversations,
    Conversation(String),
    Messages(String),
    UnreadCount,
    /// Activity feed notifications; no data is held, only staleness.
    Notifications,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    Updated,
    Invalidated,
    Removed,
}

/// Change notification delivered to cache subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: QueryKey,
    pub kind: CacheEventKind,
}

/// Result of merging a socket-delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No history was cached; a new entry holding only this message was created.
    Created,
    /// The message was added to the newest page.
    Prepended,
    /// The message replaced the optimistic placeholder the current user inserted.
    Reconciled,
    /// A message with the same id is already cached; nothing changed.
    Duplicate,
}

/// Bookkeeping for one fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMeta {
    /// Offset the page was requested with.
    pub offset: usize,
    /// Number of messages the server returned, before de-duplication.
    pub fetched_len: usize,
}

/// Paginated history of one conversation.
#[derive(Debug, Clone, Default)]
pub struct MessagePages {
    pages: Vec<Arc<[Message]>>,
    meta: Vec<PageMeta>,
    fetched: bool,
}

impl MessagePages {
    fn single(message: Message) -> Self {
        Self {
            pages: vec![Arc::from(vec![message])],
            meta: vec![PageMeta { offset: 0, fetched_len: 0 }],
            fetched: false,
        }
    }

    pub fn pages(&self) -> &[Arc<[Message]>] {
        &self.pages
    }

    pub fn page_meta(&self) -> &[PageMeta] {
        &self.meta
    }

    /// Whether at least one page came from the REST API (as opposed to socket merges only).
    pub fn is_fetched(&self) -> bool {
        self.fetched
    }

    /// Total number of cached messages.
    pub fn len(&self) -> usize {
        self.pages.iter().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages newest-first across all pages.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.pages.iter().flat_map(|p| p.iter())
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.iter().any(|m| m.id == message_id)
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.iter().find(|m| m.id == message_id)
    }

    /// Offset of the next older page, or `None` once the server returned a short page.
    ///
    /// The offset counts cached server messages, so messages merged from the socket shift
    /// it in step with the server's newest-first ordering. Optimistic placeholders are not
    /// on the server yet and are left out.
    pub fn next_page_param(&self, page_size: usize) -> Option<usize> {
        if !self.fetched {
            return Some(0);
        }
        let last = self.meta.last()?;
        if last.fetched_len < page_size {
            return None;
        }
        Some(self.iter().filter(|m| !m.is_optimistic()).count())
    }

    /// Messages oldest-first, ready for display.
    pub fn flatten_for_display(&self) -> Vec<Message> {
        pagination::flatten_for_display(&self.pages)
    }

    fn ids(&self) -> HashSet<&str> {
        self.iter().map(|m| m.id.as_str()).collect()
    }

    fn locate(&self, message_id: &str) -> Option<(usize, usize)> {
        self.pages.iter().enumerate().find_map(|(page_idx, page)| {
            page.iter()
                .position(|m| m.id == message_id)
                .map(|pos| (page_idx, pos))
        })
    }

    /// Returns a copy with `message` placed into the newest page at its
    /// newest-first position.
    fn with_inserted(&self, message: Message) -> Self {
        let mut next = self.clone();
        if next.pages.is_empty() {
            next.pages.push(Arc::from(vec![message]));
            next.meta.push(PageMeta { offset: 0, fetched_len: 0 });
            return next;
        }
        let mut first: Vec<Message> = next.pages[0].to_vec();
        let pos = first
            .iter()
            .position(|m| m.created_at <= message.created_at)
            .unwrap_or(first.len());
        first.insert(pos, message);
        next.pages[0] = Arc::from(first);
        next
    }

    /// Returns a copy without the message at `(page, pos)`.
    fn with_removed(&self, page: usize, pos: usize) -> Self {
        let mut next = self.clone();
        let mut rebuilt: Vec<Message> = next.pages[page].to_vec();
        rebuilt.remove(pos);
        next.pages[page] = Arc::from(rebuilt);
        next
    }

    fn with_replaced(&self, page: usize, pos: usize, message: Message) -> Self {
        let mut next = self.clone();
        let mut rebuilt: Vec<Message> = next.pages[page].to_vec();
        rebuilt[pos] = message;
        next.pages[page] = Arc::from(rebuilt);
        next
    }

    fn find_placeholder(&self, confirmed: &Message) -> Option<(usize, usize)> {
        self.pages.iter().enumerate().find_map(|(page_idx, page)| {
            page.iter()
                .position(|m| {
                    m.is_optimistic()
                        && m.sender_id == confirmed.sender_id
                        && m.content == confirmed.content
                })
                .map(|pos| (page_idx, pos))
        })
    }
}

#[derive(Default)]
struct CacheInner {
    conversations: Option<Arc<Vec<Conversation>>>,
    conversation_details: HashMap<String, Arc<Conversation>>,
    messages: HashMap<String, Arc<MessagePages>>,
    unread_count: Option<u32>,
    stale: HashSet<QueryKey>,
}

/// Shared query cache.
pub struct QueryCache {
    inner: RwLock<CacheInner>,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { inner: RwLock::new(CacheInner::default()), events }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, key: QueryKey, kind: CacheEventKind) {
        // No subscribers is fine.
        let _ = self.events.send(CacheEvent { key, kind });
    }

    /// Subscribes to change notifications for every key.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    // ── Staleness ────────────────────────────────────────────────────────────

    /// Marks a query stale so its next read refetches.
    pub fn invalidate(&self, key: &QueryKey) {
        self.write().stale.insert(key.clone());
        debug!(?key, "query invalidated");
        self.emit(key.clone(), CacheEventKind::Invalidated);
    }

    /// Marks every cached message history stale.
    pub fn invalidate_all_messages(&self) {
        let keys: Vec<QueryKey> = {
            let mut inner = self.write();
            let keys: Vec<QueryKey> =
                inner.messages.keys().map(|id| QueryKey::Messages(id.clone())).collect();
            inner.stale.extend(keys.iter().cloned());
            keys
        };
        for key in keys {
            self.emit(key, CacheEventKind::Invalidated);
        }
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.read().stale.contains(key)
    }

    /// Drops a query's data and staleness.
    pub fn remove(&self, key: &QueryKey) {
        {
            let mut inner = self.write();
            match key {
                QueryKey::Conversations => inner.conversations = None,
                QueryKey::Conversation(id) => {
                    inner.conversation_details.remove(id);
                }
                QueryKey::Messages(id) => {
                    inner.messages.remove(id);
                }
                QueryKey::UnreadCount => inner.unread_count = None,
                QueryKey::Notifications => {}
            }
            inner.stale.remove(key);
        }
        self.emit(key.clone(), CacheEventKind::Removed);
    }

    // ── Conversations ────────────────────────────────────────────────────────

    pub fn set_conversations(&self, conversations: Vec<Conversation>) -> Arc<Vec<Conversation>> {
        let conversations = Arc::new(conversations);
        {
            let mut inner = self.write();
            inner.conversations = Some(conversations.clone());
            inner.stale.remove(&QueryKey::Conversations);
        }
        self.emit(QueryKey::Conversations, CacheEventKind::Updated);
        conversations
    }

    pub fn conversations(&self) -> Option<Arc<Vec<Conversation>>> {
        self.read().conversations.clone()
    }

    pub fn set_conversation(&self, conversation: Conversation) -> Arc<Conversation> {
        let key = QueryKey::Conversation(conversation.id.clone());
        let conversation = Arc::new(conversation);
        {
            let mut inner = self.write();
            inner.stale.remove(&key);
            inner
                .conversation_details
                .insert(conversation.id.clone(), conversation.clone());
        }
        self.emit(key, CacheEventKind::Updated);
        conversation
    }

    /// Stores a conversation created by this client at the head of the cached list.
    /// Without a cached list the list is marked stale instead.
    pub fn add_conversation(&self, conversation: Conversation) {
        let listed = {
            let mut inner = self.write();
            match inner.conversations.clone() {
                Some(list) => {
                    let mut next = Vec::with_capacity(list.len() + 1);
                    next.push(conversation.clone());
                    next.extend(list.iter().filter(|c| c.id != conversation.id).cloned());
                    inner.conversations = Some(Arc::new(next));
                    true
                }
                None => false,
            }
        };
        if listed {
            self.emit(QueryKey::Conversations, CacheEventKind::Updated);
        } else {
            self.invalidate(&QueryKey::Conversations);
        }
        self.set_conversation(conversation);
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<Arc<Conversation>> {
        self.read().conversation_details.get(conversation_id).cloned()
    }

    pub fn set_unread_count(&self, count: u32) {
        {
            let mut inner = self.write();
            inner.unread_count = Some(count);
            inner.stale.remove(&QueryKey::UnreadCount);
        }
        self.emit(QueryKey::UnreadCount, CacheEventKind::Updated);
    }

    pub fn unread_count(&self) -> Option<u32> {
        self.read().unread_count
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    /// Snapshot of a conversation's cached history.
    pub fn messages(&self, conversation_id: &str) -> Option<Arc<MessagePages>> {
        self.read().messages.get(conversation_id).cloned()
    }

    /// Merges a message announced by the socket into the conversation's newest page.
    ///
    /// Idempotent by message id. Marks the conversation list stale unless the message
    /// came from `current_user_id`, whose sends already refresh it.
    pub fn merge_new_message(
        &self,
        conversation_id: &str,
        message: Message,
        current_user_id: &str,
    ) -> MergeOutcome {
        let from_self = message.sender_id == current_user_id;
        let outcome = {
            let mut inner = self.write();
            match inner.messages.get(conversation_id).cloned() {
                None => {
                    inner
                        .messages
                        .insert(conversation_id.to_string(), Arc::new(MessagePages::single(message)));
                    MergeOutcome::Created
                }
                Some(pages) if pages.contains(&message.id) => MergeOutcome::Duplicate,
                Some(pages) => {
                    let placeholder = if from_self { pages.find_placeholder(&message) } else { None };
                    let (next, outcome) = match placeholder {
                        Some((page, pos)) => (
                            pages.with_removed(page, pos).with_inserted(message),
                            MergeOutcome::Reconciled,
                        ),
                        None => (pages.with_inserted(message), MergeOutcome::Prepended),
                    };
                    inner.messages.insert(conversation_id.to_string(), Arc::new(next));
                    outcome
                }
            }
        };

        if outcome == MergeOutcome::Duplicate {
            debug!(conversation_id, "duplicate message ignored");
            return outcome;
        }
        self.emit(QueryKey::Messages(conversation_id.to_string()), CacheEventKind::Updated);
        if !from_self {
            self.invalidate(&QueryKey::Conversations);
        }
        outcome
    }

    /// Stores one page fetched from the REST API.
    ///
    /// Offset `0` (re)starts the history: any cached messages newer than the fetched page
    /// (merged from the socket while the request was in flight) are kept on top, older
    /// pages are dropped. Any other offset appends an older page, skipping ids already
    /// cached. Returns how many messages were actually added.
    pub fn store_page(&self, conversation_id: &str, offset: usize, page: Vec<Message>) -> usize {
        let fetched_len = page.len();
        let key = QueryKey::Messages(conversation_id.to_string());
        let added = {
            let mut inner = self.write();
            let existing = inner.messages.get(conversation_id).cloned();
            let (next, added) = if offset == 0 {
                first_page(existing.as_deref(), page, fetched_len)
            } else {
                older_page(existing.as_deref(), offset, page, fetched_len)
            };
            inner.messages.insert(conversation_id.to_string(), Arc::new(next));
            inner.stale.remove(&key);
            added
        };
        self.emit(key, CacheEventKind::Updated);
        added
    }

    /// Inserts a locally created message before the server has confirmed it.
    pub fn insert_optimistic(&self, conversation_id: &str, message: Message) {
        {
            let mut inner = self.write();
            let next = match inner.messages.get(conversation_id) {
                Some(pages) => pages.with_inserted(message),
                None => MessagePages::single(message),
            };
            inner.messages.insert(conversation_id.to_string(), Arc::new(next));
        }
        self.emit(QueryKey::Messages(conversation_id.to_string()), CacheEventKind::Updated);
    }

    /// Swaps an optimistic placeholder for the server's copy of the message.
    ///
    /// If the socket echo already delivered the confirmed message, the placeholder is only
    /// removed.
    pub fn confirm_optimistic(&self, conversation_id: &str, placeholder_id: &str, confirmed: Message) {
        {
            let mut inner = self.write();
            let pages = inner.messages.get(conversation_id).cloned().unwrap_or_default();
            let without = match pages.locate(placeholder_id) {
                Some((page, pos)) => pages.with_removed(page, pos),
                None => (*pages).clone(),
            };
            let next = if without.contains(&confirmed.id) {
                without
            } else {
                without.with_inserted(confirmed)
            };
            inner.messages.insert(conversation_id.to_string(), Arc::new(next));
        }
        self.emit(QueryKey::Messages(conversation_id.to_string()), CacheEventKind::Updated);
    }

    /// Removes an optimistic placeholder after its send failed.
    pub fn discard_optimistic(&self, conversation_id: &str, placeholder_id: &str) -> bool {
        let removed = {
            let mut inner = self.write();
            let Some(pages) = inner.messages.get(conversation_id).cloned() else {
                return false;
            };
            match pages.locate(placeholder_id) {
                Some((page, pos)) => {
                    inner
                        .messages
                        .insert(conversation_id.to_string(), Arc::new(pages.with_removed(page, pos)));
                    true
                }
                None => false,
            }
        };
        if removed {
            self.emit(QueryKey::Messages(conversation_id.to_string()), CacheEventKind::Updated);
        }
        removed
    }

    /// Replaces a cached message with an edited copy from the REST API.
    pub fn replace_message(&self, conversation_id: &str, message: Message) -> bool {
        let replaced = {
            let mut inner = self.write();
            let Some(pages) = inner.messages.get(conversation_id).cloned() else {
                return false;
            };
            match pages.locate(&message.id) {
                Some((page, pos)) => {
                    inner.messages.insert(
                        conversation_id.to_string(),
                        Arc::new(pages.with_replaced(page, pos, message)),
                    );
                    true
                }
                None => false,
            }
        };
        if replaced {
            self.emit(QueryKey::Messages(conversation_id.to_string()), CacheEventKind::Updated);
        }
        replaced
    }
}

fn first_page(existing: Option<&MessagePages>, page: Vec<Message>, fetched_len: usize) -> (MessagePages, usize) {
    let fetched_ids: HashSet<&str> = page.iter().map(|m| m.id.as_str()).collect();
    let newest_fetched = page.iter().map(|m| m.created_at).max();

    let mut first: Vec<Message> = existing
        .map(|pages| {
            pages
                .iter()
                .filter(|m| !fetched_ids.contains(m.id.as_str()))
                .filter(|m| match newest_fetched {
                    Some(newest) => m.created_at > newest,
                    None => true,
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let mut seen: HashSet<String> = first.iter().map(|m| m.id.clone()).collect();
    let mut added = 0;
    for message in page {
        if seen.insert(message.id.clone()) {
            first.push(message);
            added += 1;
        }
    }

    let next = MessagePages {
        pages: vec![Arc::from(first)],
        meta: vec![PageMeta { offset: 0, fetched_len }],
        fetched: true,
    };
    (next, added)
}

fn older_page(
    existing: Option<&MessagePages>,
    offset: usize,
    page: Vec<Message>,
    fetched_len: usize,
) -> (MessagePages, usize) {
    let mut next = existing.cloned().unwrap_or_default();
    let fresh: Vec<Message> = {
        let mut known = next.ids().into_iter().map(str::to_owned).collect::<HashSet<_>>();
        page.into_iter().filter(|m| known.insert(m.id.clone())).collect()
    };
    let added = fresh.len();
    next.pages.push(Arc::from(fresh));
    next.meta.push(PageMeta { offset, fetched_len });
    next.fetched = true;
    (next, added)
}
