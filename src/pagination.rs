//! Offset-based infinite scroll over a conversation's message history.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::QueryCache;
use crate::errors::Result;
use crate::models::Message;
use crate::scroll::ScrollMetrics;

/// Messages requested per page.
pub const PAGE_SIZE: usize = 50;

/// Offset for the page after `last_page`, or `None` when the server has no more.
///
/// A page shorter than `page_size` ends the history; otherwise the next offset is the
/// number of messages fetched so far.
pub fn next_page_param<T, P: AsRef<[T]>>(
    last_page: &[T],
    all_pages: &[P],
    page_size: usize,
) -> Option<usize> {
    if last_page.len() < page_size {
        return None;
    }
    Some(all_pages.iter().map(|p| p.as_ref().len()).sum())
}

/// Flattens newest-first pages into an oldest-first list for chat-style rendering.
///
/// Later duplicates of an id are dropped before reversing.
pub fn flatten_for_display<P: AsRef<[Message]>>(pages: &[P]) -> Vec<Message> {
    let mut seen = HashSet::new();
    let mut flat: Vec<Message> = pages
        .iter()
        .flat_map(|p| p.as_ref().iter())
        .filter(|m| seen.insert(m.id.as_str()))
        .cloned()
        .collect();
    flat.reverse();
    flat
}

/// Whether reaching `scroll_top` should load the next older page.
pub fn should_fetch_older(scroll_top: f64, has_next_page: bool, is_fetching: bool) -> bool {
    scroll_top == 0.0 && has_next_page && !is_fetching
}

/// Where history pages come from.
pub trait MessageSource: Send + Sync {
    fn fetch_page(
        &self,
        conversation_id: &str,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>>> + Send;
}

impl<S: MessageSource> MessageSource for Arc<S> {
    fn fetch_page(
        &self,
        conversation_id: &str,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>>> + Send {
        (**self).fetch_page(conversation_id, offset, limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A page was fetched and stored.
    Fetched { offset: usize, received: usize, added: usize },
    /// Another fetch for this history is still running.
    AlreadyFetching,
    /// The server already returned its last page.
    Exhausted,
}

/// Clears the in-flight flag on every exit path.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Infinite query over one conversation's history, writing through the shared cache.
pub struct MessageHistory<S> {
    source: S,
    cache: Arc<QueryCache>,
    conversation_id: String,
    page_size: usize,
    in_flight: AtomicBool,
}

impl<S: MessageSource> MessageHistory<S> {
    pub fn new(source: S, cache: Arc<QueryCache>, conversation_id: impl Into<String>, page_size: usize) -> Self {
        Self {
            source,
            cache,
            conversation_id: conversation_id.into(),
            page_size: page_size.max(1),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn has_next_page(&self) -> bool {
        self.next_offset().is_some()
    }

    fn next_offset(&self) -> Option<usize> {
        match self.cache.messages(&self.conversation_id) {
            Some(pages) => pages.next_page_param(self.page_size),
            None => Some(0),
        }
    }

    /// Loads (or reloads) the newest page.
    pub async fn fetch_initial(&self) -> Result<FetchOutcome> {
        self.fetch_at(Some(0)).await
    }

    /// Loads the next older page, if any.
    pub async fn fetch_next_page(&self) -> Result<FetchOutcome> {
        self.fetch_at(None).await
    }

    async fn fetch_at(&self, offset: Option<usize>) -> Result<FetchOutcome> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!(conversation_id = %self.conversation_id, "page fetch already in flight");
            return Ok(FetchOutcome::AlreadyFetching);
        }
        let _guard = InFlight(&self.in_flight);

        let Some(offset) = offset.or_else(|| self.next_offset()) else {
            return Ok(FetchOutcome::Exhausted);
        };

        let page = self
            .source
            .fetch_page(&self.conversation_id, offset, self.page_size)
            .await?;
        let received = page.len();
        let added = self.cache.store_page(&self.conversation_id, offset, page);
        info!(
            conversation_id = %self.conversation_id,
            offset,
            received,
            added,
            "fetched message page"
        );
        Ok(FetchOutcome::Fetched { offset, received, added })
    }

    /// Loads an older page when the list was scrolled to the very top.
    pub async fn on_scroll(&self, metrics: &ScrollMetrics) -> Result<Option<FetchOutcome>> {
        if !should_fetch_older(metrics.scroll_top, self.has_next_page(), self.is_fetching()) {
            return Ok(None);
        }
        self.fetch_next_page().await.map(Some)
    }

    /// Cached history, oldest first.
    pub fn display(&self) -> Vec<Message> {
        self.cache
            .messages(&self.conversation_id)
            .map(|pages| pages.flatten_for_display())
            .unwrap_or_default()
    }
}
