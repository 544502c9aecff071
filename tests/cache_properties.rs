//! Property-based tests for the message cache and pagination.
//!
//! Socket deliveries may repeat and arrive out of order; REST pages may be any size.
//! The cache must stay de-duplicated and chronologically renderable through all of it.

use std::collections::HashSet;

use attendwise_realtime::models::{Message, MessageType};
use attendwise_realtime::{MergeOutcome, QueryCache, QueryKey};
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

fn message(id: u32, second: i64, sender: &str) -> Message {
    Message {
        id: format!("m{id}"),
        conversation_id: "c1".into(),
        sender_id: sender.into(),
        content: format!("body {id}"),
        message_type: MessageType::Text,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(second),
        updated_at: None,
        is_edited: false,
        edited_at: None,
        is_deleted: false,
        deleted_at: None,
        author: None,
    }
}

/// A socket delivery: message id, timestamp, sent by the current user.
fn delivery_strategy() -> impl Strategy<Value = (u32, i64, bool)> {
    (0u32..25, 0i64..10_000, any::<bool>())
}

/// Newest-first page of a server history holding `total` messages.
fn server_page(total: usize, offset: usize, limit: usize) -> Vec<Message> {
    (offset..total.min(offset + limit))
        .map(|i| {
            let n = (total - 1 - i) as u32;
            message(n, n as i64, "u2")
        })
        .collect()
}

proptest! {
    /// Every id is stored once, however often it is delivered.
    #[test]
    fn prop_merge_is_idempotent(deliveries in prop::collection::vec(delivery_strategy(), 1..60)) {
        let cache = QueryCache::new();
        let mut delivered = HashSet::new();

        for (id, _, own) in &deliveries {
            let sender = if *own { "me" } else { "u2" };
            let first_seen = delivered.insert(*id);
            let msg = message(*id, *id as i64 * 7, sender);
            let outcome = cache.merge_new_message("c1", msg, "me");
            prop_assert_eq!(outcome == MergeOutcome::Duplicate, !first_seen);
        }

        let pages = cache.messages("c1").unwrap();
        prop_assert_eq!(pages.len(), delivered.len());

        let (id, _, _) = deliveries[0];
        let again = cache.merge_new_message("c1", message(id, id as i64 * 7, "u2"), "me");
        prop_assert_eq!(again, MergeOutcome::Duplicate);
        prop_assert_eq!(cache.messages("c1").unwrap().len(), delivered.len());
    }

    /// Flatten-and-reverse yields non-decreasing timestamps for any delivery order.
    #[test]
    fn prop_display_is_chronological(deliveries in prop::collection::vec(delivery_strategy(), 1..60)) {
        let cache = QueryCache::new();
        for (i, (_, second, _)) in deliveries.iter().enumerate() {
            cache.merge_new_message("c1", message(i as u32, *second, "u2"), "me");
        }
        let shown = cache.messages("c1").unwrap().flatten_for_display();
        prop_assert_eq!(shown.len(), deliveries.len());
        prop_assert!(shown.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    /// Paging through any history stops after at most `ceil(total / size) + 1` fetches
    /// and shows every message exactly once, oldest first.
    #[test]
    fn prop_pagination_terminates(total in 0usize..300, page_size in 1usize..60) {
        let cache = QueryCache::new();
        let max_fetches = total.div_ceil(page_size) + 1;
        let mut fetches = 0;

        let mut offset = Some(0);
        while let Some(at) = offset {
            prop_assert!(fetches < max_fetches, "fetch #{} exceeds bound {}", fetches + 1, max_fetches);
            cache.store_page("c1", at, server_page(total, at, page_size));
            fetches += 1;
            offset = cache.messages("c1").unwrap().next_page_param(page_size);
        }

        let shown = cache.messages("c1").unwrap().flatten_for_display();
        prop_assert_eq!(shown.len(), total);
        let ids_in_order = shown.iter().enumerate().all(|(i, m)| m.id == format!("m{i}"));
        prop_assert!(ids_in_order);
    }

    /// Only messages from other users mark the conversation list stale.
    #[test]
    fn prop_invalidation_follows_sender(own in prop::collection::vec(any::<bool>(), 1..20)) {
        let cache = QueryCache::new();
        for (i, from_self) in own.iter().enumerate() {
            let sender = if *from_self { "me" } else { "u2" };
            cache.merge_new_message("c1", message(i as u32, i as i64, sender), "me");
        }
        prop_assert_eq!(
            cache.is_stale(&QueryKey::Conversations),
            own.iter().any(|from_self| !from_self)
        );
    }
}
