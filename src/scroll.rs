//! Scroll-position bookkeeping for the message list.
//!
//! The list renders oldest at the top. Loading an older page grows the content above the
//! viewport, so the offset has to move by exactly the added height to keep the same
//! messages on screen. New messages at the bottom instead stick the view to the latest
//! message when the reader was already near the bottom or sent the message themselves.

/// Distance from the bottom, in pixels, that still counts as "at the latest message".
pub const NEAR_BOTTOM_THRESHOLD: f64 = 100.0;

/// Geometry of the scroll container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    pub fn distance_from_bottom(&self) -> f64 {
        self.scroll_height - self.scroll_top - self.client_height
    }

    pub fn is_near_bottom(&self, threshold: f64) -> bool {
        self.distance_from_bottom() < threshold
    }

    pub fn is_at_top(&self) -> bool {
        self.scroll_top == 0.0
    }

    /// Largest reachable `scroll_top`.
    pub fn bottom(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }
}

/// Position captured before older content is inserted above the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    scroll_top: f64,
    scroll_height: f64,
}

impl ScrollAnchor {
    pub fn capture(metrics: &ScrollMetrics) -> Self {
        Self { scroll_top: metrics.scroll_top, scroll_height: metrics.scroll_height }
    }

    /// `scroll_top` that keeps the previously visible content in place.
    pub fn restore(&self, new_scroll_height: f64) -> f64 {
        self.scroll_top + (new_scroll_height - self.scroll_height)
    }
}

/// What the view should do after its content changed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollUpdate {
    /// Jump to the newest message.
    StickToBottom { scroll_top: f64 },
    /// Leave the reader where they are.
    Keep,
}

/// Decides the scroll position after messages were appended at the bottom.
///
/// `before` is the geometry before the render, `new_scroll_height` the content height after.
pub fn after_new_messages(
    before: &ScrollMetrics,
    new_scroll_height: f64,
    from_self: bool,
    threshold: f64,
) -> ScrollUpdate {
    if from_self || before.is_near_bottom(threshold) {
        let after = ScrollMetrics { scroll_height: new_scroll_height, ..*before };
        ScrollUpdate::StickToBottom { scroll_top: after.bottom() }
    } else {
        ScrollUpdate::Keep
    }
}

/// Position for the first render of a conversation.
pub fn initial_position(metrics: &ScrollMetrics) -> f64 {
    metrics.bottom()
}
