//! # Subscriber trait.
//!
//! `Subscribe` is the extension point for plugging event handlers into the
//! runtime. Each subscriber is driven by its own worker task fed by a bounded
//! queue owned by the [`SubscriberSet`](crate::subscribers::SubscriberSet).
//!
//! ## Contract
//! - Handlers may be slow (I/O, batching); they never block the event loop
//!   or other subscribers.
//! - On queue overflow the event is dropped for that subscriber and a
//!   `SubscriberOverflow` event is published.

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles a single event.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
