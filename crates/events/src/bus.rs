//! Change publishing/subscription abstraction (mechanics only).
//!
//! The bus is the cross-tab channel: one tab publishes what it wrote to the
//! persisted store, every subscriber gets a copy.
//!
//! ## Delivery
//!
//! - **Broadcast**: each subscription receives every message published after it
//!   subscribed.
//! - **Per-subscriber ordering**: messages arrive in publish order.
//! - **No persistence**: the store is the source of truth; a tab that was not
//!   subscribed when a change happened reads the current value on hydration.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

/// A subscription to a change stream.
///
/// ## Usage Pattern
///
/// ```ignore
/// let mut subscription = bus.subscribe();
///
/// while let Some(change) = subscription.recv().await {
///     synchronizer.handle_storage_change(change).await;
/// }
/// // Bus dropped: stream closed.
/// ```
///
/// Subscriptions are meant for a single consumer task.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<M> {
        let mut out = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            out.push(message);
        }
        out
    }
}

/// Transport-agnostic pub/sub contract.
///
/// `Send + Sync` so one bus can be shared by every tab handle.
pub trait ChangeBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> ChangeBus<M> for Arc<B>
where
    B: ChangeBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
