//! Storage-change notifications shared between client tabs.
//!
//! A tab that writes to the persisted store publishes a [`StorageChange`] on a
//! [`ChangeBus`]; every other tab receives it on its own [`Subscription`].

pub mod bus;
pub mod envelope;
pub mod in_memory_bus;

pub use bus::{ChangeBus, Subscription};
pub use envelope::StorageChange;
pub use in_memory_bus::{InMemoryBusError, InMemoryChangeBus};
