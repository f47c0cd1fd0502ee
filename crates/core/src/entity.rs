//! Records that keep their identity while their attributes change.
//!
//! A business unit is the main example: its name, department or config may
//! differ between two profile fetches, but the same `id` is the same tenant.

pub trait Entity {
    /// Identifier that decides whether two records are the same entity.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
