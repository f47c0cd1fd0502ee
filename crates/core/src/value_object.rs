//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. A
/// business unit's configuration is one: two configs with the same currency and
/// formats are interchangeable, whichever unit they came from.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
