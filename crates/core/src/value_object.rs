//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attributes: two `Money`
/// amounts of 6300 cents are the same amount, while two orders with identical lines
/// are still different orders.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
