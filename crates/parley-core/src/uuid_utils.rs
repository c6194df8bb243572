//! UUID v7 helpers for time-ordered message and session identifiers.
//!
//! Delivered messages and transport sessions carry UUIDv7 ids so that the
//! client can sort them by creation time without a separate timestamp.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Generate a new UUIDv7 in its hyphenated string form, as sent on the wire.
///
/// # Example
///
/// ```
/// use parley_core::uuid_utils::new_id;
///
/// let a = new_id();
/// let b = new_id();
/// assert_ne!(a, b);
/// ```
pub fn new_id() -> String {
    new_v7().to_string()
}
