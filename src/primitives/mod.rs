//! Low-level primitives shared by the cache and store layers.

/// Byte-level utilities: varints, ZigZag integers, order-preserving keys.
pub mod bytes;
