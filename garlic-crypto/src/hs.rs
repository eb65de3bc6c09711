//! Mid-level derivations used in the onion-service protocol.
//!
//! These sit between the raw primitives in [`crate::d`] and the
//! directory logic in `garlic-netstatus`: subcredentials, the MAC
//! used throughout rend-spec-v3, hash-ring indices, and the
//! time-period arithmetic that drives key blinding.

pub mod ops;
pub mod time;
