//! Internal utilities for garlic-proto.

pub(crate) mod err;
