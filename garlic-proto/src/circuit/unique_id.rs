//! Process-unique identifiers for circuits, used in logging.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Process-unique identifier for a circuit.
///
/// This is used for logging only; circuit IDs on the wire are
/// allocated per-channel elsewhere.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct UniqId(usize);

impl UniqId {
    /// Construct a new UniqId.
    pub(crate) fn new() -> Self {
        /// The next identifier to hand out.
        static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
        UniqId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for UniqId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Circ {}", self.0)
    }
}
