//! Map from a circuit's stream IDs to the streams themselves.

use garlic_cell::relaycell::{msg::RelayMsg, StreamId};
use crate::{Error, Result};

use futures::channel::mpsc;
use rand::Rng;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// The entry for a single stream.
pub(super) enum StreamEnt {
    /// An open stream: cells may be sent and received.
    Open(mpsc::Sender<RelayMsg>),
    /// A stream that the reader has closed, or that has received an
    /// END message, and that should not be reused.
    ///
    /// Late cells for such a stream are dropped without error.
    Closed,
}

/// A map from stream IDs to stream entries.  Each circuit has one.
pub(super) struct StreamMap {
    /// Entries for every stream that the client has opened on this
    /// circuit, including closed ones.
    m: HashMap<StreamId, StreamEnt>,
}

impl StreamMap {
    /// Make a new empty StreamMap.
    pub(super) fn new() -> Self {
        StreamMap { m: HashMap::new() }
    }

    /// Add an entry to this map, using a randomly chosen nonzero
    /// stream ID; return the ID.
    pub(super) fn add_ent<R: Rng>(
        &mut self,
        rng: &mut R,
        sink: mpsc::Sender<RelayMsg>,
    ) -> Result<StreamId> {
        /// How many times to try before giving up.
        const MAX_ATTEMPTS: usize = 16;
        for _ in 0..MAX_ATTEMPTS {
            let id: StreamId = loop {
                let v: u16 = rng.gen();
                if v != 0 {
                    break v.into();
                }
            };
            if let Entry::Vacant(e) = self.m.entry(id) {
                e.insert(StreamEnt::Open(sink));
                return Ok(id);
            }
        }
        Err(Error::InternalError(
            "Too many streams; can't allocate an ID".into(),
        ))
    }

    /// Return the entry for `id` in this map, if any.
    pub(super) fn get_mut(&mut self, id: StreamId) -> Option<&mut StreamEnt> {
        self.m.get_mut(&id)
    }

    /// Mark the stream with `id` as closed; late messages for it will
    /// be dropped.
    ///
    /// Returns true if the stream was open until now.
    pub(super) fn mark_closed(&mut self, id: StreamId) -> bool {
        match self.m.insert(id, StreamEnt::Closed) {
            Some(StreamEnt::Open(_)) => true,
            _ => false,
        }
    }

    /// Drop every entry in the map, ending the streams' inbound
    /// queues.
    pub(super) fn clear(&mut self) {
        self.m.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ids_are_nonzero_and_distinct() {
        let mut map = StreamMap::new();
        let mut rng = rand::thread_rng();
        let mut ids = Vec::new();
        for _ in 0..32 {
            let (snd, _rcv) = mpsc::channel(2);
            let id = map.add_ent(&mut rng, snd).unwrap();
            assert!(!id.is_zero());
            ids.push(id);
        }
        ids.sort_by_key(|id| u16::from(*id));
        ids.dedup();
        assert_eq!(ids.len(), 32);
    }

    #[test]
    fn closed_streams_stay_closed() {
        let mut map = StreamMap::new();
        let mut rng = rand::thread_rng();
        let (snd, _rcv) = mpsc::channel(2);
        let id = map.add_ent(&mut rng, snd).unwrap();
        assert!(map.mark_closed(id));
        // Closing twice reports false.
        assert!(!map.mark_closed(id));
        assert!(matches!(map.get_mut(id), Some(StreamEnt::Closed)));
    }
}
