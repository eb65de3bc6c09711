//! Map from circuit IDs to circuits, for use by a channel.

use crate::circuit::celltypes::{ClientCircChanMsg, CreateResponse};
use crate::{Error, Result};
use garlic_cell::chancell::CircId;

use futures::channel::{mpsc, oneshot};
use rand::Rng;
use std::collections::HashMap;

/// An entry in the circuit map.
pub(crate) enum CircEnt {
    /// A circuit that has not yet received a CREATED2 cell.
    ///
    /// The sender in this entry is used to deliver the CREATED2 (or
    /// DESTROY) cell; the second is kept to deliver relay cells once
    /// the circuit is open.
    Opening(
        oneshot::Sender<CreateResponse>,
        mpsc::Sender<ClientCircChanMsg>,
    ),
    /// An open circuit that can receive relay cells.
    Open(mpsc::Sender<ClientCircChanMsg>),
}

/// A map from circuit IDs to circuit entries.  Each channel has one.
pub(crate) struct CircMap {
    /// The circuits on this channel.
    m: HashMap<CircId, CircEnt>,
}

impl CircMap {
    /// Make a new empty CircMap.
    pub(crate) fn new() -> Self {
        CircMap { m: HashMap::new() }
    }

    /// Add a new pending circuit with a randomly chosen nonzero
    /// circuit ID, and return that ID.
    ///
    /// Client-allocated circuit IDs always have their high bit set.
    pub(crate) fn add_ent<R: Rng>(
        &mut self,
        rng: &mut R,
        createdsink: oneshot::Sender<CreateResponse>,
        sink: mpsc::Sender<ClientCircChanMsg>,
    ) -> Result<CircId> {
        /// How many times to try before giving up.
        const MAX_ATTEMPTS: usize = 16;
        for _ in 0..MAX_ATTEMPTS {
            let id: CircId = (rng.gen::<u32>() | 0x8000_0000).into();
            if let std::collections::hash_map::Entry::Vacant(e) = self.m.entry(id) {
                e.insert(CircEnt::Opening(createdsink, sink));
                return Ok(id);
            }
        }
        Err(Error::InternalError(
            "Exhausted the circuit ID space?".into(),
        ))
    }

    /// Return the entry for `id` in this map, if any.
    pub(crate) fn get_mut(&mut self, id: CircId) -> Option<&mut CircEnt> {
        self.m.get_mut(&id)
    }

    /// If the circuit `id` is opening, convert it to open and return
    /// the sender on which its CREATED2 cell should be delivered.
    pub(crate) fn advance_from_opening(
        &mut self,
        id: CircId,
    ) -> Option<oneshot::Sender<CreateResponse>> {
        match self.m.remove(&id) {
            Some(CircEnt::Opening(created, sink)) => {
                self.m.insert(id, CircEnt::Open(sink));
                Some(created)
            }
            Some(other) => {
                // Put it back; it wasn't ours to take.
                self.m.insert(id, other);
                None
            }
            None => None,
        }
    }

    /// Remove the entry for `id` from this map, returning it.
    pub(crate) fn remove(&mut self, id: CircId) -> Option<CircEnt> {
        self.m.remove(&id)
    }

    /// Remove every entry from this map.
    pub(crate) fn clear(&mut self) {
        self.m.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn client_ids_have_high_bit() {
        let mut map = CircMap::new();
        let mut rng = rand::thread_rng();
        for _ in 0..16 {
            let (snd, _rcv) = oneshot::channel();
            let (msnd, _mrcv) = mpsc::channel(4);
            let id = map.add_ent(&mut rng, snd, msnd).unwrap();
            assert!(u32::from(id) & 0x8000_0000 != 0);
        }
    }

    #[test]
    fn advance() {
        let mut map = CircMap::new();
        let mut rng = rand::thread_rng();
        let (snd, _rcv) = oneshot::channel();
        let (msnd, _mrcv) = mpsc::channel(4);
        let id = map.add_ent(&mut rng, snd, msnd).unwrap();

        assert!(map.advance_from_opening(id).is_some());
        // Now it's open; advancing again yields nothing.
        assert!(map.advance_from_opening(id).is_none());
        assert!(matches!(map.get_mut(id), Some(CircEnt::Open(_))));
    }
}
