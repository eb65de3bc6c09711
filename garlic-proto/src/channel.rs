//! Talking directly (over a TLS connection) to an onion router.
//!
//! To get a channel, establish TLS with [`tls_connect`], call
//! [`start_client_handshake`] on the stream, drive the handshake to
//! completion, and spawn the returned reactor.  Each channel carries
//! the single circuit that created it; the reactor routes inbound
//! cells to that circuit.
//!
//! The TLS certificate chain is intentionally not verified: the
//! relays we talk to are authenticated (where it matters) by the ntor
//! handshakes run over the channel, and this client does not aim for
//! the reference implementation's full anonymity properties.

pub(crate) mod circmap;
mod codec;
mod handshake;
mod reactor;

use crate::circuit::celltypes::CreateResponse;
use crate::circuit::{self, PendingClientCirc};
use crate::{Error, Result};
use garlic_cell::chancell::msg::{ChanMsg, Destroy, DestroyReason};
use garlic_cell::chancell::{ChanCell, CircId};

use futures::channel::{mpsc, oneshot};
use futures::lock::Mutex;
use futures::sink::{Sink, SinkExt};

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::trace;

pub use handshake::{
    start_client_handshake, tls_connect, NegotiatedChannel, OutboundClientHandshake,
};
pub use reactor::Reactor;

/// A boxed sink on which we can write cells, backed by the TLS
/// connection.
type CellSink = Pin<Box<dyn Sink<ChanCell, Error = Error> + Send + 'static>>;

/// How many queued inbound cells a circuit can have before the
/// channel reactor stops reading from the network.
const CIRC_QUEUE_LEN: usize = 128;

/// An open client channel, ready to send and receive cells.
///
/// A channel is a direct connection to an onion router, implemented
/// using TLS.
pub struct Channel {
    /// The negotiated link protocol.
    link_protocol: u16,
    /// The sink on which we write cells.
    ///
    /// This uses a separate lock from the circuit map, since we need
    /// it all the time and the circuit map only during setup and
    /// teardown.
    sink: Mutex<CellSink>,
    /// A map from circuit ID to the circuit(s) using this channel.
    circmap: Arc<Mutex<circmap::CircMap>>,
    /// A sender used to tell the reactor to shut down.
    sendclosed: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    /// Set when this channel can no longer be used.
    closed: AtomicBool,
}

impl Channel {
    /// Construct a channel and its reactor from the parts of a
    /// finished handshake.
    pub(crate) fn new<T>(link_protocol: u16, sink: CellSink, stream: T) -> (Arc<Self>, Reactor<T>)
    where
        T: futures::Stream<Item = Result<ChanCell>> + Unpin + Send + 'static,
    {
        let circmap = Arc::new(Mutex::new(circmap::CircMap::new()));
        let (sendclosed, recvclosed) = oneshot::channel();

        let channel = Arc::new(Channel {
            link_protocol,
            sink: Mutex::new(sink),
            circmap: Arc::clone(&circmap),
            sendclosed: std::sync::Mutex::new(Some(sendclosed)),
            closed: AtomicBool::new(false),
        });
        let reactor = Reactor::new(&channel, circmap, recvclosed, stream);
        (channel, reactor)
    }

    /// Return the negotiated link protocol for this channel.
    pub fn link_protocol(&self) -> u16 {
        self.link_protocol
    }

    /// Return true if this channel can no longer be used.
    pub fn is_closing(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Check whether a cell type is acceptable on an open client
    /// channel before sending it.
    fn check_cell(&self, cell: &ChanCell) -> Result<()> {
        use ChanMsg::*;
        let msg = cell.msg();
        match msg {
            Created2(_) => Err(Error::ChanProto(format!(
                "Can't send {} cell on client channel",
                msg.cmd()
            ))),
            Certs(_) | Versions(_) | AuthChallenge(_) | Netinfo(_) => Err(Error::ChanProto(
                format!("Can't send {} cell after handshake is done", msg.cmd()),
            )),
            _ => Ok(()),
        }
    }

    /// Transmit a single cell on this channel.
    pub async fn send_cell(&self, cell: ChanCell) -> Result<()> {
        if self.is_closing() {
            return Err(Error::ChannelClosed);
        }
        self.check_cell(&cell)?;
        trace!("sending {} for {}", cell.msg().cmd(), cell.circid());
        let mut sink = self.sink.lock().await;
        sink.send(cell).await?;
        Ok(())
    }

    /// Allocate a circuit ID and return a new circuit that will live
    /// on this channel, along with the reactor that will drive it.
    ///
    /// The circuit is not usable until the caller completes the
    /// CREATE2 handshake with
    /// [`PendingClientCirc::create_firsthop_ntor`].
    pub async fn new_circ<R>(
        self: &Arc<Self>,
        rng: &mut R,
    ) -> Result<(PendingClientCirc, circuit::Reactor)>
    where
        R: rand::Rng,
    {
        if self.is_closing() {
            return Err(Error::ChannelClosed);
        }
        let (createdsend, createdrecv) = oneshot::channel::<CreateResponse>();
        let (circsend, circrecv) = mpsc::channel(CIRC_QUEUE_LEN);
        let id = {
            let mut map = self.circmap.lock().await;
            map.add_ent(rng, createdsend, circsend)?
        };
        trace!("allocated circuit id {}", id);
        Ok(PendingClientCirc::new(
            id,
            Arc::clone(self),
            createdrecv,
            circrecv,
        ))
    }

    /// Called when a circuit has gone away: send a DESTROY cell for
    /// it and forget it.
    pub(crate) async fn close_circuit(&self, id: CircId) {
        {
            let mut map = self.circmap.lock().await;
            map.remove(id);
        }
        let destroy = ChanCell::new(id, Destroy::new(DestroyReason::NONE).into());
        let _ = self.send_cell(destroy).await;
    }

    /// Shut down this channel: no more cells can be sent, the reactor
    /// stops, and the underlying socket is closed.
    ///
    /// This is idempotent and safe to call more than once.
    pub async fn terminate(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let sender = self
            .sendclosed
            .lock()
            .expect("channel close lock poisoned")
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
    }

    /// Note that the reactor has stopped, so the channel is unusable.
    ///
    /// Dropping the circuit map entries ends the per-circuit inbound
    /// queues, which is how the circuit reactors learn that the link
    /// is gone.
    pub(crate) async fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut map = self.circmap.lock().await;
        map.clear();
    }
}
