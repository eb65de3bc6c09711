//! Multi-hop paths over the onion-routing network.
//!
//! A client circuit is constructed by this client and used on its own
//! behalf to send data through the network.  It has multiple hops:
//! each hop knows only the hop before and the hop after, and the
//! client shares a separate set of keys with each hop.
//!
//! To build a circuit, first create a [`crate::channel::Channel`],
//! then call its `new_circ` method.  This yields a
//! [`PendingClientCirc`] that won't become live until you call
//! [`PendingClientCirc::create_firsthop_ntor`].  After that, you can
//! call [`ClientCirc::extend_ntor`] to build the circuit into a
//! multi-hop circuit, and [`ClientCirc::begin_stream`] to get an
//! anonymized data stream.
//!
//! # Implementation
//!
//! Each open circuit has a corresponding [`Reactor`] object that runs
//! in an asynchronous task, and manages incoming cells from the
//! circuit's channel.  Cells are either RELAY cells destined for a
//! particular stream, "meta" cells (like EXTENDED2) that are only
//! accepted if something is waiting for them, or DESTROY cells, which
//! are handled immediately.

pub(crate) mod celltypes;
mod reactor;
pub(crate) mod sendme;
mod streammap;
mod unique_id;

use crate::channel::Channel;
use crate::circuit::celltypes::*;
use crate::circuit::reactor::{CtrlMsg, CtrlResult};
use crate::crypto::cell::{
    ClientLayer, CryptInit, HopNum, InboundClientCrypt, InboundClientLayer, OutboundClientCrypt,
    OutboundClientLayer, RelayCellBody, Tor1RelayCrypto,
};
use crate::crypto::handshake::{ClientHandshake, KeyGenerator};
use crate::stream::{DataStream, RawCellStream};
use crate::{Error, Result};
use garlic_cell::chancell::{self, msg::ChanMsg, ChanCell, CircId};
use garlic_cell::linkspec::CircTarget;
use garlic_cell::relaycell::msg::{Begin, RelayMsg};
use garlic_cell::relaycell::{RelayCell, RelayCmd, StreamId};

pub use reactor::Reactor;
pub use unique_id::UniqId;

use futures::channel::{mpsc, oneshot};
use futures::lock::Mutex;
use futures::sink::SinkExt;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::{thread_rng, CryptoRng, Rng};

use tracing::{debug, trace};

/// Initial value for the delivery window on a whole circuit.
pub(crate) const CIRCWINDOW_INIT: u16 = 1000;
/// Initial value for the delivery window on a single stream.
pub(crate) const STREAMWINDOW_INIT: u16 = 500;

/// A circuit that we have constructed over the onion-routing network.
pub struct ClientCirc {
    /// This circuit can't be used because it has been closed, locally
    /// or remotely.
    closed: AtomicBool,
    /// A unique identifier for this circuit, for logging.
    unique_id: UniqId,
    /// Reference-counted locked reference to the inner circuit state.
    c: Mutex<ClientCircImpl>,
}

impl std::fmt::Debug for ClientCirc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCirc")
            .field("unique_id", &self.unique_id)
            .field("closed", &self.closed)
            .finish()
    }
}

/// A ClientCirc that needs to send a CREATE2 cell and receive a
/// CREATED2 cell.
pub struct PendingClientCirc {
    /// A oneshot receiver on which we'll receive a CREATED2 cell, or
    /// a DESTROY cell.
    recvcreated: oneshot::Receiver<CreateResponse>,
    /// The ClientCirc object that we can expose on success.
    circ: Arc<ClientCirc>,
}

/// A result type used to tell a circuit about some "meta-cell" (like
/// EXTENDED2 or RENDEZVOUS2).
pub(crate) type MetaResult = Result<RelayMsg>;

/// The implementation type for this circuit.
struct ClientCircImpl {
    /// This circuit's ID on its channel.
    id: CircId,
    /// The channel that this circuit uses to send its cells.
    channel: Arc<Channel>,
    /// The cryptographic state for this circuit for outbound cells,
    /// divided into layers, one per hop.
    crypto_out: OutboundClientCrypt,
    /// The cryptographic state for this circuit for inbound cells.
    crypto_in: InboundClientCrypt,
    /// Per-hop circuit information, ordered from the closest hop
    /// outward.
    ///
    /// Note that hops.len() must be the same as
    /// crypto_out.n_layers().
    hops: Vec<CircHop>,
    /// A sender that can be used to register control messages with
    /// the reactor.
    control: mpsc::Sender<CtrlResult>,
    /// A oneshot sender that can be used to tell the reactor to shut
    /// down.
    sendshutdown: Option<oneshot::Sender<CtrlMsg>>,
    /// A oneshot sender used by the reactor to report a meta-cell to
    /// an owning task.
    ///
    /// This comes along with a hop number saying which hop we expect
    /// a meta-cell from.  Cells from other hops are an error.
    sendmeta: Option<(HopNum, oneshot::Sender<MetaResult>)>,
    /// An identifier for this circuit, for logging purposes.
    unique_id: UniqId,
}

/// A handle to a circuit as held by a stream, used to send cells.
///
/// When this object is dropped, the reactor will be told to close the
/// stream.
pub(crate) struct StreamTarget {
    /// The stream ID for this stream on its circuit.
    stream_id: StreamId,
    /// Which hop on this circuit this stream is built from.
    hop: HopNum,
    /// Reference to the circuit that this stream is on.
    circ: Arc<ClientCirc>,
    /// One-shot sender that gets a message once this stream is
    /// dropped.
    stream_closed: Option<oneshot::Sender<CtrlMsg>>,
    /// Window to track incoming cells on this stream and decide when
    /// to acknowledge them.
    pub(crate) recvwindow: sendme::StreamRecvWindow,
}

/// Information about a single hop of a client circuit.
struct CircHop {
    /// Map from stream IDs to streams built to this hop.
    map: streammap::StreamMap,
    /// Delivery window for cells arriving from this hop.
    recvwindow: sendme::CircRecvWindow,
}

impl CircHop {
    /// Construct a new hop record.
    fn new() -> Self {
        CircHop {
            map: streammap::StreamMap::new(),
            recvwindow: sendme::RecvWindow::new(CIRCWINDOW_INIT),
        }
    }
}

impl ClientCirc {
    /// Helper: extend the circuit by one hop.
    ///
    /// The `handshake_id` is the numeric identifier for what kind of
    /// handshake we're doing, `key` is the relay's onion key, and
    /// `linkspecs` tell the current last hop which relay to connect
    /// to.
    async fn extend_impl<R, L, FWD, REV, H>(
        &self,
        rng: &mut R,
        handshake_id: u16,
        key: &H::KeyType,
        linkspecs: Vec<garlic_cell::linkspec::LinkSpec>,
    ) -> Result<()>
    where
        R: Rng + CryptoRng,
        L: CryptInit + ClientLayer<FWD, REV>,
        FWD: OutboundClientLayer + 'static + Send,
        REV: InboundClientLayer + 'static + Send,
        H: ClientHandshake,
        H::KeyGen: KeyGenerator,
    {
        use garlic_cell::relaycell::msg::{Body, Extend2};
        // Perform the first part of the cryptographic handshake.
        let (state, msg) = H::client1(rng, key)?;
        let extend_msg = Extend2::new(linkspecs, handshake_id, msg);
        let cell = RelayCell::new(0.into(), extend_msg.as_message());

        // Send the EXTEND2 cell to the last hop...
        let (unique_id, receiver) = {
            let mut c = self.c.lock().await;
            let n_hops = c.crypto_out.n_layers();
            let hop = ((n_hops - 1) as u8).into();
            // Only the first extension may use the limited supply of
            // RELAY_EARLY cells.
            let early = n_hops <= 1;
            debug!("{}: extending circuit to hop {}", c.unique_id, n_hops + 1);

            // We'll be waiting for an EXTENDED2 cell; install the
            // handler before sending.
            let receiver = c.register_meta_handler(hop)?;
            c.send_relay_cell(hop, early, cell).await?;
            (c.unique_id, receiver)
            // We drop the lock here, since we're going to wait.
        };

        trace!("{}: waiting for EXTENDED2 cell", unique_id);
        let msg = match receiver.await {
            Ok(Ok(m)) => Ok(m),
            Err(_) => Err(Error::CircuitClosed),
            Ok(Err(e)) => Err(e),
        }?;

        let msg = match msg {
            RelayMsg::Extended2(e) => e,
            m => {
                self.protocol_error().await;
                return Err(Error::CircProto(format!(
                    "wanted EXTENDED2; got {}",
                    m.cmd(),
                )));
            }
        };
        let relay_handshake = msg.into_body();

        trace!("{}: received EXTENDED2; completing handshake", unique_id);
        // Now perform the second part of the handshake, and see if it
        // succeeded.
        let keygen = H::client2(state, relay_handshake)?;
        let layer = L::construct(keygen)?;

        debug!("{}: handshake complete; circuit extended", unique_id);

        let (layer_fwd, layer_back) = layer.split();
        self.add_hop(Box::new(layer_fwd), Box::new(layer_back))
            .await
    }

    /// Add a hop to the end of this circuit.
    pub(crate) async fn add_hop(
        &self,
        fwd: Box<dyn OutboundClientLayer + 'static + Send>,
        rev: Box<dyn InboundClientLayer + 'static + Send>,
    ) -> Result<()> {
        let mut c = self.c.lock().await;
        c.hops.push(CircHop::new());
        c.crypto_out.add_layer(fwd);
        c.crypto_in.add_layer(rev);
        Ok(())
    }

    /// Extend the circuit via the ntor handshake to a new target last
    /// hop.
    pub async fn extend_ntor<R, Tg>(&self, rng: &mut R, target: &Tg) -> Result<()>
    where
        R: Rng + CryptoRng,
        Tg: CircTarget,
    {
        use crate::crypto::handshake::ntor::{NtorClient, NtorPublicKey};
        let key = NtorPublicKey {
            id: *target.rsa_identity(),
            pk: *target.ntor_onion_key(),
        };
        let linkspecs = target.linkspecs();
        self.extend_impl::<R, Tor1RelayCrypto, _, _, NtorClient>(rng, 0x0002, &key, linkspecs)
            .await
    }

    /// Helper, used to begin a stream.
    ///
    /// This function allocates a stream ID and sends the message
    /// (like a BEGIN or BEGIN_DIR), but doesn't wait for a response.
    async fn begin_stream_impl(self: &Arc<Self>, begin_msg: RelayMsg) -> Result<RawCellStream> {
        // Streams always run to the last hop of the circuit.
        let (sender, receiver) = mpsc::channel(128);
        let (send_close, recv_close) = oneshot::channel::<CtrlMsg>();

        let (hopnum, id) = {
            let mut c = self.c.lock().await;
            if c.hops.is_empty() {
                return Err(Error::NoSuchHop);
            }
            let h = c.hops.len() - 1;
            let hopnum: HopNum = (h as u8).into();
            let id = c.hops[h].map.add_ent(&mut thread_rng(), sender)?;
            let relaycell = RelayCell::new(id, begin_msg);
            c.send_relay_cell(hopnum, false, relaycell).await?;
            c.control
                .send(Ok(CtrlMsg::Register(recv_close)))
                .await
                .map_err(|_| Error::CircuitClosed)?;
            (hopnum, id)
        };

        let target = StreamTarget {
            circ: Arc::clone(self),
            stream_id: id,
            hop: hopnum,
            recvwindow: sendme::RecvWindow::new(STREAMWINDOW_INIT),
            stream_closed: Some(send_close),
        };

        Ok(RawCellStream::new(target, receiver))
    }

    /// Start a stream to the given address and port, using a BEGIN
    /// message.
    ///
    /// The use of a string for the address is intentional: the remote
    /// relay (or the onion service) does the name resolution.
    ///
    /// This waits for the relay's CONNECTED response.
    pub async fn begin_stream(self: &Arc<Self>, target: &str, port: u16) -> Result<DataStream> {
        let beginmsg = Begin::new(target, port, 0)?;
        let stream = self.begin_stream_impl(beginmsg.into()).await?;
        let response = stream.recv().await?;
        match response {
            RelayMsg::Connected(_) => Ok(DataStream::new(stream)),
            RelayMsg::End(cell) => Err(Error::EndReceived(cell.reason())),
            m => {
                self.protocol_error().await;
                Err(Error::StreamProto(format!(
                    "Received {} while waiting for connection",
                    m.cmd()
                )))
            }
        }
    }

    /// Start a new stream to the last relay in the circuit, using a
    /// BEGIN_DIR message.
    ///
    /// Directory streams are considered open as soon as they are
    /// requested; any CONNECTED response is absorbed by the reader.
    pub async fn begin_dir_stream(self: &Arc<Self>) -> Result<DataStream> {
        let stream = self.begin_stream_impl(RelayMsg::BeginDir).await?;
        Ok(DataStream::new(stream))
    }

    /// Helper: encode the relay cell `cell`, encrypt it, and send it
    /// to the 'hop'th hop.
    ///
    /// Does not check whether the cell is well-formed or reasonable.
    pub(crate) async fn send_relay_cell(
        &self,
        hop: HopNum,
        early: bool,
        cell: RelayCell,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::CircuitClosed);
        }
        let mut c = self.c.lock().await;
        c.send_relay_cell(hop, early, cell).await
    }

    /// Shut down this circuit immediately, along with all streams
    /// that are using it, and close the underlying channel.
    ///
    /// Note that other references to this circuit may exist; if they
    /// do, they will stop working after you call this function.
    pub async fn terminate(&self) {
        let outcome =
            self.closed
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst);
        if outcome == Ok(false) {
            // The old value was false and the new value is true.
            let mut c = self.c.lock().await;
            c.shutdown_reactor();
            // Politely tell the relay before dropping the link.
            c.channel.close_circuit(c.id).await;
            c.channel.terminate().await;
        }
    }

    /// Called when a circuit-level protocol error has occurred and
    /// the circuit needs to shut down.
    pub(crate) async fn protocol_error(&self) {
        self.terminate().await;
    }

    /// Return true if this circuit is closed and therefore unusable.
    pub fn is_closing(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Return a process-unique identifier for this circuit.
    pub fn unique_id(&self) -> UniqId {
        self.unique_id
    }

    /// Return the number of hops on this circuit.
    pub async fn n_hops(&self) -> usize {
        let c = self.c.lock().await;
        c.crypto_out.n_layers()
    }

    /// Helper for the rendezvous machinery: register a meta-cell
    /// handler on the last hop, and return its receiver.
    pub(crate) async fn register_meta_last_hop(&self) -> Result<oneshot::Receiver<MetaResult>> {
        let mut c = self.c.lock().await;
        let hop = c.last_hop()?;
        c.register_meta_handler(hop)
    }

    /// Helper for the rendezvous machinery: send `msg` to the last
    /// hop and wait for a reply with the given command.
    pub(crate) async fn send_meta_and_wait(
        &self,
        msg: RelayMsg,
        expect: RelayCmd,
    ) -> Result<RelayMsg> {
        let receiver = {
            let mut c = self.c.lock().await;
            let hop = c.last_hop()?;
            let receiver = c.register_meta_handler(hop)?;
            let cell = RelayCell::new(0.into(), msg);
            c.send_relay_cell(hop, false, cell).await?;
            receiver
        };
        let reply = match receiver.await {
            Ok(Ok(m)) => m,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::CircuitClosed),
        };
        if reply.cmd() != expect {
            self.protocol_error().await;
            return Err(Error::CircProto(format!(
                "wanted {}; got {}",
                expect,
                reply.cmd()
            )));
        }
        Ok(reply)
    }
}

impl ClientCircImpl {
    /// Return a mutable reference to the nth hop of this circuit, if
    /// one exists.
    fn hop_mut(&mut self, hopnum: HopNum) -> Option<&mut CircHop> {
        self.hops.get_mut(Into::<usize>::into(hopnum))
    }

    /// Return the index of the last hop on this circuit.
    fn last_hop(&self) -> Result<HopNum> {
        if self.hops.is_empty() {
            return Err(Error::NoSuchHop);
        }
        Ok(((self.hops.len() - 1) as u8).into())
    }

    /// Register a handler that will be told about the next RELAY
    /// message with stream ID 0 from `hop`.
    ///
    /// This pattern is useful for parts of the protocol where the
    /// circuit originator sends a single request and waits for a
    /// single relay message in response: EXTEND2/EXTENDED2,
    /// ESTABLISH_RENDEZVOUS/RENDEZVOUS_ESTABLISHED, and so on.
    ///
    /// Only one handler can be registered at a time; until it fires
    /// or is cancelled, you can't register another.
    ///
    /// A handler should always be registered _before_ sending the
    /// cell whose response it is for, or the response might be
    /// missed.
    fn register_meta_handler(&mut self, hop: HopNum) -> Result<oneshot::Receiver<MetaResult>> {
        if self.sendmeta.is_some() {
            return Err(Error::InternalError(
                "Tried to register a second meta-cell handler".into(),
            ));
        }
        let (sender, receiver) = oneshot::channel();
        self.sendmeta = Some((hop, sender));
        trace!("{}: registered meta-cell handler for hop {}", self.unique_id, hop);
        Ok(receiver)
    }

    /// Handle a RELAY message on this circuit with stream ID 0.
    fn handle_meta_cell(&mut self, hopnum: HopNum, msg: RelayMsg) -> Result<()> {
        // SENDME messages are handled internally.  Acknowledgements
        // from relays are noted, but we don't throttle our uploads.
        if let RelayMsg::Sendme(_) = msg {
            trace!("{}: received circuit SENDME from hop {}", self.unique_id, hopnum);
            return Ok(());
        }
        if let RelayMsg::Truncated(t) = msg {
            // The rest of the circuit is gone; there is nothing
            // useful left to do with it.
            return Err(Error::CircDestroy(format!(
                "Circuit truncated with reason {}",
                t.reason()
            )));
        }

        trace!("{}: received meta-cell {:?}", self.unique_id, msg);

        // For all other command types, we'll only get them in
        // response to another command, which should have registered a
        // responder.
        if let Some((expected_hop, sender)) = self.sendmeta.take() {
            if expected_hop == hopnum {
                sender.send(Ok(msg)).map_err(|_| Error::CircuitClosed)
            } else {
                // Somebody wanted a message from a different hop!
                // Put this one back.
                self.sendmeta = Some((expected_hop, sender));
                Err(Error::CircProto(format!(
                    "Unexpected {} cell from hop {} on client circuit",
                    msg.cmd(),
                    hopnum,
                )))
            }
        } else {
            Err(Error::CircProto(format!(
                "Unexpected {} cell on client circuit",
                msg.cmd()
            )))
        }
    }

    /// Helper: put a cell onto this circuit's channel.
    ///
    /// This takes a raw cell that has already been encrypted, puts a
    /// circuit ID on it, and sends it.
    async fn send_msg(&mut self, msg: ChanMsg) -> Result<()> {
        let cell = ChanCell::new(self.id, msg);
        self.channel.send_cell(cell).await?;
        Ok(())
    }

    /// Helper: encode the relay cell `cell`, encrypt it, and send it
    /// to the 'hop'th hop.
    async fn send_relay_cell(&mut self, hop: HopNum, early: bool, cell: RelayCell) -> Result<()> {
        let mut body: RelayCellBody = cell.encode(&mut thread_rng())?.into();
        let _tag = self.crypto_out.encrypt(&mut body, hop)?;
        let msg = chancell::msg::Relay::from_raw(body.into());
        let msg = if early {
            ChanMsg::RelayEarly(msg)
        } else {
            ChanMsg::Relay(msg)
        };
        self.send_msg(msg).await
    }

    /// Shut down this circuit's reactor.
    ///
    /// This is idempotent and safe to call more than once.
    fn shutdown_reactor(&mut self) {
        if let Some(sender) = self.sendshutdown.take() {
            // Ignore the error, since it can only be "canceled".
            let _ = sender.send(CtrlMsg::Shutdown);
        }
    }

    /// Drop every stream on this circuit, so that their owners see a
    /// closed channel, and fail any pending meta-cell handler.
    fn teardown_streams(&mut self, reason: &str) {
        if let Some((_, sender)) = self.sendmeta.take() {
            let _ = sender.send(Err(Error::CircDestroy(reason.to_string())));
        }
        for hop in self.hops.iter_mut() {
            hop.map.clear();
        }
    }
}

impl PendingClientCirc {
    /// Instantiate a new circuit object: used from
    /// `Channel::new_circ()`.
    ///
    /// Does not send a CREATE2 cell on its own.
    pub(crate) fn new(
        id: CircId,
        channel: Arc<Channel>,
        createdreceiver: oneshot::Receiver<CreateResponse>,
        input: mpsc::Receiver<ClientCircChanMsg>,
    ) -> (PendingClientCirc, reactor::Reactor) {
        let unique_id = UniqId::new();
        let (sendclosed, recvclosed) = oneshot::channel::<CtrlMsg>();
        let (sendctrl, recvctrl) = mpsc::channel::<CtrlResult>(128);

        let circuit_impl = ClientCircImpl {
            id,
            channel,
            crypto_out: OutboundClientCrypt::new(),
            crypto_in: InboundClientCrypt::new(),
            hops: Vec::new(),
            control: sendctrl,
            sendshutdown: Some(sendclosed),
            sendmeta: None,
            unique_id,
        };
        let circuit = Arc::new(ClientCirc {
            closed: AtomicBool::new(false),
            c: Mutex::new(circuit_impl),
            unique_id,
        });
        let pending = PendingClientCirc {
            recvcreated: createdreceiver,
            circ: Arc::clone(&circuit),
        };
        let reactor = reactor::Reactor::new(&circuit, recvctrl, recvclosed, input);
        (pending, reactor)
    }

    /// Use the ntor handshake to connect to the first hop of this
    /// circuit.
    ///
    /// Note that the provided `target` must match the relay the
    /// channel is connected to, or the handshake will fail.
    pub async fn create_firsthop_ntor<R, Tg>(self, rng: &mut R, target: &Tg) -> Result<Arc<ClientCirc>>
    where
        R: Rng + CryptoRng,
        Tg: CircTarget,
    {
        use crate::crypto::handshake::ntor::{NtorClient, NtorPublicKey};

        let key = NtorPublicKey {
            id: *target.rsa_identity(),
            pk: *target.ntor_onion_key(),
        };
        self.create_impl::<R, Tor1RelayCrypto, _, _, NtorClient>(rng, 0x0002, &key)
            .await
    }

    /// Helper: create the first hop of a circuit.
    async fn create_impl<R, L, FWD, REV, H>(
        self,
        rng: &mut R,
        handshake_id: u16,
        key: &H::KeyType,
    ) -> Result<Arc<ClientCirc>>
    where
        R: Rng + CryptoRng,
        L: CryptInit + ClientLayer<FWD, REV> + 'static + Send,
        FWD: OutboundClientLayer + 'static + Send,
        REV: InboundClientLayer + 'static + Send,
        H: ClientHandshake,
        H::KeyGen: KeyGenerator,
    {
        use garlic_cell::chancell::msg::Body;
        // We don't need to shut down the circuit on failure here,
        // since this function consumes the PendingClientCirc and only
        // returns a ClientCirc on success.
        let PendingClientCirc { circ, recvcreated } = self;
        let (state, msg) = H::client1(rng, key)?;
        let create_cell = chancell::msg::Create2::new(handshake_id, msg).into_message();
        let unique_id = {
            let mut c = circ.c.lock().await;
            debug!("{}: extending to hop 1 with CREATE2", c.unique_id);
            c.send_msg(create_cell).await?;
            c.unique_id
        };

        let reply = recvcreated
            .await
            .map_err(|_| Error::CircProto("Circuit closed while waiting for CREATED2".into()))?;

        let relay_handshake = match reply {
            CreateResponse::Created2(m) => m.into_body(),
            CreateResponse::Destroy(d) => {
                return Err(Error::CircDestroy(format!(
                    "Relay replied to CREATE2 with DESTROY, reason {}",
                    d.reason()
                )));
            }
        };
        let keygen = H::client2(state, relay_handshake)?;
        let layer = L::construct(keygen)?;

        debug!("{}: handshake complete; circuit created", unique_id);

        let (layer_fwd, layer_back) = layer.split();
        circ.add_hop(Box::new(layer_fwd), Box::new(layer_back))
            .await?;
        Ok(circ)
    }
}

impl StreamTarget {
    /// Deliver a relay message for the stream that owns this
    /// StreamTarget.
    pub(crate) async fn send(&mut self, msg: RelayMsg) -> Result<()> {
        let cell = RelayCell::new(self.stream_id, msg);
        self.circ.send_relay_cell(self.hop, false, cell).await
    }

    /// Called when a circuit-level protocol error has occurred and
    /// the circuit needs to shut down.
    pub(crate) async fn protocol_error(&mut self) {
        self.circ.protocol_error().await;
    }
}

impl Drop for ClientCircImpl {
    fn drop(&mut self) {
        self.shutdown_reactor();
    }
}

impl Drop for StreamTarget {
    fn drop(&mut self) {
        if let Some(sender) = self.stream_closed.take() {
            let _ = sender.send(CtrlMsg::CloseStream(self.hop, self.stream_id));
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::crypto::cell::{tor1::CryptStatePair, HsV3RelayCrypto};
    use crate::crypto::handshake::ShakeKeyGenerator;
    use futures::stream::StreamExt;
    use garlic_cell::chancell::msg as chanmsg;
    use garlic_cell::relaycell::msg as relaymsg;

    /// Build a fake channel whose outbound cells can be inspected.
    pub(crate) fn fake_channel() -> (Arc<Channel>, mpsc::Receiver<ChanCell>) {
        let (cell_send, cell_recv) = mpsc::channel::<ChanCell>(64);
        let sink = cell_send.sink_map_err(|_| Error::ChannelClosed);
        // The input stream never yields; tests drive the circuit
        // reactor directly instead.
        let stream = futures::stream::pending::<Result<ChanCell>>();
        let (chan, _reactor) = Channel::new(4, Box::pin(sink), stream);
        (chan, cell_recv)
    }

    /// Build a circuit with `n` hops of no-op crypto for testing, and
    /// return it with its reactor and input sender.
    pub(crate) async fn newcirc(
        chan: Arc<Channel>,
        n: usize,
    ) -> (
        Arc<ClientCirc>,
        Reactor,
        mpsc::Sender<ClientCircChanMsg>,
    ) {
        let circid = 0x8000_0001.into();
        let (_created_send, created_recv) = oneshot::channel();
        let (circmsg_send, circmsg_recv) = mpsc::channel(64);
        let (pending, reactor) = PendingClientCirc::new(circid, chan, created_recv, circmsg_recv);
        let PendingClientCirc { circ, .. } = pending;

        for i in 0..n {
            let seed = vec![i as u8 + 1; 72];
            let pair = Tor1RelayCrypto::initialize(&seed);
            let (fwd, back) = pair.split();
            circ.add_hop(Box::new(fwd), Box::new(back)).await.unwrap();
        }
        (circ, reactor, circmsg_send)
    }

    /// Relay-side view of the same crypto that `newcirc` set up.
    pub(crate) fn relay_states(n: usize) -> Vec<Tor1RelayCrypto> {
        (0..n)
            .map(|i| Tor1RelayCrypto::initialize(&vec![i as u8 + 1; 72]))
            .collect()
    }

    /// Encode `msg` the way hop `hop_from` (0-indexed) would deliver
    /// it to the client.
    pub(crate) fn inbound_cell(
        relays: &mut [Tor1RelayCrypto],
        hop_from: usize,
        id: StreamId,
        msg: RelayMsg,
    ) -> ClientCircChanMsg {
        let body: RelayCellBody = RelayCell::new(id, msg)
            .encode(&mut thread_rng())
            .unwrap()
            .into();
        let mut body = body;
        relays[hop_from].originate(&mut body);
        for r in relays[..=hop_from].iter_mut().rev() {
            r.encrypt_inbound(&mut body);
        }
        let chanmsg = chanmsg::Relay::from_raw(body.into());
        ClientCircChanMsg::Relay(chanmsg)
    }

    #[tokio::test]
    async fn send_simple() {
        let (chan, mut ch) = fake_channel();
        let (circ, _reactor, _send) = newcirc(chan, 3).await;
        let begindir = RelayCell::new(0.into(), RelayMsg::BeginDir);
        circ.send_relay_cell(2.into(), false, begindir)
            .await
            .unwrap();

        // Here's what we tried to put on the TLS channel.  Undo the
        // three layers of encryption to look inside.
        let rcvd = ch.next().await.unwrap();
        assert_eq!(u32::from(rcvd.circid()), 0x8000_0001);
        let body = match rcvd.into_circid_and_msg().1 {
            ChanMsg::Relay(r) => r.into_relay_body(),
            other => panic!("{:?}", other),
        };
        let mut body: RelayCellBody = body.into();
        let mut relays = relay_states(3);
        assert!(!relays[0].decrypt_outbound(&mut body));
        assert!(!relays[1].decrypt_outbound(&mut body));
        assert!(relays[2].decrypt_outbound(&mut body));
        let cell = RelayCell::decode(body.into()).unwrap();
        assert_eq!(cell.cmd(), RelayCmd::BEGIN_DIR);
    }

    #[tokio::test]
    async fn meta_handler_round_trip() {
        let (chan, _ch) = fake_channel();
        let (circ, mut reactor, mut sink) = newcirc(chan, 3).await;

        let receiver = {
            let mut c = circ.c.lock().await;
            c.register_meta_handler(2.into()).unwrap()
        };
        let mut relays = relay_states(3);
        let extended: RelayMsg = relaymsg::Extended2::new((*b"123").into()).into();
        sink.send(inbound_cell(&mut relays, 2, 0.into(), extended))
            .await
            .unwrap();
        reactor.run_once().await.unwrap();
        let msg = receiver.await.unwrap().unwrap();
        assert!(matches!(msg, RelayMsg::Extended2(_)));
    }

    #[tokio::test]
    async fn meta_from_wrong_hop_is_an_error() {
        let (chan, _ch) = fake_channel();
        let (circ, mut reactor, mut sink) = newcirc(chan, 3).await;

        let _receiver = {
            let mut c = circ.c.lock().await;
            c.register_meta_handler(2.into()).unwrap()
        };
        let mut relays = relay_states(3);
        let extended: RelayMsg = relaymsg::Extended2::new((*b"123").into()).into();
        // Hop 1 speaks out of turn.
        sink.send(inbound_cell(&mut relays, 1, 0.into(), extended))
            .await
            .unwrap();
        let err = reactor.run_once().await.unwrap_err();
        assert!(format!("{:?}", err).contains("hop 1"));
    }

    #[tokio::test]
    async fn destroy_kills_circuit() {
        let (chan, _ch) = fake_channel();
        let (circ, reactor, mut sink) = newcirc(chan, 3).await;
        assert!(!circ.is_closing());
        let destroy = chanmsg::Destroy::new(chanmsg::DestroyReason::FINISHED);
        sink.send(ClientCircChanMsg::Destroy(destroy)).await.unwrap();
        let r = reactor.run().await;
        assert!(matches!(r, Err(Error::CircDestroy(_))));
        assert!(circ.is_closing());
    }

    #[tokio::test]
    async fn hs_layer_seed_sizes() {
        // The rendezvous hop uses 32-byte digests and 32-byte keys.
        assert_eq!(
            <HsV3RelayCrypto as CryptInit>::seed_len(),
            32 * 2 + 32 * 2
        );
        assert_eq!(<Tor1RelayCrypto as CryptInit>::seed_len(), 20 * 2 + 16 * 2);
        // And a keygen can actually fill one.
        let seed = crate::SecretBytes::new(vec![7; 32]);
        let keygen = ShakeKeyGenerator::new(seed);
        let pair: HsV3RelayCrypto = CryptStatePair::construct(keygen).unwrap();
        let (_fwd, _back) = pair.split();
    }
}
