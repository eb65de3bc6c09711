//! Code to handle incoming cells on a circuit.
//!
//! The reactor runs in its own asynchronous task.  It decrypts
//! arriving relay cells, enforces the delivery windows, and routes
//! each message to the stream (or meta-cell handler) that is waiting
//! for it.

use super::streammap::StreamEnt;
use crate::circuit::celltypes::ClientCircChanMsg;
use crate::circuit::{sendme, ClientCirc};
use crate::crypto::cell::HopNum;
use crate::{Error, Result};
use garlic_cell::chancell::msg::Relay;
use garlic_cell::relaycell::msg::{End, RelayMsg, Sendme};
use garlic_cell::relaycell::{RelayCell, StreamId};

use futures::channel::{mpsc, oneshot};
use futures::select_biased;
use futures::sink::SinkExt;
use futures::stream::{self, StreamExt};

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, trace};

/// A message telling the reactor to do something.
pub(crate) enum CtrlMsg {
    /// Shut down the reactor.
    Shutdown,
    /// Register a new one-shot receiver that can send a CtrlMsg to
    /// the reactor.
    ///
    /// We can't let everybody use the mpsc control stream, since
    /// messages must also be sendable from drop(), which can't
    /// await.  One-shot senders can fire synchronously.
    Register(oneshot::Receiver<CtrlMsg>),
    /// Tell the reactor that a given stream has gone away.
    CloseStream(HopNum, StreamId),
}

/// Type returned by a oneshot channel for a CtrlMsg.  For
/// convenience, we also use this as the type for the control mpsc
/// channel, so we can join them.
pub(crate) type CtrlResult = std::result::Result<CtrlMsg, oneshot::Canceled>;

/// A stream of oneshot CtrlMsg replies, multiplexed together.
type OneshotStream = stream::SelectAll<stream::Once<oneshot::Receiver<CtrlMsg>>>;

/// Object to handle incoming cells on a circuit.
///
/// This type is returned when you build a circuit; you need to spawn
/// a new task that calls `run()` on it.
#[must_use = "If you don't call run() on a reactor, the circuit won't work."]
pub struct Reactor {
    /// A stream of oneshot receivers that tell this reactor about
    /// things it needs to handle, like closed streams.
    control: stream::Fuse<stream::Select<mpsc::Receiver<CtrlResult>, OneshotStream>>,
    /// Input stream, on which we receive cells from this circuit's
    /// channel.
    input: stream::Fuse<mpsc::Receiver<ClientCircChanMsg>>,
    /// Reference to the circuit.
    circuit: Arc<ClientCirc>,
}

impl Reactor {
    /// Construct a new Reactor.
    pub(super) fn new(
        circuit: &Arc<ClientCirc>,
        control: mpsc::Receiver<CtrlResult>,
        closeflag: oneshot::Receiver<CtrlMsg>,
        input: mpsc::Receiver<ClientCircChanMsg>,
    ) -> Self {
        let mut oneshots = stream::SelectAll::new();
        oneshots.push(stream::once(closeflag));
        let control = stream::select(control, oneshots);
        Reactor {
            input: input.fuse(),
            control: control.fuse(),
            circuit: Arc::clone(circuit),
        }
    }

    /// Launch the reactor, and run until the circuit closes or we
    /// encounter an error.
    pub async fn run(mut self) -> Result<()> {
        debug!("{}: circuit reactor running", self.circuit.unique_id());
        let result = loop {
            match self.run_once().await {
                Ok(false) => (),
                Ok(true) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        debug!(
            "{}: circuit reactor stopped: {:?}",
            self.circuit.unique_id(),
            result
        );
        self.cleanup(&result).await;
        result
    }

    /// Handle one reactor event.  Returns Ok(true) on clean shutdown.
    pub(crate) async fn run_once(&mut self) -> Result<bool> {
        let item = select_biased! {
            // Got a control message!
            ctrl = self.control.next() => {
                match ctrl {
                    Some(Ok(CtrlMsg::Shutdown)) => return Ok(true),
                    Some(Ok(msg)) => self.handle_control(msg).await?,
                    Some(Err(_)) => (), // sender was cancelled; ignore.
                    None => return Ok(true), // impossible in practice.
                }
                return Ok(false);
            }
            // We got a message on our channel, or it closed.
            item = self.input.next() => item,
        };
        let item = match item {
            // The channel has gone away unexpectedly.
            None => return Err(Error::ChannelClosed),
            Some(r) => r,
        };

        match item {
            ClientCircChanMsg::Relay(r) => {
                self.handle_relay_cell(r).await?;
                Ok(false)
            }
            ClientCircChanMsg::Destroy(d) => Err(Error::CircDestroy(format!(
                "Circuit destroyed by peer, reason {}",
                d.reason()
            ))),
        }
    }

    /// Mark the circuit closed and release its streams and channel.
    ///
    /// Closing the channel closes the underlying link socket.
    async fn cleanup(&self, result: &Result<()>) {
        self.circuit.closed.store(true, Ordering::SeqCst);
        let reason = match result {
            Ok(()) => "circuit closed".to_string(),
            Err(e) => e.to_string(),
        };
        let mut c = self.circuit.c.lock().await;
        c.teardown_streams(&reason);
        c.channel.terminate().await;
    }

    /// Handle a CtrlMsg other than Shutdown.
    async fn handle_control(&mut self, msg: CtrlMsg) -> Result<()> {
        match msg {
            CtrlMsg::Shutdown => (), // was handled in run_once.
            CtrlMsg::CloseStream(hop, id) => self.close_stream(hop, id).await?,
            CtrlMsg::Register(ch) => self.register(ch),
        }
        Ok(())
    }

    /// Close the stream associated with `id` because the stream was
    /// dropped.
    ///
    /// If we have not already received an END message on this stream,
    /// send one.
    async fn close_stream(&mut self, hopnum: HopNum, id: StreamId) -> Result<()> {
        let mut circ = self.circuit.c.lock().await;
        let hop = circ
            .hop_mut(hopnum)
            .ok_or(Error::NoSuchHop)?;
        let should_send_end = hop.map.mark_closed(id);
        if should_send_end {
            let end_cell = RelayCell::new(id, End::new_misc().into());
            circ.send_relay_cell(hopnum, false, end_cell).await?;
        }
        Ok(())
    }

    /// Ensure that we get a message on self.control when `ch` fires.
    fn register(&mut self, ch: oneshot::Receiver<CtrlMsg>) {
        let (_, select_all) = self.control.get_mut().get_mut();
        select_all.push(stream::once(ch));
    }

    /// React to a Relay cell.
    async fn handle_relay_cell(&mut self, cell: Relay) -> Result<()> {
        let mut body = cell.into_relay_body().into();
        let mut circ = self.circuit.c.lock().await;

        // Decrypt the cell.  If it's recognized, find the
        // corresponding hop; otherwise the circuit is broken.
        let (hopnum, tag) = circ.crypto_in.decrypt(&mut body)?;
        // Decode the cell.
        let msg = RelayCell::decode(body.into())?;

        // Decrement the circuit delivery window, and maybe
        // acknowledge the data.  The acknowledgement goes out before
        // the cell is serviced.
        if sendme::cell_counts_towards_windows(&msg) {
            let send_circ_sendme = match circ
                .hop_mut(hopnum)
                .ok_or(Error::NoSuchHop)?
                .recvwindow
                .take()
            {
                Some(v) => v,
                None => {
                    return Err(Error::CircProto(
                        "Received a cell when the circuit delivery window was empty".into(),
                    ))
                }
            };
            if send_circ_sendme {
                let sendme = Sendme::new_tag(tag);
                let cell = RelayCell::new(0.into(), sendme.into());
                circ.send_relay_cell(hopnum, false, cell).await?;
                circ.hop_mut(hopnum)
                    .ok_or(Error::NoSuchHop)?
                    .recvwindow
                    .put();
            }
        }

        // Break the message apart into its stream ID and message.
        let (streamid, msg) = msg.into_streamid_and_msg();

        // If this cell wants/refuses to have a stream ID, does it
        // have/not have one?
        if !msg.cmd().accepts_streamid_val(streamid) {
            return Err(Error::CircProto(format!(
                "Invalid stream ID {} for relay command {}",
                streamid,
                msg.cmd()
            )));
        }

        // If this has a stream ID of 0, it's a meta cell, not meant
        // for any particular stream.
        if streamid.is_zero() {
            return circ.handle_meta_cell(hopnum, msg);
        }

        // A stream-level SENDME is noted and needs no routing.
        if let RelayMsg::Sendme(_) = msg {
            trace!(
                "{}: received stream SENDME on stream {}",
                self.circuit.unique_id(),
                streamid
            );
            return Ok(());
        }

        let hop = circ.hop_mut(hopnum).ok_or(Error::NoSuchHop)?;
        match hop.map.get_mut(streamid) {
            Some(StreamEnt::Open(s)) => {
                // An END or TRUNCATED closes the stream after
                // delivery.
                let close_after = matches!(msg, RelayMsg::End(_) | RelayMsg::Truncated(_));
                // If the stream's owner is gone, that's fine; the
                // close-stream control message is on its way.
                let _ = s.send(msg).await;
                if close_after {
                    hop.map.mark_closed(streamid);
                }
                Ok(())
            }
            // A late message for a stream that already ended gets
            // dropped without complaint.
            Some(StreamEnt::Closed) => Ok(()),
            // No stream wants this message; drop it.
            None => {
                trace!(
                    "{}: dropping cell for unknown stream {}",
                    self.circuit.unique_id(),
                    streamid
                );
                Ok(())
            }
        }
    }
}
