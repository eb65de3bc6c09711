//! Code to handle incoming cells on a channel.
//!
//! This code runs in a separate asynchronous task, and routes cells
//! to the circuit living on the channel.

use super::circmap::{CircEnt, CircMap};
use crate::{Error, Result};
use garlic_cell::chancell::{msg::ChanMsg, ChanCell, CircId};

use futures::channel::oneshot;
use futures::future::FusedFuture;
use futures::lock::Mutex;
use futures::select_biased;
use futures::sink::SinkExt;
use futures::stream::{Stream, StreamExt};
use futures::FutureExt;

use std::sync::{Arc, Weak};

use tracing::{debug, trace};

/// Error return value from run_once: indicates an error or a
/// shutdown.
#[derive(Debug)]
enum ReactorError {
    /// The reactor should shut down with an abnormal exit condition.
    Err(Error),
    /// The reactor should shut down without an error, since all is
    /// well.
    Shutdown,
}
impl From<Error> for ReactorError {
    fn from(e: Error) -> ReactorError {
        ReactorError::Err(e)
    }
}

/// Object to handle incoming cells on a channel.
///
/// This type is returned when you finish a channel; you need to spawn
/// a new task that calls `run()` on it.
#[must_use = "If you don't call run() on a reactor, the channel won't work."]
pub struct Reactor<T>
where
    T: Stream<Item = Result<ChanCell>> + Unpin + Send + 'static,
{
    /// A oneshot that fires when the channel is asked to shut down.
    closeflag: futures::future::Fuse<oneshot::Receiver<()>>,
    /// A Stream from which we can read cells.  This is backed by the
    /// TLS connection.
    input: futures::stream::Fuse<T>,
    /// A map from circuit ID to sinks on which we can deliver cells.
    circs: Arc<Mutex<CircMap>>,
    /// Channel pointer, used to mark the channel closed on exit.
    channel: Weak<super::Channel>,
}

impl<T> Reactor<T>
where
    T: Stream<Item = Result<ChanCell>> + Unpin + Send + 'static,
{
    /// Construct a new Reactor.
    pub(super) fn new(
        channel: &Arc<super::Channel>,
        circmap: Arc<Mutex<CircMap>>,
        closeflag: oneshot::Receiver<()>,
        input: T,
    ) -> Self {
        Reactor {
            closeflag: closeflag.fuse(),
            input: input.fuse(),
            circs: circmap,
            channel: Arc::downgrade(channel),
        }
    }

    /// Launch the reactor, and run until the channel closes or we
    /// encounter an error.
    pub async fn run(mut self) -> Result<()> {
        debug!("channel reactor running");
        let result: Result<()> = loop {
            match self.run_once().await {
                Ok(()) => (),
                Err(ReactorError::Shutdown) => break Ok(()),
                Err(ReactorError::Err(e)) => break Err(e),
            }
        };
        debug!("channel reactor stopped: {:?}", result);
        if let Some(chan) = self.channel.upgrade() {
            chan.mark_closed().await;
        }
        result
    }

    /// Helper for run(): handle only one action.
    async fn run_once(&mut self) -> std::result::Result<(), ReactorError> {
        if self.closeflag.is_terminated() {
            return Err(ReactorError::Shutdown);
        }
        select_biased! {
            // We've been asked to close.
            _ = &mut self.closeflag => return Err(ReactorError::Shutdown),
            // We got a cell, or the TLS connection closed.
            item = self.input.next() => {
                let item = match item {
                    None => return Err(ReactorError::Shutdown), // the TLS connection closed.
                    Some(r) => r?, // it's a cell.
                };
                self.handle_cell(item).await?;
            }
        };
        Ok(())
    }

    /// Helper: process a cell on a channel.  Most cell types get
    /// ignored or rejected; a few get delivered to the circuit.
    async fn handle_cell(&mut self, cell: ChanCell) -> Result<()> {
        let (circid, msg) = cell.into_circid_and_msg();
        use ChanMsg::*;

        match msg {
            Relay(_) | Padding(_) | VPadding(_) => {} // too frequent to log.
            _ => trace!("received {} for {}", msg.cmd(), circid),
        }

        match msg {
            // These aren't allowed on clients.
            Create2(_) | RelayEarly(_) => Err(Error::ChanProto(format!(
                "{} cell on client channel",
                msg.cmd()
            ))),

            // These aren't allowed after handshaking is done.
            Versions(_) | Certs(_) | AuthChallenge(_) | Netinfo(_) => Err(Error::ChanProto(
                format!("{} cell after handshake is done", msg.cmd()),
            )),

            // These are allowed, and need to be handled.
            Relay(_) => self.deliver_relay(circid, msg).await,
            Destroy(_) => self.deliver_destroy(circid, msg).await,
            Created2(_) => self.deliver_created(circid, msg).await,

            // These are always ignored.
            Padding(_) | VPadding(_) => Ok(()),

            // Unrecognized cell types are safe to allow _on
            // channels_, since they can't propagate.
            Unrecognized(_) => {
                trace!("ignoring unrecognized cell command {}", msg.cmd());
                Ok(())
            }

            // The ChanMsg enum is #[non_exhaustive]; treat any future
            // variant the same way as Unrecognized.
            _ => {
                trace!("ignoring unrecognized cell command {}", msg.cmd());
                Ok(())
            }
        }
    }

    /// Give the RELAY cell `msg` to the circuit with `circid`.
    async fn deliver_relay(&mut self, circid: CircId, msg: ChanMsg) -> Result<()> {
        let mut map = self.circs.lock().await;
        match map.get_mut(circid) {
            Some(CircEnt::Open(s)) => s
                .send(msg.try_into()?)
                .await
                .map_err(|_| Error::CircuitClosed),
            Some(CircEnt::Opening(_, _)) => Err(Error::ChanProto(
                "Relay cell on pending circuit before CREATED2 received".into(),
            )),
            None => Err(Error::ChanProto("Relay cell on nonexistent circuit".into())),
        }
    }

    /// Handle a CREATED2 cell by passing it to the circuit, if that
    /// circuit is waiting for one.
    async fn deliver_created(&mut self, circid: CircId, msg: ChanMsg) -> Result<()> {
        let mut map = self.circs.lock().await;
        if let Some(target) = map.advance_from_opening(circid) {
            let created = msg.try_into()?;
            target.send(created).map_err(|_| Error::CircuitClosed)
        } else {
            Err(Error::ChanProto(format!("Unexpected {} cell", msg.cmd())))
        }
    }

    /// Handle a DESTROY cell by removing the corresponding circuit
    /// from the map, and passing the destroy message onward.
    async fn deliver_destroy(&mut self, circid: CircId, msg: ChanMsg) -> Result<()> {
        let mut map = self.circs.lock().await;
        match map.remove(circid) {
            // If the circuit is waiting for CREATED2, tell it that it
            // won't get one.
            Some(CircEnt::Opening(oneshot, _)) => {
                trace!("passing destroy to pending circuit {}", circid);
                oneshot
                    .send(msg.try_into()?)
                    .map_err(|_| Error::CircuitClosed)
            }
            // It's an open circuit: tell it that it got a DESTROY.
            Some(CircEnt::Open(mut sink)) => {
                trace!("passing destroy to open circuit {}", circid);
                sink.send(msg.try_into()?)
                    .await
                    .map_err(|_| Error::CircuitClosed)
            }
            // A DESTROY cell for a circuit we don't have.
            None => {
                trace!("destroy for nonexistent circuit {}", circid);
                Err(Error::ChanProto("Destroy for nonexistent circuit".into()))
            }
        }
    }
}
