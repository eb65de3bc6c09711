//! Declare the lowest level of stream: a stream that operates on raw
//! relay messages.

use crate::circuit::{sendme, StreamTarget};
use crate::{Error, Result};
use garlic_cell::relaycell::msg::{RelayMsg, Sendme};

use futures::channel::mpsc;
use futures::lock::Mutex;
use futures::stream::StreamExt;

use std::sync::atomic::{AtomicBool, Ordering};

/// A RawCellStream is a client's message-oriented view of a stream
/// over the network.
pub struct RawCellStream {
    /// Wrapped view of the circuit, hop, and stream ID that we're
    /// using.
    target: Mutex<StreamTarget>,
    /// A stream over which we receive relay messages.  Only messages
    /// addressed to this stream's ID will arrive here.
    receiver: Mutex<mpsc::Receiver<RelayMsg>>,
    /// Have we been informed that this stream is closed?
    stream_ended: AtomicBool,
}

impl RawCellStream {
    /// Internal: build a new RawCellStream.
    pub(crate) fn new(target: StreamTarget, receiver: mpsc::Receiver<RelayMsg>) -> Self {
        RawCellStream {
            target: Mutex::new(target),
            receiver: Mutex::new(receiver),
            stream_ended: AtomicBool::new(false),
        }
    }

    /// Try to read the next relay message from this stream.
    pub async fn recv(&self) -> Result<RelayMsg> {
        let msg = self
            .receiver
            .lock()
            .await
            .next()
            .await
            // The sender goes away when the stream or circuit is
            // torn down.
            .ok_or(Error::StreamClosed(
                "stream channel disappeared without END message",
            ))?;

        // Possibly decrement the window for the cell we just
        // received, and acknowledge it if that crossed the
        // threshold.
        if sendme::msg_counts_towards_windows(&msg) {
            let mut target = self.target.lock().await;
            match target.recvwindow.take() {
                Some(true) => self.send_sendme(&mut target).await?,
                Some(false) => (),
                None => {
                    target.protocol_error().await;
                    return Err(Error::StreamProto(
                        "stream delivery window exceeded".into(),
                    ));
                }
            }
        }

        Ok(msg)
    }

    /// Send a relay message along this stream.
    pub async fn send(&self, msg: RelayMsg) -> Result<()> {
        self.target.lock().await.send(msg).await
    }

    /// Return true if this stream is marked as having ended.
    pub fn has_ended(&self) -> bool {
        self.stream_ended.load(Ordering::SeqCst)
    }

    /// Mark this stream as having ended.
    pub(crate) fn note_ended(&self) {
        self.stream_ended.store(true, Ordering::SeqCst);
    }

    /// Inform the circuit-side of this stream about a protocol error.
    pub async fn protocol_error(&self) {
        self.target.lock().await.protocol_error().await;
    }

    /// Send a stream-level SENDME and restore the receive window.
    async fn send_sendme(&self, target: &mut StreamTarget) -> Result<()> {
        let sendme = Sendme::new_empty();
        target.send(sendme.into()).await?;
        target.recvwindow.put();
        Ok(())
    }
}
