//! Tracking for the delivery windows that drive SENDME flow control.
//!
//! This client only implements the receiving side: each DATA cell
//! delivered to us decrements a circuit-level window (initially 1000)
//! and a stream-level window (initially 500), and when a window
//! crosses a multiple of its increment we acknowledge the data with a
//! SENDME so the other side keeps sending.  SENDMEs that the relays
//! send *us* are noted and otherwise ignored; we do not throttle our
//! own uploads.

use garlic_cell::relaycell::msg::RelayMsg;
use garlic_cell::relaycell::RelayCell;

/// A type that determines the size of the increment that a window
/// moves by.
pub(crate) trait WindowInc {
    /// Return the increment value.
    fn get_val() -> u16;
}
/// Marker for circuit-level windows: these use an increment of 100.
pub(crate) struct CircInc;
impl WindowInc for CircInc {
    fn get_val() -> u16 {
        100
    }
}
/// Marker for stream-level windows: these use an increment of 50.
pub(crate) struct StreamInc;
impl WindowInc for StreamInc {
    fn get_val() -> u16 {
        50
    }
}

/// A circuit-level delivery window.
pub(crate) type CircRecvWindow = RecvWindow<CircInc>;
/// A stream-level delivery window.
pub(crate) type StreamRecvWindow = RecvWindow<StreamInc>;

/// Tracks how many cells we can receive before the sender needs
/// another SENDME from us.
pub(crate) struct RecvWindow<I: WindowInc> {
    /// The number of cells we are willing to receive.
    window: u16,
    /// Marker for the increment type.
    _dummy: std::marker::PhantomData<I>,
}

impl<I: WindowInc> RecvWindow<I> {
    /// Construct a new RecvWindow with the given initial value.
    pub(crate) fn new(window: u16) -> RecvWindow<I> {
        RecvWindow {
            window,
            _dummy: std::marker::PhantomData,
        }
    }

    /// Decrement the window for one received cell.
    ///
    /// Returns Some(true) if a SENDME must be sent before servicing
    /// the cell, Some(false) if not, and None if the peer has
    /// overflowed the window.
    pub(crate) fn take(&mut self) -> Option<bool> {
        let v = self.window.checked_sub(1);
        if let Some(x) = v {
            self.window = x;
            Some(x % I::get_val() == 0)
        } else {
            None
        }
    }

    /// Restore the window by one increment, after a SENDME has been
    /// sent.
    pub(crate) fn put(&mut self) {
        self.window = self
            .window
            .checked_add(I::get_val())
            .expect("window overflow");
    }
}

/// Return true if this message is counted by delivery windows.
pub(crate) fn msg_counts_towards_windows(msg: &RelayMsg) -> bool {
    msg.counts_towards_windows()
}

/// Return true if this cell is counted by delivery windows.
pub(crate) fn cell_counts_towards_windows(cell: &RelayCell) -> bool {
    cell.counts_towards_circuit_windows()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn recvwindow_thresholds() {
        let mut w: CircRecvWindow = RecvWindow::new(1000);
        // The first 99 cells need no acknowledgement.
        for _ in 0..99 {
            assert_eq!(w.take(), Some(false));
        }
        // The hundredth brings the window to 900, a multiple of the
        // increment: time to acknowledge.
        assert_eq!(w.take(), Some(true));
        w.put();

        let mut s: StreamRecvWindow = RecvWindow::new(500);
        for _ in 0..49 {
            assert_eq!(s.take(), Some(false));
        }
        assert_eq!(s.take(), Some(true));
    }

    #[test]
    fn recvwindow_overflow() {
        let mut w: StreamRecvWindow = RecvWindow::new(1);
        assert_eq!(w.take(), Some(false));
        // A peer that ignores the window gets caught.
        assert_eq!(w.take(), None);
    }
}
