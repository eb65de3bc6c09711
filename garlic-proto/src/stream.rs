//! Streams: byte-oriented channels multiplexed inside a circuit.
//!
//! A stream is identified by a nonzero 16-bit ID chosen by this
//! client.  [`RawCellStream`] exposes the relay messages themselves;
//! [`DataStream`] wraps one for ordinary byte-oriented IO.

mod data;
mod raw;

pub use data::{DataReader, DataStream, DataWriter};
pub use raw::RawCellStream;
