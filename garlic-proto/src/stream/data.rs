//! Declare DataStream, a type that wraps RawCellStream so as to be
//! useful for byte-oriented communication.

use super::RawCellStream;
use crate::{Error, Result};

use std::sync::Arc;

use garlic_cell::relaycell::msg::{Data, RelayMsg};

/// A DataStream is a stream packaged so as to be useful for
/// byte-oriented IO.
///
/// It's suitable for use with BEGIN or BEGIN_DIR streams.
pub struct DataStream {
    /// Underlying writer for this stream.
    w: DataWriter,
    /// Underlying reader for this stream.
    r: DataReader,
}

/// The write half of a DataStream.
pub struct DataWriter {
    /// Internal state for this writer.
    imp: DataWriterImpl,
}

/// The read half of a DataStream.
pub struct DataReader {
    /// Internal state for this reader.
    imp: DataReaderImpl,
}

impl DataStream {
    /// Wrap a RawCellStream as a DataStream.
    pub(crate) fn new(s: RawCellStream) -> Self {
        let s = Arc::new(s);
        let r = DataReader {
            imp: DataReaderImpl {
                s: Arc::clone(&s),
                pending: Vec::new(),
                offset: 0,
            },
        };
        let w = DataWriter {
            imp: DataWriterImpl { s },
        };
        DataStream { r, w }
    }

    /// Write all the bytes in `buf` onto the stream, using as few
    /// DATA messages as possible.
    pub async fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.w.write_bytes(buf).await
    }

    /// Try to read some bytes from the stream; return how many we
    /// read.
    pub async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.r.read_bytes(buf).await
    }

    /// Read until the stream closes; return everything read.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut result = Vec::new();
        let mut buf = vec![0_u8; 4096];
        loop {
            match self.read_bytes(&mut buf[..]).await {
                Ok(n) => result.extend_from_slice(&buf[..n]),
                Err(Error::StreamClosed(_)) | Err(Error::EndReceived(_)) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(result)
    }

    /// Divide this DataStream into its constituent parts.
    pub fn split(self) -> (DataReader, DataWriter) {
        (self.r, self.w)
    }
}

/// Internal: the write part of a DataStream.
struct DataWriterImpl {
    /// The underlying RawCellStream object.
    s: Arc<RawCellStream>,
}

impl DataWriter {
    /// Write all the bytes in `b` onto the stream, splitting them
    /// into DATA messages of at most [`Data::MAXLEN`] bytes each.
    pub async fn write_bytes(&mut self, b: &[u8]) -> Result<()> {
        for chunk in b.chunks(Data::MAXLEN) {
            let cell = Data::new(chunk)?;
            self.imp.s.send(cell.into()).await?;
        }
        Ok(())
    }
}

/// Internal: the read part of a DataStream.
struct DataReaderImpl {
    /// The underlying RawCellStream object.
    s: Arc<RawCellStream>,
    /// Data that we received on this stream but have not yet handed
    /// to the caller.
    pending: Vec<u8>,
    /// Index into `pending` showing what we've already returned.
    offset: usize,
}

impl DataReader {
    /// Try to read some bytes from the stream; return how many we
    /// read.
    ///
    /// A stream that has ended reports [`Error::StreamClosed`].
    pub async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.imp.s.has_ended() {
            return Err(Error::StreamClosed("stream is closed"));
        }

        if !self.imp.buf_is_empty() {
            return Ok(self.imp.extract_bytes(buf));
        }

        // We don't loop here: looping could block when we already
        // have data to return.
        self.imp.read_cell().await?;

        Ok(self.imp.extract_bytes(buf))
    }
}

impl DataReaderImpl {
    /// Pull as many bytes as we can off of self.pending, and return
    /// that number of bytes.
    fn extract_bytes(&mut self, buf: &mut [u8]) -> usize {
        let remainder = &self.pending[self.offset..];
        let n_to_copy = std::cmp::min(buf.len(), remainder.len());
        buf[..n_to_copy].copy_from_slice(&remainder[..n_to_copy]);
        self.offset += n_to_copy;

        n_to_copy
    }

    /// Return true iff there are no buffered bytes here to yield.
    fn buf_is_empty(&self) -> bool {
        self.pending.len() == self.offset
    }

    /// Load self.pending with the contents of the next DATA message.
    async fn read_cell(&mut self) -> Result<()> {
        loop {
            return match self.s.recv().await {
                Ok(RelayMsg::Data(d)) => {
                    self.add_data(d.into());
                    Ok(())
                }
                // Directory streams get an implicit success; a
                // CONNECTED that arrives anyway is absorbed here.
                Ok(RelayMsg::Connected(_)) => continue,
                Ok(RelayMsg::End(e)) => {
                    self.s.note_ended();
                    Err(Error::EndReceived(e.reason()))
                }
                Err(e) => {
                    self.s.note_ended();
                    Err(e)
                }
                Ok(m) => {
                    self.s.protocol_error().await;
                    Err(Error::StreamProto(format!(
                        "Unexpected {} message on stream",
                        m.cmd()
                    )))
                }
            };
        }
    }

    /// Add the data from `d` to the end of our pending bytes.
    fn add_data(&mut self, d: Vec<u8>) {
        if self.buf_is_empty() {
            // No data pending?  Just take d as the new pending.
            self.pending = d;
            self.offset = 0;
        } else {
            self.pending.extend_from_slice(&d[..]);
        }
    }
}
