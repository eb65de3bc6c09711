//! Adapt the cell codec to the framed-transport traits.

use crate::Error;
use bytes::BytesMut;
use garlic_cell::chancell::{codec::ChannelCodec, ChanCell};
use tokio_util::codec::{Decoder, Encoder};

/// The codec used to frame cells on a channel, once the link version
/// has been negotiated.
pub struct CellCodec(ChannelCodec);

impl CellCodec {
    /// Create a new CellCodec for a given link protocol version.
    pub(super) fn new(link_version: u16) -> Self {
        CellCodec(ChannelCodec::new(link_version))
    }
}

impl Encoder<ChanCell> for CellCodec {
    type Error = Error;

    fn encode(&mut self, item: ChanCell, dst: &mut BytesMut) -> Result<(), Error> {
        self.0.write_cell(item, dst)?;
        Ok(())
    }
}

impl Decoder for CellCodec {
    type Item = ChanCell;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ChanCell>, Error> {
        Ok(self.0.decode_cell(src)?)
    }
}
