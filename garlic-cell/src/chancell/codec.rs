//! Implementation for encoding and decoding of ChanCells.

use super::CELL_DATA_LEN;
use crate::chancell::{msg, ChanCell, ChanCmd, CircId};
use crate::Error;
use arrayref::{array_mut_ref, array_ref};
use garlic_bytes::{Reader, Writer};

use bytes::BytesMut;

/// This object can be used to encode and decode channel cells.
///
/// NOTE: only link protocol version 4 is supported.  VERSIONS cells
/// are not supported via the encoder/decoder, since VERSIONS always
/// uses a two-byte circuit ID.
///
/// The implemented format is one of the following:
///
/// ```ignore
///     u32 circid;
///     u8 command;
///     u16 len;
///     u8 body[len];
/// ```
///
/// ```ignore
///     u32 circid;
///     u8 command;
///     u8 body[509];
/// ```
pub struct ChannelCodec {
    #[allow(dead_code)] // We don't support any link versions where this matters
    /// The link protocol version being used for this channel.
    ///
    /// (For some older versions of the link protocol, this would
    /// affect the length of the circuit ID.)
    link_version: u16,
}

impl ChannelCodec {
    /// Create a new ChannelCodec with a given link protocol version.
    pub fn new(link_version: u16) -> Self {
        ChannelCodec { link_version }
    }

    /// Write the given cell into the provided BytesMut object.
    ///
    /// Fixed-length cells are zero-padded out to the full 514 bytes on
    /// the wire.
    pub fn write_cell(&mut self, item: ChanCell, dst: &mut BytesMut) -> crate::Result<()> {
        let ChanCell { circid, msg } = item;
        let cmd = msg.cmd();
        dst.write_u32(circid.into());
        dst.write_u8(cmd.into());

        // now write the cell body and handle the length.
        if cmd.is_var_cell() {
            let pos = dst.len();
            dst.write_u16(0);
            msg.write_body_onto(dst);
            let len = dst.len() - pos - 2;
            if len > u16::MAX as usize {
                return Err(Error::Internal("ran out of space for varcell"));
            }
            // go back and set the length.
            *(array_mut_ref![&mut dst[pos..pos + 2], 0, 2]) = (len as u16).to_be_bytes();
        } else {
            let pos = dst.len();
            msg.write_body_onto(dst);
            let len = dst.len() - pos;
            if len > CELL_DATA_LEN {
                return Err(Error::Internal("ran out of space for cell"));
            }
            // pad to end of fixed-length cell
            dst.write_zeros(CELL_DATA_LEN - len);
        }
        Ok(())
    }

    /// Try to decode a cell from the provided BytesMut object.
    ///
    /// On a definite decoding error, return Err(_).  On a cell that
    /// might just be truncated, return Ok(None) and leave the buffer
    /// unchanged.
    pub fn decode_cell(&mut self, src: &mut BytesMut) -> crate::Result<Option<ChanCell>> {
        if src.len() < 7 {
            // Smallest possible frame: varcell with length 0.
            return Ok(None);
        }
        let cmd: ChanCmd = src[4].into();
        let varcell = cmd.is_var_cell();
        let cell_len: usize = if varcell {
            let msg_len = u16::from_be_bytes(*array_ref![&src[5..7], 0, 2]);
            msg_len as usize + 7
        } else {
            514
        };
        if src.len() < cell_len {
            return Ok(None);
        }

        let cell = src.split_to(cell_len).freeze();
        let mut r = Reader::from_slice(&cell);
        let circid: CircId = r.take_u32()?.into();
        r.advance(if varcell { 3 } else { 1 })?;
        let msg = msg::ChanMsg::take(&mut r, cmd)?;

        if !cmd.accepts_circid_val(circid) {
            return Err(Error::ChanProto(format!(
                "Invalid circuit ID {} for cell command {}",
                circid, cmd
            )));
        }
        Ok(Some(ChanCell { circid, msg }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    fn decode_all(body: &[u8]) -> (Vec<ChanCell>, BytesMut) {
        let mut codec = ChannelCodec::new(4);
        let mut buf = BytesMut::from(body);
        let mut cells = Vec::new();
        while let Some(cell) = codec.decode_cell(&mut buf).unwrap() {
            cells.push(cell);
        }
        (cells, buf)
    }

    #[test]
    fn fixed_cell_roundtrip() {
        let mut codec = ChannelCodec::new(4);
        let mut buf = BytesMut::new();
        let cell = ChanCell::new(
            0x8000_0001.into(),
            msg::Create2::new(0x0002, &b"hello"[..]).into(),
        );
        codec.write_cell(cell, &mut buf).unwrap();
        assert_eq!(buf.len(), 514);

        let (cells, rest) = decode_all(&buf);
        assert_eq!(cells.len(), 1);
        assert!(rest.is_empty());
        assert_eq!(u32::from(cells[0].circid()), 0x8000_0001);
        match cells[0].msg() {
            msg::ChanMsg::Create2(c) => {
                assert_eq!(c.handshake_type(), 0x0002);
                assert_eq!(c.body(), b"hello");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn var_cell_and_leftover() {
        // A VPADDING cell with three bytes of padding, followed by the
        // start of another frame.
        let mut body = hex!("00000000 80 0003 FF FF FF").to_vec();
        body.extend_from_slice(&hex!("00000000 81"));
        let (cells, rest) = decode_all(&body);
        assert_eq!(cells.len(), 1);
        assert!(matches!(cells[0].msg(), msg::ChanMsg::VPadding(_)));
        // The partial second frame is left in the buffer.
        assert_eq!(rest.len(), 5);
    }

    #[test]
    fn truncated_needs_more() {
        let mut codec = ChannelCodec::new(4);
        let mut buf = BytesMut::from(&hex!("00000001 03 0102")[..]);
        // A fixed-length cell needs 514 bytes; we only have 7.
        assert!(codec.decode_cell(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn unknown_command_is_surfaced() {
        // Command 0xf0 is variable-length (>= 128) but unknown.
        let body = hex!("00000000 F0 0002 AABB");
        let (cells, rest) = decode_all(&body);
        assert_eq!(cells.len(), 1);
        assert!(rest.is_empty());
        match cells[0].msg() {
            msg::ChanMsg::Unrecognized(_) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bad_circid_rejected() {
        // A CREATED2 cell must not use circuit ID zero.
        let mut cell = vec![0_u8; 514];
        cell[4] = 11; // CREATED2
        let mut codec = ChannelCodec::new(4);
        let mut buf = BytesMut::from(&cell[..]);
        assert!(codec.decode_cell(&mut buf).is_err());
    }
}
