//! Encoding and decoding for relay messages
//!
//! Relay messages are sent along circuits, inside RELAY or
//! RELAY_EARLY cells.

use super::RelayCmd;
use crate::chancell::msg::DestroyReason;
use crate::linkspec::LinkSpec;
use caret::caret_int;
use garlic_bytes::{Error, Result};
use garlic_bytes::{Readable, Reader, Writer};
use std::net::IpAddr;

/// A single parsed relay message, sent or received along a circuit
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum RelayMsg {
    /// Create a stream
    Begin(Begin),
    /// Send data on a stream
    Data(Data),
    /// Close a stream
    End(End),
    /// Successful response to a Begin message
    Connected(Connected),
    /// For flow control
    Sendme(Sendme),
    /// Extend a circuit to a new hop
    Extend2(Extend2),
    /// Successful response to an Extend2 message
    Extended2(Extended2),
    /// Tell the client that a circuit has been partially closed
    Truncated(Truncated),
    /// Used for padding
    Drop,
    /// Start a directory stream
    BeginDir,
    /// Establish this client's side of a rendezvous
    EstablishRendezvous(EstablishRendezvous),
    /// Acknowledge an ESTABLISH_RENDEZVOUS request
    RendezvousEstablished,
    /// Introduce this client to an onion service
    Introduce1(Introduce1),
    /// Response to an INTRODUCE1 request
    IntroduceAck(IntroduceAck),
    /// Final message of the rendezvous protocol, relayed from the service
    Rendezvous2(Rendezvous2),
    /// Response to a padding negotiation request; ignored
    PaddingNegotiated(Unrecognized),

    /// An unrecognized command.
    Unrecognized(Unrecognized),
}

/// Internal: traits in common for all relay message bodies.
pub trait Body: Sized {
    /// Convert this type into a RelayMsg, wrapped appropriately.
    fn as_message(self) -> RelayMsg;
    /// Decode a relay cell body from a provided reader.
    fn decode_from_reader(r: &mut Reader<'_>) -> Result<Self>;
    /// Encode the body of this cell into the end of a vec.
    fn encode_onto(self, w: &mut Vec<u8>);
}

impl<B: Body> From<B> for RelayMsg {
    fn from(b: B) -> RelayMsg {
        b.as_message()
    }
}

impl RelayMsg {
    /// Return the command associated with this message.
    pub fn cmd(&self) -> RelayCmd {
        use RelayMsg::*;
        match self {
            Begin(_) => RelayCmd::BEGIN,
            Data(_) => RelayCmd::DATA,
            End(_) => RelayCmd::END,
            Connected(_) => RelayCmd::CONNECTED,
            Sendme(_) => RelayCmd::SENDME,
            Extend2(_) => RelayCmd::EXTEND2,
            Extended2(_) => RelayCmd::EXTENDED2,
            Truncated(_) => RelayCmd::TRUNCATED,
            Drop => RelayCmd::DROP,
            BeginDir => RelayCmd::BEGIN_DIR,
            EstablishRendezvous(_) => RelayCmd::ESTABLISH_RENDEZVOUS,
            RendezvousEstablished => RelayCmd::RENDEZVOUS_ESTABLISHED,
            Introduce1(_) => RelayCmd::INTRODUCE1,
            IntroduceAck(_) => RelayCmd::INTRODUCE_ACK,
            Rendezvous2(_) => RelayCmd::RENDEZVOUS2,
            PaddingNegotiated(_) => RelayCmd::PADDING_NEGOTIATED,
            Unrecognized(u) => u.cmd(),
        }
    }
    /// Extract the body of this message from `r`
    pub fn decode_from_reader(c: RelayCmd, r: &mut Reader<'_>) -> Result<Self> {
        Ok(match c {
            RelayCmd::BEGIN => RelayMsg::Begin(Begin::decode_from_reader(r)?),
            RelayCmd::DATA => RelayMsg::Data(Data::decode_from_reader(r)?),
            RelayCmd::END => RelayMsg::End(End::decode_from_reader(r)?),
            RelayCmd::CONNECTED => RelayMsg::Connected(Connected::decode_from_reader(r)?),
            RelayCmd::SENDME => RelayMsg::Sendme(Sendme::decode_from_reader(r)?),
            RelayCmd::EXTEND2 => RelayMsg::Extend2(Extend2::decode_from_reader(r)?),
            RelayCmd::EXTENDED2 => RelayMsg::Extended2(Extended2::decode_from_reader(r)?),
            RelayCmd::TRUNCATED => RelayMsg::Truncated(Truncated::decode_from_reader(r)?),
            RelayCmd::DROP => RelayMsg::Drop,
            RelayCmd::BEGIN_DIR => RelayMsg::BeginDir,
            RelayCmd::ESTABLISH_RENDEZVOUS => {
                RelayMsg::EstablishRendezvous(EstablishRendezvous::decode_from_reader(r)?)
            }
            RelayCmd::RENDEZVOUS_ESTABLISHED => RelayMsg::RendezvousEstablished,
            RelayCmd::INTRODUCE1 => RelayMsg::Introduce1(Introduce1::decode_from_reader(r)?),
            RelayCmd::INTRODUCE_ACK => {
                RelayMsg::IntroduceAck(IntroduceAck::decode_from_reader(r)?)
            }
            RelayCmd::RENDEZVOUS2 => RelayMsg::Rendezvous2(Rendezvous2::decode_from_reader(r)?),
            RelayCmd::PADDING_NEGOTIATED => {
                RelayMsg::PaddingNegotiated(Unrecognized::decode_with_cmd(c, r)?)
            }
            _ => RelayMsg::Unrecognized(Unrecognized::decode_with_cmd(c, r)?),
        })
    }
    /// Encode the body of this message, not including command or length
    pub fn encode_onto(self, w: &mut Vec<u8>) {
        use RelayMsg::*;
        match self {
            Begin(b) => b.encode_onto(w),
            Data(b) => b.encode_onto(w),
            End(b) => b.encode_onto(w),
            Connected(b) => b.encode_onto(w),
            Sendme(b) => b.encode_onto(w),
            Extend2(b) => b.encode_onto(w),
            Extended2(b) => b.encode_onto(w),
            Truncated(b) => b.encode_onto(w),
            Drop => (),
            BeginDir => (),
            EstablishRendezvous(b) => b.encode_onto(w),
            RendezvousEstablished => (),
            Introduce1(b) => b.encode_onto(w),
            IntroduceAck(b) => b.encode_onto(w),
            Rendezvous2(b) => b.encode_onto(w),
            PaddingNegotiated(b) => b.encode_onto(w),
            Unrecognized(b) => b.encode_onto(w),
        }
    }

    /// Return true if this message is counted by the delivery windows.
    ///
    /// Only DATA moves the windows.
    pub fn counts_towards_windows(&self) -> bool {
        matches!(self, RelayMsg::Data(_))
    }
}

/// Message to create a new stream.
#[derive(Debug, Clone)]
pub struct Begin {
    /// Ascii string describing target address.
    addr: Vec<u8>,
    /// Target port.
    port: u16,
    /// Flags that describe how to resolve the address.
    flags: u32,
}
impl Begin {
    /// Construct a new Begin cell.
    pub fn new(addr: &str, port: u16, flags: u32) -> crate::Result<Self> {
        if !addr.is_ascii() {
            return Err(crate::Error::BadStreamAddress);
        }
        Ok(Begin {
            addr: addr.as_bytes().into(),
            port,
            flags,
        })
    }
}

impl Body for Begin {
    fn as_message(self) -> RelayMsg {
        RelayMsg::Begin(self)
    }
    fn decode_from_reader(r: &mut Reader<'_>) -> Result<Self> {
        let addr = r.take_until(b':')?;
        let port = r.take_until(0)?;
        let flags = if r.remaining() >= 4 { r.take_u32()? } else { 0 };

        if !addr.is_ascii() {
            return Err(Error::BadMessage("target address in begin cell not ascii"));
        }

        let port = std::str::from_utf8(port)
            .map_err(|_| Error::BadMessage("port in begin cell not utf8"))?;
        let port = port
            .parse()
            .map_err(|_| Error::BadMessage("port in begin cell not a valid port"))?;

        Ok(Begin {
            addr: addr.into(),
            port,
            flags,
        })
    }
    fn encode_onto(self, w: &mut Vec<u8>) {
        w.write_all(&self.addr[..]);
        w.write_u8(b':');
        w.write_all(self.port.to_string().as_bytes());
        w.write_u8(0);
        if self.flags != 0 {
            w.write_u32(self.flags);
        }
    }
}

/// Data on a stream.
#[derive(Debug, Clone)]
pub struct Data {
    /// The data payload.
    body: Vec<u8>,
}
impl Data {
    /// The longest allowable body length for a single data cell.
    pub const MAXLEN: usize = crate::chancell::CELL_DATA_LEN - 11;

    /// Construct a new data cell.
    ///
    /// Returns an error if `inp` is longer than [`Data::MAXLEN`] bytes.
    pub fn new(inp: &[u8]) -> crate::Result<Self> {
        if inp.len() > Data::MAXLEN {
            return Err(crate::Error::CantEncode);
        }
        Ok(Data { body: inp.into() })
    }
}
impl From<Data> for Vec<u8> {
    fn from(data: Data) -> Vec<u8> {
        data.body
    }
}
impl AsRef<[u8]> for Data {
    fn as_ref(&self) -> &[u8] {
        &self.body[..]
    }
}

impl Body for Data {
    fn as_message(self) -> RelayMsg {
        RelayMsg::Data(self)
    }
    fn decode_from_reader(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Data {
            body: r.take(r.remaining())?.into(),
        })
    }
    fn encode_onto(mut self, w: &mut Vec<u8>) {
        w.append(&mut self.body);
    }
}

caret_int! {
    /// A declared reason for closing a stream.
    pub struct EndReason(u8) {
        /// Closing a stream because of an unspecified reason.
        ///
        /// This is the only END reason that clients send.
        MISC = 1,
        /// Couldn't look up hostname.
        RESOLVEFAILED = 2,
        /// Remote host refused connection.
        CONNECTREFUSED = 3,
        /// Relay refuses to connect to host or port.
        EXITPOLICY = 4,
        /// Circuit is being destroyed.
        DESTROY = 5,
        /// Anonymized TCP connection was closed.
        DONE = 6,
        /// Connection timed out, or relay gave up on the connection.
        TIMEOUT = 7,
        /// No route to target destination.
        NOROUTE = 8,
        /// Relay is entering hibernation.
        HIBERNATING = 9,
        /// Internal error at the relay.
        INTERNAL = 10,
        /// Ran out of resources to fulfill requests.
        RESOURCELIMIT = 11,
        /// Connection unexpectedly reset.
        CONNRESET = 12,
        /// Violation of the onion-routing protocol.
        TORPROTOCOL = 13,
        /// BEGIN_DIR cell at a relay that isn't a directory.
        NOTDIRECTORY = 14,
    }
}

/// Closing a stream.
#[derive(Debug, Clone)]
pub struct End {
    /// Why the stream is closing.
    reason: EndReason,
    /// The address of the stream target, if this is an EXITPOLICY end.
    addr: Option<(IpAddr, u32)>,
}
impl End {
    /// Make a new END_REASON_MISC message.
    ///
    /// Clients send this every time they decide to close a stream.
    pub fn new_misc() -> Self {
        End {
            reason: EndReason::MISC,
            addr: None,
        }
    }
    /// Make a new END message with the provided end reason.
    pub fn new_with_reason(reason: EndReason) -> Self {
        End { reason, addr: None }
    }
    /// Return the provided EndReason for this End cell.
    pub fn reason(&self) -> EndReason {
        self.reason
    }
}
impl Body for End {
    fn as_message(self) -> RelayMsg {
        RelayMsg::End(self)
    }
    fn decode_from_reader(r: &mut Reader<'_>) -> Result<Self> {
        if r.remaining() == 0 {
            return Ok(End {
                reason: EndReason::MISC,
                addr: None,
            });
        }
        let reason: EndReason = r.take_u8()?.into();
        if reason == EndReason::EXITPOLICY {
            let addr = match r.remaining() {
                8 => IpAddr::V4(r.extract()?),
                20 => IpAddr::V6(r.extract()?),
                _ => {
                    // Ignores other message lengths.
                    return Ok(End { reason, addr: None });
                }
            };
            let ttl = r.take_u32()?;
            Ok(End {
                reason,
                addr: Some((addr, ttl)),
            })
        } else {
            Ok(End { reason, addr: None })
        }
    }
    fn encode_onto(self, w: &mut Vec<u8>) {
        w.write_u8(self.reason.into());
        if let (EndReason::EXITPOLICY, Some((addr, ttl))) = (self.reason, self.addr) {
            match addr {
                IpAddr::V4(v4) => w.write(&v4),
                IpAddr::V6(v6) => w.write(&v6),
            }
            w.write_u32(ttl);
        }
    }
}

/// Successful response to a Begin message.
#[derive(Debug, Clone)]
pub struct Connected {
    /// Resolved address of the stream target, if provided.
    addr: Option<(IpAddr, u32)>,
}
impl Connected {
    /// Construct a new empty connected cell.
    pub fn new_empty() -> Self {
        Connected { addr: None }
    }
}
impl Body for Connected {
    fn as_message(self) -> RelayMsg {
        RelayMsg::Connected(self)
    }
    fn decode_from_reader(r: &mut Reader<'_>) -> Result<Self> {
        if r.remaining() == 0 {
            return Ok(Connected { addr: None });
        }
        let ipv4 = r.take_u32()?;
        let addr = if ipv4 == 0 {
            if r.take_u8()? != 6 {
                return Ok(Connected { addr: None });
            }
            IpAddr::V6(r.extract()?)
        } else {
            IpAddr::V4(ipv4.into())
        };
        let ttl = r.take_u32()?;

        Ok(Connected {
            addr: Some((addr, ttl)),
        })
    }
    fn encode_onto(self, w: &mut Vec<u8>) {
        if let Some((addr, ttl)) = self.addr {
            match addr {
                IpAddr::V4(v4) => w.write(&v4),
                IpAddr::V6(v6) => {
                    w.write_u32(0);
                    w.write_u8(6);
                    w.write(&v6);
                }
            }
            w.write_u32(ttl);
        }
    }
}

/// Used for flow control to increase the flow control window.
#[derive(Debug, Clone)]
pub struct Sendme {
    /// A tag value authenticating the previously received data.
    digest: Option<Vec<u8>>,
}
impl Sendme {
    /// Return a new empty sendme cell.
    ///
    /// This format is used on streams.
    pub fn new_empty() -> Self {
        Sendme { digest: None }
    }
    /// This format is used on circuits: the tag is the current value
    /// of the backward digest for the hop.
    pub fn new_tag(x: Vec<u8>) -> Self {
        Sendme { digest: Some(x) }
    }
    /// Consume this cell and return its authentication tag, if any.
    pub fn into_tag(self) -> Option<Vec<u8>> {
        self.digest
    }
}
impl Body for Sendme {
    fn as_message(self) -> RelayMsg {
        RelayMsg::Sendme(self)
    }
    fn decode_from_reader(r: &mut Reader<'_>) -> Result<Self> {
        let digest = if r.remaining() == 0 {
            None
        } else {
            let ver = r.take_u8()?;
            match ver {
                0 => None,
                1 => {
                    let dlen = r.take_u16()?;
                    Some(r.take(dlen as usize)?.into())
                }
                _ => None,
            }
        };
        Ok(Sendme { digest })
    }
    fn encode_onto(self, w: &mut Vec<u8>) {
        match self.digest {
            None => (),
            Some(mut x) => {
                w.write_u8(1);
                w.write_u16(x.len() as u16);
                w.append(&mut x);
            }
        }
    }
}

/// Extend the circuit to a new hop.
#[derive(Debug, Clone)]
pub struct Extend2 {
    /// A vector of "link specifiers" telling the last relay in the
    /// circuit how to find the new hop.
    linkspec: Vec<LinkSpec>,
    /// Type of handshake to be used.
    handshake_type: u16,
    /// Body of the handshake to be sent.
    handshake: Vec<u8>,
}
impl Extend2 {
    /// Create a new Extend2 cell.
    pub fn new(mut linkspec: Vec<LinkSpec>, handshake_type: u16, handshake: Vec<u8>) -> Self {
        linkspec.sort_by_key(LinkSpec::sort_pos);
        Extend2 {
            linkspec,
            handshake_type,
            handshake,
        }
    }
    /// Return the body of this handshake.
    pub fn handshake(&self) -> &[u8] {
        &self.handshake[..]
    }
}

impl Body for Extend2 {
    fn as_message(self) -> RelayMsg {
        RelayMsg::Extend2(self)
    }
    fn decode_from_reader(r: &mut Reader<'_>) -> Result<Self> {
        let n = r.take_u8()?;
        let linkspec = r.extract_n(n as usize)?;
        let handshake_type = r.take_u16()?;
        let hlen = r.take_u16()?;
        let handshake = r.take(hlen as usize)?.into();
        Ok(Extend2 {
            linkspec,
            handshake_type,
            handshake,
        })
    }
    fn encode_onto(self, w: &mut Vec<u8>) {
        assert!(self.linkspec.len() <= u8::MAX as usize);
        assert!(self.handshake.len() <= u16::MAX as usize);
        w.write_u8(self.linkspec.len() as u8);
        for ls in self.linkspec.iter() {
            w.write(ls);
        }
        w.write_u16(self.handshake_type);
        w.write_u16(self.handshake.len() as u16);
        w.write_all(&self.handshake[..]);
    }
}

/// Successful reply to an Extend2.
#[derive(Debug, Clone)]
pub struct Extended2 {
    /// Body of the handshake reply.
    handshake: Vec<u8>,
}
impl Extended2 {
    /// Construct a new Extended2 message with the provided handshake.
    pub fn new(handshake: Vec<u8>) -> Self {
        Extended2 { handshake }
    }
    /// Consume this extended2 cell and return its body.
    pub fn into_body(self) -> Vec<u8> {
        self.handshake
    }
}
impl Body for Extended2 {
    fn as_message(self) -> RelayMsg {
        RelayMsg::Extended2(self)
    }
    fn decode_from_reader(r: &mut Reader<'_>) -> Result<Self> {
        let hlen = r.take_u16()?;
        let handshake = r.take(hlen as usize)?;
        Ok(Extended2 {
            handshake: handshake.into(),
        })
    }
    fn encode_onto(self, w: &mut Vec<u8>) {
        assert!(self.handshake.len() <= u16::MAX as usize);
        w.write_u16(self.handshake.len() as u16);
        w.write_all(&self.handshake[..]);
    }
}

/// The remaining hops of this circuit have gone away.
#[derive(Debug, Clone)]
pub struct Truncated {
    /// Reason for which this circuit was truncated.
    reason: DestroyReason,
}
impl Truncated {
    /// Construct a new truncated message.
    pub fn new(reason: DestroyReason) -> Self {
        Truncated { reason }
    }
    /// Return the provided reason for truncating the circuit.
    pub fn reason(&self) -> DestroyReason {
        self.reason
    }
}
impl Body for Truncated {
    fn as_message(self) -> RelayMsg {
        RelayMsg::Truncated(self)
    }
    fn decode_from_reader(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Truncated {
            reason: r.take_u8()?.into(),
        })
    }
    fn encode_onto(self, w: &mut Vec<u8>) {
        w.write_u8(self.reason.into());
    }
}

/// Length of a rendezvous cookie.
pub const REND_COOKIE_LEN: usize = 20;

/// Establish a rendezvous point on the current circuit.
///
/// The last relay on the circuit remembers the cookie, and will later
/// join this circuit to the one on which the service sends its
/// RENDEZVOUS1.
#[derive(Debug, Clone)]
pub struct EstablishRendezvous {
    /// The rendezvous cookie chosen by this client.
    cookie: [u8; REND_COOKIE_LEN],
}
impl EstablishRendezvous {
    /// Construct a new establish-rendezvous message with a given cookie.
    pub fn new(cookie: [u8; REND_COOKIE_LEN]) -> Self {
        EstablishRendezvous { cookie }
    }
}
impl Body for EstablishRendezvous {
    fn as_message(self) -> RelayMsg {
        RelayMsg::EstablishRendezvous(self)
    }
    fn decode_from_reader(r: &mut Reader<'_>) -> Result<Self> {
        let cookie = r.extract()?;
        Ok(EstablishRendezvous { cookie })
    }
    fn encode_onto(self, w: &mut Vec<u8>) {
        w.write_all(&self.cookie[..]);
    }
}

/// Introduce this client to an onion service.
///
/// The body is built elsewhere (it interleaves plaintext framing with
/// hs-ntor encryption), so we treat it as opaque here.
#[derive(Debug, Clone)]
pub struct Introduce1 {
    /// The fully assembled INTRODUCE1 body.
    body: Vec<u8>,
}
impl Introduce1 {
    /// Wrap an assembled introduction request as a message.
    pub fn new(body: Vec<u8>) -> Self {
        Introduce1 { body }
    }
}
impl Body for Introduce1 {
    fn as_message(self) -> RelayMsg {
        RelayMsg::Introduce1(self)
    }
    fn decode_from_reader(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Introduce1 {
            body: r.take(r.remaining())?.into(),
        })
    }
    fn encode_onto(mut self, w: &mut Vec<u8>) {
        w.append(&mut self.body);
    }
}

caret_int! {
    /// The status code of an INTRODUCE_ACK message.
    pub struct IntroAckStatus(u16) {
        /// The introduction was relayed to the service.
        SUCCESS = 0,
        /// The introduction point does not recognize the service.
        FAILURE = 1,
        /// The INTRODUCE1 message was malformed.
        BAD_MESSAGE = 2,
        /// The introduction point could not relay the message.
        CANNOT_RELAY = 3,
    }
}

/// Response from the introduction point to an INTRODUCE1 request.
#[derive(Debug, Clone)]
pub struct IntroduceAck {
    /// Whether the introduction was relayed.
    status: IntroAckStatus,
}
impl IntroduceAck {
    /// Return the status code of this acknowledgement.
    pub fn status(&self) -> IntroAckStatus {
        self.status
    }
}
impl Body for IntroduceAck {
    fn as_message(self) -> RelayMsg {
        RelayMsg::IntroduceAck(self)
    }
    fn decode_from_reader(r: &mut Reader<'_>) -> Result<Self> {
        let status = r.take_u16()?.into();
        // Any extensions that follow are ignored.
        Ok(IntroduceAck { status })
    }
    fn encode_onto(self, w: &mut Vec<u8>) {
        w.write_u16(self.status.into());
        w.write_u8(0); // no extensions
    }
}

/// Final message of the rendezvous protocol, relayed to this client
/// by the rendezvous point.
///
/// Carries the service's side of the hs-ntor handshake (its public
/// key and auth tag).
#[derive(Debug, Clone)]
pub struct Rendezvous2 {
    /// The service's handshake reply.
    handshake: Vec<u8>,
}
impl Rendezvous2 {
    /// Consume this message and return the service's handshake.
    pub fn into_body(self) -> Vec<u8> {
        self.handshake
    }
}
impl Body for Rendezvous2 {
    fn as_message(self) -> RelayMsg {
        RelayMsg::Rendezvous2(self)
    }
    fn decode_from_reader(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Rendezvous2 {
            handshake: r.take(r.remaining())?.into(),
        })
    }
    fn encode_onto(mut self, w: &mut Vec<u8>) {
        w.append(&mut self.handshake);
    }
}

/// A relay message that we didn't recognize.
#[derive(Debug, Clone)]
pub struct Unrecognized {
    /// Command that we didn't recognize.
    cmd: RelayCmd,
    /// Body associated with that command.
    body: Vec<u8>,
}

impl Unrecognized {
    /// Return the command associated with this message.
    pub fn cmd(&self) -> RelayCmd {
        self.cmd
    }
    /// Decode this message, using a provided command.
    pub fn decode_with_cmd(cmd: RelayCmd, r: &mut Reader<'_>) -> Result<Self> {
        let mut r = Unrecognized::decode_from_reader(r)?;
        r.cmd = cmd;
        Ok(r)
    }
}

impl Body for Unrecognized {
    fn as_message(self) -> RelayMsg {
        RelayMsg::Unrecognized(self)
    }
    fn decode_from_reader(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Unrecognized {
            cmd: 0.into(),
            body: r.take(r.remaining())?.into(),
        })
    }
    fn encode_onto(mut self, w: &mut Vec<u8>) {
        w.append(&mut self.body);
    }
}
