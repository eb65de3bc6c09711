//! Implementations for the channel handshake.

use arrayref::array_ref;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;

use super::codec::CellCodec;
use crate::{Error, Result};
use garlic_bytes::Reader;
use garlic_cell::chancell::{msg, ChanCmd};

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, trace};

/// A list of the link protocols that we support.
//
// We only support version 4, since we don't do padding right.
static LINK_PROTOCOLS: &[u16] = &[4];

/// The framed transport used for cells once versions are negotiated.
type CellFrame<T> = Framed<T, CellCodec>;

/// Establish a TLS connection to the relay at `addr`, suitable for
/// running a channel handshake over.
///
/// The peer certificate is deliberately accepted without
/// verification; relays are authenticated by the circuit handshakes
/// instead.
pub async fn tls_connect(
    addr: SocketAddr,
) -> Result<tokio_native_tls::TlsStream<tokio::net::TcpStream>> {
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()?;
    let connector = tokio_native_tls::TlsConnector::from(connector);

    debug!("negotiating TLS with {}", addr);
    let tcp = tokio::net::TcpStream::connect(addr).await?;
    let tls = connector.connect("ignored", tcp).await?;
    Ok(tls)
}

/// Launch a new client handshake over a TLS stream.
///
/// After calling this function, call `connect()` on the result to
/// negotiate versions and read the relay's side of the handshake,
/// then `finish()` on _that_ to get a working channel.
pub fn start_client_handshake<T>(
    tls: T,
    target_addr: Option<SocketAddr>,
) -> OutboundClientHandshake<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    OutboundClientHandshake { tls, target_addr }
}

/// A raw client channel on which nothing has been done.
pub struct OutboundClientHandshake<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> {
    /// Underlying TLS stream.
    ///
    /// (We don't enforce that this is actually TLS, but if it isn't,
    /// the connection won't be secure.)
    tls: T,
    /// Declared target for this stream, if any; used to fill in the
    /// NETINFO cell.
    target_addr: Option<SocketAddr>,
}

/// A client channel on which versions have been negotiated and the
/// relay's side of the handshake has been read, but where we have not
/// yet sent our NETINFO.
pub struct NegotiatedChannel<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> {
    /// The negotiated link protocol.  Must be a member of
    /// LINK_PROTOCOLS.
    link_protocol: u16,
    /// The source/sink on which we're reading and writing cells.
    frame: CellFrame<T>,
    /// Declared target for this stream, if any.
    target_addr: Option<SocketAddr>,
}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> OutboundClientHandshake<T> {
    /// Negotiate a link protocol version with the relay, and read the
    /// relay's handshake information: its VERSIONS cell, then CERTS,
    /// an optional AUTH_CHALLENGE, and NETINFO, in that order.
    ///
    /// The contents of the CERTS cell are deliberately not verified.
    pub async fn connect(mut self) -> Result<NegotiatedChannel<T>> {
        match self.target_addr {
            Some(addr) => debug!("starting channel handshake with {}", addr),
            None => debug!("starting channel handshake"),
        }

        // Send our versions cell.  It uses the obsolete 2-byte
        // circuit ID, so it can't go through the cell codec.
        {
            let my_versions = msg::Versions::new(LINK_PROTOCOLS)?;
            self.tls
                .write_all(&my_versions.encode_for_handshake())
                .await?;
            self.tls.flush().await?;
        }

        // Get the relay's versions cell.
        trace!("waiting for versions");
        let their_versions: msg::Versions = {
            let mut hdr = [0_u8; 5];
            self.tls.read_exact(&mut hdr).await?;
            if hdr[0..3] != [0, 0, ChanCmd::VERSIONS.into()] {
                return Err(Error::ChanProto("Doesn't seem to be an onion router".into()));
            }
            let msglen = u16::from_be_bytes(*array_ref![hdr, 3, 2]);
            let mut msg = vec![0; msglen as usize];
            self.tls.read_exact(&mut msg).await?;
            let mut reader = Reader::from_slice(&msg);
            reader.extract()?
        };
        trace!("received {:?}", their_versions);

        let link_protocol = their_versions
            .best_shared_link_protocol(LINK_PROTOCOLS)
            .ok_or_else(|| Error::ChanProto("No shared link protocols".into()))?;
        trace!("negotiated version {}", link_protocol);

        // Now we can switch to cell framing.
        let mut frame = Framed::new(self.tls, CellCodec::new(link_protocol));

        // Read until we have the netinfo cell, enforcing the expected
        // order and rejecting duplicates.
        let mut certs: Option<msg::Certs> = None;
        let mut netinfo: Option<msg::Netinfo> = None;
        let mut seen_authchallenge = false;

        trace!("waiting for rest of handshake");
        while let Some(m) = frame.next().await {
            use msg::ChanMsg::*;
            let (_, m) = m?.into_circid_and_msg();
            trace!("received a {} cell", m.cmd());
            match m {
                // Padding gets ignored.
                Padding(_) | VPadding(_) => (),
                // Unrecognized cells get ignored too.
                Unrecognized(_) => (),
                AuthChallenge(_) => {
                    if certs.is_none() {
                        return Err(Error::ChanProto(
                            "AUTH_CHALLENGE before CERTS cell".into(),
                        ));
                    }
                    if seen_authchallenge {
                        return Err(Error::ChanProto("Duplicate AUTH_CHALLENGE cell".into()));
                    }
                    seen_authchallenge = true;
                }
                Certs(c) => {
                    if certs.is_some() {
                        return Err(Error::ChanProto("Duplicate CERTS cell".into()));
                    }
                    certs = Some(c);
                }
                Netinfo(n) => {
                    if certs.is_none() {
                        return Err(Error::ChanProto("NETINFO before CERTS cell".into()));
                    }
                    netinfo = Some(n);
                    break;
                }
                // No other cell types are allowed.
                m => {
                    return Err(Error::ChanProto(format!(
                        "Unexpected cell type {}",
                        m.cmd()
                    )))
                }
            }
        }

        match (certs, netinfo) {
            (Some(_), None) => Err(Error::ChanProto("Missing netinfo or closed stream".into())),
            (None, _) => Err(Error::ChanProto("Missing certs cell".into())),
            (Some(certs_cell), Some(_netinfo_cell)) => {
                trace!(
                    "received handshake ({} certificates, unchecked)",
                    certs_cell.n_certs()
                );
                Ok(NegotiatedChannel {
                    link_protocol,
                    frame,
                    target_addr: self.target_addr,
                })
            }
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> NegotiatedChannel<T> {
    /// Send a NETINFO cell to the relay to finish the handshake, and
    /// create an open channel and its reactor.
    ///
    /// The channel is used to send cells and to create the circuit;
    /// the reactor must be spawned to route incoming cells.
    pub async fn finish(
        mut self,
    ) -> Result<(
        Arc<super::Channel>,
        super::Reactor<futures::stream::SplitStream<CellFrame<T>>>,
    )> {
        trace!("sending netinfo cell");
        let netinfo = msg::Netinfo::for_client(self.target_addr.as_ref().map(SocketAddr::ip));
        self.frame.send(netinfo.into()).await?;

        debug!("channel handshake completed");

        let (sink, stream) = self.frame.split();
        Ok(super::Channel::new(
            self.link_protocol,
            Box::pin(sink),
            stream,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    const VERSIONS: &[u8] = &hex!("0000 07 0006 0003 0004 0005");
    // no certificates in this cell, but connect() doesn't care.
    const NOCERTS: &[u8] = &hex!("00000000 81 0001 00");
    const NETINFO_PREFIX: &[u8] = &hex!(
        "00000000 08 085F9067F7
         04 04 7f 00 00 02
         01
         04 04 7f 00 00 03"
    );
    const AUTHCHALLENGE: &[u8] = &hex!(
        "00000000 82 0026
         FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF
         FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF
         0002 0003 00ff"
    );
    const VPADDING: &[u8] = &hex!("00000000 80 0003 FF FF FF");

    fn add_padded(buf: &mut Vec<u8>, cell: &[u8]) {
        let len_prev = buf.len();
        buf.extend_from_slice(cell);
        buf.resize(len_prev + 514, 0);
    }
    fn add_netinfo(buf: &mut Vec<u8>) {
        add_padded(buf, NETINFO_PREFIX);
    }

    async fn connect_from(input: &[u8]) -> Result<NegotiatedChannel<tokio::io::DuplexStream>> {
        let (client, mut server) = tokio::io::duplex(65536);
        let input = input.to_vec();
        let server_fut = async move {
            // Absorb whatever the client sends and play back a canned
            // handshake.
            let mut buf = [0_u8; 1024];
            let _ = server.read(&mut buf).await;
            server.write_all(&input[..]).await.unwrap();
            server.flush().await.unwrap();
            server
        };
        let hs = start_client_handshake(client, None);
        let (nego, _server) = futures::join!(hs.connect(), server_fut);
        nego
    }

    #[tokio::test]
    async fn connect_ok() {
        let mut buf = Vec::new();
        buf.extend_from_slice(VERSIONS);
        buf.extend_from_slice(NOCERTS);
        add_netinfo(&mut buf);
        let nego = connect_from(&buf).await.unwrap();
        assert_eq!(nego.link_protocol, 4);

        // Again with an authchallenge cell and some padding.
        let mut buf = Vec::new();
        buf.extend_from_slice(VERSIONS);
        buf.extend_from_slice(NOCERTS);
        buf.extend_from_slice(VPADDING);
        buf.extend_from_slice(AUTHCHALLENGE);
        buf.extend_from_slice(VPADDING);
        add_netinfo(&mut buf);
        let _nego = connect_from(&buf).await.unwrap();
    }

    async fn connect_err(input: &[u8]) -> Error {
        connect_from(input).await.err().unwrap()
    }

    #[tokio::test]
    async fn connect_badver() {
        let err = connect_err(&b"HTTP://"[..]).await;
        assert_eq!(
            format!("{}", err),
            "channel protocol violation: Doesn't seem to be an onion router"
        );

        let err = connect_err(&hex!("0000 07 0004 1234 ffff")[..]).await;
        assert_eq!(
            format!("{}", err),
            "channel protocol violation: No shared link protocols"
        );
    }

    #[tokio::test]
    async fn connect_duplicates() {
        let mut buf = Vec::new();
        buf.extend_from_slice(VERSIONS);
        buf.extend_from_slice(NOCERTS);
        buf.extend_from_slice(NOCERTS);
        add_netinfo(&mut buf);
        let err = connect_err(&buf).await;
        assert_eq!(
            format!("{}", err),
            "channel protocol violation: Duplicate CERTS cell"
        );

        let mut buf = Vec::new();
        buf.extend_from_slice(VERSIONS);
        buf.extend_from_slice(NOCERTS);
        buf.extend_from_slice(AUTHCHALLENGE);
        buf.extend_from_slice(AUTHCHALLENGE);
        add_netinfo(&mut buf);
        let err = connect_err(&buf).await;
        assert_eq!(
            format!("{}", err),
            "channel protocol violation: Duplicate AUTH_CHALLENGE cell"
        );
    }

    #[tokio::test]
    async fn connect_wrong_order() {
        // AUTH_CHALLENGE is not allowed before CERTS.
        let mut buf = Vec::new();
        buf.extend_from_slice(VERSIONS);
        buf.extend_from_slice(AUTHCHALLENGE);
        buf.extend_from_slice(NOCERTS);
        add_netinfo(&mut buf);
        let err = connect_err(&buf).await;
        assert_eq!(
            format!("{}", err),
            "channel protocol violation: AUTH_CHALLENGE before CERTS cell"
        );

        // And neither is NETINFO.
        let mut buf = Vec::new();
        buf.extend_from_slice(VERSIONS);
        add_netinfo(&mut buf);
        let err = connect_err(&buf).await;
        assert_eq!(
            format!("{}", err),
            "channel protocol violation: NETINFO before CERTS cell"
        );
    }

    #[tokio::test]
    async fn connect_misplaced_cell() {
        let mut buf = Vec::new();
        buf.extend_from_slice(VERSIONS);
        buf.extend_from_slice(NOCERTS);
        // here's a CREATED2 cell, which doesn't belong here.
        add_padded(&mut buf, &hex!("00000001 0b 0000")[..]);
        let err = connect_err(&buf).await;
        assert_eq!(
            format!("{}", err),
            "channel protocol violation: Unexpected cell type CREATED2"
        );
    }
}
