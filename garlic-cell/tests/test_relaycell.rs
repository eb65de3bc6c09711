//! Example relay messages to encode and decode.

use garlic_cell::relaycell::{msg, msg::RelayMsg, RelayCell, RelayCmd, StreamId};

/// Helper: a deterministic rng for cell padding.
fn seeded_rng() -> impl rand::Rng + rand::CryptoRng {
    use rand::SeedableRng;
    rand::rngs::StdRng::from_seed([0; 32])
}

fn decode(body: [u8; 509]) -> (StreamId, RelayMsg) {
    RelayCell::decode(body).unwrap().into_streamid_and_msg()
}

fn cell_roundtrip(id: StreamId, msg: RelayMsg) -> (StreamId, RelayMsg) {
    let mut rng = seeded_rng();
    let body = RelayCell::new(id, msg).encode(&mut rng).unwrap();
    assert_eq!(body.len(), 509);
    decode(body)
}

#[test]
fn test_begin() {
    let begin = msg::Begin::new("www.example.com", 443, 0).unwrap();
    let (id, m) = cell_roundtrip(7.into(), begin.into());
    assert_eq!(id, 7.into());
    assert_eq!(m.cmd(), RelayCmd::BEGIN);
}

#[test]
fn test_data_maxlen() {
    assert_eq!(msg::Data::MAXLEN, 498);
    let good = msg::Data::new(&[b'x'; 498]).unwrap();
    let (_, m) = cell_roundtrip(3.into(), good.into());
    match m {
        RelayMsg::Data(d) => assert_eq!(d.as_ref().len(), 498),
        other => panic!("unexpected {:?}", other),
    }
    assert!(msg::Data::new(&[b'x'; 499]).is_err());
}

#[test]
fn test_end_reasons() {
    use msg::EndReason;
    // The reason list is 1-indexed.
    assert_eq!(u8::from(EndReason::MISC), 1);
    assert_eq!(u8::from(EndReason::NOTDIRECTORY), 14);

    let end = msg::End::new_with_reason(EndReason::TIMEOUT);
    let (_, m) = cell_roundtrip(5.into(), end.into());
    match m {
        RelayMsg::End(e) => assert_eq!(e.reason(), EndReason::TIMEOUT),
        other => panic!("unexpected {:?}", other),
    }

    // Unknown reason codes survive decoding instead of erroring.
    let mut body = [0_u8; 509];
    body[0] = 3; // END
    body[4] = 1; // stream id 1
    body[10] = 1; // length 1
    body[11] = 99; // reason 99
    let (_, m) = decode(body);
    match m {
        RelayMsg::End(e) => assert_eq!(u8::from(e.reason()), 99),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_sendme_tag() {
    let tag = vec![0xAA_u8; 20];
    let sendme = msg::Sendme::new_tag(tag.clone());
    let (id, m) = cell_roundtrip(0.into(), sendme.into());
    assert!(id.is_zero());
    match m {
        RelayMsg::Sendme(s) => assert_eq!(s.into_tag(), Some(tag)),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_establish_rendezvous() {
    let cookie = [0x21_u8; 20];
    let est = msg::EstablishRendezvous::new(cookie);
    let (id, m) = cell_roundtrip(0.into(), est.into());
    assert!(id.is_zero());
    assert_eq!(m.cmd(), RelayCmd::ESTABLISH_RENDEZVOUS);
}

#[test]
fn test_introduce_ack_status() {
    // status 0x0003 (can't relay), no extensions
    let mut body = [0_u8; 509];
    body[0] = 40; // INTRODUCE_ACK
    body[10] = 3; // length 3
    body[11] = 0;
    body[12] = 3;
    body[13] = 0;
    let (_, m) = decode(body);
    match m {
        RelayMsg::IntroduceAck(ack) => {
            assert_eq!(ack.status(), msg::IntroAckStatus::CANNOT_RELAY);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_stream_id_requirements() {
    // DATA wants a nonzero stream ID; EXTEND2 wants zero.
    assert!(RelayCmd::DATA.accepts_streamid_val(2.into()));
    assert!(!RelayCmd::DATA.accepts_streamid_val(0.into()));
    assert!(RelayCmd::EXTEND2.accepts_streamid_val(0.into()));
    assert!(!RelayCmd::EXTEND2.accepts_streamid_val(2.into()));
    assert!(RelayCmd::SENDME.accepts_streamid_val(0.into()));
    assert!(RelayCmd::SENDME.accepts_streamid_val(2.into()));
}

#[test]
fn test_only_data_counts_towards_windows() {
    let data: RelayMsg = msg::Data::new(b"hi").unwrap().into();
    assert!(data.counts_towards_windows());
    let sendme: RelayMsg = msg::Sendme::new_empty().into();
    assert!(!sendme.counts_towards_windows());
    let connected: RelayMsg = msg::Connected::new_empty().into();
    assert!(!connected.counts_towards_windows());
}
