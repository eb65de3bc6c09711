//! Client-side rendezvous machinery.
//!
//! Reaching an onion service takes two circuits: a "client circuit"
//! ending at a rendezvous point (RP) of our choosing, and a
//! short-lived "introduction circuit" ending at one of the service's
//! introduction points.  We park a cookie at the RP, ask the
//! introduction point to relay the cookie (and our half of an hs-ntor
//! handshake) to the service, and wait for the service to show up at
//! the RP with its half.  When it does, the service becomes one more
//! hop at the end of the client circuit, and streams to it are
//! end-to-end encrypted.

use crate::circuit::ClientCirc;
use crate::crypto::cell::{ClientLayer, CryptInit, HsV3RelayCrypto};
use crate::crypto::handshake::hs_ntor;
use crate::{Error, Result};
use garlic_bytes::Writer;
use garlic_cell::linkspec::CircTarget;
use garlic_cell::relaycell::msg::{
    EstablishRendezvous, Introduce1, RelayMsg, IntroAckStatus, REND_COOKIE_LEN,
};
use garlic_cell::relaycell::RelayCmd;
use garlic_crypto::pk::{curve25519, ed25519};

use rand::{CryptoRng, Rng, RngCore};
use std::sync::Arc;
use tracing::{debug, trace};

/// Keys and secrets tying an introduction request to one service at
/// one introduction point, as learned from the service's descriptor.
#[derive(Clone)]
pub struct IntroMaterial {
    /// The service's authentication key at this introduction point.
    pub auth_key: ed25519::PublicKey,
    /// The service's encryption key at this introduction point.
    pub enc_key: curve25519::PublicKey,
    /// The service's subcredential for the current time period.
    pub subcredential: [u8; 32],
}

/// Run the whole client side of the rendezvous protocol.
///
/// `client_circ` must end at the chosen rendezvous point
/// `rend_point`; `intro_circ` must end at the introduction router
/// that `material` belongs to.  On success the service has been
/// appended to `client_circ` as its innermost hop, and the
/// introduction circuit has been shut down.
///
/// A rejected introduction surfaces as
/// [`Error::IntroduceRejected`]; callers use that signal to evict
/// the introduction point from their caches.
pub async fn connect_rendezvous<R, T>(
    rng: &mut R,
    client_circ: &Arc<ClientCirc>,
    intro_circ: &Arc<ClientCirc>,
    material: IntroMaterial,
    rend_point: &T,
) -> Result<()>
where
    R: Rng + CryptoRng,
    T: CircTarget,
{
    // 1. Park a cookie at the rendezvous point.
    let cookie = establish_rendezvous(rng, client_circ).await?;

    // 2. Get ready for the RENDEZVOUS2 *before* introducing: a fast
    //    service could answer before we get around to listening.
    let rend2_receiver = client_circ.register_meta_last_hop().await?;

    // 3. Introduce ourselves through the introduction circuit.
    let state = match introduce(rng, intro_circ, &material, rend_point, &cookie).await {
        Ok(state) => state,
        Err(e) => {
            intro_circ.terminate().await;
            return Err(e);
        }
    };

    // The introduction circuit has served its purpose.
    intro_circ.terminate().await;

    // 4. Wait for the service at the rendezvous point.
    trace!("waiting for RENDEZVOUS2");
    let reply = match rend2_receiver.await {
        Ok(Ok(m)) => m,
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(Error::CircuitClosed),
    };
    let handshake = match reply {
        RelayMsg::Rendezvous2(m) => m.into_body(),
        m => {
            client_circ.protocol_error().await;
            return Err(Error::CircProto(format!(
                "wanted RENDEZVOUS2; got {}",
                m.cmd()
            )));
        }
    };

    // 5. Complete the hs-ntor handshake and install the service as
    //    the innermost hop.
    let keygen = hs_ntor::client_receive_rend(&state, handshake)?;
    let layer = HsV3RelayCrypto::construct(keygen)?;
    let (layer_fwd, layer_back) = layer.split();
    client_circ
        .add_hop(Box::new(layer_fwd), Box::new(layer_back))
        .await?;

    debug!(
        "{}: rendezvous complete; service is now the last hop",
        client_circ.unique_id()
    );
    Ok(())
}

/// Choose a rendezvous cookie and park it at the last hop of
/// `circ`.
async fn establish_rendezvous<R>(
    rng: &mut R,
    circ: &Arc<ClientCirc>,
) -> Result<[u8; REND_COOKIE_LEN]>
where
    R: RngCore + CryptoRng,
{
    let mut cookie = [0_u8; REND_COOKIE_LEN];
    rng.fill_bytes(&mut cookie);

    let msg = EstablishRendezvous::new(cookie);
    circ.send_meta_and_wait(msg.into(), RelayCmd::RENDEZVOUS_ESTABLISHED)
        .await?;
    trace!("{}: rendezvous point established", circ.unique_id());
    Ok(cookie)
}

/// Send an INTRODUCE1 through `intro_circ` and wait for the
/// acknowledgement.  Returns the handshake state needed to finish
/// the rendezvous.
async fn introduce<R, T>(
    rng: &mut R,
    intro_circ: &Arc<ClientCirc>,
    material: &IntroMaterial,
    rend_point: &T,
    cookie: &[u8; REND_COOKIE_LEN],
) -> Result<hs_ntor::HsNtorClientState>
where
    R: Rng + CryptoRng,
    T: CircTarget,
{
    let header = introduce1_header(&material.auth_key);
    let plaintext = introduce1_plaintext(cookie, rend_point);

    let hs_input = hs_ntor::HsNtorClientInput {
        B: material.enc_key,
        auth_key: material.auth_key,
        subcredential: material.subcredential,
        plaintext,
        intro_cell_data: header.clone(),
    };
    let (state, trailer) = hs_ntor::client_send_intro(rng, &hs_input)?;

    let mut body = header;
    body.extend_from_slice(&trailer);

    let reply = intro_circ
        .send_meta_and_wait(Introduce1::new(body).into(), RelayCmd::INTRODUCE_ACK)
        .await?;
    let status = match reply {
        RelayMsg::IntroduceAck(ack) => ack.status(),
        m => {
            return Err(Error::CircProto(format!(
                "wanted INTRODUCE_ACK; got {}",
                m.cmd()
            )))
        }
    };
    if status != IntroAckStatus::SUCCESS {
        return Err(Error::IntroduceRejected(status));
    }
    trace!("{}: introduction acknowledged", intro_circ.unique_id());
    Ok(state)
}

/// Build the plaintext framing of an INTRODUCE1 message, up to the
/// start of the encrypted part:
///
/// ```text
///   LEGACY_KEY_ID   [20 zero bytes]
///   AUTH_KEY_TYPE   [1 byte: 2 = ed25519]
///   AUTH_KEY_LEN    [2 bytes]
///   AUTH_KEY        [32 bytes]
///   N_EXTENSIONS    [1 byte: 0]
/// ```
fn introduce1_header(auth_key: &ed25519::PublicKey) -> Vec<u8> {
    let mut w = Vec::new();
    w.write_zeros(20); // LEGACY_KEY_ID: unused.
    w.write_u8(2); // AUTH_KEY_TYPE: ed25519.
    w.write_u16(32); // AUTH_KEY_LEN.
    w.write(auth_key);
    w.write_u8(0); // N_EXTENSIONS.
    w
}

/// Build the part of an INTRODUCE1 message that gets encrypted to
/// the service: the rendezvous cookie, the rendezvous point's onion
/// key, and its link specifiers.
fn introduce1_plaintext<T: CircTarget>(
    cookie: &[u8; REND_COOKIE_LEN],
    rend_point: &T,
) -> Vec<u8> {
    let linkspecs = rend_point.linkspecs();
    let mut w = Vec::new();
    w.write(cookie);
    w.write_u8(0); // N_EXTENSIONS.
    w.write_u8(1); // ONION_KEY_TYPE: ntor.
    w.write_u16(32); // ONION_KEY_LEN.
    w.write(rend_point.ntor_onion_key());
    assert!(linkspecs.len() <= u8::MAX as usize);
    w.write_u8(linkspecs.len() as u8); // NSPEC.
    for ls in linkspecs.iter() {
        w.write(ls);
    }
    w
}

#[cfg(test)]
mod test {
    use super::*;
    use garlic_bytes::Reader;
    use garlic_cell::linkspec::{ChanTarget, LinkSpec};
    use garlic_crypto::pk::ed25519::Ed25519Identity;
    use garlic_crypto::pk::rsa::RsaIdentity;
    use std::net::SocketAddr;

    struct FakeTarget {
        addrs: Vec<SocketAddr>,
        ed: Ed25519Identity,
        rsa: RsaIdentity,
        ntor: curve25519::PublicKey,
    }
    impl ChanTarget for FakeTarget {
        fn addrs(&self) -> &[SocketAddr] {
            &self.addrs[..]
        }
        fn ed_identity(&self) -> &Ed25519Identity {
            &self.ed
        }
        fn rsa_identity(&self) -> &RsaIdentity {
            &self.rsa
        }
    }
    impl CircTarget for FakeTarget {
        fn ntor_onion_key(&self) -> &curve25519::PublicKey {
            &self.ntor
        }
    }

    fn fake_target() -> FakeTarget {
        FakeTarget {
            addrs: vec!["203.0.113.5:9001".parse().unwrap()],
            ed: Ed25519Identity::new([0x0e; 32]),
            rsa: RsaIdentity::new([0x0f; 20]),
            ntor: curve25519::PublicKey::from([0x10; 32]),
        }
    }

    #[test]
    fn header_layout() {
        let auth = ed25519_dalek::SigningKey::from_bytes(&[1; 32]).verifying_key();
        let h = introduce1_header(&auth);
        assert_eq!(h.len(), 20 + 1 + 2 + 32 + 1);
        assert_eq!(&h[0..20], &[0; 20]);
        assert_eq!(h[20], 2);
        assert_eq!(&h[21..23], &[0, 32]);
        assert_eq!(&h[23..55], auth.as_bytes());
        assert_eq!(h[55], 0);
    }

    #[test]
    fn plaintext_layout() {
        let target = fake_target();
        let cookie = [0xAB; REND_COOKIE_LEN];
        let p = introduce1_plaintext(&cookie, &target);

        let mut r = Reader::from_slice(&p);
        let got_cookie: [u8; REND_COOKIE_LEN] = r.extract().unwrap();
        assert_eq!(got_cookie, cookie);
        assert_eq!(r.take_u8().unwrap(), 0); // no extensions
        assert_eq!(r.take_u8().unwrap(), 1); // ntor key type
        assert_eq!(r.take_u16().unwrap(), 32);
        let key: [u8; 32] = r.extract().unwrap();
        assert_eq!(key, [0x10; 32]);
        let nspec = r.take_u8().unwrap() as usize;
        let specs: Vec<LinkSpec> = r.extract_n(nspec).unwrap();
        r.should_be_exhausted().unwrap();
        // The rendezvous point's identities and address all appear.
        assert!(specs.contains(&LinkSpec::RsaId(RsaIdentity::new([0x0f; 20]))));
        assert!(specs.contains(&LinkSpec::Ed25519Id(Ed25519Identity::new([0x0e; 32]))));
        assert!(specs
            .iter()
            .any(|ls| matches!(ls, LinkSpec::OrPort(_, 9001))));
    }
}
