//! Directory-side plumbing: building circuits from paths, and
//! fetching onion-service descriptors over 2-hop directory circuits.

use crate::config::GarlicConfig;
use crate::{Error, Result};
use base64::Engine;
use garlic_cell::linkspec::{ChanTarget, CircTarget};
use garlic_netstatus::{http, hsdesc, IntroductionPoint, OnionAddress, Registry, Relay};
use garlic_proto::channel;
use garlic_proto::circuit::ClientCirc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default deadline for a single circuit-building step.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for directory requests, which move more data.
pub(crate) const DIR_TIMEOUT: Duration = Duration::from_secs(20);

/// Apply the configured address rewrite hook, if any.
fn map_addr(config: &GarlicConfig, addr: SocketAddr) -> SocketAddr {
    match &config.address_map {
        Some(f) => f(addr),
        None => addr,
    }
}

/// Closes a channel on drop unless disarmed.
///
/// Circuit construction can fail (or be cancelled) at any await
/// point; this makes sure the link socket goes away with it.
struct ChanGuard(Option<Arc<channel::Channel>>);

impl ChanGuard {
    /// Guard `chan` until [`ChanGuard::disarm`] is called.
    fn new(chan: Arc<channel::Channel>) -> Self {
        ChanGuard(Some(chan))
    }
    /// Release the channel: it now belongs to a finished circuit.
    fn disarm(mut self) {
        self.0.take();
    }
}

impl Drop for ChanGuard {
    fn drop(&mut self) {
        if let Some(chan) = self.0.take() {
            tokio::spawn(async move {
                chan.terminate().await;
            });
        }
    }
}

/// Build a circuit along `path`, where the first entry is the relay
/// we connect to directly.
///
/// Every step is individually bounded by [`REQUEST_TIMEOUT`].
pub(crate) async fn build_circuit<T>(
    config: &GarlicConfig,
    path: &[T],
) -> Result<Arc<ClientCirc>>
where
    T: CircTarget + Sync,
{
    let first = path.first().ok_or_else(|| {
        Error::Internal("can't build a circuit along an empty path".into())
    })?;
    let addr = *first
        .addrs()
        .first()
        .ok_or_else(|| Error::Internal("relay without an address".into()))?;
    let addr = map_addr(config, addr);

    let mut rng = StdRng::from_entropy();

    let tls = timeout(REQUEST_TIMEOUT, channel::tls_connect(addr))
        .await
        .map_err(|_| Error::Timeout)??;
    let handshake = channel::start_client_handshake(tls, Some(addr));
    let nego = timeout(REQUEST_TIMEOUT, handshake.connect())
        .await
        .map_err(|_| Error::Timeout)??;
    let (chan, chan_reactor) = nego.finish().await?;
    tokio::spawn(async move {
        let _ = chan_reactor.run().await;
    });
    let guard = ChanGuard::new(Arc::clone(&chan));

    let (pending, circ_reactor) = chan.new_circ(&mut rng).await?;
    tokio::spawn(async move {
        let _ = circ_reactor.run().await;
    });

    let circ = timeout(REQUEST_TIMEOUT, pending.create_firsthop_ntor(&mut rng, first))
        .await
        .map_err(|_| Error::Timeout)??;
    for relay in path[1..].iter() {
        timeout(REQUEST_TIMEOUT, circ.extend_ntor(&mut rng, relay))
            .await
            .map_err(|_| Error::Timeout)??;
    }
    guard.disarm();
    Ok(circ)
}

/// Choose `n` fast relays with complete key material, fetching router
/// descriptors on demand when too few are ready.
pub(crate) async fn pick_fast_relays(registry: &Registry, n: usize) -> Result<Vec<Relay>> {
    let relays = registry.pick_fast_relays(n);
    if relays.len() >= n {
        return Ok(relays);
    }
    // Not enough relays have descriptors yet; fetch the missing ones
    // and try again.
    let missing = registry.with_status(|s| {
        s.routers
            .iter()
            .filter(|r| r.is_fast() && r.ntor_onion_key.is_none())
            .map(|r| r.fingerprint)
            .collect::<Vec<_>>()
    });
    registry.fetch_descriptors(&missing).await?;
    Ok(registry.pick_fast_relays(n))
}

/// Return the introduction points for `onion`, from the cache when
/// possible, otherwise by fetching and decrypting the service's
/// descriptor from its responsible directories.
pub(crate) async fn fetch_intro_points(
    registry: &Registry,
    config: &GarlicConfig,
    onion: &OnionAddress,
) -> Result<Vec<IntroductionPoint>> {
    if let Some(points) = registry.cached_intro_points(onion.domain()) {
        debug!("{}: using cached introduction points", onion.domain());
        return Ok(points);
    }

    let service = registry.hsdirs_for(onion)?;
    if service.hsdirs.is_empty() {
        return Err(garlic_netstatus::Error::IntroductionPointsUnavailable.into());
    }

    // The directory circuits need key material for the directories
    // themselves and for the interior hop.
    let fps: Vec<_> = service.hsdirs.iter().map(|r| r.fingerprint).collect();
    if let Err(e) = registry.fetch_descriptors(&fps).await {
        warn!("couldn't prefetch hsdir descriptors: {}", e);
    }

    let b64 = base64::engine::general_purpose::STANDARD_NO_PAD;
    let path = format!("/tor/hs/3/{}", b64.encode(service.blinded_pk));

    for hsdir in service.hsdirs.iter() {
        let Some(hsdir_relay) = hsdir.as_relay() else {
            continue;
        };
        let nickname = hsdir.nickname.clone();
        let guard = match pick_fast_relays(registry, 1).await {
            Ok(mut v) if !v.is_empty() => v.remove(0),
            _ => {
                return Err(garlic_netstatus::Error::DirectoryUnavailable(
                    "no fast relay for a directory circuit".into(),
                )
                .into())
            }
        };

        match fetch_desc_from(config, &path, &[guard, hsdir_relay]).await {
            Ok(text) => {
                match hsdesc::parse_hs_descriptor(
                    &text,
                    &service.blinded_pk,
                    &service.subcredential,
                ) {
                    Ok(points) => {
                        info!(
                            "{}: fetched descriptor from {} ({} intro points)",
                            onion.domain(),
                            nickname,
                            points.len()
                        );
                        registry.cache_intro_points(onion.domain(), points.clone());
                        return Ok(points);
                    }
                    Err(e) => warn!("descriptor from {} was unusable: {}", nickname, e),
                }
            }
            Err(e) => warn!("descriptor fetch from {} failed: {}", nickname, e),
        }
    }
    Err(garlic_netstatus::Error::IntroductionPointsUnavailable.into())
}

/// Fetch one descriptor document over a fresh 2-hop directory
/// circuit.
async fn fetch_desc_from(
    config: &GarlicConfig,
    path: &str,
    circuit_path: &[Relay],
) -> Result<String> {
    let circ = build_circuit(config, circuit_path).await?;
    let result = match timeout(DIR_TIMEOUT, async {
        let mut stream = circ.begin_dir_stream().await?;
        stream
            .write_bytes(http::format_request(path).as_bytes())
            .await?;
        let raw = stream.read_to_end().await?;
        let body = http::decode_response(&raw, false).map_err(Error::from)?;
        String::from_utf8(body).map_err(|_| {
            Error::from(garlic_netstatus::Error::DescriptorFormat(
                "descriptor is not utf-8",
            ))
        })
    })
    .await
    {
        Ok(r) => r,
        Err(_) => Err(Error::Timeout),
    };
    circ.terminate().await;
    result
}
