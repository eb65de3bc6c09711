//! A client's-eye view of the onion-routing network.
//!
//! # Overview
//!
//! This crate is the "network-status registry" of garlic: it
//! downloads and parses the network-status document published by the
//! directory authorities, merges in router descriptors as they are
//! fetched, and answers the questions the rest of the client asks
//! about the network: which relays are fast, which relays are
//! responsible for a given onion service this time period, and what a
//! service's introduction points currently are.
//!
//! Nothing here builds circuits.  Fetches that have to happen *over*
//! circuits (onion-service descriptors) are split in two: the caller
//! provides the transport, and this crate provides the request path
//! and the parsing.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

pub mod authority;
mod consensus;
mod err;
pub mod hsdesc;
pub mod hsdir;
pub mod http;
mod onion;
mod pick;
mod routerdesc;
mod storage;

use garlic_cell::linkspec::{ChanTarget, CircTarget};
use garlic_crypto::pk::curve25519;
use garlic_crypto::pk::ed25519::Ed25519Identity;
use garlic_crypto::pk::rsa::RsaIdentity;
use garlic_crypto::hs::time as tp;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub use authority::Authority;
pub use err::{Error, Result};
pub use hsdesc::IntroductionPoint;
pub use onion::OnionAddress;

/// How many fingerprints we request from a directory in a single
/// router-descriptor fetch.
const DESCRIPTOR_BATCH: usize = 512;

/// How many times we retry a failed router-descriptor batch against
/// different directories.
const DESCRIPTOR_RETRIES: usize = 3;

/// A relay as listed in the network-status document, possibly
/// enriched with fields from its router descriptor.
///
/// The identity and fingerprint of a router never change after it is
/// first loaded; a consensus refresh replaces the whole collection
/// instead of mutating entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Router {
    /// Nickname declared by the relay.  Not unique; only for logging.
    pub nickname: String,
    /// IPv4 address of the relay's OR port.
    pub addr: Ipv4Addr,
    /// The relay's OR port.
    pub or_port: u16,
    /// IPv6 OR address, when the relay advertises one.
    pub ipv6: Option<(Ipv6Addr, u16)>,
    /// Directory port, or 0 if the relay does not serve directory
    /// requests over HTTP.
    pub dir_port: u16,
    /// The relay's RSA identity fingerprint.
    pub fingerprint: RsaIdentity,
    /// The relay's Ed25519 identity, once known.
    pub ed_identity: Option<Ed25519Identity>,
    /// The relay's ntor onion key, once its descriptor has been
    /// fetched.
    pub ntor_onion_key: Option<[u8; 32]>,
    /// Flags assigned by the authorities ("Fast", "HSDir", ...).
    pub flags: HashSet<String>,
    /// Bandwidth entries from the "w" line.
    pub bandwidth: HashMap<String, u64>,
    /// The socket addresses this relay can be reached at.
    ///
    /// (Derived from `addr`/`or_port`/`ipv6`; stored so that we can
    /// hand out slices of them.)
    pub or_addrs: Vec<SocketAddr>,
}

impl Router {
    /// Return true if the authorities have given this router `flag`.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
    /// Return true if this router is marked Fast.
    pub fn is_fast(&self) -> bool {
        self.has_flag("Fast")
    }
    /// Return true if this router stores and serves onion-service
    /// descriptors.
    pub fn is_hsdir(&self) -> bool {
        self.has_flag("HSDir")
    }
    /// Return the weight to use when picking this router at random.
    pub fn weight(&self) -> u64 {
        *self.bandwidth.get("Bandwidth").unwrap_or(&0)
    }
    /// Return the address of this router's directory port, if it has
    /// one.
    pub fn dir_addr(&self) -> Option<SocketAddr> {
        (self.dir_port != 0).then(|| SocketAddr::new(self.addr.into(), self.dir_port))
    }
    /// Return the /16 IPv4 prefix of this router, used for path
    /// diversity.
    pub fn subnet16(&self) -> [u8; 2] {
        let o = self.addr.octets();
        [o[0], o[1]]
    }
    /// If this router's keys are all known, return a [`Relay`] that
    /// can be used as a circuit target.
    pub fn as_relay(&self) -> Option<Relay> {
        let ed = self.ed_identity?;
        let ntor = curve25519::PublicKey::from(self.ntor_onion_key?);
        Some(Relay {
            router: self.clone(),
            ed,
            ntor,
        })
    }
}

/// A checked view of a [`Router`]: every key needed to connect to it
/// and extend a circuit through it is present.
#[derive(Debug, Clone)]
pub struct Relay {
    /// The underlying consensus entry.
    router: Router,
    /// The relay's Ed25519 identity.
    ed: Ed25519Identity,
    /// The relay's ntor onion key.
    ntor: curve25519::PublicKey,
}

impl Relay {
    /// Return the underlying Router for this relay.
    pub fn router(&self) -> &Router {
        &self.router
    }
}

impl ChanTarget for Relay {
    fn addrs(&self) -> &[SocketAddr] {
        &self.router.or_addrs[..]
    }
    fn ed_identity(&self) -> &Ed25519Identity {
        &self.ed
    }
    fn rsa_identity(&self) -> &RsaIdentity {
        &self.router.fingerprint
    }
}

impl CircTarget for Relay {
    fn ntor_onion_key(&self) -> &curve25519::PublicKey {
        &self.ntor
    }
}

/// The parsed network-status document, plus whatever descriptor
/// fields have been merged into its routers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkStatus {
    /// All routers listed in the document, in listing order.
    pub routers: Vec<Router>,
    /// Unix time at which this document became valid.
    pub valid_after: u64,
    /// Unix time until which this document counts as the freshest.
    pub fresh_until: u64,
    /// Unix time after which this document is unusable.
    pub valid_until: u64,
    /// The current shared-random value, if the authorities listed one.
    pub shared_rand_current: Option<[u8; 32]>,
    /// The previous shared-random value, if the authorities listed one.
    pub shared_rand_previous: Option<[u8; 32]>,
    /// Directory parameters from the "params" line.
    pub params: HashMap<String, i64>,
}

impl NetworkStatus {
    /// Return the voting interval of the network, in seconds.
    pub fn voting_interval(&self) -> u64 {
        tp::voting_interval(self.valid_after, self.fresh_until)
    }

    /// Return the length of an onion-service time period, in minutes.
    ///
    /// Testing networks with sub-hour voting intervals shorten their
    /// time periods so that blinded keys still rotate a fixed number
    /// of votes after the SRV does.
    pub fn time_period_length(&self) -> u64 {
        if let Some(len) = self.params.get("hsdir_interval") {
            return (*len).max(1) as u64;
        }
        let vi = self.voting_interval();
        if vi < 3600 {
            24 * vi / 60
        } else {
            tp::DEFAULT_TIME_PERIOD_LENGTH
        }
    }

    /// Return the number of the time period containing `valid_after`.
    pub fn time_period_num(&self) -> u64 {
        tp::time_period_num(
            self.valid_after,
            self.voting_interval(),
            self.time_period_length(),
        )
    }

    /// Return the number of descriptor replicas each service stores.
    pub fn hsdir_n_replicas(&self) -> u64 {
        self.params
            .get("hsdir_n_replicas")
            .map(|v| *v as u64)
            .unwrap_or(2)
    }

    /// Return how many directories store each descriptor replica.
    pub fn hsdir_spread_store(&self) -> u64 {
        self.params
            .get("hsdir_spread_store")
            .map(|v| *v as u64)
            .unwrap_or(4)
    }

    /// Return true if this document is still the freshest one the
    /// authorities expect to have published.
    pub fn is_fresh_at(&self, now: u64) -> bool {
        now < self.fresh_until
    }
}

/// Introduction points cached for a single onion service.
struct CachedIntros {
    /// The introduction points from the service's descriptor.
    points: Vec<IntroductionPoint>,
    /// Unix time at which this entry stops being valid (the start of
    /// the next time period).
    expires_at: u64,
}

/// The registry: shared, read-mostly holder of the network view.
///
/// All mutation (consensus refresh, descriptor merges, intro-point
/// caching) goes through this object, and is idempotent, so that
/// concurrent readers never see a torn state.
pub struct Registry {
    /// The parsed network status.
    status: RwLock<NetworkStatus>,
    /// Cached introduction points, keyed by onion domain.
    intro_cache: Mutex<HashMap<String, CachedIntros>>,
    /// The authorities we bootstrap from.
    authorities: Vec<Authority>,
    /// Where we persist the network-status snapshot, if anywhere.
    cache_file: Option<PathBuf>,
}

impl Registry {
    /// Create a registry from an already-parsed network status.
    pub fn from_status(status: NetworkStatus, authorities: Vec<Authority>) -> Self {
        Registry {
            status: RwLock::new(status),
            intro_cache: Mutex::new(HashMap::new()),
            authorities,
            cache_file: None,
        }
    }

    /// Bootstrap a registry: reuse the on-disk snapshot when it is
    /// still fresh, and download a new network status otherwise.
    ///
    /// `cache_dir` is the directory in which snapshots are kept;
    /// `authorities` overrides the built-in authority list if
    /// nonempty.
    pub async fn bootstrap(
        cache_dir: Option<PathBuf>,
        authorities: Option<Vec<Authority>>,
    ) -> Result<Self> {
        let custom = authorities.is_some();
        let authorities = authorities.unwrap_or_else(authority::default_authorities);
        let cache_file =
            cache_dir.map(|dir| storage::snapshot_path(&dir, custom.then_some(&authorities[..])));

        if let Some(path) = &cache_file {
            if let Some(status) = storage::load_snapshot(path) {
                if status.is_fresh_at(unix_now()) {
                    info!(
                        "reusing cached network status ({} routers)",
                        status.routers.len()
                    );
                    return Ok(Registry {
                        status: RwLock::new(status),
                        intro_cache: Mutex::new(HashMap::new()),
                        authorities,
                        cache_file,
                    });
                }
                debug!("cached network status is stale; downloading a fresh one");
            }
        }

        let status = consensus::download(&authorities).await?;
        if let Some(path) = &cache_file {
            if let Err(e) = storage::save_snapshot(path, &status) {
                warn!("couldn't persist network status snapshot: {}", e);
            }
        }
        Ok(Registry {
            status: RwLock::new(status),
            intro_cache: Mutex::new(HashMap::new()),
            authorities,
            cache_file,
        })
    }

    /// Run `f` on the current network status.
    pub fn with_status<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&NetworkStatus) -> T,
    {
        let status = self.status.read().expect("network status lock poisoned");
        f(&status)
    }

    /// Replace the network status with a freshly downloaded one.
    pub async fn refresh(&self) -> Result<()> {
        let status = consensus::download(&self.authorities).await?;
        if let Some(path) = &self.cache_file {
            if let Err(e) = storage::save_snapshot(path, &status) {
                warn!("couldn't persist network status snapshot: {}", e);
            }
        }
        *self.status.write().expect("network status lock poisoned") = status;
        Ok(())
    }

    /// Choose `n` distinct fast relays, weighted by bandwidth, for use
    /// as circuit hops.  Every returned relay has a complete key set.
    pub fn pick_fast_relays(&self, n: usize) -> Vec<Relay> {
        let status = self.status.read().expect("network status lock poisoned");
        let mut rng = rand::thread_rng();
        let mut chosen: Vec<Relay> = Vec::with_capacity(n);
        let mut used: HashSet<RsaIdentity> = HashSet::new();
        for _ in 0..n {
            let pick = pick::pick_weighted(
                &mut rng,
                status
                    .routers
                    .iter()
                    .filter(|r| r.is_fast() && !used.contains(&r.fingerprint))
                    .filter_map(|r| r.as_relay()),
                |r| r.router().weight(),
            );
            match pick {
                Some(r) => {
                    used.insert(r.router().fingerprint);
                    chosen.push(r);
                }
                None => break,
            }
        }
        chosen
    }

    /// Choose a random directory-serving relay, weighted by bandwidth.
    pub fn pick_directory(&self) -> Option<(SocketAddr, String)> {
        let status = self.status.read().expect("network status lock poisoned");
        let mut rng = rand::thread_rng();
        pick::pick_weighted(
            &mut rng,
            status.routers.iter().filter(|r| r.dir_port != 0),
            |r| r.weight(),
        )
        .and_then(|r| r.dir_addr().map(|a| (a, r.nickname.clone())))
    }

    /// Fetch the router descriptors for every router that is missing
    /// its ntor onion key, batching fingerprints against random
    /// directory relays, and merge the results.
    pub async fn prefetch_descriptors(&self) -> Result<()> {
        let missing: Vec<RsaIdentity> = self.with_status(|s| {
            s.routers
                .iter()
                .filter(|r| r.ntor_onion_key.is_none())
                .map(|r| r.fingerprint)
                .collect()
        });
        self.fetch_descriptors(&missing).await
    }

    /// Make sure that every router named in `fingerprints` has its
    /// descriptor fields filled in, fetching them if necessary.
    pub async fn fetch_descriptors(&self, fingerprints: &[RsaIdentity]) -> Result<()> {
        let needed: Vec<RsaIdentity> = {
            let status = self.status.read().expect("network status lock poisoned");
            let by_fp: HashSet<_> = status
                .routers
                .iter()
                .filter(|r| r.ntor_onion_key.is_none())
                .map(|r| r.fingerprint)
                .collect();
            fingerprints
                .iter()
                .filter(|fp| by_fp.contains(fp))
                .copied()
                .collect()
        };
        if needed.is_empty() {
            return Ok(());
        }

        for batch in needed.chunks(DESCRIPTOR_BATCH) {
            let mut last_err = None;
            let mut done = false;
            for attempt in 0..DESCRIPTOR_RETRIES {
                let Some((dir, nickname)) = self.pick_directory() else {
                    return Err(Error::DirectoryUnavailable(
                        "no relay with an open dir port".into(),
                    ));
                };
                debug!(
                    "fetching {} router descriptors from {} (attempt {})",
                    batch.len(),
                    nickname,
                    attempt + 1
                );
                match routerdesc::fetch_batch(dir, batch).await {
                    Ok(descs) => {
                        self.merge_descriptors(descs);
                        done = true;
                        break;
                    }
                    Err(e) => {
                        warn!("descriptor fetch from {} failed: {}", nickname, e);
                        last_err = Some(e);
                    }
                }
            }
            if !done {
                return Err(last_err.unwrap_or(Error::DirectoryUnavailable(
                    "descriptor fetch failed".into(),
                )));
            }
        }
        Ok(())
    }

    /// Merge a set of parsed router descriptors into the registry.
    fn merge_descriptors(&self, descs: Vec<routerdesc::RouterDesc>) {
        let mut status = self.status.write().expect("network status lock poisoned");
        let by_fp: HashMap<RsaIdentity, usize> = status
            .routers
            .iter()
            .enumerate()
            .map(|(i, r)| (r.fingerprint, i))
            .collect();
        let mut merged = 0_usize;
        for d in descs {
            if let Some(idx) = by_fp.get(&d.fingerprint) {
                let r = &mut status.routers[*idx];
                r.ntor_onion_key = Some(d.ntor_onion_key);
                if r.ed_identity.is_none() {
                    r.ed_identity = d.ed_identity;
                }
                merged += 1;
            }
        }
        debug!("merged {} router descriptors", merged);
    }

    /// Return the HSDir routers responsible for `onion` in the current
    /// time period, in fetch order, together with the blinded key and
    /// subcredential for the service.
    pub fn hsdirs_for(&self, onion: &OnionAddress) -> Result<hsdir::HsDirsForService> {
        let status = self.status.read().expect("network status lock poisoned");
        hsdir::responsible_hsdirs(&status, onion)
    }

    /// Return the cached introduction points for `domain`, if the
    /// cache entry is still valid.
    pub fn cached_intro_points(&self, domain: &str) -> Option<Vec<IntroductionPoint>> {
        let cache = self.intro_cache.lock().expect("intro cache lock poisoned");
        let entry = cache.get(domain)?;
        (unix_now() < entry.expires_at).then(|| entry.points.clone())
    }

    /// Store introduction points for `domain`; the entry lives until
    /// the start of the next time period.
    pub fn cache_intro_points(&self, domain: &str, points: Vec<IntroductionPoint>) {
        let expires_at = self.with_status(|s| {
            tp::next_time_period_start(
                s.time_period_num(),
                s.voting_interval(),
                s.time_period_length(),
            )
        });
        let mut cache = self.intro_cache.lock().expect("intro cache lock poisoned");
        cache.insert(
            domain.to_owned(),
            CachedIntros { points, expires_at },
        );
    }

    /// Drop the cached introduction points for `domain`.
    ///
    /// Called when a rendezvous handshake fails on the service side,
    /// so that the next attempt fetches a fresh descriptor.
    pub fn evict_intro_points(&self, domain: &str) {
        let mut cache = self.intro_cache.lock().expect("intro cache lock poisoned");
        if cache.remove(domain).is_some() {
            info!("evicted cached introduction points for {}", domain);
        }
    }

}

/// Return the current time as Unix seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

#[cfg(test)]
mod test {
    use super::*;

    pub(crate) fn fake_router(nick: &str, addr: [u8; 4], flags: &[&str]) -> Router {
        let addr = Ipv4Addr::from(addr);
        Router {
            nickname: nick.into(),
            addr,
            or_port: 9001,
            ipv6: None,
            dir_port: 9030,
            fingerprint: RsaIdentity::new([nick.as_bytes()[0]; 20]),
            ed_identity: Some(Ed25519Identity::new([nick.as_bytes()[0]; 32])),
            ntor_onion_key: Some([3; 32]),
            flags: flags.iter().map(|s| s.to_string()).collect(),
            bandwidth: [("Bandwidth".to_string(), 1000_u64)].into_iter().collect(),
            or_addrs: vec![SocketAddr::new(addr.into(), 9001)],
        }
    }

    #[test]
    fn fast_relay_picks_are_distinct() {
        let mut status = NetworkStatus::default();
        for (i, nick) in ["a", "b", "c", "d"].iter().enumerate() {
            status
                .routers
                .push(fake_router(nick, [10, 0, 0, i as u8], &["Fast"]));
        }
        status.routers.push(fake_router("slowpoke", [10, 0, 0, 99], &[]));
        let registry = Registry::from_status(status, Vec::new());

        let picked = registry.pick_fast_relays(10);
        assert_eq!(picked.len(), 4);
        let mut fps: Vec<_> = picked
            .iter()
            .map(|r| *r.router().fingerprint.as_bytes())
            .collect();
        fps.sort();
        fps.dedup();
        assert_eq!(fps.len(), 4);
    }

    #[test]
    fn intro_cache_expiry_and_eviction() {
        let status = NetworkStatus {
            // A consensus from the far future keeps the cache entry
            // valid for the whole test.
            valid_after: unix_now() + 1000,
            fresh_until: unix_now() + 4600,
            valid_until: unix_now() + 8200,
            ..NetworkStatus::default()
        };
        let registry = Registry::from_status(status, Vec::new());
        assert!(registry.cached_intro_points("x.onion").is_none());
        registry.cache_intro_points("x.onion", Vec::new());
        assert!(registry.cached_intro_points("x.onion").is_some());
        registry.evict_intro_points("x.onion");
        assert!(registry.cached_intro_points("x.onion").is_none());
    }

    #[test]
    fn time_period_length_rules() {
        let mut status = NetworkStatus {
            valid_after: 1_460_545_200,
            fresh_until: 1_460_548_800,
            ..NetworkStatus::default()
        };
        assert_eq!(status.time_period_length(), 1440);

        // A testing network with 40-second votes gets short periods.
        status.fresh_until = status.valid_after + 40;
        assert_eq!(status.time_period_length(), 24 * 40 / 60);

        // An explicit parameter wins.
        status.params.insert("hsdir_interval".into(), 120);
        assert_eq!(status.time_period_length(), 120);
    }
}
