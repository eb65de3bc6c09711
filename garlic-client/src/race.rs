//! The circuit racer: "Happy-Eyeballs" for rendezvous circuits.
//!
//! A race launches several independent rendezvous attempts ("lanes")
//! at once; the first lane to finish the whole
//! establish/introduce/rendezvous dance wins, and every other lane is
//! torn down.  Lanes fail independently: one bad relay or stale
//! introduction point costs us nothing but its share of the
//! parallelism.

use crate::config::GarlicConfig;
use crate::dirops;
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use garlic_crypto::pk::{curve25519, ed25519};
use garlic_cell::linkspec::{ChanTarget, CircTarget, LinkSpec};
use garlic_crypto::pk::ed25519::Ed25519Identity;
use garlic_crypto::pk::rsa::RsaIdentity;
use garlic_netstatus::{IntroductionPoint, OnionAddress, Registry, Relay};
use garlic_proto::circuit::ClientCirc;
use garlic_proto::rend;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Statistics describing how a race went.
#[derive(Debug, Clone)]
pub struct RaceStats {
    /// Index of the lane that won.
    pub winner: usize,
    /// Wall-clock time from launch to win, in milliseconds.
    pub elapsed_ms: u64,
    /// How many lanes were launched.
    pub attempted: usize,
    /// How many lanes failed (or crashed) before the winner was
    /// chosen.
    pub failed: usize,
}

/// Run a race for `onion` and return the winning rendezvous circuit.
pub(crate) async fn race(
    registry: &Arc<Registry>,
    config: &GarlicConfig,
    onion: &OnionAddress,
) -> Result<(Arc<ClientCirc>, RaceStats)> {
    let count = config.race.count.max(1);

    // 1. Introduction points, possibly from the cache.
    let intro_points = dirops::fetch_intro_points(registry, config, onion).await?;

    // 2. Candidate rendezvous points: fast relays, thinned for /16
    //    diversity.
    let candidates = dirops::pick_fast_relays(registry, 3 * count).await?;
    let rend_points = subnet_diverse(candidates, count);
    if rend_points.is_empty() {
        return Err(Error::AllLanesFailed);
    }

    // 3. Shuffle the introduction points, and cycle them if the
    //    service published fewer than we have lanes.
    let mut shuffled = intro_points;
    shuffled.shuffle(&mut rand::thread_rng());

    // 4. Pair rendezvous points with introduction points.
    let pairs = build_race_paths(rend_points, shuffled, count);

    // 5. Launch the lanes.  Each lane yields its circuit still inside
    //    a teardown guard, so losers that finish late clean up after
    //    themselves.
    let registry = Arc::clone(registry);
    let lanes: Vec<BoxFuture<'static, Result<CircGuard>>> = pairs
        .into_iter()
        .map(|(rp, ip)| {
            let registry = Arc::clone(&registry);
            let config = config.clone();
            let fut = async move { run_lane(&registry, &config, rp, ip).await };
            Box::pin(fut) as BoxFuture<'static, _>
        })
        .collect();

    let domain = onion.domain().to_string();
    let on_failure = {
        let registry = Arc::clone(&registry);
        move |e: &Error| {
            // A service-side rejection means our descriptor is stale:
            // the next race must fetch a fresh one.
            if matches!(
                e,
                Error::Proto(garlic_proto::Error::IntroduceRejected(_))
                    | Error::Proto(garlic_proto::Error::HsHandshakeMacMismatch)
            ) {
                registry.evict_intro_points(&domain);
            }
        }
    };

    let (winner_guard, stats) = run_lanes(lanes, config.race.timeout, on_failure).await?;
    let winner = winner_guard.disarm();
    info!(
        "{}: rendezvous ready (lane {} of {}, {} ms, {} lanes failed)",
        onion.domain(),
        stats.winner,
        stats.attempted,
        stats.elapsed_ms,
        stats.failed
    );
    Ok((winner, stats))
}

/// Keep the first relay seen in each /16 IPv4 subnet, then truncate
/// to `count` entries.
fn subnet_diverse(candidates: Vec<Relay>, count: usize) -> Vec<Relay> {
    let mut seen: HashSet<[u8; 2]> = HashSet::new();
    let mut result = Vec::with_capacity(count);
    for relay in candidates {
        if seen.insert(relay.router().subnet16()) {
            result.push(relay);
            if result.len() == count {
                break;
            }
        }
    }
    result
}

/// Pair each rendezvous point with an introduction point, cycling the
/// introduction points when there are fewer of them than lanes.
fn build_race_paths<R, I>(
    rend_points: Vec<R>,
    intro_points: Vec<I>,
    count: usize,
) -> Vec<(R, I)>
where
    I: Clone,
{
    rend_points
        .into_iter()
        .zip(intro_points.into_iter().cycle())
        .take(count)
        .collect()
}

/// A guard that tears down a circuit unless it is disarmed.
///
/// Lanes hold their circuits in these so that a cancelled lane still
/// closes its link sockets.
struct CircGuard(Option<Arc<ClientCirc>>);

impl CircGuard {
    /// Wrap a circuit in a teardown guard.
    fn new(circ: Arc<ClientCirc>) -> Self {
        CircGuard(Some(circ))
    }
    /// Take the circuit out; it will no longer be torn down.
    fn disarm(mut self) -> Arc<ClientCirc> {
        self.0.take().expect("circuit guard already disarmed")
    }
    /// Borrow the guarded circuit.
    fn circ(&self) -> &Arc<ClientCirc> {
        self.0.as_ref().expect("circuit guard already disarmed")
    }
}

impl Drop for CircGuard {
    fn drop(&mut self) {
        if let Some(circ) = self.0.take() {
            tokio::spawn(async move {
                circ.terminate().await;
            });
        }
    }
}

/// Run a single lane: build the client circuit to `rp`, build an
/// introduction circuit to `ip`'s router, and run the rendezvous
/// protocol over the pair.
///
/// The circuit comes back still wrapped in its teardown guard; the
/// caller disarms it once the lane has actually won.
async fn run_lane(
    registry: &Registry,
    config: &GarlicConfig,
    rp: Relay,
    ip: IntroductionPoint,
) -> Result<CircGuard> {
    let mut rng = StdRng::from_entropy();

    // The client circuit: interior fast hops, then the RP.
    let hops = config.race.hops.max(1);
    let mut client_path = if hops > 1 {
        dirops::pick_fast_relays(registry, hops - 1).await?
    } else {
        Vec::new()
    };
    client_path.push(rp.clone());
    let client_circ = CircGuard::new(dirops::build_circuit(config, &client_path).await?);

    // The introduction circuit: one fast hop, then the introduction
    // router described by the descriptor's link specifiers.
    let intro_target = IntroTarget::from_intro_point(&ip).ok_or(Error::from(
        garlic_netstatus::Error::DescriptorFormat("intro point lacks a usable link specifier"),
    ))?;
    let intro_guard = {
        let mut guard_path = dirops::pick_fast_relays(registry, 1).await?;
        if guard_path.is_empty() {
            return Err(Error::AllLanesFailed);
        }
        let guard = guard_path.remove(0);
        CircGuard::new(
            build_intro_circuit(config, guard, &intro_target).await?,
        )
    };

    let material = rend::IntroMaterial {
        auth_key: ed25519::PublicKey::from_bytes(&ip.auth_key)
            .map_err(|_| Error::from(garlic_netstatus::Error::DescriptorFormat(
                "intro point auth key is not a valid ed25519 key",
            )))?,
        enc_key: curve25519::PublicKey::from(ip.enc_key),
        subcredential: ip.subcredential,
    };

    tokio::time::timeout(
        dirops::REQUEST_TIMEOUT,
        rend::connect_rendezvous(
            &mut rng,
            client_circ.circ(),
            intro_guard.circ(),
            material,
            &rp,
        ),
    )
    .await
    .map_err(|_| Error::Timeout)??;

    // The intro guard tears the introduction circuit down as it
    // drops; the client circuit, still guarded, is the lane's result.
    Ok(client_circ)
}

/// Build the 2-hop introduction circuit {guard, introduction router}.
async fn build_intro_circuit(
    config: &GarlicConfig,
    guard: Relay,
    intro: &IntroTarget,
) -> Result<Arc<ClientCirc>> {
    let circ = dirops::build_circuit(config, &[guard]).await?;
    tokio::time::timeout(dirops::REQUEST_TIMEOUT, async {
        let mut rng = StdRng::from_entropy();
        circ.extend_ntor(&mut rng, intro).await
    })
    .await
    .map_err(|_| Error::Timeout)??;
    Ok(circ)
}

/// A circuit-extension target assembled from an introduction point's
/// link specifiers.
struct IntroTarget {
    /// Addresses from the OrPort link specifiers.
    addrs: Vec<SocketAddr>,
    /// RSA identity from the link specifiers.
    rsa: RsaIdentity,
    /// Ed25519 identity from the link specifiers, or zeroes if the
    /// service's descriptor omitted it.
    ed: Ed25519Identity,
    /// The introduction router's ntor key from the descriptor.
    ntor: curve25519::PublicKey,
}

impl IntroTarget {
    /// Build a target from an introduction point.  Returns None when
    /// the link specifiers don't include enough to extend with.
    fn from_intro_point(ip: &IntroductionPoint) -> Option<Self> {
        let mut addrs = Vec::new();
        let mut rsa = None;
        let mut ed = None;
        for ls in ip.link_specifiers.iter() {
            match ls {
                LinkSpec::OrPort(a, p) => addrs.push(SocketAddr::new(*a, *p)),
                LinkSpec::RsaId(id) => rsa = Some(*id),
                LinkSpec::Ed25519Id(id) => ed = Some(*id),
                LinkSpec::Unrecognized(_, _) => (),
                _ => (),
            }
        }
        Some(IntroTarget {
            addrs,
            rsa: rsa?,
            ed: ed.unwrap_or_else(|| Ed25519Identity::new([0; 32])),
            ntor: curve25519::PublicKey::from(ip.ntor_onion_key),
        })
    }
}

impl ChanTarget for IntroTarget {
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
impl CircTarget for IntroTarget {
    fn ntor_onion_key(&self) -> &curve25519::PublicKey {
        &self.ntor
    }
    fn linkspecs(&self) -> Vec<LinkSpec> {
        // Reuse the specifiers exactly as the service published them.
        let mut specs: Vec<LinkSpec> = vec![self.rsa.into()];
        if self.ed.as_bytes() != &[0; 32] {
            specs.push(self.ed.into());
        }
        for addr in self.addrs.iter() {
            specs.push(addr.into());
        }
        specs
    }
}

/// Drive `lanes` to the first success.
///
/// Returns the winning value plus [`RaceStats`].  Lane errors are
/// reported to `on_failure` and counted, never propagated; a panic in
/// a lane counts as a failure too.  When the deadline passes, or
/// every lane fails, the race fails with [`Error::AllLanesFailed`].
pub(crate) async fn run_lanes<T, F>(
    lanes: Vec<BoxFuture<'static, Result<T>>>,
    deadline: Duration,
    on_failure: F,
) -> Result<(T, RaceStats)>
where
    T: Send + 'static,
    F: Fn(&Error),
{
    let attempted = lanes.len();
    if attempted == 0 {
        return Err(Error::AllLanesFailed);
    }
    let start = Instant::now();
    let mut failed = 0_usize;

    let mut handles: FuturesUnordered<JoinHandle<(usize, Result<T>)>> = lanes
        .into_iter()
        .enumerate()
        .map(|(idx, lane)| tokio::spawn(async move { (idx, lane.await) }))
        .collect();

    let result = tokio::time::timeout(deadline, async {
        while let Some(joined) = handles.next().await {
            match joined {
                Ok((idx, Ok(value))) => return Some((idx, value)),
                Ok((idx, Err(e))) => {
                    debug!("lane {} failed: {}", idx, e);
                    on_failure(&e);
                    failed += 1;
                }
                Err(e) => {
                    // A lane crashed; that's a failure, not our
                    // problem.
                    warn!("lane crashed: {}", e);
                    failed += 1;
                }
            }
        }
        None
    })
    .await;

    match result {
        Ok(Some((winner, value))) => {
            // Tear down the losers in the background; the winner
            // doesn't wait for them.
            abort_all(handles);
            let stats = RaceStats {
                winner,
                elapsed_ms: start.elapsed().as_millis() as u64,
                attempted,
                failed,
            };
            Ok((value, stats))
        }
        Ok(None) | Err(_) => {
            abort_all(handles);
            Err(Error::AllLanesFailed)
        }
    }
}

/// Abort every remaining lane, and terminate any circuit a lane
/// manages to return anyway.
fn abort_all<T: Send + 'static>(handles: FuturesUnordered<JoinHandle<(usize, Result<T>)>>) {
    for h in handles.iter() {
        h.abort();
    }
    tokio::spawn(async move {
        let mut handles = handles;
        while let Some(joined) = handles.next().await {
            // A lane that finished right as we aborted it returns its
            // value here; dropping the value runs its teardown.
            drop(joined);
        }
    });
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn race_pairing() {
        let rps = vec!["rp1", "rp2", "rp3", "rp4"];
        let ips = vec!["ip1"];
        let pairs = build_race_paths(rps, ips, 4);
        assert_eq!(
            pairs,
            vec![
                ("rp1", "ip1"),
                ("rp2", "ip1"),
                ("rp3", "ip1"),
                ("rp4", "ip1"),
            ]
        );

        // With plenty of intro points, each lane gets its own.
        let rps = vec![1, 2];
        let ips = vec!["a", "b", "c"];
        let pairs = build_race_paths(rps, ips, 2);
        assert_eq!(pairs, vec![(1, "a"), (2, "b")]);
    }

    fn lane_ok(
        delay: Duration,
        value: u32,
    ) -> BoxFuture<'static, Result<u32>> {
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(value)
        })
    }

    fn lane_err(delay: Duration) -> BoxFuture<'static, Result<u32>> {
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Err(Error::Timeout)
        })
    }

    #[tokio::test]
    async fn first_winner_wins() {
        let lanes = vec![
            lane_ok(Duration::from_millis(50), 1),
            lane_ok(Duration::from_millis(5), 2),
            lane_err(Duration::from_millis(1)),
        ];
        let (value, stats) =
            run_lanes(lanes, Duration::from_secs(5), |_| ()).await.unwrap();
        assert_eq!(value, 2);
        assert_eq!(stats.winner, 1);
        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn all_failures_reported() {
        let mut evictions = 0;
        {
            let lanes = vec![
                lane_err(Duration::from_millis(1)),
                lane_err(Duration::from_millis(2)),
            ];
            let counter = std::sync::Mutex::new(&mut evictions);
            let r = run_lanes(lanes, Duration::from_secs(5), |_| {
                **counter.lock().unwrap() += 1;
            })
            .await;
            assert!(matches!(r, Err(Error::AllLanesFailed)));
        }
        assert_eq!(evictions, 2);
    }

    #[tokio::test]
    async fn deadline_bounds_the_race() {
        let lanes = vec![lane_ok(Duration::from_secs(60), 1)];
        let start = Instant::now();
        let r = run_lanes(lanes, Duration::from_millis(50), |_| ()).await;
        assert!(matches!(r, Err(Error::AllLanesFailed)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn lane_panic_is_counted_not_propagated() {
        let lanes: Vec<BoxFuture<'static, Result<u32>>> = vec![
            Box::pin(async { panic!("lane blew up") }),
            lane_ok(Duration::from_millis(20), 7),
        ];
        let (value, stats) =
            run_lanes(lanes, Duration::from_secs(5), |_| ()).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(stats.failed, 1);
    }
}
