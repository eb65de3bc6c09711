//! Per-domain circuit pools with a global LRU over domains.
//!
//! Each onion domain the client talks to gets a small pool of
//! "workers", each wrapping one rendezvous circuit plus its health
//! bookkeeping: age, total streams served, recent latencies, and
//! consecutive failures.  Checkouts grow a domain's pool to its
//! configured slot count before any circuit is reused, then rotate
//! across the slots.  Checked-out circuits are returned with a
//! verdict, and workers that fall out of health are evicted so a
//! later checkout builds a fresh circuit.
//!
//! A single manager owns all the pools; when a new domain would
//! exceed the domain limit, the least-recently-used domain's pool is
//! terminated first.

use crate::config::PoolOptions;
use crate::Result;
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// How many latency samples a worker keeps.
const LATENCY_SAMPLES: usize = 10;
/// How many samples it takes before a worker can count as degraded.
const MIN_SAMPLES_FOR_DEGRADED: usize = 3;

/// The operations a pool needs from the circuits it manages.
///
/// (This is a trait so that the pool bookkeeping can be exercised
/// without a network.)
pub trait PoolCircuit: Clone + Send + Sync + 'static {
    /// Return true if the circuit can still carry streams.
    fn is_open(&self) -> bool;
    /// Tear the circuit down, without waiting for it.
    fn close(&self);
}

impl PoolCircuit for Arc<garlic_proto::circuit::ClientCirc> {
    fn is_open(&self) -> bool {
        !self.is_closing()
    }
    fn close(&self) {
        let circ = Arc::clone(self);
        tokio::spawn(async move {
            circ.terminate().await;
        });
    }
}

/// Why a worker was evicted from its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EvictReason {
    /// The worker never got a circuit: its construction race failed.
    NotConnected,
    /// The circuit is dead, too old, or has served too many streams.
    Unhealthy,
    /// The circuit's recent latencies are too slow.
    Degraded,
    /// The circuit failed too many requests in a row.
    TooManyFailures,
}

/// The caller's verdict when returning a checked-out circuit.
#[derive(Debug, Clone, Copy)]
pub enum ReturnStatus {
    /// The request succeeded, and took this long.
    Success {
        /// Observed request latency, in milliseconds.
        latency_ms: u64,
    },
    /// The request succeeded; no latency was measured.
    Ok,
    /// The request failed.
    Err,
}

/// A function that builds a fresh circuit for a domain.
pub(crate) type CircuitBuilder<C> =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<C>> + Send + Sync>;

/// A checked-out circuit, to be returned with
/// [`CircuitPool::release`].
pub struct Checkout<C> {
    /// The circuit itself.
    pub circuit: C,
    /// The domain whose pool this came from.
    domain: String,
    /// Which worker slot it came from.
    slot: usize,
}

/// One circuit plus its health bookkeeping.
struct Worker<C> {
    /// The circuit, or None if construction failed and the slot is
    /// waiting to be evicted.
    circ: Option<C>,
    /// When the worker was created.
    created_at: Instant,
    /// How many streams this worker has handed out over its
    /// lifetime.
    stream_count: u64,
    /// The last few observed request latencies, in milliseconds.
    latencies: VecDeque<u64>,
    /// Consecutive failed requests.
    failures: u32,
}

impl<C: PoolCircuit> Worker<C> {
    /// Create a worker around a freshly built circuit (or a failed
    /// build).
    fn new(circ: Option<C>) -> Self {
        Worker {
            circ,
            created_at: Instant::now(),
            stream_count: 0,
            latencies: VecDeque::with_capacity(LATENCY_SAMPLES),
            failures: 0,
        }
    }

    /// Mean of the recorded latencies.
    fn mean_latency(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let sum: u64 = self.latencies.iter().sum();
        Some(Duration::from_millis(sum / self.latencies.len() as u64))
    }

    /// Return true if the recent latencies disqualify this worker.
    fn is_degraded(&self, opts: &PoolOptions) -> bool {
        self.latencies.len() >= MIN_SAMPLES_FOR_DEGRADED
            && self
                .mean_latency()
                .map(|m| m > opts.latency_threshold)
                .unwrap_or(false)
    }

    /// If this worker should not be handed out, say why.
    fn health_problem(&self, opts: &PoolOptions) -> Option<EvictReason> {
        if self.failures >= opts.max_consecutive_failures {
            Some(EvictReason::TooManyFailures)
        } else if self.stream_count >= opts.max_stream_count
            || self.created_at.elapsed() >= opts.max_circuit_age
        {
            Some(EvictReason::Unhealthy)
        } else if self.is_degraded(opts) {
            Some(EvictReason::Degraded)
        } else {
            None
        }
    }

    /// Record a latency sample, keeping only the most recent few.
    fn push_latency(&mut self, latency_ms: u64) {
        self.latencies.push_back(latency_ms);
        while self.latencies.len() > LATENCY_SAMPLES {
            self.latencies.pop_front();
        }
    }
}

/// The pool for a single domain.
struct DomainPool<C> {
    /// The worker slots; up to `pool_size` of them.
    workers: Vec<Worker<C>>,
    /// Rotation counter, so that checkouts spread over the slots.
    next: usize,
}

impl<C: PoolCircuit> DomainPool<C> {
    /// Create an empty pool.
    fn new() -> Self {
        DomainPool {
            workers: Vec::new(),
            next: 0,
        }
    }

    /// Close every circuit in this pool.
    fn terminate(&mut self) {
        for w in self.workers.drain(..) {
            if let Some(c) = w.circ {
                c.close();
            }
        }
    }
}

/// Mutable state of the pool manager.
struct Manager<C> {
    /// The per-domain pools.
    domains: HashMap<String, DomainPool<C>>,
    /// Domains in most-recently-used-first order.
    lru: VecDeque<String>,
    /// How many domain pools have been evicted for the domain limit.
    domain_evictions: u64,
    /// How many workers have been evicted, by any reason.
    worker_evictions: u64,
}

/// A pool of rendezvous circuits, one small pool per onion domain,
/// with a global least-recently-used bound on the number of domains.
pub struct CircuitPool<C: PoolCircuit> {
    /// Pool sizing and health options.
    opts: PoolOptions,
    /// Builds a fresh circuit for a domain.
    builder: CircuitBuilder<C>,
    /// The manager state.  One lock: the manager is effectively
    /// single-threaded, and worker construction happens while it is
    /// held, so the first checkout for a domain waits for the build.
    inner: Mutex<Manager<C>>,
}

impl<C: PoolCircuit> CircuitPool<C> {
    /// Create a pool that uses `builder` to construct circuits.
    pub(crate) fn new(opts: PoolOptions, builder: CircuitBuilder<C>) -> Self {
        CircuitPool {
            opts,
            builder,
            inner: Mutex::new(Manager {
                domains: HashMap::new(),
                lru: VecDeque::new(),
                domain_evictions: 0,
                worker_evictions: 0,
            }),
        }
    }

    /// Make sure `domain` has a pool, evicting the least recently
    /// used domain if a new pool would exceed the limit.  Any access
    /// counts as use.
    pub async fn ensure_pool(&self, domain: &str) {
        let mut m = self.inner.lock().await;
        self.ensure_pool_locked(&mut m, domain);
    }

    /// Locked half of [`CircuitPool::ensure_pool`].
    fn ensure_pool_locked(&self, m: &mut Manager<C>, domain: &str) {
        if m.domains.contains_key(domain) {
            // Move it to the front of the LRU list.
            if let Some(pos) = m.lru.iter().position(|d| d == domain) {
                let d = m.lru.remove(pos).expect("position vanished");
                m.lru.push_front(d);
            }
            return;
        }

        // Evict least-recently-used domains to make room.  The LRU
        // mutation and the map mutation happen together, under the
        // same lock.
        while m.domains.len() >= self.opts.max_domains.max(1) {
            let Some(victim) = m.lru.pop_back() else {
                break;
            };
            if let Some(mut pool) = m.domains.remove(&victim) {
                pool.terminate();
                m.domain_evictions += 1;
                info!("evicted pool for {} (domain limit)", victim);
            }
        }
        m.domains.insert(domain.to_string(), DomainPool::new());
        m.lru.push_front(domain.to_string());
    }

    /// Check a circuit out of the pool for `domain`.
    ///
    /// Unhealthy workers are evicted first.  The pool is then grown
    /// toward its `pool_size` slot count: as long as a domain has
    /// fewer workers than that, a checkout builds a fresh one rather
    /// than reusing an existing circuit.  At capacity, checkouts
    /// rotate over the healthy workers.
    pub async fn acquire(&self, domain: &str) -> Result<Checkout<C>> {
        let mut m = self.inner.lock().await;
        self.ensure_pool_locked(&mut m, domain);

        // Evict every worker that shouldn't be handed out.
        let mut evicted = 0_u64;
        {
            let pool = m.domains.get_mut(domain).expect("pool just ensured");
            let mut slot = 0;
            while slot < pool.workers.len() {
                let w = &pool.workers[slot];
                let problem = match &w.circ {
                    None => Some(EvictReason::NotConnected),
                    Some(c) if !c.is_open() => Some(EvictReason::Unhealthy),
                    Some(_) => w.health_problem(&self.opts),
                };
                match problem {
                    Some(reason) => {
                        debug!("{}: evicting worker {} ({:?})", domain, slot, reason);
                        let w = pool.workers.remove(slot);
                        if let Some(c) = w.circ {
                            c.close();
                        }
                        evicted += 1;
                    }
                    None => slot += 1,
                }
            }
        }
        m.worker_evictions += evicted;

        // Below capacity: build another worker.  Construction happens
        // with the manager held, so concurrent checkouts for the same
        // domain wait rather than racing twice.
        let pool_size = self.opts.pool_size.max(1);
        let have = m
            .domains
            .get(domain)
            .expect("pool just ensured")
            .workers
            .len();
        if have < pool_size {
            debug!("{}: building worker {} of {}", domain, have + 1, pool_size);
            let built = (self.builder)(domain.to_string()).await;
            let pool = m.domains.get_mut(domain).expect("pool just ensured");
            return match built {
                Ok(circ) => {
                    let mut worker = Worker::new(Some(circ.clone()));
                    worker.stream_count = 1;
                    let slot = pool.workers.len();
                    pool.workers.push(worker);
                    Ok(Checkout {
                        circuit: circ,
                        domain: domain.to_string(),
                        slot,
                    })
                }
                Err(e) => {
                    // Leave an unconnected worker behind; the next
                    // checkout evicts it and tries again.
                    pool.workers.push(Worker::new(None));
                    Err(e)
                }
            };
        }

        // At capacity: rotate over the remaining (healthy) workers.
        let pool = m.domains.get_mut(domain).expect("pool just ensured");
        let slot = pool.next % pool.workers.len();
        pool.next = pool.next.wrapping_add(1);
        let w = &mut pool.workers[slot];
        w.stream_count += 1;
        let circuit = w.circ.clone().expect("worker without circuit");
        Ok(Checkout {
            circuit,
            domain: domain.to_string(),
            slot,
        })
    }

    /// Return a checked-out circuit with a verdict.
    pub async fn release(&self, checkout: Checkout<C>, status: ReturnStatus) {
        let mut m = self.inner.lock().await;
        let opts = self.opts.clone();
        let Some(pool) = m.domains.get_mut(&checkout.domain) else {
            return;
        };
        let Some(w) = pool.workers.get_mut(checkout.slot) else {
            return;
        };

        let evict = match status {
            ReturnStatus::Success { latency_ms } => {
                w.push_latency(latency_ms);
                w.failures = 0;
                w.health_problem(&opts)
            }
            ReturnStatus::Ok => w.health_problem(&opts),
            ReturnStatus::Err => {
                w.failures += 1;
                (w.failures >= opts.max_consecutive_failures)
                    .then_some(EvictReason::TooManyFailures)
            }
        };

        if let Some(reason) = evict {
            debug!(
                "{}: evicting worker {} on release ({:?})",
                checkout.domain, checkout.slot, reason
            );
            let w = pool.workers.remove(checkout.slot);
            if let Some(c) = w.circ {
                c.close();
            }
            m.worker_evictions += 1;
        }
    }

    /// Sweep every pool for dead or unhealthy workers.  Meant to be
    /// called periodically while the client is otherwise idle.
    pub async fn ping_idle(&self) {
        let mut m = self.inner.lock().await;
        let opts = self.opts.clone();
        let mut evicted = 0_u64;
        for (domain, pool) in m.domains.iter_mut() {
            pool.workers.retain_mut(|w| {
                let problem = match &w.circ {
                    None => Some(EvictReason::NotConnected),
                    Some(c) if !c.is_open() => Some(EvictReason::Unhealthy),
                    Some(_) => w.health_problem(&opts),
                };
                match problem {
                    Some(reason) => {
                        debug!("{}: idle eviction ({:?})", domain, reason);
                        if let Some(c) = w.circ.take() {
                            c.close();
                        }
                        evicted += 1;
                        false
                    }
                    None => true,
                }
            });
        }
        m.worker_evictions += evicted;
    }

    /// Return the domains that currently have pools.
    pub async fn domains(&self) -> Vec<String> {
        let m = self.inner.lock().await;
        let mut v: Vec<String> = m.domains.keys().cloned().collect();
        v.sort();
        v
    }

    /// How many domain pools have been evicted for the domain limit.
    pub async fn domain_evictions(&self) -> u64 {
        self.inner.lock().await.domain_evictions
    }

    /// How many workers have been evicted for any reason.
    pub async fn worker_evictions(&self) -> u64 {
        self.inner.lock().await.worker_evictions
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// A fake circuit with a controllable liveness flag.
    #[derive(Clone)]
    struct FakeCirc {
        open: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }
    impl FakeCirc {
        fn new() -> Self {
            FakeCirc {
                open: Arc::new(AtomicBool::new(true)),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }
    impl PoolCircuit for FakeCirc {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
        fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn pool_with(
        opts: PoolOptions,
    ) -> (CircuitPool<FakeCirc>, Arc<AtomicUsize>, Arc<Mutex<Vec<FakeCirc>>>) {
        let builds = Arc::new(AtomicUsize::new(0));
        let made: Arc<Mutex<Vec<FakeCirc>>> = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::clone(&builds);
        let m = Arc::clone(&made);
        let builder: CircuitBuilder<FakeCirc> = Arc::new(move |_domain| {
            let b = Arc::clone(&b);
            let m = Arc::clone(&m);
            Box::pin(async move {
                b.fetch_add(1, Ordering::SeqCst);
                let c = FakeCirc::new();
                m.lock().await.push(c.clone());
                Ok(c)
            })
        });
        (CircuitPool::new(opts, builder), builds, made)
    }

    #[tokio::test]
    async fn lru_eviction_scenario() {
        let opts = PoolOptions {
            max_domains: 2,
            ..PoolOptions::default()
        };
        let (pool, _builds, _made) = pool_with(opts);

        pool.ensure_pool("a").await;
        pool.ensure_pool("b").await;
        // Touch "a" so that "b" becomes the least recently used.
        pool.ensure_pool("a").await;
        pool.ensure_pool("c").await;

        assert_eq!(pool.domains().await, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(pool.domain_evictions().await, 1);
    }

    #[tokio::test]
    async fn eviction_terminates_workers() {
        let opts = PoolOptions {
            max_domains: 1,
            ..PoolOptions::default()
        };
        let (pool, _builds, made) = pool_with(opts);
        let co = pool.acquire("a").await.unwrap();
        pool.release(co, ReturnStatus::Ok).await;

        pool.ensure_pool("b").await; // evicts "a"
        let made = made.lock().await;
        assert_eq!(made.len(), 1);
        assert!(made[0].closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn checkout_reuses_healthy_worker() {
        let opts = PoolOptions {
            pool_size: 1,
            ..PoolOptions::default()
        };
        let (pool, builds, _made) = pool_with(opts);
        let co1 = pool.acquire("x").await.unwrap();
        pool.release(co1, ReturnStatus::Success { latency_ms: 10 })
            .await;
        let co2 = pool.acquire("x").await.unwrap();
        pool.release(co2, ReturnStatus::Ok).await;
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pool_grows_to_pool_size() {
        // Two slots by default: the second checkout builds a second
        // worker even though the first is healthy.
        let (pool, builds, _made) = pool_with(PoolOptions::default());
        let co1 = pool.acquire("x").await.unwrap();
        let co2 = pool.acquire("x").await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_ne!(co1.slot, co2.slot);
        pool.release(co1, ReturnStatus::Ok).await;
        pool.release(co2, ReturnStatus::Ok).await;

        // At capacity, further checkouts rotate over the two workers
        // instead of building more.
        let co3 = pool.acquire("x").await.unwrap();
        let co4 = pool.acquire("x").await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_ne!(co3.slot, co4.slot);
        pool.release(co3, ReturnStatus::Ok).await;
        pool.release(co4, ReturnStatus::Ok).await;
        assert_eq!(pool.worker_evictions().await, 0);
    }

    #[tokio::test]
    async fn dead_circuit_is_replaced() {
        let (pool, builds, made) = pool_with(PoolOptions::default());
        let co = pool.acquire("x").await.unwrap();
        pool.release(co, ReturnStatus::Ok).await;
        // Kill the circuit behind the pool's back.
        made.lock().await[0].open.store(false, Ordering::SeqCst);
        let _co = pool.acquire("x").await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(pool.worker_evictions().await, 1);
    }

    #[tokio::test]
    async fn consecutive_failures_evict() {
        let opts = PoolOptions {
            pool_size: 1,
            ..PoolOptions::default()
        };
        let (pool, builds, _made) = pool_with(opts);
        for _ in 0..3 {
            let co = pool.acquire("x").await.unwrap();
            pool.release(co, ReturnStatus::Err).await;
        }
        // Three consecutive failures retire the worker.
        assert_eq!(pool.worker_evictions().await, 1);
        let _co = pool.acquire("x").await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_reset_on_success() {
        let opts = PoolOptions {
            pool_size: 1,
            ..PoolOptions::default()
        };
        let (pool, builds, _made) = pool_with(opts);
        for _ in 0..2 {
            let co = pool.acquire("x").await.unwrap();
            pool.release(co, ReturnStatus::Err).await;
        }
        let co = pool.acquire("x").await.unwrap();
        pool.release(co, ReturnStatus::Success { latency_ms: 5 }).await;
        for _ in 0..2 {
            let co = pool.acquire("x").await.unwrap();
            pool.release(co, ReturnStatus::Err).await;
        }
        // Still the same worker: the success cleared the counter.
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(pool.worker_evictions().await, 0);
    }

    #[tokio::test]
    async fn slow_worker_degrades_after_three_samples() {
        let opts = PoolOptions {
            pool_size: 1,
            latency_threshold: Duration::from_millis(100),
            ..PoolOptions::default()
        };
        let (pool, _builds, _made) = pool_with(opts);

        // Two slow samples aren't enough to judge.
        for _ in 0..2 {
            let co = pool.acquire("x").await.unwrap();
            pool.release(co, ReturnStatus::Success { latency_ms: 500 })
                .await;
        }
        assert_eq!(pool.worker_evictions().await, 0);

        // The third slow sample makes it Degraded.
        let co = pool.acquire("x").await.unwrap();
        pool.release(co, ReturnStatus::Success { latency_ms: 500 })
            .await;
        assert_eq!(pool.worker_evictions().await, 1);
    }

    #[tokio::test]
    async fn stream_count_retires_worker() {
        let opts = PoolOptions {
            pool_size: 1,
            max_stream_count: 3,
            ..PoolOptions::default()
        };
        let (pool, builds, _made) = pool_with(opts);
        for _ in 0..3 {
            let co = pool.acquire("x").await.unwrap();
            pool.release(co, ReturnStatus::Ok).await;
        }
        // The third release notices the exhausted stream budget.
        assert_eq!(pool.worker_evictions().await, 1);
        let _co = pool.acquire("x").await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ping_idle_sweeps_dead_workers() {
        let (pool, _builds, made) = pool_with(PoolOptions::default());
        let co = pool.acquire("x").await.unwrap();
        pool.release(co, ReturnStatus::Ok).await;
        made.lock().await[0].open.store(false, Ordering::SeqCst);
        pool.ping_idle().await;
        assert_eq!(pool.worker_evictions().await, 1);
    }

    #[tokio::test]
    async fn failed_build_leaves_unconnected_slot() {
        let fail_first = Arc::new(AtomicBool::new(true));
        let ff = Arc::clone(&fail_first);
        let builder: CircuitBuilder<FakeCirc> = Arc::new(move |_| {
            let ff = Arc::clone(&ff);
            Box::pin(async move {
                if ff.swap(false, Ordering::SeqCst) {
                    Err(Error::AllLanesFailed)
                } else {
                    Ok(FakeCirc::new())
                }
            })
        });
        let pool = CircuitPool::new(PoolOptions::default(), builder);

        assert!(pool.acquire("x").await.is_err());
        // The next checkout evicts the unconnected worker and builds
        // a fresh one transparently.
        let co = pool.acquire("x").await.unwrap();
        assert!(co.circuit.is_open());
        assert_eq!(pool.worker_evictions().await, 1);
    }
}
