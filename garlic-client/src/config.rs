//! Configuration for the garlic client.

use garlic_netstatus::Authority;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A hook that rewrites relay addresses before we connect to them.
///
/// Useful for testing networks, where the addresses in a consensus
/// point somewhere other than where the relays actually listen.
pub type AddressMapFn = Arc<dyn Fn(SocketAddr) -> SocketAddr + Send + Sync>;

/// Options for a single circuit race.
#[derive(Debug, Clone)]
pub struct RaceOptions {
    /// How many rendezvous lanes to launch in parallel.
    pub count: usize,
    /// How many hops to build on the client side, ending at the
    /// rendezvous point.
    pub hops: usize,
    /// How long the whole race may take before giving up.
    pub timeout: Duration,
}

impl Default for RaceOptions {
    fn default() -> Self {
        RaceOptions {
            count: 4,
            hops: 1,
            timeout: Duration::from_millis(30_000),
        }
    }
}

/// Options for the per-domain circuit pools.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// How many worker slots each domain gets.
    pub pool_size: usize,
    /// How many domains may have pools at once; the least recently
    /// used pool is evicted beyond this.
    pub max_domains: usize,
    /// How many streams a single circuit may serve before it is
    /// retired.
    pub max_stream_count: u64,
    /// How old a circuit may grow before it is retired.
    pub max_circuit_age: Duration,
    /// Mean request latency beyond which a circuit counts as
    /// degraded.
    pub latency_threshold: Duration,
    /// How many consecutive failures retire a circuit.
    pub max_consecutive_failures: u32,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            pool_size: 2,
            max_domains: 25,
            max_stream_count: 100,
            max_circuit_age: Duration::from_millis(600_000),
            latency_threshold: Duration::from_millis(5_000),
            max_consecutive_failures: 3,
        }
    }
}

/// Configuration for a [`crate::GarlicClient`].
#[derive(Clone)]
pub struct GarlicConfig {
    /// Options for the per-domain circuit pools.
    pub pool: PoolOptions,
    /// Options for circuit races.
    pub race: RaceOptions,
    /// Directory authorities to use instead of the built-in list.
    pub authorities: Option<Vec<Authority>>,
    /// A hook rewriting relay addresses before we connect.
    pub address_map: Option<AddressMapFn>,
    /// Directory in which to cache the network-status snapshot.
    pub cache_path: Option<PathBuf>,
    /// Whether to batch-fetch all router descriptors at startup.
    pub prefetch_router_descriptors: bool,
}

impl Default for GarlicConfig {
    fn default() -> Self {
        GarlicConfig {
            pool: PoolOptions::default(),
            race: RaceOptions::default(),
            authorities: None,
            address_map: None,
            cache_path: Some(std::env::temp_dir().join("garlic")),
            prefetch_router_descriptors: false,
        }
    }
}

impl std::fmt::Debug for GarlicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarlicConfig")
            .field("pool", &self.pool)
            .field("race", &self.race)
            .field("authorities", &self.authorities)
            .field("address_map", &self.address_map.is_some())
            .field("cache_path", &self.cache_path)
            .field(
                "prefetch_router_descriptors",
                &self.prefetch_router_descriptors,
            )
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = GarlicConfig::default();
        assert_eq!(config.pool.pool_size, 2);
        assert_eq!(config.pool.max_domains, 25);
        assert_eq!(config.pool.max_stream_count, 100);
        assert_eq!(config.pool.max_circuit_age, Duration::from_secs(600));
        assert_eq!(config.pool.latency_threshold, Duration::from_secs(5));
        assert_eq!(config.pool.max_consecutive_failures, 3);
        assert_eq!(config.race.count, 4);
        assert_eq!(config.race.hops, 1);
        assert_eq!(config.race.timeout, Duration::from_secs(30));
        assert!(!config.prefetch_router_descriptors);
        assert_eq!(
            config.cache_path,
            Some(std::env::temp_dir().join("garlic"))
        );
    }
}
