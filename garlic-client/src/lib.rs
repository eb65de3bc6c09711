//! A fast client for the v3 onion-service protocol.
//!
//! # Overview
//!
//! `garlic-client` ties the lower layers together into something a
//! crawler can use: it bootstraps a network view
//! (`garlic-netstatus`), races rendezvous circuits
//! (`garlic-proto`) against several introduction points at once, and
//! keeps the winners in per-domain pools so that later requests skip
//! the expensive setup.
//!
//! The trade is explicit: short client-side paths and aggressive
//! parallelism buy throughput at the cost of some of the anonymity
//! the reference implementation provides.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> garlic_client::Result<()> {
//! use garlic_client::{GarlicClient, GarlicConfig};
//!
//! let client = GarlicClient::bootstrap(GarlicConfig::default()).await?;
//! let (mut stream, pooled) = client
//!     .stream("duckduckgogg42xjoc72x3sjasowoarfbgcmvfimaftt6twagswzczad.onion", 80)
//!     .await?;
//! stream.write_bytes(b"GET / HTTP/1.0\r\n\r\n").await?;
//! let page = stream.read_to_end().await?;
//! client.report_success(pooled, None).await;
//! # let _ = page;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

mod config;
mod dirops;
mod err;
mod pool;
mod race;

pub use config::{AddressMapFn, GarlicConfig, PoolOptions, RaceOptions};
pub use err::{Error, Result};
pub use pool::{Checkout, EvictReason, PoolCircuit, ReturnStatus};
pub use race::RaceStats;

pub use garlic_netstatus::{OnionAddress, Registry};
pub use garlic_proto::circuit::ClientCirc;
pub use garlic_proto::stream::DataStream;

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// A checked-out rendezvous circuit; give it back with
/// [`GarlicClient::report_success`] or [`GarlicClient::report_failure`].
pub type PooledCircuit = Checkout<Arc<ClientCirc>>;

/// The onion-service client: a network-status registry, a circuit
/// racer, and per-domain circuit pools behind one handle.
pub struct GarlicClient {
    /// The shared network view.
    registry: Arc<Registry>,
    /// Per-domain pools of rendezvous circuits.
    pool: pool::CircuitPool<Arc<ClientCirc>>,
    /// The configuration this client was built with.
    config: GarlicConfig,
}

impl GarlicClient {
    /// Bootstrap a client: load or download the network status, then
    /// stand up the pools.
    pub async fn bootstrap(config: GarlicConfig) -> Result<Self> {
        let registry = Arc::new(
            Registry::bootstrap(config.cache_path.clone(), config.authorities.clone()).await?,
        );
        if config.prefetch_router_descriptors {
            registry.prefetch_descriptors().await?;
        }

        let builder = {
            let registry = Arc::clone(&registry);
            let config = config.clone();
            Arc::new(move |domain: String| -> BoxFuture<'static, Result<Arc<ClientCirc>>> {
                let registry = Arc::clone(&registry);
                let config = config.clone();
                Box::pin(async move {
                    let onion: OnionAddress = domain.parse().map_err(Error::from)?;
                    let (circ, _stats) = race::race(&registry, &config, &onion).await?;
                    Ok(circ)
                })
            })
        };
        let pool = pool::CircuitPool::new(config.pool.clone(), builder);

        info!(
            "client ready ({} routers known)",
            registry.with_status(|s| s.routers.len())
        );
        Ok(GarlicClient {
            registry,
            pool,
            config,
        })
    }

    /// Return the network-status registry this client uses.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Check a ready rendezvous circuit for `domain` out of the pool,
    /// racing a new one into existence if necessary.
    pub async fn get_circuit(&self, domain: &str) -> Result<PooledCircuit> {
        // Parse eagerly so that a bad address fails here, not inside
        // a race.
        let onion: OnionAddress = domain.parse().map_err(Error::from)?;
        self.pool.acquire(onion.domain()).await
    }

    /// Report that a checked-out circuit served a request
    /// successfully, optionally with the observed latency.
    pub async fn report_success(&self, circuit: PooledCircuit, latency_ms: Option<u64>) {
        let status = match latency_ms {
            Some(latency_ms) => ReturnStatus::Success { latency_ms },
            None => ReturnStatus::Ok,
        };
        self.pool.release(circuit, status).await;
    }

    /// Report that a checked-out circuit failed a request.
    pub async fn report_failure(&self, circuit: PooledCircuit) {
        self.pool.release(circuit, ReturnStatus::Err).await;
    }

    /// Open a byte stream to `domain:port` over a pooled rendezvous
    /// circuit.
    ///
    /// The returned [`PooledCircuit`] must be reported back once the
    /// request finishes, with the observed latency if one was
    /// measured.  A failed open is reported for you.
    pub async fn stream(&self, domain: &str, port: u16) -> Result<(DataStream, PooledCircuit)> {
        let pooled = self.get_circuit(domain).await?;
        let start = Instant::now();
        let opened = tokio::time::timeout(
            dirops::REQUEST_TIMEOUT,
            pooled.circuit.begin_stream(domain, port),
        )
        .await;
        match opened {
            Ok(Ok(stream)) => {
                let latency = start.elapsed().as_millis() as u64;
                info!("{}: stream open in {} ms", domain, latency);
                Ok((stream, pooled))
            }
            Ok(Err(e)) => {
                self.report_failure(pooled).await;
                Err(e.into())
            }
            Err(_) => {
                self.report_failure(pooled).await;
                Err(Error::Timeout)
            }
        }
    }

    /// Sweep the pools for dead or unhealthy circuits.  Call this
    /// periodically while idle.
    pub async fn ping_idle(&self) {
        self.pool.ping_idle().await;
    }

    /// Refresh the network status, replacing the consensus and
    /// directory state.
    pub async fn refresh_network_status(&self) -> Result<()> {
        self.registry.refresh().await?;
        Ok(())
    }

    /// Return the race options currently in force.
    pub fn race_options(&self) -> &RaceOptions {
        &self.config.race
    }
}
