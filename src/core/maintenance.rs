use log::{debug, info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};

use crate::core::{NodeId, PeerRegistry};
use crate::network::AddressValidator;
use crate::storage::FileCatalog;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub kept: usize,
    pub dropped: Vec<NodeId>,
}

/// Probe every known peer once and keep exactly the ones that answered.
/// No retries: a peer that misses this probe is gone.
pub async fn sweep_peers(registry: &PeerRegistry, validator: AddressValidator) -> SweepReport {
    let probed = registry.snapshot().await;

    let mut probes = JoinSet::new();
    for record in probed.iter().cloned() {
        probes.spawn(async move {
            let alive = validator.validate(&record.ip, record.port).await;
            (record, alive)
        });
    }

    let mut reachable = Vec::with_capacity(probed.len());
    let mut dropped = Vec::new();
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok((record, true)) => reachable.push(record),
            Ok((record, false)) => {
                warn!("Dropping unreachable peer {}", record);
                dropped.push(record.uid);
            }
            Err(e) => warn!("Liveness probe task failed: {}", e),
        }
    }

    let report = SweepReport {
        kept: reachable.len(),
        dropped,
    };
    registry.apply_sweep(&probed, reachable).await;
    debug!(
        "Peer sweep: {} kept, {} dropped",
        report.kept,
        report.dropped.len()
    );
    report
}

/// Runs the periodic peer sweep and catalog rescan until shutdown.
pub struct MaintenanceScheduler {
    shutdown: watch::Receiver<bool>,
}

impl MaintenanceScheduler {
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self { shutdown }
    }

    pub fn spawn_peer_sweep(
        &self,
        registry: PeerRegistry,
        validator: AddressValidator,
        period: Duration,
    ) -> JoinHandle<()> {
        self.spawn_periodic("Peer sweep", period, move || {
            let registry = registry.clone();
            async move {
                sweep_peers(&registry, validator).await;
            }
        })
    }

    pub fn spawn_catalog_refresh(&self, catalog: FileCatalog, period: Duration) -> JoinHandle<()> {
        self.spawn_periodic("Catalog refresh", period, move || {
            let catalog = catalog.clone();
            async move {
                if let Err(e) = catalog.rescan().await {
                    warn!("File scan failed: {}", e);
                }
            }
        })
    }

    /// Run `pass` on every tick. A pass in progress finishes before the
    /// loop notices shutdown.
    fn spawn_periodic<F, Fut>(
        &self,
        name: &'static str,
        period: Duration,
        mut pass: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("{} loop started (every {:?})", name, period);

            while !*shutdown.borrow() {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = ticker.tick() => pass().await,
                }
            }

            info!("{} loop stopped", name);
        })
    }
}
