//! Consul-driven fleet reconciliation.
//!
//! A single long-running task holds a blocking query open against the
//! directory and rebuilds the fleet from each snapshot. Servers whose ID
//! persists keep their live TCP connection; new ones are dialed; absent
//! ones are closed by the registry swap.

use crate::client::ClientRegistry;
use crate::fleet::{FleetRegistry, GameServer};
use crate::upstream;
use external_services::{ConsulClient, ServiceEntry};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Pause before retrying after a failed directory query.
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Metadata used for change detection between snapshots. Load changes
/// alone are not "changes"; they only retune selection.
#[derive(Clone, PartialEq, Eq)]
struct ServerMeta {
    ip: String,
    port: u16,
    game_types: Vec<String>,
}

/// The discovery loop task.
pub struct DiscoveryService {
    consul: ConsulClient,
    service_name: String,
    query_interval: Duration,
    fleet: Arc<FleetRegistry>,
    clients: Arc<ClientRegistry>,
}

impl DiscoveryService {
    pub fn new(
        consul: ConsulClient,
        service_name: String,
        query_interval: Duration,
        fleet: Arc<FleetRegistry>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        Self {
            consul,
            service_name,
            query_interval,
            fleet,
            clients,
        }
    }

    /// Run until the shutdown channel fires.
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut last_index: u64 = 0;
        let mut last_seen: HashMap<String, ServerMeta> = HashMap::new();

        info!(service = %self.service_name, "discovery loop started");

        loop {
            let query = self
                .consul
                .health_service(&self.service_name, last_index, self.query_interval);

            let (entries, new_index) = tokio::select! {
                _ = shutdown_rx.recv() => break,
                result = query => match result {
                    Ok(ok) => ok,
                    Err(e) => {
                        error!(service = %self.service_name, error = %e, "directory query failed");
                        tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            _ = tokio::time::sleep(RETRY_BACKOFF) => continue,
                        }
                    }
                }
            };

            // Blocking-query contract: a cursor that goes backwards must
            // be reset, otherwise the next wait can hang on a stale index.
            if new_index < last_index {
                warn!(old = last_index, new = new_index, "directory index went backwards, resetting");
                last_index = 0;
            } else {
                last_index = new_index;
            }

            let (next, changed) = self.reconcile(&entries, &last_seen).await;

            // Detect removals against the previous snapshot too.
            let removed: Vec<&String> = last_seen
                .keys()
                .filter(|id| !next.contains_key(*id))
                .collect();
            let changed = changed || !removed.is_empty();
            for id in removed {
                info!(server = %id, "game server went offline");
            }

            self.fleet.replace_all(next.clone()).await;

            if changed {
                self.log_fleet(&entries, &next).await;
            }

            let mut seen = HashMap::new();
            for (id, server) in &next {
                seen.insert(
                    id.clone(),
                    ServerMeta {
                        ip: server.ip.clone(),
                        port: server.port,
                        game_types: server.game_types().await,
                    },
                );
            }
            last_seen = seen;
        }

        info!("discovery loop stopped");
    }

    /// Build the next fleet map from a directory snapshot. Existing
    /// servers are carried over with refreshed metadata; new ones are
    /// dialed and get a reader task. A candidate that fails to dial is
    /// dropped for this round and retried on the next change.
    async fn reconcile(
        &self,
        entries: &[ServiceEntry],
        last_seen: &HashMap<String, ServerMeta>,
    ) -> (HashMap<String, Arc<GameServer>>, bool) {
        let current = self.fleet.snapshot().await;
        let mut next: HashMap<String, Arc<GameServer>> = HashMap::new();
        let mut changed = false;

        for entry in entries {
            let svc = &entry.service;
            let meta = ServerMeta {
                ip: svc.address.clone(),
                port: svc.port,
                game_types: svc.tags.clone(),
            };
            if last_seen.get(&svc.id) != Some(&meta) {
                changed = true;
            }

            if let Some(existing) = current.get(&svc.id) {
                existing.set_meta(svc.tags.clone(), svc.weights.passing).await;
                next.insert(svc.id.clone(), existing.clone());
                continue;
            }

            let server = Arc::new(GameServer::new(
                svc.id.clone(),
                svc.address.clone(),
                svc.port,
                svc.tags.clone(),
                svc.weights.passing,
            ));
            match upstream::ensure_connected(&server, &self.clients).await {
                Ok(()) => {
                    info!(
                        server = %svc.id,
                        addr = format_args!("{}:{}", svc.address, svc.port),
                        game_types = ?svc.tags,
                        "added game server"
                    );
                    next.insert(svc.id.clone(), server);
                }
                Err(e) => {
                    error!(
                        server = %svc.id,
                        addr = format_args!("{}:{}", svc.address, svc.port),
                        error = %e,
                        "failed to connect to new game server, will retry on next change"
                    );
                }
            }
        }

        (next, changed)
    }

    /// Verbose fleet dump, only emitted when the snapshot changed.
    async fn log_fleet(&self, entries: &[ServiceEntry], fleet: &HashMap<String, Arc<GameServer>>) {
        info!(
            service = %self.service_name,
            instances = entries.len(),
            "discovery update"
        );
        for entry in entries {
            let svc = &entry.service;
            info!(
                id = %svc.id,
                addr = format_args!("{}:{}", svc.address, svc.port),
                load = svc.weights.passing,
                game_types = ?svc.tags,
                status = entry.aggregated_status(),
                "  instance"
            );
        }

        let mut mapping: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (id, server) in fleet {
            for game_type in server.game_types().await {
                mapping.entry(game_type).or_default().push(id.clone());
            }
        }
        if mapping.is_empty() {
            warn!("no game type mappings in fleet");
            return;
        }
        for (game_type, mut servers) in mapping {
            servers.sort();
            info!(game_type = %game_type, servers = ?servers, "game type mapping");
        }
    }
}
