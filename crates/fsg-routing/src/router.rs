use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use fsg_protocol::{DhtRequest, DhtResponse};
use fsg_types::{Cid, PeerId, PeerInfo};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::{RoutingError, RoutingResult};
use crate::key::Key;
use crate::providers::ProviderStore;
use crate::table::RoutingTable;

/// Bucket size and lookup result width.
pub const K: usize = 20;

/// Parallel requests per lookup round.
pub const ALPHA: usize = 3;

const MAX_ITERATIONS: usize = 20;

/// Whether this node participates in the DHT as a server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Answers DHT requests and stores provider records for others.
    #[default]
    Server,
    /// Issues lookups only; inbound DHT requests are refused.
    Client,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub k: usize,
    pub alpha: usize,
    pub max_iterations: usize,
    pub rpc_timeout_ms: u64,
    pub provider_ttl_secs: u64,
    pub mode: RoutingMode,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            k: K,
            alpha: ALPHA,
            max_iterations: MAX_ITERATIONS,
            rpc_timeout_ms: 5_000,
            provider_ttl_secs: 24 * 60 * 60,
            mode: RoutingMode::Server,
        }
    }
}

impl RouterConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn provider_ttl(&self) -> Duration {
        Duration::from_secs(self.provider_ttl_secs)
    }

    /// How often a provider re-announces what it holds: half the TTL, so a
    /// record is refreshed before any peer expires it.
    pub fn republish_interval(&self) -> Duration {
        self.provider_ttl() / 2
    }
}

/// Sends a DHT request to a peer and waits for its response.
#[async_trait]
pub trait DhtTransport: Send + Sync {
    async fn request(&self, peer: &PeerInfo, request: DhtRequest) -> RoutingResult<DhtResponse>;
}

/// The content routing operations the exchange engine relies on.
pub trait ContentRouting: Send + Sync {
    /// Advertise that this node holds `cid`. Returns immediately.
    fn announce(&self, cid: Cid);

    /// Start a provider lookup bounded by `limit` results and `timeout`.
    fn find_providers(&self, cid: &Cid, limit: usize, timeout: Duration) -> ProviderStream;
}

/// Lazily produced, finite sequence of providers.
///
/// The lookup runs in a background task and stops when the stream is
/// dropped.
pub struct ProviderStream {
    rx: mpsc::Receiver<PeerInfo>,
    task: Option<JoinHandle<()>>,
}

impl ProviderStream {
    pub fn new(rx: mpsc::Receiver<PeerInfo>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// A stream over a fixed set of providers.
    pub fn from_peers(peers: Vec<PeerInfo>) -> Self {
        let (tx, rx) = mpsc::channel(peers.len().max(1));
        for peer in peers {
            let _ = tx.try_send(peer);
        }
        Self::new(rx, None)
    }

    /// The next provider, or `None` once the lookup is exhausted.
    pub async fn next(&mut self) -> Option<PeerInfo> {
        self.rx.recv().await
    }

    pub async fn collect_all(mut self) -> Vec<PeerInfo> {
        let mut out = Vec::new();
        while let Some(peer) = self.next().await {
            out.push(peer);
        }
        out
    }
}

impl Drop for ProviderStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Query {
    Nodes,
    Providers {
        sink: mpsc::Sender<PeerInfo>,
        limit: usize,
        emitted: HashSet<PeerId>,
    },
}

impl Query {
    fn request(&self, key: &Key) -> DhtRequest {
        match self {
            Query::Nodes => DhtRequest::FindNode {
                target: *key.as_bytes(),
            },
            Query::Providers { .. } => DhtRequest::GetProviders {
                key: *key.as_bytes(),
            },
        }
    }

    /// Forward providers to the sink. Returns `false` once the query is done.
    async fn emit(&mut self, local: &PeerId, providers: Vec<PeerInfo>) -> bool {
        let Query::Providers {
            sink,
            limit,
            emitted,
        } = self
        else {
            return true;
        };
        for peer in providers {
            if emitted.len() >= *limit {
                return false;
            }
            if peer.id == *local || !emitted.insert(peer.id) {
                continue;
            }
            if sink.send(peer).await.is_err() {
                return false;
            }
        }
        emitted.len() < *limit
    }
}

struct Inner {
    local: PeerInfo,
    key: Key,
    config: RouterConfig,
    table: RwLock<RoutingTable>,
    providers: RwLock<ProviderStore>,
    transport: Arc<dyn DhtTransport>,
}

/// DHT node: routing table, provider records and iterative lookups.
#[derive(Clone)]
pub struct DhtRouter {
    inner: Arc<Inner>,
}

impl DhtRouter {
    pub fn new(local: PeerInfo, config: RouterConfig, transport: Arc<dyn DhtTransport>) -> Self {
        let table = RoutingTable::new(local.id, config.k);
        let providers = ProviderStore::new(config.provider_ttl());
        Self {
            inner: Arc::new(Inner {
                local,
                key: Key::for_peer(&local.id),
                config,
                table: RwLock::new(table),
                providers: RwLock::new(providers),
                transport,
            }),
        }
    }

    pub fn local(&self) -> &PeerInfo {
        &self.inner.local
    }

    pub fn mode(&self) -> RoutingMode {
        self.inner.config.mode
    }

    fn table(&self) -> RwLockReadGuard<'_, RoutingTable> {
        self.inner.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, RoutingTable> {
        self.inner.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn provider_store(&self) -> RwLockReadGuard<'_, ProviderStore> {
        self.inner.providers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn provider_store_mut(&self) -> RwLockWriteGuard<'_, ProviderStore> {
        self.inner.providers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a DHT server peer we have talked to.
    pub fn observe(&self, peer: PeerInfo) -> bool {
        self.table_mut().insert(peer)
    }

    pub fn forget(&self, peer: &PeerId) -> bool {
        self.table_mut().remove(peer)
    }

    pub fn table_len(&self) -> usize {
        self.table().len()
    }

    pub fn known_peers(&self) -> Vec<PeerInfo> {
        self.table().peers()
    }

    /// Seed the table with `peers` and look up our own key to fill buckets.
    /// Returns the table size afterwards.
    pub async fn bootstrap(&self, peers: &[PeerInfo]) -> usize {
        for peer in peers {
            self.observe(*peer);
        }
        if self.table_len() > 0 {
            let found = self.find_closest(self.inner.key).await;
            tracing::debug!(found = found.len(), "bootstrap self-lookup finished");
        }
        let size = self.table_len();
        tracing::info!(peers = size, "DHT bootstrapped");
        size
    }

    /// Iterative FIND_NODE: up to `k` peers closest to `key`.
    pub async fn find_closest(&self, key: Key) -> Vec<PeerInfo> {
        self.lookup(key, &mut Query::Nodes).await
    }

    /// Start an iterative provider lookup for `cid`.
    ///
    /// Local provider records are yielded first. The lookup ends when
    /// `limit` providers were yielded, no closer peers remain, or `timeout`
    /// elapses.
    pub fn find_providers(&self, cid: &Cid, limit: usize, timeout: Duration) -> ProviderStream {
        let key = Key::for_cid(cid);
        let limit = limit.max(1);
        let (tx, rx) = mpsc::channel(limit);
        let router = self.clone();
        let cid = *cid;
        let task = tokio::spawn(async move {
            let mut query = Query::Providers {
                sink: tx,
                limit,
                emitted: HashSet::new(),
            };
            let run = async {
                let local = router.provider_store().providers(&key);
                if query.emit(&router.inner.local.id, local).await {
                    router.lookup(key, &mut query).await;
                }
            };
            if tokio::time::timeout(timeout, run).await.is_err() {
                tracing::debug!(cid = %cid.short_hex(), "provider lookup timed out");
            }
        });
        ProviderStream::new(rx, Some(task))
    }

    /// Advertise `cid` in the background.
    pub fn announce(&self, cid: Cid) {
        let router = self.clone();
        tokio::spawn(async move {
            router.announce_and_wait(&cid).await;
        });
    }

    /// Advertise many CIDs one after another in a background task.
    /// Resolves to the number of acknowledged records.
    pub fn announce_many(&self, cids: Vec<Cid>) -> JoinHandle<usize> {
        let router = self.clone();
        tokio::spawn(async move {
            let mut acked = 0;
            for cid in &cids {
                acked += router.announce_and_wait(cid).await;
            }
            tracing::debug!(blocks = cids.len(), acked, "announce finished");
            acked
        })
    }

    /// Record ourselves as a provider and send ADD_PROVIDER to the closest
    /// peers. Returns how many peers acknowledged.
    pub async fn announce_and_wait(&self, cid: &Cid) -> usize {
        let key = Key::for_cid(cid);
        let local = self.inner.local;
        if self.inner.config.mode == RoutingMode::Server {
            self.provider_store_mut().add(key, local);
        }
        let closest = self.find_closest(key).await;

        let mut tasks = JoinSet::new();
        for peer in closest {
            let transport = Arc::clone(&self.inner.transport);
            let rpc_timeout = self.inner.config.rpc_timeout();
            tasks.spawn(async move {
                let request = DhtRequest::AddProvider {
                    key: *key.as_bytes(),
                    provider: local,
                };
                matches!(
                    tokio::time::timeout(rpc_timeout, transport.request(&peer, request)).await,
                    Ok(Ok(DhtResponse::Ack))
                )
            });
        }
        let mut acked = 0;
        while let Some(result) = tasks.join_next().await {
            if matches!(result, Ok(true)) {
                acked += 1;
            }
        }
        tracing::trace!(cid = %cid.short_hex(), acked, "announced");
        acked
    }

    /// Answer an inbound DHT request from `from`.
    pub fn handle_request(&self, from: &PeerInfo, request: DhtRequest) -> DhtResponse {
        if self.inner.config.mode == RoutingMode::Client {
            return DhtResponse::Error {
                message: "node runs in DHT client mode".into(),
            };
        }
        let k = self.inner.config.k;
        match request {
            DhtRequest::Ping => DhtResponse::Pong,
            DhtRequest::FindNode { target } => DhtResponse::Nodes {
                peers: self.table().closest(&Key::from_bytes(target), k),
            },
            DhtRequest::GetProviders { key } => {
                let key = Key::from_bytes(key);
                DhtResponse::Providers {
                    providers: self.provider_store().providers(&key),
                    closer: self.table().closest(&key, k),
                }
            }
            DhtRequest::AddProvider { key, provider } => {
                if provider.id != from.id {
                    return DhtResponse::Error {
                        message: "peers may only announce themselves".into(),
                    };
                }
                self.provider_store_mut().add(Key::from_bytes(key), provider);
                DhtResponse::Ack
            }
        }
    }

    /// Drop expired provider records.
    pub fn prune_providers(&self) -> usize {
        self.provider_store_mut().prune()
    }

    async fn lookup(&self, key: Key, query: &mut Query) -> Vec<PeerInfo> {
        let config = &self.inner.config;
        let local_id = self.inner.local.id;
        let distance = |peer: &PeerInfo| Key::for_peer(&peer.id).distance(&key);

        let mut shortlist: BTreeMap<Key, PeerInfo> = self
            .table()
            .closest(&key, config.k)
            .into_iter()
            .map(|p| (distance(&p), p))
            .collect();
        let mut queried: HashSet<PeerId> = HashSet::new();

        for _ in 0..config.max_iterations {
            let batch: Vec<PeerInfo> = shortlist
                .values()
                .take(config.k)
                .filter(|p| !queried.contains(&p.id))
                .take(config.alpha)
                .copied()
                .collect();
            if batch.is_empty() {
                break;
            }

            let mut tasks = JoinSet::new();
            for peer in batch {
                queried.insert(peer.id);
                let transport = Arc::clone(&self.inner.transport);
                let request = query.request(&key);
                let rpc_timeout = config.rpc_timeout();
                tasks.spawn(async move {
                    let result =
                        match tokio::time::timeout(rpc_timeout, transport.request(&peer, request))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(RoutingError::Timeout { peer: peer.id }),
                        };
                    (peer, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let Ok((peer, result)) = joined else {
                    continue;
                };
                let (closer, providers) = match result {
                    Ok(DhtResponse::Nodes { peers }) => (peers, Vec::new()),
                    Ok(DhtResponse::Providers { providers, closer }) => (closer, providers),
                    Ok(other) => {
                        tracing::debug!(peer = %peer.id, response = ?other, "unusable DHT response");
                        shortlist.remove(&distance(&peer));
                        self.forget(&peer.id);
                        continue;
                    }
                    Err(e) => {
                        tracing::debug!(peer = %peer.id, error = %e, "DHT request failed");
                        shortlist.remove(&distance(&peer));
                        self.forget(&peer.id);
                        continue;
                    }
                };
                self.observe(peer);
                for candidate in closer {
                    if candidate.id != local_id {
                        shortlist.entry(distance(&candidate)).or_insert(candidate);
                    }
                }
                if !query.emit(&local_id, providers).await {
                    return shortlist.into_values().take(config.k).collect();
                }
            }
        }
        shortlist.into_values().take(config.k).collect()
    }
}

impl ContentRouting for DhtRouter {
    fn announce(&self, cid: Cid) {
        DhtRouter::announce(self, cid);
    }

    fn find_providers(&self, cid: &Cid, limit: usize, timeout: Duration) -> ProviderStream {
        DhtRouter::find_providers(self, cid, limit, timeout)
    }
}
