use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use fsg_dag::{DagBuilder, DagReader, DirEntry};
use fsg_exchange::{BlockExchange, Session, SessionHandler, SessionManager};
use fsg_protocol::{DhtRequest, DhtResponse};
use fsg_routing::DhtRouter;
use fsg_store::BlockStore;
use fsg_types::{Cid, IdentityCredential, PeerId, PeerInfo};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};
use crate::net::{accept_loop, stopped, SessionDht, TcpDialer};
use crate::repo::Repo;
use crate::runtime;

const PROVIDER_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Result of publishing a file or directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishReport {
    pub root: Cid,
    /// File content bytes under the root.
    pub size: u64,
    /// Distinct blocks written.
    pub blocks: usize,
}

/// Lets any component request node shutdown.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// Routes inbound session traffic to the DHT router and the exchange.
struct NodeHandler {
    router: DhtRouter,
    exchange: Arc<BlockExchange>,
}

#[async_trait]
impl SessionHandler for NodeHandler {
    async fn on_opened(&self, session: Arc<Session>) {
        if session.remote_dht_server() {
            self.router.observe(*session.remote());
        }
        self.exchange.session_opened(&session).await;
    }

    async fn on_want(&self, session: Arc<Session>, cids: Vec<Cid>) {
        self.exchange.handle_want(&session, cids).await;
    }

    async fn on_cancel(&self, session: Arc<Session>, cids: Vec<Cid>) {
        self.exchange.handle_cancel(&session, &cids);
    }

    async fn on_block(&self, session: Arc<Session>, cid: Cid, data: Vec<u8>) {
        if let Err(e) = self.exchange.handle_block(Some(session.remote().id), cid, data).await {
            tracing::debug!(peer = %session.remote(), error = %e, "rejected block");
        }
    }

    async fn on_request(&self, session: Arc<Session>, request: DhtRequest) -> DhtResponse {
        tracing::trace!(peer = %session.remote(), request = request.name(), "DHT request");
        self.router.handle_request(session.remote(), request)
    }

    async fn on_closed(&self, session: Arc<Session>) {
        self.exchange.session_closed(&session);
    }
}

/// A running node.
pub struct Node {
    config: NodeConfig,
    info: PeerInfo,
    repo: Repo,
    router: DhtRouter,
    sessions: Arc<SessionManager>,
    exchange: Arc<BlockExchange>,
    shutdown: ShutdownHandle,
    /// Every block this node has published, re-announced until shutdown.
    published: Arc<Mutex<BTreeSet<Cid>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Start a node: create its repo, bind the listener, join the DHT.
    pub async fn spawn(config: NodeConfig, identity: IdentityCredential) -> NodeResult<Self> {
        runtime::ensure_initialized()?;
        config.validate()?;
        let repo = Repo::create_temp(&config, &identity)?;

        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| NodeError::Bind {
                addr: config.listen,
                source,
            })?;
        let bound = listener
            .local_addr()
            .map_err(|source| NodeError::Bind {
                addr: config.listen,
                source,
            })?;
        let info = PeerInfo::new(PeerId::derive(&identity), advertised_addr(&config, bound));

        let (tx, rx) = watch::channel(false);
        let shutdown = ShutdownHandle { tx: Arc::new(tx) };
        let sessions = Arc::new(SessionManager::new(
            info,
            config.dht_server(),
            Arc::new(TcpDialer),
            config.exchange.clone(),
        ));
        let transport = SessionDht::new(Arc::clone(&sessions), config.exchange.request_timeout());
        let router = DhtRouter::new(info, config.router.clone(), Arc::new(transport));
        let store: Arc<dyn BlockStore> = repo.store().clone();
        let exchange = Arc::new(BlockExchange::new(
            store,
            Arc::new(router.clone()),
            Arc::clone(&sessions),
            config.exchange.clone(),
            rx.clone(),
        ));
        sessions.set_handler(Arc::new(NodeHandler {
            router: router.clone(),
            exchange: Arc::clone(&exchange),
        }));

        let accept = tokio::spawn(accept_loop(listener, Arc::clone(&sessions), rx.clone()));
        let prune = tokio::spawn(prune_loop(router.clone(), rx.clone()));
        let published = Arc::new(Mutex::new(BTreeSet::new()));
        let republish = tokio::spawn(republish_loop(
            router.clone(),
            Arc::clone(&published),
            config.router.republish_interval(),
            rx,
        ));

        tracing::info!(
            peer = %info,
            mode = ?config.router.mode,
            repo = %repo.path().display(),
            "node started"
        );
        let experimental = config.experimental.enabled();
        if !experimental.is_empty() {
            tracing::info!(features = ?experimental, "experimental features enabled");
        }

        let node = Self {
            config,
            info,
            repo,
            router,
            sessions,
            exchange,
            shutdown,
            published,
            tasks: Mutex::new(vec![accept, prune, republish]),
        };
        node.bootstrap().await;
        Ok(node)
    }

    async fn bootstrap(&self) {
        let mut seeds = Vec::new();
        for addr in &self.config.bootstrap {
            match self.sessions.connect(*addr).await {
                Ok(session) if session.remote_dht_server() => seeds.push(*session.remote()),
                Ok(_) => {}
                Err(e) => tracing::warn!(%addr, error = %e, "bootstrap peer unreachable"),
            }
        }
        if !self.config.bootstrap.is_empty() {
            self.router.bootstrap(&seeds).await;
        }
    }

    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub fn store(&self) -> &dyn BlockStore {
        self.repo.store().as_ref()
    }

    pub fn router(&self) -> &DhtRouter {
        &self.router
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn exchange(&self) -> &Arc<BlockExchange> {
        &self.exchange
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Add a file or directory to the local store and announce its blocks.
    /// The blocks are re-announced every half provider TTL afterwards.
    ///
    /// With `wrap`, a single file is placed in a one-entry directory so
    /// its name is kept.
    pub async fn publish(&self, path: &Path, wrap: bool) -> NodeResult<PublishReport> {
        let mut builder = DagBuilder::new(self.store(), self.config.dag.clone())?;
        let mut root = builder.add_path(path)?;
        if wrap && path.is_file() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| NodeError::Config(format!("{} has no file name", path.display())))?;
            root = builder.wrap(&name, root)?;
        }
        let report = PublishReport {
            root,
            size: builder.content_bytes(),
            blocks: builder.written().len(),
        };
        let written = builder.written().to_vec();
        drop(builder);

        // peers may already be waiting for these
        for cid in &written {
            let block = self.store().get(cid)?;
            self.sessions.notify_block(&block).await;
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(written.iter().copied());
        self.router.announce_many(written);
        tracing::info!(cid = %root, size = report.size, blocks = report.blocks, "published");
        Ok(report)
    }

    /// Fetch `cid` and write it under `out_dir/<cid>`.
    pub async fn fetch_to(&self, cid: Cid, out_dir: &Path, deadline: Duration) -> NodeResult<PathBuf> {
        self.exchange.fetch_dag(cid, deadline).await?;
        std::fs::create_dir_all(out_dir).map_err(|e| NodeError::io(out_dir, e))?;
        let dest = out_dir.join(cid.to_string());
        let written = DagReader::new(self.store()).write_to(&cid, &dest)?;
        tracing::info!(cid = %cid, bytes = written, dest = %dest.display(), "fetched");
        Ok(dest)
    }

    /// Fetch `cid` and return its concatenated content.
    pub async fn fetch_bytes(&self, cid: Cid, deadline: Duration) -> NodeResult<Vec<u8>> {
        Ok(self.exchange.fetch(cid, deadline).await?)
    }

    /// Blocks this node keeps announcing.
    pub fn published(&self) -> Vec<Cid> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Entries under a locally held root.
    pub fn list(&self, cid: &Cid) -> NodeResult<Vec<DirEntry>> {
        Ok(DagReader::new(self.store()).list(cid)?)
    }

    /// Stop accepting peers, cancel fetches and close every session within
    /// the configured grace period. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        let grace = self.config.shutdown_grace();
        if tokio::time::timeout(grace, self.sessions.close_all()).await.is_err() {
            tracing::warn!(grace_ms = grace.as_millis() as u64, "sessions still closing after grace period");
        }
        tracing::info!(peer = %self.info, "node stopped");
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("info", &self.info)
            .field("repo", &self.repo)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

fn advertised_addr(config: &NodeConfig, bound: SocketAddr) -> SocketAddr {
    if let Some(addr) = config.announce {
        return addr;
    }
    if bound.ip().is_unspecified() {
        let loopback = match bound {
            SocketAddr::V4(_) => std::net::IpAddr::from([127, 0, 0, 1]),
            SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
        };
        return SocketAddr::new(loopback, bound.port());
    }
    bound
}

async fn prune_loop(router: DhtRouter, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(PROVIDER_PRUNE_INTERVAL);
    tick.tick().await;
    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            _ = tick.tick() => {
                let pruned = router.prune_providers();
                if pruned > 0 {
                    tracing::debug!(pruned, "expired provider records dropped");
                }
            }
        }
    }
}

/// Refresh provider records for every published block before they expire.
async fn republish_loop(
    router: DhtRouter,
    published: Arc<Mutex<BTreeSet<Cid>>>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            _ = tick.tick() => {
                let cids: Vec<Cid> = published
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .copied()
                    .collect();
                if cids.is_empty() {
                    continue;
                }
                let mut acked = 0;
                for cid in &cids {
                    acked += router.announce_and_wait(cid).await;
                }
                tracing::debug!(blocks = cids.len(), acked, "republished provider records");
            }
        }
    }
}
