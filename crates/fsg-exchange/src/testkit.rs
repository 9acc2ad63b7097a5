//! In-memory network for exercising sessions and fetches.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use fsg_routing::{ContentRouting, ProviderStream};
use fsg_store::InMemoryBlockStore;
use fsg_types::{Cid, PeerId, PeerInfo};
use tokio::sync::watch;

use crate::config::ExchangeConfig;
use crate::engine::BlockExchange;
use crate::manager::{Connection, Dialer, SessionManager};

/// Routes dials to registered session managers over duplex pipes.
#[derive(Default)]
pub(crate) struct MemoryNet {
    listeners: Mutex<HashMap<SocketAddr, Weak<SessionManager>>>,
}

impl MemoryNet {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn listen(&self, manager: &Arc<SessionManager>) {
        self.listeners
            .lock()
            .unwrap()
            .insert(manager.local().addr, Arc::downgrade(manager));
    }
}

pub(crate) struct MemoryDialer(pub(crate) Arc<MemoryNet>);

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, addr: SocketAddr) -> io::Result<Box<dyn Connection>> {
        let target = self
            .0
            .listeners
            .lock()
            .unwrap()
            .get(&addr)
            .and_then(Weak::upgrade)
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "nobody listening"))?;
        let (near, far) = tokio::io::duplex(1 << 20);
        tokio::spawn(async move {
            let _ = target.accept(far).await;
        });
        Ok(Box::new(near))
    }
}

/// Answers provider lookups from a fixed table.
#[derive(Default)]
pub(crate) struct StaticRouter {
    providers: Mutex<HashMap<Cid, Vec<PeerInfo>>>,
    pub(crate) announced: Mutex<Vec<Cid>>,
}

impl StaticRouter {
    pub(crate) fn provide(&self, cid: Cid, peer: PeerInfo) {
        self.providers.lock().unwrap().entry(cid).or_default().push(peer);
    }
}

impl ContentRouting for StaticRouter {
    fn announce(&self, cid: Cid) {
        self.announced.lock().unwrap().push(cid);
    }

    fn find_providers(&self, cid: &Cid, limit: usize, _timeout: std::time::Duration) -> ProviderStream {
        let mut peers = self.providers.lock().unwrap().get(cid).cloned().unwrap_or_default();
        peers.truncate(limit);
        ProviderStream::from_peers(peers)
    }
}

pub(crate) struct TestNode {
    pub(crate) info: PeerInfo,
    pub(crate) store: Arc<InMemoryBlockStore>,
    pub(crate) router: Arc<StaticRouter>,
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) exchange: Arc<BlockExchange>,
    pub(crate) shutdown: watch::Sender<bool>,
}

pub(crate) fn fast_config() -> ExchangeConfig {
    ExchangeConfig {
        provider_timeout_ms: 500,
        requery_interval_ms: 100,
        root_retry_backoff_ms: 20,
        handshake_timeout_ms: 1_000,
        request_timeout_ms: 1_000,
        close_grace_ms: 200,
        ..ExchangeConfig::default()
    }
}

pub(crate) fn test_node(net: &Arc<MemoryNet>, port: u16) -> TestNode {
    let config = fast_config();
    let info = PeerInfo::new(PeerId::random(), ([127, 0, 0, 1], port).into());
    let sessions = Arc::new(SessionManager::new(
        info,
        false,
        Arc::new(MemoryDialer(Arc::clone(net))),
        config.clone(),
    ));
    let store = Arc::new(InMemoryBlockStore::new());
    let router = Arc::new(StaticRouter::default());
    let (shutdown, rx) = watch::channel(false);
    let exchange = Arc::new(BlockExchange::new(
        store.clone(),
        router.clone(),
        Arc::clone(&sessions),
        config,
        rx,
    ));
    sessions.set_handler(exchange.clone());
    net.listen(&sessions);
    TestNode {
        info,
        store,
        router,
        sessions,
        exchange,
        shutdown,
    }
}

pub(crate) async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
