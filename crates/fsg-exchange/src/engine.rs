use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fsg_dag::{DagNode, DagReader};
use fsg_protocol::FsgMessage;
use fsg_routing::ContentRouting;
use fsg_store::{Block, BlockStore};
use fsg_types::{Cid, PeerId};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::config::ExchangeConfig;
use crate::error::{ExchangeError, ExchangeResult};
use crate::manager::SessionManager;
use crate::session::{wait_closed, Session, SessionHandler};
use crate::wantlist::WantList;

const ARRIVAL_QUEUE: usize = 4096;

/// Lifecycle of one fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchState {
    /// Waiting for the root block.
    PendingRoot,
    /// Walking newly arrived nodes and wanting their missing children.
    ExpandingWants,
    /// Waiting for wanted blocks.
    Receiving,
    Resolved,
    Failed,
}

/// Outcome of a successful fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchReport {
    pub root: Cid,
    /// Blocks that arrived from peers during this fetch.
    pub received: usize,
    /// Blocks that were already in the local store.
    pub already_local: usize,
    pub elapsed: Duration,
}

struct Fetch {
    root: Cid,
    state: FetchState,
    /// Blocks this fetch is still waiting on.
    pending: HashSet<Cid>,
    seen: HashSet<Cid>,
    received: usize,
    already_local: usize,
    root_attempts: u32,
    root_providers: usize,
}

impl Fetch {
    fn new(root: Cid) -> Self {
        Self {
            root,
            state: FetchState::PendingRoot,
            pending: HashSet::new(),
            seen: HashSet::new(),
            received: 0,
            already_local: 0,
            root_attempts: 0,
            root_providers: 0,
        }
    }

    fn transition(&mut self, next: FetchState) {
        if self.state != next {
            tracing::trace!(root = %self.root.short_hex(), from = ?self.state, to = ?next, "fetch state");
            self.state = next;
        }
    }
}

/// Fetches DAGs from peers and serves local blocks to them.
pub struct BlockExchange {
    local: PeerId,
    store: Arc<dyn BlockStore>,
    router: Arc<dyn ContentRouting>,
    sessions: Arc<SessionManager>,
    wants: WantList,
    arrivals: broadcast::Sender<Cid>,
    config: ExchangeConfig,
    shutdown: watch::Receiver<bool>,
}

impl BlockExchange {
    pub fn new(
        store: Arc<dyn BlockStore>,
        router: Arc<dyn ContentRouting>,
        sessions: Arc<SessionManager>,
        config: ExchangeConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (arrivals, _) = broadcast::channel(ARRIVAL_QUEUE);
        Self {
            local: sessions.local().id,
            store,
            router,
            sessions,
            wants: WantList::new(),
            arrivals,
            config,
            shutdown,
        }
    }

    pub fn wants(&self) -> &WantList {
        &self.wants
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Fetch the DAG under `root` and return its concatenated content.
    pub async fn fetch(&self, root: Cid, deadline: Duration) -> ExchangeResult<Vec<u8>> {
        self.fetch_dag(root, deadline).await?;
        Ok(DagReader::new(self.store.as_ref()).concat(&root)?)
    }

    /// Make every block under `root` local.
    ///
    /// Fails with [`ExchangeError::NoProvidersFound`] when the root is
    /// missing and every root lookup came back empty, and with
    /// [`ExchangeError::FetchTimeout`] when `deadline` passes first.
    pub async fn fetch_dag(&self, root: Cid, deadline: Duration) -> ExchangeResult<FetchReport> {
        let started = Instant::now();
        let deadline_at = tokio::time::Instant::now() + deadline;
        // subscribe before wanting anything so no arrival is missed
        let mut arrivals = self.arrivals.subscribe();
        let mut shutdown = self.shutdown.clone();
        let mut fetch = Fetch::new(root);
        let mut lookups: JoinSet<(Cid, usize)> = JoinSet::new();

        let outcome = self
            .drive(&mut fetch, &mut lookups, &mut arrivals, &mut shutdown, deadline_at)
            .await;

        lookups.abort_all();
        let outstanding: Vec<Cid> = fetch.pending.iter().copied().collect();
        for cid in &outstanding {
            self.wants.release(cid);
        }
        self.sessions.broadcast_cancel(&outstanding).await;

        match outcome {
            Ok(()) => {
                fetch.transition(FetchState::Resolved);
                let report = FetchReport {
                    root,
                    received: fetch.received,
                    already_local: fetch.already_local,
                    elapsed: started.elapsed(),
                };
                tracing::info!(
                    cid = %root,
                    received = report.received,
                    local = report.already_local,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "fetch resolved"
                );
                Ok(report)
            }
            Err(e) => {
                fetch.transition(FetchState::Failed);
                tracing::warn!(cid = %root, error = %e, "fetch failed");
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        fetch: &mut Fetch,
        lookups: &mut JoinSet<(Cid, usize)>,
        arrivals: &mut broadcast::Receiver<Cid>,
        shutdown: &mut watch::Receiver<bool>,
        deadline_at: tokio::time::Instant,
    ) -> ExchangeResult<()> {
        let root = fetch.root;
        let fresh = self.expand(fetch, vec![root])?;
        if fetch.pending.is_empty() {
            return Ok(());
        }
        self.sessions.broadcast_wants(&fresh).await;
        if fetch.pending.contains(&root) {
            fetch.root_attempts = 1;
            self.spawn_lookup(lookups, root, Duration::ZERO);
        }

        let every = self.config.requery_interval();
        let mut requery = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        requery.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !fetch.pending.is_empty() {
            tokio::select! {
                _ = wait_closed(shutdown) => {
                    return Err(ExchangeError::Cancelled { cid: root });
                }
                _ = tokio::time::sleep_until(deadline_at) => {
                    return Err(ExchangeError::FetchTimeout {
                        cid: root,
                        received: fetch.received,
                        outstanding: fetch.pending.len(),
                    });
                }
                arrival = arrivals.recv() => {
                    let arrived: Vec<Cid> = match arrival {
                        Ok(cid) => vec![cid],
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "arrival feed lagged, rescanning store");
                            fetch.pending.iter().copied().collect()
                        }
                        Err(RecvError::Closed) => return Err(ExchangeError::Cancelled { cid: root }),
                    };
                    let fresh = self.absorb(fetch, arrived)?;
                    self.sessions.broadcast_wants(&fresh).await;
                }
                Some(done) = lookups.join_next() => {
                    let Ok((cid, found)) = done else { continue };
                    if cid != root || !fetch.pending.contains(&root) {
                        continue;
                    }
                    fetch.root_providers += found;
                    if fetch.root_providers > 0 {
                        continue;
                    }
                    if fetch.root_attempts >= self.config.root_lookup_attempts {
                        return Err(ExchangeError::NoProvidersFound { cid: root });
                    }
                    fetch.root_attempts += 1;
                    self.spawn_lookup(lookups, root, self.config.root_retry_backoff());
                }
                _ = requery.tick() => {
                    let due = self.wants.due_for_requery(fetch.pending.iter(), every);
                    for cid in due.into_iter().take(self.config.requery_batch) {
                        tracing::debug!(cid = %cid.short_hex(), "re-querying providers");
                        self.spawn_lookup(lookups, cid, Duration::ZERO);
                    }
                }
            }
        }
        Ok(())
    }

    /// Walk from `start` through locally held nodes. Missing CIDs become
    /// pending wants; the newly wanted ones are returned.
    fn expand(&self, fetch: &mut Fetch, start: Vec<Cid>) -> ExchangeResult<Vec<Cid>> {
        fetch.transition(FetchState::ExpandingWants);
        let mut fresh = Vec::new();
        let mut work = start;
        while let Some(cid) = work.pop() {
            if !fetch.seen.insert(cid) {
                continue;
            }
            match self.store.get(&cid) {
                Ok(block) => {
                    fetch.already_local += 1;
                    work.extend(DagNode::decode(&block)?.links());
                }
                Err(e) if e.is_not_found() => {
                    self.wants.add(cid);
                    if self.store.has(&cid)? {
                        // stored between the lookup and the want
                        self.wants.release(&cid);
                        fetch.seen.remove(&cid);
                        work.push(cid);
                        continue;
                    }
                    fetch.pending.insert(cid);
                    fresh.push(cid);
                }
                Err(e) => return Err(e.into()),
            }
        }
        if fetch.pending.contains(&fetch.root) {
            fetch.transition(FetchState::PendingRoot);
        } else {
            fetch.transition(FetchState::Receiving);
        }
        Ok(fresh)
    }

    /// Account for arrived blocks and expand their children.
    fn absorb(&self, fetch: &mut Fetch, arrived: Vec<Cid>) -> ExchangeResult<Vec<Cid>> {
        let mut children = Vec::new();
        for cid in arrived {
            if !fetch.pending.contains(&cid) {
                continue;
            }
            let block = match self.store.get(&cid) {
                Ok(block) => block,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            fetch.pending.remove(&cid);
            fetch.received += 1;
            children.extend(DagNode::decode(&block)?.links());
        }
        if children.is_empty() {
            return Ok(Vec::new());
        }
        self.expand(fetch, children)
    }

    fn spawn_lookup(&self, lookups: &mut JoinSet<(Cid, usize)>, cid: Cid, delay: Duration) {
        let router = Arc::clone(&self.router);
        let sessions = Arc::clone(&self.sessions);
        let local = self.local;
        let limit = self.config.provider_limit;
        let timeout = self.config.provider_timeout();
        lookups.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut providers = router.find_providers(&cid, limit, timeout);
            let mut found = 0;
            while let Some(peer) = providers.next().await {
                if peer.id == local {
                    continue;
                }
                found += 1;
                if sessions.get(&peer.id).is_none() {
                    let sessions = Arc::clone(&sessions);
                    tokio::spawn(async move {
                        if let Err(e) = sessions.open(peer).await {
                            tracing::debug!(peer = %peer, error = %e, "could not open provider session");
                        }
                    });
                }
            }
            tracing::debug!(cid = %cid.short_hex(), found, "provider lookup finished");
            (cid, found)
        });
    }

    /// Store a block received from a peer.
    ///
    /// Verified blocks are always stored; that makes resolution independent
    /// of delivery order. Only blocks on the want-list wake fetches.
    /// Returns whether the block was wanted.
    pub async fn handle_block(&self, from: Option<PeerId>, cid: Cid, data: Vec<u8>) -> ExchangeResult<bool> {
        let block = Block::with_cid(cid, data);
        if !block.verify() {
            tracing::warn!(cid = %cid, peer = ?from, "discarding block with mismatched hash");
            return Err(ExchangeError::InvalidBlock { cid });
        }
        self.store.put(&block)?;
        let wanted = self.wants.remove(&cid);
        if wanted {
            tracing::trace!(cid = %cid.short_hex(), size = block.len(), "wanted block arrived");
            let _ = self.arrivals.send(cid);
            if let Some(session) = from.and_then(|peer| self.sessions.get(&peer)) {
                session.forget_sent_want(&cid);
            }
            self.sessions.broadcast_cancel(&[cid]).await;
        }
        self.sessions.notify_block(&block).await;
        Ok(wanted)
    }

    /// Answer a peer's wants: send what we hold, remember the rest.
    pub async fn handle_want(&self, session: &Arc<Session>, cids: Vec<Cid>) {
        for cid in cids {
            // remember first so a concurrent arrival cannot slip past
            session.remember_want(cid);
            match self.store.has(&cid) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(cid = %cid, error = %e, "store check failed");
                    continue;
                }
            }
            if !session.take_peer_want(&cid) {
                continue;
            }
            let block = match self.store.get(&cid) {
                Ok(block) => block,
                Err(e) => {
                    tracing::warn!(cid = %cid, error = %e, "cannot read wanted block");
                    continue;
                }
            };
            let msg = FsgMessage::Block {
                cid,
                data: block.data().to_vec(),
            };
            if let Err(e) = session.send(msg).await {
                tracing::debug!(peer = %session.remote(), error = %e, "stopped serving wants");
                return;
            }
        }
    }

    pub fn handle_cancel(&self, session: &Arc<Session>, cids: &[Cid]) {
        session.forget_peer_wants(cids);
    }

    /// Offer current wants to a newly opened session.
    pub async fn session_opened(&self, session: &Arc<Session>) {
        let wants = self.wants.snapshot();
        if let Err(e) = session.send_wants(&wants).await {
            tracing::debug!(peer = %session.remote(), error = %e, "could not send wants");
        }
    }

    pub fn session_closed(&self, session: &Arc<Session>) {
        if self.sessions.remove(session) {
            tracing::debug!(peer = %session.remote(), "session removed");
        }
    }
}

#[async_trait]
impl SessionHandler for BlockExchange {
    async fn on_opened(&self, session: Arc<Session>) {
        self.session_opened(&session).await;
    }

    async fn on_want(&self, session: Arc<Session>, cids: Vec<Cid>) {
        self.handle_want(&session, cids).await;
    }

    async fn on_cancel(&self, session: Arc<Session>, cids: Vec<Cid>) {
        self.handle_cancel(&session, &cids);
    }

    async fn on_block(&self, session: Arc<Session>, cid: Cid, data: Vec<u8>) {
        if let Err(e) = self.handle_block(Some(session.remote().id), cid, data).await {
            tracing::debug!(peer = %session.remote(), error = %e, "rejected block");
        }
    }

    async fn on_closed(&self, session: Arc<Session>) {
        self.session_closed(&session);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use fsg_dag::{DagBuilder, DagConfig};
    use fsg_store::InMemoryBlockStore;
    use fsg_types::PeerInfo;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{RngCore, SeedableRng};

    use super::*;
    use crate::testkit::{eventually, test_node, MemoryNet};

    const SMALL: DagConfig = DagConfig {
        chunk_size: 1024,
        max_links: 4,
        max_dir_bytes: fsg_dag::DEFAULT_MAX_DIR_BYTES,
    };

    fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut data = vec![0u8; len];
        StdRng::seed_from_u64(seed).fill_bytes(&mut data);
        data
    }

    fn build(store: &dyn BlockStore, data: &[u8]) -> (Cid, Vec<Cid>) {
        let mut builder = DagBuilder::new(store, SMALL).unwrap();
        let root = builder.add_bytes(data).unwrap();
        (root, builder.written().to_vec())
    }

    struct SlowServer {
        store: Arc<InMemoryBlockStore>,
        slow: Cid,
        delay: Duration,
    }

    #[async_trait]
    impl SessionHandler for SlowServer {
        async fn on_want(&self, session: Arc<Session>, cids: Vec<Cid>) {
            for cid in cids {
                let Ok(block) = self.store.get(&cid) else { continue };
                let delay = if cid == self.slow { self.delay } else { Duration::ZERO };
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let msg = FsgMessage::Block {
                        cid,
                        data: block.data().to_vec(),
                    };
                    let _ = session.send(msg).await;
                });
            }
        }

        async fn on_block(&self, _session: Arc<Session>, _cid: Cid, _data: Vec<u8>) {}

        async fn on_closed(&self, _session: Arc<Session>) {}
    }

    #[tokio::test]
    async fn local_dag_resolves_without_network() {
        let net = MemoryNet::new();
        let node = test_node(&net, 1);
        let data = random_bytes(5_000, 1);
        let (root, written) = build(node.store.as_ref(), &data);

        let report = node.exchange.fetch_dag(root, Duration::from_secs(1)).await.unwrap();
        assert_eq!(report.received, 0);
        assert_eq!(report.already_local, written.len());
        assert_eq!(node.exchange.fetch(root, Duration::from_secs(1)).await.unwrap(), data);
        assert!(node.exchange.wants().is_empty());
    }

    #[tokio::test]
    async fn fetches_dag_from_provider() {
        let net = MemoryNet::new();
        let seeder = test_node(&net, 1);
        let leecher = test_node(&net, 2);
        let data = random_bytes(20_000, 2);
        let (root, written) = build(seeder.store.as_ref(), &data);
        leecher.router.provide(root, seeder.info);

        let fetched = leecher.exchange.fetch(root, Duration::from_secs(5)).await.unwrap();
        assert_eq!(fetched, data);
        for cid in &written {
            assert!(leecher.store.has(cid).unwrap());
        }
        assert!(leecher.exchange.wants().is_empty());
        assert_eq!(leecher.sessions.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_fetches_share_wants() {
        let net = MemoryNet::new();
        let seeder = test_node(&net, 1);
        let leecher = test_node(&net, 2);
        let data = random_bytes(9_000, 3);
        let (root, _) = build(seeder.store.as_ref(), &data);
        leecher.router.provide(root, seeder.info);

        let deadline = Duration::from_secs(5);
        let (a, b) = tokio::join!(
            leecher.exchange.fetch(root, deadline),
            leecher.exchange.fetch(root, deadline),
        );
        assert_eq!(a.unwrap(), data);
        assert_eq!(b.unwrap(), data);
        assert!(leecher.exchange.wants().is_empty());
    }

    #[tokio::test]
    async fn missing_root_without_providers_fails_fast() {
        let net = MemoryNet::new();
        let node = test_node(&net, 1);
        let cid = Cid::from_digest([9; 32]);

        let started = Instant::now();
        let err = node.exchange.fetch(cid, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, ExchangeError::NoProvidersFound { cid: c } if c == cid));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(node.exchange.wants().is_empty());
    }

    #[tokio::test]
    async fn unreachable_provider_times_out() {
        let net = MemoryNet::new();
        let node = test_node(&net, 1);
        let cid = Cid::from_digest([9; 32]);
        let ghost = PeerInfo::new(fsg_types::PeerId::random(), ([127, 0, 0, 1], 9).into());
        node.router.provide(cid, ghost);

        let err = node.exchange.fetch(cid, Duration::from_millis(300)).await.unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::FetchTimeout {
                received: 0,
                outstanding: 1,
                ..
            }
        ));
        assert!(node.exchange.wants().is_empty());
    }

    #[tokio::test]
    async fn shutdown_cancels_fetch() {
        let net = MemoryNet::new();
        let node = test_node(&net, 1);
        let cid = Cid::from_digest([9; 32]);
        let ghost = PeerInfo::new(fsg_types::PeerId::random(), ([127, 0, 0, 1], 9).into());
        node.router.provide(cid, ghost);

        let exchange = Arc::clone(&node.exchange);
        let fetch = tokio::spawn(async move { exchange.fetch(cid, Duration::from_secs(10)).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        node.shutdown.send_replace(true);
        let err = fetch.await.unwrap().unwrap_err();
        assert!(matches!(err, ExchangeError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn slow_block_does_not_hold_back_the_rest() {
        let net = MemoryNet::new();
        let leecher = test_node(&net, 2);
        let server_store = Arc::new(InMemoryBlockStore::new());
        let data = random_bytes(4_096, 4);
        let (root, _) = build(server_store.as_ref(), &data);
        let leaves = DagNode::decode(&server_store.get(&root).unwrap()).unwrap().links();
        assert_eq!(leaves.len(), 4);
        let slow = leaves[2];

        let server_info = PeerInfo::new(fsg_types::PeerId::random(), ([127, 0, 0, 1], 1).into());
        let handler = Arc::new(SlowServer {
            store: Arc::clone(&server_store),
            slow,
            delay: Duration::from_millis(400),
        });
        let (near, far) = tokio::io::duplex(1 << 20);
        let (served, accepted) = tokio::join!(
            Session::establish(
                far,
                server_info,
                false,
                crate::session::Direction::Outbound,
                handler,
                Duration::from_secs(1),
            ),
            leecher.sessions.accept(near),
        );
        let _server = served.unwrap();
        accepted.unwrap();
        leecher.router.provide(root, server_info);

        let exchange = Arc::clone(&leecher.exchange);
        let fetch = tokio::spawn(async move { exchange.fetch(root, Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        for leaf in leaves.iter().filter(|c| **c != slow) {
            assert!(leecher.store.has(leaf).unwrap());
        }
        assert!(!leecher.store.has(&slow).unwrap());

        assert_eq!(fetch.await.unwrap().unwrap(), data);
    }

    #[tokio::test]
    async fn want_is_served_once_block_arrives() {
        let net = MemoryNet::new();
        let holder = test_node(&net, 1);
        let leecher = test_node(&net, 2);
        let block = DagNode::Leaf(Bytes::from_static(b"arrives later")).to_block().unwrap();
        let cid = *block.cid();
        leecher.router.provide(cid, holder.info);

        let exchange = Arc::clone(&leecher.exchange);
        let fetch = tokio::spawn(async move { exchange.fetch(cid, Duration::from_secs(5)).await });

        let leecher_id = leecher.info.id;
        let sessions = Arc::clone(&holder.sessions);
        eventually(move || sessions.get(&leecher_id).is_some_and(|s| s.peer_wants(&cid))).await;

        let wanted = holder
            .exchange
            .handle_block(None, cid, block.data().to_vec())
            .await
            .unwrap();
        assert!(!wanted);
        assert_eq!(fetch.await.unwrap().unwrap(), b"arrives later");
    }

    #[tokio::test]
    async fn corrupt_block_is_rejected() {
        let net = MemoryNet::new();
        let node = test_node(&net, 1);
        let cid = *Block::new(b"real".to_vec()).cid();

        let err = node
            .exchange
            .handle_block(None, cid, b"fake".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidBlock { .. }));
        assert!(!node.store.has(&cid).unwrap());
    }

    #[tokio::test]
    async fn unsolicited_blocks_are_kept() {
        let net = MemoryNet::new();
        let node = test_node(&net, 1);
        let block = Block::new(b"unasked".to_vec());

        let wanted = node
            .exchange
            .handle_block(None, *block.cid(), block.data().to_vec())
            .await
            .unwrap();
        assert!(!wanted);
        assert!(node.store.has(block.cid()).unwrap());
    }

    /// Distance from the leaves; a parent is always higher than its children.
    fn height(store: &dyn BlockStore, cid: &Cid, memo: &mut std::collections::HashMap<Cid, usize>) -> usize {
        if let Some(h) = memo.get(cid) {
            return *h;
        }
        let links = DagNode::decode(&store.get(cid).unwrap()).unwrap().links();
        let h = links.iter().map(|c| height(store, c, memo) + 1).max().unwrap_or(0);
        memo.insert(*cid, h);
        h
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn arrival_order_does_not_change_result(
            len in 0usize..6_000,
            seed in any::<u64>(),
            children_first in any::<bool>(),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let source = InMemoryBlockStore::new();
                let data = random_bytes(len, seed);
                let (root, mut written) = build(&source, &data);
                written.shuffle(&mut StdRng::seed_from_u64(seed));
                if children_first {
                    let mut memo = std::collections::HashMap::new();
                    written.sort_by_cached_key(|cid| height(&source, cid, &mut memo));
                }

                let net = MemoryNet::new();
                let node = test_node(&net, 1);
                // an unreachable provider keeps root lookups from giving up
                node.router.provide(root, PeerInfo::new(PeerId::random(), ([127, 0, 0, 1], 9).into()));
                let deliver = async {
                    eventually(|| node.exchange.wants().contains(&root)).await;
                    for cid in written {
                        let block = source.get(&cid).unwrap();
                        node.exchange.handle_block(None, cid, block.data().to_vec()).await.unwrap();
                        tokio::task::yield_now().await;
                    }
                };
                let (out, ()) = tokio::join!(node.exchange.fetch(root, Duration::from_secs(5)), deliver);
                let out = out.unwrap();
                assert_eq!(out, data);
                assert!(node.exchange.wants().is_empty());
            });
        }
    }
}
