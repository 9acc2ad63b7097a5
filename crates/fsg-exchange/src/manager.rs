use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fsg_protocol::FsgMessage;
use fsg_store::Block;
use fsg_types::{Cid, PeerId, PeerInfo};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;

use crate::config::ExchangeConfig;
use crate::error::{ExchangeError, ExchangeResult};
use crate::session::{Direction, Session, SessionHandler};

/// A byte stream a session can run over.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Opens outbound connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: SocketAddr) -> std::io::Result<Box<dyn Connection>>;
}

/// Owns every open session, at most one per peer.
///
/// A session whose send fails is closed and removed; the wants it carried
/// stay in the global want-list for the remaining sessions.
pub struct SessionManager {
    local: PeerInfo,
    dht_server: bool,
    config: ExchangeConfig,
    dialer: Arc<dyn Dialer>,
    handler: RwLock<Option<Arc<dyn SessionHandler>>>,
    sessions: DashMap<PeerId, Arc<Session>>,
    /// Serializes outbound dials per peer.
    dialing: DashMap<PeerId, Arc<tokio::sync::Mutex<()>>>,
}

impl SessionManager {
    pub fn new(
        local: PeerInfo,
        dht_server: bool,
        dialer: Arc<dyn Dialer>,
        config: ExchangeConfig,
    ) -> Self {
        Self {
            local,
            dht_server,
            config,
            dialer,
            handler: RwLock::new(None),
            sessions: DashMap::new(),
            dialing: DashMap::new(),
        }
    }

    pub fn local(&self) -> &PeerInfo {
        &self.local
    }

    /// Install the handler for inbound traffic. Must be called before any
    /// session is opened.
    pub fn set_handler(&self, handler: Arc<dyn SessionHandler>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn handler(&self) -> ExchangeResult<Arc<dyn SessionHandler>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ExchangeError::ShutDown)
    }

    /// An open session with `peer`, if any.
    pub fn get(&self, peer: &PeerId) -> Option<Arc<Session>> {
        self.sessions
            .get(peer)
            .map(|s| Arc::clone(s.value()))
            .filter(|s| !s.is_closed())
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .filter(|s| !s.is_closed())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Session with a known peer, dialing it if none is open.
    pub async fn open(&self, peer: PeerInfo) -> ExchangeResult<Arc<Session>> {
        if let Some(existing) = self.get(&peer.id) {
            return Ok(existing);
        }
        let gate = Arc::clone(self.dialing.entry(peer.id).or_default().value());
        let _dialing = gate.lock().await;
        if let Some(existing) = self.get(&peer.id) {
            return Ok(existing);
        }
        let opened = self.open_new(peer).await;
        self.dialing.remove_if(&peer.id, |_, current| Arc::ptr_eq(current, &gate));
        opened
    }

    async fn open_new(&self, peer: PeerInfo) -> ExchangeResult<Arc<Session>> {
        let session = self.dial(peer.addr).await?;
        if session.remote().id != peer.id {
            let got = session.remote().id;
            session.close(self.config.close_grace()).await;
            return Err(ExchangeError::Session {
                peer: peer.id,
                reason: format!("address {} belongs to {got}", peer.addr),
            });
        }
        Ok(self.register(session).await)
    }

    /// Session with whoever listens at `addr`.
    pub async fn connect(&self, addr: SocketAddr) -> ExchangeResult<Arc<Session>> {
        let session = self.dial(addr).await?;
        Ok(self.register(session).await)
    }

    /// Run the handshake on an inbound connection and register the session.
    pub async fn accept<S>(&self, stream: S) -> ExchangeResult<Arc<Session>>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let session = Session::establish(
            stream,
            self.local,
            self.dht_server,
            Direction::Inbound,
            self.handler()?,
            self.config.handshake_timeout(),
        )
        .await?;
        Ok(self.register(session).await)
    }

    async fn dial(&self, addr: SocketAddr) -> ExchangeResult<Arc<Session>> {
        let handler = self.handler()?;
        let timeout = self.config.handshake_timeout();
        let stream = tokio::time::timeout(timeout, self.dialer.dial(addr))
            .await
            .map_err(|_| ExchangeError::Handshake(format!("dial {addr} timed out")))?
            .map_err(|e| ExchangeError::Handshake(format!("dial {addr}: {e}")))?;
        Session::establish(
            stream,
            self.local,
            self.dht_server,
            Direction::Outbound,
            handler,
            timeout,
        )
        .await
    }

    /// Record `session` for its peer.
    ///
    /// When an open session already exists, both ends keep the connection
    /// dialed by the lower peer id and close the other one. Two connections
    /// dialed by the same side keep the one registered first.
    async fn register(&self, session: Arc<Session>) -> Arc<Session> {
        let peer = session.remote().id;
        let (kept, dropped) = match self.sessions.entry(peer) {
            Entry::Occupied(mut entry) if !entry.get().is_closed() => {
                if session.initiator() < entry.get().initiator() {
                    let old = entry.insert(Arc::clone(&session));
                    (Arc::clone(&session), Some(old))
                } else {
                    (Arc::clone(entry.get()), Some(Arc::clone(&session)))
                }
            }
            Entry::Occupied(mut entry) => {
                entry.insert(Arc::clone(&session));
                (Arc::clone(&session), None)
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&session));
                (Arc::clone(&session), None)
            }
        };
        if let Some(dropped) = dropped {
            tracing::debug!(
                peer = %peer,
                dialer = %kept.initiator(),
                "duplicate session, closing the other connection"
            );
            let grace = self.config.close_grace();
            tokio::spawn(async move { dropped.close(grace).await });
        }
        if Arc::ptr_eq(&kept, &session) {
            if let Ok(handler) = self.handler() {
                handler.on_opened(Arc::clone(&session)).await;
            }
        }
        kept
    }

    /// Forget `session` if it is still the registered one for its peer.
    pub fn remove(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .remove_if(&session.remote().id, |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    fn drop_session(&self, session: &Arc<Session>, error: &ExchangeError) {
        tracing::warn!(peer = %session.remote(), error = %error, "dropping failed session");
        self.remove(session);
        let session = Arc::clone(session);
        let grace = self.config.close_grace();
        tokio::spawn(async move { session.close(grace).await });
    }

    /// Send wants to every open session. Returns how many sessions took them.
    pub async fn broadcast_wants(&self, cids: &[Cid]) -> usize {
        if cids.is_empty() {
            return 0;
        }
        let mut reached = 0;
        for session in self.sessions() {
            match session.send_wants(cids).await {
                Ok(_) => reached += 1,
                Err(e) => self.drop_session(&session, &e),
            }
        }
        reached
    }

    /// Withdraw wants from every session that was sent them.
    pub async fn broadcast_cancel(&self, cids: &[Cid]) {
        if cids.is_empty() {
            return;
        }
        for session in self.sessions() {
            if let Err(e) = session.send_cancel(cids).await {
                self.drop_session(&session, &e);
            }
        }
    }

    /// Push a newly stored block to every peer waiting on it.
    /// Returns how many peers were served.
    pub async fn notify_block(&self, block: &Block) -> usize {
        let mut served = 0;
        for session in self.sessions() {
            if !session.take_peer_want(block.cid()) {
                continue;
            }
            let msg = FsgMessage::Block {
                cid: *block.cid(),
                data: block.data().to_vec(),
            };
            match session.send(msg).await {
                Ok(()) => served += 1,
                Err(e) => self.drop_session(&session, &e),
            }
        }
        if served > 0 {
            tracing::debug!(cid = %block.cid().short_hex(), served, "served waiting peers");
        }
        served
    }

    pub async fn close(&self, peer: &PeerId) -> bool {
        match self.sessions.remove(peer) {
            Some((_, session)) => {
                session.close(self.config.close_grace()).await;
                true
            }
            None => false,
        }
    }

    /// Close every session concurrently and stop accepting new ones.
    pub async fn close_all(&self) {
        self.handler.write().unwrap_or_else(PoisonError::into_inner).take();
        let peers: Vec<PeerId> = self.sessions.iter().map(|e| *e.key()).collect();
        let mut closing = JoinSet::new();
        for peer in peers {
            if let Some((_, session)) = self.sessions.remove(&peer) {
                let grace = self.config.close_grace();
                closing.spawn(async move { session.close(grace).await });
            }
        }
        let count = closing.len();
        while closing.join_next().await.is_some() {}
        tracing::info!(sessions = count, "all sessions closed");
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("local", &self.local)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testkit::{eventually, test_node, MemoryNet};

    #[tokio::test]
    async fn open_reuses_existing_session() {
        let net = MemoryNet::new();
        let a = test_node(&net, 1);
        let b = test_node(&net, 2);

        let first = a.sessions.open(b.info).await.unwrap();
        let second = a.sessions.open(b.info).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.remote().id, b.info.id);

        let sessions = Arc::clone(&b.sessions);
        eventually(move || sessions.len() == 1).await;
    }

    #[tokio::test]
    async fn concurrent_opens_dial_once() {
        let net = MemoryNet::new();
        let a = test_node(&net, 1);
        let b = test_node(&net, 2);

        let (first, second) = tokio::join!(a.sessions.open(b.info), a.sessions.open(b.info));
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(a.sessions.len(), 1);
        assert_eq!(b.sessions.len(), 1);
        assert!(b.sessions.sessions().iter().all(|s| !s.is_closed()));
    }

    #[tokio::test]
    async fn simultaneous_dials_settle_on_one_connection() {
        let net = MemoryNet::new();
        let a = test_node(&net, 1);
        let b = test_node(&net, 2);
        let lower = a.info.id.min(b.info.id);

        let (from_a, from_b) = tokio::join!(a.sessions.open(b.info), b.sessions.open(a.info));
        from_a.unwrap();
        from_b.unwrap();

        let (a_sessions, b_sessions) = (Arc::clone(&a.sessions), Arc::clone(&b.sessions));
        let (a_id, b_id) = (a.info.id, b.info.id);
        eventually(move || {
            a_sessions.get(&b_id).is_some_and(|s| s.initiator() == lower)
                && b_sessions.get(&a_id).is_some_and(|s| s.initiator() == lower)
        })
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let kept = a.sessions.get(&b_id).unwrap();
        assert_eq!(kept.initiator(), lower);
        assert_eq!(b.sessions.get(&a_id).unwrap().initiator(), lower);

        let cid = Cid::from_digest([9; 32]);
        kept.send_wants(&[cid]).await.unwrap();
        let sessions = Arc::clone(&b.sessions);
        eventually(move || sessions.get(&a_id).is_some_and(|s| s.peer_wants(&cid))).await;
    }

    #[tokio::test]
    async fn open_rejects_wrong_identity() {
        let net = MemoryNet::new();
        let a = test_node(&net, 1);
        let b = test_node(&net, 2);
        let impostor = PeerInfo::new(PeerId::random(), b.info.addr);

        let err = a.sessions.open(impostor).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Session { peer, .. } if peer == impostor.id));
        assert!(a.sessions.get(&b.info.id).is_none());
    }

    #[tokio::test]
    async fn connect_learns_remote_identity() {
        let net = MemoryNet::new();
        let a = test_node(&net, 1);
        let b = test_node(&net, 2);

        let session = a.sessions.connect(b.info.addr).await.unwrap();
        assert_eq!(*session.remote(), b.info);
        let again = a.sessions.connect(b.info.addr).await.unwrap();
        assert!(Arc::ptr_eq(&session, &again));
    }

    #[tokio::test]
    async fn dial_failure_is_a_handshake_error() {
        let net = MemoryNet::new();
        let a = test_node(&net, 1);
        let err = a.sessions.connect(([127, 0, 0, 1], 9).into()).await.unwrap_err();
        assert!(err.is_session_error());
    }

    #[tokio::test]
    async fn wants_and_cancels_reach_peers() {
        let net = MemoryNet::new();
        let a = test_node(&net, 1);
        let b = test_node(&net, 2);
        let session = a.sessions.open(b.info).await.unwrap();
        let cid = Cid::from_digest([5; 32]);

        assert_eq!(a.sessions.broadcast_wants(&[cid]).await, 1);
        assert_eq!(session.sent_wants(), vec![cid]);
        let peer = a.info.id;
        let sessions = Arc::clone(&b.sessions);
        eventually(move || sessions.get(&peer).is_some_and(|s| s.peer_wants(&cid))).await;

        a.sessions.broadcast_cancel(&[cid]).await;
        assert!(session.sent_wants().is_empty());
        let sessions = Arc::clone(&b.sessions);
        eventually(move || sessions.get(&peer).is_some_and(|s| !s.peer_wants(&cid))).await;
    }

    #[tokio::test]
    async fn notify_block_serves_only_waiting_peers() {
        let net = MemoryNet::new();
        let a = test_node(&net, 1);
        let b = test_node(&net, 2);
        let session = a.sessions.open(b.info).await.unwrap();
        let block = Block::new(b"pushed".to_vec());

        assert_eq!(a.sessions.notify_block(&block).await, 0);
        session.remember_want(*block.cid());
        assert_eq!(a.sessions.notify_block(&block).await, 1);
        assert_eq!(a.sessions.notify_block(&block).await, 0);

        let store = Arc::clone(&b.store);
        let cid = *block.cid();
        eventually(move || fsg_store::BlockStore::has(store.as_ref(), &cid).unwrap()).await;
    }

    #[tokio::test]
    async fn close_all_shuts_every_session() {
        let net = MemoryNet::new();
        let a = test_node(&net, 1);
        let b = test_node(&net, 2);
        let c = test_node(&net, 3);
        let to_b = a.sessions.open(b.info).await.unwrap();
        let to_c = a.sessions.open(c.info).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), a.sessions.close_all())
            .await
            .unwrap();
        assert!(to_b.is_closed() && to_c.is_closed());
        assert!(a.sessions.is_empty());
        assert!(matches!(
            a.sessions.open(b.info).await,
            Err(ExchangeError::ShutDown)
        ));

        let sessions = Arc::clone(&b.sessions);
        eventually(move || sessions.is_empty()).await;
    }
}
