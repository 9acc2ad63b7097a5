use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use fsg_protocol::{DhtRequest, DhtResponse, FsgCodec, FsgMessage, ProtocolError, PROTOCOL_VERSION};
use fsg_types::{Cid, PeerId, PeerInfo};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{ExchangeError, ExchangeResult};

const OUTBOUND_QUEUE: usize = 1024;

/// Callbacks for inbound session traffic.
///
/// `on_want` and `on_request` run on their own task so a slow handler
/// never stalls the session's reader. The others run inline, in arrival
/// order.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    async fn on_opened(&self, _session: Arc<Session>) {}

    async fn on_want(&self, session: Arc<Session>, cids: Vec<Cid>);

    async fn on_cancel(&self, _session: Arc<Session>, _cids: Vec<Cid>) {}

    async fn on_block(&self, session: Arc<Session>, cid: Cid, data: Vec<u8>);

    async fn on_request(&self, _session: Arc<Session>, _request: DhtRequest) -> DhtResponse {
        DhtResponse::Error {
            message: "DHT requests are not served here".into(),
        }
    }

    async fn on_closed(&self, session: Arc<Session>);
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves once the watched flag becomes `true` (or its sender is gone).
pub(crate) async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    loop {
        let closed = *rx.borrow_and_update();
        if closed || rx.changed().await.is_err() {
            return;
        }
    }
}

/// Which side opened the underlying connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One logical connection to a peer.
///
/// Outbound messages are queued to a writer task; a reader task dispatches
/// inbound messages to the [`SessionHandler`]. The session also tracks the
/// wants it has sent and the wants the peer is waiting on.
pub struct Session {
    local: PeerInfo,
    remote: PeerInfo,
    remote_dht_server: bool,
    direction: Direction,
    outbound: mpsc::Sender<FsgMessage>,
    closed: watch::Sender<bool>,
    pending: Mutex<HashMap<u64, oneshot::Sender<DhtResponse>>>,
    next_request: AtomicU64,
    sent_wants: Mutex<HashSet<Cid>>,
    peer_wants: Mutex<HashSet<Cid>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Exchange `Hello` over `stream` and start the session's tasks.
    pub async fn establish<S>(
        stream: S,
        local: PeerInfo,
        dht_server: bool,
        direction: Direction,
        handler: Arc<dyn SessionHandler>,
        timeout: Duration,
    ) -> ExchangeResult<Arc<Session>>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let hello = FsgMessage::Hello {
            version: PROTOCOL_VERSION,
            peer: local,
            dht_server,
        };
        let greet = async {
            FsgCodec::write_frame(&mut writer, &hello).await?;
            FsgCodec::read_frame(&mut reader).await
        };
        let first = tokio::time::timeout(timeout, greet)
            .await
            .map_err(|_| ExchangeError::Handshake("timed out".into()))??;

        let (remote, remote_dht_server) = match first {
            Some(FsgMessage::Hello {
                version,
                peer,
                dht_server,
            }) => {
                if version != PROTOCOL_VERSION {
                    return Err(ProtocolError::VersionMismatch {
                        local: PROTOCOL_VERSION,
                        remote: version,
                    }
                    .into());
                }
                if peer.id == local.id {
                    return Err(ExchangeError::Handshake("connected to self".into()));
                }
                (peer, dht_server)
            }
            Some(other) => {
                return Err(ExchangeError::Handshake(format!(
                    "expected Hello, got {}",
                    other.type_name()
                )))
            }
            None => {
                return Err(ExchangeError::Handshake(
                    "connection closed during handshake".into(),
                ))
            }
        };

        let (outbound, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (closed, _) = watch::channel(false);
        let session = Arc::new(Session {
            local,
            remote,
            remote_dht_server,
            direction,
            outbound,
            closed,
            pending: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            sent_wants: Mutex::new(HashSet::new()),
            peer_wants: Mutex::new(HashSet::new()),
            tasks: Mutex::new(Vec::new()),
        });

        let writer_task = tokio::spawn(write_loop(writer, rx, session.closed.subscribe()));
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&session), handler));
        lock(&session.tasks).extend([writer_task, reader_task]);

        tracing::info!(peer = %remote, dht_server = remote_dht_server, "session opened");
        Ok(session)
    }

    pub fn local(&self) -> &PeerInfo {
        &self.local
    }

    pub fn remote(&self) -> &PeerInfo {
        &self.remote
    }

    pub fn remote_dht_server(&self) -> bool {
        self.remote_dht_server
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The peer that dialed this connection.
    pub fn initiator(&self) -> PeerId {
        match self.direction {
            Direction::Outbound => self.local.id,
            Direction::Inbound => self.remote.id,
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn closed_error(&self) -> ExchangeError {
        ExchangeError::Session {
            peer: self.remote.id,
            reason: "session closed".into(),
        }
    }

    /// Queue a message for the writer task.
    pub async fn send(&self, msg: FsgMessage) -> ExchangeResult<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        self.outbound
            .send(msg)
            .await
            .map_err(|_| self.closed_error())
    }

    /// Send `Want` for the CIDs not already wanted on this session.
    /// Returns how many were sent.
    pub async fn send_wants(&self, cids: &[Cid]) -> ExchangeResult<usize> {
        let fresh: Vec<Cid> = {
            let mut sent = lock(&self.sent_wants);
            cids.iter().copied().filter(|c| sent.insert(*c)).collect()
        };
        if fresh.is_empty() {
            return Ok(0);
        }
        let count = fresh.len();
        self.send(FsgMessage::Want { cids: fresh }).await?;
        Ok(count)
    }

    /// Send `Cancel` for the CIDs previously wanted on this session.
    pub async fn send_cancel(&self, cids: &[Cid]) -> ExchangeResult<usize> {
        let withdrawn: Vec<Cid> = {
            let mut sent = lock(&self.sent_wants);
            cids.iter().copied().filter(|c| sent.remove(c)).collect()
        };
        if withdrawn.is_empty() {
            return Ok(0);
        }
        let count = withdrawn.len();
        self.send(FsgMessage::Cancel { cids: withdrawn }).await?;
        Ok(count)
    }

    /// The peer delivered `cid`; no cancel is needed for it.
    pub fn forget_sent_want(&self, cid: &Cid) {
        lock(&self.sent_wants).remove(cid);
    }

    pub fn sent_wants(&self) -> Vec<Cid> {
        lock(&self.sent_wants).iter().copied().collect()
    }

    /// Remember that the peer is waiting for `cid`.
    pub fn remember_want(&self, cid: Cid) {
        lock(&self.peer_wants).insert(cid);
    }

    /// Claim a pending peer want. Only one caller gets `true` per want, so
    /// a block is pushed at most once.
    pub fn take_peer_want(&self, cid: &Cid) -> bool {
        lock(&self.peer_wants).remove(cid)
    }

    pub fn peer_wants(&self, cid: &Cid) -> bool {
        lock(&self.peer_wants).contains(cid)
    }

    pub fn forget_peer_wants(&self, cids: &[Cid]) {
        let mut wants = lock(&self.peer_wants);
        for cid in cids {
            wants.remove(cid);
        }
    }

    /// Send a DHT request and wait for the matching response.
    pub async fn request(&self, body: DhtRequest, timeout: Duration) -> ExchangeResult<DhtResponse> {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        if self.is_closed() {
            lock(&self.pending).remove(&id);
            return Err(self.closed_error());
        }
        if let Err(e) = self.send(FsgMessage::Request { id, body }).await {
            lock(&self.pending).remove(&id);
            return Err(e);
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(ExchangeError::RequestTimeout {
                    peer: self.remote.id,
                })
            }
        }
    }

    fn mark_closed(&self) {
        self.closed.send_replace(true);
        lock(&self.pending).clear();
    }

    /// Close the session.
    ///
    /// Queued messages get until `grace` to flush; after that the session's
    /// tasks are aborted. Never waits longer than `grace`.
    pub async fn close(&self, grace: Duration) {
        self.mark_closed();
        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let joined = tokio::time::timeout(grace, async {
            for task in tasks {
                let _ = task.await;
            }
        })
        .await;
        if joined.is_err() {
            tracing::warn!(peer = %self.remote, "session did not close within grace period, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
        tracing::info!(peer = %self.remote, "session closed");
    }

    async fn dispatch(self: &Arc<Self>, msg: FsgMessage, handler: &Arc<dyn SessionHandler>) {
        match msg {
            FsgMessage::Want { cids } => {
                let handler = Arc::clone(handler);
                let session = Arc::clone(self);
                tokio::spawn(async move { handler.on_want(session, cids).await });
            }
            FsgMessage::Cancel { cids } => handler.on_cancel(Arc::clone(self), cids).await,
            FsgMessage::Block { cid, data } => handler.on_block(Arc::clone(self), cid, data).await,
            FsgMessage::Request { id, body } => {
                let handler = Arc::clone(handler);
                let session = Arc::clone(self);
                tokio::spawn(async move {
                    let body = handler.on_request(Arc::clone(&session), body).await;
                    if let Err(e) = session.send(FsgMessage::Response { id, body }).await {
                        tracing::debug!(peer = %session.remote, error = %e, "dropping DHT response");
                    }
                });
            }
            FsgMessage::Response { id, body } => match lock(&self.pending).remove(&id) {
                Some(waiter) => {
                    let _ = waiter.send(body);
                }
                None => tracing::debug!(peer = %self.remote, id, "response for unknown request"),
            },
            FsgMessage::Error { code, message } => {
                tracing::warn!(peer = %self.remote, code, %message, "peer reported error");
            }
            FsgMessage::Hello { .. } => {
                tracing::debug!(peer = %self.remote, "ignoring repeated Hello");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<FsgMessage>, mut closed: watch::Receiver<bool>)
where
    W: AsyncWrite + Unpin,
{
    let pump = async {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = FsgCodec::write_frame(&mut writer, &msg).await {
                tracing::debug!(error = %e, "session write failed");
                return false;
            }
        }
        true
    };
    let healthy = tokio::select! {
        healthy = pump => healthy,
        _ = wait_closed(&mut closed) => true,
    };
    if healthy {
        // flush whatever was queued before close
        while let Ok(msg) = rx.try_recv() {
            if FsgCodec::write_frame(&mut writer, &msg).await.is_err() {
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop<R>(mut reader: R, session: Arc<Session>, handler: Arc<dyn SessionHandler>)
where
    R: AsyncRead + Unpin,
{
    let mut closed = session.closed.subscribe();
    loop {
        let frame = tokio::select! {
            frame = FsgCodec::read_frame(&mut reader) => frame,
            _ = wait_closed(&mut closed) => break,
        };
        match frame {
            Ok(Some(msg)) => session.dispatch(msg, &handler).await,
            Ok(None) => {
                tracing::debug!(peer = %session.remote, "peer closed the connection");
                break;
            }
            Err(e) => {
                tracing::warn!(peer = %session.remote, error = %e, "session read failed");
                break;
            }
        }
    }
    session.mark_closed();
    handler.on_closed(Arc::clone(&session)).await;
}
