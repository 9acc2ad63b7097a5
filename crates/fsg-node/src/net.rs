use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fsg_exchange::{Connection, Dialer, ExchangeError, SessionManager};
use fsg_protocol::{DhtRequest, DhtResponse};
use fsg_routing::{DhtTransport, RoutingError, RoutingResult};
use fsg_types::PeerInfo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Dials peers over TCP.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: SocketAddr) -> io::Result<Box<dyn Connection>> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Resolves once shutdown is signalled or the signal is dropped.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Accept inbound connections until shutdown is signalled.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    sessions: Arc<SessionManager>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let _ = stream.set_nodelay(true);
                    let sessions = Arc::clone(&sessions);
                    tokio::spawn(async move {
                        if let Err(e) = sessions.accept(stream).await {
                            tracing::debug!(%addr, error = %e, "inbound handshake failed");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
        }
    }
    tracing::debug!("listener stopped");
}

/// Carries DHT requests over peer sessions, opening them as needed.
pub struct SessionDht {
    sessions: Arc<SessionManager>,
    timeout: Duration,
}

impl SessionDht {
    pub fn new(sessions: Arc<SessionManager>, timeout: Duration) -> Self {
        Self { sessions, timeout }
    }
}

#[async_trait]
impl DhtTransport for SessionDht {
    async fn request(&self, peer: &PeerInfo, request: DhtRequest) -> RoutingResult<DhtResponse> {
        let session = self
            .sessions
            .open(*peer)
            .await
            .map_err(|e| RoutingError::Unreachable {
                peer: peer.id,
                reason: e.to_string(),
            })?;
        match session.request(request, self.timeout).await {
            Ok(DhtResponse::Error { message }) => Err(RoutingError::Rejected {
                peer: peer.id,
                message,
            }),
            Ok(response) => Ok(response),
            Err(ExchangeError::RequestTimeout { .. }) => Err(RoutingError::Timeout { peer: peer.id }),
            Err(e) => Err(RoutingError::Unreachable {
                peer: peer.id,
                reason: e.to_string(),
            }),
        }
    }
}
