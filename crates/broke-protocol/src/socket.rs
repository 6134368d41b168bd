use crate::codec::{Envelope, EnvelopeCodec};
use crate::endpoint::Endpoint;
use crate::inproc::{self, InprocListener};
use crate::{ProtocolError, Result};

use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Inbound envelopes buffered between connection tasks and the router owner
const INBOUND_BUFFER: usize = 1024;

/// Any byte stream a socket can run over
trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Connection for T {}

type BoxedConnection = Box<dyn Connection>;

#[cfg(unix)]
struct IpcListener {
    listener: tokio::net::UnixListener,
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl Drop for IpcListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Ipc(IpcListener),
    Inproc(InprocListener),
}

impl Listener {
    /// Bind `endpoint`, returning the listener and the address actually bound
    async fn bind(endpoint: &Endpoint) -> Result<(Self, Endpoint)> {
        match endpoint {
            Endpoint::Tcp(address) => {
                let listener = TcpListener::bind(Endpoint::tcp_bind_address(address)).await?;
                let local = listener.local_addr()?;
                Ok((Listener::Tcp(listener), Endpoint::Tcp(local.to_string())))
            }
            #[cfg(unix)]
            Endpoint::Ipc(path) => {
                let listener = tokio::net::UnixListener::bind(path)?;
                let ipc = IpcListener {
                    listener,
                    path: path.clone(),
                };
                Ok((Listener::Ipc(ipc), endpoint.clone()))
            }
            #[cfg(not(unix))]
            Endpoint::Ipc(_) => Err(ProtocolError::InvalidEndpoint(format!(
                "{} is not supported on this platform",
                endpoint
            ))),
            Endpoint::Inproc(name) => {
                let listener = InprocListener::bind(name)?;
                Ok((Listener::Inproc(listener), endpoint.clone()))
            }
        }
    }

    async fn accept(&mut self) -> Result<(BoxedConnection, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                let connection: BoxedConnection = Box::new(stream);
                Ok((connection, addr.to_string()))
            }
            #[cfg(unix)]
            Listener::Ipc(ipc) => {
                let (stream, _) = ipc.listener.accept().await?;
                let connection: BoxedConnection = Box::new(stream);
                Ok((connection, ipc.path.display().to_string()))
            }
            Listener::Inproc(listener) => {
                let stream = listener.accept().await?;
                let connection: BoxedConnection = Box::new(stream);
                Ok((connection, "inproc".to_string()))
            }
        }
    }
}

async fn connect(endpoint: &Endpoint) -> Result<BoxedConnection> {
    match endpoint {
        Endpoint::Tcp(address) => {
            let stream = tokio::net::TcpStream::connect(address.as_str()).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Endpoint::Ipc(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
        #[cfg(not(unix))]
        Endpoint::Ipc(_) => Err(ProtocolError::InvalidEndpoint(format!(
            "{} is not supported on this platform",
            endpoint
        ))),
        Endpoint::Inproc(name) => Ok(Box::new(inproc::connect(name).await?)),
    }
}

/// An envelope received by a router, tagged with the sender's identity and
/// the connection it arrived on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedEnvelope {
    pub identity: String,
    /// Router-assigned id of the connection, unique for the socket's lifetime
    pub connection: u64,
    pub frames: Envelope,
}

/// Current route to one identity
struct Route {
    connection: u64,
    outbound: mpsc::UnboundedSender<Envelope>,
}

type Routes = Arc<DashMap<String, Route>>;

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Broker-side socket: accepts many peers on one endpoint, fans their
/// envelopes into a single inbound stream and routes replies by identity.
///
/// Every peer announces its identity in the first envelope it sends. A later
/// connection with the same identity takes over the route.
pub struct RouterSocket {
    endpoint: Endpoint,
    inbound: mpsc::Receiver<RoutedEnvelope>,
    peers: Routes,
    shutdown: CancellationToken,
}

impl RouterSocket {
    /// Bind `endpoint` and start accepting peers
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        let (listener, local) = Listener::bind(endpoint).await?;
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_BUFFER);
        let peers = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        tokio::spawn(accept_loop(
            listener,
            peers.clone(),
            inbound_tx,
            shutdown.clone(),
        ));

        debug!("Router bound to {}", local);

        Ok(RouterSocket {
            endpoint: local,
            inbound,
            peers,
            shutdown,
        })
    }

    /// The address actually bound (ephemeral TCP ports resolved)
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Wait for the next envelope from any peer
    pub async fn recv(&mut self) -> Result<RoutedEnvelope> {
        self.inbound.recv().await.ok_or(ProtocolError::Closed)
    }

    /// Queue `frames` for the peer named `identity`, whichever connection it
    /// is currently on
    pub fn send(&self, identity: &str, frames: Envelope) -> Result<()> {
        let outbound = self
            .peers
            .get(identity)
            .map(|route| route.outbound.clone())
            .ok_or_else(|| ProtocolError::UnknownPeer(identity.to_string()))?;

        outbound
            .send(frames)
            .map_err(|_| ProtocolError::UnknownPeer(identity.to_string()))
    }

    /// Queue `frames` for `identity` only if it is still on `connection`.
    /// A peer that reconnected since is reported as unknown.
    pub fn send_to(&self, identity: &str, connection: u64, frames: Envelope) -> Result<()> {
        let outbound = self
            .peers
            .get(identity)
            .filter(|route| route.connection == connection)
            .map(|route| route.outbound.clone())
            .ok_or_else(|| {
                ProtocolError::UnknownPeer(format!("{} (connection {})", identity, connection))
            })?;

        outbound
            .send(frames)
            .map_err(|_| ProtocolError::UnknownPeer(identity.to_string()))
    }

    /// Whether a peer with this identity is connected
    pub fn is_connected(&self, identity: &str) -> bool {
        self.peers.contains_key(identity)
    }

    /// Number of connected peers
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

impl Drop for RouterSocket {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    mut listener: Listener,
    peers: Routes,
    inbound: mpsc::Sender<RoutedEnvelope>,
    shutdown: CancellationToken,
) {
    let mut next_connection: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        next_connection += 1;
                        let connection = next_connection;
                        debug!("New connection {} from {}", connection, peer);
                        let peers = peers.clone();
                        let inbound = inbound.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_peer(stream, connection, peers, inbound, shutdown).await {
                                warn!("Connection from {} ended: {}", peer, e);
                            }
                        });
                    }
                    Err(ProtocolError::Closed) => break,
                    Err(e) => {
                        error!("Accept error: {}", e);
                        if !accept_backoff(&shutdown).await {
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Wait before the next accept. Returns false if shut down meanwhile.
async fn accept_backoff(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}

async fn serve_peer(
    stream: BoxedConnection,
    connection: u64,
    peers: Routes,
    inbound: mpsc::Sender<RoutedEnvelope>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut framed = Framed::new(stream, EnvelopeCodec);

    let handshake = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        first = framed.next() => first.ok_or(ProtocolError::Closed)??,
    };
    let identity = parse_handshake(&handshake)?;

    // Replies are bounded by one per outstanding request, so an unbounded
    // channel never lets the router owner block on a slow peer.
    let (outbound_tx, mut outbound) = mpsc::unbounded_channel();
    let route = Route {
        connection,
        outbound: outbound_tx,
    };
    if peers.insert(identity.clone(), route).is_some() {
        warn!("Peer {} reconnected, replacing previous route", identity);
    }
    debug!("Peer {} connected on {}", identity, connection);

    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            Some(frames) = outbound.recv() => {
                if let Err(e) = framed.send(frames).await {
                    break Err(e);
                }
            }
            received = framed.next() => match received {
                Some(Ok(frames)) => {
                    let routed = RoutedEnvelope {
                        identity: identity.clone(),
                        connection,
                        frames,
                    };
                    if inbound.send(routed).await.is_err() {
                        break Ok(());
                    }
                }
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            },
        }
    };

    peers.remove_if(&identity, |_, route| route.connection == connection);
    debug!("Peer {} disconnected from {}", identity, connection);
    result
}

fn parse_handshake(frames: &[Bytes]) -> Result<String> {
    let [identity] = frames else {
        return Err(ProtocolError::MalformedEnvelope(format!(
            "handshake must carry exactly one frame, got {}",
            frames.len()
        )));
    };

    let identity = std::str::from_utf8(identity)
        .map_err(|_| ProtocolError::MalformedEnvelope("identity is not UTF-8".to_string()))?;
    if identity.is_empty() {
        return Err(ProtocolError::MalformedEnvelope("identity is empty".to_string()));
    }
    Ok(identity.to_string())
}

/// Worker-side socket: one connection to a router, identified by a stable name
pub struct DealerSocket {
    identity: String,
    framed: Framed<BoxedConnection, EnvelopeCodec>,
}

impl DealerSocket {
    /// Connect to the router at `endpoint` and announce `identity`
    pub async fn connect(endpoint: &Endpoint, identity: impl Into<String>) -> Result<Self> {
        let identity = identity.into();
        if identity.is_empty() {
            return Err(ProtocolError::MalformedEnvelope("identity is empty".to_string()));
        }

        let connection = connect(endpoint).await?;
        let mut framed = Framed::new(connection, EnvelopeCodec);
        framed.send(vec![Bytes::from(identity.clone())]).await?;

        Ok(DealerSocket { identity, framed })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn send(&mut self, frames: Envelope) -> Result<()> {
        self.framed.send(frames).await
    }

    /// Wait for the next envelope; `Closed` once the router goes away
    pub async fn recv(&mut self) -> Result<Envelope> {
        self.framed.next().await.ok_or(ProtocolError::Closed)?
    }
}
