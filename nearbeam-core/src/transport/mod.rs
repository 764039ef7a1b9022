//! Transport contract and shared plumbing
//!
//! A transport is a capability-negotiating peer-discovery and byte-stream
//! provider for exactly one physical medium. The coordinator treats all
//! transports polymorphically; the chunked transfer protocol they execute is
//! identical, with the chunk size as the only medium-specific tunable.

pub mod beacon;
pub mod group;
pub mod radio;

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use nearbeam_common::{Peer, Progress, TransferError, TransferableFile, TransportKind};

use crate::transfer::{TransferAbort, TransferControl};
use beacon::Beacon;

/// Default discovery port for the short-range radio medium
pub const DEFAULT_RADIO_DISCOVERY_PORT: u16 = 48761;

/// Default discovery port for the local wireless group medium
pub const DEFAULT_GROUP_DISCOVERY_PORT: u16 = 48771;

/// Multicast group the wireless group medium announces on
pub const GROUP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 72, 11, 41);

/// Bounded wait for the hello exchange after a socket is established
pub(crate) const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest beacon datagram a discovery listener accepts
pub(crate) const MAX_BEACON_BYTES: usize = 1024;

/// Progress callback invoked with the current file's sanitized name
pub type ProgressFn = Box<dyn FnMut(&str, Progress) + Send>;

/// A capability-negotiating peer-discovery and byte-stream provider for one
/// physical medium
#[async_trait]
pub trait Transport: Send + Sync {
    /// The medium this transport drives
    fn kind(&self) -> TransportKind;

    /// Whether the medium is usable on this host at all
    fn is_available(&self) -> bool;

    /// Whether the medium is currently switched on
    fn is_enabled(&self) -> bool;

    /// Begin emitting discovered peers
    ///
    /// The returned stream is infinite and push-driven; dropping it (or
    /// calling [`stop_discovery`](Transport::stop_discovery)) releases every
    /// listener and halts the scan. A fresh call restarts discovery from
    /// scratch.
    async fn start_discovery(&self) -> Result<DiscoveryStream, TransferError>;

    /// Halt any active scan; safe to call when not discovering
    async fn stop_discovery(&self);

    /// Establish the single active connection to a discovered peer
    async fn connect(&self, peer: &Peer) -> Result<(), TransferError>;

    /// Bounded wait for an inbound connection from any peer
    ///
    /// The transport announces itself while waiting. Surfaces `Timeout`
    /// when no peer connects within `wait`.
    async fn accept_incoming(&self, wait: Duration) -> Result<Peer, TransferError>;

    /// Close the active connection and clear local connection state;
    /// idempotent
    async fn disconnect(&self);

    /// Send one file over the established connection
    async fn send_file(
        &self,
        file: &TransferableFile,
        control: watch::Receiver<TransferControl>,
        on_progress: ProgressFn,
    ) -> Result<(), TransferAbort>;

    /// Receive the next file over the established connection
    ///
    /// `Ok(None)` means the peer cleanly finished its batch.
    async fn receive_file(
        &self,
        dest_dir: &Path,
        control: watch::Receiver<TransferControl>,
        on_progress: ProgressFn,
    ) -> Result<Option<TransferableFile>, TransferAbort>;

    /// The peer the active connection belongs to, if any
    fn connected_peer(&self) -> Option<Peer>;
}

// =============================================================================
// Discovery Stream
// =============================================================================

/// A cancellable stream of discovery events
///
/// Owns the background listener tasks; dropping the stream aborts them, so
/// no scan or socket outlives its consumer.
pub struct DiscoveryStream {
    events: mpsc::Receiver<Result<Peer, TransferError>>,
    tasks: Vec<JoinHandle<()>>,
}

impl DiscoveryStream {
    /// Wrap an event channel and the listener tasks feeding it
    pub fn new(
        events: mpsc::Receiver<Result<Peer, TransferError>>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self { events, tasks }
    }

    /// The next discovery event; `None` once the stream has been stopped
    pub async fn next(&mut self) -> Option<Result<Peer, TransferError>> {
        self.events.recv().await
    }
}

impl Drop for DiscoveryStream {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Aborts the wrapped task when dropped
///
/// Ties a helper task (e.g. an announce loop) to the lifetime of the future
/// that spawned it, so cancellation at any await point still releases it.
pub(crate) struct AbortOnDrop(pub(crate) JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// =============================================================================
// Connection Link
// =============================================================================

/// The single active connection a transport is told to hold
///
/// Session-owned state only; a transport carries no other mutable state
/// across calls.
pub(crate) struct Link {
    peer: StdMutex<Option<Peer>>,
    stream: Mutex<Option<TcpStream>>,
}

impl Link {
    pub(crate) fn new() -> Self {
        Self {
            peer: StdMutex::new(None),
            stream: Mutex::new(None),
        }
    }

    pub(crate) async fn set(&self, peer: Peer, stream: TcpStream) {
        *self.stream.lock().await = Some(stream);
        *self.peer.lock().expect("link peer poisoned") = Some(peer);
    }

    pub(crate) async fn clear(&self) {
        self.stream.lock().await.take();
        self.peer.lock().expect("link peer poisoned").take();
    }

    pub(crate) fn peer(&self) -> Option<Peer> {
        self.peer.lock().expect("link peer poisoned").clone()
    }

    pub(crate) async fn stream(&self) -> tokio::sync::MutexGuard<'_, Option<TcpStream>> {
        self.stream.lock().await
    }
}

// =============================================================================
// Shared socket and handshake helpers
// =============================================================================

/// Build a reusable-address UDP socket bound to `port` on all interfaces
///
/// Address reuse lets several transport instances on one host share a
/// discovery port.
pub(crate) fn bind_reusable_udp(port: u16) -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;
    Ok(socket)
}

/// Finish converting a configured socket into a tokio UDP socket
pub(crate) fn into_tokio_udp(socket: Socket) -> io::Result<UdpSocket> {
    UdpSocket::from_std(socket.into())
}

/// Probe whether the medium's socket layer is usable on this host
pub(crate) fn can_bind_udp() -> bool {
    std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).is_ok()
}

/// Exchange identification beacons over a freshly established stream
///
/// Both sides write first and then read, so the exchange cannot deadlock.
/// Returns the remote side's beacon.
pub(crate) async fn exchange_hello(
    stream: &mut TcpStream,
    ours: &Beacon,
) -> Result<Beacon, TransferError> {
    let payload = ours.encode();
    let len = u16::try_from(payload.len())
        .map_err(|_| TransferError::connection_failed("hello beacon too large"))?;

    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| TransferError::connection_failed("hello write failed").with_cause(e))?;
    stream
        .write_all(&payload)
        .await
        .map_err(|e| TransferError::connection_failed("hello write failed").with_cause(e))?;
    stream
        .flush()
        .await
        .map_err(|e| TransferError::connection_failed("hello write failed").with_cause(e))?;

    let read = async {
        let mut len_bytes = [0u8; 2];
        stream.read_exact(&mut len_bytes).await?;
        let mut body = vec![0u8; u16::from_be_bytes(len_bytes) as usize];
        stream.read_exact(&mut body).await?;
        io::Result::Ok(body)
    };

    let body = match timeout(HELLO_TIMEOUT, read).await {
        Ok(Ok(body)) => body,
        Ok(Err(e)) => {
            return Err(TransferError::connection_failed("hello read failed").with_cause(e));
        }
        Err(_) => return Err(TransferError::timeout("peer sent no hello")),
    };

    Beacon::decode(&body).ok_or_else(|| TransferError::connection_failed("malformed peer hello"))
}
