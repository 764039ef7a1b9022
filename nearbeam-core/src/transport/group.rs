//! Local wireless group transport
//!
//! The high-throughput medium: devices on the same group network find each
//! other through multicast beacons and stream over TCP with a large chunk
//! size.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::timeout;

use nearbeam_common::{Peer, TransferError, TransferableFile, TransportKind};

use super::beacon::Beacon;
use super::{
    AbortOnDrop, DEFAULT_GROUP_DISCOVERY_PORT, DiscoveryStream, GROUP_MULTICAST_ADDR, Link,
    MAX_BEACON_BYTES, ProgressFn, Transport, bind_reusable_udp, can_bind_udp, exchange_hello,
    into_tokio_udp,
};
use crate::capability::CapabilityGate;
use crate::transfer::{self, TransferAbort, TransferControl, TransferTuning};

/// Chunk size for the high-throughput group link
const GROUP_CHUNK_SIZE: usize = 256 * 1024;

/// Configuration for the local wireless group medium
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Name announced to peers
    pub display_name: String,
    /// Whether the medium is switched on
    pub enabled: bool,
    /// UDP port beacons are exchanged on
    pub discovery_port: u16,
    /// Multicast group joined for discovery
    pub multicast_addr: Ipv4Addr,
    /// Where announcements are sent; `None` means the multicast group
    pub announce_target: Option<SocketAddr>,
    /// Interval between announcements while waiting for an inbound peer
    pub announce_interval: Duration,
    /// Bounded wait for an outbound connection attempt
    pub connect_timeout: Duration,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            display_name: "nearbeam device".to_string(),
            enabled: true,
            discovery_port: DEFAULT_GROUP_DISCOVERY_PORT,
            multicast_addr: GROUP_MULTICAST_ADDR,
            announce_target: None,
            announce_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Transport for the local wireless group medium
pub struct GroupTransport {
    config: GroupConfig,
    gate: Arc<dyn CapabilityGate>,
    identity: String,
    link: Link,
    known_addrs: Arc<StdMutex<HashMap<String, SocketAddr>>>,
    scan_tasks: StdMutex<Vec<AbortHandle>>,
    tuning: TransferTuning,
}

impl GroupTransport {
    /// Create a group transport with a freshly generated device identity
    pub fn new(config: GroupConfig, gate: Arc<dyn CapabilityGate>) -> Self {
        Self {
            config,
            gate,
            identity: Peer::random_identity(),
            link: Link::new(),
            known_addrs: Arc::new(StdMutex::new(HashMap::new())),
            scan_tasks: StdMutex::new(Vec::new()),
            tuning: TransferTuning::for_chunk_size(GROUP_CHUNK_SIZE),
        }
    }

    /// The identity announced to peers
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn check_usable(&self) -> Result<(), TransferError> {
        if !self.gate.has_required_permissions(self.kind()) {
            return Err(TransferError::permission_denied(
                "local wireless group permissions not granted",
            ));
        }
        if !self.config.enabled {
            return Err(TransferError::unsupported(
                "local wireless group networking is disabled",
            ));
        }
        Ok(())
    }

    fn announce_target(&self) -> SocketAddr {
        self.config.announce_target.unwrap_or_else(|| {
            SocketAddr::from((self.config.multicast_addr, self.config.discovery_port))
        })
    }

    /// Bind the discovery listener and join the multicast group
    fn bind_group_listener(&self) -> std::io::Result<UdpSocket> {
        let socket = bind_reusable_udp(self.config.discovery_port)?;
        socket.join_multicast_v4(&self.config.multicast_addr, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;
        into_tokio_udp(socket)
    }
}

#[async_trait]
impl Transport for GroupTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LocalWirelessGroup
    }

    fn is_available(&self) -> bool {
        can_bind_udp()
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn start_discovery(&self) -> Result<DiscoveryStream, TransferError> {
        self.check_usable()?;
        self.stop_discovery().await;
        self.known_addrs
            .lock()
            .expect("known addrs poisoned")
            .clear();

        let socket = self.bind_group_listener().map_err(|e| {
            TransferError::connection_failed("cannot join group discovery").with_cause(e)
        })?;

        let (tx, rx) = mpsc::channel(64);
        let own_identity = self.identity.clone();
        let known = self.known_addrs.clone();

        let listener = tokio::spawn(async move {
            let mut buf = [0u8; MAX_BEACON_BYTES];
            loop {
                let (len, from) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(_) => break,
                };
                let Some(beacon) = Beacon::decode(&buf[..len]) else {
                    continue;
                };
                if beacon.identity == own_identity {
                    continue;
                }

                known
                    .lock()
                    .expect("known addrs poisoned")
                    .insert(beacon.identity.clone(), SocketAddr::new(from.ip(), beacon.tcp_port));

                let peer = Peer::new(
                    beacon.identity,
                    beacon.display_name,
                    TransportKind::LocalWirelessGroup,
                );
                if tx.send(Ok(peer)).await.is_err() {
                    break;
                }
            }
        });

        *self.scan_tasks.lock().expect("scan tasks poisoned") = vec![listener.abort_handle()];
        Ok(DiscoveryStream::new(rx, vec![listener]))
    }

    async fn stop_discovery(&self) {
        for task in self
            .scan_tasks
            .lock()
            .expect("scan tasks poisoned")
            .drain(..)
        {
            task.abort();
        }
    }

    async fn connect(&self, peer: &Peer) -> Result<(), TransferError> {
        self.check_usable()?;

        let addr = self
            .known_addrs
            .lock()
            .expect("known addrs poisoned")
            .get(&peer.identity)
            .copied()
            .ok_or_else(|| {
                TransferError::peer_not_found(format!(
                    "{} was not seen during discovery",
                    peer.identity
                ))
            })?;

        let mut stream = match timeout(self.config.connect_timeout, TcpStream::connect(addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(
                    TransferError::connection_failed(format!("cannot reach {}", peer.display_name))
                        .with_cause(e),
                );
            }
            Err(_) => {
                return Err(TransferError::timeout(format!(
                    "{} did not answer within {:?}",
                    peer.display_name, self.config.connect_timeout
                )));
            }
        };

        let ours = Beacon::new(self.identity.clone(), self.config.display_name.clone(), 0);
        let remote = exchange_hello(&mut stream, &ours).await?;
        if remote.identity != peer.identity {
            return Err(TransferError::connection_failed(format!(
                "answering device identifies as {}, expected {}",
                remote.identity, peer.identity
            )));
        }

        self.link.set(peer.clone().connected(), stream).await;
        Ok(())
    }

    async fn accept_incoming(&self, wait: Duration) -> Result<Peer, TransferError> {
        self.check_usable()?;

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| {
                TransferError::connection_failed("cannot open group transfer listener")
                    .with_cause(e)
            })?;
        let tcp_port = listener
            .local_addr()
            .map_err(|e| {
                TransferError::connection_failed("cannot resolve listener address").with_cause(e)
            })?
            .port();

        let beacon = Beacon::new(
            self.identity.clone(),
            self.config.display_name.clone(),
            tcp_port,
        );
        let target = self.announce_target();
        let interval = self.config.announce_interval;
        let _announcer = AbortOnDrop(tokio::spawn(async move {
            let Ok(socket) = bind_reusable_udp(0).and_then(into_tokio_udp) else {
                return;
            };
            let payload = beacon.encode();
            loop {
                let _ = socket.send_to(&payload, target).await;
                tokio::time::sleep(interval).await;
            }
        }));

        let accepted = timeout(wait, listener.accept()).await;

        let (mut stream, _) = match accepted {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                return Err(TransferError::connection_failed("inbound accept failed")
                    .with_cause(e));
            }
            Err(_) => {
                return Err(TransferError::timeout(format!(
                    "no inbound connection within {wait:?}"
                )));
            }
        };

        let ours = Beacon::new(
            self.identity.clone(),
            self.config.display_name.clone(),
            tcp_port,
        );
        let remote = exchange_hello(&mut stream, &ours).await?;
        let peer = Peer::new(
            remote.identity,
            remote.display_name,
            TransportKind::LocalWirelessGroup,
        )
        .connected();

        self.link.set(peer.clone(), stream).await;
        Ok(peer)
    }

    async fn disconnect(&self) {
        self.link.clear().await;
    }

    async fn send_file(
        &self,
        file: &TransferableFile,
        control: watch::Receiver<TransferControl>,
        mut on_progress: ProgressFn,
    ) -> Result<(), TransferAbort> {
        let mut control = control;
        let mut guard = self.link.stream().await;
        let stream = guard.as_mut().ok_or_else(|| {
            TransferAbort::Error(TransferError::connection_failed("no active connection"))
        })?;
        transfer::send_file(stream, file, &self.tuning, &mut control, on_progress.as_mut()).await
    }

    async fn receive_file(
        &self,
        dest_dir: &Path,
        control: watch::Receiver<TransferControl>,
        mut on_progress: ProgressFn,
    ) -> Result<Option<TransferableFile>, TransferAbort> {
        let mut control = control;
        let mut guard = self.link.stream().await;
        let stream = guard.as_mut().ok_or_else(|| {
            TransferAbort::Error(TransferError::connection_failed("no active connection"))
        })?;
        transfer::receive_file(
            stream,
            dest_dir,
            &self.tuning,
            &mut control,
            on_progress.as_mut(),
        )
        .await
    }

    fn connected_peer(&self) -> Option<Peer> {
        self.link.peer()
    }
}
