//! Short-range radio transport
//!
//! The low-throughput medium: point-to-point pairing discovered through
//! broadcast beacons on a fixed port, with a small chunk size tuned for a
//! constrained link.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::timeout;

use nearbeam_common::{Peer, TransferError, TransferableFile, TransportKind};

use super::beacon::Beacon;
use super::{
    AbortOnDrop, DEFAULT_RADIO_DISCOVERY_PORT, DiscoveryStream, Link, MAX_BEACON_BYTES,
    ProgressFn, Transport, bind_reusable_udp, can_bind_udp, exchange_hello, into_tokio_udp,
};
use crate::capability::CapabilityGate;
use crate::transfer::{self, TransferAbort, TransferControl, TransferTuning};

/// Chunk size for the constrained radio link
const RADIO_CHUNK_SIZE: usize = 8 * 1024;

/// Configuration for the short-range radio medium
#[derive(Debug, Clone)]
pub struct RadioConfig {
    /// Name announced to peers
    pub display_name: String,
    /// Whether the medium is switched on
    pub enabled: bool,
    /// UDP port beacons are exchanged on
    pub discovery_port: u16,
    /// Where announcements are sent; `None` means the broadcast address
    pub announce_target: Option<SocketAddr>,
    /// Interval between announcements while waiting for an inbound peer
    pub announce_interval: Duration,
    /// Bounded wait for an outbound connection attempt
    pub connect_timeout: Duration,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            display_name: "nearbeam device".to_string(),
            enabled: true,
            discovery_port: DEFAULT_RADIO_DISCOVERY_PORT,
            announce_target: None,
            announce_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Transport for the short-range radio medium
pub struct RadioTransport {
    config: RadioConfig,
    gate: Arc<dyn CapabilityGate>,
    identity: String,
    link: Link,
    known_addrs: Arc<StdMutex<HashMap<String, SocketAddr>>>,
    scan_tasks: StdMutex<Vec<AbortHandle>>,
    tuning: TransferTuning,
}

impl RadioTransport {
    /// Create a radio transport with a freshly generated device identity
    pub fn new(config: RadioConfig, gate: Arc<dyn CapabilityGate>) -> Self {
        Self {
            config,
            gate,
            identity: Peer::random_identity(),
            link: Link::new(),
            known_addrs: Arc::new(StdMutex::new(HashMap::new())),
            scan_tasks: StdMutex::new(Vec::new()),
            tuning: TransferTuning::for_chunk_size(RADIO_CHUNK_SIZE),
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
                "short-range radio permissions not granted",
            ));
        }
        if !self.config.enabled {
            return Err(TransferError::unsupported("short-range radio is disabled"));
        }
        Ok(())
    }

    fn announce_target(&self) -> SocketAddr {
        self.config.announce_target.unwrap_or_else(|| {
            SocketAddr::from((Ipv4Addr::BROADCAST, self.config.discovery_port))
        })
    }
}

#[async_trait]
impl Transport for RadioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::ShortRangeRadio
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

        let socket = bind_reusable_udp(self.config.discovery_port)
            .and_then(|s| {
                s.set_broadcast(true)?;
                Ok(s)
            })
            .and_then(into_tokio_udp)
            .map_err(|e| {
                TransferError::connection_failed("cannot open radio discovery listener")
                    .with_cause(e)
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
                // Malformed datagrams and our own announcements are dropped
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
                    TransportKind::ShortRangeRadio,
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
                TransferError::connection_failed("cannot open radio transfer listener")
                    .with_cause(e)
            })?;
        let tcp_port = listener
            .local_addr()
            .map_err(|e| {
                TransferError::connection_failed("cannot resolve listener address").with_cause(e)
            })?
            .port();

        // Announce on the discovery port for as long as the wait lasts
        let beacon = Beacon::new(
            self.identity.clone(),
            self.config.display_name.clone(),
            tcp_port,
        );
        let target = self.announce_target();
        let interval = self.config.announce_interval;
        let _announcer = AbortOnDrop(tokio::spawn(async move {
            let Ok(socket) = bind_reusable_udp(0).and_then(|s| {
                s.set_broadcast(true)?;
                Ok(s)
            }) else {
                return;
            };
            let Ok(socket) = into_tokio_udp(socket) else {
                return;
            };
            let payload = beacon.encode();
            loop {
                // Send failures only cost one announcement round
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
            TransportKind::ShortRangeRadio,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::StaticGate;
    use nearbeam_common::TransferErrorKind;
    use serial_test::serial;
    use tokio::net::UdpSocket;

    fn transport_on_port(port: u16) -> RadioTransport {
        let config = RadioConfig {
            discovery_port: port,
            announce_target: Some(SocketAddr::from(([127, 0, 0, 1], port))),
            announce_interval: Duration::from_millis(100),
            ..RadioConfig::default()
        };
        RadioTransport::new(config, Arc::new(StaticGate::allow_all()))
    }

    #[tokio::test]
    async fn test_disabled_radio_refuses_discovery() {
        let config = RadioConfig {
            enabled: false,
            ..RadioConfig::default()
        };
        let transport = RadioTransport::new(config, Arc::new(StaticGate::allow_all()));

        let result = transport.start_discovery().await;
        match result {
            Err(e) => assert_eq!(e.kind(), TransferErrorKind::Unsupported),
            Ok(_) => panic!("disabled medium must not discover"),
        }
        assert!(!transport.is_enabled());
    }

    #[tokio::test]
    async fn test_denied_gate_blocks_before_any_socket() {
        let transport =
            RadioTransport::new(RadioConfig::default(), Arc::new(StaticGate::deny_all()));

        let discovery = transport.start_discovery().await;
        match discovery {
            Err(e) => assert_eq!(e.kind(), TransferErrorKind::PermissionDenied),
            Ok(_) => panic!("denied gate must block discovery"),
        }

        let peer = Peer::new("aabbccddeeff", "Someone", TransportKind::ShortRangeRadio);
        let connect = transport.connect(&peer).await;
        match connect {
            Err(e) => assert_eq!(e.kind(), TransferErrorKind::PermissionDenied),
            Ok(_) => panic!("denied gate must block connect"),
        }
    }

    #[tokio::test]
    async fn test_connect_unknown_peer_is_not_found() {
        let transport = transport_on_port(49702);
        let peer = Peer::new("never11seen22", "Ghost", TransportKind::ShortRangeRadio);
        let result = transport.connect(&peer).await;
        match result {
            Err(e) => assert_eq!(e.kind(), TransferErrorKind::PeerNotFound),
            Ok(_) => panic!("undiscovered peer must not connect"),
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_discovery_emits_beacon_sender() {
        let transport = transport_on_port(49711);
        let mut stream = transport.start_discovery().await.expect("discovery");

        // A remote device announcing itself straight at the listener
        let sender = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let beacon = Beacon::new("feedc0ffee11", "Tablet", 45111);
        sender
            .send_to(&beacon.encode(), ("127.0.0.1", 49711))
            .await
            .expect("send beacon");

        let event = timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("beacon arrives")
            .expect("stream open")
            .expect("peer event");
        assert_eq!(event.identity, "feedc0ffee11");
        assert_eq!(event.display_name, "Tablet");
        assert_eq!(event.medium, TransportKind::ShortRangeRadio);
        assert!(!event.connected);
    }

    #[tokio::test]
    #[serial]
    async fn test_discovery_ignores_garbage_datagrams() {
        let transport = transport_on_port(49712);
        let mut stream = transport.start_discovery().await.expect("discovery");

        let sender = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        sender
            .send_to(b"definitely not a beacon", ("127.0.0.1", 49712))
            .await
            .expect("send junk");
        let beacon = Beacon::new("0123456789ab", "Real device", 45112);
        sender
            .send_to(&beacon.encode(), ("127.0.0.1", 49712))
            .await
            .expect("send beacon");

        // Only the well-formed beacon surfaces
        let event = timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("beacon arrives")
            .expect("stream open")
            .expect("peer event");
        assert_eq!(event.identity, "0123456789ab");
    }

    #[tokio::test]
    #[serial]
    async fn test_accept_timeout_when_nobody_connects() {
        let transport = transport_on_port(49713);
        let result = transport.accept_incoming(Duration::from_millis(150)).await;
        match result {
            Err(e) => assert_eq!(e.kind(), TransferErrorKind::Timeout),
            Ok(_) => panic!("nobody connected"),
        }
        assert!(transport.connected_peer().is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_connect_refused_port_is_connection_failed() {
        let transport = transport_on_port(49714);
        let mut stream = transport.start_discovery().await.expect("discovery");

        // Advertise a TCP port that is not listening
        let dead = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let dead_port = dead.local_addr().expect("addr").port();
        drop(dead);

        let sender = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let beacon = Beacon::new("dead00000001", "Vanished", dead_port);
        sender
            .send_to(&beacon.encode(), ("127.0.0.1", 49714))
            .await
            .expect("send beacon");

        let peer = timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("beacon arrives")
            .expect("stream open")
            .expect("peer event");

        let result = transport.connect(&peer).await;
        match result {
            Err(e) => assert_eq!(e.kind(), TransferErrorKind::ConnectionFailed),
            Ok(_) => panic!("dead port must not connect"),
        }
        assert!(transport.connected_peer().is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_full_pairing_and_transfer_over_loopback() {
        let receiver = Arc::new(transport_on_port(49715));
        let sender = Arc::new(transport_on_port(49715));

        // Receiver waits for an inbound peer, announcing itself meanwhile
        let accept_side = {
            let receiver = receiver.clone();
            tokio::spawn(async move { receiver.accept_incoming(Duration::from_secs(5)).await })
        };

        // Sender discovers the announcement and pairs
        let mut stream = sender.start_discovery().await.expect("discovery");
        let found = timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("announcement arrives")
            .expect("stream open")
            .expect("peer event");
        assert_eq!(found.identity, receiver.identity());

        sender.connect(&found).await.expect("pair");
        let accepted = accept_side.await.expect("join").expect("inbound peer");
        assert_eq!(accepted.identity, sender.identity());
        assert!(accepted.connected);
        assert!(sender.connected_peer().is_some());

        // Move a file across the paired link
        let src_dir = tempfile::tempdir().expect("src");
        let dst_dir = tempfile::tempdir().expect("dst");
        let content = vec![42u8; 30_000];
        tokio::fs::write(src_dir.path().join("note.bin"), &content)
            .await
            .expect("write");
        let file = TransferableFile {
            path: src_dir.path().join("note.bin"),
            name: "note.bin".to_string(),
            size_bytes: content.len() as u64,
            mime: None,
        };

        let (_ctl_tx, ctl_rx) = watch::channel(TransferControl::Running);
        let recv_side = {
            let receiver = receiver.clone();
            let dst = dst_dir.path().to_path_buf();
            let ctl = ctl_rx.clone();
            tokio::spawn(async move {
                receiver
                    .receive_file(&dst, ctl, Box::new(|_, _| {}))
                    .await
            })
        };

        sender
            .send_file(&file, ctl_rx.clone(), Box::new(|_, _| {}))
            .await
            .expect("send");
        let received = recv_side
            .await
            .expect("join")
            .expect("receive")
            .expect("one file");
        assert_eq!(received.size_bytes, content.len() as u64);
        let on_disk = tokio::fs::read(&received.path).await.expect("read back");
        assert_eq!(on_disk, content);

        // Teardown clears connection state on both sides
        sender.disconnect().await;
        receiver.disconnect().await;
        assert!(sender.connected_peer().is_none());
        assert!(receiver.connected_peer().is_none());
    }
}
