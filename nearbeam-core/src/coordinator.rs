//! Transfer coordinator
//!
//! Owns the session lifecycle: transport selection, discovery aggregation,
//! connection, batch transfer, and teardown. The coordinator is the sole
//! writer of the published [`TransferState`]; consumers subscribe to a
//! watch channel with latest-state-wins semantics and issue commands.
//!
//! At most one of discovery, connect, or transfer runs against a session at
//! a time; starting a new operation first cancels the previous one and
//! awaits its task, so listener and socket release is ordered, never racy.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use nearbeam_common::{
    Peer, Progress, TransferError, TransferableFile, TransportKind, TransportSelection,
};

use crate::capability::CapabilityGate;
use crate::discovery::DiscoveryAggregator;
use crate::resolve::resolve_file;
use crate::state::TransferState;
use crate::transfer::{TransferAbort, TransferControl};
use crate::transport::Transport;

/// Coordinator-wide settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Where received files land; `None` means the platform downloads
    /// directory, falling back to the current directory
    pub download_dir: Option<PathBuf>,
    /// Bounded wait for an inbound peer in [`TransferCoordinator::await_peer`]
    pub accept_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            accept_timeout: Duration::from_secs(60),
        }
    }
}

/// Live state for one discovery-through-transfer lifecycle
struct Session {
    id: Uuid,
    transport: Option<Arc<dyn Transport>>,
    peer: Option<Peer>,
    discovered: Vec<Peer>,
}

impl Session {
    fn fresh() -> Self {
        Self {
            id: Uuid::new_v4(),
            transport: None,
            peer: None,
            discovered: Vec::new(),
        }
    }
}

/// Coordinates discovery, connection, and transfer over interchangeable
/// transports, publishing one unified state stream
pub struct TransferCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    transports: Vec<Arc<dyn Transport>>,
    gate: Arc<dyn CapabilityGate>,
    config: CoordinatorConfig,
    state_tx: watch::Sender<TransferState>,
    session: Mutex<Session>,
    active: Mutex<Option<JoinHandle<()>>>,
    control: StdMutex<Option<watch::Sender<TransferControl>>>,
    paused_from: StdMutex<Option<TransferState>>,
}

impl TransferCoordinator {
    /// Create a coordinator over the given transports
    pub fn new(
        transports: Vec<Arc<dyn Transport>>,
        gate: Arc<dyn CapabilityGate>,
        config: CoordinatorConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(TransferState::Idle);
        Self {
            inner: Arc::new(Inner {
                transports,
                gate,
                config,
                state_tx,
                session: Mutex::new(Session::fresh()),
                active: Mutex::new(None),
                control: StdMutex::new(None),
                paused_from: StdMutex::new(None),
            }),
        }
    }

    /// Subscribe to the state stream; the receiver always observes the
    /// latest state
    pub fn subscribe(&self) -> watch::Receiver<TransferState> {
        self.inner.state_tx.subscribe()
    }

    /// The state at this instant
    pub fn current_state(&self) -> TransferState {
        self.inner.current_state()
    }

    /// Identifier of the current session; changes on every new discovery
    pub async fn session_id(&self) -> Uuid {
        self.inner.session.lock().await.id
    }

    /// The medium the current session is fixed to, if any
    pub async fn active_transport(&self) -> Option<TransportKind> {
        self.inner
            .session
            .lock()
            .await
            .transport
            .as_ref()
            .map(|t| t.kind())
    }

    /// The peer the session is connected to, if any
    pub async fn connected_peer(&self) -> Option<Peer> {
        self.inner.session.lock().await.peer.clone()
    }

    /// Start discovering peers, selecting the transport per `selection`
    ///
    /// The selection is evaluated once here and fixed for the session. Any
    /// operation still running is cancelled first.
    pub async fn start_discovery(
        &self,
        selection: TransportSelection,
    ) -> Result<(), TransferError> {
        let inner = &self.inner;
        inner.cancel_active().await;
        inner.release_session().await;
        inner.interrupt_to_cancelled();
        inner.publish(TransferState::Discovering);

        let transport = match inner.select_transport(selection) {
            Ok(transport) => transport,
            Err(error) => {
                inner.fail(error.clone()).await;
                return Err(error);
            }
        };

        {
            let mut session = inner.session.lock().await;
            *session = Session::fresh();
            session.transport = Some(transport.clone());
        }

        let task = inner.clone();
        let handle = tokio::spawn(async move { task.run_discovery(transport).await });
        *inner.active.lock().await = Some(handle);
        Ok(())
    }

    /// Connect to a previously discovered peer by identity
    ///
    /// Selecting an identity outside the discovered set returns
    /// `PeerNotFound` without touching the session.
    pub async fn connect(&self, identity: &str) -> Result<(), TransferError> {
        let inner = &self.inner;
        let current = inner.current_state();
        if !matches!(current, TransferState::DevicesFound { .. }) {
            return Err(TransferError::unsupported(format!(
                "cannot connect while {}",
                current.label()
            )));
        }

        let (transport, peer) = {
            let session = inner.session.lock().await;
            let transport = session
                .transport
                .clone()
                .ok_or_else(|| TransferError::unsupported("session has no transport"))?;
            let peer = session
                .discovered
                .iter()
                .find(|p| p.identity == identity)
                .cloned()
                .ok_or_else(|| {
                    TransferError::peer_not_found(format!(
                        "{identity} is not in the discovered set"
                    ))
                })?;
            (transport, peer)
        };

        inner.cancel_active().await;
        transport.stop_discovery().await;
        inner.publish(TransferState::Connecting { peer: peer.clone() });

        let task = inner.clone();
        let handle = tokio::spawn(async move { task.run_connect(transport, peer).await });
        *inner.active.lock().await = Some(handle);
        Ok(())
    }

    /// Wait for an inbound peer on the selected transport
    ///
    /// The receiving side of a session: the transport announces itself and
    /// accepts one connection within the configured bounded wait.
    pub async fn await_peer(&self, selection: TransportSelection) -> Result<(), TransferError> {
        let inner = &self.inner;
        inner.cancel_active().await;
        inner.release_session().await;
        inner.interrupt_to_cancelled();

        let transport = match inner.select_transport(selection) {
            Ok(transport) => transport,
            Err(error) => {
                inner.fail(error.clone()).await;
                return Err(error);
            }
        };

        {
            let mut session = inner.session.lock().await;
            *session = Session::fresh();
            session.transport = Some(transport.clone());
        }

        let wait = inner.config.accept_timeout;
        let task = inner.clone();
        let handle = tokio::spawn(async move {
            match transport.accept_incoming(wait).await {
                Ok(peer) => {
                    task.publish(TransferState::Connecting { peer: peer.clone() });
                    task.session.lock().await.peer = Some(peer.clone());
                    task.publish(TransferState::Connected { peer });
                }
                Err(error) => task.fail(error).await,
            }
        });
        *inner.active.lock().await = Some(handle);
        Ok(())
    }

    /// Send a batch of files to the connected peer, strictly sequentially
    ///
    /// Entries that cannot be resolved are excluded from the batch rather
    /// than failing the session. Progress counters are cumulative across
    /// the whole batch. The first error aborts the remaining files;
    /// partially transferred files are left on the receiver.
    pub async fn send(&self, paths: Vec<PathBuf>) -> Result<(), TransferError> {
        let inner = &self.inner;
        let current = inner.current_state();
        if !matches!(current, TransferState::Connected { .. }) {
            return Err(TransferError::unsupported(format!(
                "cannot send while {}",
                current.label()
            )));
        }
        let transport = inner
            .session
            .lock()
            .await
            .transport
            .clone()
            .ok_or_else(|| TransferError::unsupported("session has no transport"))?;

        let mut files = Vec::new();
        for path in &paths {
            if let Some(file) = resolve_file(path).await {
                files.push(file);
            }
        }
        if files.is_empty() {
            return Err(TransferError::file_io("no transferable files in the batch"));
        }

        inner.cancel_active().await;
        let control = inner.new_control();

        let task = inner.clone();
        let handle = tokio::spawn(async move { task.run_send(transport, files, control).await });
        *inner.active.lock().await = Some(handle);
        Ok(())
    }

    /// Receive files from the connected peer until it finishes its batch
    pub async fn receive(&self) -> Result<(), TransferError> {
        let inner = &self.inner;
        let current = inner.current_state();
        if !matches!(current, TransferState::Connected { .. }) {
            return Err(TransferError::unsupported(format!(
                "cannot receive while {}",
                current.label()
            )));
        }
        let transport = inner
            .session
            .lock()
            .await
            .transport
            .clone()
            .ok_or_else(|| TransferError::unsupported("session has no transport"))?;

        let dest_dir = inner.download_dir();
        inner.cancel_active().await;
        let control = inner.new_control();

        let task = inner.clone();
        let handle =
            tokio::spawn(async move { task.run_receive(transport, dest_dir, control).await });
        *inner.active.lock().await = Some(handle);
        Ok(())
    }

    /// Suspend the in-flight transfer at the next chunk boundary
    pub fn pause(&self) {
        let inner = &self.inner;
        let current = inner.current_state();
        let percent = match &current {
            TransferState::Transferring { percent, .. } => *percent,
            _ => return,
        };

        let signalled = {
            let guard = inner.control.lock().expect("control poisoned");
            match guard.as_ref() {
                Some(sender) => sender.send(TransferControl::Paused).is_ok(),
                None => false,
            }
        };
        if !signalled {
            return;
        }

        *inner.paused_from.lock().expect("paused snapshot poisoned") = Some(current);
        inner.publish(TransferState::Paused { percent });
    }

    /// Resume a paused transfer; no bytes are lost or duplicated
    pub fn resume(&self) {
        let inner = &self.inner;
        if !matches!(inner.current_state(), TransferState::Paused { .. }) {
            return;
        }

        let signalled = {
            let guard = inner.control.lock().expect("control poisoned");
            match guard.as_ref() {
                Some(sender) => sender.send(TransferControl::Running).is_ok(),
                None => false,
            }
        };
        if !signalled {
            return;
        }

        if let Some(snapshot) = inner
            .paused_from
            .lock()
            .expect("paused snapshot poisoned")
            .take()
        {
            inner.publish(snapshot);
        }
    }

    /// Cancel whatever is in flight and tear the session down
    ///
    /// Closes the active connection immediately, releases discovery
    /// listeners, and transitions to `Cancelled`. A cancelled session is
    /// never retried automatically.
    pub async fn cancel(&self) {
        let inner = &self.inner;
        if let Some(sender) = inner.control.lock().expect("control poisoned").take() {
            let _ = sender.send(TransferControl::Cancelled);
        }
        inner.cancel_active().await;
        inner.release_session().await;
        if !inner.current_state().is_terminal() {
            inner.publish(TransferState::Cancelled);
        }
    }

    /// Tear the session down and return to `Idle`
    ///
    /// From an in-flight connect or transfer this behaves like
    /// [`cancel`](Self::cancel).
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        if let Some(sender) = inner.control.lock().expect("control poisoned").take() {
            let _ = sender.send(TransferControl::Cancelled);
        }
        inner.cancel_active().await;
        inner.release_session().await;
        inner.interrupt_to_cancelled();
        if !inner.current_state().is_terminal() {
            inner.publish(TransferState::Idle);
        }
    }
}

impl Inner {
    fn current_state(&self) -> TransferState {
        self.state_tx.borrow().clone()
    }

    /// Publish a state if the transition is legal; illegal publishes are
    /// dropped so a stale task can never corrupt the machine
    fn publish(&self, next: TransferState) {
        let allowed = self.state_tx.borrow().can_transition_to(&next);
        if allowed {
            self.state_tx.send_replace(next);
        }
    }

    /// In-flight connect and transfer states collapse to `Cancelled` before
    /// a new operation replaces them
    fn interrupt_to_cancelled(&self) {
        if matches!(
            self.current_state(),
            TransferState::Connecting { .. }
                | TransferState::Transferring { .. }
                | TransferState::Paused { .. }
        ) {
            self.publish(TransferState::Cancelled);
        }
    }

    /// Abort the active operation task and wait for it to finish
    async fn cancel_active(&self) {
        let handle = self.active.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Stop discovery, close the connection, and clear all session fields
    async fn release_session(&self) {
        let transport = {
            let mut session = self.session.lock().await;
            let transport = session.transport.take();
            session.peer = None;
            session.discovered.clear();
            transport
        };
        if let Some(transport) = transport {
            transport.stop_discovery().await;
            transport.disconnect().await;
        }
    }

    async fn fail(&self, error: TransferError) {
        self.clear_control();
        self.release_session().await;
        let can_retry = error.can_retry();
        self.publish(TransferState::Failed { error, can_retry });
    }

    fn new_control(&self) -> watch::Receiver<TransferControl> {
        let (tx, rx) = watch::channel(TransferControl::Running);
        *self.control.lock().expect("control poisoned") = Some(tx);
        rx
    }

    fn clear_control(&self) {
        self.control.lock().expect("control poisoned").take();
    }

    fn download_dir(&self) -> PathBuf {
        self.config
            .download_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn transport_for(&self, kind: TransportKind) -> Option<Arc<dyn Transport>> {
        self.transports.iter().find(|t| t.kind() == kind).cloned()
    }

    /// Resolve the selection policy to one transport, evaluated once at
    /// discovery start
    fn select_transport(
        &self,
        selection: TransportSelection,
    ) -> Result<Arc<dyn Transport>, TransferError> {
        match selection {
            TransportSelection::Only(kind) => {
                let transport = self.transport_for(kind).ok_or_else(|| {
                    TransferError::unsupported(format!("no transport registered for {kind}"))
                })?;
                if !self.gate.has_required_permissions(kind) {
                    return Err(TransferError::permission_denied(format!(
                        "{kind} permissions not granted"
                    )));
                }
                // An explicit request never falls back to another medium
                if !transport.is_available() || !transport.is_enabled() {
                    return Err(TransferError::unsupported(format!(
                        "{kind} is unavailable or disabled"
                    )));
                }
                Ok(transport)
            }
            TransportSelection::Auto => {
                let mut gate_blocked = false;
                for kind in TransportKind::auto_preference() {
                    let Some(transport) = self.transport_for(kind) else {
                        continue;
                    };
                    if !transport.is_available() || !transport.is_enabled() {
                        continue;
                    }
                    if !self.gate.has_required_permissions(kind) {
                        gate_blocked = true;
                        continue;
                    }
                    return Ok(transport);
                }
                if gate_blocked {
                    Err(TransferError::permission_denied(
                        "no permitted medium for automatic selection",
                    ))
                } else {
                    Err(TransferError::unsupported(
                        "no available and enabled medium",
                    ))
                }
            }
        }
    }

    async fn run_discovery(self: Arc<Self>, transport: Arc<dyn Transport>) {
        let mut stream = match transport.start_discovery().await {
            Ok(stream) => stream,
            Err(error) => {
                self.fail(error).await;
                return;
            }
        };

        let mut aggregator = DiscoveryAggregator::new();
        while let Some(event) = stream.next().await {
            match event {
                Ok(peer) => {
                    if let Some(peers) = aggregator.observe(peer) {
                        self.session.lock().await.discovered = peers.clone();
                        self.publish(TransferState::DevicesFound { peers });
                    }
                }
                // A malformed discovery event is a local glitch, not
                // session-breaking; it is simply not emitted
                Err(_) => {}
            }
        }
    }

    async fn run_connect(self: Arc<Self>, transport: Arc<dyn Transport>, peer: Peer) {
        match transport.connect(&peer).await {
            Ok(()) => {
                let connected = peer.connected();
                self.session.lock().await.peer = Some(connected.clone());
                self.publish(TransferState::Connected { peer: connected });
            }
            Err(error) => self.fail(error).await,
        }
    }

    async fn run_send(
        self: Arc<Self>,
        transport: Arc<dyn Transport>,
        files: Vec<TransferableFile>,
        control: watch::Receiver<TransferControl>,
    ) {
        let bytes_total: u64 = files.iter().map(|f| f.size_bytes).sum();
        let started = Instant::now();
        let mut bytes_before: u64 = 0;

        self.publish(TransferState::Transferring {
            percent: 0,
            bytes_done: 0,
            bytes_total,
            bytes_per_second: 0,
            eta_millis: 0,
            current_file: files[0].safe_name(),
        });

        for file in &files {
            let reporter = self.clone();
            let current_file = file.safe_name();
            let done_before_file = bytes_before;
            let control_probe = control.clone();
            let on_progress = Box::new(move |_: &str, progress: Progress| {
                // A chunk already in flight when pause lands must not
                // overwrite the Paused state
                if *control_probe.borrow() != TransferControl::Running {
                    return;
                }
                let bytes_done = done_before_file + progress.bytes_done;
                let snapshot = Progress::compute(bytes_done, bytes_total, started.elapsed());
                reporter.publish(TransferState::Transferring {
                    percent: snapshot.percent,
                    bytes_done,
                    bytes_total,
                    bytes_per_second: snapshot.bytes_per_second,
                    eta_millis: snapshot.eta_millis,
                    current_file: current_file.clone(),
                });
            });

            match transport.send_file(file, control.clone(), on_progress).await {
                Ok(()) => bytes_before += file.size_bytes,
                Err(TransferAbort::Cancelled) => {
                    self.clear_control();
                    self.release_session().await;
                    self.publish(TransferState::Cancelled);
                    return;
                }
                Err(TransferAbort::Error(error)) => {
                    self.fail(error).await;
                    return;
                }
            }
        }

        self.clear_control();
        self.publish(TransferState::Completed {
            file_count: files.len() as u64,
            bytes_total,
            duration_millis: started.elapsed().as_millis() as u64,
        });
        // The batch is over; success cleans up like every other exit path
        self.release_session().await;
    }

    async fn run_receive(
        self: Arc<Self>,
        transport: Arc<dyn Transport>,
        dest_dir: PathBuf,
        control: watch::Receiver<TransferControl>,
    ) {
        let started = Instant::now();
        let mut file_count: u64 = 0;
        let mut bytes_total: u64 = 0;

        self.publish(TransferState::Transferring {
            percent: 0,
            bytes_done: 0,
            bytes_total: 0,
            bytes_per_second: 0,
            eta_millis: 0,
            current_file: String::new(),
        });

        loop {
            let reporter = self.clone();
            let control_probe = control.clone();
            let on_progress = Box::new(move |name: &str, progress: Progress| {
                if *control_probe.borrow() != TransferControl::Running {
                    return;
                }
                reporter.publish(TransferState::Transferring {
                    percent: progress.percent,
                    bytes_done: progress.bytes_done,
                    bytes_total: progress.bytes_total,
                    bytes_per_second: progress.bytes_per_second,
                    eta_millis: progress.eta_millis,
                    current_file: name.to_string(),
                });
            });

            match transport
                .receive_file(&dest_dir, control.clone(), on_progress)
                .await
            {
                Ok(Some(file)) => {
                    file_count += 1;
                    bytes_total += file.size_bytes;
                }
                Ok(None) => break,
                Err(TransferAbort::Cancelled) => {
                    self.clear_control();
                    self.release_session().await;
                    self.publish(TransferState::Cancelled);
                    return;
                }
                Err(TransferAbort::Error(error)) => {
                    self.fail(error).await;
                    return;
                }
            }
        }

        self.clear_control();
        self.publish(TransferState::Completed {
            file_count,
            bytes_total,
            duration_millis: started.elapsed().as_millis() as u64,
        });
        self.release_session().await;
    }
}
