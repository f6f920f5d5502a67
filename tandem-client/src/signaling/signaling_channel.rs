use crate::auth::CredentialGate;
use crate::signaling::{ConnectErrorReason, SignalingError, SignalingTransport, WireEvent};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tandem_core::{ClientSignal, ServerSignal};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// An inbound event as handed to registered handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    Server(ServerSignal),
    ConnectionError(ConnectErrorReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Queued,
    Matched,
    Offer,
    Answer,
    IceCandidate,
    PeerDisconnected,
    ReceiveMessage,
    SessionTerminated,
    ConnectionError,
}

impl SignalKind {
    pub const ALL: [SignalKind; 9] = [
        SignalKind::Queued,
        SignalKind::Matched,
        SignalKind::Offer,
        SignalKind::Answer,
        SignalKind::IceCandidate,
        SignalKind::PeerDisconnected,
        SignalKind::ReceiveMessage,
        SignalKind::SessionTerminated,
        SignalKind::ConnectionError,
    ];
}

impl SignalEvent {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Server(signal) => match signal {
                ServerSignal::Queued => SignalKind::Queued,
                ServerSignal::Matched { .. } => SignalKind::Matched,
                ServerSignal::Offer { .. } => SignalKind::Offer,
                ServerSignal::Answer { .. } => SignalKind::Answer,
                ServerSignal::IceCandidate { .. } => SignalKind::IceCandidate,
                ServerSignal::PeerDisconnected => SignalKind::PeerDisconnected,
                ServerSignal::ReceiveMessage { .. } => SignalKind::ReceiveMessage,
                ServerSignal::SessionTerminated => SignalKind::SessionTerminated,
            },
            Self::ConnectionError(_) => SignalKind::ConnectionError,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(SignalEvent) + Send + Sync>;

enum Lifecycle {
    Idle,
    Connected {
        pump: JoinHandle<()>,
        closing: Arc<AtomicBool>,
    },
    Closed,
}

/// One per account session. Handlers live in a single slot per event kind
/// and are looked up at dispatch time, so replacing a handler takes effect
/// for the very next event.
pub struct SignalingChannel {
    transport: Arc<dyn SignalingTransport>,
    gate: Option<Arc<CredentialGate>>,
    handlers: Arc<DashMap<SignalKind, EventHandler>>,
    lifecycle: Mutex<Lifecycle>,
}

impl SignalingChannel {
    pub fn new(transport: Arc<dyn SignalingTransport>, gate: Option<Arc<CredentialGate>>) -> Self {
        Self {
            transport,
            gate,
            handlers: Arc::new(DashMap::new()),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    pub async fn connect(&self) -> Result<(), SignalingError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match &*lifecycle {
            Lifecycle::Connected { .. } => return Ok(()),
            Lifecycle::Closed => return Err(SignalingError::Closed),
            Lifecycle::Idle => {}
        }

        *lifecycle = self.open().await?;
        Ok(())
    }

    /// Drops the current connection and opens a new one, refreshing the
    /// credentials if the service rejects them.
    pub async fn reconnect(&self) -> Result<(), SignalingError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match std::mem::replace(&mut *lifecycle, Lifecycle::Idle) {
            Lifecycle::Closed => {
                *lifecycle = Lifecycle::Closed;
                return Err(SignalingError::Closed);
            }
            Lifecycle::Connected { pump, closing } => {
                closing.store(true, Ordering::SeqCst);
                pump.abort();
                self.transport.close().await;
            }
            Lifecycle::Idle => {}
        }

        *lifecycle = self.open().await?;
        Ok(())
    }

    pub async fn emit(&self, signal: ClientSignal) -> Result<(), SignalingError> {
        if !self.is_connected().await {
            return Err(SignalingError::NotConnected);
        }
        let text =
            serde_json::to_string(&signal).map_err(|e| SignalingError::Encode(e.to_string()))?;
        debug!("Emitting '{}'", signal.name());
        self.transport.send(text).await
    }

    /// Installs `handler` for `kind`, replacing the previous one.
    pub fn on(&self, kind: SignalKind, handler: EventHandler) {
        self.handlers.insert(kind, handler);
    }

    pub fn off(&self, kind: SignalKind) {
        self.handlers.remove(&kind);
    }

    pub fn off_all(&self) {
        self.handlers.clear();
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub async fn is_connected(&self) -> bool {
        matches!(&*self.lifecycle.lock().await, Lifecycle::Connected { .. })
    }

    /// Closes the transport. Only the first call does anything.
    pub async fn disconnect(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        match std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
            Lifecycle::Connected { pump, closing } => {
                closing.store(true, Ordering::SeqCst);
                pump.abort();
                self.transport.close().await;
                info!("Signaling channel disconnected");
            }
            Lifecycle::Idle => info!("Signaling channel closed before connecting"),
            Lifecycle::Closed => {}
        }
    }

    /// Deregisters every handler, then disconnects.
    pub async fn teardown(&self) {
        self.off_all();
        self.disconnect().await;
    }

    async fn open(&self) -> Result<Lifecycle, SignalingError> {
        let (tx, rx) = mpsc::unbounded_channel();

        match self.transport.open(tx.clone()).await {
            Ok(()) => {}
            Err(SignalingError::Unauthorized) => {
                let Some(gate) = &self.gate else {
                    return Err(SignalingError::Unauthorized);
                };
                info!("Signaling rejected credentials, refreshing before retry");
                if let Err(e) = gate.refresh().await {
                    warn!("Refresh before signaling retry failed: {}", e);
                    return Err(SignalingError::Unauthorized);
                }
                self.transport.open(tx).await?;
            }
            Err(e) => return Err(e),
        }

        info!("Signaling channel connected");
        let closing = Arc::new(AtomicBool::new(false));
        let pump = tokio::spawn(Self::pump(rx, self.handlers.clone(), closing.clone()));
        Ok(Lifecycle::Connected { pump, closing })
    }

    async fn pump(
        mut rx: mpsc::UnboundedReceiver<WireEvent>,
        handlers: Arc<DashMap<SignalKind, EventHandler>>,
        closing: Arc<AtomicBool>,
    ) {
        while let Some(event) = rx.recv().await {
            match event {
                WireEvent::Text(text) => match serde_json::from_str::<ServerSignal>(&text) {
                    Ok(signal) => Self::dispatch(&handlers, SignalEvent::Server(signal)),
                    Err(e) => warn!("Invalid signal from service: {}. Text: {}", e, text),
                },
                // A transport reports at most one failure per connection.
                WireEvent::Error(reason) => {
                    Self::dispatch(&handlers, SignalEvent::ConnectionError(reason));
                    break;
                }
                WireEvent::Closed => {
                    if closing.load(Ordering::SeqCst) {
                        info!("Signaling transport closed");
                    } else {
                        warn!("Signaling transport closed by the service");
                        let reason = ConnectErrorReason::Transport("closed".into());
                        Self::dispatch(&handlers, SignalEvent::ConnectionError(reason));
                    }
                    break;
                }
            }
        }
    }

    fn dispatch(handlers: &DashMap<SignalKind, EventHandler>, event: SignalEvent) {
        let kind = event.kind();
        // Clone out of the map so a handler may re-register without deadlocking.
        let handler = handlers.get(&kind).map(|entry| entry.value().clone());
        match handler {
            Some(handler) => handler(event),
            None => debug!("No handler registered for {:?}", kind),
        }
    }
}
