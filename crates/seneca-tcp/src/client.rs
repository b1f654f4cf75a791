//! Outbound client: initial connect, call correlation, and silent
//! re-establishment of the connection across peer restarts.
//!
//! The first connection attempt is single-shot: its outcome is returned to
//! the caller, who decides whether to retry at a higher level. Once
//! connected, a manager task owns the connection and an explicit reconnect
//! loop: on connection loss it retries the same target at a fixed interval
//! until a new connection succeeds or the client is closed.
//!
//! Calls issued while the connection is down are held in the outbound queue
//! and flushed once a new connection is up, so a caller's logical call
//! survives a transient peer outage. Calls that had already reached the wire
//! when the connection dropped are settled with a connection-lost error
//! rather than resent, so the peer never sees a duplicate.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use seneca_core::settings::DEFAULT_RECONNECT_DELAY_MS;
use seneca_core::{Address, Message, Router, Target, TransportSettings};

use crate::connection::{
    drive, BoxedReader, BoxedWriter, ConnectionParams, Disconnect, PendingCalls,
    OUTBOUND_QUEUE_DEPTH,
};
use crate::error::TransportError;

type StreamPair = (BoxedReader, BoxedWriter);

/// Lifecycle of a client manager. `Closed` is terminal and entered only by
/// explicit close; `Connected` and `Reconnecting` cycle for as long as the
/// peer keeps coming back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Handle to an outbound connection that survives peer restarts.
#[derive(Debug)]
pub struct Client {
    address: Address,
    outbound: mpsc::Sender<Message>,
    pending: Arc<PendingCalls>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ClientState>,
    manager: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connects to the endpoint named by `settings` and starts the manager.
    ///
    /// Resolves exactly once: with the connected client, or with the error of
    /// the first attempt. A refused first attempt is not retried here.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Settings`] for a contradictory settings
    /// block and [`TransportError::Connect`] when the endpoint is refused or
    /// unreachable.
    pub async fn connect(
        settings: TransportSettings,
        router: Arc<dyn Router>,
    ) -> Result<Client, TransportError> {
        let target = settings.target()?;
        let first = open_stream(&target)
            .await
            .map_err(|source| TransportError::Connect {
                target: target.to_string(),
                source,
            })?;

        let address = match &target {
            Target::Tcp { host, port } => Address::Tcp {
                host: host.clone(),
                port: *port,
            },
            Target::Path(path) => Address::Path(path.clone()),
        };
        info!("client connected to {address}");

        let reconnect_delay = settings.attempt_delay(DEFAULT_RECONNECT_DELAY_MS);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ClientState::Connecting);
        let pending = Arc::new(PendingCalls::new());

        let params = ConnectionParams {
            router,
            pending: Arc::clone(&pending),
            peer: target.to_string(),
        };

        let manager = tokio::spawn(run_manager(
            first,
            target,
            reconnect_delay,
            params,
            outbound_rx,
            shutdown_rx,
            state_tx,
        ));

        Ok(Client {
            address,
            outbound: outbound_tx,
            pending,
            shutdown: shutdown_tx,
            state: state_rx,
            manager: std::sync::Mutex::new(Some(manager)),
        })
    }

    /// The endpoint this client was configured to reach.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Current manager state.
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Issues a call and awaits its correlated reply.
    ///
    /// Resolves with the reply body, the remote action error, or a
    /// connection-lost/closed error — never hangs forever and never drops a
    /// call silently. While the manager is reconnecting the call is held and
    /// sent on the next established connection.
    ///
    /// # Errors
    ///
    /// [`TransportError::Action`] when the remote action failed,
    /// [`TransportError::ConnectionLost`] when the connection dropped after
    /// the call reached the wire, [`TransportError::Closed`] when the client
    /// was closed before a reply arrived.
    pub async fn call(&self, pattern: &str, body: Value) -> Result<Value, TransportError> {
        let msg = Message::call(pattern, body);
        let id = msg.id();
        let reply = self.pending.register(id);

        if self.outbound.send(msg).await.is_err() {
            self.pending.remove(id);
            return Err(TransportError::Closed);
        }

        match reply.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Closed),
        }
    }

    /// Closes the client: cancels any pending reconnect, closes the active
    /// connection, and settles outstanding calls with a closed error.
    /// Idempotent, and callable while calls are still in flight — those
    /// calls resolve with [`TransportError::Closed`].
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let task = self
            .manager
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

// ── Manager task ──────────────────────────────────────────────────────────────

/// Owns the live connection and the reconnect loop until explicit close.
async fn run_manager(
    first: StreamPair,
    target: Target,
    reconnect_delay: Duration,
    params: ConnectionParams,
    mut outbound: mpsc::Receiver<Message>,
    mut shutdown: watch::Receiver<bool>,
    state: watch::Sender<ClientState>,
) {
    let (mut reader, mut writer) = first;

    loop {
        let _ = state.send(ClientState::Connected);

        let reason = drive(
            &mut reader,
            &mut writer,
            &mut outbound,
            &mut shutdown,
            &params,
        )
        .await;

        match reason {
            Disconnect::Shutdown => break,
            Disconnect::PeerClosed | Disconnect::Io(_) => {
                let _ = state.send(ClientState::Reconnecting);
                // Calls that reached the dead socket cannot be resent without
                // risking duplicate delivery; fail them now. Unsent calls stay
                // queued for the next connection.
                params.pending.fail_sent(|| TransportError::ConnectionLost);
                info!(
                    "connection to {target} lost; retrying every {}ms",
                    reconnect_delay.as_millis()
                );

                match reconnect(&target, reconnect_delay, &mut shutdown).await {
                    Some(pair) => (reader, writer) = pair,
                    None => break,
                }
            }
        }
    }

    let _ = state.send(ClientState::Closed);
    params.pending.fail_all(|| TransportError::Closed);
}

/// Retries the target at a fixed interval until it answers or the client is
/// closed. Returns `None` on close.
async fn reconnect(
    target: &Target,
    delay: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<StreamPair> {
    let mut attempt: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown.wait_for(|closed| *closed) => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
        match open_stream(target).await {
            Ok(pair) => {
                info!("reconnected to {target} on attempt {attempt}");
                return Some(pair);
            }
            Err(e) => debug!("reconnect attempt {attempt} to {target} failed: {e}"),
        }
    }
}

/// Opens a stream to the target and splits it into boxed halves so TCP and
/// filesystem sockets drive identically.
async fn open_stream(target: &Target) -> std::io::Result<StreamPair> {
    match target {
        Target::Tcp { host, port } => {
            let stream = TcpStream::connect((host.clone(), *port)).await?;
            let (r, w) = stream.into_split();
            let reader: BoxedReader = Box::new(r);
            let writer: BoxedWriter = Box::new(w);
            Ok((reader, writer))
        }
        Target::Path(path) => connect_path(path).await,
    }
}

#[cfg(unix)]
async fn connect_path(path: &std::path::Path) -> std::io::Result<StreamPair> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    let (r, w) = stream.into_split();
    let reader: BoxedReader = Box::new(r);
    let writer: BoxedWriter = Box::new(w);
    Ok((reader, writer))
}

#[cfg(not(unix))]
async fn connect_path(_path: &std::path::Path) -> std::io::Result<StreamPair> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "filesystem sockets are not available on this platform",
    ))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
