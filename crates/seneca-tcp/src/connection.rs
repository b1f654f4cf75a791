//! Per-socket connection handling shared by the listener and the client.
//!
//! Each live socket is owned by exactly one task running [`drive`]: a
//! `select!` loop over inbound bytes, the outbound queue, and the shutdown
//! signal. Inbound bytes accumulate in a [`FrameBuffer`]; every decoded call
//! is dispatched through the [`Router`] and answered on the same connection,
//! and every decoded reply settles the matching entry of the connection's
//! [`PendingCalls`] map. No state is shared between connections.
//!
//! Writes are serialized through the owning task, so outbound frames leave in
//! FIFO order; `write_all` resumes from the unwritten remainder when the
//! socket accepts only part of a frame.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use seneca_core::{encode_frame, error_envelope, ActionError, FrameBuffer, Message, Router};

use crate::error::TransportError;

/// Read chunk size for each socket read.
const READ_CHUNK: usize = 4096;

/// Depth of the per-connection outbound queue. Senders wait when it fills,
/// which also bounds how many calls a client can hold while reconnecting.
pub(crate) const OUTBOUND_QUEUE_DEPTH: usize = 128;

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Lifecycle of one connection handler. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// Why a [`drive`] loop ended.
#[derive(Debug)]
pub(crate) enum Disconnect {
    /// The owner asked for shutdown (or went away entirely).
    Shutdown,
    /// The peer closed the stream (EOF).
    PeerClosed,
    /// A read or write failed mid-session.
    Io(std::io::Error),
}

/// Everything a connection task needs besides its socket.
pub(crate) struct ConnectionParams {
    pub router: Arc<dyn Router>,
    pub pending: Arc<PendingCalls>,
    /// Peer label for log messages.
    pub peer: String,
}

// ── Pending call map ──────────────────────────────────────────────────────────

type CallOutcome = Result<Value, TransportError>;

#[derive(Debug)]
struct PendingEntry {
    reply: oneshot::Sender<CallOutcome>,
    /// Set once the call has actually been written to a socket. Entries that
    /// were never sent survive a connection loss; sent entries do not.
    sent: bool,
}

/// Correlation map from call id to the waiting caller.
///
/// Scoped to one logical connection. Entries leave the map on a matching
/// reply or on termination, in which case the caller receives an error
/// instead of hanging.
#[derive(Debug, Default)]
pub(crate) struct PendingCalls {
    inner: Mutex<HashMap<Uuid, PendingEntry>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, PendingEntry>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a caller waiting for the reply to `id`.
    pub fn register(&self, id: Uuid) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(
            id,
            PendingEntry {
                reply: tx,
                sent: false,
            },
        );
        rx
    }

    /// Drops the entry for `id` without settling it.
    pub fn remove(&self, id: Uuid) {
        self.lock().remove(&id);
    }

    /// Records that the call with `id` has been written to the socket.
    pub fn mark_sent(&self, id: Uuid) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.sent = true;
        }
    }

    /// Delivers `outcome` to the caller waiting on `id`.
    ///
    /// Returns false when no such caller exists (already settled, or the
    /// reply belongs to a call this connection never issued).
    pub fn settle(&self, id: Uuid, outcome: CallOutcome) -> bool {
        match self.lock().remove(&id) {
            Some(entry) => {
                let _ = entry.reply.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Fails every entry whose call reached the wire. Unsent entries stay:
    /// their messages are still queued and go out on the next connection.
    pub fn fail_sent(&self, err: impl Fn() -> TransportError) {
        let mut map = self.lock();
        let sent_ids: Vec<Uuid> = map
            .iter()
            .filter(|(_, entry)| entry.sent)
            .map(|(id, _)| *id)
            .collect();
        for id in sent_ids {
            if let Some(entry) = map.remove(&id) {
                let _ = entry.reply.send(Err(err()));
            }
        }
    }

    /// Fails every entry, sent or not. Used at terminal close.
    pub fn fail_all(&self, err: impl Fn() -> TransportError) {
        let mut map = self.lock();
        for (_, entry) in map.drain() {
            let _ = entry.reply.send(Err(err()));
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

// ── Connection driver ─────────────────────────────────────────────────────────

/// Runs one connection until shutdown, peer close, or an I/O error.
///
/// The caller owns the policy for what happens next: the listener lets the
/// handler end (the peer must reconnect), the client enters its reconnect
/// machine.
pub(crate) async fn drive(
    reader: &mut BoxedReader,
    writer: &mut BoxedWriter,
    outbound: &mut mpsc::Receiver<Message>,
    shutdown: &mut watch::Receiver<bool>,
    params: &ConnectionParams,
) -> Disconnect {
    let mut frames = FrameBuffer::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        tokio::select! {
            // Resolves on an explicit close, or with Err when the owner is
            // gone entirely; both end the session.
            _ = async { shutdown.wait_for(|closed| *closed).await.map(|_| ()) } => {
                return Disconnect::Shutdown;
            }

            queued = outbound.recv() => match queued {
                Some(msg) => {
                    if let Message::Call { id, .. } = &msg {
                        params.pending.mark_sent(*id);
                    }
                    if let Err(e) = write_frame(writer, &msg).await {
                        return Disconnect::Io(e);
                    }
                }
                None => return Disconnect::Shutdown,
            },

            read = reader.read(&mut chunk) => match read {
                Ok(0) => return Disconnect::PeerClosed,
                Ok(n) => {
                    frames.extend(&chunk[..n]);
                    for frame in frames.drain_frames() {
                        // Malformed frames were already logged by the codec;
                        // the connection stays open.
                        let Ok(msg) = frame else { continue };
                        if let Err(e) = handle_message(msg, writer, params).await {
                            return Disconnect::Io(e);
                        }
                    }
                }
                Err(e) => return Disconnect::Io(e),
            },
        }
    }
}

/// Routes one decoded message: calls are dispatched and answered in place,
/// replies settle the pending map.
async fn handle_message(
    msg: Message,
    writer: &mut BoxedWriter,
    params: &ConnectionParams,
) -> std::io::Result<()> {
    match msg {
        Message::Call { id, pattern, body } => {
            debug!("{}: dispatching call {pattern}", params.peer);
            let reply = match params.router.dispatch(&pattern, body).await {
                Ok(body) => Message::Result { id, body },
                Err(e) => {
                    debug!("{}: action {pattern} failed: {e}", params.peer);
                    Message::Error {
                        id,
                        message: error_envelope(&pattern, &e),
                    }
                }
            };
            write_frame(writer, &reply).await
        }
        Message::Result { id, body } => {
            if !params.pending.settle(id, Ok(body)) {
                debug!("{}: result {id} matches no pending call", params.peer);
            }
            Ok(())
        }
        Message::Error { id, message } => {
            let outcome = Err(TransportError::Action(ActionError::from_wire(message)));
            if !params.pending.settle(id, outcome) {
                debug!("{}: error reply {id} matches no pending call", params.peer);
            }
            Ok(())
        }
    }
}

async fn write_frame(writer: &mut BoxedWriter, msg: &Message) -> std::io::Result<()> {
    let bytes = match encode_frame(msg) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("dropping unencodable outbound message: {e}");
            return Ok(());
        }
    };
    writer.write_all(&bytes).await?;
    writer.flush().await
}

// ── Listener-side handle ──────────────────────────────────────────────────────

/// Handle to one accepted connection, owned by its listener.
pub(crate) struct ConnectionHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    /// Kept alive so the outbound queue survives idle periods.
    _outbound: mpsc::Sender<Message>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Spawns the handler task for an accepted peer.
    pub fn spawn(
        reader: BoxedReader,
        writer: BoxedWriter,
        router: Arc<dyn Router>,
        peer: String,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Open);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        let params = ConnectionParams {
            router,
            pending: Arc::new(PendingCalls::new()),
            peer,
        };

        let task = tokio::spawn(async move {
            let mut reader = reader;
            let mut writer = writer;
            let mut outbound_rx = outbound_rx;
            let mut shutdown_rx = shutdown_rx;

            let reason = drive(
                &mut reader,
                &mut writer,
                &mut outbound_rx,
                &mut shutdown_rx,
                &params,
            )
            .await;

            match &reason {
                Disconnect::Shutdown => debug!("{}: connection shut down", params.peer),
                Disconnect::PeerClosed => debug!("{}: peer closed the connection", params.peer),
                Disconnect::Io(e) => warn!("{}: connection error: {e}", params.peer),
            }

            let _ = state_tx.send(ConnectionState::Closing);
            params.pending.fail_all(|| TransportError::ConnectionLost);
            let _ = state_tx.send(ConnectionState::Closed);
            // reader and writer drop here, releasing the socket
        });

        Self {
            shutdown: shutdown_tx,
            state: state_rx,
            _outbound: outbound_tx,
            task,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Signals shutdown and waits for the handler to reach `Closed`.
    /// Closing a handler that already finished is a no-op.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
