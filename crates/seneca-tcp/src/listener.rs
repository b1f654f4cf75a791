//! Listening endpoint: bounded-retry bind, accept loop, and per-peer
//! connection handlers.
//!
//! Binding retries only on address-in-use, up to `max_listen_attempts` with
//! `attempt_delay` between attempts; every other bind error is terminal
//! immediately. Each accepted peer gets its own handler task wired to the
//! shared [`Router`]; handlers never touch each other's state, and a handler
//! that dies only ends that peer's session — the peer reconnects if it wants
//! to continue.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use seneca_core::settings::DEFAULT_BIND_RETRY_DELAY_MS;
use seneca_core::{Address, Router, Target, TransportSettings};

use crate::connection::ConnectionHandle;
use crate::error::TransportError;

/// Socket variants the accept loop runs over.
enum AcceptSocket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

/// A bound listening endpoint and the connections it has accepted.
pub struct Listener {
    address: Address,
    shutdown: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
    conns: Arc<Mutex<Vec<ConnectionHandle>>>,
    bound_path: Option<PathBuf>,
    closed: bool,
}

impl Listener {
    /// Binds the endpoint named by `settings` and starts accepting.
    ///
    /// Resolves exactly once: with the listener (carrying the resolved
    /// address — a requested port 0 comes back as the OS-assigned port), or
    /// with the terminal bind error.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Settings`] for a contradictory settings
    /// block and [`TransportError::Bind`] when the address stays unavailable
    /// through every allowed attempt or fails for a non-retriable reason.
    pub async fn bind(
        settings: TransportSettings,
        router: Arc<dyn Router>,
    ) -> Result<Listener, TransportError> {
        let target = settings.target()?;
        let attempts = settings.max_listen_attempts();
        let delay = settings.attempt_delay(DEFAULT_BIND_RETRY_DELAY_MS);

        match target {
            Target::Tcp { host, port } => {
                let label = format!("{host}:{port}");
                let bind_host = host.clone();
                let socket = bind_with_retry(&label, attempts, delay, || {
                    TcpListener::bind((bind_host.clone(), port))
                })
                .await?;

                let local = socket.local_addr().map_err(|source| TransportError::Bind {
                    target: label,
                    attempts: 1,
                    source,
                })?;
                let address = Address::Tcp {
                    host,
                    port: local.port(),
                };
                info!("listening on {address}");
                Ok(Self::start(AcceptSocket::Tcp(socket), address, router, None))
            }
            Target::Path(path) => Self::bind_path(path, attempts, delay, router).await,
        }
    }

    #[cfg(unix)]
    async fn bind_path(
        path: PathBuf,
        attempts: u32,
        delay: Duration,
        router: Arc<dyn Router>,
    ) -> Result<Listener, TransportError> {
        // A previous run that died without cleanup leaves the socket file
        // behind; binding over it would fail with AddrInUse forever.
        if path.exists() {
            debug!("removing stale socket file {}", path.display());
            let _ = std::fs::remove_file(&path);
        }

        let label = path.display().to_string();
        let bind_path = path.clone();
        let socket = bind_with_retry(&label, attempts, delay, || {
            std::future::ready(tokio::net::UnixListener::bind(&bind_path))
        })
        .await?;

        let address = Address::Path(path.clone());
        info!("listening on {address}");
        Ok(Self::start(
            AcceptSocket::Unix(socket),
            address,
            router,
            Some(path),
        ))
    }

    #[cfg(not(unix))]
    async fn bind_path(
        path: PathBuf,
        _attempts: u32,
        _delay: Duration,
        _router: Arc<dyn Router>,
    ) -> Result<Listener, TransportError> {
        Err(TransportError::Bind {
            target: path.display().to_string(),
            attempts: 1,
            source: std::io::Error::new(
                ErrorKind::Unsupported,
                "filesystem sockets are not available on this platform",
            ),
        })
    }

    fn start(
        socket: AcceptSocket,
        address: Address,
        router: Arc<dyn Router>,
        bound_path: Option<PathBuf>,
    ) -> Listener {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let conns = Arc::new(Mutex::new(Vec::new()));
        let accept_task = tokio::spawn(accept_loop(
            socket,
            router,
            Arc::clone(&conns),
            shutdown_rx,
        ));

        Listener {
            address,
            shutdown: shutdown_tx,
            accept_task: Some(accept_task),
            conns,
            bound_path,
            closed: false,
        }
    }

    /// The resolved endpoint this listener is bound to.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Stops accepting, closes every connection handler spawned by this
    /// listener, and returns once all of them reached `Closed`. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let _ = self.shutdown.send(true);
        if let Some(task) = self.accept_task.take() {
            // The accept loop owns the socket; awaiting it guarantees the
            // port (or path) is released before close returns.
            let _ = task.await;
        }

        let mut conns = self.conns.lock().await;
        for handle in conns.drain(..) {
            debug!("closing connection handler (was {:?})", handle.state());
            handle.close().await;
        }

        if let Some(path) = &self.bound_path {
            let _ = std::fs::remove_file(path);
        }
        info!("listener on {} closed", self.address);
    }
}

/// Accepts peers until shutdown, spawning one handler per connection.
async fn accept_loop(
    socket: AcceptSocket,
    router: Arc<dyn Router>,
    conns: Arc<Mutex<Vec<ConnectionHandle>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        match &socket {
            AcceptSocket::Tcp(listener) => {
                tokio::select! {
                    _ = async { shutdown.wait_for(|closed| *closed).await.map(|_| ()) } => return,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!("accepted connection from {peer}");
                            let (r, w) = stream.into_split();
                            let handle = ConnectionHandle::spawn(
                                Box::new(r),
                                Box::new(w),
                                Arc::clone(&router),
                                peer.to_string(),
                            );
                            conns.lock().await.push(handle);
                        }
                        // Transient (e.g. out of file descriptors); keep accepting.
                        Err(e) => warn!("accept error: {e}"),
                    },
                }
            }
            #[cfg(unix)]
            AcceptSocket::Unix(listener) => {
                tokio::select! {
                    _ = async { shutdown.wait_for(|closed| *closed).await.map(|_| ()) } => return,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            debug!("accepted local socket connection");
                            let (r, w) = stream.into_split();
                            let handle = ConnectionHandle::spawn(
                                Box::new(r),
                                Box::new(w),
                                Arc::clone(&router),
                                "local-socket-peer".to_string(),
                            );
                            conns.lock().await.push(handle);
                        }
                        Err(e) => warn!("accept error: {e}"),
                    },
                }
            }
        }
    }
}

/// Retries `bind` on address-in-use up to `attempts` times with `delay`
/// between tries. Any other error is terminal on the spot.
async fn bind_with_retry<T, F, Fut>(
    label: &str,
    attempts: u32,
    delay: Duration,
    mut bind: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::io::Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match bind().await {
            Ok(socket) => {
                if attempt > 1 {
                    info!("bind on {label} succeeded on attempt {attempt}");
                }
                return Ok(socket);
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse && attempt < attempts => {
                warn!(
                    "bind attempt {attempt}/{attempts} on {label}: address in use; retrying in {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            Err(source) => {
                return Err(TransportError::Bind {
                    target: label.to_string(),
                    attempts: attempt,
                    source,
                });
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
