//! Integration tests for the TCP transport over real sockets.
//!
//! These tests exercise the transport through its public API the way the
//! surrounding runtime uses it: bind a listener with a router, connect one
//! or more clients, and drive calls end to end. They cover:
//!
//! - Ephemeral port resolution (a requested port 0 comes back nonzero).
//! - The default connect host reaching a listener on the default bind host.
//! - Several concurrent clients each getting exactly their own reply.
//! - The exact action-error envelope for a failing remote action, with the
//!   connection staying usable afterwards.
//! - Bounded bind retry winning once the occupying listener goes away.
//! - Filesystem-socket listen over a stale socket file.
//! - A client surviving a listener restart: a call issued during the outage
//!   is delivered exactly once to the restarted listener.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::{sleep, timeout};
use tracing_subscriber::EnvFilter;

use seneca_core::{DispatchError, Router, TransportSettings};
use seneca_tcp::{client, listen, Client, ClientState, TransportError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Replies to `c:1` the way a trivial suffixing action would:
/// `{"d": X}` becomes `{"s": "1-X"}`.
struct SuffixRouter;

#[async_trait]
impl Router for SuffixRouter {
    async fn dispatch(&self, _pattern: &str, body: Value) -> Result<Value, DispatchError> {
        Ok(json!({ "s": format!("1-{}", body["d"]) }))
    }
}

/// Fails `a:1` with `bad-wire`; answers everything else.
struct FlakyActionRouter;

#[async_trait]
impl Router for FlakyActionRouter {
    async fn dispatch(&self, pattern: &str, _body: Value) -> Result<Value, DispatchError> {
        if pattern == "a:1" {
            Err(DispatchError::new("bad-wire"))
        } else {
            Ok(json!({ "ok": true }))
        }
    }
}

/// Counts how many calls it has executed.
struct CountingRouter {
    calls: AtomicUsize,
}

impl CountingRouter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Router for CountingRouter {
    async fn dispatch(&self, _pattern: &str, _body: Value) -> Result<Value, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "acted": true }))
    }
}

fn ephemeral() -> TransportSettings {
    TransportSettings {
        port: Some(0),
        ..Default::default()
    }
}

fn to_port(port: u16) -> TransportSettings {
    TransportSettings {
        port: Some(port),
        ..Default::default()
    }
}

async fn wait_for_state(client: &Client, wanted: ClientState) {
    timeout(Duration::from_secs(5), async {
        while client.state() != wanted {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("client never reached {wanted:?}"));
}

// ── Binding ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ephemeral_port_resolves_and_serves() -> Result<()> {
    init_tracing();
    let router: Arc<dyn Router> = Arc::new(SuffixRouter);

    let mut listener = listen(ephemeral(), Arc::clone(&router)).await?;
    let port = listener.address().port().expect("tcp listener has a port");
    assert_ne!(port, 0, "requested port 0 must resolve to a real port");

    let cli = client(to_port(port), router).await?;
    let reply = cli.call("c:1", json!({ "d": 9 })).await?;
    assert_eq!(reply, json!({ "s": "1-9" }));

    cli.close().await;
    listener.close().await;
    Ok(())
}

#[tokio::test]
async fn test_client_defaults_reach_default_host_listener() -> Result<()> {
    init_tracing();
    let router: Arc<dyn Router> = Arc::new(SuffixRouter);

    // Listener with no explicit host binds the default host; the client with
    // no explicit host must find it.
    let mut listener = listen(ephemeral(), Arc::clone(&router)).await?;
    let port = listener.address().port().expect("tcp listener has a port");
    assert_eq!(listener.address().host(), Some("127.0.0.1"));

    let cli = client(to_port(port), router).await?;
    let reply = cli.call("c:1", json!({ "d": 0 })).await?;
    assert_eq!(reply, json!({ "s": "1-0" }));

    cli.close().await;
    listener.close().await;
    Ok(())
}

#[tokio::test]
async fn test_bind_retry_wins_once_the_port_frees_up() -> Result<()> {
    init_tracing();
    let router: Arc<dyn Router> = Arc::new(SuffixRouter);

    let mut first = listen(ephemeral(), Arc::clone(&router)).await?;
    let port = first.address().port().expect("tcp listener has a port");

    let contender_settings = TransportSettings {
        port: Some(port),
        max_listen_attempts: Some(40),
        attempt_delay: Some(25),
        ..Default::default()
    };
    let contender_router = Arc::clone(&router);
    let contender =
        tokio::spawn(async move { listen(contender_settings, contender_router).await });

    // Let the contender burn a few attempts against the occupied port, then
    // free it.
    sleep(Duration::from_millis(100)).await;
    first.close().await;

    let mut second = timeout(Duration::from_secs(5), contender).await???;
    assert_eq!(second.address().port(), Some(port));
    second.close().await;
    Ok(())
}

// ── Concurrent clients ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_three_clients_each_get_their_own_reply() -> Result<()> {
    init_tracing();
    let router: Arc<dyn Router> = Arc::new(SuffixRouter);

    let mut listener = listen(ephemeral(), Arc::clone(&router)).await?;
    let port = listener.address().port().expect("tcp listener has a port");

    let mut tasks = Vec::new();
    for n in 0..3u8 {
        let router = Arc::clone(&router);
        tasks.push(tokio::spawn(async move {
            let cli = client(to_port(port), router).await?;
            let reply = cli.call("c:1", json!({ "d": n })).await?;
            cli.close().await;
            anyhow::Ok((n, reply))
        }));
    }

    for task in tasks {
        let (n, reply) = task.await??;
        assert_eq!(
            reply,
            json!({ "s": format!("1-{n}") }),
            "client {n} must receive exactly its own reply"
        );
    }

    listener.close().await;
    Ok(())
}

// ── Action errors ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_action_yields_exact_envelope_and_keeps_connection() -> Result<()> {
    init_tracing();
    let router: Arc<dyn Router> = Arc::new(FlakyActionRouter);

    let mut listener = listen(ephemeral(), Arc::clone(&router)).await?;
    let port = listener.address().port().expect("tcp listener has a port");
    let cli = client(to_port(port), router).await?;

    let err = cli
        .call("a:1", json!({}))
        .await
        .expect_err("a:1 must fail remotely");
    assert_eq!(err.to_string(), "seneca: Action a:1 failed: bad-wire.");
    assert!(matches!(err, TransportError::Action(_)));

    // An action failure is an answer, not a connection failure: the same
    // connection keeps serving.
    let reply = cli.call("b:1", json!({})).await?;
    assert_eq!(reply, json!({ "ok": true }));

    cli.close().await;
    listener.close().await;
    Ok(())
}

// ── Filesystem sockets ────────────────────────────────────────────────────────

#[cfg(unix)]
#[tokio::test]
async fn test_path_listen_replaces_stale_socket_file() -> Result<()> {
    init_tracing();
    let path = std::env::temp_dir().join(format!("seneca-tcp-it-{}.sock", std::process::id()));

    // Simulate a previous run that died without cleaning up.
    std::fs::write(&path, b"")?;
    assert!(path.exists());

    let router: Arc<dyn Router> = Arc::new(SuffixRouter);
    let settings = TransportSettings {
        path: Some(path.clone()),
        ..Default::default()
    };
    let mut listener = listen(settings.clone(), Arc::clone(&router)).await?;

    let cli = client(settings, router).await?;
    let reply = cli.call("c:1", json!({ "d": 3 })).await?;
    assert_eq!(reply, json!({ "s": "1-3" }));

    cli.close().await;
    listener.close().await;
    assert!(
        !path.exists(),
        "close must remove the socket file it created"
    );
    Ok(())
}

// ── Reconnect ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_call_issued_during_outage_is_delivered_exactly_once() -> Result<()> {
    init_tracing();
    let counting = CountingRouter::new();
    let router: Arc<dyn Router> = counting.clone();

    let mut first = listen(ephemeral(), Arc::clone(&router)).await?;
    let port = first.address().port().expect("tcp listener has a port");

    let settings = TransportSettings {
        port: Some(port),
        attempt_delay: Some(25),
        ..Default::default()
    };
    let cli = client(settings, Arc::clone(&router)).await?;

    // Kill the listener and wait until the client has noticed.
    first.close().await;
    wait_for_state(&cli, ClientState::Reconnecting).await;

    // A call issued while the connection is down is held, not dropped.
    let call = timeout(Duration::from_secs(8), cli.call("r:1", json!({})));

    // Restart the listener on the same port while the call is pending.
    let restart = async {
        sleep(Duration::from_millis(150)).await;
        listen(to_port(port), Arc::clone(&router)).await
    };

    let (reply, restarted) = tokio::join!(call, restart);
    let mut restarted = restarted?;

    assert_eq!(reply??, json!({ "acted": true }));
    assert_eq!(
        counting.calls.load(Ordering::SeqCst),
        1,
        "the held call must be delivered exactly once, no duplicates, no loss"
    );
    assert_eq!(cli.state(), ClientState::Connected);

    cli.close().await;
    restarted.close().await;
    Ok(())
}

#[tokio::test]
async fn test_close_settles_calls_held_during_an_outage() -> Result<()> {
    init_tracing();
    let router: Arc<dyn Router> = Arc::new(SuffixRouter);

    let mut listener = listen(ephemeral(), Arc::clone(&router)).await?;
    let port = listener.address().port().expect("tcp listener has a port");

    let settings = TransportSettings {
        port: Some(port),
        attempt_delay: Some(25),
        ..Default::default()
    };
    let cli = Arc::new(client(settings, router).await?);

    listener.close().await;
    wait_for_state(&cli, ClientState::Reconnecting).await;

    // Nothing will ever answer this call; closing the client must resolve it
    // rather than leave the caller hanging.
    let held = tokio::spawn({
        let cli = Arc::clone(&cli);
        async move { cli.call("c:1", json!({ "d": 1 })).await }
    });
    sleep(Duration::from_millis(50)).await;

    cli.close().await;
    assert_eq!(cli.state(), ClientState::Closed);

    let outcome = timeout(Duration::from_secs(5), held).await??;
    assert!(matches!(outcome, Err(TransportError::Closed)));

    // Calls after close fail immediately.
    let after = cli.call("c:1", json!({ "d": 2 })).await;
    assert!(matches!(after, Err(TransportError::Closed)));
    Ok(())
}
