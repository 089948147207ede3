//! Byte-transparent reverse proxy in front of a movable debugging backend.
//!
//! The proxy binds one loopback port that stays stable for its whole
//! lifetime and splices every accepted connection to whatever backend port
//! is currently configured. When no backend is set, the first incoming
//! connection triggers the registered lazy-launch callback; concurrent
//! arrivals share a single invocation through a shared future, so N initial
//! connections cause exactly one launch.
//!
//! The proxy never parses what it carries. WebSocket upgrades, CDP JSON-RPC,
//! or any future remote-debugging protocol with the same transport shape all
//! pass through unchanged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

/// Callback that produces a backend port on demand.
///
/// Invoked at most once per launch cycle; the returned future must resolve
/// to an internal port that accepts CDP connections.
pub type LazyLaunchFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<u16>> + Send + Sync>;

/// The single-flight cell: all concurrent arrivals await the same future.
type SharedLaunch = Shared<BoxFuture<'static, Result<u16, String>>>;

/// Errors surfaced by the proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The listener could not bind. Fatal at startup.
    #[error("failed to bind proxy listener: {0}")]
    BindFailed(#[source] std::io::Error),

    /// A connection arrived with no backend and no lazy-launch callback.
    #[error("no backend configured and no lazy-launch callback registered")]
    NoBackend,

    /// The lazy-launch callback failed.
    #[error("lazy launch failed: {0}")]
    LaunchFailed(String),

    /// The backend refused or dropped the connection.
    #[error("backend connection failed: {0}")]
    BackendConnect(#[source] std::io::Error),
}

#[derive(Default)]
struct ProxyShared {
    backend: Mutex<Option<u16>>,
    launch: Mutex<Option<LazyLaunchFn>>,
    inflight: Mutex<Option<SharedLaunch>>,
    connections: Mutex<HashMap<u64, AbortHandle>>,
    next_connection_id: AtomicU64,
}

/// Reverse proxy for a movable debugging backend.
///
/// The listen port is fixed from [`DevtoolsProxy::listen`] until
/// [`DevtoolsProxy::close`]; the backend port may change any number of
/// times in between.
pub struct DevtoolsProxy {
    port: u16,
    shared: Arc<ProxyShared>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl DevtoolsProxy {
    /// Bind a loopback listener (`port` 0 lets the OS assign one) and start
    /// accepting. Returns the proxy with its bound port recorded.
    pub async fn listen(port: u16) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(ProxyError::BindFailed)?;
        let bound = listener
            .local_addr()
            .map_err(ProxyError::BindFailed)?
            .port();

        let shared = Arc::new(ProxyShared::default());
        let accept = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));

        info!(port = bound, "devtools proxy listening");
        Ok(Self {
            port: bound,
            shared,
            accept_task: Mutex::new(Some(accept)),
        })
    }

    /// The bound listen port. Stable for the lifetime of the proxy.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Register the lazy-launch callback.
    ///
    /// Replacement is allowed before the first connection arrives.
    pub fn on_lazy_launch<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<u16>> + Send + 'static,
    {
        *self.shared.launch.lock() = Some(Arc::new(move || callback().boxed()));
    }

    /// Current backend port, if one is set.
    pub fn backend(&self) -> Option<u16> {
        *self.shared.backend.lock()
    }

    /// Set the forwarding target. Idempotent; affects only connections
    /// established after the call.
    pub fn set_backend(&self, port: u16) {
        debug!(backend = port, "proxy backend set");
        *self.shared.backend.lock() = Some(port);
    }

    /// Remove the forwarding target and tear down every open pair.
    pub fn clear_backend(&self) {
        *self.shared.backend.lock() = None;
        self.close_connections();
    }

    /// Destroy every currently open client/backend pair. Subsequent
    /// incoming connections are handled normally.
    pub fn close_connections(&self) {
        let drained: Vec<(u64, AbortHandle)> =
            self.shared.connections.lock().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "closing proxy connections");
        }
        for (_, handle) in drained {
            handle.abort();
        }
    }

    /// Resolve the backend port, launching lazily when necessary.
    ///
    /// Shared by the accept path and by callers that need a live backend
    /// for their own sessions; all of them funnel through the same
    /// single-flight cell.
    pub async fn ensure_backend(&self) -> Result<u16, ProxyError> {
        ensure_backend(&self.shared).await
    }

    /// Number of currently open connection pairs.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    /// Close the listener and every open pair. No further accepts succeed.
    pub fn close(&self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
            info!(port = self.port, "devtools proxy closed");
        }
        self.close_connections();
    }
}

impl Drop for DevtoolsProxy {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<ProxyShared>) {
    loop {
        match listener.accept().await {
            Ok((client, peer)) => {
                let id = shared.next_connection_id.fetch_add(1, Ordering::Relaxed);
                debug!(connection = id, %peer, "proxy connection accepted");

                let conn_shared = Arc::clone(&shared);
                // Spawn and register under one lock acquisition: a
                // concurrent close_connections() either runs before this
                // pair exists or finds it in the set and aborts it. The
                // pair is never live while absent from the set.
                let mut connections = shared.connections.lock();
                let task = tokio::spawn(async move {
                    if let Err(e) = handle_connection(client, &conn_shared).await {
                        debug!(connection = id, "proxy connection ended: {}", e);
                    }
                    conn_shared.connections.lock().remove(&id);
                });
                connections.insert(id, task.abort_handle());
            }
            Err(e) => {
                // Transient accept failures (EMFILE and friends) must not
                // spin the loop.
                warn!("proxy accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Per-connection protocol: resolve a backend, dial it, splice bytes until
/// either side goes away. Every failure drops only this pair.
async fn handle_connection(
    mut client: TcpStream,
    shared: &Arc<ProxyShared>,
) -> Result<(), ProxyError> {
    let backend_port = ensure_backend(shared).await?;

    let mut backend = TcpStream::connect(("127.0.0.1", backend_port))
        .await
        .map_err(ProxyError::BackendConnect)?;

    // Plain TCP splice, both directions concurrently. A close or error on
    // either side ends the pair.
    let _ = tokio::io::copy_bidirectional(&mut client, &mut backend).await;
    Ok(())
}

async fn ensure_backend(shared: &Arc<ProxyShared>) -> Result<u16, ProxyError> {
    if let Some(port) = *shared.backend.lock() {
        return Ok(port);
    }

    let launch_future = {
        let mut inflight = shared.inflight.lock();
        match inflight.as_ref() {
            Some(existing) => existing.clone(),
            None => {
                let callback = shared
                    .launch
                    .lock()
                    .clone()
                    .ok_or(ProxyError::NoBackend)?;
                let cell_owner = Arc::clone(shared);
                let future: SharedLaunch = async move {
                    let result = callback().await.map_err(|e| format!("{:#}", e));
                    if let Ok(port) = result {
                        *cell_owner.backend.lock() = Some(port);
                    }
                    *cell_owner.inflight.lock() = None;
                    result
                }
                .boxed()
                .shared();
                *inflight = Some(future.clone());
                future
            }
        }
    };

    launch_future.await.map_err(ProxyError::LaunchFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Echo server bound on a loopback port; returns the port.
    async fn spawn_echo_backend() -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    while let Ok(n) = socket.read(&mut buf).await {
                        if n == 0 || socket.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_listen_assigns_port() {
        let proxy = DevtoolsProxy::listen(0).await.unwrap();
        assert!(proxy.port() > 0);
        proxy.close();
    }

    #[tokio::test]
    async fn test_no_backend_no_callback_drops_client() {
        let proxy = DevtoolsProxy::listen(0).await.unwrap();
        let mut client = TcpStream::connect(("127.0.0.1", proxy.port())).await.unwrap();

        let mut buf = [0u8; 8];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "client must see EOF when nothing can serve it");
        proxy.close();
    }

    #[tokio::test]
    async fn test_single_flight_lazy_launch() {
        let proxy = DevtoolsProxy::listen(0).await.unwrap();
        let launches = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&launches);
        proxy.on_lazy_launch(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(spawn_echo_backend().await)
            }
        });

        let port = proxy.port();
        let mut tasks = Vec::new();
        for i in 0..8u8 {
            tasks.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
                client.write_all(&[i]).await.unwrap();
                let mut buf = [0u8; 1];
                client.read_exact(&mut buf).await.unwrap();
                buf[0]
            }));
        }
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap(), i as u8);
        }

        assert_eq!(launches.load(Ordering::SeqCst), 1);
        proxy.close();
    }

    #[tokio::test]
    async fn test_lazy_launch_failure_drops_client_and_allows_retry() {
        let proxy = DevtoolsProxy::listen(0).await.unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&attempts);
        proxy.on_lazy_launch(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("nothing to launch")
            }
        });

        for _ in 0..2 {
            let mut client = TcpStream::connect(("127.0.0.1", proxy.port())).await.unwrap();
            let mut buf = [0u8; 1];
            assert_eq!(client.read(&mut buf).await.unwrap(), 0);
        }

        // A failed launch clears the single-flight cell, so the next
        // connection retries instead of reusing the failure.
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        proxy.close();
    }

    #[tokio::test]
    async fn test_byte_transparency() {
        let backend = spawn_echo_backend().await;
        let proxy = DevtoolsProxy::listen(0).await.unwrap();
        proxy.set_backend(backend);

        let mut client = TcpStream::connect(("127.0.0.1", proxy.port())).await.unwrap();

        // Arbitrary bytes including a masked WebSocket text frame.
        let payload: Vec<u8> = vec![
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58, 0x00, 0xff, 0x0a,
        ];
        client.write_all(&payload).await.unwrap();

        let mut echoed = vec![0u8; payload.len()];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, payload);
        proxy.close();
    }

    #[tokio::test]
    async fn test_backend_swap_isolation() {
        async fn banner_backend(banner: u8) -> u16 {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            let port = listener.local_addr().unwrap().port();
            tokio::spawn(async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    tokio::spawn(async move {
                        let _ = socket.write_all(&[banner]).await;
                        let mut sink = [0u8; 64];
                        while matches!(socket.read(&mut sink).await, Ok(n) if n > 0) {}
                    });
                }
            });
            port
        }

        let first = banner_backend(b'A').await;
        let second = banner_backend(b'B').await;

        let proxy = DevtoolsProxy::listen(0).await.unwrap();
        let front_port = proxy.port();
        proxy.set_backend(first);

        let mut old_client = TcpStream::connect(("127.0.0.1", front_port)).await.unwrap();
        let mut buf = [0u8; 1];
        old_client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], b'A');

        proxy.set_backend(second);
        proxy.close_connections();

        // The previously open pair is gone.
        let n = old_client.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0, "old connection must not remain readable");

        // The stable front port now reaches the new backend.
        assert_eq!(proxy.port(), front_port);
        let mut new_client = TcpStream::connect(("127.0.0.1", front_port)).await.unwrap();
        new_client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], b'B');
        proxy.close();
    }

    #[tokio::test]
    async fn test_backend_connect_refused_drops_only_client() {
        let proxy = DevtoolsProxy::listen(0).await.unwrap();
        // A port with nothing behind it: bind then drop.
        let dead = {
            let l = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
            l.local_addr().unwrap().port()
        };
        proxy.set_backend(dead);

        let mut client = TcpStream::connect(("127.0.0.1", proxy.port())).await.unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap_or(0), 0);

        // Listener is still alive and serving.
        let backend = spawn_echo_backend().await;
        proxy.set_backend(backend);
        let mut client = TcpStream::connect(("127.0.0.1", proxy.port())).await.unwrap();
        client.write_all(b"ok").await.unwrap();
        let mut echoed = [0u8; 2];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ok");
        proxy.close();
    }

    #[tokio::test]
    async fn test_close_stops_accepting() {
        let proxy = DevtoolsProxy::listen(0).await.unwrap();
        let port = proxy.port();
        proxy.close();

        // Give the abort a moment to land.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = TcpStream::connect(("127.0.0.1", port)).await;
        match result {
            Err(_) => {}
            Ok(mut stream) => {
                // Accept queue raced the close; the connection must be dead.
                let mut buf = [0u8; 1];
                assert_eq!(stream.read(&mut buf).await.unwrap_or(0), 0);
            }
        }
    }
}
