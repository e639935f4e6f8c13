//! TCP server implementation.
//!
//! One acceptor task pushes accepted connections into a bounded queue; a fixed pool of
//! workers pulls from it and runs one request/response exchange per connection.

use crate::config::Config;
use crate::context::PeerInfo;
use crate::error::ServerError;
use crate::processor::{panic_message, process_batch};
use crate::router::Router;
use comborpc_protocol::{
    deadline_after, normalize_timeout, Connection, RequestBatch, WireFormat,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Deadline applied to each accepted connection.
    pub timeout: Duration,
    /// Number of worker tasks.
    pub workers: usize,
    /// Capacity of the accepted-connection queue.
    pub queue_capacity: usize,
    /// Maximum connections processed at once (admission limiter).
    pub max_concurrency: Option<usize>,
    /// Body codec and compression; must match the clients.
    pub wire: WireFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Config::default().server_config()
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Sets the per-connection deadline. Values below 1ms fall back to the default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = normalize_timeout(timeout);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max.max(1));
        self
    }

    pub fn with_wire(mut self, wire: WireFormat) -> Self {
        self.wire = wire;
        self
    }
}

impl Config {
    /// Builds the runtime server configuration.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.network.bind_addr,
            timeout: self.network.timeout(),
            workers: self.network.workers.max(1),
            queue_capacity: self.network.queue_capacity.max(1),
            max_concurrency: self.network.max_concurrency.map(|n| n.max(1)),
            wire: self.wire.wire_format(),
        }
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        config.server_config()
    }
}

/// Lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Created, not yet started.
    Idle,
    /// Accepting connections.
    Listening,
    /// Stop requested; queued connections are being finished.
    Draining,
    /// Acceptor and every worker have exited.
    Closed,
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
    /// Connection tasks that panicked outside of any handler.
    pub panics_total: AtomicU64,
}

struct Shared {
    state: watch::Sender<ServerState>,
    shutdown: broadcast::Sender<()>,
    stats: ServerStats,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// TCP server for comborpc.
pub struct Server {
    config: ServerConfig,
    router: Arc<Router>,
    shared: Arc<Shared>,
}

impl Server {
    /// Creates a new server. The router is frozen from here on.
    pub fn new(config: ServerConfig, router: Router) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (state_tx, _) = watch::channel(ServerState::Idle);
        Self {
            config,
            router: Arc::new(router),
            shared: Arc::new(Shared {
                state: state_tx,
                shutdown: shutdown_tx,
                stats: ServerStats::default(),
                local_addr: Mutex::new(None),
            }),
        }
    }

    /// Binds the listener and spawns the acceptor and the worker pool.
    ///
    /// Returns the bound address, which differs from the configured one when binding port 0.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        // Subscribe before claiming Listening so a concurrent stop() is never missed.
        let shutdown_rx = self.shared.shutdown.subscribe();
        let claimed = self.shared.state.send_if_modified(|state| {
            if *state == ServerState::Idle {
                *state = ServerState::Listening;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ServerError::AlreadyStarted);
        }

        let listener = match TcpListener::bind(self.config.bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                // A stop() that raced with the bind leaves nothing to drain.
                self.shared.state.send_if_modified(|state| {
                    *state = match *state {
                        ServerState::Listening => ServerState::Idle,
                        ServerState::Draining => ServerState::Closed,
                        _ => return false,
                    };
                    true
                });
                return Err(e.into());
            }
        };
        let local_addr = listener.local_addr()?;
        *self.shared.local_addr.lock() = Some(local_addr);

        tracing::info!(
            "Server listening on {} ({} workers, queue {}, codec {}, compression {})",
            local_addr,
            self.config.workers,
            self.config.queue_capacity,
            self.config.wire.codec,
            self.config.wire.compression
        );

        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity);
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let limiter = self
            .config
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n)));

        let mut tasks = Vec::with_capacity(self.config.workers + 1);
        tasks.push(tokio::spawn(accept_loop(
            listener,
            queue_tx,
            self.config.timeout,
            self.shared.clone(),
            shutdown_rx,
        )));
        for id in 0..self.config.workers {
            tasks.push(tokio::spawn(worker_loop(
                id,
                queue_rx.clone(),
                limiter.clone(),
                self.router.clone(),
                self.config.wire,
                self.shared.clone(),
            )));
        }

        let shared = self.shared.clone();
        tokio::spawn(async move {
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::error!("Server task failed: {}", e);
                }
            }
            shared.state.send_replace(ServerState::Closed);
            tracing::info!("Server closed");
        });

        Ok(local_addr)
    }

    /// Stops accepting and lets the workers drain the queue. Calling it again is a no-op.
    pub fn stop(&self) {
        let mut from = ServerState::Closed;
        self.shared.state.send_if_modified(|state| {
            from = *state;
            match *state {
                ServerState::Idle => {
                    *state = ServerState::Closed;
                    true
                }
                ServerState::Listening => {
                    *state = ServerState::Draining;
                    true
                }
                ServerState::Draining | ServerState::Closed => false,
            }
        });

        if from == ServerState::Listening {
            tracing::info!("Server shutting down");
            let _ = self.shared.shutdown.send(());
        }
    }

    /// Waits until the server reaches [`ServerState::Closed`].
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == ServerState::Closed).await;
    }

    /// Starts the server and waits until it has been stopped and drained.
    pub async fn serve(&self) -> Result<(), ServerError> {
        self.start().await?;
        self.closed().await;
        Ok(())
    }

    pub fn state(&self) -> ServerState {
        *self.shared.state.borrow()
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.shared.stats
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    queue: mpsc::Sender<Connection>,
    timeout: Duration,
    shared: Arc<Shared>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, addr) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };

                let deadline = deadline_after(timeout);
                let mut conn = match Connection::from_stream(stream, deadline) {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!("[{}] Dropping connection: {}", addr, e);
                        continue;
                    }
                };
                shared.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Client connected: {}", addr);

                // Blocks while the queue is full.
                let permit = tokio::select! {
                    permit = queue.reserve() => permit,
                    _ = shutdown.recv() => {
                        tracing::warn!("[{}] Abandoning connection, server stopped while queue was full", addr);
                        conn.close().await;
                        break;
                    }
                };
                match permit {
                    Ok(permit) => permit.send(conn),
                    Err(_) => {
                        conn.close().await;
                        break;
                    }
                }
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Acceptor stopped");
}

async fn worker_loop(
    id: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Connection>>>,
    limiter: Option<Arc<Semaphore>>,
    router: Arc<Router>,
    wire: WireFormat,
    shared: Arc<Shared>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(conn) = next else {
            break;
        };

        let _permit = match &limiter {
            Some(limiter) => limiter.clone().acquire_owned().await.ok(),
            None => None,
        };

        let addr = conn.peer_addr();
        shared.stats.connections_active.fetch_add(1, Ordering::Relaxed);

        let task = tokio::spawn(handle_connection(conn, router.clone(), wire, shared.clone()));
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!("Connection {} error: {}", addr, e);
                shared.stats.errors_total.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_panic() => {
                tracing::error!(
                    "[{}] Connection processing panicked: {}",
                    addr,
                    panic_message(e.into_panic())
                );
                shared.stats.panics_total.fetch_add(1, Ordering::Relaxed);
                shared.stats.errors_total.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("[{}] Connection task failed: {}", addr, e);
                shared.stats.errors_total.fetch_add(1, Ordering::Relaxed);
            }
        }

        shared.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
    }
    tracing::debug!("Worker {} stopped", id);
}

/// Runs one exchange on `conn` and closes it on every path.
async fn handle_connection(
    mut conn: Connection,
    router: Arc<Router>,
    wire: WireFormat,
    shared: Arc<Shared>,
) -> Result<(), ServerError> {
    let result = exchange(&mut conn, &router, wire, &shared).await;
    conn.close().await;
    result
}

async fn exchange(
    conn: &mut Connection,
    router: &Arc<Router>,
    wire: WireFormat,
    shared: &Shared,
) -> Result<(), ServerError> {
    let body = conn.receive().await?;
    let batch: RequestBatch = wire.decode(&body)?;
    shared
        .stats
        .requests_total
        .fetch_add(batch.len() as u64, Ordering::Relaxed);

    let peer = PeerInfo {
        remote_addr: conn.peer_addr(),
        local_addr: conn.local_addr(),
    };
    tracing::debug!("[{}] Dispatching batch of {}", peer.remote_addr, batch.len());

    let responses = process_batch(router, batch, Some(peer)).await;
    let encoded = wire.encode(&responses)?;
    conn.send(&encoded).await?;
    Ok(())
}
