//! BusServer struct and listener management.
//!
//! The `BusServer` owns the process-wide `RegisterBus`, the annotation store
//! and the layout registry. `run` accepts connections until the cancel token
//! fires; every client is served by its own thread.

use crate::config::ServerConfig;
use crate::dispatch;
use parking_lot::Mutex;
use regbus_bus::wire::{FrameBuffer, encode_frame};
use regbus_bus::{AnnotationStore, BusError, RegisterBus, Response, StatsSnapshot};
use regbus_common::cancel::CancelToken;
use regbus_common::config::{ConfigError, ConfigLoader, validate_unit_id};
use regbus_common::layout::{LayoutError, LayoutRegistry};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Idle wait of the accept loop.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Read timeout on client sockets; bounds how long a connection thread
/// takes to notice cancellation.
const CONNECTION_POLL: Duration = Duration::from_millis(100);

/// Number of non-zero registers included in a status report.
const STATUS_SAMPLE: usize = 10;

/// Server-level errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Module layouts overlap or exceed the bus.
    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),

    /// Bus or annotation store failure.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Connection counters.
#[derive(Debug, Default)]
struct ConnectionStats {
    accepted: AtomicU64,
    refused: AtomicU64,
    active: AtomicUsize,
    requests: AtomicU64,
    exceptions: AtomicU64,
}

/// Serializable connection counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    /// Connections accepted since start.
    pub accepted: u64,
    /// Connections refused because of the connection limit.
    pub refused: u64,
    /// Currently open connections.
    pub active: usize,
    /// Requests answered.
    pub requests: u64,
    /// Requests answered with an exception.
    pub exceptions: u64,
}

/// Point-in-time server report.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    /// Instance name from configuration.
    pub service_name: String,
    /// Answered unit id.
    pub unit_id: u8,
    /// Seconds since the server was created.
    pub uptime_secs: f64,
    /// Register access counters.
    pub bus: StatsSnapshot,
    /// Connection counters.
    pub connections: ConnectionSnapshot,
    /// Sample of registers holding a non-zero value.
    pub non_zero: Vec<(u16, u16)>,
}

/// State shared between the accept loop and connection threads.
struct Shared {
    bus: Arc<RegisterBus>,
    unit_id: AtomicU8,
    stats: ConnectionStats,
}

/// Modbus TCP server over one register bus.
pub struct BusServer {
    config: ServerConfig,
    shared: Arc<Shared>,
    annotations: Mutex<AnnotationStore>,
    registry: LayoutRegistry,
    cancel: CancelToken,
    started: Instant,
}

impl BusServer {
    /// Build the server: validate configuration, check layouts, create and
    /// seed the bus, load annotations.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let registry = config.layout_registry()?;
        for (name, range) in registry.ranges() {
            info!("Module '{}' at {}", name, range);
        }

        let bus = Arc::new(RegisterBus::new(config.bus.register_count));
        let applied = bus.seed(&config.bus.seed);
        if applied < config.bus.seed.len() {
            warn!(
                "{} of {} seed values rejected",
                config.bus.seed.len() - applied,
                config.bus.seed.len()
            );
        }

        let mut annotations = match &config.bus.annotations {
            Some(path) => AnnotationStore::open(path)?,
            None => AnnotationStore::in_memory(),
        };
        let labelled: usize = registry
            .modules()
            .iter()
            .map(|layout| annotations.label_layout(layout))
            .sum();
        debug!(labelled, total = annotations.len(), "annotations ready");

        info!(
            "BusServer created: {} registers, unit id {}",
            config.bus.register_count, config.bus.unit_id
        );

        Ok(Self {
            shared: Arc::new(Shared {
                bus,
                unit_id: AtomicU8::new(config.bus.unit_id),
                stats: ConnectionStats::default(),
            }),
            config,
            annotations: Mutex::new(annotations),
            registry,
            cancel: CancelToken::new(),
            started: Instant::now(),
        })
    }

    /// Load server configuration from a TOML file.
    pub fn load_config(path: &Path) -> Result<ServerConfig, ServerError> {
        info!("Loading configuration from {:?}", path);
        Ok(ServerConfig::load(path)?)
    }

    /// Shared handle to the register bus for in-process modules.
    pub fn bus(&self) -> Arc<RegisterBus> {
        Arc::clone(&self.shared.bus)
    }

    /// Validated module layouts.
    pub fn registry(&self) -> &LayoutRegistry {
        &self.registry
    }

    /// Token that stops `run` and all connection threads.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Answered unit id.
    pub fn unit_id(&self) -> u8 {
        self.shared.unit_id.load(Ordering::SeqCst)
    }

    /// Change the answered unit id at runtime.
    pub fn set_unit_id(&self, unit_id: u8) -> Result<(), ServerError> {
        validate_unit_id(unit_id)?;
        let previous = self.shared.unit_id.swap(unit_id, Ordering::SeqCst);
        info!("Unit id changed {} -> {}", previous, unit_id);
        Ok(())
    }

    /// Set or clear the label of a register and persist the store.
    pub fn annotate(&self, address: u16, label: &str) -> Result<bool, ServerError> {
        if usize::from(address) >= self.shared.bus.len() {
            return Err(BusError::OutOfRange {
                address: usize::from(address),
                count: 1,
                size: self.shared.bus.len(),
            }
            .into());
        }
        let mut annotations = self.annotations.lock();
        let changed = annotations.set(address, label);
        if changed {
            annotations.save()?;
        }
        Ok(changed)
    }

    /// Live register values joined with their labels.
    pub fn register_range(
        &self,
        start: u16,
        count: usize,
    ) -> Result<Vec<regbus_bus::RegisterEntry>, ServerError> {
        let annotations = self.annotations.lock();
        Ok(self.shared.bus.snapshot_range(start, count, &annotations)?)
    }

    /// Status report for supervisory tooling.
    pub fn status(&self) -> ServerStatus {
        let stats = &self.shared.stats;
        ServerStatus {
            service_name: self.config.shared.service_name.clone(),
            unit_id: self.unit_id(),
            uptime_secs: self.started.elapsed().as_secs_f64(),
            bus: self.shared.bus.stats(),
            connections: ConnectionSnapshot {
                accepted: stats.accepted.load(Ordering::Relaxed),
                refused: stats.refused.load(Ordering::Relaxed),
                active: stats.active.load(Ordering::Relaxed),
                requests: stats.requests.load(Ordering::Relaxed),
                exceptions: stats.exceptions.load(Ordering::Relaxed),
            },
            non_zero: self.shared.bus.non_zero(STATUS_SAMPLE),
        }
    }

    /// Bind the configured listener address.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let address = self.config.bus.bind_address();
        let listener = TcpListener::bind(&address)?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections until cancelled.
    ///
    /// Blocks the calling thread; connection threads are joined before
    /// returning.
    pub fn run(&self, listener: TcpListener) -> Result<(), ServerError> {
        listener.set_nonblocking(true)?;
        let max_connections = self.config.bus.max_connections;
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        info!("Accept loop started (max {} connections)", max_connections);
        while !self.cancel.is_cancelled() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    workers.retain(|worker| !worker.is_finished());
                    let stats = &self.shared.stats;
                    if stats.active.load(Ordering::SeqCst) >= max_connections {
                        stats.refused.fetch_add(1, Ordering::Relaxed);
                        warn!("Refusing {}: connection limit {} reached", peer, max_connections);
                        continue;
                    }
                    stats.accepted.fetch_add(1, Ordering::Relaxed);
                    stats.active.fetch_add(1, Ordering::SeqCst);
                    let shared = Arc::clone(&self.shared);
                    let cancel = self.cancel.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("regbus-conn-{peer}"))
                        .spawn(move || {
                            serve_connection(stream, peer, &shared, &cancel);
                            shared.stats.active.fetch_sub(1, Ordering::SeqCst);
                        });
                    match spawned {
                        Ok(worker) => workers.push(worker),
                        Err(e) => {
                            self.shared.stats.active.fetch_sub(1, Ordering::SeqCst);
                            error!("Failed to spawn connection thread: {}", e);
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.cancel.sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    self.cancel.sleep(ACCEPT_POLL);
                }
            }
        }

        info!("Accept loop stopped, joining {} connections", workers.len());
        for worker in workers {
            let _ = worker.join();
        }
        Ok(())
    }

    /// Bind and run on a background thread.
    pub fn spawn(self) -> Result<ServerHandle, ServerError> {
        let listener = self.bind()?;
        let local_addr = listener.local_addr()?;
        let server = Arc::new(self);
        let runner = Arc::clone(&server);
        let thread = thread::Builder::new()
            .name("regbus-accept".into())
            .spawn(move || {
                if let Err(e) = runner.run(listener) {
                    error!("Server loop error: {}", e);
                }
            })?;
        Ok(ServerHandle {
            server,
            local_addr,
            thread: Some(thread),
        })
    }

    /// Stop accepting, persist annotations and log final statistics.
    pub fn shutdown(&self) -> Result<(), ServerError> {
        info!("Shutdown requested");
        self.cancel.cancel();
        self.annotations.lock().save()?;
        let status = self.status();
        info!(
            "Final stats: {} reads, {} writes, {} rejected, {} connections",
            status.bus.total_reads,
            status.bus.total_writes,
            status.bus.rejected_writes,
            status.connections.accepted
        );
        Ok(())
    }
}

/// Handle to a server running on a background thread.
pub struct ServerHandle {
    server: Arc<BusServer>,
    local_addr: SocketAddr,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Bound listener address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The running server.
    pub fn server(&self) -> &BusServer {
        &self.server
    }

    /// Stop the server and wait for its threads.
    pub fn stop(mut self) -> Result<(), ServerError> {
        self.server.shutdown()?;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.server.cancel.cancel();
            let _ = thread.join();
        }
    }
}

/// Serve one client until it disconnects, misbehaves or the server stops.
fn serve_connection(mut stream: TcpStream, peer: SocketAddr, shared: &Shared, cancel: &CancelToken) {
    info!("Client connected: {}", peer);
    if let Err(e) = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(CONNECTION_POLL)))
        .and_then(|()| stream.set_nodelay(true))
    {
        warn!("Failed to configure socket for {}: {}", peer, e);
        return;
    }

    let mut frames = FrameBuffer::new();
    let mut chunk = [0u8; 512];
    'conn: while !cancel.is_cancelled() {
        let n = match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                debug!("Read from {} failed: {}", peer, e);
                break;
            }
        };
        frames.extend(&chunk[..n]);

        loop {
            let (header, pdu) = match frames.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!("Closing {}: {}", peer, e);
                    break 'conn;
                }
            };
            let unit_id = shared.unit_id.load(Ordering::SeqCst);
            let response = dispatch::respond(&shared.bus, unit_id, &header, &pdu);
            shared.stats.requests.fetch_add(1, Ordering::Relaxed);
            if matches!(response, Response::Exception { .. }) {
                shared.stats.exceptions.fetch_add(1, Ordering::Relaxed);
            }
            let reply = encode_frame(header.transaction_id, header.unit_id, &response.encode_pdu());
            if let Err(e) = stream.write_all(&reply) {
                debug!("Write to {} failed: {}", peer, e);
                break 'conn;
            }
        }
    }
    info!("Client disconnected: {}", peer);
}
