//! Async transport server.
//!
//! Provides [`TransportServer`], which drives a [`Demultiplexer`] from a
//! single tokio task over a [`LinkSocket`].

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::socket::LinkSocket;
use crate::core::{DataSink, HalfClose, Network, TransportError, TransportResult};
use crate::transport::{ConnectionId, Demultiplexer, TransportConfig};

/// Default UDP port of the link socket.
pub const DEFAULT_LINK_PORT: u16 = 7001;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// UDP address the link socket binds to.
    pub bind_addr: SocketAddr,

    /// UDP port peers' link sockets listen on. `None` uses our own port.
    pub link_port: Option<u16>,

    /// Transport settings.
    pub transport: TransportConfig,

    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_LINK_PORT),
            link_port: None,
            transport: TransportConfig::default(),
            event_capacity: 256,
        }
    }
}

/// Builder for creating a [`ServerConfig`].
#[derive(Debug)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Set the bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the UDP port peers listen on.
    pub fn link_port(mut self, port: u16) -> Self {
        self.config.link_port = Some(port);
        self
    }

    /// Set the transport settings.
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.config.transport = transport;
        self
    }

    /// Set the event channel capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    /// Build the server configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Event from the server.
#[derive(Debug)]
pub enum ServerEvent {
    /// A peer opened a connection.
    Accepted {
        /// Connection identity.
        id: ConnectionId,
        /// Handle for talking back.
        handle: ConnectionHandle,
    },

    /// An actively opened connection completed its handshake.
    Connected {
        /// Connection identity.
        id: ConnectionId,
    },

    /// In-order stream data arrived.
    Data {
        /// Connection identity.
        id: ConnectionId,
        /// Payload bytes.
        data: Vec<u8>,
    },

    /// One side of the stream closed.
    Closed {
        /// Connection identity.
        id: ConnectionId,
        /// Which side.
        side: HalfClose,
    },

    /// The connection was torn down without a close handshake.
    Reset {
        /// Connection identity.
        id: ConnectionId,
        /// Why.
        reason: String,
    },
}

enum Command {
    Connect {
        peer: SocketAddr,
        reply: oneshot::Sender<ConnectionId>,
    },
    Send {
        id: ConnectionId,
        data: Vec<u8>,
        reply: oneshot::Sender<TransportResult<()>>,
    },
    Close {
        id: ConnectionId,
        reply: oneshot::Sender<TransportResult<()>>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle for sending on one connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Connect { peer, .. } => write!(f, "Connect({peer})"),
            Command::Send { id, data, .. } => write!(f, "Send({id}, {} bytes)", data.len()),
            Command::Close { id, .. } => write!(f, "Close({id})"),
            Command::Count { .. } => f.write_str("Count"),
        }
    }
}

impl ConnectionHandle {
    /// Queue data on this connection.
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> TransportResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Send {
                id: self.id,
                data: data.into(),
                reply,
            })
            .await
            .map_err(|_| TransportError::Shutdown)?;
        rx.await.map_err(|_| TransportError::Shutdown)?
    }

    /// Close this connection. A second call drops it without waiting.
    pub async fn close(&self) -> TransportResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Close { id: self.id, reply })
            .await
            .map_err(|_| TransportError::Shutdown)?;
        rx.await.map_err(|_| TransportError::Shutdown)?
    }

    /// Get the connection identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Segments produced while handling one event, flushed afterwards.
#[derive(Debug, Default)]
struct Outbox {
    segments: Vec<(Vec<u8>, IpAddr)>,
}

impl Network for Outbox {
    fn send(&mut self, segment: Vec<u8>, dest: IpAddr) {
        self.segments.push((segment, dest));
    }
}

type EventQueue = Arc<Mutex<VecDeque<ServerEvent>>>;

fn push_event(queue: &EventQueue, event: ServerEvent) {
    match queue.lock() {
        Ok(mut events) => events.push_back(event),
        Err(poisoned) => poisoned.into_inner().push_back(event),
    }
}

fn drain_events(queue: &EventQueue) -> Vec<ServerEvent> {
    match queue.lock() {
        Ok(mut events) => events.drain(..).collect(),
        Err(poisoned) => poisoned.into_inner().drain(..).collect(),
    }
}

/// Forwards connection upcalls to the event queue.
struct EventSink {
    queue: EventQueue,
}

impl DataSink for EventSink {
    fn on_data(&mut self, id: ConnectionId, data: &[u8]) {
        push_event(
            &self.queue,
            ServerEvent::Data {
                id,
                data: data.to_vec(),
            },
        );
    }

    fn on_close(&mut self, id: ConnectionId, side: HalfClose) {
        push_event(&self.queue, ServerEvent::Closed { id, side });
    }

    fn on_reset(&mut self, id: ConnectionId, reason: &TransportError) {
        push_event(
            &self.queue,
            ServerEvent::Reset {
                id,
                reason: reason.to_string(),
            },
        );
    }
}

/// A reliable transport endpoint on a UDP link.
///
/// # Example
///
/// ```ignore
/// use reliable_transport::server::{ServerConfigBuilder, ServerEvent, TransportServer};
///
/// let config = ServerConfigBuilder::new()
///     .bind_addr("127.0.0.1:7001".parse()?)
///     .build();
///
/// let (server, mut events) = TransportServer::bind(config).await?;
///
/// while let Some(event) = events.recv().await {
///     match event {
///         ServerEvent::Accepted { id, handle } => {
///             println!("accepted {id}");
///             handle.send("hello\n").await?;
///         }
///         ServerEvent::Data { id, data } => {
///             println!("{id}: {} bytes", data.len());
///         }
///         _ => {}
///     }
/// }
/// ```
pub struct TransportServer {
    /// Server configuration.
    config: ServerConfig,

    /// Bound link address.
    local_addr: SocketAddr,

    /// Commands to the event loop.
    cmd_tx: mpsc::Sender<Command>,

    /// Shutdown signal.
    shutdown_tx: Option<oneshot::Sender<()>>,

    /// The event loop.
    task: Option<JoinHandle<()>>,
}

impl TransportServer {
    /// Bind the link socket and start the event loop.
    pub async fn bind(
        config: ServerConfig,
    ) -> TransportResult<(Self, mpsc::Receiver<ServerEvent>)> {
        let socket = tokio::net::UdpSocket::bind(config.bind_addr).await?;
        let local_addr = socket.local_addr()?;
        let link_port = config.link_port.unwrap_or(local_addr.port());
        let link = LinkSocket::from_socket(socket, link_port)?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(256);
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(config.event_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let queue: EventQueue = Arc::new(Mutex::new(VecDeque::new()));
        let mut demux = Demultiplexer::new(config.transport.clone(), Outbox::default());
        let accept_queue = queue.clone();
        let accept_tx = cmd_tx.clone();
        demux.on_accept(move |conn| {
            conn.register_data_handler(EventSink {
                queue: accept_queue.clone(),
            });
            push_event(
                &accept_queue,
                ServerEvent::Accepted {
                    id: conn.id(),
                    handle: ConnectionHandle {
                        id: conn.id(),
                        tx: accept_tx.clone(),
                    },
                },
            );
        });

        log::info!(
            "listening on port {} over link {local_addr}",
            config.transport.listen_port
        );

        let event_loop = EventLoop {
            demux,
            link,
            queue,
            event_tx,
            backlog: VecDeque::new(),
            pending_connects: Vec::new(),
        };
        let task = tokio::spawn(event_loop.run(cmd_rx, shutdown_rx));

        let server = Self {
            config,
            local_addr,
            cmd_tx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        };

        Ok((server, event_rx))
    }

    /// Get the local link address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Open a connection to the transport endpoint `peer`.
    ///
    /// Returns once the SYN is sent; [`ServerEvent::Connected`] follows when
    /// the handshake completes.
    pub async fn connect(&self, peer: SocketAddr) -> TransportResult<ConnectionHandle> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connect { peer, reply })
            .await
            .map_err(|_| TransportError::Shutdown)?;
        let id = rx.await.map_err(|_| TransportError::Shutdown)?;
        Ok(self.handle(id))
    }

    /// Get a handle for connection `id`.
    pub fn handle(&self, id: ConnectionId) -> ConnectionHandle {
        ConnectionHandle {
            id,
            tx: self.cmd_tx.clone(),
        }
    }

    /// Get the number of live connections.
    pub async fn connection_count(&self) -> TransportResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Count { reply })
            .await
            .map_err(|_| TransportError::Shutdown)?;
        rx.await.map_err(|_| TransportError::Shutdown)
    }

    /// Stop the event loop and wait for it to exit.
    pub async fn shutdown(mut self) -> TransportResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
        }
        Ok(())
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Drop for TransportServer {
    fn drop(&mut self) {
        // Send shutdown signal if not already sent
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// State owned by the spawned task.
struct EventLoop {
    demux: Demultiplexer<Outbox>,
    link: LinkSocket,
    queue: EventQueue,
    event_tx: mpsc::Sender<ServerEvent>,
    /// Events waiting for room in the event channel.
    backlog: VecDeque<ServerEvent>,
    /// Active opens still waiting for SYN|ACK.
    pending_connects: Vec<ConnectionId>,
}

impl EventLoop {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            let deadline = self.demux.next_deadline();
            let wake_at = deadline
                .map(tokio::time::Instant::from_std)
                .unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(3600));

            let mut command = None;
            tokio::select! {
                _ = &mut shutdown_rx => break,
                received = self.link.recv_segment() => match received {
                    Ok((segment, src, dst)) => {
                        self.demux.on_segment(segment, src, dst, Instant::now());
                    }
                    Err(e) => log::debug!("link receive failed: {e}"),
                },
                Some(cmd) = cmd_rx.recv() => command = Some(cmd),
                _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                    self.demux.poll_timers(Instant::now());
                }
                permit = self.event_tx.reserve(), if !self.backlog.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(event) = self.backlog.pop_front() {
                            permit.send(event);
                        }
                    }
                    Err(_) => {
                        log::debug!("event receiver dropped, stopping");
                        break;
                    }
                },
            }

            if let Some(cmd) = command {
                self.handle_command(cmd);
            }
            self.check_connected();
            self.flush_segments().await;
            if !self.flush_events() {
                log::debug!("event receiver dropped, stopping");
                break;
            }
        }
        log::info!("event loop stopped with {} connections", self.demux.len());
    }

    fn handle_command(&mut self, cmd: Command) {
        log::trace!("command {cmd:?}");
        let now = Instant::now();
        match cmd {
            Command::Connect { peer, reply } => {
                let local_ip = self.link.local_ip();
                let id = self.demux.connect(local_ip, peer, now);
                if let Some(conn) = self.demux.connection_mut(&id) {
                    conn.register_data_handler(EventSink {
                        queue: self.queue.clone(),
                    });
                }
                self.pending_connects.push(id);
                let _ = reply.send(id);
            }
            Command::Send { id, data, reply } => {
                let _ = reply.send(self.demux.send(id, &data, now));
            }
            Command::Close { id, reply } => {
                let _ = reply.send(self.demux.close(id, now));
            }
            Command::Count { reply } => {
                let _ = reply.send(self.demux.len());
            }
        }
    }

    /// Report active opens whose handshake completed.
    fn check_connected(&mut self) {
        let demux = &self.demux;
        let queue = &self.queue;
        self.pending_connects.retain(|id| match demux.connection(id) {
            Some(conn) if conn.is_established() => {
                push_event(queue, ServerEvent::Connected { id: *id });
                false
            }
            Some(_) => true,
            None => false,
        });
    }

    async fn flush_segments(&mut self) {
        let segments = std::mem::take(&mut self.demux.network_mut().segments);
        for (segment, dest) in segments {
            if let Err(e) = self.link.send_segment(&segment, dest).await {
                log::debug!("link send to {dest} failed: {e}");
            }
        }
    }

    /// Hand queued events to the channel without waiting for room; the rest
    /// stays in the backlog so commands keep flowing while the consumer is
    /// busy. Returns `false` once nobody listens for events.
    fn flush_events(&mut self) -> bool {
        self.backlog.extend(drain_events(&self.queue));
        while let Some(event) = self.backlog.pop_front() {
            match self.event_tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    self.backlog.push_front(event);
                    log::trace!("event channel full, {} events waiting", self.backlog.len());
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
        }
        true
    }
}
