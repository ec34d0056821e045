//! Network bridge between the topic bus and one external client.
//!
//! The bridge cycles through three states for the lifetime of the process:
//!
//! ```text
//!   Listening ──accept──▶ Connected ──errors ≥ threshold / EOF──▶ Reconnecting
//!       ▲                                                              │
//!       └──────────────────────── release client ◀─────────────────────┘
//! ```
//!
//! While connected, each [`Bridge::step`] performs one iteration:
//!
//! 1. **Wait** – a single `select!` over the client socket and the bridge
//!    node's subscriptions, bounded by `poll_timeout`.
//! 2. **Inbound** – received bytes go through the resynchronising
//!    [`FrameDecoder`]; each frame is published via the [`DispatchTable`].
//! 3. **Outbound** – every tailed topic with a fresh value is framed and
//!    written.
//! 4. **Heartbeat** – one [`Uptime`][synapse_types::Uptime] frame, every
//!    iteration, whatever else happened.
//!
//! No fault inside the bridge reaches the control tasks: decode, dispatch,
//! encode and transport failures are logged and counted in [`BridgeStats`].

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use synapse_types::{MessageKind, SynapseError};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::clock::UptimeClock;
use crate::codec::{DEFAULT_MAX_PAYLOAD, DEFAULT_RX_CAPACITY, FrameDecoder, FrameEncoder};
use crate::dispatch::{DispatchTable, RouteSpec, default_routes};
use crate::node::Node;
use crate::registry::Topics;
use crate::transport::{Connection, Listener, send_all};

/// Port the bridge listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 4242;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration & state
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for [`Bridge`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// TCP port to listen on (all interfaces).
    pub port: u16,
    /// Sleep after a failed accept before trying again.
    pub accept_backoff: Duration,
    /// Upper bound on one wait; also the idle heartbeat period.
    pub poll_timeout: Duration,
    /// Consecutive transport errors that trigger a reconnect.
    pub error_threshold: u32,
    /// Largest payload encoded or accepted.
    pub max_payload: usize,
    /// Size of the bounded receive buffer.
    pub rx_capacity: usize,
    pub routes: Vec<RouteSpec>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            accept_backoff: Duration::from_secs(1),
            poll_timeout: Duration::from_millis(100),
            error_threshold: 100,
            max_payload: DEFAULT_MAX_PAYLOAD,
            rx_capacity: DEFAULT_RX_CAPACITY,
            routes: default_routes(),
        }
    }
}

/// Where the bridge is in its connection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Listening,
    Connected,
    Reconnecting,
}

/// Counters describing the bridge since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub connections: u64,
    pub reconnects: u64,
    pub accept_failures: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    pub heartbeats: u64,
    pub decode_faults: u64,
    pub dispatch_faults: u64,
    pub encode_faults: u64,
    pub transport_errors: u64,
}

/// One accepted client. Dropped when the bridge goes back to listening.
pub struct Session {
    conn: Box<dyn Connection>,
    peer: String,
    error_count: u32,
    state: SessionState,
}

impl Session {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Consecutive transport errors since the last successful write.
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn record_error(&mut self, threshold: u32) {
        self.error_count = self.error_count.saturating_add(1);
        if self.error_count >= threshold {
            self.state = SessionState::Reconnecting;
        }
    }

    /// Write one frame. Skipped once the session is tearing down.
    async fn transmit(&mut self, frame: &[u8], threshold: u32) -> io::Result<()> {
        if self.state != SessionState::Connected {
            return Ok(());
        }
        match send_all(self.conn.as_mut(), frame).await {
            Ok(()) => {
                self.error_count = 0;
                Ok(())
            }
            Err(e) => {
                self.record_error(threshold);
                Err(e)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge
// ─────────────────────────────────────────────────────────────────────────────

/// Serves one client at a time, translating between frames and topics.
pub struct Bridge {
    config: BridgeConfig,
    node: Node,
    table: DispatchTable,
    encoder: FrameEncoder,
    decoder: FrameDecoder,
    clock: UptimeClock,
    rx_buf: Vec<u8>,
    stats: BridgeStats,
}

impl Bridge {
    /// Wire the configured routes into a new bridge node.
    ///
    /// # Errors
    ///
    /// [`SynapseError::Config`] for invalid limits, plus any route error from
    /// [`DispatchTable::build`].
    pub fn new(topics: &Topics, config: BridgeConfig) -> Result<Self, SynapseError> {
        if config.error_threshold == 0 {
            return Err(SynapseError::Config(
                "error_threshold must be at least 1".to_string(),
            ));
        }
        if config.poll_timeout.is_zero() {
            return Err(SynapseError::Config(
                "poll_timeout must be greater than zero".to_string(),
            ));
        }
        if config.accept_backoff.is_zero() {
            return Err(SynapseError::Config(
                "accept_backoff must be greater than zero".to_string(),
            ));
        }
        if config.max_payload > u16::MAX as usize {
            return Err(SynapseError::Config(format!(
                "max_payload {} exceeds the 16-bit frame length",
                config.max_payload
            )));
        }

        let mut builder = Node::builder("synapse_bridge");
        let table = DispatchTable::build(topics, &config.routes, &mut builder)?;
        let node = builder.build();
        let decoder = FrameDecoder::new(config.rx_capacity, config.max_payload);
        let rx_buf = vec![0u8; decoder.spare_capacity()];

        info!(
            inbound = ?table.inbound_kinds(),
            outbound = ?table.outbound_topics(),
            "bridge routes configured"
        );

        Ok(Self {
            encoder: FrameEncoder::new(config.max_payload),
            decoder,
            clock: UptimeClock::new(),
            rx_buf,
            stats: BridgeStats::default(),
            node,
            table,
            config,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Bind the listening socket on all interfaces at the configured port.
    ///
    /// # Errors
    ///
    /// [`SynapseError::Transport`] if the port cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener, SynapseError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.port));
        TcpListener::bind(addr)
            .await
            .map_err(|e| SynapseError::Transport(format!("bind {addr}: {e}")))
    }

    /// Accept, serve and release clients forever.
    ///
    /// Never returns: accept failures are followed by `accept_backoff` and
    /// another attempt.
    pub async fn run(&mut self, listener: &mut dyn Listener) {
        loop {
            info!(port = self.config.port, "waiting for connection");
            let (conn, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    self.stats.accept_failures += 1;
                    warn!(
                        error = %e,
                        backoff_ms = self.config.accept_backoff.as_millis() as u64,
                        "accept failed"
                    );
                    tokio::time::sleep(self.config.accept_backoff).await;
                    continue;
                }
            };

            let mut session = self.connect(conn, peer);
            while self.step(&mut session).await == SessionState::Connected {}
            self.release(session).await;
        }
    }

    /// Enter `Connected` for a freshly accepted client.
    ///
    /// Clears leftovers from the previous client and marks the current value
    /// of every tailed topic as unsent, so the new peer gets the current
    /// state straight away.
    pub fn connect(&mut self, conn: Box<dyn Connection>, peer: String) -> Session {
        self.stats.connections += 1;
        self.decoder.reset();
        for route in self.table.outbound_mut() {
            route.rewind();
        }
        info!(peer = %peer, connection = self.stats.connections, "client connected");
        Session {
            conn,
            peer,
            error_count: 0,
            state: SessionState::Connected,
        }
    }

    /// Run one connected iteration and return the resulting state.
    pub async fn step(&mut self, session: &mut Session) -> SessionState {
        if session.state != SessionState::Connected {
            return session.state;
        }

        // 1. Wait for the socket or the bus, whichever comes first.
        let spare = self.decoder.spare_capacity().min(self.rx_buf.len());
        let poll_timeout = self.config.poll_timeout;
        let read = tokio::select! {
            r = session.conn.read(&mut self.rx_buf[..spare]), if spare > 0 => Some(r),
            _ = self.node.wait(poll_timeout) => None,
        };

        // 2. Inbound.
        match read {
            Some(Ok(0)) => {
                info!(peer = %session.peer, "peer closed connection");
                session.state = SessionState::Reconnecting;
                return session.state;
            }
            Some(Ok(n)) => {
                if let Err(e) = self.decoder.push(&self.rx_buf[..n]) {
                    warn!(peer = %session.peer, error = %e, "receive buffer overflow, bytes dropped");
                }
                self.drain_inbound(&session.peer);
            }
            Some(Err(e)) if is_transient(&e) => {}
            Some(Err(e)) => {
                self.stats.transport_errors += 1;
                session.record_error(self.config.error_threshold);
                warn!(peer = %session.peer, error = %e, errors = session.error_count, "receive failed");
            }
            None => {}
        }

        // 3. Outbound topic updates.
        let threshold = self.config.error_threshold;
        for route in self.table.outbound_mut() {
            if session.state != SessionState::Connected {
                break;
            }
            let frame = match route.take(&mut self.encoder) {
                None => continue,
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    self.stats.encode_faults += 1;
                    warn!(topic = route.topic(), error = %e, "encode failed, message dropped");
                    continue;
                }
            };
            match session.transmit(&frame, threshold).await {
                Ok(()) => {
                    self.stats.frames_out += 1;
                    debug!(topic = route.topic(), len = frame.len(), "frame sent");
                }
                Err(e) => {
                    self.stats.transport_errors += 1;
                    warn!(peer = %session.peer, error = %e, errors = session.error_count, "send failed");
                }
            }
        }

        // 4. Heartbeat.
        if session.state == SessionState::Connected {
            let beat = self.clock.now();
            match self.encoder.encode(&beat) {
                Ok(frame) => match session.transmit(frame, threshold).await {
                    Ok(()) => self.stats.heartbeats += 1,
                    Err(e) => {
                        self.stats.transport_errors += 1;
                        warn!(peer = %session.peer, error = %e, errors = session.error_count, "heartbeat send failed");
                    }
                },
                Err(e) => {
                    self.stats.encode_faults += 1;
                    warn!(error = %e, "heartbeat encode failed");
                }
            }
        }

        if session.state == SessionState::Reconnecting {
            warn!(
                peer = %session.peer,
                errors = session.error_count,
                threshold,
                "transport error threshold reached, reconnecting"
            );
        }
        session.state
    }

    /// Drop the client and return to listening.
    pub async fn release(&mut self, mut session: Session) -> SessionState {
        session.state = SessionState::Reconnecting;
        if let Err(e) = session.conn.shutdown().await {
            debug!(peer = %session.peer, error = %e, "shutdown failed");
        }
        self.stats.reconnects += 1;
        info!(peer = %session.peer, "client released");
        SessionState::Listening
    }

    fn drain_inbound(&mut self, peer: &str) {
        while let Some(result) = self.decoder.next_frame() {
            match result {
                Ok(frame) => match self.table.dispatch(&frame) {
                    Ok(topic) => {
                        self.stats.frames_in += 1;
                        debug!(topic, tag = frame.tag, "frame published");
                    }
                    Err(e) => {
                        self.stats.dispatch_faults += 1;
                        let kind = MessageKind::from_tag(frame.tag)
                            .map_or("unknown", MessageKind::as_str);
                        warn!(peer, tag = frame.tag, kind, error = %e, "inbound frame dropped");
                    }
                },
                Err(fault) => {
                    self.stats.decode_faults += 1;
                    warn!(peer, %fault, "malformed frame discarded, resynchronising");
                }
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}
