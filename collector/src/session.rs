//! Per-client sessions.
//!
//! A TCP session owns one connection and its read loop: the IPFIX message
//! header carries the total message length, so the loop reads one header,
//! then the remainder, and hands the unit to the decoder. UDP needs no
//! per-client loop (one datagram is one message unit); its sessions are the
//! peers observed within a sliding idle window, tracked by [`PeerTable`].

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use ipfix_wire::MessageHeader;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::decoder::{decode_message, DecoderOptions, Message};
use crate::store::TemplateStore;

/// Transport a client speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Stream transport; messages are length-framed by their headers
    Tcp,
    /// Datagram transport; one datagram carries one message
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => f.write_str("tcp"),
            Transport::Udp => f.write_str("udp"),
        }
    }
}

/// Consecutive decode failures after which a TCP stream is abandoned
const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Shared handles a session needs to do its work
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub store: std::sync::Arc<TemplateStore>,
    pub messages: mpsc::Sender<Message>,
    pub shutdown: CancellationToken,
    pub max_buffer_size: usize,
    pub options: DecoderOptions,
}

/// Send a decoded message downstream, abandoning it if shutdown wins the
/// race. Returns whether the session should keep running.
pub(crate) async fn send_message(ctx: &SessionContext, message: Message) -> bool {
    tokio::select! {
        _ = ctx.shutdown.cancelled() => false,
        sent = ctx.messages.send(message) => sent.is_ok(),
    }
}

/// Read loop of one TCP connection. Runs until disconnect, shutdown, or an
/// unrecoverable stream error.
pub(crate) async fn run_tcp_session(mut stream: TcpStream, peer: SocketAddr, ctx: SessionContext) {
    debug!("session started with {}", peer);
    let mut consecutive_errors = 0u32;

    loop {
        let mut header = [0u8; MessageHeader::SIZE];
        let read = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            read = stream.read_exact(&mut header) => read,
        };
        match read {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("{} disconnected", peer);
                break;
            }
            Err(e) => {
                warn!("read error from {}: {}", peer, e);
                break;
            }
        }

        // The declared length frames the stream; a length that cannot be
        // honored means the stream can no longer be re-synchronized.
        let declared = u16::from_be_bytes([header[2], header[3]]) as usize;
        if declared < MessageHeader::SIZE || declared > ctx.max_buffer_size {
            warn!(
                "unrecoverable framing from {}: declared message length {}",
                peer, declared
            );
            break;
        }

        let mut body = vec![0u8; declared - MessageHeader::SIZE];
        let read = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            read = stream.read_exact(&mut body) => read,
        };
        if let Err(e) = read {
            warn!("read error from {}: {}", peer, e);
            break;
        }

        let mut unit = BytesMut::with_capacity(declared);
        unit.put_slice(&header);
        unit.put_slice(&body);

        match decode_message(unit.freeze(), peer, Transport::Tcp, &ctx.store, &ctx.options).await {
            Ok(message) => {
                consecutive_errors = 0;
                if !send_message(&ctx, message).await {
                    break;
                }
            }
            Err(err) => {
                warn!("failed to decode message from {}: {}", peer, err);
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    warn!(
                        "{} decode failures in a row from {}, closing session",
                        consecutive_errors, peer
                    );
                    break;
                }
            }
        }
    }

    debug!("session with {} ended", peer);
}

/// UDP client bookkeeping: last activity per remote endpoint, evicted after
/// an idle window.
#[derive(Debug)]
pub(crate) struct PeerTable {
    idle_window: Duration,
    peers: Mutex<HashMap<SocketAddr, Instant>>,
}

impl PeerTable {
    pub fn new(idle_window: Duration) -> Self {
        Self {
            idle_window,
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Record activity from a peer.
    pub fn touch(&self, peer: SocketAddr, now: Instant) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.insert(peer, now);
        }
    }

    /// Drop peers idle past the window.
    pub fn evict_idle(&self, now: Instant) {
        if let Ok(mut peers) = self.peers.lock() {
            let window = self.idle_window;
            peers.retain(|_, last| now.duration_since(*last) < window);
        }
    }

    /// Number of peers active within the window.
    pub fn count(&self, now: Instant) -> usize {
        self.evict_idle(now);
        self.peers.lock().map(|p| p.len()).unwrap_or(0)
    }
}

/// Idle window after which a silent UDP peer stops counting as a client:
/// ten template lifetimes, or ten minutes when templates do not expire.
pub(crate) fn udp_idle_window(template_ttl: Duration) -> Duration {
    if template_ttl.is_zero() {
        Duration::from_secs(600)
    } else {
        template_ttl * 10
    }
}
