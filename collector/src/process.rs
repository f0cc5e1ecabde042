//! The collecting process.
//!
//! Owns the listening socket, the template store, and the sessions, and
//! fans every decoded message into one bounded channel. `start` runs until
//! `stop` is called; shutdown closes the listener first, then drains the
//! sessions, and the channel closes once the last sender is gone.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::decoder::{decode_message, DecoderOptions, Message};
use crate::error::Error;
use crate::session::{
    run_tcp_session, send_message, udp_idle_window, PeerTable, SessionContext, Transport,
};
use crate::store::TemplateStore;
use ipfix_wire::InformationElement;

/// Capacity of the decoded-message channel; a full channel backpressures
/// session reads
const MESSAGE_CHANNEL_CAPACITY: usize = 1024;

/// A listening endpoint: transport plus socket address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindAddress {
    /// Transport derived from the address scheme
    pub transport: Transport,
    /// Address to bind
    pub addr: SocketAddr,
}

impl FromStr for BindAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (transport, rest) = if let Some(rest) = s.strip_prefix("tcp://") {
            (Transport::Tcp, rest)
        } else if let Some(rest) = s.strip_prefix("udp://") {
            (Transport::Udp, rest)
        } else {
            return Err(Error::InvalidBindAddress(s.to_string()));
        };

        let addr = rest
            .parse()
            .map_err(|_| Error::InvalidBindAddress(s.to_string()))?;
        Ok(Self { transport, addr })
    }
}

impl std::fmt::Display for BindAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.transport, self.addr)
    }
}

/// Collecting process configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Endpoint to listen on
    pub bind: BindAddress,
    /// Largest acceptable message, and the UDP receive buffer size, in bytes
    pub max_buffer_size: usize,
    /// Template lifetime for UDP sources; zero disables expiry
    pub template_ttl: Duration,
    /// Fail messages whose templates declare unregistered elements instead
    /// of decoding them as opaque octets
    pub strict_elements: bool,
}

impl CollectorConfig {
    /// Configuration with defaults for everything but the endpoint
    pub fn new(bind: BindAddress) -> Self {
        Self {
            bind,
            max_buffer_size: 65535,
            template_ttl: Duration::ZERO,
            strict_elements: false,
        }
    }
}

/// The collecting process. See the module docs for the lifecycle.
#[derive(Debug)]
pub struct CollectingProcess {
    config: CollectorConfig,
    store: Arc<TemplateStore>,
    shutdown: CancellationToken,
    stopped: watch::Sender<bool>,
    tcp_clients: Arc<AtomicUsize>,
    peers: Arc<PeerTable>,
    local_addr: Mutex<Option<SocketAddr>>,
    sender: Mutex<Option<mpsc::Sender<Message>>>,
    receiver: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl CollectingProcess {
    /// Validate the configuration and set up the process. Binding happens
    /// in [`start`](Self::start).
    pub fn new(config: CollectorConfig) -> Result<Self, Error> {
        if config.max_buffer_size == 0 {
            return Err(Error::InvalidConfig("max_buffer_size must be positive"));
        }

        let (sender, receiver) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let (stopped, _) = watch::channel(false);

        Ok(Self {
            store: Arc::new(TemplateStore::new(config.template_ttl)),
            shutdown: CancellationToken::new(),
            stopped,
            tcp_clients: Arc::new(AtomicUsize::new(0)),
            peers: Arc::new(PeerTable::new(udp_idle_window(config.template_ttl))),
            local_addr: Mutex::new(None),
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            config,
        })
    }

    /// Take the receiving end of the message channel.
    ///
    /// The channel is single-consumer: the first call returns the receiver,
    /// later calls return `None`. The receiver observes the channel closing
    /// as the end-of-stream signal after [`stop`](Self::stop).
    pub fn message_channel(&self) -> Option<mpsc::Receiver<Message>> {
        self.receiver.lock().ok()?.take()
    }

    /// The bound socket address, available once [`start`](Self::start) has
    /// bound its listener. Useful when binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|guard| *guard)
    }

    /// Live client count: open connections for TCP, distinct peers within
    /// the idle window for UDP.
    pub fn client_count(&self) -> usize {
        match self.config.bind.transport {
            Transport::Tcp => self.tcp_clients.load(Ordering::SeqCst),
            Transport::Udp => self.peers.count(Instant::now()),
        }
    }

    /// Install a template, mirroring what a received template set would do.
    pub async fn add_template(
        &self,
        obs_domain_id: u32,
        template_id: u16,
        elements: Vec<InformationElement>,
    ) {
        self.store
            .add(
                obs_domain_id,
                template_id,
                elements,
                self.config.bind.transport == Transport::Udp,
                Instant::now(),
            )
            .await;
    }

    /// Look up a stored template; expired entries read as absent.
    pub async fn get_template(
        &self,
        obs_domain_id: u32,
        template_id: u16,
    ) -> Option<Vec<InformationElement>> {
        self.store
            .get(obs_domain_id, template_id, Instant::now())
            .await
    }

    /// Bind and serve until [`stop`](Self::stop).
    ///
    /// The socket is bound and observable before the accept/receive loop
    /// begins, so a caller may probe readiness by dialing the address or
    /// polling [`local_addr`](Self::local_addr).
    pub async fn start(&self) -> Result<(), Error> {
        let sender = self
            .sender
            .lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .ok_or(Error::AlreadyStarted)?;

        let ctx = SessionContext {
            store: self.store.clone(),
            messages: sender,
            shutdown: self.shutdown.clone(),
            max_buffer_size: self.config.max_buffer_size,
            options: DecoderOptions {
                strict_elements: self.config.strict_elements,
            },
        };

        let result = match self.config.bind.transport {
            Transport::Tcp => self.run_tcp(ctx).await,
            Transport::Udp => self.run_udp(ctx).await,
        };

        let _ = self.stopped.send(true);
        result
    }

    /// Trigger shutdown and wait until [`start`](Self::start) has returned:
    /// listener closed, sessions drained, message channel closed.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let started = self
            .sender
            .lock()
            .map(|guard| guard.is_none())
            .unwrap_or(true);
        if !started {
            return;
        }

        let mut stopped = self.stopped.subscribe();
        let _ = stopped.wait_for(|flag| *flag).await;
    }

    fn record_local_addr(&self, addr: Option<SocketAddr>) {
        if let Ok(mut guard) = self.local_addr.lock() {
            *guard = addr;
        }
    }

    async fn run_tcp(&self, ctx: SessionContext) -> Result<(), Error> {
        let listener = TcpListener::bind(self.config.bind.addr)
            .await
            .map_err(|source| Error::Bind {
                addr: self.config.bind.addr,
                source,
            })?;
        self.record_local_addr(listener.local_addr().ok());
        info!("listening on tcp://{}", self.config.bind.addr);

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let ctx = ctx.clone();
                        let clients = self.tcp_clients.clone();
                        clients.fetch_add(1, Ordering::SeqCst);
                        sessions.spawn(async move {
                            run_tcp_session(stream, peer, ctx).await;
                            clients.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => warn!("accept failed: {}", e),
                },

                // Reap finished sessions so the set stays bounded.
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        // Stop accepting before draining the sessions.
        drop(listener);
        while sessions.join_next().await.is_some() {}
        debug!("tcp collector on {} stopped", self.config.bind.addr);
        Ok(())
    }

    async fn run_udp(&self, ctx: SessionContext) -> Result<(), Error> {
        let socket = UdpSocket::bind(self.config.bind.addr)
            .await
            .map_err(|source| Error::Bind {
                addr: self.config.bind.addr,
                source,
            })?;
        self.record_local_addr(socket.local_addr().ok());
        info!("listening on udp://{}", self.config.bind.addr);

        let mut buf = vec![0u8; self.config.max_buffer_size];
        let mut sweep = tokio::time::interval(sweep_interval(self.config.template_ttl));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                _ = sweep.tick() => {
                    let now = Instant::now();
                    self.store.sweep(now).await;
                    self.peers.evict_idle(now);
                }

                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        self.peers.touch(peer, Instant::now());
                        let datagram = Bytes::copy_from_slice(&buf[..len]);
                        match decode_message(datagram, peer, Transport::Udp, &ctx.store, &ctx.options).await {
                            Ok(message) => {
                                if !send_message(&ctx, message).await {
                                    break;
                                }
                            }
                            // A bad datagram costs only itself.
                            Err(err) => warn!("discarding datagram from {}: {}", peer, err),
                        }
                    }
                    Err(e) => warn!("receive failed: {}", e),
                },
            }
        }

        debug!("udp collector on {} stopped", self.config.bind.addr);
        Ok(())
    }
}

/// Expired templates the read path never revisits are collected on this
/// cadence; UDP peer eviction shares the tick.
fn sweep_interval(template_ttl: Duration) -> Duration {
    if template_ttl.is_zero() {
        Duration::from_secs(60)
    } else {
        template_ttl * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Set;
    use ipfix_wire::FieldValue;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    const TEMPLATE_PACKET: [u8; 40] = [
        0, 10, 0, 40, 95, 154, 107, 127, 0, 0, 0, 0, 0, 0, 0, 1, 0, 2, 0, 24, 1, 0, 0, 3, 0, 8, 0,
        4, 0, 12, 0, 4, 128, 101, 255, 255, 0, 0, 220, 186,
    ];

    const DATA_PACKET: [u8; 33] = [
        0, 10, 0, 33, 95, 154, 108, 18, 0, 0, 0, 0, 0, 0, 0, 1, 1, 0, 0, 17, 1, 2, 3, 4, 5, 6, 7,
        8, 4, 112, 111, 100, 49,
    ];

    fn template_elements() -> Vec<InformationElement> {
        let registry = ipfix_registry::global();
        vec![
            registry.lookup(8, 0).unwrap().clone(),
            registry.lookup(12, 0).unwrap().clone(),
            registry.lookup(105, 55829).unwrap().clone(),
        ]
    }

    async fn start_collector(
        transport: Transport,
        template_ttl: Duration,
    ) -> (
        Arc<CollectingProcess>,
        mpsc::Receiver<Message>,
        SocketAddr,
        tokio::task::JoinHandle<Result<(), Error>>,
    ) {
        let bind = match transport {
            Transport::Tcp => "tcp://127.0.0.1:0",
            Transport::Udp => "udp://127.0.0.1:0",
        };
        let mut config = CollectorConfig::new(bind.parse().unwrap());
        config.max_buffer_size = 1024;
        config.template_ttl = template_ttl;

        let process = Arc::new(CollectingProcess::new(config).unwrap());
        let receiver = process.message_channel().unwrap();

        let runner = process.clone();
        let handle = tokio::spawn(async move { runner.start().await });

        let addr = wait_ready(&process).await;
        (process, receiver, addr, handle)
    }

    async fn wait_ready(process: &CollectingProcess) -> SocketAddr {
        for _ in 0..200 {
            if let Some(addr) = process.local_addr() {
                return addr;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("collector did not become ready");
    }

    async fn send_udp(addr: SocketAddr, payload: &[u8]) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(payload, addr).await.unwrap();
    }

    #[test]
    fn test_bind_address_parsing() {
        let bind: BindAddress = "tcp://0.0.0.0:4739".parse().unwrap();
        assert_eq!(bind.transport, Transport::Tcp);
        assert_eq!(bind.addr.port(), 4739);
        assert_eq!(bind.to_string(), "tcp://0.0.0.0:4739");

        let bind: BindAddress = "udp://127.0.0.1:9995".parse().unwrap();
        assert_eq!(bind.transport, Transport::Udp);

        assert!("sctp://0.0.0.0:4739".parse::<BindAddress>().is_err());
        assert!("tcp://not-an-address".parse::<BindAddress>().is_err());
    }

    #[test]
    fn test_zero_buffer_size_rejected() {
        let mut config = CollectorConfig::new("tcp://127.0.0.1:0".parse().unwrap());
        config.max_buffer_size = 0;
        assert!(matches!(
            CollectingProcess::new(config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_tcp_receives_template() {
        let (process, mut rx, addr, handle) =
            start_collector(Transport::Tcp, Duration::ZERO).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&TEMPLATE_PACKET).await.unwrap();

        let message = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.header.version, 10);
        assert_eq!(message.header.observation_domain_id, 1);

        process.stop().await;
        handle.await.unwrap().unwrap();

        let elements = process.get_template(1, 256).await.unwrap();
        assert_eq!(elements.len(), 3);
        assert_eq!(
            elements.iter().map(|e| e.element_id).collect::<Vec<_>>(),
            vec![8, 12, 105]
        );
        assert_eq!(elements[2].enterprise_id, 55829);
        assert_eq!(elements[2].length, 65535);
    }

    #[tokio::test]
    async fn test_udp_receives_template() {
        let (process, mut rx, addr, handle) =
            start_collector(Transport::Udp, Duration::ZERO).await;

        send_udp(addr, &TEMPLATE_PACKET).await;

        let message = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.header.version, 10);

        process.stop().await;
        handle.await.unwrap().unwrap();

        assert!(process.get_template(1, 256).await.is_some());
    }

    #[tokio::test]
    async fn test_tcp_delivers_data_record() {
        let (process, mut rx, addr, handle) =
            start_collector(Transport::Tcp, Duration::ZERO).await;
        process.add_template(1, 256, template_elements()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&DATA_PACKET).await.unwrap();

        let message = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let record = match &message.sets[0] {
            Set::Data { records, .. } => &records[0],
            other => panic!("expected data set, got {:?}", other),
        };
        assert_eq!(
            record.get("sourceIPv4Address").unwrap().value,
            FieldValue::Ipv4Address(Ipv4Addr::new(1, 2, 3, 4))
        );
        assert_eq!(
            record.get("destinationIPv4Address").unwrap().value,
            FieldValue::Ipv4Address(Ipv4Addr::new(5, 6, 7, 8))
        );
        assert_eq!(
            record.get("destinationNodeName").unwrap().value,
            FieldValue::String("pod1".to_string())
        );

        process.stop().await;
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_udp_data_without_template_yields_no_message() {
        let (process, mut rx, addr, handle) =
            start_collector(Transport::Udp, Duration::ZERO).await;

        send_udp(addr, &DATA_PACKET).await;

        // The datagram is discarded; nothing reaches the channel.
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());

        process.stop().await;
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_tcp_clients() {
        let (process, _rx, addr, handle) = start_collector(Transport::Tcp, Duration::ZERO).await;

        let mut streams = Vec::new();
        for _ in 0..4 {
            streams.push(TcpStream::connect(addr).await.unwrap());
        }

        let mut count = 0;
        for _ in 0..100 {
            count = process.client_count();
            if count == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count, 4);

        drop(streams);
        process.stop().await;
        handle.await.unwrap().unwrap();
        assert_eq!(process.client_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_udp_peers() {
        let (process, mut rx, addr, handle) =
            start_collector(Transport::Udp, Duration::ZERO).await;

        send_udp(addr, &TEMPLATE_PACKET).await;
        send_udp(addr, &TEMPLATE_PACKET).await;

        for _ in 0..2 {
            timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(process.client_count(), 2);

        process.stop().await;
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_udp_template_expiry() {
        let (process, mut rx, addr, handle) =
            start_collector(Transport::Udp, Duration::from_secs(1)).await;

        send_udp(addr, &TEMPLATE_PACKET).await;
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(process.get_template(1, 256).await.is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(process.get_template(1, 256).await.is_none());

        process.stop().await;
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_closes_channel() {
        let (process, mut rx, _addr, handle) =
            start_collector(Transport::Tcp, Duration::ZERO).await;

        process.stop().await;
        handle.await.unwrap().unwrap();

        // End of stream: no further values can appear.
        assert!(rx.recv().await.is_none());
        // The channel can only be taken once.
        assert!(process.message_channel().is_none());
    }
}
