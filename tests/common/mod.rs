//! In-memory test doubles: a scripted connector/transport pair, a
//! manually driven resolver, and LB policies with observable behaviour.
//!
//! Compiled once per test binary; not every binary exercises every helper.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use wirecall::client::load_balancing::{
    ChannelController, DoneInfo, LbPolicy, LbPolicyBuildOptions, LbPolicyBuilder,
    NewSubchannelOptions, Pick, PickInfo, PickResult, Picker, QueuingPicker,
};
use wirecall::client::name_resolution::{
    Resolver, ResolverBuilder, ResolverHandle, ResolverOptions, Target,
};
use wirecall::client::transport::{
    CallHeader, ClientTransport, ConnectOptions, Connected, Connector, TransportError,
    TransportStream,
};
use wirecall::client::{ConnectivityState, Subchannel};
use wirecall::codec::Message;
use wirecall::credentials::Peer;
use wirecall::metadata::Metadata;
use wirecall::stats::{RpcStats, StatsHandler};
use wirecall::{Code, Context, Status};

/// A message whose wire format is its raw bytes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TestMessage(pub Vec<u8>);

impl TestMessage {
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        TestMessage(bytes.as_ref().to_vec())
    }
}

impl Message for TestMessage {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), Status> {
        buf.extend_from_slice(&self.0);
        Ok(())
    }

    fn decode(&mut self, buf: &Bytes) -> Result<(), Status> {
        self.0 = buf.to_vec();
        Ok(())
    }

    fn encoded_size_hint(&self) -> Option<usize> {
        Some(self.0.len())
    }
}

/// Frames a payload the way the wire expects: compression flag byte plus
/// big-endian length.
pub fn frame(payload: &[u8]) -> Bytes {
    frame_flagged(payload, false)
}

pub fn frame_flagged(payload: &[u8], compressed: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u8(u8::from(compressed));
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// What one opened stream on a fake server does.
#[derive(Clone)]
pub enum StreamBehavior {
    /// After `delay`, answer the first complete request with `response`
    /// and finish with an OK status.
    Reply { response: Vec<u8>, delay: Duration },
    /// End the stream immediately with `status`; `unprocessed` reports
    /// whether the request never reached the server.
    FailRecv { status: Status, unprocessed: bool },
}

impl StreamBehavior {
    pub fn reply(response: impl AsRef<[u8]>) -> Self {
        StreamBehavior::Reply {
            response: response.as_ref().to_vec(),
            delay: Duration::ZERO,
        }
    }

    pub fn reply_after(response: impl AsRef<[u8]>, delay: Duration) -> Self {
        StreamBehavior::Reply {
            response: response.as_ref().to_vec(),
            delay,
        }
    }

    pub fn fail_unprocessed(status: Status) -> Self {
        StreamBehavior::FailRecv {
            status,
            unprocessed: true,
        }
    }
}

/// One backend address: scripted per-stream behaviours and counters.
pub struct FakeServer {
    pub connect_delay: Duration,
    behaviors: Mutex<VecDeque<StreamBehavior>>,
    default_behavior: StreamBehavior,
    /// Content-coding applied to responses (and announced to the client).
    pub response_encoding: Option<String>,
    pub streams_opened: AtomicUsize,
    pub writes: AtomicUsize,
    /// Every (header, payload, last) write that reached the transport.
    pub recorded_writes: Mutex<Vec<(Bytes, Bytes, bool)>>,
}

impl FakeServer {
    fn build(
        connect_delay: Duration,
        default_behavior: StreamBehavior,
        response_encoding: Option<String>,
    ) -> Arc<FakeServer> {
        Arc::new(FakeServer {
            connect_delay,
            behaviors: Mutex::default(),
            default_behavior,
            response_encoding,
            streams_opened: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            recorded_writes: Mutex::default(),
        })
    }

    pub fn replying(response: impl AsRef<[u8]>) -> Arc<FakeServer> {
        FakeServer::build(Duration::ZERO, StreamBehavior::reply(response), None)
    }

    /// Replies with the gzip-compressed form of `response`, announcing the
    /// coding in the stream headers.
    pub fn replying_gzip(response: impl AsRef<[u8]>) -> Arc<FakeServer> {
        FakeServer::build(
            Duration::ZERO,
            StreamBehavior::reply(response),
            Some("gzip".to_string()),
        )
    }

    pub fn with_default(default_behavior: StreamBehavior) -> Arc<FakeServer> {
        FakeServer::build(Duration::ZERO, default_behavior, None)
    }

    pub fn delayed(
        connect_delay: Duration,
        default_behavior: StreamBehavior,
    ) -> Arc<FakeServer> {
        FakeServer::build(connect_delay, default_behavior, None)
    }

    /// Queues a behaviour for the next opened stream; once scripted
    /// behaviours run out, the default repeats.
    pub fn script(&self, behavior: StreamBehavior) {
        self.behaviors.lock().unwrap().push_back(behavior);
    }

    fn next_behavior(&self) -> StreamBehavior {
        self.behaviors
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_behavior.clone())
    }
}

/// Dials fake servers by address.
#[derive(Default)]
pub struct FakeConnector {
    servers: Mutex<HashMap<String, Arc<FakeServer>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<FakeConnector> {
        Arc::new(FakeConnector::default())
    }

    pub fn add(&self, address: impl Into<String>, server: Arc<FakeServer>) {
        self.servers.lock().unwrap().insert(address.into(), server);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        address: &str,
        _options: &ConnectOptions,
    ) -> Result<Connected, TransportError> {
        let server = self.servers.lock().unwrap().get(address).cloned();
        let Some(server) = server else {
            return Err(TransportError::new(
                Status::unavailable(format!("connection refused: {address}")),
                true,
            ));
        };
        if server.connect_delay > Duration::ZERO {
            tokio::time::sleep(server.connect_delay).await;
        }
        let (_disconnect_tx, disconnect_rx) = oneshot::channel();
        // The sender lives as long as the transport so the subchannel sees
        // the connection as healthy.
        let transport = Arc::new(FakeTransport {
            server,
            address: address.to_string(),
            closed: AtomicBool::new(false),
            _disconnect_tx,
        });
        Ok(Connected {
            transport,
            disconnected: disconnect_rx,
        })
    }
}

pub struct FakeTransport {
    server: Arc<FakeServer>,
    address: String,
    closed: AtomicBool,
    _disconnect_tx: oneshot::Sender<Result<(), TransportError>>,
}

#[async_trait]
impl ClientTransport for FakeTransport {
    async fn new_stream(
        &self,
        _ctx: &Context,
        _call: &CallHeader,
    ) -> Result<Box<dyn TransportStream>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::new(
                Status::unavailable("transport is closing"),
                true,
            ));
        }
        self.server.streams_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream::new(
            self.server.clone(),
            self.address.clone(),
            self.server.next_behavior(),
        )))
    }

    fn graceful_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct ReadHalf {
    rx: mpsc::UnboundedReceiver<Bytes>,
    current: Bytes,
}

pub struct FakeStream {
    server: Arc<FakeServer>,
    address: String,
    behavior: StreamBehavior,
    reader: tokio::sync::Mutex<ReadHalf>,
    response_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    status: Mutex<Status>,
    unprocessed: bool,
    bytes_received: AtomicBool,
}

impl FakeStream {
    fn new(server: Arc<FakeServer>, address: String, behavior: StreamBehavior) -> FakeStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status, unprocessed, response_tx) = match &behavior {
            StreamBehavior::Reply { .. } => (Status::ok(), false, Some(tx)),
            StreamBehavior::FailRecv {
                status,
                unprocessed,
            } => {
                // Dropping the sender right away ends the read side.
                (status.clone(), *unprocessed, None)
            }
        };
        FakeStream {
            server,
            address,
            behavior,
            reader: tokio::sync::Mutex::new(ReadHalf {
                rx,
                current: Bytes::new(),
            }),
            response_tx: Mutex::new(response_tx),
            status: Mutex::new(status),
            unprocessed,
            bytes_received: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TransportStream for FakeStream {
    async fn write(&self, hdr: Bytes, payload: Bytes, last: bool) -> Result<(), TransportError> {
        self.server.writes.fetch_add(1, Ordering::SeqCst);
        self.server
            .recorded_writes
            .lock()
            .unwrap()
            .push((hdr, payload, last));
        if !last {
            return Ok(());
        }
        // The request is complete: run the scripted reply, if any.
        if let StreamBehavior::Reply { response, delay } = &self.behavior {
            if let Some(tx) = self.response_tx.lock().unwrap().take() {
                let response = match &self.server.response_encoding {
                    Some(_) => {
                        use wirecall::compression::Compressor as _;
                        let packed = wirecall::compression::Gzip
                            .compress(response)
                            .expect("gzip for test reply");
                        frame_flagged(&packed, true)
                    }
                    None => frame(response),
                };
                let delay = *delay;
                tokio::spawn(async move {
                    if delay > Duration::ZERO {
                        tokio::time::sleep(delay).await;
                    }
                    let _ = tx.send(response);
                    // Sender drops here, ending the stream cleanly.
                });
            }
        }
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut reader = self.reader.lock().await;
        while reader.current.is_empty() {
            match reader.rx.recv().await {
                Some(chunk) => reader.current = chunk,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(reader.current.len());
        buf[..n].copy_from_slice(&reader.current[..n]);
        reader.current = reader.current.slice(n..);
        self.bytes_received.store(true, Ordering::SeqCst);
        Ok(n)
    }

    fn close(&self, _status: &Status) {}

    fn status(&self) -> Status {
        self.status.lock().unwrap().clone()
    }

    async fn header(&self) -> Result<Metadata, TransportError> {
        Ok(Metadata::new())
    }

    fn trailer(&self) -> Metadata {
        Metadata::new()
    }

    async fn recv_compress(&self) -> Option<String> {
        self.server.response_encoding.clone()
    }

    fn bytes_received(&self) -> bool {
        self.bytes_received.load(Ordering::SeqCst)
    }

    fn unprocessed(&self) -> bool {
        self.unprocessed
    }

    fn peer(&self) -> Peer {
        Peer {
            address: self.address.clone(),
            auth_info: None,
        }
    }
}

/// A resolver the test drives by hand through the captured handle.
pub struct ManualResolverBuilder {
    handle: Mutex<Option<ResolverHandle>>,
}

impl ManualResolverBuilder {
    pub fn new() -> Arc<ManualResolverBuilder> {
        Arc::new(ManualResolverBuilder {
            handle: Mutex::new(None),
        })
    }

    /// The publish handle, available once the channel has been dialed.
    pub fn handle(&self) -> ResolverHandle {
        self.handle
            .lock()
            .unwrap()
            .clone()
            .expect("resolver not built yet; dial the channel first")
    }
}

struct ManualResolver;

impl Resolver for ManualResolver {
    fn resolve_now(&mut self) {}
    fn close(&mut self) {}
}

impl ResolverBuilder for ManualResolverBuilder {
    fn build(
        &self,
        _target: &Target,
        handle: ResolverHandle,
        _options: ResolverOptions,
    ) -> Box<dyn Resolver> {
        *self.handle.lock().unwrap() = Some(handle);
        Box::new(ManualResolver)
    }

    fn scheme(&self) -> &str {
        "manual"
    }
}

/// Observable events and pick outcomes shared between a test and its
/// balancer.
#[derive(Default)]
pub struct BalancerProbe {
    pub events: Mutex<Vec<String>>,
    pub done: Mutex<Vec<Option<Status>>>,
    pub closes: AtomicUsize,
}

impl BalancerProbe {
    pub fn new() -> Arc<BalancerProbe> {
        Arc::new(BalancerProbe::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

/// A single-subchannel test policy.  `initial_transient_failure` controls
/// whether it publishes a transient-failure picker while connecting (as
/// opposed to a queueing one), and its ready picker attaches a `done`
/// callback that reports into the probe.
pub struct TestBalancerBuilder {
    pub name: &'static str,
    pub initial_transient_failure: bool,
    pub probe: Arc<BalancerProbe>,
}

impl TestBalancerBuilder {
    pub fn register(
        name: &'static str,
        initial_transient_failure: bool,
        probe: Arc<BalancerProbe>,
    ) {
        wirecall::client::load_balancing::GLOBAL_LB_REGISTRY.add_builder(Arc::new(
            TestBalancerBuilder {
                name,
                initial_transient_failure,
                probe,
            },
        ));
    }
}

impl LbPolicyBuilder for TestBalancerBuilder {
    fn build(
        &self,
        controller: Arc<dyn ChannelController>,
        _options: LbPolicyBuildOptions,
    ) -> Box<dyn LbPolicy> {
        Box::new(TestBalancer {
            name: self.name,
            controller,
            initial_transient_failure: self.initial_transient_failure,
            probe: self.probe.clone(),
            subchannel: None,
        })
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

struct TestBalancer {
    name: &'static str,
    controller: Arc<dyn ChannelController>,
    initial_transient_failure: bool,
    probe: Arc<BalancerProbe>,
    subchannel: Option<Subchannel>,
}

impl LbPolicy for TestBalancer {
    fn resolver_update(&mut self, addresses: Vec<wirecall::client::name_resolution::Address>, error: Option<Status>) {
        self.probe.record(format!("{}:resolved", self.name));
        if error.is_some() || addresses.is_empty() {
            self.controller.update_balancer_state(
                ConnectivityState::TransientFailure,
                Arc::new(TransientPicker {
                    message: "resolver failed".to_string(),
                }),
            );
            return;
        }
        if self.subchannel.is_none() {
            let subchannel = self
                .controller
                .new_subchannel(addresses, NewSubchannelOptions::default())
                .expect("subchannel creation");
            subchannel.connect();
            self.subchannel = Some(subchannel);
        }
        if self.initial_transient_failure {
            self.controller.update_balancer_state(
                ConnectivityState::TransientFailure,
                Arc::new(TransientPicker {
                    message: format!("{}: not connected yet", self.name),
                }),
            );
        } else {
            self.controller
                .update_balancer_state(ConnectivityState::Connecting, Arc::new(QueuingPicker));
        }
    }

    fn subchannel_update(&mut self, subchannel: &Subchannel, state: ConnectivityState) {
        let Some(own) = &self.subchannel else { return };
        if own != subchannel {
            return;
        }
        self.probe.record(format!("{}:{}", self.name, state));
        match state {
            ConnectivityState::Ready => {
                self.controller.update_balancer_state(
                    ConnectivityState::Ready,
                    Arc::new(DonePicker {
                        subchannel: subchannel.clone(),
                        probe: self.probe.clone(),
                    }),
                );
            }
            ConnectivityState::TransientFailure => {
                self.controller.update_balancer_state(
                    ConnectivityState::TransientFailure,
                    Arc::new(TransientPicker {
                        message: format!("{}: connections failing", self.name),
                    }),
                );
            }
            ConnectivityState::Idle => {
                subchannel.connect();
                self.controller
                    .update_balancer_state(ConnectivityState::Connecting, Arc::new(QueuingPicker));
            }
            _ => {}
        }
    }

    fn close(&mut self) {
        self.probe.record(format!("{}:close", self.name));
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(subchannel) = self.subchannel.take() {
            self.controller.remove_subchannel(&subchannel);
        }
    }
}

struct TransientPicker {
    message: String,
}

impl Picker for TransientPicker {
    fn pick(&self, _info: &PickInfo) -> PickResult {
        PickResult::TransientFailure(Status::unavailable(self.message.clone()))
    }
}

struct DonePicker {
    subchannel: Subchannel,
    probe: Arc<BalancerProbe>,
}

impl Picker for DonePicker {
    fn pick(&self, _info: &PickInfo) -> PickResult {
        let probe = self.probe.clone();
        PickResult::Pick(Pick {
            subchannel: self.subchannel.clone(),
            done: Some(Box::new(move |info: DoneInfo| {
                probe.done.lock().unwrap().push(info.error);
            })),
        })
    }
}

/// Counts stats events, in particular how many times a call ended.
#[derive(Default)]
pub struct CountingStats {
    pub begins: AtomicUsize,
    pub ends: AtomicUsize,
    pub end_errors: Mutex<Vec<Option<Code>>>,
}

impl CountingStats {
    pub fn new() -> Arc<CountingStats> {
        Arc::new(CountingStats::default())
    }
}

impl StatsHandler for CountingStats {
    fn handle(&self, stats: &RpcStats) {
        match stats {
            RpcStats::Begin { .. } => {
                self.begins.fetch_add(1, Ordering::SeqCst);
            }
            RpcStats::End { error, .. } => {
                self.ends.fetch_add(1, Ordering::SeqCst);
                self.end_errors
                    .lock()
                    .unwrap()
                    .push(error.as_ref().map(|status| status.code()));
            }
            _ => {}
        }
    }
}

/// Polls `condition` until it holds or a second passes.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within one second");
}
