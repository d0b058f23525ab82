/*
 *
 * Copyright 2025 wirecall authors.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

//! The channel: a virtual connection to a service that owns name
//! resolution, load balancing, transport selection, per-method
//! configuration, and call dispatch.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::load_balancing::pick_first;
use super::load_balancing::{
    ChannelController, LbPolicyBuildOptions, LbState, NewSubchannelOptions, PickDone, PickInfo,
    PickResult, GLOBAL_LB_REGISTRY,
};
use super::name_resolution::wrapper::{ResolverEvents, ResolverWrapper};
use super::name_resolution::{
    Address, ResolverBuilder, ResolverOptions, Target, GLOBAL_RESOLVER_REGISTRY,
};
use super::options::CallOptions;
use super::service_config::{parse_service_config, MethodConfig, ServiceConfig};
use super::subchannel::{StateReporter, Subchannel};
use super::transport::{ClientTransport, ConnectOptions, Connector};
use super::ConnectivityState;
use crate::client::interceptor::{StreamInterceptor, UnaryInterceptor};
use crate::codec::{BinCodec, Codec};
use crate::compression::Compressor;
use crate::context::Context;
use crate::credentials::TransportCredentials;
use crate::keepalive::ClientParameters;
use crate::status::Status;

/// An error producing a channel from a dial target.
#[derive(Debug)]
pub enum DialError {
    /// No resolver builder is registered for the target's scheme.
    UnsupportedScheme(String),
}

impl fmt::Display for DialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialError::UnsupportedScheme(scheme) => {
                write!(f, "no resolver registered for scheme {scheme:?}")
            }
        }
    }
}

impl Error for DialError {}

/// Configuration applied to a channel at dial time.
pub struct ChannelOptions {
    /// Dials transport connections; the only required option.
    pub connector: Arc<dyn Connector>,
    /// Call options applied to every call before its own.
    pub default_call_options: CallOptions,
    /// Overrides registry lookup for the resolver.
    pub resolver_builder: Option<Arc<dyn ResolverBuilder>>,
    /// Codec used when a call selects no content subtype.
    pub default_codec: Arc<dyn Codec>,
    /// Compressor applied to sends when a call requests none.
    pub default_compressor: Option<Arc<dyn Compressor>>,
    /// Transport security for connections, if any.
    pub transport_credentials: Option<Arc<dyn TransportCredentials>>,
    /// Keepalive behaviour for connections.
    pub keepalive: ClientParameters,
    /// Overrides the authority derived from the target.
    pub authority_override: Option<String>,
    /// Intercepts unary calls.
    pub unary_interceptor: Option<Arc<dyn UnaryInterceptor>>,
    /// Intercepts stream creation.
    pub stream_interceptor: Option<Arc<dyn StreamInterceptor>>,
}

impl ChannelOptions {
    /// Options with the given connector and all defaults.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        ChannelOptions {
            connector,
            default_call_options: CallOptions::new(),
            resolver_builder: None,
            default_codec: Arc::new(BinCodec),
            default_compressor: None,
            transport_credentials: None,
            keepalive: ClientParameters::default(),
            authority_override: None,
            unary_interceptor: None,
            stream_interceptor: None,
        }
    }
}

/// A client connection to a service, identified by a dial target.
///
/// Cheap to clone; all clones share one session.  Dropping the last clone
/// releases the channel's background tasks, but an explicit
/// [`Channel::close`] terminates in-flight calls promptly.
#[derive(Clone)]
pub struct Channel {
    pub(crate) inner: Arc<ChannelInner>,
}

impl Channel {
    /// Creates a channel for `target`.
    ///
    /// The target is parsed as `scheme://authority/endpoint`; the scheme
    /// selects a resolver from the global registry unless
    /// [`ChannelOptions::resolver_builder`] overrides it.  Must be called
    /// within a tokio runtime.
    pub fn dial(target: &str, options: ChannelOptions) -> Result<Channel, DialError> {
        let parsed = Target::parse(target);
        let builder = options.resolver_builder.clone().or_else(|| {
            GLOBAL_RESOLVER_REGISTRY.get(&parsed.scheme)
        });
        let Some(builder) = builder else {
            return Err(DialError::UnsupportedScheme(parsed.scheme.clone()));
        };

        let authority = options
            .authority_override
            .clone()
            .or_else(|| (!parsed.authority.is_empty()).then(|| parsed.authority.clone()))
            .unwrap_or_else(|| parsed.endpoint.clone());

        let (resolver_wrapper, resolver_handle) = ResolverWrapper::new();
        let (picker_tx, picker_rx) = watch::channel(LbState {
            connectivity_state: ConnectivityState::Idle,
            picker: Arc::new(super::load_balancing::QueuingPicker),
        });
        let (balancer_tx, balancer_rx) = mpsc::unbounded_channel();
        let (subchannel_tx, subchannel_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ChannelInner {
            target_str: target.to_string(),
            target: parsed.clone(),
            authority: authority.clone(),
            options,
            picker_tx,
            picker_rx,
            service_config: RwLock::new(Arc::new(ServiceConfig::default())),
            resolver_wrapper,
            balancer_tx,
            subchannel_tx,
            subchannels: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
        });

        let build_options = LbPolicyBuildOptions {
            dial_credentials: inner.options.transport_credentials.clone(),
            connector: Some(inner.options.connector.clone()),
        };
        tokio::spawn(balancer_worker(
            Arc::downgrade(&inner),
            build_options,
            balancer_rx,
            subchannel_rx,
        ));

        let resolver = builder.build(
            &parsed,
            resolver_handle,
            ResolverOptions { authority },
        );
        let events: Weak<dyn ResolverEvents> = Arc::downgrade(&(inner.clone() as Arc<dyn ResolverEvents>));
        inner.resolver_wrapper.start(resolver, events);

        Ok(Channel { inner })
    }

    /// The original dial target.
    pub fn target(&self) -> &str {
        &self.inner.target_str
    }

    /// The parsed dial target.
    pub fn parsed_target(&self) -> &Target {
        &self.inner.target
    }

    /// The current balancer-aggregated connectivity state.
    pub fn state(&self) -> ConnectivityState {
        if self.inner.closed.is_cancelled() {
            return ConnectivityState::Shutdown;
        }
        self.inner.picker_rx.borrow().connectivity_state
    }

    /// The method configuration the current service config snapshot
    /// recommends for `method` (a `/service/method` path).
    pub fn get_method_config(&self, method: &str) -> MethodConfig {
        self.inner.get_method_config(method)
    }

    /// Shuts the channel down: stops the resolver and balancer, closes all
    /// subchannels, and fails in-flight and future calls.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.closed.is_cancelled() {
            return;
        }
        debug!(target = %inner.target_str, "closing channel");
        inner.closed.cancel();
        inner.resolver_wrapper.close();
        let _ = inner.balancer_tx.send(BalancerEvent::Close);
        let subchannels: Vec<Subchannel> =
            inner.subchannels.lock().unwrap().drain().map(|(_, sc)| sc).collect();
        for subchannel in subchannels {
            subchannel.shutdown();
        }
    }
}

pub(crate) struct ChannelInner {
    pub(crate) target_str: String,
    pub(crate) target: Target,
    pub(crate) authority: String,
    pub(crate) options: ChannelOptions,
    picker_tx: watch::Sender<LbState>,
    picker_rx: watch::Receiver<LbState>,
    service_config: RwLock<Arc<ServiceConfig>>,
    resolver_wrapper: ResolverWrapper,
    balancer_tx: mpsc::UnboundedSender<BalancerEvent>,
    subchannel_tx: StateReporter,
    subchannels: Mutex<HashMap<u64, Subchannel>>,
    pub(crate) closed: CancellationToken,
}

impl ChannelInner {
    pub(crate) fn get_method_config(&self, method: &str) -> MethodConfig {
        self.service_config.read().unwrap().method_config(method)
    }

    fn set_picker(&self, state: LbState) {
        self.picker_tx.send_replace(state);
    }

    /// Blocks until the current picker yields a usable subchannel, the
    /// context expires, or the pick fails per the picker decision table.
    /// Honours fail-fast: when it is clear, transient failures wait for a
    /// new picker instead of failing.
    pub(crate) async fn pick_transport(
        &self,
        ctx: &Context,
        info: &PickInfo,
    ) -> Result<(Subchannel, Arc<dyn ClientTransport>, Option<PickDone>), Status> {
        let mut rx = self.picker_rx.clone();
        loop {
            // Re-checked every iteration so a fail-slow picker cannot loop
            // past the deadline.
            if let Some(status) = ctx.error() {
                return Err(status);
            }
            if self.closed.is_cancelled() {
                return Err(Status::cancelled("the channel is closing"));
            }

            let current = rx.borrow_and_update().clone();
            match current.picker.pick(info) {
                PickResult::Pick(pick) => {
                    let issued = self
                        .subchannels
                        .lock()
                        .unwrap()
                        .contains_key(&pick.subchannel.id());
                    if issued {
                        if let Some(transport) = pick.subchannel.ready_transport() {
                            return Ok((pick.subchannel, transport, pick.done));
                        }
                        // The subchannel stopped being ready after the
                        // picker snapshot; wait for a fresh picker.
                    } else {
                        // A pick raced a policy switch: the subchannel was
                        // already removed.  The replacement picker is on
                        // its way.
                        debug!(subchannel = pick.subchannel.id(), "pick raced subchannel removal");
                    }
                }
                PickResult::Queue => {}
                PickResult::TransientFailure(status) => {
                    if info.fail_fast {
                        return Err(Status::unavailable(status.message()));
                    }
                }
                PickResult::Fail(status) => {
                    return Err(Status::unavailable(status.message()));
                }
            }

            tokio::select! {
                _ = ctx.done() => {
                    return Err(ctx
                        .error()
                        .unwrap_or_else(|| Status::cancelled("context cancelled")));
                }
                _ = self.closed.cancelled() => {
                    return Err(Status::cancelled("the channel is closing"));
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(Status::cancelled("the channel is closing"));
                    }
                }
            }
        }
    }
}

impl ResolverEvents for ChannelInner {
    fn handle_resolved_addrs(&self, addresses: Vec<Address>, error: Option<Status>) {
        let _ = self
            .balancer_tx
            .send(BalancerEvent::ResolvedAddrs(addresses, error));
    }

    fn handle_service_config(&self, config: String) {
        match parse_service_config(&config) {
            Ok(sc) => {
                let policy = sc.load_balancing_policy.clone();
                *self.service_config.write().unwrap() = Arc::new(sc);
                if let Some(policy) = policy {
                    let _ = self.balancer_tx.send(BalancerEvent::SwitchPolicy(policy));
                }
            }
            Err(error) => {
                // Keep the previous snapshot; the resolver may publish a
                // corrected document later.
                warn!(%error, "ignoring malformed service config");
            }
        }
    }
}

enum BalancerEvent {
    ResolvedAddrs(Vec<Address>, Option<Status>),
    SwitchPolicy(String),
    Close,
}

/// The single logical thread all balancer callbacks run on.  Consuming
/// control events and subchannel state reports from one loop is what
/// guarantees `resolver_update`, `subchannel_update`, and `close` are
/// never invoked concurrently.
async fn balancer_worker(
    inner: Weak<ChannelInner>,
    build_options: LbPolicyBuildOptions,
    mut events: mpsc::UnboundedReceiver<BalancerEvent>,
    mut subchannel_states: mpsc::UnboundedReceiver<(Subchannel, ConnectivityState)>,
) {
    let controller: Arc<dyn ChannelController> = Arc::new(ControllerImpl {
        inner: inner.clone(),
    });
    let mut policy_name = pick_first::POLICY_NAME.to_string();
    let mut policy = GLOBAL_LB_REGISTRY
        .get_policy(&policy_name)
        .expect("default policy is always registered")
        .build(controller.clone(), build_options.clone());
    let mut last_update: Option<(Vec<Address>, Option<Status>)> = None;

    loop {
        enum Item {
            Control(BalancerEvent),
            State(Subchannel, ConnectivityState),
        }
        let item = tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => Item::Control(event),
                None => break,
            },
            state = subchannel_states.recv() => match state {
                Some((subchannel, state)) => Item::State(subchannel, state),
                None => break,
            },
        };
        match item {
            Item::Control(BalancerEvent::ResolvedAddrs(addresses, error)) => {
                last_update = Some((addresses.clone(), error.clone()));
                policy.resolver_update(addresses, error);
            }
            Item::Control(BalancerEvent::SwitchPolicy(name)) => {
                if name.eq_ignore_ascii_case(&policy_name) {
                    continue;
                }
                debug!(from = %policy_name, to = %name, "switching lb policy");
                policy.close();
                // Install a queueing picker so no pick can observe the old
                // policy's picker past this point.
                if let Some(channel) = inner.upgrade() {
                    channel.set_picker(LbState::initial());
                }
                let builder = GLOBAL_LB_REGISTRY.get_policy(&name).unwrap_or_else(|| {
                    warn!(policy = %name, "unknown lb policy, falling back to pick_first");
                    GLOBAL_LB_REGISTRY
                        .get_policy(pick_first::POLICY_NAME)
                        .expect("default policy is always registered")
                });
                policy_name = builder.name().to_string();
                policy = builder.build(controller.clone(), build_options.clone());
                // Replay the last resolver update so the fresh policy can
                // build subchannels without waiting for the resolver.
                if let Some((addresses, error)) = last_update.clone() {
                    policy.resolver_update(addresses, error);
                }
            }
            Item::Control(BalancerEvent::Close) => {
                policy.close();
                break;
            }
            Item::State(subchannel, state) => {
                policy.subchannel_update(&subchannel, state);
            }
        }
    }
}

/// The channel surface handed to LB policies.  Methods act on channel
/// state directly, so a policy may call them synchronously from within its
/// own callbacks without re-entering the worker queue.
struct ControllerImpl {
    inner: Weak<ChannelInner>,
}

impl ChannelController for ControllerImpl {
    fn new_subchannel(
        &self,
        addresses: Vec<Address>,
        _options: NewSubchannelOptions,
    ) -> Result<Subchannel, Status> {
        let Some(inner) = self.inner.upgrade() else {
            return Err(Status::cancelled("the channel is closing"));
        };
        if inner.closed.is_cancelled() {
            return Err(Status::cancelled("the channel is closing"));
        }
        let connect_options = ConnectOptions {
            credentials: inner.options.transport_credentials.clone(),
            authority: inner.authority.clone(),
            keepalive: inner.options.keepalive,
            connect_deadline: None,
        };
        let subchannel = Subchannel::new(
            addresses,
            inner.options.connector.clone(),
            connect_options,
            inner.subchannel_tx.clone(),
        );
        inner
            .subchannels
            .lock()
            .unwrap()
            .insert(subchannel.id(), subchannel.clone());
        Ok(subchannel)
    }

    fn remove_subchannel(&self, subchannel: &Subchannel) {
        if let Some(inner) = self.inner.upgrade() {
            inner.subchannels.lock().unwrap().remove(&subchannel.id());
        }
        subchannel.shutdown();
    }

    fn update_balancer_state(&self, state: ConnectivityState, picker: Arc<dyn super::load_balancing::Picker>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.set_picker(LbState {
                connectivity_state: state,
                picker,
            });
        }
    }

    fn resolve_now(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.resolver_wrapper.resolve_now();
        }
    }

    fn target(&self) -> String {
        self.inner
            .upgrade()
            .map(|inner| inner.target_str.clone())
            .unwrap_or_default()
    }
}
