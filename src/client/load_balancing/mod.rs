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

//! The load balancing contract.
//!
//! LB policies are pluggable and registered by name.  A policy receives
//! address-list and subchannel-state updates, issues subchannel
//! creation/removal commands back to the channel, and publishes a new
//! [`Picker`] each time its internal state changes.
//!
//! `resolver_update`, `subchannel_update`, and `close` are guaranteed to be
//! invoked from a single logical task, never concurrently.  `Picker::pick`
//! has no such guarantee and may be invoked from arbitrary tasks.

pub mod pick_first;
mod registry;

use std::sync::Arc;

use crate::client::name_resolution::Address;
use crate::client::subchannel::Subchannel;
use crate::client::ConnectivityState;
use crate::credentials::TransportCredentials;
use crate::status::Status;

pub use registry::{LbPolicyRegistry, GLOBAL_LB_REGISTRY};

/// Options for creating a subchannel.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct NewSubchannelOptions {}

/// The channel surface presented to an LB policy.
///
/// A policy may call these methods synchronously from within its own
/// callbacks; they act on channel state directly and never re-enter the
/// policy.
pub trait ChannelController: Send + Sync {
    /// Creates a new subchannel for the given address list, in `Idle`
    /// state.  Does not initiate a connection.
    fn new_subchannel(
        &self,
        addresses: Vec<Address>,
        options: NewSubchannelOptions,
    ) -> Result<Subchannel, Status>;

    /// Schedules shutdown of a subchannel.  Idempotent.
    fn remove_subchannel(&self, subchannel: &Subchannel);

    /// Atomically installs a new aggregate connectivity state and picker,
    /// waking any calls blocked on a pick.
    fn update_balancer_state(&self, state: ConnectivityState, picker: Arc<dyn Picker>);

    /// Asks the name resolver to re-resolve.  Advisory.
    fn resolve_now(&self);

    /// The original dial target of the channel.
    fn target(&self) -> String;
}

/// Additional information available when building an LB policy.
#[derive(Clone, Default)]
#[non_exhaustive]
pub struct LbPolicyBuildOptions {
    /// Transport credentials the policy can use to dial a remote balancer
    /// server, if it needs to talk to one securely.
    pub dial_credentials: Option<Arc<dyn TransportCredentials>>,
    /// The connector the policy can use to dial a remote balancer server.
    pub connector: Option<Arc<dyn crate::client::transport::Connector>>,
}

/// An LB policy factory, registered by name.
pub trait LbPolicyBuilder: Send + Sync {
    /// Builds a new policy instance.  Must not fail.
    fn build(
        &self,
        controller: Arc<dyn ChannelController>,
        options: LbPolicyBuildOptions,
    ) -> Box<dyn LbPolicy>;

    /// The name of policies built by this builder, as referenced by
    /// service configs.
    fn name(&self) -> &'static str;
}

/// An LB policy instance.
///
/// Manages subchannels, aggregates their connectivity states, and
/// publishes pickers through the [`ChannelController`].
pub trait LbPolicy: Send {
    /// Called on every resolver update.  An empty address list with a
    /// non-`None` error signals resolver failure.
    fn resolver_update(&mut self, addresses: Vec<Address>, error: Option<Status>);

    /// Called exactly once per state transition of a subchannel this
    /// policy created.  Must be idempotent for `Shutdown`.
    fn subchannel_update(&mut self, subchannel: &Subchannel, state: ConnectivityState);

    /// Called when the channel shuts down or switches policies.  After
    /// this returns the policy must not call any controller method.
    fn close(&mut self);
}

/// The outcome metadata delivered to a pick's `done` callback when the
/// call terminates.
#[derive(Debug, Default)]
pub struct DoneInfo {
    /// The error the RPC finished with, `None` on success.
    pub error: Option<Status>,
    /// Whether any bytes were sent to the server.
    pub bytes_sent: bool,
    /// Whether any bytes were received from the server.
    pub bytes_received: bool,
}

/// Invoked once with the call outcome; the balancer's signal to update
/// load statistics.
pub type PickDone = Box<dyn FnOnce(DoneInfo) + Send>;

/// Information about the call being picked for.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct PickInfo {
    /// Full method path of the call.
    pub method: String,
    /// Whether the call fails fast rather than waiting for readiness.
    pub fail_fast: bool,
}

/// A successful pick.
pub struct Pick {
    /// The subchannel to send the call on.  Must be one previously issued
    /// by the channel the picker belongs to.
    pub subchannel: Subchannel,
    /// Optional completion callback.
    pub done: Option<PickDone>,
}

/// The result of a pick, interpreted by the client stream:
///
/// | Result | Stream behaviour |
/// |---|---|
/// | `Pick` with a ready subchannel | send, invoke `done` at termination |
/// | `Pick` whose subchannel is no longer ready | wait for a new picker, re-pick |
/// | `Queue` | wait for a new picker, re-pick |
/// | `TransientFailure` | wait-for-ready: wait and re-pick; otherwise fail *Unavailable* |
/// | `Fail` | fail *Unavailable* |
pub enum PickResult {
    Pick(Pick),
    Queue,
    TransientFailure(Status),
    Fail(Status),
}

/// An immutable snapshot selecting a subchannel per call.
///
/// Replaced wholesale on every balancer state change.  `pick` is called
/// from arbitrary tasks, must not block on I/O, and must not mutate
/// balancer state.
pub trait Picker: Send + Sync {
    fn pick(&self, info: &PickInfo) -> PickResult;
}

/// State published by an LB policy: the aggregate connectivity state plus
/// the picker snapshot to serve picks with.
#[derive(Clone)]
pub struct LbState {
    pub connectivity_state: ConnectivityState,
    pub picker: Arc<dyn Picker>,
}

impl LbState {
    /// The generic initial state: `Connecting` with a picker that queues
    /// every pick.
    pub fn initial() -> Self {
        LbState {
            connectivity_state: ConnectivityState::Connecting,
            picker: Arc::new(QueuingPicker),
        }
    }
}

/// A picker that queues every pick.  Used while a policy is connecting.
pub struct QueuingPicker;

impl Picker for QueuingPicker {
    fn pick(&self, _info: &PickInfo) -> PickResult {
        PickResult::Queue
    }
}

/// A picker that fails every pick with a fixed status.  Used in transient
/// failure.
pub struct FailingPicker {
    error: Status,
}

impl FailingPicker {
    pub fn new(error: Status) -> Self {
        FailingPicker { error }
    }
}

impl Picker for FailingPicker {
    fn pick(&self, _info: &PickInfo) -> PickResult {
        PickResult::TransientFailure(self.error.clone())
    }
}
