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

//! The pick_first LB policy: one subchannel over the whole address list,
//! every pick routed to it.  The default policy when the service config
//! names none.

use std::sync::Arc;

use tracing::debug;

use super::{
    ChannelController, FailingPicker, LbPolicy, LbPolicyBuildOptions, LbPolicyBuilder,
    NewSubchannelOptions, Pick, PickInfo, PickResult, Picker, QueuingPicker,
};
use crate::client::name_resolution::Address;
use crate::client::subchannel::Subchannel;
use crate::client::ConnectivityState;
use crate::status::Status;

/// Name under which the policy is registered.
pub static POLICY_NAME: &str = "pick_first";

pub(crate) struct PickFirstBuilder;

impl LbPolicyBuilder for PickFirstBuilder {
    fn build(
        &self,
        controller: Arc<dyn ChannelController>,
        _options: LbPolicyBuildOptions,
    ) -> Box<dyn LbPolicy> {
        Box::new(PickFirst {
            controller,
            subchannel: None,
        })
    }

    fn name(&self) -> &'static str {
        POLICY_NAME
    }
}

struct PickFirst {
    controller: Arc<dyn ChannelController>,
    subchannel: Option<Subchannel>,
}

impl PickFirst {
    fn publish_queueing(&self) {
        self.controller
            .update_balancer_state(ConnectivityState::Connecting, Arc::new(QueuingPicker));
    }

    fn publish_failure(&self, error: Status) {
        self.controller.update_balancer_state(
            ConnectivityState::TransientFailure,
            Arc::new(FailingPicker::new(error)),
        );
    }
}

impl LbPolicy for PickFirst {
    fn resolver_update(&mut self, addresses: Vec<Address>, error: Option<Status>) {
        if let Some(error) = error {
            debug!(%error, "pick_first: resolver reported failure");
            if let Some(subchannel) = self.subchannel.take() {
                self.controller.remove_subchannel(&subchannel);
            }
            self.publish_failure(error);
            return;
        }
        if addresses.is_empty() {
            if let Some(subchannel) = self.subchannel.take() {
                self.controller.remove_subchannel(&subchannel);
            }
            self.publish_failure(Status::unavailable(
                "name resolver produced an empty address list",
            ));
            return;
        }

        match &self.subchannel {
            Some(subchannel) => subchannel.update_addresses(addresses),
            None => {
                match self
                    .controller
                    .new_subchannel(addresses, NewSubchannelOptions::default())
                {
                    Ok(subchannel) => {
                        subchannel.connect();
                        self.subchannel = Some(subchannel);
                        self.publish_queueing();
                    }
                    Err(error) => self.publish_failure(error),
                }
            }
        }
    }

    fn subchannel_update(&mut self, subchannel: &Subchannel, state: ConnectivityState) {
        let Some(own) = &self.subchannel else {
            return;
        };
        if own != subchannel {
            return;
        }
        match state {
            ConnectivityState::Ready => {
                self.controller.update_balancer_state(
                    ConnectivityState::Ready,
                    Arc::new(OnePicker {
                        subchannel: subchannel.clone(),
                    }),
                );
            }
            ConnectivityState::Connecting => self.publish_queueing(),
            ConnectivityState::TransientFailure => {
                self.controller.resolve_now();
                self.publish_failure(Status::unavailable("all connection attempts failed"));
            }
            ConnectivityState::Idle => {
                // The connection was lost; try again.
                subchannel.connect();
                self.publish_queueing();
            }
            ConnectivityState::Shutdown => {}
        }
    }

    fn close(&mut self) {
        if let Some(subchannel) = self.subchannel.take() {
            self.controller.remove_subchannel(&subchannel);
        }
    }
}

/// Routes every pick to the one ready subchannel.
struct OnePicker {
    subchannel: Subchannel,
}

impl Picker for OnePicker {
    fn pick(&self, _info: &PickInfo) -> PickResult {
        PickResult::Pick(Pick {
            subchannel: self.subchannel.clone(),
            done: None,
        })
    }
}
