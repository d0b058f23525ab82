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

//! Name resolution: converting a channel's target into network addresses.
//!
//! Resolvers are pluggable and selected by the scheme of the dial target.
//! A resolver publishes address lists and service configuration documents
//! through a [`ResolverHandle`]; the channel consumes them serially through
//! its resolver wrapper (see `wrapper.rs`).

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::status::Status;

mod passthrough;
mod registry;
pub(crate) mod wrapper;

pub use passthrough::PASSTHROUGH_SCHEME;
pub use registry::{ResolverRegistry, GLOBAL_RESOLVER_REGISTRY};

/// A dial target split into its three components.
///
/// An input of the form `scheme://authority/endpoint` is split accordingly;
/// any other input is carried whole in `endpoint` with the other fields
/// empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub authority: String,
    pub endpoint: String,
}

/// Returns the pieces of `s` around the first occurrence of `sep`, or
/// `None` when `sep` does not occur.
fn split2<'a>(s: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    s.split_once(sep)
}

impl Target {
    /// Parses a dial string.
    ///
    /// Parsing never fails: inputs that do not match
    /// `scheme://authority/endpoint` become `{endpoint: input}`.
    pub fn parse(target: &str) -> Target {
        let Some((scheme, rest)) = split2(target, "://") else {
            return Target {
                endpoint: target.to_string(),
                ..Default::default()
            };
        };
        let Some((authority, endpoint)) = split2(rest, "/") else {
            return Target {
                endpoint: target.to_string(),
                ..Default::default()
            };
        };
        Target {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            endpoint: endpoint.to_string(),
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.scheme.is_empty() && self.authority.is_empty() {
            write!(f, "{}", self.endpoint)
        } else {
            write!(f, "{}://{}/{}", self.scheme, self.authority, self.endpoint)
        }
    }
}

/// Attributes attached to an address by a resolver, opaque to the channel
/// and ignored for address identity.
pub type Attributes = HashMap<String, String>;

/// An endpoint descriptor produced by a resolver.
#[derive(Clone, Debug, Default)]
pub struct Address {
    /// The network address, passed verbatim to the transport connector.
    pub address: String,
    /// The name the server's identity is verified against, when it differs
    /// from the address.
    pub server_name: String,
    /// Opaque data for consumption by the balancer and subchannel.
    pub attributes: Attributes,
}

impl Address {
    /// Convenience constructor for a bare address.
    pub fn new(address: impl Into<String>) -> Self {
        Address {
            address: address.into(),
            ..Default::default()
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.server_name == other.server_name
    }
}

impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.server_name.hash(state);
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// A name resolver factory that produces [`Resolver`] instances for the
/// channel.
pub trait ResolverBuilder: Send + Sync {
    /// Builds a resolver watching `target`.  Build must not fail; a
    /// resolver that cannot operate should publish an error through the
    /// handle instead.
    fn build(
        &self,
        target: &Target,
        handle: ResolverHandle,
        options: ResolverOptions,
    ) -> Box<dyn Resolver>;

    /// The URI scheme handled by this resolver.
    fn scheme(&self) -> &str;
}

/// A collection of data configured on the channel building a resolver.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct ResolverOptions {
    /// The authority the channel will assert on the wire by default.
    pub authority: String,
}

/// Watches a target for address and service-config updates.
pub trait Resolver: Send {
    /// Asks the resolver to obtain an updated result, if applicable.
    /// Advisory; polling resolvers may coalesce or delay the query.
    fn resolve_now(&mut self);

    /// Stops the resolver.  No publishes may follow.
    fn close(&mut self);
}

/// An address-list update: either a fresh list, or a resolution failure
/// carried as an empty list plus the error.
#[derive(Clone, Debug)]
pub(crate) struct AddressUpdate {
    pub(crate) addresses: Vec<Address>,
    pub(crate) error: Option<Status>,
}

/// One-slot overwriting buffers between a resolver and the channel's
/// watcher.  Each publish drains any previously pending value of its kind,
/// so the watcher only ever observes the latest unconsumed update.
#[derive(Default)]
pub(crate) struct Slots {
    pub(crate) addresses: Mutex<Option<AddressUpdate>>,
    pub(crate) service_config: Mutex<Option<String>>,
    pub(crate) notify: Notify,
}

/// The channel-facing publisher handed to a resolver at build time.
///
/// Publishes are non-blocking and may be issued from any task.
#[derive(Clone)]
pub struct ResolverHandle {
    pub(crate) slots: Arc<Slots>,
}

impl ResolverHandle {
    pub(crate) fn new(slots: Arc<Slots>) -> Self {
        ResolverHandle { slots }
    }

    /// Publishes a new address list, replacing any pending one.
    pub fn new_address(&self, addresses: Vec<Address>) {
        *self.slots.addresses.lock().unwrap() = Some(AddressUpdate {
            addresses,
            error: None,
        });
        self.slots.notify.notify_one();
    }

    /// Publishes a new service config JSON document, replacing any pending
    /// one.
    pub fn new_service_config(&self, config: String) {
        *self.slots.service_config.lock().unwrap() = Some(config);
        self.slots.notify.notify_one();
    }

    /// Publishes a resolution failure: an empty address list paired with
    /// the error.  The channel forwards it to the balancer; no retries
    /// happen at this level.
    pub fn report_error(&self, error: Status) {
        *self.slots.addresses.lock().unwrap() = Some(AddressUpdate {
            addresses: Vec::new(),
            error: Some(error),
        });
        self.slots.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target_full_form() {
        let target = Target::parse("dns://8.8.8.8/svc.example.com");
        assert_eq!(
            target,
            Target {
                scheme: "dns".into(),
                authority: "8.8.8.8".into(),
                endpoint: "svc.example.com".into(),
            }
        );
    }

    #[test]
    fn parse_target_without_scheme_is_all_endpoint() {
        let target = Target::parse("localhost:50051");
        assert_eq!(
            target,
            Target {
                scheme: String::new(),
                authority: String::new(),
                endpoint: "localhost:50051".into(),
            }
        );
    }

    #[test]
    fn parse_target_scheme_without_path_is_all_endpoint() {
        // "://" present but no slash after the authority: the whole input
        // is the endpoint.
        let target = Target::parse("dns://justhost");
        assert_eq!(
            target,
            Target {
                scheme: String::new(),
                authority: String::new(),
                endpoint: "dns://justhost".into(),
            }
        );
    }

    #[test]
    fn parse_target_empty_authority() {
        let target = Target::parse("passthrough:///x");
        assert_eq!(
            target,
            Target {
                scheme: "passthrough".into(),
                authority: String::new(),
                endpoint: "x".into(),
            }
        );
    }

    #[test]
    fn parse_target_is_idempotent_on_display() {
        for input in ["dns://auth/endpoint", "passthrough:///x", "plain:port"] {
            let first = Target::parse(input);
            let second = Target::parse(&first.to_string());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn handle_slots_hold_latest_value_only() {
        let slots = Arc::new(Slots::default());
        let handle = ResolverHandle::new(slots.clone());
        handle.new_address(vec![Address::new("a:1")]);
        handle.new_address(vec![Address::new("b:2")]);
        let pending = slots.addresses.lock().unwrap().take().unwrap();
        assert_eq!(pending.addresses, vec![Address::new("b:2")]);
        assert!(slots.addresses.lock().unwrap().is_none());
    }

    #[test]
    fn report_error_is_empty_list_plus_error() {
        let slots = Arc::new(Slots::default());
        let handle = ResolverHandle::new(slots.clone());
        handle.report_error(Status::unavailable("dns down"));
        let pending = slots.addresses.lock().unwrap().take().unwrap();
        assert!(pending.addresses.is_empty());
        assert!(pending.error.is_some());
    }
}
