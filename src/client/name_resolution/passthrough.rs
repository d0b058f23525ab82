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

//! The passthrough resolver: hands the target endpoint to the channel
//! verbatim as the one and only address.  The default for targets whose
//! scheme carries no real resolution semantics.

use super::{Address, Resolver, ResolverBuilder, ResolverHandle, ResolverOptions, Target};

/// Scheme handled by the passthrough resolver.
pub const PASSTHROUGH_SCHEME: &str = "passthrough";

pub(crate) struct PassthroughBuilder;

impl ResolverBuilder for PassthroughBuilder {
    fn build(
        &self,
        target: &Target,
        handle: ResolverHandle,
        _options: ResolverOptions,
    ) -> Box<dyn Resolver> {
        let resolver = PassthroughResolver {
            endpoint: target.endpoint.clone(),
            handle,
        };
        resolver.publish();
        Box::new(resolver)
    }

    fn scheme(&self) -> &str {
        PASSTHROUGH_SCHEME
    }
}

struct PassthroughResolver {
    endpoint: String,
    handle: ResolverHandle,
}

impl PassthroughResolver {
    fn publish(&self) {
        self.handle
            .new_address(vec![Address::new(self.endpoint.clone())]);
    }
}

impl Resolver for PassthroughResolver {
    fn resolve_now(&mut self) {
        // There is nothing to re-resolve; republish the endpoint.
        self.publish();
    }

    fn close(&mut self) {}
}
