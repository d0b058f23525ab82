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

use std::{
    collections::HashMap,
    sync::{Arc, LazyLock, Mutex},
};

use super::{passthrough, ResolverBuilder};

/// A registry to store and retrieve name resolvers, indexed by the URI
/// scheme they handle.
pub struct ResolverRegistry {
    m: Mutex<HashMap<String, Arc<dyn ResolverBuilder>>>,
}

impl ResolverRegistry {
    fn new() -> Self {
        Self {
            m: Mutex::default(),
        }
    }

    /// Adds a resolver builder to the registry under `builder.scheme()`.
    /// If multiple builders register the same scheme, the last one wins.
    ///
    /// # Panics
    ///
    /// Panics if the scheme contains uppercase characters; schemes are
    /// stored lower-case.
    pub fn add_builder(&self, builder: Arc<dyn ResolverBuilder>) {
        let scheme = builder.scheme();
        if scheme.chars().any(|c| c.is_ascii_uppercase()) {
            panic!("scheme must not contain uppercase characters: {scheme}");
        }
        self.m.lock().unwrap().insert(scheme.to_string(), builder);
    }

    /// Returns the resolver builder registered for the given scheme, if
    /// any.  The scheme is matched case-insensitively.
    pub fn get(&self, scheme: &str) -> Option<Arc<dyn ResolverBuilder>> {
        self.m.lock().unwrap().get(&scheme.to_lowercase()).cloned()
    }
}

/// Global registry for resolver builders.  The passthrough resolver is
/// pre-registered.
pub static GLOBAL_RESOLVER_REGISTRY: LazyLock<ResolverRegistry> = LazyLock::new(|| {
    let registry = ResolverRegistry::new();
    registry.add_builder(Arc::new(passthrough::PassthroughBuilder));
    registry
});
