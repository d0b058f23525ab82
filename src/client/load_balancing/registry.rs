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

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use super::{pick_first, LbPolicyBuilder};

/// A registry to store and retrieve LB policies, indexed by name.
pub struct LbPolicyRegistry {
    m: Mutex<HashMap<String, Arc<dyn LbPolicyBuilder>>>,
}

impl LbPolicyRegistry {
    fn new() -> Self {
        Self {
            m: Mutex::default(),
        }
    }

    /// Adds an LB policy builder to the registry.  The name is stored
    /// lower-cased; if multiple builders register the same name, the last
    /// one wins.
    pub fn add_builder(&self, builder: Arc<dyn LbPolicyBuilder>) {
        self.m
            .lock()
            .unwrap()
            .insert(builder.name().to_lowercase(), builder);
    }

    /// Returns the builder registered under `name`, matched
    /// case-insensitively, or `None`.
    pub fn get_policy(&self, name: &str) -> Option<Arc<dyn LbPolicyBuilder>> {
        self.m.lock().unwrap().get(&name.to_lowercase()).cloned()
    }
}

/// Global registry for LB policy builders.  `pick_first` is
/// pre-registered.
pub static GLOBAL_LB_REGISTRY: LazyLock<LbPolicyRegistry> = LazyLock::new(|| {
    let registry = LbPolicyRegistry::new();
    registry.add_builder(Arc::new(pick_first::PickFirstBuilder));
    registry
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_first_is_preregistered() {
        assert!(GLOBAL_LB_REGISTRY
            .get_policy(pick_first::POLICY_NAME)
            .is_some());
        assert!(GLOBAL_LB_REGISTRY.get_policy("Pick_First").is_some());
        assert!(GLOBAL_LB_REGISTRY.get_policy("missing").is_none());
    }
}
