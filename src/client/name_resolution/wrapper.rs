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

//! The resolver wrapper: serialises address and service-config updates
//! from a resolver into the channel on a single task.
//!
//! The watcher consumes exactly one pending update per iteration, so a new
//! address list and a simultaneously arriving service config that names a
//! different balancer can never race.  A close signal wins every select;
//! on termination the wrapper closes the resolver.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::debug;

use super::{Address, Resolver, ResolverHandle, Slots};
use crate::status::Status;

/// The channel surface the watcher delivers into.  Both handlers run on
/// the watcher task; no two invocations ever overlap.
pub(crate) trait ResolverEvents: Send + Sync {
    fn handle_resolved_addrs(&self, addresses: Vec<Address>, error: Option<Status>);
    fn handle_service_config(&self, config: String);
}

pub(crate) struct ResolverWrapper {
    slots: Arc<Slots>,
    resolver: Arc<Mutex<Option<Box<dyn Resolver>>>>,
    done: Mutex<Option<oneshot::Sender<()>>>,
}

impl ResolverWrapper {
    /// Creates the wrapper and returns it alongside the handle the
    /// resolver publishes through.  `start` must be called to begin
    /// delivery.
    pub(crate) fn new() -> (Self, ResolverHandle) {
        let slots = Arc::new(Slots::default());
        let handle = ResolverHandle::new(slots.clone());
        (
            ResolverWrapper {
                slots,
                resolver: Arc::new(Mutex::new(None)),
                done: Mutex::new(None),
            },
            handle,
        )
    }

    /// Installs the built resolver and spawns the watcher.
    pub(crate) fn start(&self, resolver: Box<dyn Resolver>, events: Weak<dyn ResolverEvents>) {
        *self.resolver.lock().unwrap() = Some(resolver);
        let (done_tx, done_rx) = oneshot::channel();
        *self.done.lock().unwrap() = Some(done_tx);

        let slots = self.slots.clone();
        let resolver = self.resolver.clone();
        tokio::spawn(async move {
            watcher(slots, events, done_rx).await;
            if let Some(mut resolver) = resolver.lock().unwrap().take() {
                resolver.close();
            }
        });
    }

    /// Asks the resolver to re-resolve.  Advisory.
    pub(crate) fn resolve_now(&self) {
        if let Some(resolver) = self.resolver.lock().unwrap().as_mut() {
            resolver.resolve_now();
        }
    }

    /// Stops the watcher.  The watcher closes the resolver on its way out.
    pub(crate) fn close(&self) {
        if let Some(done) = self.done.lock().unwrap().take() {
            let _ = done.send(());
        }
    }
}

async fn watcher(
    slots: Arc<Slots>,
    events: Weak<dyn ResolverEvents>,
    mut done: oneshot::Receiver<()>,
) {
    loop {
        match done.try_recv() {
            Err(TryRecvError::Empty) => {}
            // Sent or sender dropped: stop.
            _ => return,
        }

        // Deliver exactly one pending update per iteration.  Updates of
        // both kinds pending at once are delivered in successive
        // iterations, addresses first.
        let pending_addrs = slots.addresses.lock().unwrap().take();
        if let Some(update) = pending_addrs {
            let Some(events) = events.upgrade() else {
                return;
            };
            debug!(
                addresses = update.addresses.len(),
                error = update.error.is_some(),
                "resolver wrapper: delivering address update"
            );
            events.handle_resolved_addrs(update.addresses, update.error);
            continue;
        }

        let pending_config = slots.service_config.lock().unwrap().take();
        if let Some(config) = pending_config {
            let Some(events) = events.upgrade() else {
                return;
            };
            debug!("resolver wrapper: delivering service config update");
            events.handle_service_config(config);
            continue;
        }

        tokio::select! {
            biased;
            _ = &mut done => return,
            _ = slots.notify.notified() => {}
        }
    }
}
