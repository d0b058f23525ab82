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

//! Subchannels: logical connections to one address list.
//!
//! A subchannel starts `Idle` and never connects spontaneously; the LB
//! policy must call [`Subchannel::connect`].  Connecting tries the address
//! list in order and ends `Ready` (holding the live transport) or
//! `TransientFailure`.  Loss of a ready connection moves the subchannel
//! back to `Idle`.  Every transition is reported exactly once to the
//! channel's balancer worker.

use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::transport::{ConnectOptions, Connector};
use super::ConnectivityState;
use crate::client::name_resolution::Address;
use crate::client::transport::ClientTransport;

static NEXT_SUBCHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Carries one subchannel state transition into the balancer worker.
pub(crate) type StateReporter = mpsc::UnboundedSender<(Subchannel, ConnectivityState)>;

/// A handle to a logical connection owned by the channel.
///
/// Handles are cheap to clone; identity (equality, hashing) is the
/// subchannel, not the handle.
#[derive(Clone)]
pub struct Subchannel {
    inner: Arc<SubchannelInner>,
}

impl PartialEq for Subchannel {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Subchannel {}

impl Hash for Subchannel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl Debug for Subchannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subchannel({})", self.inner.id)
    }
}

impl Display for Subchannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subchannel {}", self.inner.id)
    }
}

struct SubchannelInner {
    id: u64,
    connector: Arc<dyn Connector>,
    connect_options: ConnectOptions,
    reporter: StateReporter,
    state: Mutex<InnerState>,
}

struct InnerState {
    connectivity: ConnectivityState,
    addresses: Vec<Address>,
    connected_address: Option<Address>,
    transport: Option<Arc<dyn ClientTransport>>,
    connect_task: Option<JoinHandle<()>>,
    // Bumped whenever the connection attempt in flight (or the watch on a
    // live connection) becomes stale: address rewrite, shutdown.  Tasks
    // compare their snapshot against this before mutating state.
    generation: u64,
}

impl Subchannel {
    pub(crate) fn new(
        addresses: Vec<Address>,
        connector: Arc<dyn Connector>,
        connect_options: ConnectOptions,
        reporter: StateReporter,
    ) -> Subchannel {
        Subchannel {
            inner: Arc::new(SubchannelInner {
                id: NEXT_SUBCHANNEL_ID.fetch_add(1, Ordering::Relaxed),
                connector,
                connect_options,
                reporter,
                state: Mutex::new(InnerState {
                    connectivity: ConnectivityState::Idle,
                    addresses,
                    connected_address: None,
                    transport: None,
                    connect_task: None,
                    generation: 0,
                }),
            }),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    /// Begins connecting.  A no-op unless the subchannel is `Idle` or
    /// `TransientFailure`; in particular a subchannel never reconnects
    /// from `Idle` without this call.
    pub fn connect(&self) {
        let mut state = self.inner.state.lock().unwrap();
        match state.connectivity {
            ConnectivityState::Idle | ConnectivityState::TransientFailure => {}
            _ => return,
        }
        let generation = state.generation;
        let addresses = state.addresses.clone();
        self.transition(&mut state, ConnectivityState::Connecting);
        state.connect_task = Some(self.spawn_dial(addresses, generation));
    }

    /// Rewrites the address list.  If the currently connected address
    /// remains in the new list the connection is preserved; otherwise it
    /// is gracefully closed and a new connection opened.
    pub fn update_addresses(&self, addresses: Vec<Address>) {
        let mut state = self.inner.state.lock().unwrap();
        if state.connectivity == ConnectivityState::Shutdown {
            return;
        }
        state.addresses = addresses.clone();

        match state.connectivity {
            ConnectivityState::Ready => {
                let keep = state
                    .connected_address
                    .as_ref()
                    .is_some_and(|current| addresses.contains(current));
                if keep {
                    return;
                }
                debug!(subchannel = self.inner.id, "connected address dropped from list");
                state.generation += 1;
                if let Some(transport) = state.transport.take() {
                    transport.graceful_close();
                }
                state.connected_address = None;
                let generation = state.generation;
                self.transition(&mut state, ConnectivityState::Connecting);
                state.connect_task = Some(self.spawn_dial(addresses, generation));
            }
            ConnectivityState::Connecting => {
                // Abandon the in-flight pass and start over on the new list.
                state.generation += 1;
                if let Some(task) = state.connect_task.take() {
                    task.abort();
                }
                let generation = state.generation;
                state.connect_task = Some(self.spawn_dial(addresses, generation));
            }
            // Idle and TransientFailure only record the list; the next
            // connect() uses it.
            _ => {}
        }
    }

    /// Shuts the subchannel down.  Idempotent; reports `Shutdown` once.
    pub(crate) fn shutdown(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.connectivity == ConnectivityState::Shutdown {
            return;
        }
        state.generation += 1;
        if let Some(task) = state.connect_task.take() {
            task.abort();
        }
        if let Some(transport) = state.transport.take() {
            transport.graceful_close();
        }
        state.connected_address = None;
        self.transition(&mut state, ConnectivityState::Shutdown);
    }

    /// The live transport, when `Ready`.
    pub(crate) fn ready_transport(&self) -> Option<Arc<dyn ClientTransport>> {
        let state = self.inner.state.lock().unwrap();
        if state.connectivity == ConnectivityState::Ready {
            state.transport.clone()
        } else {
            None
        }
    }

    /// The address of the live connection, when `Ready`.
    pub fn connected_address(&self) -> Option<Address> {
        self.inner.state.lock().unwrap().connected_address.clone()
    }

    /// The current connectivity state.
    pub fn state(&self) -> ConnectivityState {
        self.inner.state.lock().unwrap().connectivity
    }

    fn transition(&self, state: &mut InnerState, to: ConnectivityState) {
        if state.connectivity == to {
            return;
        }
        trace!(
            subchannel = self.inner.id,
            from = %state.connectivity,
            to = %to,
            "subchannel state change"
        );
        state.connectivity = to;
        let _ = self.inner.reporter.send((self.clone(), to));
    }

    fn spawn_dial(&self, addresses: Vec<Address>, generation: u64) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            this.dial(addresses, generation).await;
        })
    }

    async fn dial(self, addresses: Vec<Address>, generation: u64) {
        for address in &addresses {
            trace!(subchannel = self.inner.id, address = %address, "dialing");
            let result = self
                .inner
                .connector
                .connect(&address.address, &self.inner.connect_options)
                .await;
            match result {
                Ok(connected) => {
                    let mut state = self.inner.state.lock().unwrap();
                    if state.generation != generation {
                        // The attempt became stale while dialing; the
                        // connection belongs to nobody.
                        drop(state);
                        connected.transport.graceful_close();
                        return;
                    }
                    state.transport = Some(connected.transport);
                    state.connected_address = Some(address.clone());
                    state.connect_task = None;
                    self.transition(&mut state, ConnectivityState::Ready);
                    drop(state);
                    self.watch_disconnect(connected.disconnected, generation);
                    return;
                }
                Err(err) => {
                    debug!(
                        subchannel = self.inner.id,
                        address = %address,
                        error = %err,
                        "connect attempt failed"
                    );
                }
            }
        }
        let mut state = self.inner.state.lock().unwrap();
        if state.generation != generation {
            return;
        }
        state.connect_task = None;
        self.transition(&mut state, ConnectivityState::TransientFailure);
    }

    fn watch_disconnect(
        &self,
        disconnected: tokio::sync::oneshot::Receiver<
            Result<(), crate::client::transport::TransportError>,
        >,
        generation: u64,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let _ = disconnected.await;
            let mut state = this.inner.state.lock().unwrap();
            if state.generation != generation {
                return;
            }
            state.transport = None;
            state.connected_address = None;
            this.transition(&mut state, ConnectivityState::Idle);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::{
        CallHeader, ClientTransport, Connected, TransportError, TransportStream,
    };
    use crate::context::Context;
    use crate::status::Status;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct NopTransport;

    #[async_trait]
    impl ClientTransport for NopTransport {
        async fn new_stream(
            &self,
            _ctx: &Context,
            _call: &CallHeader,
        ) -> Result<Box<dyn TransportStream>, TransportError> {
            Err(TransportError::new(Status::internal("not a transport"), false))
        }

        fn graceful_close(&self) {}
    }

    struct ScriptedConnector {
        // Addresses that accept a connection; others fail.
        good: Vec<String>,
        disconnects: Mutex<Vec<oneshot::Sender<Result<(), TransportError>>>>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(
            &self,
            address: &str,
            _options: &ConnectOptions,
        ) -> Result<Connected, TransportError> {
            if self.good.iter().any(|a| a == address) {
                let (tx, rx) = oneshot::channel();
                self.disconnects.lock().unwrap().push(tx);
                Ok(Connected {
                    transport: Arc::new(NopTransport),
                    disconnected: rx,
                })
            } else {
                Err(TransportError::new(
                    Status::unavailable(format!("refused: {address}")),
                    true,
                ))
            }
        }
    }

    async fn next_state(
        rx: &mut mpsc::UnboundedReceiver<(Subchannel, ConnectivityState)>,
    ) -> ConnectivityState {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for state")
            .expect("reporter closed")
            .1
    }

    #[tokio::test]
    async fn connects_through_the_address_list_in_order() {
        let connector = Arc::new(ScriptedConnector {
            good: vec!["b:2".into()],
            disconnects: Mutex::default(),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sc = Subchannel::new(
            vec![Address::new("a:1"), Address::new("b:2")],
            connector,
            ConnectOptions::default(),
            tx,
        );
        assert_eq!(sc.state(), ConnectivityState::Idle);

        sc.connect();
        assert_eq!(next_state(&mut rx).await, ConnectivityState::Connecting);
        assert_eq!(next_state(&mut rx).await, ConnectivityState::Ready);
        assert_eq!(sc.connected_address(), Some(Address::new("b:2")));
        assert!(sc.ready_transport().is_some());
    }

    #[tokio::test]
    async fn all_addresses_failing_is_transient_failure() {
        let connector = Arc::new(ScriptedConnector {
            good: vec![],
            disconnects: Mutex::default(),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sc = Subchannel::new(
            vec![Address::new("a:1")],
            connector,
            ConnectOptions::default(),
            tx,
        );
        sc.connect();
        assert_eq!(next_state(&mut rx).await, ConnectivityState::Connecting);
        assert_eq!(
            next_state(&mut rx).await,
            ConnectivityState::TransientFailure
        );
        assert!(sc.ready_transport().is_none());
    }

    #[tokio::test]
    async fn disconnect_returns_to_idle_without_reconnecting() {
        let connector = Arc::new(ScriptedConnector {
            good: vec!["a:1".into()],
            disconnects: Mutex::default(),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sc = Subchannel::new(
            vec![Address::new("a:1")],
            connector.clone(),
            ConnectOptions::default(),
            tx,
        );
        sc.connect();
        assert_eq!(next_state(&mut rx).await, ConnectivityState::Connecting);
        assert_eq!(next_state(&mut rx).await, ConnectivityState::Ready);

        let disconnect = connector.disconnects.lock().unwrap().pop().unwrap();
        let _ = disconnect.send(Ok(()));
        assert_eq!(next_state(&mut rx).await, ConnectivityState::Idle);

        // No spontaneous reconnect from Idle.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sc.state(), ConnectivityState::Idle);
    }

    #[tokio::test]
    async fn update_addresses_preserves_live_connection() {
        let connector = Arc::new(ScriptedConnector {
            good: vec!["a:1".into(), "c:3".into()],
            disconnects: Mutex::default(),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sc = Subchannel::new(
            vec![Address::new("a:1")],
            connector,
            ConnectOptions::default(),
            tx,
        );
        sc.connect();
        assert_eq!(next_state(&mut rx).await, ConnectivityState::Connecting);
        assert_eq!(next_state(&mut rx).await, ConnectivityState::Ready);

        // Still contains the connected address: nothing happens.
        sc.update_addresses(vec![Address::new("a:1"), Address::new("b:2")]);
        assert_eq!(sc.state(), ConnectivityState::Ready);
        assert_eq!(sc.connected_address(), Some(Address::new("a:1")));

        // Connected address dropped: graceful close and re-dial.
        sc.update_addresses(vec![Address::new("c:3")]);
        assert_eq!(next_state(&mut rx).await, ConnectivityState::Connecting);
        assert_eq!(next_state(&mut rx).await, ConnectivityState::Ready);
        assert_eq!(sc.connected_address(), Some(Address::new("c:3")));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let connector = Arc::new(ScriptedConnector {
            good: vec![],
            disconnects: Mutex::default(),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sc = Subchannel::new(
            vec![Address::new("a:1")],
            connector,
            ConnectOptions::default(),
            tx,
        );
        sc.shutdown();
        sc.shutdown();
        assert_eq!(next_state(&mut rx).await, ConnectivityState::Shutdown);
        assert!(rx.try_recv().is_err());
    }
}
