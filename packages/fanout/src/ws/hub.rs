//! Hub actor
//!
//! The hub is the only owner of group membership. Register, unregister and
//! broadcast arrive as commands on one bounded channel and are applied one at
//! a time, so a broadcast never observes a half-updated member set.
//!
//! Each member's outbound queue sender lives only in the member map. Removing
//! a member drops that sender, which is the one and only way a client's queue
//! gets closed.

use anyhow::Result;
use bytes::Bytes;
use fanout_auth::Identity;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::HubConfig;
use crate::metrics::ServerMetrics;

use super::frame::TransportError;

pub type ClientId = Uuid;

/// Commands processed by the hub actor, strictly in arrival order.
#[derive(Debug)]
pub enum HubCommand {
    Register {
        client_id: ClientId,
        identity: Identity,
        queue: mpsc::Sender<Bytes>,
    },
    Unregister {
        client_id: ClientId,
    },
    Broadcast {
        payload: Bytes,
        /// Member that produced the payload, if any
        origin: Option<ClientId>,
    },
    Members {
        respond_to: oneshot::Sender<Vec<ClientId>>,
    },
}

/// Handle to communicate with the hub actor
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub async fn register(
        &self,
        client_id: ClientId,
        identity: Identity,
        queue: mpsc::Sender<Bytes>,
    ) -> Result<()> {
        self.send(HubCommand::Register {
            client_id,
            identity,
            queue,
        })
        .await
    }

    /// Remove a client and close its queue. Safe to call more than once.
    pub async fn unregister(&self, client_id: ClientId) -> Result<()> {
        self.send(HubCommand::Unregister { client_id }).await
    }

    /// Fan a payload out to every member. Used by request handlers.
    pub async fn broadcast(&self, payload: Bytes) -> Result<()> {
        self.send(HubCommand::Broadcast {
            payload,
            origin: None,
        })
        .await
    }

    /// Fan out a payload that a registered client sent.
    pub async fn broadcast_from(&self, origin: ClientId, payload: Bytes) -> Result<()> {
        self.send(HubCommand::Broadcast {
            payload,
            origin: Some(origin),
        })
        .await
    }

    /// Current member ids, observed in order with all earlier commands.
    pub async fn members(&self) -> Result<Vec<ClientId>> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::Members { respond_to: tx }).await?;
        rx.await
            .map_err(|_| anyhow::anyhow!("Hub didn't respond"))
    }

    /// A handle whose hub has already stopped.
    #[cfg(test)]
    pub fn detached() -> Self {
        let (sender, _) = mpsc::channel(1);
        Self { sender }
    }

    async fn send(&self, cmd: HubCommand) -> Result<()> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| anyhow::anyhow!("Hub is gone"))
    }
}

struct Member {
    identity: Identity,
    queue: mpsc::Sender<Bytes>,
}

/// The hub actor that owns the member set
pub struct Hub {
    config: HubConfig,
    receiver: mpsc::Receiver<HubCommand>,
    members: HashMap<ClientId, Member>,
    metrics: Arc<ServerMetrics>,
}

impl Hub {
    /// Spawn the hub actor and return its handle.
    ///
    /// The actor runs until every handle has been dropped.
    pub fn spawn(config: HubConfig, metrics: Arc<ServerMetrics>) -> HubHandle {
        let (sender, receiver) = mpsc::channel(config.command_capacity);
        let hub = Hub {
            config,
            receiver,
            members: HashMap::new(),
            metrics,
        };
        tokio::spawn(hub.run());
        HubHandle { sender }
    }

    async fn run(mut self) {
        debug!(
            "Hub started (echo_to_sender={})",
            self.config.echo_to_sender
        );

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                HubCommand::Register {
                    client_id,
                    identity,
                    queue,
                } => {
                    info!(
                        client_id = %client_id,
                        user = %identity,
                        members = self.members.len() + 1,
                        "Client registered"
                    );
                    self.members.insert(client_id, Member { identity, queue });
                }

                HubCommand::Unregister { client_id } => {
                    if let Some(member) = self.members.remove(&client_id) {
                        info!(
                            client_id = %client_id,
                            user = %member.identity,
                            members = self.members.len(),
                            "Client unregistered"
                        );
                    }
                }

                HubCommand::Broadcast { payload, origin } => {
                    self.fan_out(payload, origin);
                }

                HubCommand::Members { respond_to } => {
                    let _ = respond_to.send(self.members.keys().copied().collect());
                }
            }
        }

        debug!("Hub stopped with {} members", self.members.len());
    }

    fn fan_out(&mut self, payload: Bytes, origin: Option<ClientId>) {
        self.metrics.broadcast();

        let mut evicted = Vec::new();
        for (client_id, member) in &self.members {
            if !self.config.echo_to_sender && origin == Some(*client_id) {
                continue;
            }
            match member.queue.try_send(payload.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        client_id = %client_id,
                        user = %member.identity,
                        error = %TransportError::SlowConsumer,
                        "Evicting slow consumer"
                    );
                    self.metrics.slow_consumer_evicted();
                    evicted.push(*client_id);
                }
                Err(TrySendError::Closed(_)) => {
                    // Write loop already gone; unregister is on its way.
                    debug!(client_id = %client_id, "Dropping member with closed queue");
                    evicted.push(*client_id);
                }
            }
        }

        for client_id in evicted {
            self.members.remove(&client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn spawn_hub(echo_to_sender: bool) -> HubHandle {
        Hub::spawn(
            HubConfig {
                command_capacity: 64,
                echo_to_sender,
            },
            Arc::new(ServerMetrics::new()),
        )
    }

    async fn join(
        hub: &HubHandle,
        name: &str,
        capacity: usize,
    ) -> (ClientId, mpsc::Receiver<Bytes>) {
        let client_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(capacity);
        hub.register(client_id, Identity::new(name), tx)
            .await
            .unwrap();
        (client_id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok(b) = rx.try_recv() {
            out.push(b);
        }
        out
    }

    #[tokio::test]
    async fn register_and_unregister_track_membership() {
        let hub = spawn_hub(true);
        let (a, _rx_a) = join(&hub, "alice", 4).await;
        let (b, _rx_b) = join(&hub, "bob", 4).await;

        let members: HashSet<_> = hub.members().await.unwrap().into_iter().collect();
        assert_eq!(members, HashSet::from([a, b]));

        hub.unregister(a).await.unwrap();
        assert_eq!(hub.members().await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member_in_order() {
        let hub = spawn_hub(true);
        let (_a, mut rx_a) = join(&hub, "alice", 16).await;
        let (_b, mut rx_b) = join(&hub, "bob", 16).await;
        let (_c, mut rx_c) = join(&hub, "carol", 16).await;

        for payload in ["one", "two", "three"] {
            hub.broadcast(Bytes::from_static(payload.as_bytes()))
                .await
                .unwrap();
        }
        hub.members().await.unwrap();

        let expected = vec![
            Bytes::from_static(b"one"),
            Bytes::from_static(b"two"),
            Bytes::from_static(b"three"),
        ];
        assert_eq!(drain(&mut rx_a), expected);
        assert_eq!(drain(&mut rx_b), expected);
        assert_eq!(drain(&mut rx_c), expected);
    }

    #[tokio::test]
    async fn unregister_closes_queue_and_is_idempotent() {
        let hub = spawn_hub(true);
        let (a, mut rx_a) = join(&hub, "alice", 4).await;
        let (_b, mut rx_b) = join(&hub, "bob", 4).await;

        hub.unregister(a).await.unwrap();
        hub.unregister(a).await.unwrap();
        assert_eq!(rx_a.recv().await, None);

        // Hub keeps serving the others after the double unregister.
        hub.broadcast(Bytes::from_static(b"still here")).await.unwrap();
        assert_eq!(rx_b.recv().await, Some(Bytes::from_static(b"still here")));
        assert_eq!(hub.members().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn full_queue_evicts_only_the_slow_consumer() {
        let metrics = Arc::new(ServerMetrics::new());
        let hub = Hub::spawn(HubConfig::default(), metrics.clone());
        let (slow, mut rx_slow) = join(&hub, "slow", 1).await;
        let (fast, mut rx_fast) = join(&hub, "fast", 8).await;

        hub.broadcast(Bytes::from_static(b"1")).await.unwrap();
        hub.broadcast(Bytes::from_static(b"2")).await.unwrap();
        hub.broadcast(Bytes::from_static(b"3")).await.unwrap();

        assert_eq!(hub.members().await.unwrap(), vec![fast]);
        assert!(!hub.members().await.unwrap().contains(&slow));

        // Whatever was queued before eviction drains, then the queue is closed.
        assert_eq!(rx_slow.recv().await, Some(Bytes::from_static(b"1")));
        assert_eq!(rx_slow.recv().await, None);

        assert_eq!(drain(&mut rx_fast).len(), 3);
        assert_eq!(
            metrics
                .slow_consumer_evictions
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn sender_receives_own_broadcast_by_default() {
        let hub = spawn_hub(true);
        let (a, mut rx_a) = join(&hub, "alice", 4).await;
        let (_b, mut rx_b) = join(&hub, "bob", 4).await;

        hub.broadcast_from(a, Bytes::from_static(b"hi")).await.unwrap();
        hub.members().await.unwrap();

        assert_eq!(drain(&mut rx_a), vec![Bytes::from_static(b"hi")]);
        assert_eq!(drain(&mut rx_b), vec![Bytes::from_static(b"hi")]);
    }

    #[tokio::test]
    async fn echo_disabled_skips_origin() {
        let hub = spawn_hub(false);
        let (a, mut rx_a) = join(&hub, "alice", 4).await;
        let (_b, mut rx_b) = join(&hub, "bob", 4).await;

        hub.broadcast_from(a, Bytes::from_static(b"hi")).await.unwrap();
        hub.broadcast(Bytes::from_static(b"from rest")).await.unwrap();
        hub.members().await.unwrap();

        assert_eq!(drain(&mut rx_a), vec![Bytes::from_static(b"from rest")]);
        assert_eq!(
            drain(&mut rx_b),
            vec![Bytes::from_static(b"hi"), Bytes::from_static(b"from rest")]
        );
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_broadcast() {
        let hub = spawn_hub(true);
        let (_a, rx_a) = join(&hub, "alice", 4).await;
        drop(rx_a);

        hub.broadcast(Bytes::from_static(b"x")).await.unwrap();
        assert!(hub.members().await.unwrap().is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(usize),
        Unregister(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..6usize).prop_map(Op::Register),
            (0..6usize).prop_map(Op::Unregister),
        ]
    }

    proptest! {
        #[test]
        fn membership_matches_registered_minus_unregistered(ops in prop::collection::vec(op(), 0..40)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let hub = spawn_hub(true);
                let ids: Vec<ClientId> = (0..6).map(|_| Uuid::new_v4()).collect();
                let mut ever_registered = HashSet::new();
                let mut expected = HashSet::new();
                let mut receivers = Vec::new();

                for op in ops {
                    match op {
                        Op::Register(i) => {
                            // Each client registers at most once in its lifetime.
                            if ever_registered.insert(i) {
                                let (tx, rx) = mpsc::channel(4);
                                hub.register(ids[i], Identity::new(format!("user-{i}")), tx)
                                    .await
                                    .unwrap();
                                receivers.push(rx);
                                expected.insert(ids[i]);
                            }
                        }
                        Op::Unregister(i) => {
                            hub.unregister(ids[i]).await.unwrap();
                            expected.remove(&ids[i]);
                        }
                    }
                }

                let actual: HashSet<_> = hub.members().await.unwrap().into_iter().collect();
                assert_eq!(actual, expected);
            });
        }
    }
}
