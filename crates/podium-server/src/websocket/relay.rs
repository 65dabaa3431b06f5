//! Broadcast fan-out from one sender to every registered connection.
//!
//! A broadcast snapshots the registry, releases the lock, and enqueues the
//! shared payload onto each recipient's outbound queue with `try_send`, so a
//! slow or dead recipient never stalls delivery to the others. Recipients
//! whose queue is closed are removed on the spot; recipients whose queue is
//! full accumulate drops and are removed once they reach the configured
//! ceiling.

use std::sync::Arc;

use metrics::counter;
use podium_core::ConnectionId;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use super::message::RelayMessage;
use super::registry::ConnectionRegistry;
use crate::config::ServerConfig;
use crate::errors::DeliveryError;
use crate::metrics::{
    WS_BROADCAST_DROPS_TOTAL, WS_BROADCAST_REMOVALS_TOTAL, WS_MESSAGES_RELAYED_TOTAL,
};

/// Delivery knobs for [`BroadcastRelay`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayPolicy {
    /// Whether the originating connection receives its own message.
    pub echo_to_sender: bool,
    /// Lifetime full-queue drops after which a recipient is removed.
    pub max_dropped_messages: u64,
}

impl RelayPolicy {
    /// Policy taken from the server configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            echo_to_sender: config.echo_to_sender,
            max_dropped_messages: config.max_dropped_messages,
        }
    }
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            echo_to_sender: true,
            max_dropped_messages: 100,
        }
    }
}

/// Outcome of one broadcast.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections in the snapshot that were offered the message.
    pub recipients: usize,
    /// Deliveries that made it onto a queue.
    pub delivered: usize,
    /// Recipients whose queue was full for this message.
    pub dropped: Vec<ConnectionId>,
    /// Recipients removed from the registry during this broadcast.
    pub removed: Vec<ConnectionId>,
}

/// Relays messages to all registered connections.
pub struct BroadcastRelay {
    registry: Arc<ConnectionRegistry>,
    policy: RelayPolicy,
}

impl BroadcastRelay {
    /// Create a relay over a registry.
    pub fn new(registry: Arc<ConnectionRegistry>, policy: RelayPolicy) -> Self {
        Self { registry, policy }
    }

    /// Registry this relay delivers to.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Active delivery policy.
    pub fn policy(&self) -> RelayPolicy {
        self.policy
    }

    /// Deliver `message` to every connection registered right now.
    ///
    /// `origin` is the sending connection, skipped when echo is disabled.
    /// Connections that join after the snapshot do not receive this message;
    /// connections that leave after it may still be offered it, which the
    /// closed state turns into a removal no-op.
    pub async fn broadcast(
        &self,
        origin: Option<&ConnectionId>,
        message: &RelayMessage,
    ) -> BroadcastReport {
        let snapshot = self.registry.snapshot().await;
        let payload = message.payload();
        let mut report = BroadcastReport::default();
        let mut to_remove: Vec<Arc<ClientConnection>> = Vec::new();

        for conn in snapshot.iter() {
            if !self.policy.echo_to_sender && origin == Some(&conn.id) {
                continue;
            }
            report.recipients += 1;
            match conn.send(Arc::clone(&payload)) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Full { total_drops }) => {
                    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    report.dropped.push(conn.id.clone());
                    if total_drops >= self.policy.max_dropped_messages {
                        warn!(
                            conn_id = %conn.id,
                            total_drops,
                            "removing slow client after repeated drops"
                        );
                        to_remove.push(Arc::clone(conn));
                    } else {
                        debug!(conn_id = %conn.id, total_drops, "outbound queue full, message dropped");
                    }
                }
                Err(DeliveryError::Closed) => {
                    debug!(conn_id = %conn.id, "recipient closed, removing");
                    to_remove.push(Arc::clone(conn));
                }
            }
        }

        if report.delivered > 0 {
            counter!(WS_MESSAGES_RELAYED_TOTAL).increment(report.delivered as u64);
        }

        for conn in to_remove {
            // Another broadcast or the owning loop may have removed it first.
            if self.registry.remove(&conn.id).await.is_some() {
                counter!(WS_BROADCAST_REMOVALS_TOTAL).increment(1);
                report.removed.push(conn.id.clone());
            }
            let _ = conn.close();
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    async fn join(
        registry: &ConnectionRegistry,
        id: &str,
        capacity: usize,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(ClientConnection::new(id.into(), tx, CancellationToken::new()));
        assert!(conn.activate());
        assert!(registry.add(Arc::clone(&conn)).await);
        (conn, rx)
    }

    fn relay(registry: &Arc<ConnectionRegistry>, policy: RelayPolicy) -> BroadcastRelay {
        BroadcastRelay::new(Arc::clone(registry), policy)
    }

    fn ping() -> RelayMessage {
        RelayMessage::from_value(&json!({"type": "ping"})).unwrap()
    }

    #[tokio::test]
    async fn every_connection_receives_including_sender() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, mut rx_a) = join(&registry, "a", 8).await;
        let (_b, mut rx_b) = join(&registry, "b", 8).await;
        let (_c, mut rx_c) = join(&registry, "c", 8).await;
        let relay = relay(&registry, RelayPolicy::default());

        let msg = ping();
        let report = relay.broadcast(Some(&"a".into()), &msg).await;
        assert_eq!(report.recipients, 3);
        assert_eq!(report.delivered, 3);
        assert!(report.dropped.is_empty());

        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            let got = rx.try_recv().unwrap();
            let value: serde_json::Value = serde_json::from_str(&got).unwrap();
            assert_eq!(value, json!({"type": "ping"}));
            // Exactly one copy each
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn echo_disabled_skips_sender() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, mut rx_a) = join(&registry, "a", 8).await;
        let (_b, mut rx_b) = join(&registry, "b", 8).await;
        let relay = relay(
            &registry,
            RelayPolicy {
                echo_to_sender: false,
                ..RelayPolicy::default()
            },
        );

        let report = relay.broadcast(Some(&"a".into()), &ping()).await;
        assert_eq!(report.recipients, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn departed_connection_is_not_a_recipient() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, mut rx_a) = join(&registry, "a", 8).await;
        let (_b, mut rx_b) = join(&registry, "b", 8).await;
        let relay = relay(&registry, RelayPolicy::default());

        let _ = registry.remove(&a.id).await;
        let _ = a.close();

        let msg = RelayMessage::parse(r#"{"x":1}"#).unwrap();
        let report = relay.broadcast(Some(&"b".into()), &msg).await;
        assert_eq!(report.recipients, 1);
        assert_eq!(&*rx_b.try_recv().unwrap(), r#"{"x":1}"#);
        assert!(rx_a.try_recv().is_err());
        assert!(report.removed.is_empty());
    }

    #[tokio::test]
    async fn broken_recipient_is_removed_and_others_still_receive() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, mut rx_a) = join(&registry, "a", 8).await;
        let (b, rx_b) = join(&registry, "b", 8).await;
        let (_c, mut rx_c) = join(&registry, "c", 8).await;
        let relay = relay(&registry, RelayPolicy::default());

        // B's writer is gone
        drop(rx_b);

        let report = relay.broadcast(Some(&"a".into()), &ping()).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.removed, vec![ConnectionId::from("b")]);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
        assert!(b.is_closed());
        assert!(!registry.contains(&"b".into()).await);
        assert_eq!(registry.connection_count(), 2);
    }

    #[tokio::test]
    async fn slow_recipient_drops_then_is_removed_at_threshold() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_fast, mut rx_fast) = join(&registry, "fast", 64).await;
        let (slow, _rx_slow) = join(&registry, "slow", 1).await;
        let relay = relay(
            &registry,
            RelayPolicy {
                echo_to_sender: true,
                max_dropped_messages: 3,
            },
        );

        // First fills the slow queue, next two are drops below the ceiling
        for _ in 0..3 {
            let report = relay.broadcast(None, &ping()).await;
            assert!(report.removed.is_empty());
        }
        assert_eq!(slow.drop_count(), 2);
        assert!(registry.contains(&slow.id).await);

        let report = relay.broadcast(None, &ping()).await;
        assert_eq!(report.dropped, vec![slow.id.clone()]);
        assert_eq!(report.removed, vec![slow.id.clone()]);
        assert!(slow.is_closed());

        // The fast recipient got every message
        let mut received = 0;
        while rx_fast.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 4);
    }

    #[tokio::test]
    async fn payload_is_shared_across_recipients() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, mut rx_a) = join(&registry, "a", 8).await;
        let (_b, mut rx_b) = join(&registry, "b", 8).await;
        let relay = relay(&registry, RelayPolicy::default());

        let msg = ping();
        let _ = relay.broadcast(None, &msg).await;
        let got_a = rx_a.try_recv().unwrap();
        let got_b = rx_b.try_recv().unwrap();
        assert!(Arc::ptr_eq(&got_a, &got_b));
    }

    #[tokio::test]
    async fn messages_from_one_sender_arrive_in_order() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, _rx_a) = join(&registry, "a", 64).await;
        let (_b, mut rx_b) = join(&registry, "b", 64).await;
        let relay = relay(&registry, RelayPolicy::default());

        for i in 0..10 {
            let msg = RelayMessage::from_value(&json!({"seq": i})).unwrap();
            let _ = relay.broadcast(Some(&"a".into()), &msg).await;
        }
        for i in 0..10 {
            let got = rx_b.try_recv().unwrap();
            let value: serde_json::Value = serde_json::from_str(&got).unwrap();
            assert_eq!(value["seq"], i);
        }
    }

    #[tokio::test]
    async fn broadcast_to_empty_registry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = relay(&registry, RelayPolicy::default());
        let report = relay.broadcast(None, &ping()).await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn late_joiner_misses_earlier_messages() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, _rx_a) = join(&registry, "a", 8).await;
        let relay = relay(&registry, RelayPolicy::default());

        let _ = relay.broadcast(Some(&"a".into()), &ping()).await;
        let (_d, mut rx_d) = join(&registry, "d", 8).await;
        assert!(rx_d.try_recv().is_err());

        let _ = relay.broadcast(Some(&"a".into()), &ping()).await;
        assert!(rx_d.try_recv().is_ok());
    }

    #[tokio::test]
    async fn concurrent_broadcasts_deliver_everything() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut receivers = Vec::new();
        for i in 0..4 {
            let (_conn, rx) = join(&registry, &format!("c{i}"), 256).await;
            receivers.push(rx);
        }
        let relay = Arc::new(relay(&registry, RelayPolicy::default()));

        let mut handles = Vec::new();
        for sender in 0..4 {
            let relay = Arc::clone(&relay);
            handles.push(tokio::spawn(async move {
                let origin = ConnectionId::from(format!("c{sender}").as_str());
                for seq in 0..20 {
                    let msg =
                        RelayMessage::from_value(&json!({"from": sender, "seq": seq})).unwrap();
                    let _ = relay.broadcast(Some(&origin), &msg).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for rx in &mut receivers {
            let mut last_seq = [-1_i64; 4];
            let mut total = 0;
            while let Ok(got) = rx.try_recv() {
                let value: serde_json::Value = serde_json::from_str(&got).unwrap();
                let from = usize::try_from(value["from"].as_u64().unwrap()).unwrap();
                let seq = value["seq"].as_i64().unwrap();
                // Per-sender order holds even with interleaving
                assert!(seq > last_seq[from]);
                last_seq[from] = seq;
                total += 1;
            }
            assert_eq!(total, 80);
        }
    }

    #[tokio::test]
    async fn closed_member_still_in_registry_is_removed_once() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, mut rx_a) = join(&registry, "a", 8).await;
        let (b, mut rx_b) = join(&registry, "b", 8).await;
        let (_c, mut rx_c) = join(&registry, "c", 8).await;
        let relay = relay(&registry, RelayPolicy::default());

        // Heartbeat closed B; its owning loop has not removed it yet
        assert!(b.close());

        let report = relay.broadcast(Some(&"a".into()), &ping()).await;
        assert_eq!(report.recipients, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.removed, vec![ConnectionId::from("b")]);
        assert!(rx_b.try_recv().is_err());
        for rx in [&mut rx_a, &mut rx_c] {
            assert!(rx.try_recv().is_ok());
            assert!(rx.try_recv().is_err());
        }

        // The owner's own removal is now a no-op
        assert!(registry.remove(&b.id).await.is_none());
        let report = relay.broadcast(Some(&"a".into()), &ping()).await;
        assert_eq!(report.recipients, 2);
        assert!(report.removed.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn removals_during_broadcasts_skip_and_duplicate_nothing() {
        const MESSAGES: i64 = 200;
        let registry = Arc::new(ConnectionRegistry::new());
        let mut stayers = Vec::new();
        let mut leavers = Vec::new();
        for i in 0..10 {
            let (conn, rx) = join(&registry, &format!("m{i}"), 512).await;
            if i % 2 == 0 {
                stayers.push(rx);
            } else {
                leavers.push((conn, rx));
            }
        }
        let relay = Arc::new(relay(&registry, RelayPolicy::default()));

        let sender = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move {
                let mut reports = Vec::new();
                for seq in 0..MESSAGES {
                    let msg = RelayMessage::from_value(&json!({"seq": seq})).unwrap();
                    reports.push(relay.broadcast(None, &msg).await);
                    tokio::task::yield_now().await;
                }
                reports
            })
        };

        // Leavers depart mid-stream, some removed before close (owning loop
        // teardown) and some closed before removal (heartbeat timeout)
        let departures: Vec<_> = leavers
            .iter()
            .enumerate()
            .map(|(n, (conn, _))| {
                let registry = Arc::clone(&registry);
                let conn = Arc::clone(conn);
                tokio::spawn(async move {
                    for _ in 0..n * 5 {
                        tokio::task::yield_now().await;
                    }
                    if n % 2 == 0 {
                        let _ = registry.remove(&conn.id).await;
                        let _ = conn.close();
                    } else {
                        let _ = conn.close();
                        let _ = registry.remove(&conn.id).await;
                    }
                })
            })
            .collect();

        for departure in departures {
            departure.await.unwrap();
        }
        let reports = sender.await.unwrap();

        // Every stayer got every message exactly once, in order
        for rx in &mut stayers {
            for seq in 0..MESSAGES {
                let got = rx.try_recv().unwrap();
                let value: serde_json::Value = serde_json::from_str(&got).unwrap();
                assert_eq!(value["seq"], seq);
            }
            assert!(rx.try_recv().is_err());
        }

        // Leavers got a gap-free prefix with no duplicates
        for (_, rx) in &mut leavers {
            let mut expected = 0;
            while let Ok(got) = rx.try_recv() {
                let value: serde_json::Value = serde_json::from_str(&got).unwrap();
                assert_eq!(value["seq"], expected);
                expected += 1;
            }
            assert!(expected <= MESSAGES);
        }

        // A leaver is reported removed by at most one broadcast, and only leavers are
        let removed: Vec<ConnectionId> = reports.iter().flat_map(|r| r.removed.clone()).collect();
        let leaver_ids: Vec<ConnectionId> = leavers.iter().map(|(c, _)| c.id.clone()).collect();
        for id in &removed {
            assert!(leaver_ids.contains(id));
            assert_eq!(removed.iter().filter(|r| *r == id).count(), 1);
        }
        assert_eq!(registry.connection_count(), 5);
        assert!(leavers.iter().all(|(c, _)| c.is_closed()));
    }

    #[test]
    fn policy_from_config() {
        let config = ServerConfig {
            echo_to_sender: false,
            max_dropped_messages: 7,
            ..ServerConfig::default()
        };
        let policy = RelayPolicy::from_config(&config);
        assert!(!policy.echo_to_sender);
        assert_eq!(policy.max_dropped_messages, 7);
    }
}
