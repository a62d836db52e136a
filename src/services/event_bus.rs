// src/services/event_bus.rs
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{RwLock, broadcast};

use crate::{
    errors::RideResult,
    models::events::{Channel, RideEvent},
};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Where the dispatch core sends notifications. Delivery is best-effort:
/// implementations report how many live receivers got the event and never
/// buffer for absent ones.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, channel: &Channel, event: RideEvent) -> RideResult<usize>;
}

/// In-process relay: one broadcast channel per connected rider/driver.
pub struct EventBus {
    capacity: usize,
    channels: RwLock<HashMap<Channel, broadcast::Sender<RideEvent>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Events published after this returns are delivered to the receiver, in
    /// publish order. Nothing published earlier is replayed.
    pub async fn subscribe(&self, channel: Channel) -> broadcast::Receiver<RideEvent> {
        let mut channels = self.channels.write().await;
        tracing::debug!("New subscriber on {}", channel);
        channels
            .entry(channel)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub async fn subscriber_count(&self, channel: &Channel) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Drops channels nobody listens to any more.
    pub async fn prune(&self) -> usize {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[async_trait]
impl EventSink for EventBus {
    async fn publish(&self, channel: &Channel, event: RideEvent) -> RideResult<usize> {
        let channels = self.channels.read().await;
        let Some(sender) = channels.get(channel) else {
            tracing::debug!("No subscriber on {} for {}", channel, event.kind());
            return Ok(0);
        };

        let kind = event.kind();
        match sender.send(event) {
            Ok(delivered) => {
                tracing::debug!("Delivered {} to {} receiver(s) on {}", kind, delivered, channel);
                Ok(delivered)
            }
            // Every receiver went away between subscribe and now
            Err(_) => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ride::RideStatus;

    fn status_event(ride_id: &str, status: RideStatus) -> RideEvent {
        RideEvent::RideStatusChanged {
            ride_id: ride_id.to_string(),
            status,
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_is_not_an_error() {
        let bus = EventBus::default();
        let delivered = bus
            .publish(&Channel::rider("usr-1"), status_event("r1", RideStatus::Arrived))
            .await
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_delivery_preserves_order_within_channel() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe(Channel::rider("usr-1")).await;

        for status in [RideStatus::Accepted, RideStatus::Arrived, RideStatus::InProgress] {
            assert_eq!(
                bus.publish(&Channel::rider("usr-1"), status_event("r1", status))
                    .await
                    .unwrap(),
                1
            );
        }

        assert_eq!(rx.recv().await.unwrap(), status_event("r1", RideStatus::Accepted));
        assert_eq!(rx.recv().await.unwrap(), status_event("r1", RideStatus::Arrived));
        assert_eq!(rx.recv().await.unwrap(), status_event("r1", RideStatus::InProgress));
    }

    #[tokio::test]
    async fn test_channels_are_isolated_by_role_and_id() {
        let bus = EventBus::default();
        let mut rider = bus.subscribe(Channel::rider("same-id")).await;
        let mut driver = bus.subscribe(Channel::driver("same-id")).await;

        bus.publish(&Channel::driver("same-id"), status_event("r1", RideStatus::Arrived))
            .await
            .unwrap();

        assert!(driver.try_recv().is_ok());
        assert!(rider.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_replay_and_prune() {
        let bus = EventBus::default();
        let channel = Channel::driver("drv-1");

        let early = bus.subscribe(channel.clone()).await;
        drop(early);
        // Subscribed channel with no live receivers
        assert_eq!(
            bus.publish(&channel, status_event("r1", RideStatus::Accepted)).await.unwrap(),
            0
        );

        let mut late = bus.subscribe(channel.clone()).await;
        assert!(late.try_recv().is_err());
        assert_eq!(bus.subscriber_count(&channel).await, 1);

        drop(late);
        assert_eq!(bus.prune().await, 1);
        assert_eq!(bus.subscriber_count(&channel).await, 0);
    }
}
