use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use porter_core::{MessageBus, OutboundEnvelope, Result};
use tracing::info;

/// Trait implemented by each channel adapter. Adapters own their polling
/// or receiving tasks and publish [`porter_core::InboundEnvelope`]s onto
/// the bus; the gateway delivers replies through [`Channel::send`].
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name; outbound envelopes with this `channel` value are
    /// routed here.
    fn name(&self) -> &str;

    /// Start receiving. Must not block.
    async fn start(&self) -> Result<()>;

    /// Stop receiving and release resources.
    async fn stop(&self) -> Result<()>;

    /// Deliver one outbound envelope.
    async fn send(&self, msg: &OutboundEnvelope) -> Result<()>;
}

/// Holds adapter instances and wires each one's `send` side into the bus
/// dispatcher under the adapter's channel name.
pub struct ChannelManager {
    bus: Arc<MessageBus>,
    channels: Mutex<Vec<Arc<dyn Channel>>>,
}

impl ChannelManager {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            bus,
            channels: Mutex::new(Vec::new()),
        }
    }

    pub fn add_channel(&self, channel: Arc<dyn Channel>) {
        let subscriber_channel = Arc::clone(&channel);
        self.bus.subscribe_outbound(
            channel.name(),
            Arc::new(move |msg: OutboundEnvelope| {
                let channel = Arc::clone(&subscriber_channel);
                async move { channel.send(&msg).await }.boxed()
            }),
        );
        self.channels.lock().push(channel);
    }

    pub async fn start_all(&self) -> Result<()> {
        let channels: Vec<Arc<dyn Channel>> = self.channels.lock().clone();
        for channel in channels {
            info!(channel = channel.name(), "starting channel adapter");
            channel.start().await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        let channels: Vec<Arc<dyn Channel>> = self.channels.lock().clone();
        for channel in channels {
            info!(channel = channel.name(), "stopping channel adapter");
            let _ = channel.stop().await;
        }
    }

    pub fn enabled_channels(&self) -> Vec<String> {
        self.channels
            .lock()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct StubChannel {
        name: String,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Channel for StubChannel {
        fn name(&self) -> &str {
            &self.name
        }
        async fn start(&self) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
        async fn send(&self, msg: &OutboundEnvelope) -> Result<()> {
            self.sent.lock().push(msg.content.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_outbound_routes_to_matching_adapter() {
        let bus = Arc::new(MessageBus::new());
        let manager = ChannelManager::new(Arc::clone(&bus));

        let telegram = Arc::new(StubChannel {
            name: "telegram".into(),
            sent: Mutex::new(Vec::new()),
        });
        let slack = Arc::new(StubChannel {
            name: "slack".into(),
            sent: Mutex::new(Vec::new()),
        });
        manager.add_channel(Arc::clone(&telegram) as Arc<dyn Channel>);
        manager.add_channel(Arc::clone(&slack) as Arc<dyn Channel>);
        assert_eq!(manager.enabled_channels(), vec!["telegram", "slack"]);

        bus.start_dispatcher();
        bus.publish_outbound(OutboundEnvelope::new("telegram", "c1", "for telegram"))
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        bus.stop_dispatcher().await;

        assert_eq!(*telegram.sent.lock(), vec!["for telegram".to_string()]);
        assert!(slack.sent.lock().is_empty());
    }
}
