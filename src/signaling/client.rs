//! MQTT signaling client
//!
//! Owns the broker session: connection options, the event-loop task, and
//! the teardown handshake. Subscriptions are (re)issued on every ConnAck
//! so an automatic reconnect restores the whole topic surface.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::error::SignalingError;
use crate::producer::VideoProducer;
use crate::registry::PeerRegistry;

use super::bridge::{Publisher, SignalingBridge};
use super::topics::TopicSchema;

/// Requests buffered toward the broker
const REQUEST_CAPACITY: usize = 64;

/// Publisher backed by the live MQTT client
struct MqttPublisher {
    client: AsyncClient,
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) {
        if let Err(e) = self
            .client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
        {
            tracing::warn!(topic = %topic, error = %e, "Publish failed");
        }
    }
}

/// A connected signaling session
pub struct SignalingClient {
    client: AsyncClient,
    bridge: Arc<SignalingBridge>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
    drain: Duration,
}

impl SignalingClient {
    /// Connect to the broker and start routing signaling traffic.
    ///
    /// Returns once the broker has acknowledged the connection, or fails
    /// after `connect_timeout`.
    pub async fn connect(
        config: Arc<StreamConfig>,
        registry: Arc<PeerRegistry>,
        producer: VideoProducer,
    ) -> Result<Self, SignalingError> {
        let (client, event_loop) = AsyncClient::new(mqtt_options(&config), REQUEST_CAPACITY);

        let publisher: Arc<dyn Publisher> = Arc::new(MqttPublisher { client: client.clone() });
        let bridge = Arc::new(SignalingBridge::new(
            TopicSchema::new(&config.thing_name),
            registry,
            producer,
            Arc::clone(&config),
            publisher,
        ));

        let token = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(run_event_loop(
            event_loop,
            client.clone(),
            Arc::clone(&bridge),
            ready_tx,
            token.child_token(),
        ));

        tracing::info!(
            broker = %config.broker_host,
            port = config.broker_port,
            "Connecting to MQTT broker"
        );

        match tokio::time::timeout(config.connect_timeout, ready_rx).await {
            Ok(Ok(())) => {}
            _ => {
                token.cancel();
                task.abort();
                return Err(SignalingError::ConnectTimeout);
            }
        }

        Ok(Self {
            client,
            bridge,
            token,
            task: Some(task),
            drain: config.disconnect_drain,
        })
    }

    pub fn bridge(&self) -> &Arc<SignalingBridge> {
        &self.bridge
    }

    /// Announce departure, give the broker time to flush, then tear the
    /// connection down.
    pub async fn shutdown(mut self) {
        self.bridge.publish_disconnect_tractor();
        tokio::time::sleep(self.drain).await;

        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "MQTT disconnect");
        }

        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        tracing::info!("Signaling client stopped");
    }
}

/// Broker options: QoS 0 signaling over a clean session with a 60 s
/// keep-alive, auto-reconnect driven by the poll loop
fn mqtt_options(config: &StreamConfig) -> MqttOptions {
    let mut options = MqttOptions::new(
        config.client_id.clone(),
        config.broker_host.clone(),
        config.broker_port,
    );
    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(true);
    if !config.username.is_empty() {
        options.set_credentials(config.username.clone(), config.password.clone());
    }
    options
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    bridge: Arc<SignalingBridge>,
    ready_tx: oneshot::Sender<()>,
    stop: CancellationToken,
) {
    let mut ready = Some(ready_tx);

    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("Connected to MQTT broker");
                subscribe_all(&client, bridge.topics()).await;
                if let Some(tx) = ready.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                bridge.handle_message(&publish.topic, &publish.payload).await;
            }
            Ok(_) => {}
            Err(e) => {
                if stop.is_cancelled() {
                    break;
                }
                tracing::warn!(error = %e, "MQTT connection lost, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn subscribe_all(client: &AsyncClient, topics: &TopicSchema) {
    let filters = [
        topics.offer_filter(),
        topics.remote_candidate_filter(),
        topics.disconnect_filter(),
        topics.camera_topic(),
    ];

    for filter in filters {
        match client.subscribe(&filter, QoS::AtMostOnce).await {
            Ok(()) => tracing::debug!(filter = %filter, "Subscribed"),
            Err(e) => tracing::error!(filter = %filter, error = %e, "Subscribe failed"),
        }
    }
}
