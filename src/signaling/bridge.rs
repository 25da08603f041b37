//! Signaling bridge
//!
//! Routes inbound broker messages to the peer registry and producer, and
//! publishes answers and local ICE candidates back out. Malformed
//! payloads are logged and dropped; one bad peer never disturbs another.

use std::str;
use std::sync::Arc;

use crate::config::StreamConfig;
use crate::producer::VideoProducer;
use crate::registry::{IceCandidateWire, PeerRegistry};

use super::topics::{Signal, TopicSchema};

/// Outbound publish seam. The production implementation wraps the MQTT
/// client; tests record instead.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>);
}

/// Maps broker traffic onto registry and producer operations
pub struct SignalingBridge {
    topics: TopicSchema,
    registry: Arc<PeerRegistry>,
    producer: VideoProducer,
    config: Arc<StreamConfig>,
    publisher: Arc<dyn Publisher>,
}

impl SignalingBridge {
    pub fn new(
        topics: TopicSchema,
        registry: Arc<PeerRegistry>,
        producer: VideoProducer,
        config: Arc<StreamConfig>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            topics,
            registry,
            producer,
            config,
            publisher,
        }
    }

    pub fn topics(&self) -> &TopicSchema {
        &self.topics
    }

    /// Dispatch one inbound message
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        match self.topics.classify(topic) {
            Some(Signal::Offer { peer_id }) => self.handle_offer(&peer_id, payload).await,
            Some(Signal::RemoteCandidates { peer_id }) => {
                self.handle_remote_candidates(&peer_id, payload).await;
            }
            Some(Signal::DisconnectClient { peer_id }) => {
                tracing::info!(peer = %peer_id, "Disconnect requested by client");
                self.registry.disconnect(&peer_id).await;
            }
            Some(Signal::CameraSwitch) => self.handle_camera_switch(payload).await,
            None => {
                tracing::debug!(topic = %topic, "Ignoring message on unrecognized topic");
            }
        }
    }

    /// Announce the robot's departure (published during shutdown)
    pub fn publish_disconnect_tractor(&self) {
        self.publisher
            .publish(&self.topics.disconnect_tractor_topic(), b"robot".to_vec());
        tracing::info!("Published disconnect-tractor");
    }

    async fn handle_offer(&self, peer_id: &str, payload: &[u8]) {
        let Ok(offer_sdp) = str::from_utf8(payload) else {
            tracing::warn!(peer = %peer_id, "Offer payload is not UTF-8, dropped");
            return;
        };

        tracing::info!(peer = %peer_id, "Offer received");

        let answer = match self.registry.accept_offer(peer_id, offer_sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(peer = %peer_id, error = %e, "Offer rejected");
                return;
            }
        };

        self.publisher
            .publish(&self.topics.answer_topic(peer_id), answer.into_bytes());

        // Candidates only start flowing once the answer is on the wire.
        let candidate_topic = self.topics.local_candidate_topic(peer_id);
        let publisher = Arc::clone(&self.publisher);
        self.registry
            .install_ice_publisher(peer_id, move |candidate| {
                match serde_json::to_vec(&[candidate]) {
                    Ok(payload) => publisher.publish(&candidate_topic, payload),
                    Err(e) => {
                        tracing::warn!(error = %e, "ICE candidate serialization failed");
                    }
                }
            })
            .await;
    }

    async fn handle_remote_candidates(&self, peer_id: &str, payload: &[u8]) {
        let candidates: Vec<IceCandidateWire> = match serde_json::from_slice(payload) {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(peer = %peer_id, error = %e, "Malformed ICE payload dropped");
                return;
            }
        };

        for candidate in candidates {
            if let Err(e) = self.registry.add_remote_ice(peer_id, candidate).await {
                tracing::warn!(peer = %peer_id, error = %e, "Remote candidate rejected");
            }
        }
    }

    async fn handle_camera_switch(&self, payload: &[u8]) {
        let index: i32 = match str::from_utf8(payload).map(|s| s.trim().parse()) {
            Ok(Ok(index)) => index,
            _ => {
                tracing::warn!("Unparseable camera switch payload dropped");
                return;
            }
        };

        let Some(spec) = self.config.source_spec(index).cloned() else {
            tracing::warn!(camera = index, "Camera switch to unknown index ignored");
            return;
        };

        tracing::info!(camera = index, "Camera switch requested");
        match self.producer.switch_source(&spec, &self.config).await {
            Ok(()) => tracing::info!(camera = index, "Camera switched"),
            Err(e) => tracing::error!(camera = index, error = %e, "Camera switch failed"),
        }
    }
}
