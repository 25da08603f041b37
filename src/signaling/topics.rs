//! Signaling topic schema
//!
//! All signaling rides one MQTT broker under a per-robot base topic:
//!
//! ```text
//! <thing>/robot-control/+/offer              ◄ SDP offer (plain text)
//! <thing>/robot-control/+/candidate/robot    ◄ remote ICE (JSON array)
//! <thing>/robot-control/+/disconnect-client  ◄ peer hangup
//! <thing>/camera                             ◄ camera index (ASCII int)
//! <thing>/robot-control/<peer>/answer            ► SDP answer
//! <thing>/robot-control/<peer>/candidate/rmcs    ► local ICE (JSON array)
//! <thing>/robot-control/disconnect-tractor       ► robot going away
//! ```
//!
//! The `+` segment is the peer identifier, an opaque string chosen by the
//! remote side.

/// Classified inbound signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// SDP offer from a peer
    Offer { peer_id: String },
    /// Remote ICE candidates for a peer
    RemoteCandidates { peer_id: String },
    /// Explicit hangup for a peer
    DisconnectClient { peer_id: String },
    /// Global camera switch request
    CameraSwitch,
}

/// Topic construction and classification for one robot
#[derive(Debug, Clone)]
pub struct TopicSchema {
    thing_name: String,
    base: String,
}

impl TopicSchema {
    pub fn new(thing_name: &str) -> Self {
        Self {
            thing_name: thing_name.to_string(),
            base: format!("{}/robot-control", thing_name),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    // Subscription filters

    pub fn offer_filter(&self) -> String {
        format!("{}/+/offer", self.base)
    }

    pub fn remote_candidate_filter(&self) -> String {
        format!("{}/+/candidate/robot", self.base)
    }

    pub fn disconnect_filter(&self) -> String {
        format!("{}/+/disconnect-client", self.base)
    }

    pub fn camera_topic(&self) -> String {
        format!("{}/camera", self.thing_name)
    }

    // Publish topics

    pub fn answer_topic(&self, peer_id: &str) -> String {
        format!("{}/{}/answer", self.base, peer_id)
    }

    pub fn local_candidate_topic(&self, peer_id: &str) -> String {
        format!("{}/{}/candidate/rmcs", self.base, peer_id)
    }

    pub fn disconnect_tractor_topic(&self) -> String {
        format!("{}/disconnect-tractor", self.base)
    }

    /// Classify an inbound topic, extracting the peer identifier.
    ///
    /// The peer identifier is the segment immediately after the base
    /// topic. Topics that fit no known shape return `None`.
    pub fn classify(&self, topic: &str) -> Option<Signal> {
        if topic == self.camera_topic() {
            return Some(Signal::CameraSwitch);
        }

        let rest = topic
            .strip_prefix(self.base.as_str())
            .and_then(|r| r.strip_prefix('/'))?;

        let (peer_id, action) = rest.split_once('/')?;
        if peer_id.is_empty() {
            return None;
        }
        let peer_id = peer_id.to_string();

        match action {
            "offer" => Some(Signal::Offer { peer_id }),
            "candidate/robot" => Some(Signal::RemoteCandidates { peer_id }),
            "disconnect-client" => Some(Signal::DisconnectClient { peer_id }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TopicSchema {
        TopicSchema::new("tractor-7")
    }

    #[test]
    fn test_filters() {
        let topics = schema();

        assert_eq!(topics.offer_filter(), "tractor-7/robot-control/+/offer");
        assert_eq!(
            topics.remote_candidate_filter(),
            "tractor-7/robot-control/+/candidate/robot"
        );
        assert_eq!(
            topics.disconnect_filter(),
            "tractor-7/robot-control/+/disconnect-client"
        );
        assert_eq!(topics.camera_topic(), "tractor-7/camera");
    }

    #[test]
    fn test_publish_topics() {
        let topics = schema();

        assert_eq!(
            topics.answer_topic("app-123"),
            "tractor-7/robot-control/app-123/answer"
        );
        assert_eq!(
            topics.local_candidate_topic("app-123"),
            "tractor-7/robot-control/app-123/candidate/rmcs"
        );
        assert_eq!(
            topics.disconnect_tractor_topic(),
            "tractor-7/robot-control/disconnect-tractor"
        );
    }

    #[test]
    fn test_classify_offer() {
        let signal = schema().classify("tractor-7/robot-control/app-123/offer");
        assert_eq!(signal, Some(Signal::Offer { peer_id: "app-123".to_string() }));
    }

    #[test]
    fn test_classify_remote_candidates() {
        let signal = schema().classify("tractor-7/robot-control/app-123/candidate/robot");
        assert_eq!(
            signal,
            Some(Signal::RemoteCandidates { peer_id: "app-123".to_string() })
        );
    }

    #[test]
    fn test_classify_disconnect() {
        let signal = schema().classify("tractor-7/robot-control/app-123/disconnect-client");
        assert_eq!(
            signal,
            Some(Signal::DisconnectClient { peer_id: "app-123".to_string() })
        );
    }

    #[test]
    fn test_classify_camera() {
        assert_eq!(schema().classify("tractor-7/camera"), Some(Signal::CameraSwitch));
    }

    #[test]
    fn test_classify_rejects_foreign_topics() {
        let topics = schema();

        assert_eq!(topics.classify("other-robot/robot-control/p/offer"), None);
        assert_eq!(topics.classify("tractor-7/robot-control"), None);
        assert_eq!(topics.classify("tractor-7/robot-control/p/unknown"), None);
        assert_eq!(topics.classify("tractor-7/robot-control//offer"), None);
        assert_eq!(topics.classify(""), None);
    }

    #[test]
    fn test_classify_candidate_direction_matters() {
        // Our own outgoing candidate topic must not classify as inbound.
        let topics = schema();
        assert_eq!(topics.classify("tractor-7/robot-control/p/candidate/rmcs"), None);
    }

    #[test]
    fn test_peer_id_with_odd_characters() {
        let signal = schema().classify("tractor-7/robot-control/user@host:42/offer");
        assert_eq!(
            signal,
            Some(Signal::Offer { peer_id: "user@host:42".to_string() })
        );
    }
}
