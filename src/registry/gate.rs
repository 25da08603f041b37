//! Producer gating
//!
//! The producer runs exactly while at least one peer session is in the
//! Connected state. That rule lives here, away from any I/O, so the
//! lifecycle invariant is checkable in isolation.

use std::collections::HashMap;

use super::session::PeerState;

/// What the registry should do to the producer after a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    /// First peer came up: start pacing
    StartProducer,
    /// Another peer joined a live stream: replay configuration for it
    RearmProducer,
    /// Last connected peer went away: stop pacing
    StopProducer,
}

/// Tracks per-peer connectivity and derives producer commands
#[derive(Debug, Default)]
pub struct ConnectivityGate {
    peers: HashMap<String, PeerState>,
}

impl ConnectivityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a state transition for `peer_id`
    pub fn on_state(&mut self, peer_id: &str, state: PeerState) -> Option<GateAction> {
        let connected_before = self.connected_count();
        self.peers.insert(peer_id.to_string(), state);

        match state {
            PeerState::Connected => {
                if connected_before == 0 {
                    Some(GateAction::StartProducer)
                } else {
                    Some(GateAction::RearmProducer)
                }
            }
            state if state.is_terminal() => {
                if self.connected_count() == 0 {
                    Some(GateAction::StopProducer)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Forget a peer entirely (session removed from the registry)
    pub fn on_removed(&mut self, peer_id: &str) -> Option<GateAction> {
        self.peers.remove(peer_id);
        if self.connected_count() == 0 {
            Some(GateAction::StopProducer)
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn connected_count(&self) -> usize {
        self.peers
            .values()
            .filter(|s| **s == PeerState::Connected)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_connect_starts_producer() {
        let mut gate = ConnectivityGate::new();

        assert_eq!(gate.on_state("p1", PeerState::Connecting), None);
        assert_eq!(
            gate.on_state("p1", PeerState::Connected),
            Some(GateAction::StartProducer)
        );
    }

    #[test]
    fn test_second_connect_rearms() {
        let mut gate = ConnectivityGate::new();
        gate.on_state("p1", PeerState::Connected);

        assert_eq!(
            gate.on_state("p2", PeerState::Connected),
            Some(GateAction::RearmProducer)
        );
    }

    #[test]
    fn test_producer_runs_while_any_peer_connected() {
        let mut gate = ConnectivityGate::new();
        gate.on_state("p1", PeerState::Connected);
        gate.on_state("p2", PeerState::Connected);

        // One leaves, one remains: no stop.
        assert_eq!(gate.on_state("p1", PeerState::Disconnected), None);
        assert_eq!(gate.connected_count(), 1);

        // The last one leaves: stop.
        assert_eq!(
            gate.on_state("p2", PeerState::Failed),
            Some(GateAction::StopProducer)
        );
        assert_eq!(gate.connected_count(), 0);
    }

    #[test]
    fn test_removal_of_last_connected_stops() {
        let mut gate = ConnectivityGate::new();
        gate.on_state("p1", PeerState::Connected);
        gate.on_state("p2", PeerState::Connected);

        assert_eq!(gate.on_removed("p1"), None);
        assert_eq!(gate.on_removed("p2"), Some(GateAction::StopProducer));
    }

    #[test]
    fn test_removal_of_unknown_peer_with_no_connections_stops() {
        // Stop is idempotent downstream, so an over-eager stop is fine;
        // a missed stop would leak the pacing loop.
        let mut gate = ConnectivityGate::new();
        assert_eq!(gate.on_removed("ghost"), Some(GateAction::StopProducer));
    }

    #[test]
    fn test_non_terminal_transitions_are_silent() {
        let mut gate = ConnectivityGate::new();

        assert_eq!(gate.on_state("p1", PeerState::New), None);
        assert_eq!(gate.on_state("p1", PeerState::Connecting), None);
    }

    #[test]
    fn test_all_disconnect_reaches_stop() {
        let mut gate = ConnectivityGate::new();
        for peer in ["a", "b", "c"] {
            gate.on_state(peer, PeerState::Connected);
        }

        let mut stop_seen = false;
        for peer in ["a", "b", "c"] {
            if gate.on_state(peer, PeerState::Closed) == Some(GateAction::StopProducer) {
                stop_seen = true;
            }
        }

        assert!(stop_seen);
        assert_eq!(gate.connected_count(), 0);
    }
}
