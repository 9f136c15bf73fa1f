//! Gossip wire envelope.
//!
//! Every datagram carries one JSON envelope tagged by `type`. A state sync
//! carries the full encoded CRDT value; an ack carries nothing but the
//! sender's identity. Envelopes must fit in a single UDP datagram — there
//! is no chunking, an oversized state refuses to leave the node.

use crate::{NodeError, NodeResult};
use meld_types::{IsoTimestamp, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM: usize = 65_507;

/// One gossip message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Full state broadcast.
    StateSync {
        node_id: NodeId,
        state: Value,
        timestamp: IsoTimestamp,
    },
    /// Receipt acknowledgment, addressed to the datagram source.
    Ack {
        node_id: NodeId,
        timestamp: IsoTimestamp,
    },
}

impl Envelope {
    /// Builds a state-sync envelope stamped now.
    #[must_use]
    pub fn state_sync(node_id: NodeId, state: Value) -> Self {
        Self::StateSync {
            node_id,
            state,
            timestamp: IsoTimestamp::now(),
        }
    }

    /// Builds an ack envelope stamped now.
    #[must_use]
    pub fn ack(node_id: NodeId) -> Self {
        Self::Ack {
            node_id,
            timestamp: IsoTimestamp::now(),
        }
    }

    /// The sender recorded in the envelope.
    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        match self {
            Self::StateSync { node_id, .. } | Self::Ack { node_id, .. } => node_id,
        }
    }

    /// Encodes for the wire, rejecting anything that cannot fit in one
    /// datagram.
    pub fn to_bytes(&self) -> NodeResult<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_DATAGRAM {
            return Err(NodeError::DatagramTooLarge {
                size: bytes.len(),
                limit: MAX_DATAGRAM,
            });
        }
        Ok(bytes)
    }

    /// Decodes a received datagram.
    pub fn from_bytes(bytes: &[u8]) -> NodeResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn state_sync_roundtrip() {
        let state = serde_json::json!({"counters": {"a": 3}, "last_file_count": 0});
        let envelope = Envelope::state_sync(NodeId::new("a"), state.clone());

        let bytes = envelope.to_bytes().unwrap();
        match Envelope::from_bytes(&bytes).unwrap() {
            Envelope::StateSync {
                node_id,
                state: decoded,
                ..
            } => {
                assert_eq!(node_id.as_str(), "a");
                assert_eq!(decoded, state);
            }
            other => panic!("expected state_sync, got {other:?}"),
        }
    }

    #[test]
    fn ack_roundtrip() {
        let bytes = Envelope::ack(NodeId::new("b")).to_bytes().unwrap();
        match Envelope::from_bytes(&bytes).unwrap() {
            Envelope::Ack { node_id, .. } => assert_eq!(node_id.as_str(), "b"),
            other => panic!("expected ack, got {other:?}"),
        }
    }

    #[test]
    fn wire_uses_snake_case_type_tags() {
        let value: serde_json::Value =
            serde_json::from_slice(&Envelope::ack(NodeId::new("b")).to_bytes().unwrap()).unwrap();
        assert_eq!(value["type"], "ack");

        let envelope = Envelope::state_sync(NodeId::new("a"), serde_json::json!({}));
        let value: serde_json::Value =
            serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(value["type"], "state_sync");
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let raw = br#"{"type": "handshake", "node_id": "x", "timestamp": "2024-01-01T00:00:00.000000Z"}"#;
        assert!(Envelope::from_bytes(raw).is_err());
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        assert!(Envelope::from_bytes(b"not json").is_err());
        assert!(Envelope::from_bytes(b"").is_err());
    }

    #[test]
    fn oversized_state_is_refused() {
        let blob = "x".repeat(MAX_DATAGRAM);
        let envelope = Envelope::state_sync(NodeId::new("a"), serde_json::json!({"doc": blob}));
        assert!(matches!(
            envelope.to_bytes(),
            Err(NodeError::DatagramTooLarge { .. })
        ));
    }
}
