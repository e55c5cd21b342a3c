use serde::{Deserialize, Serialize};

/// Identifies a peer by its position in the ordered cluster peer list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PeerId(pub u32);

impl PeerId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Wire-format envelope for superstep messaging.
///
/// Messages are serialized with MessagePack for compact, fast transport.
/// The `tag` groups messages during aggregation (for the clustering job it
/// is the center index), while `superstep` pins the envelope to the phase
/// that produced it so the runtime can enforce barrier-aligned delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Superstep during which this message was sent. Stamped by the
    /// runtime's `send`; a freshly created message carries 0.
    pub superstep: u64,

    /// Application tag used to group messages during aggregation.
    pub tag: u32,

    /// Sending peer. Also stamped by the runtime's `send`.
    pub from: PeerId,

    /// MessagePack-encoded payload bytes.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,

    /// Schema version for forward-compatible evolution.
    /// Consumers should check this before deserializing the payload.
    #[serde(default = "default_version")]
    pub version: u16,
}

/// Default version for messages that omit the field (backward compat).
fn default_version() -> u16 {
    1
}

impl Message {
    /// Create a tagged message, serializing the payload with MessagePack.
    ///
    /// `superstep` and `from` are placeholders until the runtime stamps
    /// them on send.
    pub fn new<T: Serialize>(tag: u32, payload: &T) -> Result<Self, rmp_serde::encode::Error> {
        Ok(Self {
            superstep: 0,
            tag,
            from: PeerId(0),
            payload: rmp_serde::to_vec(payload)?,
            version: 1,
        })
    }

    /// Deserialize the payload into the expected type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, rmp_serde::decode::Error> {
        rmp_serde::from_slice(&self.payload)
    }

    /// Serialize this entire message envelope to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize a message envelope from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// A single frame on the mesh data plane.
///
/// `EndOfStep` markers let a receiver decide when a superstep's inbox is
/// complete: PUSH/PULL preserves per-connection ordering, so once a marker
/// arrived from every peer, no more data for that superstep can follow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Packet {
    Data(Message),
    EndOfStep { superstep: u64, from: PeerId },
}

impl Packet {
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Helper module for serde to handle `Vec<u8>` as raw bytes in MessagePack.
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_message_payload() {
        let msg = Message::new(3, &vec![1.5f64, 10.0]).unwrap();
        assert_eq!(msg.tag, 3);
        assert_eq!(msg.decode::<Vec<f64>>().unwrap(), vec![1.5, 10.0]);
    }

    #[test]
    fn roundtrip_envelope_bytes() {
        let mut msg = Message::new(7, &42u64).unwrap();
        msg.superstep = 5;
        msg.from = PeerId(2);

        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.superstep, 5);
        assert_eq!(decoded.tag, 7);
        assert_eq!(decoded.from, PeerId(2));
        assert_eq!(decoded.decode::<u64>().unwrap(), 42);
    }

    #[test]
    fn roundtrip_data_packet() {
        let msg = Message::new(0, &"partial".to_string()).unwrap();
        let bytes = Packet::Data(msg).to_bytes().unwrap();
        match Packet::from_bytes(&bytes).unwrap() {
            Packet::Data(m) => assert_eq!(m.decode::<String>().unwrap(), "partial"),
            other => panic!("expected data packet, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_end_of_step_packet() {
        let bytes = Packet::EndOfStep {
            superstep: 4,
            from: PeerId(1),
        }
        .to_bytes()
        .unwrap();
        match Packet::from_bytes(&bytes).unwrap() {
            Packet::EndOfStep { superstep, from } => {
                assert_eq!(superstep, 4);
                assert_eq!(from, PeerId(1));
            }
            other => panic!("expected end-of-step packet, got {other:?}"),
        }
    }

    #[test]
    fn peer_id_display() {
        assert_eq!(PeerId(3).to_string(), "peer-3");
    }
}
