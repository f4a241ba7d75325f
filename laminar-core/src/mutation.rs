//! The global log entry: a client-authored [`Mutation`] (§3, §6).

use serde::{Deserialize, Serialize};

use crate::cluster_config::ClusterConfig;
use crate::ids::{ClientId, GlobalOffset, Nonce, Term};
use crate::wire::{validate_topic_name, Reader, WireError, WireResult, Writer};

/// The name reserved for the synthetic UPDATE_CONFIG "topic" (zero-length on the wire,
/// §6). Never a real topic; only ever used to satisfy the `Mutation.topic` field.
pub const CONFIG_TOPIC: &str = "";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MutationKind {
    Invalid = 0,
    CreateTopic = 1,
    DestroyTopic = 2,
    Put = 3,
    Delete = 4,
    UpdateConfig = 5,
}

impl MutationKind {
    pub fn from_ordinal(v: u8) -> WireResult<Self> {
        Ok(match v {
            1 => Self::CreateTopic,
            2 => Self::DestroyTopic,
            3 => Self::Put,
            4 => Self::Delete,
            5 => Self::UpdateConfig,
            other => return Err(WireError::UnknownMutationKind(other)),
        })
    }
}

/// The kind-specific payload of a [`Mutation`] (§3, §6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MutationPayload {
    CreateTopic { code: Vec<u8>, args: Vec<u8> },
    DestroyTopic,
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    UpdateConfig(ClusterConfig),
}

impl MutationPayload {
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::CreateTopic { .. } => MutationKind::CreateTopic,
            Self::DestroyTopic => MutationKind::DestroyTopic,
            Self::Put { .. } => MutationKind::Put,
            Self::Delete { .. } => MutationKind::Delete,
            Self::UpdateConfig(_) => MutationKind::UpdateConfig,
        }
    }
}

/// A single entry in the cluster-wide global log (§3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub term: Term,
    pub global_offset: GlobalOffset,
    pub topic: String,
    pub client_id: ClientId,
    pub client_nonce: Nonce,
    pub payload: MutationPayload,
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        self.payload.kind()
    }

    /// Encode this mutation per the §6 byte layout.
    pub fn encode(&self) -> WireResult<Vec<u8>> {
        let mut w = Writer::new();
        w.u8(self.kind() as u8);
        w.u64(self.term);
        w.u64(self.global_offset);

        if !matches!(self.payload, MutationPayload::UpdateConfig(_)) {
            validate_topic_name(&self.topic)?;
        }
        w.bytes_u8_len(self.topic.as_bytes());
        w.u128(self.client_id.0);
        w.u64(self.client_nonce);

        match &self.payload {
            MutationPayload::CreateTopic { code, args } => {
                w.bytes_u16_len(code);
                w.bytes_u16_len(args);
            }
            MutationPayload::DestroyTopic => {}
            MutationPayload::Put { key, value } => {
                w.bytes_u16_len(key);
                w.bytes_u16_len(value);
            }
            MutationPayload::Delete { key } => {
                w.bytes_u16_len(key);
            }
            MutationPayload::UpdateConfig(cfg) => {
                w.bytes(&cfg.encode()?);
            }
        }
        Ok(w.into_vec())
    }

    /// Decode a mutation previously produced by [`Mutation::encode`].
    pub fn decode(buf: &[u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let kind = MutationKind::from_ordinal(r.u8()?)?;
        let term = r.u64()?;
        let global_offset = r.u64()?;
        let topic_bytes = r.bytes_u8_len()?;
        let topic = String::from_utf8(topic_bytes).map_err(|_| WireError::InvalidUtf8)?;
        if kind != MutationKind::UpdateConfig {
            validate_topic_name(&topic)?;
        }
        let client_id = crate::ids::ClientId(r.u128()?);
        let client_nonce = r.u64()?;

        let payload = match kind {
            MutationKind::CreateTopic => {
                let code = r.bytes_u16_len()?;
                let args = r.bytes_u16_len()?;
                MutationPayload::CreateTopic { code, args }
            }
            MutationKind::DestroyTopic => MutationPayload::DestroyTopic,
            MutationKind::Put => {
                let key = r.bytes_u16_len()?;
                let value = r.bytes_u16_len()?;
                MutationPayload::Put { key, value }
            }
            MutationKind::Delete => {
                let key = r.bytes_u16_len()?;
                MutationPayload::Delete { key }
            }
            MutationKind::UpdateConfig => {
                let cfg = ClusterConfig::decode(&mut r)?;
                MutationPayload::UpdateConfig(cfg)
            }
            MutationKind::Invalid => return Err(WireError::UnknownMutationKind(0)),
        };

        Ok(Self { term, global_offset, topic, client_id, client_nonce, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_config::ConfigEntry;
    use std::net::SocketAddr;

    fn sample_put() -> Mutation {
        Mutation {
            term: 3,
            global_offset: 42,
            topic: "orders".into(),
            client_id: ClientId(0xdeadbeef),
            client_nonce: 7,
            payload: MutationPayload::Put { key: vec![1, 2], value: vec![3, 4, 5] },
        }
    }

    #[test]
    fn round_trips_put() {
        let m = sample_put();
        let bytes = m.encode().unwrap();
        let back = Mutation::decode(&bytes).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn round_trips_update_config() {
        let cfg = ClusterConfig::new(vec![ConfigEntry {
            node_id: crate::ids::NodeId(1),
            cluster_addr: "127.0.0.1:9001".parse::<SocketAddr>().unwrap(),
            client_addr: "127.0.0.1:9002".parse::<SocketAddr>().unwrap(),
        }])
        .unwrap();
        let m = Mutation {
            term: 1,
            global_offset: 1,
            topic: CONFIG_TOPIC.into(),
            client_id: ClientId(1),
            client_nonce: 1,
            payload: MutationPayload::UpdateConfig(cfg),
        };
        let bytes = m.encode().unwrap();
        let back = Mutation::decode(&bytes).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn rejects_topic_name_too_long() {
        let mut m = sample_put();
        m.topic = "x".repeat(128);
        assert!(matches!(m.encode(), Err(WireError::InvalidTopicLength(128))));
    }

    #[test]
    fn rejects_empty_topic_name_for_non_config() {
        let mut m = sample_put();
        m.topic = "".into();
        assert!(matches!(m.encode(), Err(WireError::InvalidTopicLength(0))));
    }

    #[test]
    fn accepts_boundary_topic_lengths() {
        let mut m = sample_put();
        m.topic = "a".repeat(1);
        assert!(m.encode().is_ok());
        m.topic = "a".repeat(127);
        assert!(m.encode().is_ok());
    }

    #[test]
    fn rejects_reserved_dot_prefixed_topic_name() {
        let mut m = sample_put();
        m.topic = ".hidden".into();
        assert!(matches!(m.encode(), Err(WireError::ReservedTopicPrefix)));
    }
}
