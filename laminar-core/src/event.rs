//! The per-topic log entry produced by projecting a committed [`crate::Mutation`] (§3, §6,
//! §4.7).

use serde::{Deserialize, Serialize};

use crate::cluster_config::ClusterConfig;
use crate::ids::{ClientId, GlobalOffset, LocalOffset, Nonce, Term};
use crate::wire::{validate_topic_name, Reader, WireError, WireResult, Writer};

/// Sentinel used for `global_offset`/`local_offset` on the synthesized, never-persisted
/// CONFIG_CHANGE pseudo-event (§3, §6: "CONFIG_CHANGE uses sentinels (-1) for offsets").
pub const CONFIG_CHANGE_SENTINEL: u64 = u64::MAX;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventKind {
    Invalid = 0,
    TopicCreate = 1,
    TopicDestroy = 2,
    KeyPut = 3,
    KeyDelete = 4,
    ConfigChange = 5,
}

impl EventKind {
    pub fn from_ordinal(v: u8) -> WireResult<Self> {
        Ok(match v {
            1 => Self::TopicCreate,
            2 => Self::TopicDestroy,
            3 => Self::KeyPut,
            4 => Self::KeyDelete,
            5 => Self::ConfigChange,
            other => return Err(WireError::UnknownEventKind(other)),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    TopicCreate { code: Vec<u8>, args: Vec<u8> },
    TopicDestroy,
    KeyPut { key: Vec<u8>, value: Vec<u8> },
    KeyDelete { key: Vec<u8> },
    ConfigChange(ClusterConfig),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TopicCreate { .. } => EventKind::TopicCreate,
            Self::TopicDestroy => EventKind::TopicDestroy,
            Self::KeyPut { .. } => EventKind::KeyPut,
            Self::KeyDelete { .. } => EventKind::KeyDelete,
            Self::ConfigChange(_) => EventKind::ConfigChange,
        }
    }
}

/// A single entry in a topic's event log (§3). Multiple events may share a `global_offset`
/// (a programmable topic fanning one mutation out to several events); all such events
/// commit atomically (§4.4, §4.7).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub term: Term,
    pub global_offset: GlobalOffset,
    pub local_offset: LocalOffset,
    pub topic: String,
    pub client_id: ClientId,
    pub client_nonce: Nonce,
    pub payload: EventPayload,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Build the synthesized, never-persisted CONFIG_CHANGE pseudo-event broadcast to
    /// listeners on a config commit (§4.7, §4.8).
    pub fn config_change(term: Term, cfg: ClusterConfig) -> Self {
        Self {
            term,
            global_offset: CONFIG_CHANGE_SENTINEL,
            local_offset: CONFIG_CHANGE_SENTINEL,
            topic: String::new(),
            client_id: ClientId(0),
            client_nonce: 0,
            payload: EventPayload::ConfigChange(cfg),
        }
    }

    pub fn encode(&self) -> WireResult<Vec<u8>> {
        let mut w = Writer::new();
        w.u8(self.kind() as u8);
        w.u64(self.term);
        w.u64(self.global_offset);
        w.u64(self.local_offset);

        if self.kind() != EventKind::ConfigChange {
            validate_topic_name(&self.topic)?;
        }
        w.bytes_u8_len(self.topic.as_bytes());
        w.u128(self.client_id.0);
        w.u64(self.client_nonce);

        match &self.payload {
            EventPayload::TopicCreate { code, args } => {
                w.bytes_u16_len(code);
                w.bytes_u16_len(args);
            }
            EventPayload::TopicDestroy => {}
            EventPayload::KeyPut { key, value } => {
                w.bytes_u16_len(key);
                w.bytes_u16_len(value);
            }
            EventPayload::KeyDelete { key } => {
                w.bytes_u16_len(key);
            }
            EventPayload::ConfigChange(cfg) => {
                w.bytes(&cfg.encode()?);
            }
        }
        Ok(w.into_vec())
    }

    pub fn decode(buf: &[u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let kind = EventKind::from_ordinal(r.u8()?)?;
        let term = r.u64()?;
        let global_offset = r.u64()?;
        let local_offset = r.u64()?;
        let topic_bytes = r.bytes_u8_len()?;
        let topic = String::from_utf8(topic_bytes).map_err(|_| WireError::InvalidUtf8)?;
        if kind != EventKind::ConfigChange {
            validate_topic_name(&topic)?;
        }
        let client_id = ClientId(r.u128()?);
        let client_nonce = r.u64()?;

        let payload = match kind {
            EventKind::TopicCreate => {
                let code = r.bytes_u16_len()?;
                let args = r.bytes_u16_len()?;
                EventPayload::TopicCreate { code, args }
            }
            EventKind::TopicDestroy => EventPayload::TopicDestroy,
            EventKind::KeyPut => {
                let key = r.bytes_u16_len()?;
                let value = r.bytes_u16_len()?;
                EventPayload::KeyPut { key, value }
            }
            EventKind::KeyDelete => {
                let key = r.bytes_u16_len()?;
                EventPayload::KeyDelete { key }
            }
            EventKind::ConfigChange => {
                let cfg = ClusterConfig::decode(&mut r)?;
                EventPayload::ConfigChange(cfg)
            }
            EventKind::Invalid => return Err(WireError::UnknownEventKind(0)),
        };

        Ok(Self { term, global_offset, local_offset, topic, client_id, client_nonce, payload })
    }
}
