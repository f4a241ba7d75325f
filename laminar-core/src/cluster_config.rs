//! Cluster config: the ordered list of member entries a mutation's UPDATE_CONFIG payload
//! carries (§3, §6).

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::ids::NodeId;
use crate::wire::{Reader, WireError, WireResult, Writer};

/// Minimum number of entries a config may carry (§8 boundary behavior).
pub const MIN_CONFIG_ENTRIES: usize = 1;
/// Maximum number of entries a config may carry (§8 boundary behavior).
pub const MAX_CONFIG_ENTRIES: usize = 31;

/// One member of a [`ClusterConfig`]: its identity plus the two addresses peers and
/// clients use to reach it. Addresses are `SocketAddr`, which is already "normalized" in
/// the sense §3 requires (no hostname is ever stored).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub node_id: NodeId,
    pub cluster_addr: SocketAddr,
    pub client_addr: SocketAddr,
}

/// An ordered, 1..=31 member cluster configuration (§3).
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub entries: Vec<ConfigEntry>,
}

impl ClusterConfig {
    pub fn new(entries: Vec<ConfigEntry>) -> WireResult<Self> {
        if entries.is_empty() || entries.len() > MAX_CONFIG_ENTRIES {
            return Err(WireError::InvalidConfigSize(entries.len()));
        }
        Ok(Self { entries })
    }

    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        self.entries.iter().map(|e| e.node_id).collect()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.iter().any(|e| e.node_id == id)
    }

    pub fn entry(&self, id: NodeId) -> Option<&ConfigEntry> {
        self.entries.iter().find(|e| e.node_id == id)
    }

    /// The size of a strict majority of this config's membership.
    pub fn majority_size(&self) -> usize {
        self.entries.len() / 2 + 1
    }

    pub fn encode(&self) -> WireResult<Vec<u8>> {
        if self.entries.is_empty() || self.entries.len() > MAX_CONFIG_ENTRIES {
            return Err(WireError::InvalidConfigSize(self.entries.len()));
        }
        let mut w = Writer::new();
        w.u8(self.entries.len() as u8);
        for e in &self.entries {
            w.u128(e.node_id.0);
            encode_addr(&mut w, e.cluster_addr);
            encode_addr(&mut w, e.client_addr);
        }
        Ok(w.into_vec())
    }

    pub fn decode(r: &mut Reader) -> WireResult<Self> {
        let n = r.u8()? as usize;
        if n == 0 || n > MAX_CONFIG_ENTRIES {
            return Err(WireError::InvalidConfigSize(n));
        }
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            let node_id = NodeId(r.u128()?);
            let cluster_addr = decode_addr(r)?;
            let client_addr = decode_addr(r)?;
            entries.push(ConfigEntry { node_id, cluster_addr, client_addr });
        }
        Ok(Self { entries })
    }
}

fn encode_addr(w: &mut Writer, addr: SocketAddr) {
    match addr.ip() {
        IpAddr::V4(v4) => {
            w.u8(4);
            w.bytes(&v4.octets());
        }
        IpAddr::V6(v6) => {
            w.u8(16);
            w.bytes(&v6.octets());
        }
    }
    w.u16(addr.port());
}

fn decode_addr(r: &mut Reader) -> WireResult<SocketAddr> {
    let len = r.u8()? as usize;
    let ip: IpAddr = match len {
        4 => {
            let b = r.bytes(4)?;
            IpAddr::from([b[0], b[1], b[2], b[3]])
        }
        16 => {
            let b = r.bytes(16)?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&b);
            IpAddr::from(octets)
        }
        other => return Err(WireError::InvalidIpLength(other)),
    };
    let port = r.u16()?;
    Ok(SocketAddr::new(ip, port))
}
