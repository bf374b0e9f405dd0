//! Cluster configuration carried by configuration change entries

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, FsmResult};

/// Voting status of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Suffrage {
    /// Counts towards quorum
    Voter,
    /// Receives the log but does not vote
    Nonvoter,
    /// Catching up before being promoted to voter
    Staging,
}

/// A member of the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Unique server id
    pub id: String,
    /// Network address of the server
    pub address: String,
    /// Voting status
    pub suffrage: Suffrage,
}

impl Server {
    /// Create a voting server
    pub fn voter(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            suffrage: Suffrage::Voter,
        }
    }

    /// Create a non-voting server
    pub fn nonvoter(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            suffrage: Suffrage::Nonvoter,
        }
    }
}

/// Cluster membership as of a configuration change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfiguration {
    /// Log index at which this configuration was applied. Set by the FSM.
    #[serde(default)]
    pub index: u64,
    /// Members of the cluster
    pub servers: Vec<Server>,
}

impl ClusterConfiguration {
    /// Create a configuration from its servers
    pub fn new(servers: Vec<Server>) -> Self {
        Self { index: 0, servers }
    }

    /// Servers that count towards quorum
    pub fn voters(&self) -> impl Iterator<Item = &Server> {
        self.servers
            .iter()
            .filter(|server| server.suffrage == Suffrage::Voter)
    }

    /// Whether a server with `id` is a member
    pub fn contains(&self, id: &str) -> bool {
        self.servers.iter().any(|server| server.id == id)
    }

    /// Encode as CBOR
    pub fn encode(&self) -> FsmResult<Bytes> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| Error::Encode(format!("Failed to encode configuration: {e}")))?;
        Ok(Bytes::from(buf))
    }

    /// Decode from CBOR
    pub fn decode(bytes: &[u8]) -> FsmResult<Self> {
        ciborium::de::from_reader(bytes)
            .map_err(|e| Error::Decode(format!("Failed to decode configuration: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voters_and_membership() {
        let config = ClusterConfiguration::new(vec![
            Server::voter("node-1", "10.0.0.1:8300"),
            Server::voter("node-2", "10.0.0.2:8300"),
            Server::nonvoter("node-3", "10.0.0.3:8300"),
        ]);

        assert_eq!(config.voters().count(), 2);
        assert!(config.contains("node-3"));
        assert!(!config.contains("node-4"));
    }

    #[test]
    fn test_encode_decode() {
        let mut config = ClusterConfiguration::new(vec![Server {
            id: "node-1".to_string(),
            address: "10.0.0.1:8300".to_string(),
            suffrage: Suffrage::Staging,
        }]);
        config.index = 42;

        let encoded = config.encode().unwrap();
        assert_eq!(ClusterConfiguration::decode(&encoded).unwrap(), config);
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let data = crate::types::LogData::default().encode().unwrap();
        // Log data has no `servers` field
        assert!(matches!(
            ClusterConfiguration::decode(&data),
            Err(Error::Decode(_))
        ));
    }
}
