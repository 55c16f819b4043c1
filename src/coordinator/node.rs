//! Cluster node identities

use crate::common::NodeMetrics;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Meta,
    Session,
    Data,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Meta => write!(f, "meta"),
            NodeType::Session => write!(f, "session"),
            NodeType::Data => write!(f, "data"),
        }
    }
}

impl FromStr for NodeType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "meta" => Ok(NodeType::Meta),
            "session" => Ok(NodeType::Session),
            "data" => Ok(NodeType::Data),
            other => Err(crate::Error::InvalidConfig(format!(
                "unknown node type: {}",
                other
            ))),
        }
    }
}

/// A peer tracked by the meta cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub node_type: NodeType,
    #[serde(default)]
    pub address: Option<String>,
    /// Load sample from the latest heartbeat
    #[serde(default)]
    pub metrics: Option<NodeMetrics>,
}

impl Node {
    pub fn new(node_id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            node_id: node_id.into(),
            node_type,
            address: None,
            metrics: None,
        }
    }

    pub fn meta(node_id: impl Into<String>) -> Self {
        Self::new(node_id, NodeType::Meta)
    }

    pub fn session(node_id: impl Into<String>) -> Self {
        Self::new(node_id, NodeType::Session)
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_metrics(mut self, metrics: NodeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Anything a [`LeaseManager`](super::lease::LeaseManager) can track.
pub trait LeaseNode: Clone + Send + Sync + 'static {
    fn node_id(&self) -> &str;
}

impl LeaseNode for Node {
    fn node_id(&self) -> &str {
        &self.node_id
    }
}
