//! Cluster-wide traffic-operate rate-limit switch
//!
//! Payload:
//!
//! ```json
//! { "trafficOperateLimitSwitch": true }
//! ```
//!
//! Until a payload has been accepted the switch is off.

use super::private::Sealed;
use super::service::{FeatureSwitch, FetchSystemPropertyService, SystemPropertyKind};
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};

pub const CLUSTER_RATE_LIMIT_DATA_ID: &str = "registry.cluster.rate.limit";

/// Feature flag name under which the coordinator exposes the switch.
pub const TRAFFIC_OPERATE_LIMIT_FLAG: &str = "traffic_operate_limit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRateLimitSwitch {
    pub traffic_operate_limit_switch: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterRateLimit;

impl Sealed for ClusterRateLimit {}

impl SystemPropertyKind for ClusterRateLimit {
    type Value = ClusterRateLimitSwitch;

    fn data_id(&self) -> &str {
        CLUSTER_RATE_LIMIT_DATA_ID
    }

    fn default_value(&self) -> ClusterRateLimitSwitch {
        ClusterRateLimitSwitch::default()
    }

    fn parse(&self, raw: &str) -> Result<ClusterRateLimitSwitch> {
        serde_json::from_str(raw).map_err(|e| Error::Parse {
            data_id: CLUSTER_RATE_LIMIT_DATA_ID.to_string(),
            reason: e.to_string(),
        })
    }
}

impl FetchSystemPropertyService<ClusterRateLimit> {
    pub fn is_traffic_operate_limit_switch(&self) -> bool {
        self.storage().value.traffic_operate_limit_switch
    }
}

impl FeatureSwitch for FetchSystemPropertyService<ClusterRateLimit> {
    fn is_enabled(&self) -> bool {
        self.is_traffic_operate_limit_switch()
    }
}
