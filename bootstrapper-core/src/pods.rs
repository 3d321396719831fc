//! Pod summaries.

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::{Deserialize, Serialize};

/// A condensed view of a pod's status.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    /// True when the pod has containers and all of them are ready.
    pub ready: bool,
    pub total_containers: usize,
    pub ready_containers: usize,
    /// The sum of all container restart counts.
    pub restarts: i32,
    pub start_time: Option<Time>,
}

impl From<&Pod> for PodSummary {
    fn from(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        let containers = status.and_then(|status| status.container_statuses.as_deref()).unwrap_or_default();
        let ready_containers = containers.iter().filter(|container| container.ready).count();
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            phase: status.and_then(|status| status.phase.clone()).unwrap_or_default(),
            ready: !containers.is_empty() && ready_containers == containers.len(),
            total_containers: containers.len(),
            ready_containers,
            restarts: containers.iter().map(|container| container.restart_count).sum(),
            start_time: status.and_then(|status| status.start_time.clone()),
        }
    }
}
