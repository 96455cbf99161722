//! Volcano PodGroup types
//!
//! Typed representation of `scheduling.volcano.sh/v1beta1` PodGroup, the
//! object that tells Volcano how many pods and how much capacity a gang needs
//! before any member may be bound.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Full name of the PodGroup CRD, checked before the scheduler accepts jobs
pub const POD_GROUP_CRD_NAME: &str = "podgroups.scheduling.volcano.sh";

/// Kind used in logs and conflict errors
pub const POD_GROUP_KIND: &str = "PodGroup";

/// PodGroup spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "scheduling.volcano.sh",
    version = "v1beta1",
    kind = "PodGroup",
    plural = "podgroups",
    namespaced,
    status = "PodGroupStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct PodGroupSpec {
    /// Minimum number of pods that must be schedulable together
    #[serde(default)]
    pub min_member: i32,

    /// Minimum aggregate resources reserved before any member is bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_resources: Option<BTreeMap<String, Quantity>>,

    /// Volcano queue the group is submitted to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,

    /// Priority class of the group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
}

/// Status reported by Volcano
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodGroupStatus {
    /// Pending, Running, Unknown, Inqueue or Completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Pods of the group currently running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<i32>,

    /// Pods of the group that completed successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<i32>,

    /// Pods of the group that failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn pod_group_api_coordinates() {
        assert_eq!(PodGroup::api_version(&()), "scheduling.volcano.sh/v1beta1");
        assert_eq!(PodGroup::kind(&()), POD_GROUP_KIND);
        assert_eq!(PodGroup::plural(&()), "podgroups");
    }

    #[test]
    fn spec_serializes_camel_case_and_skips_unset() {
        let spec = PodGroupSpec {
            min_member: 1,
            min_resources: Some(BTreeMap::from([(
                "cpu".to_string(),
                Quantity("2".to_string()),
            )])),
            queue: None,
            priority_class_name: Some("high".to_string()),
        };

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["minMember"], 1);
        assert_eq!(value["minResources"]["cpu"], "2");
        assert_eq!(value["priorityClassName"], "high");
        assert!(value.get("queue").is_none());
    }

    #[test]
    fn pod_group_from_api_server_json() {
        let pg: PodGroup = serde_json::from_value(serde_json::json!({
            "apiVersion": "scheduling.volcano.sh/v1beta1",
            "kind": "PodGroup",
            "metadata": {"name": "spark-pi-pg", "namespace": "default"},
            "spec": {"minMember": 1, "minResources": {"memory": "3Gi"}},
            "status": {"phase": "Inqueue"}
        }))
        .unwrap();

        assert_eq!(pg.spec.min_member, 1);
        assert_eq!(
            pg.spec.min_resources.unwrap()["memory"],
            Quantity("3Gi".to_string())
        );
        assert_eq!(pg.status.unwrap().phase.as_deref(), Some("Inqueue"));
    }
}
