//! SparkJob CRD types
//!
//! Defines `SparkJob`: one driver plus N executors. The driver and executor
//! each carry a `RoleSpec` with their resource and pod-shaping declarations.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Container, PodDNSConfig, PodSecurityContext, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Deploy mode
// =============================================================================

/// Where the Spark driver runs
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    /// Driver runs outside the cluster's pod scheduling path
    Client,
    /// Driver runs as a pod in the cluster
    #[default]
    Cluster,
}

impl std::fmt::Display for DeployMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Cluster => write!(f, "cluster"),
        }
    }
}

// =============================================================================
// Role spec
// =============================================================================

/// A config map to mount into every container of a role's pods
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamePath {
    /// ConfigMap name
    pub name: String,
    /// Mount path inside the containers
    pub path: String,
}

/// Extended GPU resource request
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GpuSpec {
    /// Resource name, e.g. `nvidia.com/gpu`
    #[serde(default)]
    pub name: String,
    /// Number of devices; zero or negative requests nothing
    #[serde(default)]
    pub quantity: i64,
}

/// Driver or executor declarations
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    /// Number of cores (fractional allowed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<f64>,

    /// CPU request quantity, e.g. `"500m"`; wins over `cores`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_request: Option<String>,

    /// CPU limit quantity, e.g. `"2"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_limit: Option<String>,

    /// Memory quantity, e.g. `"1Gi"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    /// Memory overhead quantity added on top of `memory`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_overhead: Option<String>,

    /// Executor count; ignored for the driver, defaults to 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<i32>,

    /// Annotations for the role's pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Pod affinity, applied only when the pod has none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    /// Tolerations appended to the pod's list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    /// Node selector entries merged into the pod's selector
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Pod-level security context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,

    /// Extended GPU resource for the Spark container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuSpec>,

    /// Sidecar containers appended after the Spark container, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sidecars: Vec<Container>,

    /// DNS config replacing the pod's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<PodDNSConfig>,

    /// Scheduler that should place this role's pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,

    /// Run on the host network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_network: Option<bool>,

    /// Config maps mounted into every container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<NamePath>,

    /// Mounts of job-level volumes into the Spark container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

impl RoleSpec {
    /// Executor count with the default applied; negative counts read as zero
    pub fn instance_count(&self) -> u32 {
        self.instances.unwrap_or(1).max(0) as u32
    }
}

// =============================================================================
// Monitoring
// =============================================================================

/// Prometheus JMX exporter settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    /// Path to the JMX exporter jar in the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jmx_exporter_jar: Option<String>,

    /// Port the exporter listens on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Exporter config file already present in the image; disables the config map mount
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,

    /// Inline exporter configuration, rendered into `<job>-prom-conf`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
}

/// Metrics exposure for the job
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSpec {
    /// Expose driver metrics
    #[serde(default)]
    pub expose_driver_metrics: bool,

    /// Expose executor metrics
    #[serde(default)]
    pub expose_executor_metrics: bool,

    /// Prometheus exporter settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusSpec>,
}

// =============================================================================
// Batch scheduler options
// =============================================================================

/// Options forwarded to the batch scheduler's grouping object
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSchedulerOptions {
    /// Scheduler queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,

    /// Priority class for the group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
}

// =============================================================================
// CRD
// =============================================================================

/// A Spark application: one driver and a set of executors
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "sparkle.dev",
    version = "v1alpha1",
    kind = "SparkJob",
    plural = "sparkjobs",
    shortname = "sj",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".spec.mode"}"#,
    printcolumn = r#"{"name":"Scheduler","type":"string","jsonPath":".spec.batchScheduler"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SparkJobSpec {
    /// Deploy mode
    #[serde(default)]
    pub mode: DeployMode,

    /// Batch scheduler backend that should gang-schedule this job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_scheduler: Option<String>,

    /// Options for the batch scheduler backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_scheduler_options: Option<BatchSchedulerOptions>,

    /// Driver declarations
    #[serde(default)]
    pub driver: RoleSpec,

    /// Executor declarations
    #[serde(default)]
    pub executor: RoleSpec,

    /// Volumes the roles may mount through `volumeMounts`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// ConfigMap holding Spark configuration files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spark_config_map: Option<String>,

    /// ConfigMap holding Hadoop configuration files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hadoop_config_map: Option<String>,

    /// Metrics exposure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringSpec>,
}

/// Pod role, read from the `spark-role` label
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SparkRole {
    /// The Spark driver
    Driver,
    /// A Spark executor
    Executor,
}

impl SparkRole {
    /// Parse a `spark-role` label value
    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            crate::SPARK_DRIVER_ROLE => Some(Self::Driver),
            crate::SPARK_EXECUTOR_ROLE => Some(Self::Executor),
            _ => None,
        }
    }

    /// Name of the Spark container in pods of this role
    pub fn container_name(&self) -> &'static str {
        match self {
            Self::Driver => crate::SPARK_DRIVER_CONTAINER_NAME,
            Self::Executor => crate::SPARK_EXECUTOR_CONTAINER_NAME,
        }
    }
}

impl SparkJob {
    /// Declarations for the given role
    pub fn role(&self, role: SparkRole) -> &RoleSpec {
        match role {
            SparkRole::Driver => &self.spec.driver,
            SparkRole::Executor => &self.spec.executor,
        }
    }

    /// Name of the ConfigMap holding the Prometheus exporter config
    pub fn prometheus_config_map_name(&self) -> String {
        format!("{}-prom-conf", self.name_any())
    }

    /// Whether the role's metrics are exposed through a Prometheus config map mount
    pub fn exports_prometheus_config(&self, role: SparkRole) -> bool {
        let Some(monitoring) = &self.spec.monitoring else {
            return false;
        };
        let Some(prometheus) = &monitoring.prometheus else {
            return false;
        };
        let exposed = match role {
            SparkRole::Driver => monitoring.expose_driver_metrics,
            SparkRole::Executor => monitoring.expose_executor_metrics,
        };
        exposed && prometheus.config_file.is_none()
    }

    /// Controller owner reference pointing at this job
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: Self::api_version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
            name: self.name_any(),
            uid: self.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}
