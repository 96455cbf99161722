//! Common types for sparkle: the SparkJob CRD, quantities, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod quantity;
pub mod retry;
pub mod telemetry;

pub use error::Error;
pub use quantity::ParsedQuantity;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every write sparkle makes to the API server
pub const FIELD_MANAGER: &str = "sparkle-operator";

/// Pod label Spark sets to mark a pod as driver or executor
pub const SPARK_ROLE_LABEL: &str = "spark-role";

/// `spark-role` value for driver pods
pub const SPARK_DRIVER_ROLE: &str = "driver";

/// `spark-role` value for executor pods
pub const SPARK_EXECUTOR_ROLE: &str = "executor";

/// Pod label carrying the owning SparkJob name
pub const JOB_NAME_LABEL: &str = "sparkle.dev/job-name";

/// Pod label gating admission mutation; only pods with value `"true"` are patched
pub const LAUNCHED_BY_SPARKLE_LABEL: &str = "sparkle.dev/launched-by-sparkle";

/// Name of the Spark container in driver pods
pub const SPARK_DRIVER_CONTAINER_NAME: &str = "spark-kubernetes-driver";

/// Name of the Spark container in executor pods
pub const SPARK_EXECUTOR_CONTAINER_NAME: &str = "executor";

/// Volume name for the job's Spark configuration ConfigMap
pub const SPARK_CONFIG_MAP_VOLUME_NAME: &str = "spark-configmap-volume";

/// Mount directory for the Spark configuration ConfigMap
pub const DEFAULT_SPARK_CONF_DIR: &str = "/etc/spark/conf";

/// Environment variable pointing Spark at its configuration directory
pub const SPARK_CONF_DIR_ENV_VAR: &str = "SPARK_CONF_DIR";

/// Volume name for the job's Hadoop configuration ConfigMap
pub const HADOOP_CONFIG_MAP_VOLUME_NAME: &str = "hadoop-configmap-volume";

/// Mount directory for the Hadoop configuration ConfigMap
pub const DEFAULT_HADOOP_CONF_DIR: &str = "/etc/hadoop/conf";

/// Environment variable pointing Hadoop at its configuration directory
pub const HADOOP_CONF_DIR_ENV_VAR: &str = "HADOOP_CONF_DIR";

/// Mount directory for the Prometheus JMX exporter configuration
pub const PROMETHEUS_CONFIG_MAP_MOUNT_PATH: &str = "/etc/metrics/conf";

/// Annotation linking a pod to its gang-scheduling group
pub const GROUP_NAME_ANNOTATION_KEY: &str = "scheduling.k8s.io/group-name";

/// DNS policy required for pods running on the host network
pub const HOST_NETWORK_DNS_POLICY: &str = "ClusterFirstWithHostNet";
