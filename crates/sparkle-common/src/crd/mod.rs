//! Custom Resource Definitions for sparkle
//!
//! This module contains the SparkJob CRD and its nested spec types.

mod spark_job;

pub use spark_job::{
    BatchSchedulerOptions, DeployMode, GpuSpec, MonitoringSpec, NamePath, PrometheusSpec,
    RoleSpec, SparkJob, SparkJobSpec, SparkRole,
};
