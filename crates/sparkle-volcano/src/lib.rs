//! Volcano gang scheduling for SparkJobs
//!
//! Sizes a Volcano PodGroup from a job's driver and executor declarations,
//! keeps it in sync, and stamps the group name onto the job so admitted pods
//! join the gang.

mod client;
mod coordinator;
pub mod resources;
mod scheduler;
mod types;

pub use client::{KubePodGroupClient, PodGroupClient};
pub use coordinator::{
    VolcanoConfig, VolcanoScheduler, DEFAULT_GROUP_NAME_PREFIX, VOLCANO_SCHEDULER_NAME,
};
pub use resources::ResourceVector;
pub use scheduler::{BatchScheduler, BatchSchedulers, NoopScheduler, DEFAULT_SCHEDULER_NAME};
pub use types::{PodGroup, PodGroupSpec, PodGroupStatus, POD_GROUP_CRD_NAME, POD_GROUP_KIND};
