//! Volcano gang-scheduling coordinator
//!
//! For each submitted SparkJob the coordinator sizes a PodGroup, creates or
//! re-syncs it, and stamps the group name onto the role annotations so the
//! pod mutation webhook can wire pods to the group.
//!
//! The role annotation is the only idempotency marker: a job whose annotation
//! is already set is returned untouched, and annotations are stamped only
//! after the PodGroup write succeeded.

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use sparkle_common::crd::{DeployMode, SparkJob};
use sparkle_common::retry::{retry_with_backoff, RetryConfig};
use sparkle_common::{Error, Result, GROUP_NAME_ANNOTATION_KEY};

use crate::client::PodGroupClient;
use crate::resources::{driver_request, executor_request, sum, to_resource_list, ResourceVector};
use crate::scheduler::BatchScheduler;
use crate::types::{PodGroup, PodGroupSpec, POD_GROUP_CRD_NAME};

/// Name jobs use to select the Volcano backend
pub const VOLCANO_SCHEDULER_NAME: &str = "volcano";

/// Default prefix of PodGroup names
pub const DEFAULT_GROUP_NAME_PREFIX: &str = "spark";

/// Members required before the first pod of a group is admitted.
/// The driver is scheduled alone; Volcano admits executors once it runs.
const INITIAL_MIN_MEMBER: i32 = 1;

/// Coordinator settings
#[derive(Clone, Debug, PartialEq)]
pub struct VolcanoConfig {
    /// PodGroup names are `<prefix>-<job>-pg`
    pub group_name_prefix: String,
    /// Bounds on retrying a PodGroup write that hit a conflict
    pub conflict_retry: RetryConfig,
}

impl Default for VolcanoConfig {
    fn default() -> Self {
        Self {
            group_name_prefix: DEFAULT_GROUP_NAME_PREFIX.to_string(),
            conflict_retry: RetryConfig::with_max_attempts(3),
        }
    }
}

/// Gang-schedules SparkJobs through Volcano PodGroups
pub struct VolcanoScheduler {
    pod_groups: Arc<dyn PodGroupClient>,
    config: VolcanoConfig,
}

impl VolcanoScheduler {
    /// Create the coordinator, failing if the PodGroup CRD is not installed
    pub async fn new(pod_groups: Arc<dyn PodGroupClient>, config: VolcanoConfig) -> Result<Self> {
        if !pod_groups.crd_installed().await? {
            return Err(Error::precondition_missing(POD_GROUP_CRD_NAME));
        }
        Ok(Self { pod_groups, config })
    }

    /// Deterministic PodGroup name for a job
    pub fn pod_group_name(&self, job_name: &str) -> String {
        format!("{}-{}-pg", self.config.group_name_prefix, job_name)
    }

    /// Create or re-sync the job's PodGroup, retrying lost races
    async fn sync_pod_group(
        &self,
        job: &SparkJob,
        namespace: &str,
        name: &str,
        min_member: i32,
        min_resources: &ResourceVector,
    ) -> Result<()> {
        let this = self;
        retry_with_backoff(
            &self.config.conflict_retry,
            "sync_pod_group",
            Error::is_conflict,
            move || this.try_sync_pod_group(job, namespace, name, min_member, min_resources),
        )
        .await
    }

    async fn try_sync_pod_group(
        &self,
        job: &SparkJob,
        namespace: &str,
        name: &str,
        min_member: i32,
        min_resources: &ResourceVector,
    ) -> Result<()> {
        match self.pod_groups.get(namespace, name).await? {
            None => {
                let pod_group = build_pod_group(job, namespace, name, min_member, min_resources);
                self.pod_groups.create(namespace, &pod_group).await?;
                info!(pod_group = %name, namespace = %namespace, min_member, "Created PodGroup");
            }
            Some(mut existing) if existing.spec.min_member != min_member => {
                let previous = existing.spec.min_member;
                existing.spec.min_member = min_member;
                self.pod_groups.replace(namespace, &existing).await?;
                info!(
                    pod_group = %name,
                    namespace = %namespace,
                    previous,
                    min_member,
                    "Updated PodGroup minMember"
                );
            }
            Some(_) => {
                debug!(pod_group = %name, namespace = %namespace, "PodGroup already in sync");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BatchScheduler for VolcanoScheduler {
    fn name(&self) -> &str {
        VOLCANO_SCHEDULER_NAME
    }

    fn should_schedule(&self, _job: &SparkJob) -> bool {
        true
    }

    #[instrument(skip(self, job), fields(job = %job.name_any()))]
    async fn do_batch_scheduling(&self, job: &SparkJob) -> Result<SparkJob> {
        let mut job = job.clone();
        let job_name = job.name_any();
        let namespace = job
            .namespace()
            .ok_or_else(|| Error::validation_for(&job_name, "SparkJob has no namespace"))?;
        let group = self.pod_group_name(&job_name);

        match job.spec.mode {
            DeployMode::Client => {
                if job.spec.executor.annotations.contains_key(GROUP_NAME_ANNOTATION_KEY) {
                    debug!("Executor already bound to a PodGroup");
                    return Ok(job);
                }
                let min_resources = executor_request(&job);
                self.sync_pod_group(&job, &namespace, &group, INITIAL_MIN_MEMBER, &min_resources)
                    .await?;
                job.spec
                    .executor
                    .annotations
                    .insert(GROUP_NAME_ANNOTATION_KEY.to_string(), group);
            }
            DeployMode::Cluster => {
                if job.spec.driver.annotations.contains_key(GROUP_NAME_ANNOTATION_KEY) {
                    debug!("Driver already bound to a PodGroup");
                    return Ok(job);
                }
                let min_resources = sum([&executor_request(&job), &driver_request(&job)]);
                self.sync_pod_group(&job, &namespace, &group, INITIAL_MIN_MEMBER, &min_resources)
                    .await?;
                job.spec
                    .driver
                    .annotations
                    .insert(GROUP_NAME_ANNOTATION_KEY.to_string(), group.clone());
                job.spec
                    .executor
                    .annotations
                    .insert(GROUP_NAME_ANNOTATION_KEY.to_string(), group);
            }
        }

        Ok(job)
    }
}

fn build_pod_group(
    job: &SparkJob,
    namespace: &str,
    name: &str,
    min_member: i32,
    min_resources: &ResourceVector,
) -> PodGroup {
    let options = job.spec.batch_scheduler_options.clone().unwrap_or_default();
    let mut pod_group = PodGroup::new(
        name,
        PodGroupSpec {
            min_member,
            min_resources: Some(to_resource_list(min_resources)),
            queue: options.queue,
            priority_class_name: options.priority_class_name,
        },
    );
    pod_group.metadata.namespace = Some(namespace.to_string());
    pod_group.metadata.owner_references = Some(vec![job.owner_reference()]);
    pod_group
}
