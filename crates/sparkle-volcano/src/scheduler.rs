//! Batch scheduler backends
//!
//! A [`BatchScheduler`] is consulted once per job submission. Backends are
//! kept in an explicit [`BatchSchedulers`] table that the caller builds and
//! hands to whatever submits jobs; there is no global registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

use sparkle_common::crd::SparkJob;
use sparkle_common::{Error, Result};

/// Name the no-op backend is registered under
pub const DEFAULT_SCHEDULER_NAME: &str = "default";

/// A backend that prepares a job for gang scheduling
#[async_trait]
pub trait BatchScheduler: Send + Sync {
    /// Name jobs use in `spec.batchScheduler` to select this backend
    fn name(&self) -> &str;

    /// Whether this backend wants to handle `job`. Must not have side effects.
    fn should_schedule(&self, job: &SparkJob) -> bool;

    /// Prepare the cluster for `job` and return an annotated copy of it.
    ///
    /// The input is never modified; on error nothing has been stamped.
    async fn do_batch_scheduling(&self, job: &SparkJob) -> Result<SparkJob>;
}

/// Backend that leaves placement to the default kube-scheduler
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopScheduler;

#[async_trait]
impl BatchScheduler for NoopScheduler {
    fn name(&self) -> &str {
        DEFAULT_SCHEDULER_NAME
    }

    fn should_schedule(&self, _job: &SparkJob) -> bool {
        false
    }

    async fn do_batch_scheduling(&self, job: &SparkJob) -> Result<SparkJob> {
        Ok(job.clone())
    }
}

/// Backends keyed by name
#[derive(Clone, Default)]
pub struct BatchSchedulers {
    backends: BTreeMap<String, Arc<dyn BatchScheduler>>,
}

impl BatchSchedulers {
    /// Table holding only the no-op backend
    pub fn new() -> Self {
        Self::default().with(Arc::new(NoopScheduler))
    }

    /// Add a backend, replacing any registered under the same name
    pub fn register(&mut self, backend: Arc<dyn BatchScheduler>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, backend: Arc<dyn BatchScheduler>) -> Self {
        self.register(backend);
        self
    }

    /// Look up a backend by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn BatchScheduler>> {
        self.backends.get(name).cloned()
    }

    /// Registered backend names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    /// Run the backend `job` asks for.
    ///
    /// Jobs without `spec.batchScheduler`, and jobs the backend declines,
    /// come back unchanged. Naming an unregistered backend is a validation error.
    pub async fn schedule(&self, job: &SparkJob) -> Result<SparkJob> {
        let Some(name) = job.spec.batch_scheduler.as_deref() else {
            return Ok(job.clone());
        };

        let backend = self.get(name).ok_or_else(|| {
            Error::validation_for(
                job.name_any(),
                format!(
                    "unknown batch scheduler '{}', registered: {}",
                    name,
                    self.names().collect::<Vec<_>>().join(", ")
                ),
            )
        })?;

        if !backend.should_schedule(job) {
            debug!(job = %job.name_any(), scheduler = %name, "Batch scheduler declined job");
            return Ok(job.clone());
        }

        backend.do_batch_scheduling(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparkle_common::crd::SparkJobSpec;

    struct StampingScheduler;

    #[async_trait]
    impl BatchScheduler for StampingScheduler {
        fn name(&self) -> &str {
            "stamp"
        }

        fn should_schedule(&self, job: &SparkJob) -> bool {
            job.spec.executor.instances != Some(0)
        }

        async fn do_batch_scheduling(&self, job: &SparkJob) -> Result<SparkJob> {
            let mut job = job.clone();
            job.spec
                .driver
                .annotations
                .insert("stamped".to_string(), "yes".to_string());
            Ok(job)
        }
    }

    fn job(scheduler: Option<&str>) -> SparkJob {
        SparkJob::new(
            "spark-pi",
            SparkJobSpec {
                batch_scheduler: scheduler.map(String::from),
                ..Default::default()
            },
        )
    }

    fn table() -> BatchSchedulers {
        BatchSchedulers::new().with(Arc::new(StampingScheduler))
    }

    #[test]
    fn new_table_has_default_backend() {
        let table = BatchSchedulers::new();
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["default"]);
        assert!(table.get("volcano").is_none());
    }

    #[tokio::test]
    async fn unset_scheduler_passes_job_through() {
        let input = job(None);
        let out = table().schedule(&input).await.unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn named_backend_runs() {
        let out = table().schedule(&job(Some("stamp"))).await.unwrap();
        assert_eq!(out.spec.driver.annotations["stamped"], "yes");
    }

    #[tokio::test]
    async fn declined_job_is_unchanged() {
        let mut input = job(Some("stamp"));
        input.spec.executor.instances = Some(0);
        let out = table().schedule(&input).await.unwrap();
        assert!(out.spec.driver.annotations.is_empty());
    }

    #[tokio::test]
    async fn default_backend_is_a_no_op() {
        let input = job(Some(DEFAULT_SCHEDULER_NAME));
        let out = table().schedule(&input).await.unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn unknown_backend_is_a_validation_error() {
        let err = table().schedule(&job(Some("yunikorn"))).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains("yunikorn"));
        assert!(err.to_string().contains("registered: default, stamp"));
    }
}
