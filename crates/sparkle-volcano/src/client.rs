//! Typed access to Volcano PodGroups
//!
//! The coordinator only talks to the API server through [`PodGroupClient`],
//! so tests can drive every create/update/conflict path with a mock.

use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

use sparkle_common::kube_utils::{classify_write_error, crd_exists, is_not_found};
use sparkle_common::{Error, FIELD_MANAGER};

use crate::types::{PodGroup, POD_GROUP_CRD_NAME, POD_GROUP_KIND};

/// PodGroup operations needed for gang scheduling
///
/// Writes that lose a race (409) surface as [`Error::Conflict`]; a missing
/// object on read is `Ok(None)`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodGroupClient: Send + Sync {
    /// True if the PodGroup CRD is registered in the cluster
    async fn crd_installed(&self) -> Result<bool, Error>;

    /// Get a PodGroup by namespace and name
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<PodGroup>, Error>;

    /// Create a PodGroup
    async fn create(&self, namespace: &str, pod_group: &PodGroup) -> Result<PodGroup, Error>;

    /// Replace a PodGroup; the object's resourceVersion guards against lost updates
    async fn replace(&self, namespace: &str, pod_group: &PodGroup) -> Result<PodGroup, Error>;
}

/// Real Kubernetes client implementation
pub struct KubePodGroupClient {
    client: Client,
}

impl KubePodGroupClient {
    /// Create a new KubePodGroupClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<PodGroup> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl PodGroupClient for KubePodGroupClient {
    async fn crd_installed(&self) -> Result<bool, Error> {
        crd_exists(&self.client, POD_GROUP_CRD_NAME).await
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<PodGroup>, Error> {
        match self.api(namespace).get(name).await {
            Ok(pg) => Ok(Some(pg)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, namespace: &str, pod_group: &PodGroup) -> Result<PodGroup, Error> {
        self.api(namespace)
            .create(&Self::post_params(), pod_group)
            .await
            .map_err(|e| classify_write_error(POD_GROUP_KIND, &pod_group.name_any(), e))
    }

    async fn replace(&self, namespace: &str, pod_group: &PodGroup) -> Result<PodGroup, Error> {
        let name = pod_group.name_any();
        self.api(namespace)
            .replace(&name, &Self::post_params(), pod_group)
            .await
            .map_err(|e| classify_write_error(POD_GROUP_KIND, &name, e))
    }
}
