//! Pod mutation admission handler
//!
//! Handles AdmissionReview requests for Spark pods: looks up the owning
//! SparkJob by the pod's job-name label and answers with the patch built by
//! [`build_patches`](crate::patch::build_patches).

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, DynamicObject},
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    Client, ResourceExt,
};
use tracing::{debug, error, info, warn};

#[cfg(test)]
use mockall::automock;

use sparkle_common::crd::SparkJob;
use sparkle_common::kube_utils::is_not_found;
use sparkle_common::{JOB_NAME_LABEL, LAUNCHED_BY_SPARKLE_LABEL};

use crate::patch::build_patches;
use crate::WebhookState;

/// Error type for webhook operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The admission review carried no request
    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    /// The owning SparkJob could not be read
    #[error("failed to look up SparkJob {namespace}/{name}: {source}")]
    JobLookup {
        /// Namespace of the pod
        namespace: String,
        /// Job name from the pod's label
        name: String,
        /// Underlying error
        source: sparkle_common::Error,
    },

    /// The job's declarations could not be turned into a patch
    #[error("failed to build pod patch: {0}")]
    Patch(#[source] sparkle_common::Error),

    /// The patch could not be attached to the response
    #[error("patch serialization error: {0}")]
    Serialization(String),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::InvalidReview(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

/// Reads SparkJobs for the webhook
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobLookup: Send + Sync {
    /// Get a SparkJob, `Ok(None)` if it does not exist
    async fn get(&self, namespace: &str, name: &str)
        -> Result<Option<SparkJob>, sparkle_common::Error>;
}

/// Looks SparkJobs up through the API server
pub struct KubeJobLookup {
    client: Client,
}

impl KubeJobLookup {
    /// Create a new KubeJobLookup wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobLookup for KubeJobLookup {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SparkJob>, sparkle_common::Error> {
        let api: Api<SparkJob> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(job) => Ok(Some(job)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Handle mutating admission review for Pods
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<Pod>>,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    let request: AdmissionRequest<Pod> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Failed to parse admission request");
            return Err(WebhookError::InvalidReview(e.to_string()));
        }
    };

    let response = match mutate_pod(&state, &request).await {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %request.uid, error = %e, "Denying pod");
            AdmissionResponse::from(&request).deny(e.to_string())
        }
    };
    Ok(Json(response.into_review()))
}

/// Decide the admission response for a single pod
pub async fn mutate_pod(
    state: &WebhookState,
    request: &AdmissionRequest<Pod>,
) -> Result<AdmissionResponse, WebhookError> {
    let uid = &request.uid;
    let allow = || AdmissionResponse::from(request);

    let Some(pod) = &request.object else {
        debug!(uid = %uid, "No pod object in request, allowing unchanged");
        return Ok(allow());
    };

    let labels = pod.labels();
    if labels.get(LAUNCHED_BY_SPARKLE_LABEL).map(String::as_str) != Some("true") {
        debug!(uid = %uid, pod = %pod.name_any(), "Pod not launched by sparkle, allowing unchanged");
        return Ok(allow());
    }
    let Some(job_name) = labels.get(JOB_NAME_LABEL) else {
        warn!(uid = %uid, pod = %pod.name_any(), "Sparkle pod has no job-name label, allowing unchanged");
        return Ok(allow());
    };
    let Some(namespace) = request.namespace.clone().or_else(|| pod.namespace()) else {
        warn!(uid = %uid, job = %job_name, "Pod has no namespace, allowing unchanged");
        return Ok(allow());
    };

    let job = state
        .jobs
        .get(&namespace, job_name)
        .await
        .map_err(|source| WebhookError::JobLookup {
            namespace: namespace.clone(),
            name: job_name.clone(),
            source,
        })?;
    let Some(job) = job else {
        warn!(uid = %uid, job = %job_name, namespace = %namespace, "SparkJob not found, allowing unchanged");
        return Ok(allow());
    };

    let ops = build_patches(pod, &job).map_err(WebhookError::Patch)?;
    info!(
        uid = %uid,
        job = %job_name,
        pod = %pod.name_any(),
        patch_ops = ops.len(),
        "Patching Spark pod"
    );

    allow()
        .with_patch(json_patch::Patch(ops))
        .map_err(|e| WebhookError::Serialization(e.to_string()))
}
