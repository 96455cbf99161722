//! Mutating admission webhook for Spark pods
//!
//! Exposes the pod mutation engine behind `POST /mutate/pods`. The API server
//! sends every pod creation here; pods labelled as launched by sparkle get
//! their SparkJob's pod-level declarations patched in.

pub mod patch;
pub mod pod;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

pub use patch::build_patches;
pub use pod::{JobLookup, KubeJobLookup, WebhookError};

/// Shared state for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    /// Source of SparkJobs referenced by pods
    pub jobs: Arc<dyn JobLookup>,
}

impl WebhookState {
    /// Create a new webhook state with the given job lookup
    pub fn new(jobs: Arc<dyn JobLookup>) -> Self {
        Self { jobs }
    }
}

/// Create the webhook router with all mutation endpoints
///
/// - POST /mutate/pods - Patch Spark driver and executor pods
/// - GET /healthz - Liveness probe
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate/pods", post(pod::mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
