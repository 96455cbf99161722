//! sparkle - gang scheduling and pod mutation for Spark jobs on Kubernetes

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use tracing::info;

use sparkle_common::crd::SparkJob;
use sparkle_common::retry::RetryConfig;
use sparkle_common::telemetry::{init_telemetry, TelemetryConfig};
use sparkle_common::FIELD_MANAGER;
use sparkle_volcano::{
    BatchSchedulers, KubePodGroupClient, VolcanoConfig, VolcanoScheduler,
    DEFAULT_GROUP_NAME_PREFIX, VOLCANO_SCHEDULER_NAME,
};
use sparkle_webhook::{webhook_router, KubeJobLookup, WebhookState};

/// sparkle - Spark pod mutation webhook and Volcano gang scheduling
#[derive(Parser, Debug)]
#[command(name = "sparkle", version, about, long_about = None)]
struct Cli {
    /// Generate the SparkJob CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "SPARKLE_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the pod mutation webhook
    ///
    /// TLS is expected to be terminated in front of this listener.
    Webhook {
        /// Address to listen on
        #[arg(long, env = "SPARKLE_LISTEN", default_value = "0.0.0.0:8080")]
        listen: SocketAddr,
    },

    /// Run batch scheduling for one SparkJob and write its annotations back
    Schedule {
        /// Namespace of the SparkJob
        namespace: String,

        /// Name of the SparkJob
        name: String,

        #[command(flatten)]
        volcano: VolcanoArgs,
    },
}

#[derive(Args, Debug, Clone, PartialEq)]
struct VolcanoArgs {
    /// Prefix of PodGroup names (`<prefix>-<job>-pg`)
    #[arg(long, env = "SPARKLE_GROUP_PREFIX", default_value = DEFAULT_GROUP_NAME_PREFIX)]
    group_prefix: String,

    /// Attempts at a PodGroup write that keeps hitting conflicts
    #[arg(long, env = "SPARKLE_CONFLICT_RETRIES", default_value_t = 3)]
    conflict_retries: u32,
}

impl VolcanoArgs {
    fn config(&self) -> VolcanoConfig {
        VolcanoConfig {
            group_name_prefix: self.group_prefix.clone(),
            conflict_retry: RetryConfig::with_max_attempts(self.conflict_retries.max(1)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&SparkJob::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        json: cli.log_json,
        ..Default::default()
    })?;

    match cli.command {
        Some(Commands::Webhook { listen }) => run_webhook(listen).await,
        Some(Commands::Schedule {
            namespace,
            name,
            volcano,
        }) => run_schedule(&namespace, &name, &volcano).await,
        None => {
            anyhow::bail!("no command given; run with --crd, `webhook` or `schedule`")
        }
    }
}

async fn run_webhook(listen: SocketAddr) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let state = Arc::new(WebhookState::new(Arc::new(KubeJobLookup::new(client))));
    let app = webhook_router(state);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind webhook listener on {listen}"))?;
    info!(addr = %listen, "Pod webhook started");

    axum::serve(listener, app)
        .await
        .context("Pod webhook server error")
}

async fn run_schedule(namespace: &str, name: &str, args: &VolcanoArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let jobs: Api<SparkJob> = Api::namespaced(client.clone(), namespace);
    let job = jobs
        .get(name)
        .await
        .with_context(|| format!("Failed to get SparkJob {namespace}/{name}"))?;

    let mut schedulers = BatchSchedulers::new();
    if job.spec.batch_scheduler.as_deref() == Some(VOLCANO_SCHEDULER_NAME) {
        let pod_groups = Arc::new(KubePodGroupClient::new(client.clone()));
        let volcano = VolcanoScheduler::new(pod_groups, args.config()).await?;
        schedulers.register(Arc::new(volcano));
    }

    let scheduled = schedulers.schedule(&job).await?;
    if scheduled.spec == job.spec {
        info!(job = %name, namespace = %namespace, "Nothing to write back");
        return Ok(());
    }

    let params = PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };
    jobs.patch(name, &params, &Patch::Merge(&annotations_patch(&scheduled)))
        .await
        .with_context(|| format!("Failed to annotate SparkJob {namespace}/{name}"))?;
    info!(job = %name, namespace = %namespace, "Stamped batch scheduling annotations");
    Ok(())
}

/// Merge patch carrying the role annotations a scheduler stamped
fn annotations_patch(job: &SparkJob) -> serde_json::Value {
    serde_json::json!({
        "spec": {
            "driver": {"annotations": job.spec.driver.annotations},
            "executor": {"annotations": job.spec.executor.annotations},
        }
    })
}
