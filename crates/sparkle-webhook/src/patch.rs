//! Pod mutation engine
//!
//! [`build_patches`] derives the JSON patch that turns a Spark driver or
//! executor pod into one that honours its SparkJob's pod-level declarations.
//! It never touches the input pod: a [`PatchBuilder`] tracks which lists and
//! maps the patched document already holds, so every operation is valid
//! against the state left by the ones before it.
//!
//! The output depends only on `(pod, job)`; maps are ordered, so identical
//! inputs yield identical patches.

use std::collections::{BTreeMap, BTreeSet};

use json_patch::{AddOperation, PatchOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, Pod, PodSpec, Volume, VolumeMount,
};
use kube::ResourceExt;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use sparkle_common::crd::{GpuSpec, NamePath, RoleSpec, SparkJob, SparkRole};
use sparkle_common::{
    Error, ParsedQuantity, Result, DEFAULT_HADOOP_CONF_DIR, DEFAULT_SPARK_CONF_DIR,
    HADOOP_CONFIG_MAP_VOLUME_NAME, HADOOP_CONF_DIR_ENV_VAR, HOST_NETWORK_DNS_POLICY,
    PROMETHEUS_CONFIG_MAP_MOUNT_PATH, SPARK_CONFIG_MAP_VOLUME_NAME, SPARK_CONF_DIR_ENV_VAR,
    SPARK_ROLE_LABEL,
};

/// Build the patch for `pod`, a driver or executor of `job`.
///
/// Pods without a recognised `spark-role` label only get the owner reference.
/// A malformed `coreLimit` is an error; every other missing or empty
/// declaration simply produces no operation.
pub fn build_patches(pod: &Pod, job: &SparkJob) -> Result<Vec<PatchOperation>> {
    let spec = pod
        .spec
        .as_ref()
        .ok_or_else(|| Error::validation_for(job.name_any(), "pod has no spec"))?;

    let mut builder = PatchBuilder::new(pod, spec);
    builder.add_owner_reference(job)?;

    let Some(role) = pod
        .labels()
        .get(SPARK_ROLE_LABEL)
        .and_then(|value| SparkRole::from_label(value))
    else {
        debug!(pod = %pod.name_any(), "Pod has no Spark role, only adding owner reference");
        return Ok(builder.finish());
    };
    let role_spec = job.role(role);
    builder.select_primary(spec, role);

    builder.add_job_volumes(&job.spec.volumes, &role_spec.volume_mounts)?;
    if let Some(config_map) = &job.spec.spark_config_map {
        builder.add_conf_config_map(
            SPARK_CONFIG_MAP_VOLUME_NAME,
            config_map,
            DEFAULT_SPARK_CONF_DIR,
            SPARK_CONF_DIR_ENV_VAR,
        )?;
    }
    if let Some(config_map) = &job.spec.hadoop_config_map {
        builder.add_conf_config_map(
            HADOOP_CONFIG_MAP_VOLUME_NAME,
            config_map,
            DEFAULT_HADOOP_CONF_DIR,
            HADOOP_CONF_DIR_ENV_VAR,
        )?;
    }
    builder.add_config_maps(&role_spec.config_maps)?;
    if job.exports_prometheus_config(role) {
        builder.add_prometheus_config_map(&job.prometheus_config_map_name())?;
    }

    builder.add_pod_fields(role_spec)?;
    builder.add_cpu_limit(role, role_spec.core_limit.as_deref())?;
    builder.add_gpu(role_spec.gpu.as_ref());
    builder.add_host_network(role_spec.host_network);
    builder.add_annotations(&role_spec.annotations);

    Ok(builder.finish())
}

/// What the patched document holds for one container
#[derive(Clone, Copy, Debug, Default)]
struct ContainerState {
    has_volume_mounts: bool,
    has_env: bool,
    has_resources: bool,
    has_limits: bool,
    has_requests: bool,
}

impl ContainerState {
    fn observe(container: &Container) -> Self {
        let resources = container.resources.as_ref();
        Self {
            has_volume_mounts: container.volume_mounts.is_some(),
            has_env: container.env.is_some(),
            has_resources: resources.is_some(),
            has_limits: resources.is_some_and(|r| r.limits.is_some()),
            has_requests: resources.is_some_and(|r| r.requests.is_some()),
        }
    }
}

/// Accumulates operations over a read-only view of the base pod
struct PatchBuilder {
    ops: Vec<PatchOperation>,
    containers: Vec<ContainerState>,
    primary: Option<usize>,
    has_owner_references: bool,
    has_annotations: bool,
    has_volumes: bool,
    has_tolerations: bool,
    has_node_selector: bool,
    has_affinity: bool,
    has_security_context: bool,
    has_scheduler_name: bool,
    has_dns_config: bool,
    has_dns_policy: bool,
    has_host_network: bool,
    volume_names: BTreeSet<String>,
}

impl PatchBuilder {
    fn new(pod: &Pod, spec: &PodSpec) -> Self {
        Self {
            ops: Vec::new(),
            containers: spec.containers.iter().map(ContainerState::observe).collect(),
            primary: None,
            has_owner_references: pod.metadata.owner_references.is_some(),
            has_annotations: pod.metadata.annotations.is_some(),
            has_volumes: spec.volumes.is_some(),
            has_tolerations: spec.tolerations.is_some(),
            has_node_selector: spec.node_selector.is_some(),
            has_affinity: spec.affinity.is_some(),
            has_security_context: spec.security_context.is_some(),
            has_scheduler_name: spec.scheduler_name.is_some(),
            has_dns_config: spec.dns_config.is_some(),
            has_dns_policy: spec.dns_policy.is_some(),
            has_host_network: spec.host_network.is_some(),
            volume_names: BTreeSet::new(),
        }
    }

    fn finish(self) -> Vec<PatchOperation> {
        self.ops
    }

    /// The Spark container is the one named for the role, else the first
    fn select_primary(&mut self, spec: &PodSpec, role: SparkRole) {
        self.primary = spec
            .containers
            .iter()
            .position(|c| c.name == role.container_name())
            .or((!spec.containers.is_empty()).then_some(0));
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    fn add_owner_reference(&mut self, job: &SparkJob) -> Result<()> {
        let value = to_json(&job.owner_reference())?;
        append(
            &mut self.ops,
            &["metadata", "ownerReferences"],
            &mut self.has_owner_references,
            value,
        );
        Ok(())
    }

    fn add_annotations(&mut self, annotations: &BTreeMap<String, String>) {
        merge_map(
            &mut self.ops,
            &["metadata", "annotations"],
            &mut self.has_annotations,
            annotations,
        );
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    /// Job volumes referenced by the role's mounts, mounted on the Spark container
    fn add_job_volumes(&mut self, volumes: &[Volume], mounts: &[VolumeMount]) -> Result<()> {
        let Some(primary) = self.primary else {
            return Ok(());
        };
        for mount in mounts {
            let Some(volume) = volumes.iter().find(|v| v.name == mount.name) else {
                debug!(volume = %mount.name, "Mount references an undeclared volume, skipping");
                continue;
            };
            self.add_volume(volume)?;
            self.add_volume_mount(primary, mount)?;
        }
        Ok(())
    }

    /// Operator-managed config dir: volume, mount and env var on every container
    fn add_conf_config_map(
        &mut self,
        volume_name: &str,
        config_map: &str,
        mount_path: &str,
        env_var: &str,
    ) -> Result<()> {
        self.add_volume(&config_map_volume(volume_name, config_map))?;
        let mount = VolumeMount {
            name: volume_name.to_string(),
            mount_path: mount_path.to_string(),
            ..Default::default()
        };
        let env = EnvVar {
            name: env_var.to_string(),
            value: Some(mount_path.to_string()),
            ..Default::default()
        };
        for index in 0..self.containers.len() {
            self.add_volume_mount(index, &mount)?;
            self.add_env(index, &env)?;
        }
        Ok(())
    }

    /// User config maps, each as `<name>-vol` on every container
    fn add_config_maps(&mut self, config_maps: &[NamePath]) -> Result<()> {
        for NamePath { name, path } in config_maps {
            let volume_name = format!("{}-vol", name);
            self.add_volume(&config_map_volume(&volume_name, name))?;
            let mount = VolumeMount {
                name: volume_name,
                mount_path: path.clone(),
                ..Default::default()
            };
            for index in 0..self.containers.len() {
                self.add_volume_mount(index, &mount)?;
            }
        }
        Ok(())
    }

    fn add_prometheus_config_map(&mut self, config_map: &str) -> Result<()> {
        let Some(primary) = self.primary else {
            return Ok(());
        };
        let volume_name = format!("{}-vol", config_map);
        self.add_volume(&config_map_volume(&volume_name, config_map))?;
        let mount = VolumeMount {
            name: volume_name,
            mount_path: PROMETHEUS_CONFIG_MAP_MOUNT_PATH.to_string(),
            ..Default::default()
        };
        self.add_volume_mount(primary, &mount)
    }

    /// Append a volume once per patch; the pod's own volumes are never consulted
    fn add_volume(&mut self, volume: &Volume) -> Result<()> {
        if !self.volume_names.insert(volume.name.clone()) {
            return Ok(());
        }
        append(
            &mut self.ops,
            &["spec", "volumes"],
            &mut self.has_volumes,
            to_json(volume)?,
        );
        Ok(())
    }

    fn add_volume_mount(&mut self, container: usize, mount: &VolumeMount) -> Result<()> {
        let value = to_json(mount)?;
        let index = container.to_string();
        if let Some(state) = self.containers.get_mut(container) {
            append(
                &mut self.ops,
                &["spec", "containers", &index, "volumeMounts"],
                &mut state.has_volume_mounts,
                value,
            );
        }
        Ok(())
    }

    fn add_env(&mut self, container: usize, env: &EnvVar) -> Result<()> {
        let value = to_json(env)?;
        let index = container.to_string();
        if let Some(state) = self.containers.get_mut(container) {
            append(
                &mut self.ops,
                &["spec", "containers", &index, "env"],
                &mut state.has_env,
                value,
            );
        }
        Ok(())
    }

    // =========================================================================
    // Pod spec fields
    // =========================================================================

    fn add_pod_fields(&mut self, role: &RoleSpec) -> Result<()> {
        // Only fill affinity in; never clobber what the pod was created with.
        if let Some(affinity) = &role.affinity {
            if !self.has_affinity {
                self.ops.push(add(&["spec", "affinity"], to_json(affinity)?));
                self.has_affinity = true;
            }
        }

        for toleration in &role.tolerations {
            append(
                &mut self.ops,
                &["spec", "tolerations"],
                &mut self.has_tolerations,
                to_json(toleration)?,
            );
        }

        let first_sidecar = self.containers.len();
        for (offset, sidecar) in role.sidecars.iter().enumerate() {
            let index = (first_sidecar + offset).to_string();
            self.ops
                .push(add(&["spec", "containers", &index], to_json(sidecar)?));
            self.containers.push(ContainerState::observe(sidecar));
        }

        if let Some(security_context) = &role.security_context {
            let value = to_json(security_context)?;
            set(
                &mut self.ops,
                &["spec", "securityContext"],
                &mut self.has_security_context,
                value,
            );
        }

        if let Some(scheduler_name) = &role.scheduler_name {
            set(
                &mut self.ops,
                &["spec", "schedulerName"],
                &mut self.has_scheduler_name,
                Value::String(scheduler_name.clone()),
            );
        }

        if let Some(dns_config) = &role.dns_config {
            let value = to_json(dns_config)?;
            set(
                &mut self.ops,
                &["spec", "dnsConfig"],
                &mut self.has_dns_config,
                value,
            );
        }

        merge_map(
            &mut self.ops,
            &["spec", "nodeSelector"],
            &mut self.has_node_selector,
            &role.node_selector,
        );

        Ok(())
    }

    fn add_host_network(&mut self, host_network: Option<bool>) {
        if host_network != Some(true) {
            return;
        }
        set(
            &mut self.ops,
            &["spec", "hostNetwork"],
            &mut self.has_host_network,
            Value::Bool(true),
        );
        set(
            &mut self.ops,
            &["spec", "dnsPolicy"],
            &mut self.has_dns_policy,
            Value::String(HOST_NETWORK_DNS_POLICY.to_string()),
        );
    }

    // =========================================================================
    // Resources
    // =========================================================================

    fn add_cpu_limit(&mut self, role: SparkRole, core_limit: Option<&str>) -> Result<()> {
        let Some(raw) = core_limit else {
            return Ok(());
        };
        let field = match role {
            SparkRole::Driver => "spec.driver.coreLimit",
            SparkRole::Executor => "spec.executor.coreLimit",
        };
        let limit =
            ParsedQuantity::parse(raw).map_err(|e| Error::quantity(field, raw, e.to_string()))?;
        self.set_limit("cpu", limit, false);
        Ok(())
    }

    fn add_gpu(&mut self, gpu: Option<&GpuSpec>) {
        let Some(GpuSpec { name, quantity }) = gpu else {
            return;
        };
        if name.is_empty() || *quantity <= 0 {
            return;
        }
        self.set_limit(name, ParsedQuantity::from_units(*quantity), true);
    }

    /// Set a limit on the Spark container, optionally mirroring it into
    /// requests when the container already declares requests
    fn set_limit(&mut self, resource: &str, quantity: ParsedQuantity, mirror_request: bool) {
        let Some(primary) = self.primary else {
            return;
        };
        let Some(state) = self.containers.get_mut(primary) else {
            return;
        };
        let index = primary.to_string();
        let value = Value::String(quantity.to_string());

        if !state.has_resources {
            let resources = serde_json::json!({ "limits": { resource: value.clone() } });
            self.ops
                .push(add(&["spec", "containers", &index, "resources"], resources));
            state.has_resources = true;
            state.has_limits = true;
        } else if !state.has_limits {
            let limits = serde_json::json!({ resource: value.clone() });
            self.ops.push(add(
                &["spec", "containers", &index, "resources", "limits"],
                limits,
            ));
            state.has_limits = true;
        } else {
            self.ops.push(add(
                &["spec", "containers", &index, "resources", "limits", resource],
                value.clone(),
            ));
        }

        if mirror_request && state.has_requests {
            self.ops.push(add(
                &["spec", "containers", &index, "resources", "requests", resource],
                value,
            ));
        }
    }
}

fn config_map_volume(volume_name: &str, config_map: &str) -> Volume {
    Volume {
        name: volume_name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pointer(tokens: &[&str]) -> PointerBuf {
    PointerBuf::from_tokens(tokens.iter().copied())
}

fn add(tokens: &[&str], value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path: pointer(tokens),
        value,
    })
}

/// Add the field if absent, replace it if present
fn set(ops: &mut Vec<PatchOperation>, tokens: &[&str], present: &mut bool, value: Value) {
    if *present {
        ops.push(PatchOperation::Replace(ReplaceOperation {
            path: pointer(tokens),
            value,
        }));
    } else {
        ops.push(add(tokens, value));
        *present = true;
    }
}

/// Append to a list, creating it on first use
fn append(ops: &mut Vec<PatchOperation>, list: &[&str], present: &mut bool, item: Value) {
    if *present {
        let mut tokens = list.to_vec();
        tokens.push("-");
        ops.push(add(&tokens, item));
    } else {
        ops.push(add(list, Value::Array(vec![item])));
        *present = true;
    }
}

/// Merge string entries into a map, creating it on first use; entries win on collision
fn merge_map(
    ops: &mut Vec<PatchOperation>,
    map: &[&str],
    present: &mut bool,
    entries: &BTreeMap<String, String>,
) {
    if entries.is_empty() {
        return;
    }
    if !*present {
        let value = entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>();
        ops.push(add(map, Value::Object(value)));
        *present = true;
        return;
    }
    for (key, value) in entries {
        let mut tokens = map.to_vec();
        tokens.push(key);
        ops.push(add(&tokens, Value::String(value.clone())));
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Affinity, HostPathVolumeSource, NodeAffinity, NodeSelector, NodeSelectorRequirement,
        NodeSelectorTerm, PodDNSConfig, PodSecurityContext, ResourceRequirements, Toleration,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use sparkle_common::crd::{MonitoringSpec, PrometheusSpec, SparkJobSpec};
    use sparkle_common::{
        GROUP_NAME_ANNOTATION_KEY, LAUNCHED_BY_SPARKLE_LABEL, SPARK_DRIVER_CONTAINER_NAME,
        SPARK_EXECUTOR_CONTAINER_NAME,
    };

    // =========================================================================
    // Fixtures
    // =========================================================================

    fn spark_job(spec: SparkJobSpec) -> SparkJob {
        let mut job = SparkJob::new("spark-test", spec);
        job.metadata.namespace = Some("default".to_string());
        job.metadata.uid = Some("spark-test-1".to_string());
        job
    }

    fn spark_pod(role: &str, container: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(format!("spark-{}", role));
        pod.metadata.labels = Some(BTreeMap::from([
            (SPARK_ROLE_LABEL.to_string(), role.to_string()),
            (LAUNCHED_BY_SPARKLE_LABEL.to_string(), "true".to_string()),
        ]));
        pod.spec = Some(PodSpec {
            containers: vec![Container {
                name: container.to_string(),
                image: Some(format!("spark-{}:latest", role)),
                ..Default::default()
            }],
            ..Default::default()
        });
        pod
    }

    fn driver_pod() -> Pod {
        spark_pod("driver", SPARK_DRIVER_CONTAINER_NAME)
    }

    fn executor_pod() -> Pod {
        spark_pod("executor", SPARK_EXECUTOR_CONTAINER_NAME)
    }

    /// Apply the generated patch the way the API server would
    fn patched(pod: &Pod, job: &SparkJob) -> Pod {
        let ops = build_patches(pod, job).unwrap();
        let mut doc = serde_json::to_value(pod).unwrap();
        json_patch::patch(&mut doc, &ops).unwrap();
        serde_json::from_value(doc).unwrap()
    }

    fn pod_spec(pod: &Pod) -> &PodSpec {
        pod.spec.as_ref().unwrap()
    }

    fn first_container(pod: &Pod) -> &Container {
        &pod_spec(pod).containers[0]
    }

    // =========================================================================
    // Owner reference
    // =========================================================================

    #[test]
    fn owner_reference_is_added() {
        let job = spark_job(SparkJobSpec::default());
        let pod = patched(&driver_pod(), &job);

        let owners = pod.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].uid, "spark-test-1");
    }

    #[test]
    fn owner_reference_is_additive() {
        let job = spark_job(SparkJobSpec::default());
        let mut pod = driver_pod();
        pod.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "v1".to_string(),
            kind: "ReplicaSet".to_string(),
            name: "other".to_string(),
            uid: "other-uid".to_string(),
            ..Default::default()
        }]);

        let owners = patched(&pod, &job).metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 2);
        assert_eq!(owners[0].uid, "other-uid");
        assert_eq!(owners[1].uid, "spark-test-1");
    }

    #[test]
    fn pod_without_role_only_gets_owner_reference() {
        let job = spark_job(SparkJobSpec {
            driver: RoleSpec {
                scheduler_name: Some("volcano".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        let mut pod = driver_pod();
        pod.metadata
            .labels
            .as_mut()
            .unwrap()
            .insert(SPARK_ROLE_LABEL.to_string(), "shuffle".to_string());

        let ops = build_patches(&pod, &job).unwrap();
        assert_eq!(ops.len(), 1);
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    fn job_with_volume() -> SparkJob {
        spark_job(SparkJobSpec {
            volumes: vec![Volume {
                name: "spark".to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: "/spark".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            driver: RoleSpec {
                volume_mounts: vec![VolumeMount {
                    name: "spark".to_string(),
                    mount_path: "/mnt/spark".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn referenced_volumes_are_added_with_mounts() {
        let job = job_with_volume();
        let pod = patched(&driver_pod(), &job);

        let volumes = pod_spec(&pod).volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0], job.spec.volumes[0]);
        let mounts = first_container(&pod).volume_mounts.as_ref().unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0], job.spec.driver.volume_mounts[0]);
    }

    #[test]
    fn volumes_append_to_existing_lists() {
        let job = job_with_volume();
        let mut pod = driver_pod();
        let spec = pod.spec.as_mut().unwrap();
        spec.volumes = Some(vec![Volume {
            name: "volume1".to_string(),
            ..Default::default()
        }]);
        spec.containers[0].volume_mounts = Some(vec![VolumeMount {
            name: "volume1".to_string(),
            mount_path: "/mnt/volume1".to_string(),
            ..Default::default()
        }]);

        let pod = patched(&pod, &job);
        let volumes = pod_spec(&pod).volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[1], job.spec.volumes[0]);
        let mounts = first_container(&pod).volume_mounts.as_ref().unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[1].mount_path, "/mnt/spark");
    }

    #[test]
    fn job_volume_is_appended_even_when_pod_has_same_name() {
        let job = job_with_volume();
        let mut pod = driver_pod();
        pod.spec.as_mut().unwrap().volumes = Some(vec![Volume {
            name: "spark".to_string(),
            empty_dir: Some(Default::default()),
            ..Default::default()
        }]);

        let pod = patched(&pod, &job);
        let volumes = pod_spec(&pod).volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 2);
        assert!(volumes[0].empty_dir.is_some());
        assert_eq!(volumes[1], job.spec.volumes[0]);
        assert_eq!(volumes[1].host_path.as_ref().unwrap().path, "/spark");
        let mounts = first_container(&pod).volume_mounts.as_ref().unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_path, "/mnt/spark");
    }

    #[test]
    fn job_volume_mounted_twice_is_added_once() {
        let mut job = job_with_volume();
        job.spec.driver.volume_mounts.push(VolumeMount {
            name: "spark".to_string(),
            mount_path: "/opt/spark-data".to_string(),
            ..Default::default()
        });

        let pod = patched(&driver_pod(), &job);
        assert_eq!(pod_spec(&pod).volumes.as_ref().unwrap().len(), 1);
        let mounts = first_container(&pod).volume_mounts.as_ref().unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[1].mount_path, "/opt/spark-data");
    }

    #[test]
    fn mounts_of_undeclared_volumes_are_skipped() {
        let mut job = job_with_volume();
        job.spec.volumes.clear();
        let pod = patched(&driver_pod(), &job);
        assert!(pod_spec(&pod).volumes.is_none());
        assert!(first_container(&pod).volume_mounts.is_none());
    }

    #[test]
    fn user_config_maps_mount_on_every_container() {
        let job = spark_job(SparkJobSpec {
            driver: RoleSpec {
                config_maps: vec![NamePath {
                    name: "foo".to_string(),
                    path: "/path/to/foo".to_string(),
                }],
                ..Default::default()
            },
            ..Default::default()
        });
        let mut pod = driver_pod();
        pod.spec.as_mut().unwrap().containers.push(Container {
            name: "logger".to_string(),
            ..Default::default()
        });

        let pod = patched(&pod, &job);
        let volumes = pod_spec(&pod).volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "foo-vol");
        assert_eq!(volumes[0].config_map.as_ref().unwrap().name, "foo");
        for container in &pod_spec(&pod).containers {
            let mounts = container.volume_mounts.as_ref().unwrap();
            assert_eq!(mounts.len(), 1);
            assert_eq!(mounts[0].mount_path, "/path/to/foo");
        }
    }

    #[test]
    fn spark_config_map_sets_volume_mount_and_env() {
        let job = spark_job(SparkJobSpec {
            spark_config_map: Some("spark-conf".to_string()),
            ..Default::default()
        });
        let pod = patched(&driver_pod(), &job);

        let volumes = pod_spec(&pod).volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, SPARK_CONFIG_MAP_VOLUME_NAME);
        assert!(volumes[0].config_map.is_some());
        let container = first_container(&pod);
        let mounts = container.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, DEFAULT_SPARK_CONF_DIR);
        let env = container.env.as_ref().unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].name, SPARK_CONF_DIR_ENV_VAR);
        assert_eq!(env[0].value.as_deref(), Some(DEFAULT_SPARK_CONF_DIR));
    }

    #[test]
    fn spark_and_hadoop_config_maps_share_lists() {
        let job = spark_job(SparkJobSpec {
            spark_config_map: Some("spark-conf".to_string()),
            hadoop_config_map: Some("hadoop-conf".to_string()),
            ..Default::default()
        });
        let pod = patched(&executor_pod(), &job);

        let volumes = pod_spec(&pod).volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[1].name, HADOOP_CONFIG_MAP_VOLUME_NAME);
        let container = first_container(&pod);
        assert_eq!(container.volume_mounts.as_ref().unwrap().len(), 2);
        let env = container.env.as_ref().unwrap();
        assert_eq!(env[1].name, HADOOP_CONF_DIR_ENV_VAR);
        assert_eq!(env[1].value.as_deref(), Some(DEFAULT_HADOOP_CONF_DIR));
    }

    #[test]
    fn prometheus_config_map_is_mounted_when_metrics_exposed() {
        let job = spark_job(SparkJobSpec {
            monitoring: Some(MonitoringSpec {
                expose_driver_metrics: true,
                expose_executor_metrics: true,
                prometheus: Some(PrometheusSpec {
                    jmx_exporter_jar: Some("/prometheus/exporter.jar".to_string()),
                    port: Some(8090),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        });
        let pod = patched(&driver_pod(), &job);

        let volumes = pod_spec(&pod).volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "spark-test-prom-conf-vol");
        assert_eq!(
            volumes[0].config_map.as_ref().unwrap().name,
            "spark-test-prom-conf"
        );
        let mounts = first_container(&pod).volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].name, "spark-test-prom-conf-vol");
        assert_eq!(mounts[0].mount_path, PROMETHEUS_CONFIG_MAP_MOUNT_PATH);
    }

    // =========================================================================
    // Pod spec fields
    // =========================================================================

    fn hostname_affinity() -> Affinity {
        Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_expressions: Some(vec![NodeSelectorRequirement {
                            key: "kubernetes.io/hostname".to_string(),
                            operator: "In".to_string(),
                            values: Some(vec!["node-1".to_string()]),
                        }]),
                        ..Default::default()
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn affinity_is_set_only_when_pod_has_none() {
        let job = spark_job(SparkJobSpec {
            driver: RoleSpec {
                affinity: Some(hostname_affinity()),
                ..Default::default()
            },
            ..Default::default()
        });

        let pod = patched(&driver_pod(), &job);
        assert_eq!(pod_spec(&pod).affinity, Some(hostname_affinity()));

        let mut pod = driver_pod();
        pod.spec.as_mut().unwrap().affinity = Some(Affinity::default());
        let pod = patched(&pod, &job);
        assert_eq!(pod_spec(&pod).affinity, Some(Affinity::default()));
    }

    #[test]
    fn tolerations_are_appended() {
        let toleration = Toleration {
            key: Some("Key".to_string()),
            operator: Some("Equal".to_string()),
            value: Some("Value".to_string()),
            effect: Some("NoEffect".to_string()),
            ..Default::default()
        };
        let job = spark_job(SparkJobSpec {
            driver: RoleSpec {
                tolerations: vec![toleration.clone()],
                ..Default::default()
            },
            ..Default::default()
        });

        let pod = patched(&driver_pod(), &job);
        assert_eq!(pod_spec(&pod).tolerations, Some(vec![toleration.clone()]));

        let mut pod = driver_pod();
        pod.spec.as_mut().unwrap().tolerations = Some(vec![Toleration::default()]);
        let pod = patched(&pod, &job);
        let tolerations = pod_spec(&pod).tolerations.as_ref().unwrap();
        assert_eq!(tolerations.len(), 2);
        assert_eq!(tolerations[1], toleration);
    }

    #[test]
    fn security_context_is_set_per_role() {
        let driver_context = PodSecurityContext {
            run_as_user: Some(1000),
            ..Default::default()
        };
        let executor_context = PodSecurityContext {
            run_as_user: Some(2000),
            ..Default::default()
        };
        let job = spark_job(SparkJobSpec {
            driver: RoleSpec {
                security_context: Some(driver_context.clone()),
                ..Default::default()
            },
            executor: RoleSpec {
                security_context: Some(executor_context.clone()),
                ..Default::default()
            },
            ..Default::default()
        });

        let mut pod = driver_pod();
        pod.spec.as_mut().unwrap().security_context = Some(PodSecurityContext {
            run_as_user: Some(0),
            ..Default::default()
        });
        let pod = patched(&pod, &job);
        assert_eq!(pod_spec(&pod).security_context, Some(driver_context));

        let pod = patched(&executor_pod(), &job);
        assert_eq!(pod_spec(&pod).security_context, Some(executor_context));
    }

    #[test]
    fn scheduler_name_is_only_overridden_when_declared() {
        let job = spark_job(SparkJobSpec {
            driver: RoleSpec {
                scheduler_name: Some("volcano".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });

        let mut pod = driver_pod();
        pod.spec.as_mut().unwrap().scheduler_name = Some("default-scheduler".to_string());
        let pod = patched(&pod, &job);
        assert_eq!(pod_spec(&pod).scheduler_name.as_deref(), Some("volcano"));

        let mut pod = executor_pod();
        pod.spec.as_mut().unwrap().scheduler_name = Some("default-scheduler".to_string());
        let pod = patched(&pod, &job);
        assert_eq!(
            pod_spec(&pod).scheduler_name.as_deref(),
            Some("default-scheduler")
        );
    }

    #[test]
    fn sidecars_follow_existing_containers_in_order() {
        let sidecar = |name: &str| Container {
            name: name.to_string(),
            image: Some(format!("{}:latest", name)),
            ..Default::default()
        };
        let job = spark_job(SparkJobSpec {
            executor: RoleSpec {
                sidecars: vec![sidecar("sidecar1"), sidecar("sidecar2")],
                ..Default::default()
            },
            ..Default::default()
        });

        let pod = patched(&executor_pod(), &job);
        let names: Vec<_> = pod_spec(&pod)
            .containers
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec![SPARK_EXECUTOR_CONTAINER_NAME, "sidecar1", "sidecar2"]);
    }

    #[test]
    fn sidecars_keep_their_own_env() {
        let job = spark_job(SparkJobSpec {
            spark_config_map: Some("spark-conf".to_string()),
            driver: RoleSpec {
                sidecars: vec![Container {
                    name: "sidecar".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        });

        // Sidecars are added after config wiring, so they keep their own spec.
        let pod = patched(&driver_pod(), &job);
        let containers = &pod_spec(&pod).containers;
        assert_eq!(containers.len(), 2);
        assert!(containers[0].env.is_some());
        assert!(containers[1].env.is_none());
    }

    #[test]
    fn dns_config_replaces_wholesale() {
        let dns = PodDNSConfig {
            nameservers: Some(vec!["8.8.8.8".to_string(), "4.4.4.4".to_string()]),
            searches: Some(vec!["svc.cluster.local".to_string()]),
            ..Default::default()
        };
        let job = spark_job(SparkJobSpec {
            executor: RoleSpec {
                dns_config: Some(dns.clone()),
                ..Default::default()
            },
            ..Default::default()
        });

        let mut pod = executor_pod();
        pod.spec.as_mut().unwrap().dns_config = Some(PodDNSConfig {
            nameservers: Some(vec!["1.1.1.1".to_string()]),
            ..Default::default()
        });
        let pod = patched(&pod, &job);
        assert_eq!(pod_spec(&pod).dns_config, Some(dns));
    }

    #[test]
    fn node_selector_merges_with_role_winning() {
        let job = spark_job(SparkJobSpec {
            driver: RoleSpec {
                node_selector: BTreeMap::from([
                    ("disk".to_string(), "ssd".to_string()),
                    ("secondkey".to_string(), "secondvalue".to_string()),
                ]),
                ..Default::default()
            },
            ..Default::default()
        });

        let mut pod = driver_pod();
        pod.spec.as_mut().unwrap().node_selector =
            Some(BTreeMap::from([("disk".to_string(), "hdd".to_string())]));
        let pod = patched(&pod, &job);
        let selector = pod_spec(&pod).node_selector.as_ref().unwrap();
        assert_eq!(selector.len(), 2);
        assert_eq!(selector["disk"], "ssd");
        assert_eq!(selector["secondkey"], "secondvalue");

        let pod = patched(&driver_pod(), &job);
        assert_eq!(pod_spec(&pod).node_selector.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn host_network_forces_dns_policy() {
        let job_with = |host_network| {
            spark_job(SparkJobSpec {
                driver: RoleSpec {
                    host_network,
                    ..Default::default()
                },
                ..Default::default()
            })
        };

        let pod = patched(&driver_pod(), &job_with(Some(true)));
        assert_eq!(pod_spec(&pod).host_network, Some(true));
        assert_eq!(
            pod_spec(&pod).dns_policy.as_deref(),
            Some(HOST_NETWORK_DNS_POLICY)
        );

        for host_network in [Some(false), None] {
            let pod = patched(&driver_pod(), &job_with(host_network));
            assert_eq!(pod_spec(&pod).host_network, None);
            assert_eq!(pod_spec(&pod).dns_policy, None);
        }
    }

    #[test]
    fn annotations_merge_into_pod_metadata() {
        let job = spark_job(SparkJobSpec {
            executor: RoleSpec {
                annotations: BTreeMap::from([(
                    GROUP_NAME_ANNOTATION_KEY.to_string(),
                    "spark-spark-test-pg".to_string(),
                )]),
                ..Default::default()
            },
            ..Default::default()
        });

        let pod = patched(&executor_pod(), &job);
        assert_eq!(
            pod.annotations()[GROUP_NAME_ANNOTATION_KEY],
            "spark-spark-test-pg"
        );

        let mut pod = executor_pod();
        pod.metadata.annotations = Some(BTreeMap::from([(
            "existing".to_string(),
            "value".to_string(),
        )]));
        let pod = patched(&pod, &job);
        assert_eq!(pod.annotations().len(), 2);
    }

    // =========================================================================
    // Resources
    // =========================================================================

    fn cpu_resources(limits: Option<i64>, requests: Option<i64>) -> Option<ResourceRequirements> {
        if limits.is_none() && requests.is_none() {
            return None;
        }
        let cpu = |n: i64| BTreeMap::from([("cpu".to_string(), Quantity(n.to_string()))]);
        Some(ResourceRequirements {
            limits: limits.map(cpu),
            requests: requests.map(cpu),
            ..Default::default()
        })
    }

    fn resource(list: &Option<BTreeMap<String, Quantity>>, name: &str) -> Option<String> {
        list.as_ref()
            .and_then(|l| l.get(name))
            .map(|q| q.0.clone())
    }

    #[test]
    fn gpu_limits_across_existing_resource_shapes() {
        let cpu_shapes = [
            (None, None),
            (Some(10), None),
            (None, Some(5)),
            (Some(10), Some(5)),
        ];
        let gpus = [
            None,
            Some(GpuSpec::default()),
            Some(GpuSpec {
                name: "example.com/gpu".to_string(),
                quantity: 1,
            }),
        ];

        for gpu in &gpus {
            let role = RoleSpec {
                gpu: gpu.clone(),
                ..Default::default()
            };
            let job = spark_job(SparkJobSpec {
                driver: role.clone(),
                executor: role,
                ..Default::default()
            });
            let wants_gpu = gpu.as_ref().is_some_and(|g| g.quantity > 0);

            for (limits, requests) in cpu_shapes {
                for base in [driver_pod(), executor_pod()] {
                    let mut base = base;
                    base.spec.as_mut().unwrap().containers[0].resources =
                        cpu_resources(limits, requests);
                    let ops = build_patches(&base, &job).unwrap();
                    let pod = patched(&base, &job);
                    let res = first_container(&pod).resources.clone().unwrap_or_default();

                    if wants_gpu {
                        assert_eq!(resource(&res.limits, "example.com/gpu").as_deref(), Some("1"));
                        assert_eq!(
                            resource(&res.requests, "example.com/gpu").is_some(),
                            requests.is_some()
                        );
                    } else {
                        // owner reference only
                        assert_eq!(ops.len(), 1);
                    }
                    assert_eq!(resource(&res.limits, "cpu"), limits.map(|n| n.to_string()));
                    assert_eq!(resource(&res.requests, "cpu"), requests.map(|n| n.to_string()));
                }
            }
        }
    }

    #[test]
    fn core_limit_sets_cpu_limit() {
        let job = spark_job(SparkJobSpec {
            driver: RoleSpec {
                core_limit: Some("1200m".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });

        let pod = patched(&driver_pod(), &job);
        let res = first_container(&pod).resources.clone().unwrap();
        assert_eq!(resource(&res.limits, "cpu").as_deref(), Some("1200m"));
        assert!(res.requests.is_none());
    }

    #[test]
    fn malformed_core_limit_is_an_error() {
        let job = spark_job(SparkJobSpec {
            executor: RoleSpec {
                core_limit: Some("two cores".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });

        let err = build_patches(&executor_pod(), &job).unwrap_err();
        match err {
            Error::Quantity { field, value, .. } => {
                assert_eq!(field, "spec.executor.coreLimit");
                assert_eq!(value, "two cores");
            }
            other => panic!("Expected Quantity error, got {other}"),
        }

        // the other role is unaffected
        assert!(build_patches(&driver_pod(), &job).is_ok());
    }

    #[test]
    fn primary_container_found_by_name() {
        let job = spark_job(SparkJobSpec {
            driver: RoleSpec {
                gpu: Some(GpuSpec {
                    name: "nvidia.com/gpu".to_string(),
                    quantity: 2,
                }),
                ..Default::default()
            },
            ..Default::default()
        });
        let mut pod = driver_pod();
        pod.spec.as_mut().unwrap().containers.insert(
            0,
            Container {
                name: "init-proxy".to_string(),
                ..Default::default()
            },
        );

        let pod = patched(&pod, &job);
        let containers = &pod_spec(&pod).containers;
        assert!(containers[0].resources.is_none());
        let res = containers[1].resources.clone().unwrap();
        assert_eq!(resource(&res.limits, "nvidia.com/gpu").as_deref(), Some("2"));
    }

    // =========================================================================
    // Whole-pod behaviour
    // =========================================================================

    fn kitchen_sink_job() -> SparkJob {
        let mut job = job_with_volume();
        job.spec.spark_config_map = Some("spark-conf".to_string());
        job.spec.driver.tolerations = vec![Toleration {
            key: Some("dedicated".to_string()),
            ..Default::default()
        }];
        job.spec.driver.node_selector =
            BTreeMap::from([("pool".to_string(), "spark".to_string())]);
        job.spec.driver.annotations = BTreeMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        job.spec.driver.gpu = Some(GpuSpec {
            name: "nvidia.com/gpu".to_string(),
            quantity: 1,
        });
        job.spec.driver.host_network = Some(true);
        job
    }

    #[test]
    fn patches_are_deterministic() {
        let job = kitchen_sink_job();
        let first = serde_json::to_vec(&build_patches(&driver_pod(), &job).unwrap()).unwrap();
        let second = serde_json::to_vec(&build_patches(&driver_pod(), &job).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn every_operation_applies_in_sequence() {
        let job = kitchen_sink_job();
        let pod = patched(&driver_pod(), &job);
        let spec = pod_spec(&pod);
        assert_eq!(spec.volumes.as_ref().unwrap().len(), 2);
        assert_eq!(first_container(&pod).volume_mounts.as_ref().unwrap().len(), 2);
        assert_eq!(spec.host_network, Some(true));
        assert_eq!(pod.annotations().len(), 2);
    }

    #[test]
    fn base_pod_is_not_modified() {
        let job = kitchen_sink_job();
        let pod = driver_pod();
        let before = serde_json::to_value(&pod).unwrap();
        build_patches(&pod, &job).unwrap();
        assert_eq!(serde_json::to_value(&pod).unwrap(), before);
    }

    #[test]
    fn pod_without_spec_is_rejected() {
        let job = spark_job(SparkJobSpec::default());
        let mut pod = driver_pod();
        pod.spec = None;
        assert!(matches!(
            build_patches(&pod, &job),
            Err(Error::Validation { .. })
        ));
    }
}
