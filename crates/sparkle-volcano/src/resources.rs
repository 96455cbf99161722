//! Resource aggregation for gang sizing
//!
//! Turns a role's CPU and memory declarations into a [`ResourceVector`] and
//! sums vectors across roles. Unparseable quantities are skipped so one bad
//! field never blocks sizing the rest of the job.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use sparkle_common::crd::{RoleSpec, SparkJob};
use sparkle_common::ParsedQuantity;
use tracing::debug;

/// Resource name to exact quantity. A missing key reads as zero.
pub type ResourceVector = BTreeMap<String, ParsedQuantity>;

const CPU: &str = "cpu";
const MEMORY: &str = "memory";

/// Resources one pod of `role` asks for
pub fn pod_request(role: &RoleSpec) -> ResourceVector {
    let mut vector = ResourceVector::new();

    if let Some(cpu) = resolve_cpu(role) {
        vector.insert(CPU.to_string(), cpu);
    }

    if let Some(memory) = role.memory.as_deref().and_then(|m| parse_lenient("memory", m)) {
        let overhead = role
            .memory_overhead
            .as_deref()
            .and_then(|o| parse_lenient("memoryOverhead", o));
        let total = match overhead {
            Some(overhead) => memory + overhead,
            None => memory,
        };
        vector.insert(MEMORY.to_string(), total);
    }

    vector
}

/// Resources `instances` pods of `role` ask for together
pub fn request_vector(role: &RoleSpec, instances: u32) -> ResourceVector {
    if instances == 0 {
        return ResourceVector::new();
    }
    pod_request(role)
        .into_iter()
        .map(|(name, quantity)| (name, quantity.scaled(instances)))
        .collect()
}

/// Aggregate request of every executor of the job
pub fn executor_request(job: &SparkJob) -> ResourceVector {
    let executor = &job.spec.executor;
    request_vector(executor, executor.instance_count())
}

/// Request of the single driver pod
pub fn driver_request(job: &SparkJob) -> ResourceVector {
    request_vector(&job.spec.driver, 1)
}

/// Key-wise sum of resource vectors
pub fn sum<'a>(vectors: impl IntoIterator<Item = &'a ResourceVector>) -> ResourceVector {
    vectors
        .into_iter()
        .flatten()
        .fold(ResourceVector::new(), |mut total, (name, quantity)| {
            total
                .entry(name.clone())
                .and_modify(|existing| *existing = *existing + *quantity)
                .or_insert(*quantity);
            total
        })
}

/// Render a vector as the `ResourceList` shape the API server expects
pub fn to_resource_list(vector: &ResourceVector) -> BTreeMap<String, Quantity> {
    vector
        .iter()
        .map(|(name, quantity)| (name.clone(), quantity.to_quantity()))
        .collect()
}

/// CPU figure: core request, then whole cores, then core limit
fn resolve_cpu(role: &RoleSpec) -> Option<ParsedQuantity> {
    role.core_request
        .as_deref()
        .and_then(|q| parse_lenient("coreRequest", q))
        .or_else(|| {
            role.cores
                .and_then(|cores| parse_lenient("cores", &format!("{:.6}", cores)))
        })
        .or_else(|| {
            role.core_limit
                .as_deref()
                .and_then(|q| parse_lenient("coreLimit", q))
        })
}

fn parse_lenient(field: &str, value: &str) -> Option<ParsedQuantity> {
    match ParsedQuantity::parse(value) {
        Ok(q) => Some(q),
        Err(e) => {
            debug!(field = %field, value = %value, error = %e, "Skipping unparseable quantity");
            None
        }
    }
}
