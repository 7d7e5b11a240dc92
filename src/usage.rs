//! Usage extraction
//!
//! Maps running-pod container image references to a repository -> tag usage
//! index. Only tagged images hosted on ECR count; everything else ages out
//! like any other unused image.

use std::collections::{HashMap, HashSet};

use k8s_openapi::api::core::v1::Pod;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::retention::LATEST_TAG;

/// Repository name -> set of tags referenced by running pods. Rebuilt from
/// scratch every cycle.
pub type UsageIndex = HashMap<String, HashSet<String>>;

// Only matches tagged images hosted on ECR.
static ECR_IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^.*\.dkr\.ecr\.[^.]+\.amazonaws\.com/([^:]+):(.*)$")
        .expect("ECR image reference pattern must compile")
});

/// Builds the usage index from the given pods, covering both init and
/// regular containers.
///
/// The `latest` tag is excluded here; the retention engine protects it
/// unconditionally, not via usage.
pub fn extract_usage(pods: &[Pod]) -> UsageIndex {
    let mut usage: UsageIndex = HashMap::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for pod in pods {
        let Some(spec) = &pod.spec else {
            continue;
        };

        let containers = spec
            .init_containers
            .iter()
            .flatten()
            .chain(spec.containers.iter());

        for container in containers {
            let Some(reference) = container.image.as_deref() else {
                continue;
            };
            // Parsing is idempotent; skipping repeats is just cheaper.
            if !seen.insert(reference) {
                continue;
            }

            let Some((repository, tag)) = parse_ecr_reference(reference) else {
                continue;
            };
            if tag == LATEST_TAG {
                continue;
            }

            usage
                .entry(repository.to_string())
                .or_default()
                .insert(tag.to_string());
        }
    }

    usage
}

/// Splits an ECR image reference into repository name and tag. Returns
/// `None` for references that are not tagged ECR URIs.
fn parse_ecr_reference(reference: &str) -> Option<(&str, &str)> {
    let captures = ECR_IMAGE_RE.captures(reference)?;
    let repository = captures.get(1)?.as_str();
    let tag = captures.get(2)?.as_str();
    Some((repository, tag))
}
