//! End-to-end reconciliation cycle tests over mock collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};

use kube_ecr_cleanup::config::CleanupConfig;
use kube_ecr_cleanup::error::Error;
use kube_ecr_cleanup::kubernetes::PodLister;
use kube_ecr_cleanup::processor::run_cycle;
use kube_ecr_cleanup::registry::RegistryClient;
use kube_ecr_cleanup::retention::ImageRecord;

const REGISTRY: &str = "123456789012.dkr.ecr.us-east-1.amazonaws.com";

struct MockPodLister {
    pods: Vec<Pod>,
    fail: bool,
}

impl MockPodLister {
    fn with_images(images: &[&str]) -> Self {
        let containers = images
            .iter()
            .map(|image| Container {
                image: Some(format!("{REGISTRY}/{image}")),
                ..Container::default()
            })
            .collect();

        Self {
            pods: vec![Pod {
                spec: Some(PodSpec {
                    containers,
                    ..PodSpec::default()
                }),
                ..Pod::default()
            }],
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            pods: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl PodLister for MockPodLister {
    async fn list_all_pods(&self, _namespaces: &[String]) -> Result<Vec<Pod>> {
        if self.fail {
            bail!("connection refused");
        }
        Ok(self.pods.clone())
    }
}

#[derive(Default)]
struct MockRegistryClient {
    repositories: Vec<String>,
    images: HashMap<String, Vec<ImageRecord>>,
    fail_list_repositories: bool,
    fail_list_images_for: HashSet<String>,
    fail_delete_for: HashSet<String>,
    deleted: Mutex<Vec<Vec<ImageRecord>>>,
}

impl MockRegistryClient {
    fn with_repository(name: &str, images: Vec<ImageRecord>) -> Self {
        let mut mock = Self::default();
        mock.add_repository(name, images);
        mock
    }

    fn add_repository(&mut self, name: &str, images: Vec<ImageRecord>) {
        self.repositories.push(name.to_string());
        self.images.insert(name.to_string(), images);
    }

    fn deleted_digests(&self) -> Vec<Vec<String>> {
        self.deleted
            .lock()
            .unwrap()
            .iter()
            .map(|batch| batch.iter().map(|i| i.digest.clone()).collect())
            .collect()
    }
}

#[async_trait]
impl RegistryClient for MockRegistryClient {
    async fn list_repositories(
        &self,
        names: &[String],
        _registry_id: Option<&str>,
    ) -> Result<Vec<String>> {
        if self.fail_list_repositories {
            bail!("access denied");
        }
        Ok(self
            .repositories
            .iter()
            .filter(|name| names.contains(name))
            .cloned()
            .collect())
    }

    async fn list_images(
        &self,
        repository: &str,
        _registry_id: Option<&str>,
    ) -> Result<Vec<ImageRecord>> {
        if self.fail_list_images_for.contains(repository) {
            bail!("repository not found");
        }
        Ok(self.images.get(repository).cloned().unwrap_or_default())
    }

    async fn batch_delete_images(&self, images: &[ImageRecord]) -> Result<()> {
        if let Some(first) = images.first() {
            if self.fail_delete_for.contains(&first.repository) {
                bail!("throttled");
            }
        }
        self.deleted.lock().unwrap().push(images.to_vec());
        Ok(())
    }
}

fn image(repository: &str, digest: &str, pushed_secs: i64, tags: &[&str]) -> ImageRecord {
    ImageRecord {
        repository: repository.to_string(),
        digest: digest.to_string(),
        pushed_at: Utc.timestamp_opt(pushed_secs, 0).unwrap(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

fn config(repos: &str, max_images: usize, dry_run: bool, keep_filters: &str) -> CleanupConfig {
    CleanupConfig::from_args(
        30,
        max_images,
        "us-east-1".to_string(),
        None,
        repos,
        "default",
        None,
        dry_run,
        keep_filters,
    )
    .unwrap()
}

#[tokio::test]
async fn test_cycle_deletes_old_unused_images() {
    let pods = MockPodLister::with_images(&["app:v3"]);
    let registry = MockRegistryClient::with_repository(
        "app",
        vec![
            image("app", "d-old", 100, &["v1"]),
            image("app", "d-mid", 200, &["v2"]),
            image("app", "d-used", 300, &["v3"]),
            image("app", "d-latest", 400, &["latest"]),
        ],
    );

    let errors = run_cycle(&config("app", 1, false, ""), &pods, &registry).await;

    assert!(errors.is_empty());
    // Budget 1 is consumed by the in-use image; both unused candidates go.
    assert_eq!(registry.deleted_digests(), vec![vec!["d-old", "d-mid"]]);
}

#[tokio::test]
async fn test_cycle_dry_run_never_deletes() {
    let pods = MockPodLister::with_images(&[]);
    let registry = MockRegistryClient::with_repository(
        "app",
        vec![
            image("app", "d1", 100, &["v1"]),
            image("app", "d2", 200, &["v2"]),
        ],
    );

    let errors = run_cycle(&config("app", 0, true, ""), &pods, &registry).await;

    assert!(errors.is_empty());
    assert!(registry.deleted_digests().is_empty());
}

#[tokio::test]
async fn test_cycle_skips_delete_when_batch_is_empty() {
    let pods = MockPodLister::with_images(&[]);
    let registry =
        MockRegistryClient::with_repository("app", vec![image("app", "d1", 100, &["v1"])]);

    let errors = run_cycle(&config("app", 900, false, ""), &pods, &registry).await;

    assert!(errors.is_empty());
    assert!(registry.deleted_digests().is_empty());
}

#[tokio::test]
async fn test_pod_listing_failure_aborts_cycle() {
    let pods = MockPodLister::failing();
    let registry = MockRegistryClient::with_repository(
        "app",
        vec![
            image("app", "d1", 100, &["v1"]),
            image("app", "d2", 200, &["v2"]),
        ],
    );

    let errors = run_cycle(&config("app", 0, false, ""), &pods, &registry).await;

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], Error::PodList(_)));
    assert!(registry.deleted_digests().is_empty());
}

#[tokio::test]
async fn test_repository_listing_failure_aborts_cycle() {
    let pods = MockPodLister::with_images(&[]);
    let mut registry =
        MockRegistryClient::with_repository("app", vec![image("app", "d1", 100, &["v1"])]);
    registry.fail_list_repositories = true;

    let errors = run_cycle(&config("app", 0, false, ""), &pods, &registry).await;

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], Error::RepositoryList(_)));
    assert!(registry.deleted_digests().is_empty());
}

#[tokio::test]
async fn test_image_listing_failure_skips_that_repository_only() {
    let pods = MockPodLister::with_images(&[]);
    let mut registry = MockRegistryClient::with_repository(
        "broken",
        vec![image("broken", "d0", 100, &["v1"])],
    );
    registry.add_repository(
        "app",
        vec![
            image("app", "d1", 100, &["v1"]),
            image("app", "d2", 200, &["v2"]),
        ],
    );
    registry.fail_list_images_for.insert("broken".to_string());

    let errors = run_cycle(&config("broken,app", 0, false, ""), &pods, &registry).await;

    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        Error::ImageList { repository, .. } if repository == "broken"
    ));
    assert_eq!(registry.deleted_digests(), vec![vec!["d1", "d2"]]);
}

#[tokio::test]
async fn test_delete_failure_is_recorded_and_siblings_continue() {
    let pods = MockPodLister::with_images(&[]);
    let mut registry = MockRegistryClient::with_repository(
        "flaky",
        vec![image("flaky", "d0", 100, &["v1"])],
    );
    registry.add_repository("app", vec![image("app", "d1", 100, &["v1"])]);
    registry.fail_delete_for.insert("flaky".to_string());

    let errors = run_cycle(&config("flaky,app", 0, false, ""), &pods, &registry).await;

    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        Error::BatchDelete { repository, .. } if repository == "flaky"
    ));
    assert_eq!(registry.deleted_digests(), vec![vec!["d1"]]);
}

#[tokio::test]
async fn test_keep_filters_are_applied_before_the_engine() {
    let pods = MockPodLister::with_images(&[]);
    let registry = MockRegistryClient::with_repository(
        "app",
        vec![
            image("app", "d-release", 100, &["release-1.0"]),
            image("app", "d1", 200, &["v1"]),
        ],
    );

    let errors = run_cycle(&config("app", 0, false, "^release-"), &pods, &registry).await;

    assert!(errors.is_empty());
    assert_eq!(registry.deleted_digests(), vec![vec!["d1"]]);
}

#[tokio::test]
async fn test_usage_from_pods_protects_images_in_other_repositories_not_at_all() {
    // Usage is scoped per repository; a tag used in 'worker' does not
    // protect the same tag in 'app'.
    let pods = MockPodLister::with_images(&["worker:v1"]);
    let mut registry = MockRegistryClient::with_repository(
        "app",
        vec![image("app", "d-app", 100, &["v1"])],
    );
    registry.add_repository("worker", vec![image("worker", "d-worker", 100, &["v1"])]);

    let errors = run_cycle(&config("app,worker", 0, false, ""), &pods, &registry).await;

    assert!(errors.is_empty());
    assert_eq!(registry.deleted_digests(), vec![vec!["d-app"]]);
}
