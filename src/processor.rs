//! Reconciliation cycle and timer driver
//!
//! One cycle fetches pod usage and repository metadata, then walks the
//! repositories sequentially: list images, apply keep filters, run the
//! retention engine, and delete (or just log in dry-run). Repositories are
//! independent failure domains; usage or repository enumeration failures
//! abort the whole cycle. Nothing is ever retried; the next tick is the
//! only retry mechanism.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::config::CleanupConfig;
use crate::error::Error;
use crate::kubernetes::PodLister;
use crate::registry::RegistryClient;
use crate::retention::{apply_keep_filters, select_images_for_deletion, RetentionPolicy};
use crate::usage::extract_usage;

/// Runs one reconciliation pass and returns every error it encountered.
pub async fn run_cycle(
    config: &CleanupConfig,
    pod_lister: &dyn PodLister,
    registry: &dyn RegistryClient,
) -> Vec<Error> {
    let mut errors = Vec::new();

    info!("Cleanup cycle started.");

    let pods = match pod_lister.list_all_pods(&config.namespaces).await {
        Ok(pods) => pods,
        Err(e) => {
            errors.push(Error::PodList(e.to_string()));
            return errors;
        }
    };
    info!("There are currently {} running pods.", pods.len());

    let repositories = match registry
        .list_repositories(&config.repositories, config.registry_id.as_deref())
        .await
    {
        Ok(repositories) => repositories,
        Err(e) => {
            errors.push(Error::RepositoryList(e.to_string()));
            return errors;
        }
    };

    let usage = extract_usage(&pods);
    info!(
        "There are currently {} ECR images in use.",
        usage.values().map(HashSet::len).sum::<usize>()
    );

    let policy = RetentionPolicy {
        max_images: config.max_images,
        keep_filters: config.keep_filters.clone(),
    };
    let no_usage = HashSet::new();

    for repository in &repositories {
        info!("Processing '{repository}' ECR repo.");

        let images = match registry
            .list_images(repository, config.registry_id.as_deref())
            .await
        {
            Ok(images) => images,
            Err(e) => {
                errors.push(Error::ImageList {
                    repository: repository.clone(),
                    message: e.to_string(),
                });
                continue;
            }
        };
        debug!("Number of images in ECR repo: {}", images.len());

        let images = apply_keep_filters(images, &policy.keep_filters);
        let used_tags = usage.get(repository).unwrap_or(&no_usage);
        let batch = select_images_for_deletion(&policy, images, used_tags);

        if batch.is_empty() {
            info!("There's no old unused images to remove. Continuing.");
            continue;
        }

        if config.dry_run {
            info!("Not deleting images due to dry-run being set.");
            info!("Would have removed {} images.", batch.len());
        } else {
            info!("Removing {} old unused images.", batch.len());
            if let Err(e) = registry.batch_delete_images(&batch).await {
                errors.push(Error::BatchDelete {
                    repository: repository.clone(),
                    message: e.to_string(),
                });
                continue;
            }
        }
    }

    info!("Cleanup cycle finished.");

    errors
}

/// Background worker that runs the cleanup cycle on an interval until
/// shutdown is signalled.
pub struct CleanupLoop {
    config: CleanupConfig,
    pod_lister: Arc<dyn PodLister>,
    registry: Arc<dyn RegistryClient>,
}

impl CleanupLoop {
    pub fn new(
        config: CleanupConfig,
        pod_lister: Arc<dyn PodLister>,
        registry: Arc<dyn RegistryClient>,
    ) -> Self {
        Self {
            config,
            pod_lister,
            registry,
        }
    }

    /// Spawns the worker. The first cycle runs one full interval after
    /// startup. A shutdown signal observed between ticks ends the task;
    /// the returned handle completes once the worker has exited.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; consume it so the loop
            // waits a full interval before the first cycle.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let errors = run_cycle(
                            &self.config,
                            self.pod_lister.as_ref(),
                            self.registry.as_ref(),
                        )
                        .await;
                        for e in &errors {
                            error!("{e}");
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("Stopped image cleanup loop.");
                        return;
                    }
                }
            }
        })
    }
}
