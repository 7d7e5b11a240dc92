//! ECR registry abstraction layer
//!
//! Provides a trait-based abstraction over the ECR API so the
//! reconciliation cycle can be tested without network access. Credentials
//! come from the ambient AWS environment (env vars, shared config, IAM
//! role), resolved by `aws-config`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ecr::types::ImageIdentifier;
use aws_sdk_ecr::Client;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::retention::{ImageRecord, MAX_BATCH_DELETE};

/// Operations against an image registry needed by the cleanup cycle.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Returns the names of the given repositories as the registry knows
    /// them. An empty input yields an empty result without a remote call.
    async fn list_repositories(
        &self,
        names: &[String],
        registry_id: Option<&str>,
    ) -> Result<Vec<String>>;

    /// Returns all images stored in the given repository.
    async fn list_images(
        &self,
        repository: &str,
        registry_id: Option<&str>,
    ) -> Result<Vec<ImageRecord>>;

    /// Deletes all the given images in one call. All images must belong to
    /// the same repository, at most [`MAX_BATCH_DELETE`] at a time. An
    /// empty batch is a no-op success.
    async fn batch_delete_images(&self, images: &[ImageRecord]) -> Result<()>;
}

/// Real implementation of [`RegistryClient`] backed by the ECR API.
pub struct EcrRegistryClient {
    client: Client,
}

impl EcrRegistryClient {
    pub async fn new(region: &str) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        Self {
            client: Client::new(&aws_config),
        }
    }
}

#[async_trait]
impl RegistryClient for EcrRegistryClient {
    async fn list_repositories(
        &self,
        names: &[String],
        registry_id: Option<&str>,
    ) -> Result<Vec<String>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .client
            .describe_repositories()
            .set_repository_names(Some(names.to_vec()));
        if let Some(id) = registry_id {
            request = request.registry_id(id);
        }

        let mut repositories = Vec::new();
        let mut pages = request.into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.context("describing ECR repositories")?;
            repositories.extend(
                page.repositories()
                    .iter()
                    .filter_map(|repo| repo.repository_name().map(str::to_string)),
            );
        }

        Ok(repositories)
    }

    async fn list_images(
        &self,
        repository: &str,
        registry_id: Option<&str>,
    ) -> Result<Vec<ImageRecord>> {
        let mut request = self.client.describe_images().repository_name(repository);
        if let Some(id) = registry_id {
            request = request.registry_id(id);
        }

        let mut images = Vec::new();
        let mut pages = request.into_paginator().send();
        while let Some(page) = pages.next().await {
            let page =
                page.with_context(|| format!("describing images in '{repository}'"))?;
            for detail in page.image_details() {
                let Some(digest) = detail.image_digest() else {
                    warn!("Skipping image without digest in '{repository}'.");
                    continue;
                };
                let Some(pushed_at) = detail.image_pushed_at().and_then(to_chrono) else {
                    warn!("Skipping image without push timestamp in '{repository}'.");
                    continue;
                };

                images.push(ImageRecord {
                    repository: repository.to_string(),
                    digest: digest.to_string(),
                    pushed_at,
                    tags: detail.image_tags().to_vec(),
                });
            }
        }

        Ok(images)
    }

    async fn batch_delete_images(&self, images: &[ImageRecord]) -> Result<()> {
        let Some(repository) = validate_batch(images)? else {
            return Ok(());
        };

        let image_ids: Vec<ImageIdentifier> = images
            .iter()
            .map(|image| {
                ImageIdentifier::builder()
                    .image_digest(&image.digest)
                    .build()
            })
            .collect();

        let output = self
            .client
            .batch_delete_image()
            .repository_name(repository)
            .set_image_ids(Some(image_ids))
            .send()
            .await
            .with_context(|| format!("batch deleting images in '{repository}'"))?;

        let failures = output.failures();
        if !failures.is_empty() {
            warn!(
                "{} of {} image deletions failed in '{}'.",
                failures.len(),
                images.len(),
                repository
            );
        }

        Ok(())
    }
}

/// Checks batch-delete preconditions and returns the common repository
/// name, or `None` for an empty batch.
fn validate_batch(images: &[ImageRecord]) -> Result<Option<&str>> {
    let Some(first) = images.first() else {
        return Ok(None);
    };

    if images.len() > MAX_BATCH_DELETE {
        bail!("only {MAX_BATCH_DELETE} images may be removed in a single call");
    }

    if images.iter().any(|i| i.repository != first.repository) {
        bail!("all images in a batch must belong to the same repository");
    }

    Ok(Some(&first.repository))
}

/// Converts an AWS timestamp to chrono, dropping values outside the
/// representable range.
fn to_chrono(timestamp: &aws_sdk_ecr::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}
