//! Runtime configuration for the cleanup controller
//!
//! All inputs are validated once at startup; a bad configuration is fatal
//! to the process before any cycle runs.

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;

use crate::error::{Error, Result};

pub const DEFAULT_INTERVAL_MINUTES: u64 = 30;
pub const DEFAULT_MAX_IMAGES: usize = 900;
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_NAMESPACES: &str = "default";

/// Validated configuration for the cleanup task.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Time between reconciliation cycles.
    pub interval: Duration,

    /// Maximum number of images to keep in each repository. Images in use
    /// by pods count against this budget but are never deleted.
    pub max_images: usize,

    /// AWS region in which the repositories live.
    pub region: String,

    /// Optional registry account (registry ID) override.
    pub registry_id: Option<String>,

    /// ECR repositories to clean up.
    pub repositories: Vec<String>,

    /// Images used by pods in these namespaces will not get deleted.
    pub namespaces: Vec<String>,

    /// Path to a kubeconfig file. When absent, in-cluster configuration
    /// is assumed.
    pub kubeconfig: Option<PathBuf>,

    /// Just log, don't delete any images.
    pub dry_run: bool,

    /// Images with a tag matching any of these patterns are always kept.
    pub keep_filters: Vec<Regex>,
}

impl CleanupConfig {
    /// Builds a validated config from raw flag values.
    #[allow(clippy::too_many_arguments)]
    pub fn from_args(
        interval_minutes: u64,
        max_images: usize,
        region: String,
        registry_id: Option<String>,
        repos: &str,
        namespaces: &str,
        kubeconfig: Option<PathBuf>,
        dry_run: bool,
        keep_filters: &str,
    ) -> Result<Self> {
        let repositories = parse_comma_separated(repos);
        if repositories.is_empty() {
            return Err(Error::Config(
                "must specify at least one ECR repository to watch".to_string(),
            ));
        }

        let namespaces = parse_comma_separated(namespaces);
        if namespaces.is_empty() {
            return Err(Error::Config(
                "must specify at least one namespace".to_string(),
            ));
        }

        if interval_minutes == 0 {
            return Err(Error::Config("interval must be at least 1 minute".to_string()));
        }

        let keep_filters = parse_comma_separated(keep_filters)
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    Error::Config(format!("invalid keep filter '{pattern}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            interval: Duration::from_secs(interval_minutes * 60),
            max_images,
            region,
            registry_id,
            repositories,
            namespaces,
            kubeconfig,
            dry_run,
            keep_filters,
        })
    }
}

/// Splits a comma-separated string into trimmed, non-empty items.
pub fn parse_comma_separated(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
