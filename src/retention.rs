//! Retention decision engine
//!
//! Pure logic that decides, for one repository, which images are eligible
//! for deletion given the repository inventory, the set of tags currently
//! in use by running pods, and the retention policy. Nothing here talks to
//! the network; the reconciliation cycle feeds it fresh data every tick.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use regex::Regex;

/// Maximum number of images ECR allows in a single batch-delete call.
pub const MAX_BATCH_DELETE: usize = 100;

/// Tag that is exempt from deletion unconditionally.
pub const LATEST_TAG: &str = "latest";

/// One entry in a repository's image inventory. Identity is the content
/// digest; tags are mutable aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub repository: String,
    pub digest: String,
    pub pushed_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

/// Per-cycle retention configuration for the decision engine.
#[derive(Debug, Clone, Default)]
pub struct RetentionPolicy {
    /// Maximum number of images to retain per repository. Protected images
    /// occupy budget slots without being removable.
    pub max_images: usize,

    /// Images with a tag matching any of these patterns are removed from
    /// consideration entirely, regardless of age or usage.
    pub keep_filters: Vec<Regex>,
}

/// Removes images whose tags match any keep filter.
///
/// This stage composes in front of [`select_images_for_deletion`] so that
/// keep-filtered images never appear in the candidate set.
pub fn apply_keep_filters(images: Vec<ImageRecord>, filters: &[Regex]) -> Vec<ImageRecord> {
    if filters.is_empty() {
        return images;
    }

    images
        .into_iter()
        .filter(|image| {
            !image
                .tags
                .iter()
                .any(|tag| filters.iter().any(|filter| filter.is_match(tag)))
        })
        .collect()
}

/// Selects the images to delete from one repository, oldest first.
///
/// Images tagged `latest` or carrying any tag in `used_tags` are protected:
/// they are never returned, but images in use still count against the
/// retention budget, so their presence increases deletion pressure on the
/// unprotected set. The result never exceeds [`MAX_BATCH_DELETE`] entries
/// and is sorted ascending by push timestamp (ties keep input order).
pub fn select_images_for_deletion(
    policy: &RetentionPolicy,
    repo_images: Vec<ImageRecord>,
    used_tags: &HashSet<String>,
) -> Vec<ImageRecord> {
    // No deletion pressure yet.
    if repo_images.len() <= policy.max_images {
        return Vec::new();
    }

    let mut used_found = 0usize;
    let mut candidates: Vec<ImageRecord> = Vec::new();

    for image in repo_images {
        if image.tags.iter().any(|tag| tag == LATEST_TAG) {
            continue;
        }
        if image.tags.iter().any(|tag| used_tags.contains(tag)) {
            used_found += 1;
            continue;
        }
        candidates.push(image);
    }

    candidates.sort_by_key(|image| image.pushed_at);

    // In-use images take up retention slots that would otherwise shelter
    // old unused images.
    let keep_budget = policy.max_images.saturating_sub(used_found);
    let mut cut = candidates.len().saturating_sub(keep_budget);

    if cut > MAX_BATCH_DELETE {
        cut = MAX_BATCH_DELETE;
    }

    candidates.truncate(cut);
    candidates
}
