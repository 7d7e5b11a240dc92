use thiserror::Error;

/// Errors surfaced by a reconciliation cycle or at startup.
///
/// Cycle errors are collected and logged once per cycle; they never abort
/// the process. Only `Config` is fatal, and only at startup.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot list pods: {0}")]
    PodList(String),

    #[error("Cannot list ECR repositories: {0}")]
    RepositoryList(String),

    #[error("Cannot list images from repo '{repository}': {message}")]
    ImageList { repository: String, message: String },

    #[error("Could not batch remove images from repo '{repository}': {message}")]
    BatchDelete { repository: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
