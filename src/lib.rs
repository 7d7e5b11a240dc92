//! # kube-ecr-cleanup
//!
//! A controller that periodically deletes old, unused images from AWS ECR
//! repositories, sparing anything still referenced by pods running in a
//! Kubernetes cluster.
//!
//! ## Modules
//!
//! - `config` - Validated runtime configuration and flag parsing helpers
//! - `error` - Cycle and startup error types
//! - `kubernetes` - Trait-based abstraction for listing pods
//! - `processor` - Reconciliation cycle and the interval-driven worker
//! - `registry` - Trait-based abstraction over the ECR API
//! - `retention` - Pure retention decision engine and keep filters
//! - `usage` - Pod container references to repository/tag usage index

pub mod config;
pub mod error;
pub mod kubernetes;
pub mod processor;
pub mod registry;
pub mod retention;
pub mod usage;
