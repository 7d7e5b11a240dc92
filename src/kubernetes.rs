//! Kubernetes cluster abstraction layer
//!
//! Provides a trait-based abstraction for listing pods so the cycle can be
//! tested without cluster access. The real implementation talks to the API
//! server via a kubeconfig file or, when none is given, the in-cluster
//! service account.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

/// Trait for listing pods across a set of namespaces.
#[async_trait]
pub trait PodLister: Send + Sync {
    /// Returns all pods from the given namespaces. The first failing
    /// namespace aborts the listing.
    async fn list_all_pods(&self, namespaces: &[String]) -> Result<Vec<Pod>>;
}

/// Real implementation of [`PodLister`] backed by the cluster API.
pub struct KubePodLister {
    client: Client,
}

impl KubePodLister {
    /// Connects using the given kubeconfig file, or infers in-cluster
    /// configuration when no path is given. Failure here is fatal to the
    /// process.
    pub async fn new(kubeconfig: Option<&Path>) -> Result<Self> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .with_context(|| format!("reading kubeconfig at {}", path.display()))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .context("loading kubeconfig")?
            }
            None => Config::infer()
                .await
                .context("inferring in-cluster configuration")?,
        };

        let client = Client::try_from(config).context("creating Kubernetes client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PodLister for KubePodLister {
    async fn list_all_pods(&self, namespaces: &[String]) -> Result<Vec<Pod>> {
        let mut pods = Vec::new();

        for namespace in namespaces {
            let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            let list = api
                .list(&ListParams::default())
                .await
                .with_context(|| format!("listing pods in namespace '{namespace}'"))?;
            pods.extend(list.items);
        }

        Ok(pods)
    }
}
