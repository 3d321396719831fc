use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use kube::client::Client;
use kube::config::{KubeConfigOptions, Kubeconfig};

use super::client::ResourceClient;
use super::kube_client::KubeResourceClient;
use crate::config::Config;
use bootstrapper_core::error::AppError;

/// A source of resource clients, one per managed cluster.
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// Get the resource client of the named cluster.
    async fn resource_client(&self, cluster: &str) -> Result<Arc<dyn ResourceClient>>;
}

/// A cluster provider which resolves clusters as kubeconfig contexts.
///
/// Each cluster name selects the context of the same name, falling back to the current context
/// when no such context exists. Clients are built once per cluster name and then reused.
pub struct KubeconfigProvider {
    config: Arc<Config>,
    clients: DashMap<String, Arc<dyn ResourceClient>>,
}

impl KubeconfigProvider {
    /// Create a new instance.
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }

    /// Build a K8s client for the named cluster.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn build_client(&self, cluster: &str) -> Result<Client> {
        let kubeconfig = match &self.config.kubeconfig_path {
            Some(path) => Some(Kubeconfig::read_from(path).with_context(|| format!("error reading kubeconfig {}", path))?),
            None => Kubeconfig::read().ok(),
        };
        let kubeconfig = match kubeconfig {
            Some(kubeconfig) => kubeconfig,
            // No kubeconfig at all, so this is only usable for the cluster we are running in.
            None => {
                tracing::debug!(cluster, "no kubeconfig found, inferring client config");
                let config = kube::Config::infer().await.context("error inferring K8s client config")?;
                return Client::try_from(config).context("error building K8s client");
            }
        };

        let has_context = kubeconfig.contexts.iter().any(|ctx| ctx.name == cluster);
        if !has_context && kubeconfig.current_context.is_none() {
            return Err(AppError::ResourceNotFound(format!("cluster {}", cluster)).into());
        }
        if !has_context {
            tracing::warn!(cluster, "no kubeconfig context named after cluster, using current context");
        }
        let options = KubeConfigOptions {
            context: if has_context { Some(cluster.into()) } else { None },
            ..Default::default()
        };
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .with_context(|| format!("error building K8s client config for cluster {}", cluster))?;
        Client::try_from(config).context("error building K8s client")
    }
}

#[async_trait]
impl ClusterProvider for KubeconfigProvider {
    async fn resource_client(&self, cluster: &str) -> Result<Arc<dyn ResourceClient>> {
        if let Some(client) = self.clients.get(cluster) {
            return Ok(client.value().clone());
        }
        let client = self.build_client(cluster).await?;
        let client: Arc<dyn ResourceClient> = Arc::new(KubeResourceClient::new(client, self.config.api_timeout()));
        Ok(self.clients.entry(cluster.to_string()).or_insert(client).value().clone())
    }
}
