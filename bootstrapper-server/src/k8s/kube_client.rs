use std::fmt::Debug;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::io::AsyncBufReadExt;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::client::Client;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::timeout;

use super::client::{LogLines, ResourceClient};
use bootstrapper_core::crd::{DatabaseCluster, Mattermost};

/// A resource client backed by the K8s API server of one cluster.
pub struct KubeResourceClient {
    client: Client,
    /// The bound applied to each API call.
    api_timeout: Duration,
}

impl KubeResourceClient {
    /// Create a new instance.
    pub fn new(client: Client, api_timeout: Duration) -> Self {
        Self { client, api_timeout }
    }

    async fn get_opt<K>(&self, api: Api<K>, kind: &str, name: &str) -> Result<Option<K>>
    where
        K: Clone + DeserializeOwned + Debug,
    {
        timeout(self.api_timeout, api.get_opt(name))
            .await
            .with_context(|| format!("timeout while fetching {} {}", kind, name))?
            .with_context(|| format!("error fetching {} {}", kind, name))
    }

    async fn create<K>(&self, api: Api<K>, kind: &str, obj: &K) -> Result<K>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + Debug,
    {
        let name = obj.meta().name.clone().unwrap_or_default();
        tracing::info!(%name, kind, "creating object");
        timeout(self.api_timeout, api.create(&PostParams::default(), obj))
            .await
            .with_context(|| format!("timeout while creating {} {}", kind, name))?
            .with_context(|| format!("error creating {} {}", kind, name))
    }

    async fn replace<K>(&self, api: Api<K>, kind: &str, obj: &K) -> Result<K>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + Debug,
    {
        let name = obj.meta().name.clone().unwrap_or_default();
        tracing::info!(%name, kind, "replacing object");
        timeout(self.api_timeout, api.replace(&name, &PostParams::default(), obj))
            .await
            .with_context(|| format!("timeout while replacing {} {}", kind, name))?
            .with_context(|| format!("error replacing {} {}", kind, name))
    }

    async fn delete<K>(&self, api: Api<K>, kind: &str, name: &str) -> Result<()>
    where
        K: Clone + DeserializeOwned + Debug,
    {
        tracing::info!(%name, kind, "deleting object");
        let res = timeout(self.api_timeout, api.delete(name, &DeleteParams::default()))
            .await
            .with_context(|| format!("timeout while deleting {} {}", kind, name))?;
        match res {
            Ok(_val) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
            Err(err) => Err(err).with_context(|| format!("error deleting {} {}", kind, name)),
        }
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        self.get_opt(Api::all(self.client.clone()), "Namespace", name).await
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        self.create(Api::all(self.client.clone()), "Namespace", namespace).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.delete::<Namespace>(Api::all(self.client.clone()), "Namespace", name).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.get_opt(Api::namespaced(self.client.clone(), namespace), "Secret", name).await
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        self.create(Api::namespaced(self.client.clone(), namespace), "Secret", secret).await
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        self.replace(Api::namespaced(self.client.clone(), namespace), "Secret", secret).await
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<Secret>(Api::namespaced(self.client.clone(), namespace), "Secret", name).await
    }

    async fn create_database_cluster(&self, namespace: &str, cluster: &DatabaseCluster) -> Result<DatabaseCluster> {
        self.create(Api::namespaced(self.client.clone(), namespace), "Cluster", cluster).await
    }

    async fn delete_database_cluster(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<DatabaseCluster>(Api::namespaced(self.client.clone(), namespace), "Cluster", name).await
    }

    async fn get_installation(&self, namespace: &str, name: &str) -> Result<Option<Mattermost>> {
        self.get_opt(Api::namespaced(self.client.clone(), namespace), "Mattermost", name).await
    }

    async fn create_installation(&self, namespace: &str, installation: &Mattermost) -> Result<Mattermost> {
        self.create(Api::namespaced(self.client.clone(), namespace), "Mattermost", installation).await
    }

    async fn replace_installation(&self, namespace: &str, installation: &Mattermost) -> Result<Mattermost> {
        self.replace(Api::namespaced(self.client.clone(), namespace), "Mattermost", installation).await
    }

    async fn delete_installation(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<Mattermost>(Api::namespaced(self.client.clone(), namespace), "Mattermost", name).await
    }

    async fn list_installations(&self) -> Result<Vec<Mattermost>> {
        let api: Api<Mattermost> = Api::all(self.client.clone());
        timeout(self.api_timeout, api.list(&ListParams::default()))
            .await
            .context("timeout while listing installations")?
            .context("error listing installations")
            .map(|list| list.items)
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        timeout(self.api_timeout, api.list(&ListParams::default()))
            .await
            .with_context(|| format!("timeout while listing pods of {}", namespace))?
            .with_context(|| format!("error listing pods of {}", namespace))
            .map(|list| list.items)
    }

    async fn stream_pod_logs(&self, namespace: &str, pod: &str, since_seconds: i64) -> Result<LogLines> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            follow: true,
            since_seconds: Some(since_seconds),
            ..Default::default()
        };
        let reader = timeout(self.api_timeout, api.log_stream(pod, &params))
            .await
            .with_context(|| format!("timeout while opening log stream of pod {}", pod))?
            .with_context(|| format!("error opening log stream of pod {}", pod))?;
        Ok(Box::pin(reader.lines()))
    }
}
