use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};

use bootstrapper_core::crd::{DatabaseCluster, Mattermost};

/// An ordered stream of log lines from a single pod.
pub type LogLines = BoxStream<'static, std::io::Result<String>>;

/// Typed access to the K8s objects of a single cluster.
///
/// Deletes treat an object which is already gone as success. Implementations must be safe for
/// concurrent use, as log sessions open one stream per pod from the same client.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace>;
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret>;
    /// Replace the given secret, which must carry the `resourceVersion` it was read at.
    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret>;
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_database_cluster(&self, namespace: &str, cluster: &DatabaseCluster) -> Result<DatabaseCluster>;
    async fn delete_database_cluster(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_installation(&self, namespace: &str, name: &str) -> Result<Option<Mattermost>>;
    async fn create_installation(&self, namespace: &str, installation: &Mattermost) -> Result<Mattermost>;
    /// Replace the given installation, which must carry the `resourceVersion` it was read at.
    async fn replace_installation(&self, namespace: &str, installation: &Mattermost) -> Result<Mattermost>;
    async fn delete_installation(&self, namespace: &str, name: &str) -> Result<()>;
    /// List installations across all namespaces.
    async fn list_installations(&self) -> Result<Vec<Mattermost>>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>>;
    /// Follow the logs of the given pod, starting `since_seconds` in the past.
    async fn stream_pod_logs(&self, namespace: &str, pod: &str, since_seconds: i64) -> Result<LogLines>;
}
