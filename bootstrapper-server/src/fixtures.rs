//! Test fixtures.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::{ContainerStatus, Namespace, Pod, PodStatus, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::Resource;

use crate::config::Config;
use crate::k8s::{ClusterProvider, LogLines, ResourceClient};
use bootstrapper_core::crd::{DatabaseCluster, Mattermost};
use bootstrapper_core::error::AppError;
use bootstrapper_core::secrets::KEY_GENERATED_URI;

/// The name of the cluster served by `StaticProvider`.
pub const TEST_CLUSTER: &str = "test-cluster";

/// The writer URI placed in generated database secrets.
pub const GENERATED_URI: &str = "postgresql://app:pw@mm-installation-acme-cnpg-cluster-rw.mm-installation-acme:5432/app";

type Key = (String, String);

/// The scripted log output of one pod.
#[derive(Clone)]
pub struct ScriptedLogs {
    /// Lines to emit, in order. An `Err` ends the stream with an error.
    pub lines: Vec<std::result::Result<String, String>>,
    /// Keep the stream open after the last line, as a followed log does.
    pub hang: bool,
}

#[derive(Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    secrets: BTreeMap<Key, Secret>,
    clusters: BTreeMap<Key, DatabaseCluster>,
    installations: BTreeMap<Key, Mattermost>,
    pods: BTreeMap<String, Vec<Pod>>,
    logs: HashMap<Key, ScriptedLogs>,
    faults: HashMap<String, String>,
    calls: Vec<String>,
    /// When set, creating a database cluster makes its app secret visible after this many polls.
    generated_uri: Option<(String, usize)>,
    pending_generated: HashMap<Key, usize>,
    resource_version: u64,
}

/// An in-memory resource client which records every call.
#[derive(Default)]
pub struct MemoryClient {
    state: Mutex<State>,
}

impl MemoryClient {
    /// Create a new instance whose database clusters generate their app secret after two polls.
    pub fn new() -> Arc<Self> {
        let client = Self::default();
        client.lock().generated_uri = Some((GENERATED_URI.into(), 2));
        Arc::new(client)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Make the named operation fail from now on.
    pub fn fail_on(&self, op: &str) {
        self.lock().faults.insert(op.into(), format!("injected failure in {}", op));
    }

    /// Stop generated database secrets from ever appearing.
    pub fn never_generate_database_secret(&self) {
        self.lock().generated_uri = None;
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// All mutating calls made so far, in order.
    pub fn writes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with("create_") || call.starts_with("replace_") || call.starts_with("delete_"))
            .collect()
    }

    pub fn insert_namespace(&self, name: &str) {
        let mut ns = Namespace::default();
        ns.metadata.name = Some(name.into());
        self.lock().namespaces.insert(name.into(), ns);
    }

    pub fn insert_secret(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        let mut state = self.lock();
        state.resource_version += 1;
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                resource_version: Some(state.resource_version.to_string()),
                ..Default::default()
            },
            data: Some(data.iter().map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec()))).collect()),
            ..Default::default()
        };
        state.secrets.insert((namespace.into(), name.into()), secret);
    }

    pub fn insert_installation(&self, mut installation: Mattermost) {
        let mut state = self.lock();
        state.resource_version += 1;
        installation.metadata.resource_version = Some(state.resource_version.to_string());
        let key = (
            installation.meta().namespace.clone().unwrap_or_default(),
            installation.meta().name.clone().unwrap_or_default(),
        );
        state.installations.insert(key, installation);
    }

    pub fn insert_pod(&self, namespace: &str, name: &str, ready: bool) {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".into()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "mattermost".into(),
                    ready,
                    restart_count: 1,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.lock().pods.entry(namespace.into()).or_default().push(pod);
    }

    pub fn script_logs(&self, namespace: &str, pod: &str, logs: ScriptedLogs) {
        self.lock().logs.insert((namespace.into(), pod.into()), logs);
    }

    pub fn namespace(&self, name: &str) -> Option<Namespace> {
        self.lock().namespaces.get(name).cloned()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.lock().secrets.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub fn secret_names(&self, namespace: &str) -> Vec<String> {
        self.lock().secrets.keys().filter(|(ns, _)| ns == namespace).map(|(_, name)| name.clone()).collect()
    }

    pub fn database_clusters(&self, namespace: &str) -> Vec<DatabaseCluster> {
        self.lock().clusters.iter().filter(|((ns, _), _)| ns == namespace).map(|(_, c)| c.clone()).collect()
    }

    pub fn installation(&self, namespace: &str, name: &str) -> Option<Mattermost> {
        self.lock().installations.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Record a call & apply any injected fault for it.
    fn call(&self, op: &str, target: &str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(format!("{} {}", op, target));
        if let Some(msg) = state.faults.get(op) {
            bail!("{}", msg);
        }
        Ok(state)
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.into(), name.into())
}

fn object_name<K: Resource>(obj: &K) -> String {
    obj.meta().name.clone().unwrap_or_default()
}

#[async_trait]
impl ResourceClient for MemoryClient {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let state = self.call("get_namespace", name)?;
        Ok(state.namespaces.get(name).cloned())
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        let name = object_name(namespace);
        let mut state = self.call("create_namespace", &name)?;
        if state.namespaces.contains_key(&name) {
            bail!("namespace {} already exists", name);
        }
        state.namespaces.insert(name, namespace.clone());
        Ok(namespace.clone())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.call("delete_namespace", name)?;
        state.namespaces.remove(name);
        state.secrets.retain(|(ns, _), _| ns != name);
        state.clusters.retain(|(ns, _), _| ns != name);
        state.installations.retain(|(ns, _), _| ns != name);
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let mut state = self.call("get_secret", &format!("{}/{}", namespace, name))?;
        let key = key(namespace, name);
        if let Some(remaining) = state.pending_generated.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(None);
            }
            state.pending_generated.remove(&key);
            if let Some((uri, _)) = state.generated_uri.clone() {
                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(name.into()),
                        namespace: Some(namespace.into()),
                        ..Default::default()
                    },
                    data: Some(BTreeMap::from([(KEY_GENERATED_URI.to_string(), ByteString(uri.into_bytes()))])),
                    ..Default::default()
                };
                state.secrets.insert(key.clone(), secret);
            }
        }
        Ok(state.secrets.get(&key).cloned())
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let name = object_name(secret);
        let mut state = self.call("create_secret", &format!("{}/{}", namespace, name))?;
        if !state.namespaces.contains_key(namespace) {
            bail!("namespace {} not found", namespace);
        }
        let key = key(namespace, &name);
        if state.secrets.contains_key(&key) {
            bail!("secret {} already exists", name);
        }
        state.resource_version += 1;
        let mut secret = secret.clone();
        secret.metadata.resource_version = Some(state.resource_version.to_string());
        state.secrets.insert(key, secret.clone());
        Ok(secret)
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let name = object_name(secret);
        let mut state = self.call("replace_secret", &format!("{}/{}", namespace, name))?;
        let key = key(namespace, &name);
        let current = state.secrets.get(&key).ok_or_else(|| anyhow!("secret {} not found", name))?;
        if current.metadata.resource_version != secret.metadata.resource_version {
            bail!("conflict replacing secret {}", name);
        }
        state.resource_version += 1;
        let mut secret = secret.clone();
        secret.metadata.resource_version = Some(state.resource_version.to_string());
        state.secrets.insert(key, secret.clone());
        Ok(secret)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.call("delete_secret", &format!("{}/{}", namespace, name))?;
        state.secrets.remove(&key(namespace, name));
        Ok(())
    }

    async fn create_database_cluster(&self, namespace: &str, cluster: &DatabaseCluster) -> Result<DatabaseCluster> {
        let name = object_name(cluster);
        let mut state = self.call("create_database_cluster", &format!("{}/{}", namespace, name))?;
        if let Some((_, polls)) = state.generated_uri.clone() {
            state.pending_generated.insert(key(namespace, &format!("{}-app", name)), polls);
        }
        state.clusters.insert(key(namespace, &name), cluster.clone());
        Ok(cluster.clone())
    }

    async fn delete_database_cluster(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.call("delete_database_cluster", &format!("{}/{}", namespace, name))?;
        state.clusters.remove(&key(namespace, name));
        // The generated app secret is owned by the cluster and goes with it.
        let app_secret = key(namespace, &format!("{}-app", name));
        state.secrets.remove(&app_secret);
        state.pending_generated.remove(&app_secret);
        Ok(())
    }

    async fn get_installation(&self, namespace: &str, name: &str) -> Result<Option<Mattermost>> {
        let state = self.call("get_installation", &format!("{}/{}", namespace, name))?;
        Ok(state.installations.get(&key(namespace, name)).cloned())
    }

    async fn create_installation(&self, namespace: &str, installation: &Mattermost) -> Result<Mattermost> {
        let name = object_name(installation);
        let mut state = self.call("create_installation", &format!("{}/{}", namespace, name))?;
        state.resource_version += 1;
        let mut installation = installation.clone();
        installation.metadata.resource_version = Some(state.resource_version.to_string());
        state.installations.insert(key(namespace, &name), installation.clone());
        Ok(installation)
    }

    async fn replace_installation(&self, namespace: &str, installation: &Mattermost) -> Result<Mattermost> {
        let name = object_name(installation);
        let mut state = self.call("replace_installation", &format!("{}/{}", namespace, name))?;
        let key = key(namespace, &name);
        let current = state.installations.get(&key).ok_or_else(|| anyhow!("installation {} not found", name))?;
        if current.metadata.resource_version != installation.metadata.resource_version {
            bail!("conflict replacing installation {}", name);
        }
        state.resource_version += 1;
        let mut installation = installation.clone();
        installation.metadata.resource_version = Some(state.resource_version.to_string());
        state.installations.insert(key, installation.clone());
        Ok(installation)
    }

    async fn delete_installation(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.call("delete_installation", &format!("{}/{}", namespace, name))?;
        state.installations.remove(&key(namespace, name));
        Ok(())
    }

    async fn list_installations(&self) -> Result<Vec<Mattermost>> {
        let state = self.call("list_installations", "*")?;
        Ok(state.installations.values().cloned().collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let state = self.call("list_pods", namespace)?;
        Ok(state.pods.get(namespace).cloned().unwrap_or_default())
    }

    async fn stream_pod_logs(&self, namespace: &str, pod: &str, _since_seconds: i64) -> Result<LogLines> {
        let state = self.call("stream_pod_logs", &format!("{}/{}", namespace, pod))?;
        let logs = match state.logs.get(&key(namespace, pod)) {
            Some(logs) => logs.clone(),
            None => bail!("pod {} not found", pod),
        };
        let lines = stream::iter(
            logs.lines
                .into_iter()
                .map(|line| line.map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))),
        );
        if logs.hang {
            Ok(lines.chain(stream::pending()).boxed())
        } else {
            Ok(lines.boxed())
        }
    }
}

/// A cluster provider serving a single in-memory cluster.
pub struct StaticProvider {
    pub client: Arc<MemoryClient>,
}

#[async_trait]
impl ClusterProvider for StaticProvider {
    async fn resource_client(&self, cluster: &str) -> Result<Arc<dyn ResourceClient>> {
        if cluster != TEST_CLUSTER {
            return Err(AppError::ResourceNotFound(format!("cluster {}", cluster)).into());
        }
        Ok(self.client.clone())
    }
}

/// A config suitable for tests.
pub fn test_config() -> Arc<Config> {
    Arc::new(Config::new_test())
}
