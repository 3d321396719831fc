//! CloudNativePG database cluster CRD.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The CloudNativePG `Cluster` resource.
pub type DatabaseCluster = Cluster;

/// The suffix appended to an installation namespace to name its database cluster.
const CLUSTER_NAME_SUFFIX: &str = "-cnpg-cluster";
/// The suffix CloudNativePG appends to a cluster's name for its generated app credentials.
const APP_SECRET_SUFFIX: &str = "-app";

/// CRD spec for a CloudNativePG `Cluster`.
///
/// Creating one of these causes CloudNativePG to provision a PostgreSQL cluster in the namespace
/// along with a generated secret named `<cluster>-app` holding the connection `uri`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, CustomResource)]
#[kube(
    group = "postgresql.cnpg.io",
    version = "v1",
    kind = "Cluster",
    namespaced,
    derive = "PartialEq",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseClusterSpec {
    /// The number of PostgreSQL instances in the cluster.
    pub instances: i32,
    /// Storage configuration of each instance.
    pub storage: DatabaseClusterStorage,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Storage configuration of a database cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseClusterStorage {
    /// The size of each instance's volume, as a K8s quantity.
    pub size: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Cluster {
    /// Build the database cluster for the given installation namespace.
    pub fn for_namespace(namespace: &str, instances: i32, storage_size: &str) -> Self {
        let mut cluster = Self::new(
            &Self::name_for_namespace(namespace),
            DatabaseClusterSpec {
                instances,
                storage: DatabaseClusterStorage {
                    size: storage_size.into(),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        cluster.metadata.namespace = Some(namespace.into());
        cluster
    }

    /// The name of the database cluster of the given namespace.
    pub fn name_for_namespace(namespace: &str) -> String {
        format!("{}{}", namespace, CLUSTER_NAME_SUFFIX)
    }

    /// The name of the secret which CloudNativePG generates for the given namespace's cluster.
    pub fn app_secret_name(namespace: &str) -> String {
        format!("{}{}", Self::name_for_namespace(namespace), APP_SECRET_SUFFIX)
    }
}
