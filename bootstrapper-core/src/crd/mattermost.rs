//! Mattermost installation CRD.
//!
//! Installations are read, merged and written back whole, so every modeled struct carries an
//! `extra` map which collects the fields this crate does not know about. Those fields survive a
//! read-merge-write cycle untouched.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, PodSecurityContext, SecretKeySelector};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The env var through which an installation references its license secret.
pub const ENV_LICENSE: &str = "MM_LICENSE";
/// The env var through which an installation bootstraps its config from the database secret.
pub const ENV_CONFIG: &str = "MM_CONFIG";

/// CRD spec for the Mattermost resource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, CustomResource)]
#[kube(
    status = "MattermostStatus",
    group = "installation.mattermost.com",
    version = "v1beta1",
    kind = "Mattermost",
    namespaced,
    derive = "PartialEq",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct MattermostSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_store: Option<FileStore>,
    /// Legacy license reference. New installations reference the license through `MM_LICENSE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mattermost_env: Option<Vec<EnvVar>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplate>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// CRD status object, as reported by the Mattermost operator.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MattermostStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Ingress configuration of an installation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Database configuration of an installation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalDatabase>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// An externally managed database, referenced through a secret.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalDatabase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Filestore configuration of an installation. Exactly one block is expected to be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileStore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalFileStore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalFileStore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_volume: Option<ExternalVolumeFileStore>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// An S3 compatible filestore.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalFileStore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A filestore backed by a volume provisioned in the cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalFileStore {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_size: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A filestore backed by a pre-existing persistent volume claim.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalVolumeFileStore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_claim_name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Pod level overrides applied by the Mattermost operator.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl MattermostSpec {
    /// The env vars of this spec.
    pub fn env(&self) -> &[EnvVar] {
        self.mattermost_env.as_deref().unwrap_or_default()
    }

    /// Replace the env var with the same name as the given var, else append it.
    pub fn upsert_env(&mut self, var: EnvVar) {
        let env = self.mattermost_env.get_or_insert_with(Default::default);
        match env.iter_mut().find(|existing| existing.name == var.name) {
            Some(existing) => *existing = var,
            None => env.push(var),
        }
    }

    /// The name of the secret holding this installation's license, if any.
    ///
    /// The `MM_LICENSE` env reference takes precedence over the legacy `licenseSecret` field.
    pub fn license_secret_name(&self) -> Option<&str> {
        self.env()
            .iter()
            .find(|var| var.name == ENV_LICENSE)
            .and_then(|var| var.value_from.as_ref())
            .and_then(|source| source.secret_key_ref.as_ref())
            .map(|selector| selector.name.as_str())
            .filter(|name| !name.is_empty())
            .or_else(|| self.license_secret.as_deref().filter(|name| !name.is_empty()))
    }

    /// The name of the secret holding this installation's database connection, if any.
    pub fn database_secret_name(&self) -> Option<&str> {
        self.database
            .as_ref()
            .and_then(|db| db.external.as_ref())
            .and_then(|ext| ext.secret.as_deref())
            .filter(|name| !name.is_empty())
    }

    /// The name of the secret holding this installation's S3 credentials, if any.
    pub fn filestore_secret_name(&self) -> Option<&str> {
        self.file_store
            .as_ref()
            .and_then(|fs| fs.external.as_ref())
            .and_then(|ext| ext.secret.as_deref())
            .filter(|name| !name.is_empty())
    }
}

/// Build an env var which takes its value from the given key of the given secret.
pub fn secret_env_var(name: &str, secret_name: &str, key: &str, optional: bool) -> EnvVar {
    EnvVar {
        name: name.into(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.into(),
                key: key.into(),
                optional: if optional { Some(true) } else { None },
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build an env var with a literal value.
pub fn literal_env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        ..Default::default()
    }
}
