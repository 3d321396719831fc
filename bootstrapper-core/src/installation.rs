//! Installation request models.
//!
//! Create requests arrive loosely typed, mirroring the JSON the web UI submits. Validation turns
//! them into an [`InstallationPlan`] in which the database and filestore strategies are enums, so
//! fields belonging to a variant which was not selected can never reach the provisioner.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, PodSecurityContext};
use lazy_static::lazy_static;
use maplit::btreemap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::crd::{
    literal_env_var, secret_env_var, DatabaseConfig, ExternalDatabase, ExternalFileStore, ExternalVolumeFileStore, FileStore, IngressConfig, LocalFileStore, Mattermost, MattermostSpec,
    PodTemplate, ENV_CONFIG, ENV_LICENSE,
};
use crate::error::AppError;
use crate::secrets::{KEY_LICENSE, KEY_MM_CONFIG, SECRET_NAME_FILESTORE};

/// The database option which provisions a CloudNativePG cluster.
pub const DATABASE_OPTION_CREATE_FOR_ME: &str = "CreateForMeCNPG";
/// The database option which uses an existing database.
pub const DATABASE_OPTION_EXISTING: &str = "Existing";
/// The filestore option for an S3 bucket with supplied credentials.
pub const FILESTORE_OPTION_EXISTING_S3: &str = "ExistingS3";
/// The filestore option for an AWS S3 bucket. Handled identically to `ExistingS3`.
pub const FILESTORE_OPTION_AWS_S3: &str = "AWSS3";
/// The filestore option for an in-cluster local volume.
pub const FILESTORE_OPTION_IN_CLUSTER_LOCAL: &str = "InClusterLocal";
/// The filestore option for a pre-existing volume claim.
pub const FILESTORE_OPTION_IN_CLUSTER_EXTERNAL: &str = "InClusterExternal";

/// The annotation used to select an ingress controller.
const ANNOTATION_INGRESS_CLASS: &str = "kubernetes.io/ingress.class";
/// The fs group applied to installation pods so that mounted volumes are writable.
const POD_FS_GROUP: i64 = 2000;
/// The maximum length of a DNS-1123 label.
const DNS_LABEL_MAX_LEN: usize = 63;

lazy_static! {
    static ref RE_SEMANTIC_VERSION: Regex = Regex::new(r"^\d+\.\d+(\.\d+)?$").expect("error compiling semantic version regex");
    static ref RE_RELEASE_BRANCH: Regex = Regex::new(r"^release-\d+\.\d+$").expect("error compiling release branch regex");
    static ref RE_DNS_LABEL: Regex = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("error compiling dns label regex");
}

/// A request to create a new installation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateInstallationRequest {
    pub installation_name: String,
    pub domain_name: String,
    pub size: String,
    pub version: String,
    /// The license file contents.
    pub enterprise_license: String,
    pub db_connection_option: String,
    pub existing_database_config: Option<ExistingDatabaseConfig>,
    pub existing_database_secret_name: String,
    pub filestore_option: String,
    pub s3_filestore_config: Option<S3FilestoreConfig>,
    pub filestore_secret_name: String,
    pub local_filestore_config: Option<LocalFilestoreConfig>,
    pub local_external_filestore_config: Option<LocalExternalFilestoreConfig>,
}

/// Literal connection strings of an existing database.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExistingDatabaseConfig {
    pub db_connection_string: String,
    pub db_replicas_connection_string: String,
}

/// S3 bucket location & credentials.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct S3FilestoreConfig {
    pub url: String,
    pub bucket: String,
    pub access_key_id: String,
    pub access_key_secret: String,
}

/// Local volume filestore config.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalFilestoreConfig {
    pub storage_size: String,
}

/// Existing volume claim filestore config.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalExternalFilestoreConfig {
    pub volume_claim_name: String,
}

impl S3FilestoreConfig {
    fn is_complete(&self) -> bool {
        !self.url.is_empty() && !self.bucket.is_empty() && !self.access_key_id.is_empty() && !self.access_key_secret.is_empty()
    }
}

/// A validated installation creation plan.
#[derive(Clone, Debug, PartialEq)]
pub struct InstallationPlan {
    /// The installation's name, without the namespace prefix.
    pub name: String,
    /// The namespace of the installation, which is also the name of its workload resource.
    pub namespace: String,
    pub domain_name: String,
    pub size: Option<String>,
    pub version: Option<String>,
    pub license: Option<String>,
    pub database: DatabaseStrategy,
    pub filestore: FilestoreStrategy,
}

/// The selected database provisioning strategy.
#[derive(Clone, Debug, PartialEq)]
pub enum DatabaseStrategy {
    /// Provision a new CloudNativePG cluster in the installation's namespace.
    CreateManaged,
    /// Reference a secret which already exists in the installation's namespace.
    ExistingSecret(String),
    /// Wrap the given connection strings in a new secret.
    ExistingConnection { writer: String, reader: String },
}

/// The selected filestore provisioning strategy.
#[derive(Clone, Debug, PartialEq)]
pub enum FilestoreStrategy {
    /// An S3 bucket. Credentials are either supplied or held by an existing secret.
    ExternalS3 { url: String, bucket: String, credentials: S3Credentials },
    /// A local volume of the given size.
    InClusterLocal { storage_size: String },
    /// A pre-existing persistent volume claim.
    InClusterExternalVolume { volume_claim_name: String },
}

/// The source of an S3 filestore's credentials.
#[derive(Clone, Debug, PartialEq)]
pub enum S3Credentials {
    /// Credentials to be written into a new filestore secret.
    Supplied { access_key: String, secret_key: String },
    /// The name of an existing secret holding `accesskey` & `secretkey`.
    ExistingSecret(String),
}

impl CreateInstallationRequest {
    /// Validate this request, producing a typed plan.
    pub fn validate(&self) -> Result<InstallationPlan, AppError> {
        if self.installation_name.is_empty() {
            return Err(AppError::InvalidInput("installationName is required".into()));
        }
        if self.domain_name.is_empty() {
            return Err(AppError::InvalidInput("domainName is required".into()));
        }
        let namespace = crate::installation_namespace(&self.installation_name);
        if namespace.len() > DNS_LABEL_MAX_LEN || !RE_DNS_LABEL.is_match(&namespace) {
            return Err(AppError::InvalidInput(format!(
                "installationName must produce a valid DNS label, got namespace {}",
                namespace
            )));
        }
        if !self.version.is_empty() {
            validate_version(&self.version)?;
        }

        Ok(InstallationPlan {
            name: self.installation_name.clone(),
            namespace,
            domain_name: self.domain_name.clone(),
            size: non_empty(&self.size),
            version: non_empty(&self.version),
            license: non_empty(&self.enterprise_license),
            database: self.database_strategy()?,
            filestore: self.filestore_strategy()?,
        })
    }

    fn database_strategy(&self) -> Result<DatabaseStrategy, AppError> {
        match self.db_connection_option.as_str() {
            DATABASE_OPTION_CREATE_FOR_ME => Ok(DatabaseStrategy::CreateManaged),
            DATABASE_OPTION_EXISTING => {
                if !self.existing_database_secret_name.is_empty() {
                    return Ok(DatabaseStrategy::ExistingSecret(self.existing_database_secret_name.clone()));
                }
                match &self.existing_database_config {
                    Some(cfg) if !cfg.db_connection_string.is_empty() && !cfg.db_replicas_connection_string.is_empty() => {
                        Ok(DatabaseStrategy::ExistingConnection {
                            writer: cfg.db_connection_string.clone(),
                            reader: cfg.db_replicas_connection_string.clone(),
                        })
                    }
                    _ => Err(AppError::InvalidInput(
                        "existing database requires existingDatabaseSecretName or both connection strings".into(),
                    )),
                }
            }
            other => Err(AppError::InvalidInput(format!("unknown dbConnectionOption {:?}", other))),
        }
    }

    fn filestore_strategy(&self) -> Result<FilestoreStrategy, AppError> {
        match self.filestore_option.as_str() {
            "" => Err(AppError::InvalidInput("filestoreOption is required".into())),
            FILESTORE_OPTION_EXISTING_S3 | FILESTORE_OPTION_AWS_S3 => {
                let cfg = self.s3_filestore_config.clone().unwrap_or_default();
                if !self.filestore_secret_name.is_empty() {
                    return Ok(FilestoreStrategy::ExternalS3 {
                        url: cfg.url,
                        bucket: cfg.bucket,
                        credentials: S3Credentials::ExistingSecret(self.filestore_secret_name.clone()),
                    });
                }
                if !cfg.is_complete() {
                    return Err(AppError::InvalidInput(
                        "S3 filestore requires filestoreSecretName or a complete s3FilestoreConfig".into(),
                    ));
                }
                Ok(FilestoreStrategy::ExternalS3 {
                    url: cfg.url,
                    bucket: cfg.bucket,
                    credentials: S3Credentials::Supplied {
                        access_key: cfg.access_key_id,
                        secret_key: cfg.access_key_secret,
                    },
                })
            }
            FILESTORE_OPTION_IN_CLUSTER_LOCAL => match &self.local_filestore_config {
                Some(cfg) if !cfg.storage_size.is_empty() => Ok(FilestoreStrategy::InClusterLocal {
                    storage_size: cfg.storage_size.clone(),
                }),
                _ => Err(AppError::InvalidInput("local filestore requires localFilestoreConfig.storageSize".into())),
            },
            FILESTORE_OPTION_IN_CLUSTER_EXTERNAL => match &self.local_external_filestore_config {
                Some(cfg) if !cfg.volume_claim_name.is_empty() => Ok(FilestoreStrategy::InClusterExternalVolume {
                    volume_claim_name: cfg.volume_claim_name.clone(),
                }),
                _ => Err(AppError::InvalidInput(
                    "external volume filestore requires localExternalFilestoreConfig.volumeClaimName".into(),
                )),
            },
            other => Err(AppError::InvalidInput(format!("unknown filestoreOption {:?}", other))),
        }
    }
}

/// The names of the secrets an installation's workload resource is wired to.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedSecrets {
    pub database: String,
    pub license: Option<String>,
    /// Only present for the S3 filestore.
    pub filestore: Option<String>,
}

impl InstallationPlan {
    /// The name of the filestore secret this plan will create, if any.
    pub fn filestore_secret_to_create(&self) -> Option<&'static str> {
        match &self.filestore {
            FilestoreStrategy::ExternalS3 {
                credentials: S3Credentials::Supplied { .. },
                ..
            } => Some(SECRET_NAME_FILESTORE),
            _ => None,
        }
    }

    /// The name of the filestore secret the workload resource should reference, if any.
    pub fn filestore_secret_name(&self) -> Option<String> {
        match &self.filestore {
            FilestoreStrategy::ExternalS3 { credentials, .. } => Some(match credentials {
                S3Credentials::Supplied { .. } => SECRET_NAME_FILESTORE.to_string(),
                S3Credentials::ExistingSecret(name) => name.clone(),
            }),
            _ => None,
        }
    }

    /// Assemble the workload resource of this plan, wired to the given secrets.
    pub fn build_installation(&self, secrets: &ResolvedSecrets, ingress_class: &str) -> Mattermost {
        let mut spec = MattermostSpec {
            size: self.size.clone(),
            version: self.version.clone(),
            ingress: Some(IngressConfig {
                enabled: true,
                host: Some(self.domain_name.clone()),
                ingress_class: Some(ingress_class.into()),
                annotations: Some(btreemap! {
                    ANNOTATION_INGRESS_CLASS.to_string() => ingress_class.to_string(),
                }),
                ..Default::default()
            }),
            database: Some(DatabaseConfig {
                external: Some(ExternalDatabase {
                    secret: Some(secrets.database.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            file_store: Some(build_filestore(&self.filestore, secrets.filestore.as_deref())),
            pod_template: Some(PodTemplate {
                security_context: Some(PodSecurityContext {
                    fs_group: Some(POD_FS_GROUP),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        spec.upsert_env(literal_env_var("MM_FILESETTINGS_AMAZONS3SSE", "true"));
        spec.upsert_env(literal_env_var("MM_FILESETTINGS_AMAZONS3SSL", "true"));
        if let Some(license) = &secrets.license {
            spec.upsert_env(secret_env_var(ENV_LICENSE, license, KEY_LICENSE, true));
        }
        spec.upsert_env(secret_env_var(ENV_CONFIG, &secrets.database, KEY_MM_CONFIG, false));

        let mut mm = Mattermost::new(&self.namespace, spec);
        mm.metadata.namespace = Some(self.namespace.clone());
        mm.metadata.labels = Some(canonical_labels(&self.name));
        mm
    }
}

/// Build the filestore block of the given strategy.
pub fn build_filestore(strategy: &FilestoreStrategy, secret: Option<&str>) -> FileStore {
    let mut filestore = FileStore::default();
    match strategy {
        FilestoreStrategy::ExternalS3 { url, bucket, .. } => {
            filestore.external = Some(ExternalFileStore {
                url: non_empty(url),
                bucket: non_empty(bucket),
                secret: secret.map(String::from),
                ..Default::default()
            });
        }
        FilestoreStrategy::InClusterLocal { storage_size } => {
            filestore.local = Some(LocalFileStore {
                enabled: true,
                storage_size: Some(storage_size.clone()),
                ..Default::default()
            });
        }
        FilestoreStrategy::InClusterExternalVolume { volume_claim_name } => {
            filestore.external_volume = Some(ExternalVolumeFileStore {
                volume_claim_name: Some(volume_claim_name.clone()),
                ..Default::default()
            });
        }
    }
    filestore
}

/// The canonical labels applied to objects created for the given installation.
pub fn canonical_labels(installation_name: &str) -> BTreeMap<String, String> {
    btreemap! {
        "app".to_string() => "mattermost".to_string(),
        "bootstrapper.mattermost.com/managed-by".to_string() => "bootstrapper".to_string(),
        "bootstrapper.mattermost.com/installation".to_string() => installation_name.to_string(),
    }
}

/// A sparse update of an existing installation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PatchInstallationRequest {
    pub version: Option<String>,
    pub image: Option<String>,
    pub replicas: Option<i32>,
    /// The new ingress host.
    pub endpoint: Option<String>,
    /// New license file contents.
    pub license: Option<String>,
    pub file_store_patch: Option<FilestorePatch>,
    pub database_patch: Option<DatabasePatch>,
    /// The complete desired env list. A non-empty list replaces the live list.
    pub mattermost_env: Option<Vec<EnvVar>>,
}

/// A filestore update.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FilestorePatch {
    pub filestore_option: String,
    pub s3_filestore_config: Option<S3FilestoreConfig>,
    pub local_filestore_config: Option<LocalFilestoreConfig>,
    pub local_external_filestore_config: Option<LocalExternalFilestoreConfig>,
}

/// A database connection update. Empty fields are left untouched.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabasePatch {
    pub db_connection_string: String,
    pub db_replicas_connection_string: String,
}

/// A validated filestore update.
#[derive(Clone, Debug, PartialEq)]
pub enum FilestoreUpdate {
    /// Field level overlay onto the S3 filestore & its secret.
    ExternalS3(S3FilestoreConfig),
    InClusterLocal { storage_size: String },
    InClusterExternalVolume { volume_claim_name: String },
}

impl PatchInstallationRequest {
    /// Validate this request before any resource is touched.
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(version) = self.version.as_deref().filter(|v| !v.is_empty()) {
            validate_version(version)?;
        }
        if let Some(replicas) = self.replicas {
            if replicas < 0 {
                return Err(AppError::InvalidInput(format!("replicas must not be negative, got {}", replicas)));
            }
        }
        if self.file_store_patch.is_some() {
            self.filestore_update()?;
        }
        Ok(())
    }

    /// The filestore update carried by this patch.
    ///
    /// Only a patch with a non-empty option and at least one variant payload carries an update.
    /// The payload matching the option is the one honored.
    pub fn filestore_update(&self) -> Result<Option<FilestoreUpdate>, AppError> {
        let patch = match &self.file_store_patch {
            Some(patch) if !patch.filestore_option.is_empty() => patch,
            _ => return Ok(None),
        };
        if patch.s3_filestore_config.is_none() && patch.local_filestore_config.is_none() && patch.local_external_filestore_config.is_none() {
            return Ok(None);
        }
        match patch.filestore_option.as_str() {
            FILESTORE_OPTION_EXISTING_S3 | FILESTORE_OPTION_AWS_S3 => Ok(patch.s3_filestore_config.clone().map(FilestoreUpdate::ExternalS3)),
            FILESTORE_OPTION_IN_CLUSTER_LOCAL => Ok(patch
                .local_filestore_config
                .as_ref()
                .filter(|cfg| !cfg.storage_size.is_empty())
                .map(|cfg| FilestoreUpdate::InClusterLocal {
                    storage_size: cfg.storage_size.clone(),
                })),
            FILESTORE_OPTION_IN_CLUSTER_EXTERNAL => Ok(patch
                .local_external_filestore_config
                .as_ref()
                .filter(|cfg| !cfg.volume_claim_name.is_empty())
                .map(|cfg| FilestoreUpdate::InClusterExternalVolume {
                    volume_claim_name: cfg.volume_claim_name.clone(),
                })),
            other => Err(AppError::InvalidInput(format!("unknown filestoreOption {:?}", other))),
        }
    }

    /// The license carried by this patch, if non-empty.
    pub fn license(&self) -> Option<&str> {
        self.license.as_deref().filter(|license| !license.is_empty())
    }

    /// Apply the direct field replacements of this patch to the given spec.
    ///
    /// Absent fields leave the live values untouched.
    pub fn apply_direct_fields(&self, spec: &mut MattermostSpec) {
        if let Some(version) = self.version.as_deref().filter(|v| !v.is_empty()) {
            spec.version = Some(version.into());
        }
        if let Some(image) = self.image.as_deref().filter(|v| !v.is_empty()) {
            spec.image = Some(image.into());
        }
        if let Some(replicas) = self.replicas {
            spec.replicas = Some(replicas);
        }
        if let Some(endpoint) = self.endpoint.as_deref().filter(|v| !v.is_empty()) {
            spec.ingress.get_or_insert_with(Default::default).host = Some(endpoint.into());
        }
        if let Some(env) = self.mattermost_env.as_ref().filter(|env| !env.is_empty()) {
            spec.mattermost_env = Some(env.clone());
        }
    }
}

/// Apply a validated filestore update to the given spec.
///
/// The S3 variant overlays only the non-empty incoming fields onto the live external block,
/// pointing it at the given secret. Missing blocks are created. Exactly one variant block is left
/// in place; the blocks of the other variants are cleared.
pub fn apply_filestore_update(spec: &mut MattermostSpec, update: &FilestoreUpdate, s3_secret_name: &str) {
    let filestore = spec.file_store.get_or_insert_with(Default::default);
    match update {
        FilestoreUpdate::ExternalS3(cfg) => {
            filestore.local = None;
            filestore.external_volume = None;
            let external = filestore.external.get_or_insert_with(Default::default);
            if !cfg.url.is_empty() {
                external.url = Some(cfg.url.clone());
            }
            if !cfg.bucket.is_empty() {
                external.bucket = Some(cfg.bucket.clone());
            }
            external.secret = Some(s3_secret_name.into());
        }
        FilestoreUpdate::InClusterLocal { storage_size } => {
            filestore.external = None;
            filestore.external_volume = None;
            let local = filestore.local.get_or_insert_with(Default::default);
            local.enabled = true;
            local.storage_size = Some(storage_size.clone());
        }
        FilestoreUpdate::InClusterExternalVolume { volume_claim_name } => {
            filestore.external = None;
            filestore.local = None;
            let volume = filestore.external_volume.get_or_insert_with(Default::default);
            volume.volume_claim_name = Some(volume_claim_name.clone());
        }
    }
}

/// Validate the given version string as `X.Y[.Z]` or `release-X.Y`.
pub fn validate_version(version: &str) -> Result<(), AppError> {
    if RE_SEMANTIC_VERSION.is_match(version) || RE_RELEASE_BRANCH.is_match(version) {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "version must be a semantic version (X.Y[.Z]) or a release branch (release-X.Y), got {:?}",
            version
        )))
    }
}

fn non_empty(val: &str) -> Option<String> {
    if val.is_empty() {
        None
    } else {
        Some(val.to_string())
    }
}
