//! Installation provisioning.
//!
//! Provisioning is a strictly sequential pipeline: namespace, then the database, then secrets,
//! then the workload resource. Each object created along the way registers an undo step; when a
//! later step fails, the undo steps run in reverse order before the error is returned.

use std::sync::Arc;

use anyhow::{Context, Result};
use backoff::ExponentialBackoffBuilder;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::config::Config;
use crate::k8s::ResourceClient;
use bootstrapper_core::crd::{DatabaseCluster, Mattermost};
use bootstrapper_core::error::AppError;
use bootstrapper_core::installation::{canonical_labels, DatabaseStrategy, FilestoreStrategy, InstallationPlan, ResolvedSecrets, S3Credentials};
use bootstrapper_core::secrets::{self, DatabaseUris, KEY_GENERATED_URI, SECRET_NAME_DATABASE};

/// A compensating action for an object created during provisioning.
#[derive(Clone, Debug, PartialEq)]
enum Undo {
    DeleteNamespace(String),
    DeleteDatabaseCluster { namespace: String, name: String },
    DeleteSecret { namespace: String, name: String },
}

/// Orchestrates the creation of new installations.
pub struct Provisioner {
    client: Arc<dyn ResourceClient>,
    config: Arc<Config>,
}

impl Provisioner {
    /// Create a new instance.
    pub fn new(client: Arc<dyn ResourceClient>, config: Arc<Config>) -> Self {
        Self { client, config }
    }

    /// Provision the installation described by the given plan.
    #[tracing::instrument(level = "debug", skip(self, plan), fields(namespace = %plan.namespace))]
    pub async fn provision(&self, plan: &InstallationPlan) -> Result<Mattermost> {
        let mut undo = Vec::new();
        match self.run(plan, &mut undo).await {
            Ok(installation) => {
                tracing::info!(namespace = %plan.namespace, "installation provisioned");
                Ok(installation)
            }
            Err(err) => {
                tracing::error!(error = ?err, namespace = %plan.namespace, "error provisioning installation, rolling back");
                self.compensate(undo).await;
                Err(err)
            }
        }
    }

    async fn run(&self, plan: &InstallationPlan, undo: &mut Vec<Undo>) -> Result<Mattermost> {
        let ns = plan.namespace.as_str();

        // Namespace.
        if self.ensure_namespace(plan).await? {
            undo.push(Undo::DeleteNamespace(ns.into()));
        }

        // Database.
        let uris = match &plan.database {
            DatabaseStrategy::CreateManaged => {
                let cluster = DatabaseCluster::for_namespace(ns, self.config.database_instances, &self.config.database_storage_size);
                let cluster_name = DatabaseCluster::name_for_namespace(ns);
                self.client
                    .create_database_cluster(ns, &cluster)
                    .await
                    .context("error creating database cluster")?;
                undo.push(Undo::DeleteDatabaseCluster {
                    namespace: ns.into(),
                    name: cluster_name,
                });
                let uri = self.await_generated_uri(ns).await?;
                Some(DatabaseUris::from_generated_uri(&uri).context("error deriving database uris")?)
            }
            DatabaseStrategy::ExistingSecret(_) => None,
            DatabaseStrategy::ExistingConnection { writer, reader } => Some(DatabaseUris {
                writer: writer.clone(),
                reader: reader.clone(),
            }),
        };

        // Secrets.
        let database = match (&plan.database, uris) {
            (DatabaseStrategy::ExistingSecret(name), _) => name.clone(),
            (_, Some(uris)) => {
                let secret = secrets::database_secret(ns, &plan.name, &uris);
                self.create_secret(ns, &secret, undo).await.context("error creating database secret")?;
                SECRET_NAME_DATABASE.to_string()
            }
            (_, None) => return Err(AppError::Ise(anyhow::anyhow!("no database connection resolved for {}", ns)).into()),
        };
        let license = match &plan.license {
            Some(license) => {
                let secret = secrets::license_secret(ns, &plan.name, license);
                let name = self.create_secret(ns, &secret, undo).await.context("error creating license secret")?;
                Some(name)
            }
            None => None,
        };
        if let FilestoreStrategy::ExternalS3 {
            credentials: S3Credentials::Supplied { access_key, secret_key },
            ..
        } = &plan.filestore
        {
            let secret = secrets::filestore_secret(ns, &plan.name, access_key, secret_key);
            self.create_secret(ns, &secret, undo).await.context("error creating filestore secret")?;
        }
        let resolved = ResolvedSecrets {
            database,
            license,
            filestore: plan.filestore_secret_name(),
        };

        // Workload resource.
        let installation = plan.build_installation(&resolved, &self.config.ingress_class);
        self.client
            .create_installation(ns, &installation)
            .await
            .context("error creating installation resource")
    }

    /// Ensure the plan's namespace exists, returning `true` if it was created by this call.
    async fn ensure_namespace(&self, plan: &InstallationPlan) -> Result<bool> {
        let existing = self.client.get_namespace(&plan.namespace).await.context("error fetching namespace")?;
        if existing.is_some() {
            tracing::debug!(namespace = %plan.namespace, "namespace already exists");
            return Ok(false);
        }
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(plan.namespace.clone()),
                labels: Some(canonical_labels(&plan.name)),
                ..Default::default()
            },
            ..Default::default()
        };
        self.client.create_namespace(&namespace).await.context("error creating namespace")?;
        Ok(true)
    }

    /// Create the given secret, registering its undo step & returning its name.
    async fn create_secret(&self, ns: &str, secret: &Secret, undo: &mut Vec<Undo>) -> Result<String> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.client.create_secret(ns, secret).await?;
        undo.push(Undo::DeleteSecret {
            namespace: ns.into(),
            name: name.clone(),
        });
        Ok(name)
    }

    /// Poll for the secret generated for the namespace's database cluster, returning its URI.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn await_generated_uri(&self, ns: &str) -> Result<String> {
        let secret_name = DatabaseCluster::app_secret_name(ns);
        let deadline = self.config.database_secret_timeout();
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.database_secret_poll_initial())
            .with_max_elapsed_time(Some(deadline))
            .build();
        let (client, secret_name) = (&self.client, secret_name.as_str());
        backoff::future::retry(policy, move || async move {
            let secret = client
                .get_secret(ns, secret_name)
                .await
                .context("error fetching generated database secret")
                .map_err(backoff::Error::permanent)?;
            match secret.and_then(|secret| secrets::secret_value(&secret, KEY_GENERATED_URI)).filter(|uri| !uri.is_empty()) {
                Some(uri) => Ok(uri),
                None => {
                    tracing::debug!(secret = %secret_name, "generated database secret not ready");
                    let err = AppError::Timeout(format!("database secret {} was not ready within {:?}", secret_name, deadline));
                    Err(backoff::Error::transient(anyhow::Error::from(err)))
                }
            }
        })
        .await
    }

    /// Run the given undo steps in reverse order, best effort.
    async fn compensate(&self, undo: Vec<Undo>) {
        for step in undo.into_iter().rev() {
            tracing::info!(?step, "rolling back provisioning step");
            let res = match &step {
                Undo::DeleteNamespace(name) => self.client.delete_namespace(name).await,
                Undo::DeleteDatabaseCluster { namespace, name } => self.client.delete_database_cluster(namespace, name).await,
                Undo::DeleteSecret { namespace, name } => self.client.delete_secret(namespace, name).await,
            };
            if let Err(err) = res {
                tracing::error!(error = ?err, ?step, "error rolling back provisioning step");
            }
        }
    }
}

/// Delete the given installation along with its namespace.
#[tracing::instrument(level = "debug", skip(client))]
pub async fn deprovision(client: &dyn ResourceClient, name: &str) -> Result<()> {
    client.delete_installation(name, name).await.context("error deleting installation resource")?;
    client.delete_namespace(name).await.context("error deleting installation namespace")?;
    tracing::info!(namespace = %name, "installation deleted");
    Ok(())
}
