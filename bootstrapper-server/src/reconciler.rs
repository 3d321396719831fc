//! Installation patch reconciliation.
//!
//! Patches are read-merge-write: the live workload resource and its secrets are fetched, the
//! patch is overlaid field by field, and only objects whose content actually changed are written.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::k8s::ResourceClient;
use bootstrapper_core::crd::{secret_env_var, Mattermost, ENV_LICENSE};
use bootstrapper_core::error::AppError;
use bootstrapper_core::installation::{apply_filestore_update, FilestoreUpdate, PatchInstallationRequest};
use bootstrapper_core::secrets::{self, KEY_LICENSE, SECRET_NAME_DATABASE, SECRET_NAME_FILESTORE};

/// Merges patch requests into live installations.
pub struct Reconciler {
    client: Arc<dyn ResourceClient>,
}

impl Reconciler {
    /// Create a new instance.
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self { client }
    }

    /// Apply the given patch to the named installation, returning the updated installation.
    #[tracing::instrument(level = "debug", skip(self, patch))]
    pub async fn patch(&self, namespace: &str, name: &str, patch: &PatchInstallationRequest) -> Result<Mattermost> {
        patch.validate()?;
        let filestore_update = patch.filestore_update()?;

        let live = self
            .client
            .get_installation(namespace, name)
            .await
            .context("error fetching installation")?
            .ok_or_else(|| AppError::ResourceNotFound(format!("installation {}", name)))?;
        // Read before the direct fields land: a replacement env list may drop it.
        let live_license = live.spec.license_secret_name().map(String::from);
        let mut updated = live.clone();
        // Direct fields first, so that a replacement env list keeps the license reference.
        patch.apply_direct_fields(&mut updated.spec);

        if let Some(update) = &filestore_update {
            self.patch_filestore(namespace, name, &mut updated, update).await?;
        }
        if let Some(license) = patch.license() {
            self.patch_license(namespace, name, &mut updated, live_license.as_deref(), license).await?;
        }
        let db_patch = patch
            .database_patch
            .as_ref()
            .filter(|db| !db.db_connection_string.is_empty() || !db.db_replicas_connection_string.is_empty());
        if let Some(db_patch) = db_patch {
            let secret_name = updated.spec.database_secret_name().unwrap_or(SECRET_NAME_DATABASE).to_string();
            let mut secret = self
                .client
                .get_secret(namespace, &secret_name)
                .await
                .context("error fetching database secret")?
                .ok_or_else(|| AppError::ResourceNotFound(format!("database secret {}", secret_name)))?;
            let existing = secret.data.clone().unwrap_or_default();
            let merged = secrets::merge_database_secret_data(&existing, db_patch);
            if merged != existing {
                secret.data = Some(merged);
                self.client
                    .replace_secret(namespace, &secret)
                    .await
                    .context("error updating database secret")?;
            } else {
                tracing::debug!(secret = %secret_name, "database patch changes nothing");
            }
        }
        if updated.spec == live.spec {
            tracing::debug!(%name, "patch leaves installation spec unchanged, skipping update");
            return Ok(live);
        }
        let installation = self
            .client
            .replace_installation(namespace, &updated)
            .await
            .context("error updating installation")?;
        tracing::info!(%name, "installation patched");
        Ok(installation)
    }

    /// Apply a filestore update, merging S3 credentials into the filestore secret.
    async fn patch_filestore(&self, namespace: &str, name: &str, installation: &mut Mattermost, update: &FilestoreUpdate) -> Result<()> {
        let cfg = match update {
            FilestoreUpdate::ExternalS3(cfg) => cfg,
            _ => {
                apply_filestore_update(&mut installation.spec, update, SECRET_NAME_FILESTORE);
                return Ok(());
            }
        };

        let secret_name = installation.spec.filestore_secret_name().unwrap_or(SECRET_NAME_FILESTORE).to_string();
        let existing = self
            .client
            .get_secret(namespace, &secret_name)
            .await
            .context("error fetching filestore secret")?;
        let secret_name = match existing {
            Some(mut secret) => {
                let data = secret.data.clone().unwrap_or_default();
                let merged = secrets::merge_filestore_secret_data(&data, cfg);
                if merged != data {
                    secret.data = Some(merged);
                    self.client
                        .replace_secret(namespace, &secret)
                        .await
                        .context("error updating filestore secret")?;
                }
                secret_name
            }
            None => {
                if cfg.access_key_id.is_empty() || cfg.access_key_secret.is_empty() {
                    return Err(AppError::InvalidInput(format!(
                        "installation has no filestore secret {}, so both S3 credentials are required",
                        secret_name
                    ))
                    .into());
                }
                let secret = secrets::filestore_secret(namespace, name, &cfg.access_key_id, &cfg.access_key_secret);
                self.client
                    .create_secret(namespace, &secret)
                    .await
                    .context("error creating filestore secret")?;
                SECRET_NAME_FILESTORE.to_string()
            }
        };
        apply_filestore_update(&mut installation.spec, update, &secret_name);
        Ok(())
    }

    /// Replace the installation's license secret with one for the given license.
    ///
    /// `live_secret` is the license secret referenced by the live installation. It is deleted when
    /// the license changes. The env reference is upserted either way.
    async fn patch_license(&self, namespace: &str, name: &str, installation: &mut Mattermost, live_secret: Option<&str>, license: &str) -> Result<()> {
        let new_name = secrets::license_secret_name(license);
        if live_secret == Some(new_name.as_str()) {
            tracing::debug!(secret = %new_name, "license unchanged");
        } else {
            if let Some(old_name) = live_secret {
                self.client
                    .delete_secret(namespace, old_name)
                    .await
                    .context("error deleting previous license secret")?;
            }
            let secret = secrets::license_secret(namespace, name, license);
            self.client
                .create_secret(namespace, &secret)
                .await
                .context("error creating license secret")?;
        }
        installation.spec.upsert_env(secret_env_var(ENV_LICENSE, &new_name, KEY_LICENSE, true));
        if installation.spec.license_secret.is_some() {
            installation.spec.license_secret = Some(new_name);
        }
        Ok(())
    }
}
