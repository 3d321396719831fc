use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use super::error::{OperationExt, ServerResult};
use super::AppState;
use crate::provisioner::{self, Provisioner};
use crate::reconciler::Reconciler;
use bootstrapper_core::crd::Mattermost;
use bootstrapper_core::error::AppError;
use bootstrapper_core::installation::{CreateInstallationRequest, PatchInstallationRequest};
use bootstrapper_core::pods::PodSummary;
use bootstrapper_core::secrets::{InstallationSecrets, SecretData, SECRET_NAME_DATABASE, SECRET_NAME_FILESTORE};

/// Create a new installation.
#[tracing::instrument(level = "debug", skip(state, req))]
pub(super) async fn create_installation(
    State(state): State<AppState>, Path(cluster): Path<String>, Json(req): Json<CreateInstallationRequest>,
) -> ServerResult<(StatusCode, Json<Mattermost>)> {
    const OP: &str = "create installation";
    let plan = req.validate().op(OP)?;
    let client = state.provider.resource_client(&cluster).await.op(OP)?;
    let installation = Provisioner::new(client, state.config.clone()).provision(&plan).await.op(OP)?;
    Ok((StatusCode::CREATED, Json(installation)))
}

/// List the installations of a cluster.
#[tracing::instrument(level = "debug", skip(state))]
pub(super) async fn list_installations(State(state): State<AppState>, Path(cluster): Path<String>) -> ServerResult<Json<Vec<Mattermost>>> {
    const OP: &str = "list installations";
    let client = state.provider.resource_client(&cluster).await.op(OP)?;
    let installations = client.list_installations().await.op(OP)?;
    Ok(Json(installations))
}

/// Apply a partial update to an installation.
#[tracing::instrument(level = "debug", skip(state, patch))]
pub(super) async fn patch_installation(
    State(state): State<AppState>, Path((cluster, name)): Path<(String, String)>, Json(patch): Json<PatchInstallationRequest>,
) -> ServerResult<Json<Mattermost>> {
    const OP: &str = "patch installation";
    // A patch which fails validation never resolves a cluster client.
    patch.validate().op(OP)?;
    let client = state.provider.resource_client(&cluster).await.op(OP)?;
    let installation = Reconciler::new(client).patch(&name, &name, &patch).await.op(OP)?;
    Ok(Json(installation))
}

/// Delete an installation along with its namespace.
#[tracing::instrument(level = "debug", skip(state))]
pub(super) async fn delete_installation(State(state): State<AppState>, Path((cluster, name)): Path<(String, String)>) -> ServerResult<StatusCode> {
    const OP: &str = "delete installation";
    let client = state.provider.resource_client(&cluster).await.op(OP)?;
    provisioner::deprovision(client.as_ref(), &name).await.op(OP)?;
    Ok(StatusCode::OK)
}

/// Summarize the pods of an installation.
#[tracing::instrument(level = "debug", skip(state))]
pub(super) async fn list_pods(State(state): State<AppState>, Path((cluster, name)): Path<(String, String)>) -> ServerResult<Json<Vec<PodSummary>>> {
    const OP: &str = "list installation pods";
    let client = state.provider.resource_client(&cluster).await.op(OP)?;
    let pods = client.list_pods(&name).await.op(OP)?;
    Ok(Json(pods.iter().map(PodSummary::from).collect()))
}

/// Read the secrets an installation is wired to.
#[tracing::instrument(level = "debug", skip(state))]
pub(super) async fn get_secrets(State(state): State<AppState>, Path((cluster, name)): Path<(String, String)>) -> ServerResult<Json<InstallationSecrets>> {
    const OP: &str = "get installation secrets";
    let client = state.provider.resource_client(&cluster).await.op(OP)?;
    let installation = client
        .get_installation(&name, &name)
        .await
        .op(OP)?
        .ok_or_else(|| AppError::ResourceNotFound(format!("installation {}", name)))
        .op(OP)?;
    let spec = &installation.spec;

    let database_name = spec.database_secret_name().unwrap_or(SECRET_NAME_DATABASE);
    let database = client
        .get_secret(&name, database_name)
        .await
        .op(OP)?
        .ok_or_else(|| AppError::ResourceNotFound(format!("database secret {}", database_name)))
        .op(OP)?;
    let filestore = client
        .get_secret(&name, spec.filestore_secret_name().unwrap_or(SECRET_NAME_FILESTORE))
        .await
        .op(OP)?;
    let license = match spec.license_secret_name() {
        Some(license_name) => client.get_secret(&name, license_name).await.op(OP)?,
        None => None,
    };

    Ok(Json(InstallationSecrets {
        database_secret: SecretData::from(Some(&database)),
        filestore_secret: SecretData::from(filestore.as_ref()),
        license_secret: SecretData::from(license.as_ref()),
    }))
}
