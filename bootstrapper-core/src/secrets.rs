//! Installation secret builders.
//!
//! Everything in here is pure: secrets are built from a validated plan plus whatever values were
//! resolved while provisioning, and patches are merged onto the data of live secrets.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::installation::{canonical_labels, DatabasePatch, S3FilestoreConfig};

/// The name of the database secret created for an installation.
pub const SECRET_NAME_DATABASE: &str = "database";
/// The name of the filestore secret created for an installation.
pub const SECRET_NAME_FILESTORE: &str = "filestore";
/// The prefix of every license secret name.
pub const LICENSE_SECRET_PREFIX: &str = "mattermost-license";

pub const KEY_DB_CONNECTION_CHECK_URL: &str = "DB_CONNECTION_CHECK_URL";
pub const KEY_DB_CONNECTION_STRING: &str = "DB_CONNECTION_STRING";
pub const KEY_DB_REPLICAS: &str = "MM_SQLSETTINGS_DATASOURCEREPLICAS";
pub const KEY_MM_CONFIG: &str = "MM_CONFIG";
pub const KEY_ACCESS_KEY: &str = "accesskey";
pub const KEY_SECRET_KEY: &str = "secretkey";
pub const KEY_LICENSE: &str = "license";
/// The key of the connection URI in a CloudNativePG generated app secret.
pub const KEY_GENERATED_URI: &str = "uri";

const SECRET_TYPE_OPAQUE: &str = "Opaque";
const LICENSE_HASH_LEN: usize = 6;
const SCHEME_POSTGRES: &str = "postgres";
const WRITER_HOST_SUFFIX: &str = "-rw";
const READER_HOST_SUFFIX: &str = "-ro";

/// The writer & reader connection URIs of a database.
#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseUris {
    pub writer: String,
    pub reader: String,
}

impl DatabaseUris {
    /// Derive both URIs from the writer URI found in a CloudNativePG generated secret.
    ///
    /// The scheme is normalised to `postgres` and the reader is the same URI pointed at the
    /// read-only service, whose first host label ends in `-ro` instead of `-rw`. Every other
    /// component is preserved.
    pub fn from_generated_uri(uri: &str) -> Result<Self> {
        let mut writer = Url::parse(uri).context("error parsing generated database uri")?;
        if writer.scheme() != SCHEME_POSTGRES && writer.set_scheme(SCHEME_POSTGRES).is_err() {
            bail!("error normalising scheme of generated database uri");
        }
        let host = match writer.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => bail!("generated database uri has no host"),
        };
        let (first_label, rest) = match host.find('.') {
            Some(idx) => host.split_at(idx),
            None => (host.as_str(), ""),
        };
        let service = match first_label.strip_suffix(WRITER_HOST_SUFFIX) {
            Some(service) if !service.is_empty() => service,
            _ => bail!("generated database host {:?} does not name a read-write service", host),
        };

        let mut reader = writer.clone();
        let reader_host = format!("{}{}{}", service, READER_HOST_SUFFIX, rest);
        reader
            .set_host(Some(&reader_host))
            .with_context(|| format!("error building reader host {:?}", reader_host))?;

        Ok(Self {
            writer: writer.to_string(),
            reader: reader.to_string(),
        })
    }
}

/// Compute the name of the secret for the given license text.
///
/// Identical license texts always map to the same name.
pub fn license_secret_name(license: &str) -> String {
    let digest = hex::encode(Sha256::digest(license.as_bytes()));
    format!("{}-{}", LICENSE_SECRET_PREFIX, &digest[..LICENSE_HASH_LEN])
}

/// Build the database secret for the given URIs.
///
/// `MM_CONFIG` carries the writer URI, which the Mattermost server uses to bootstrap its config
/// from the database.
pub fn database_secret(namespace: &str, installation: &str, uris: &DatabaseUris) -> Secret {
    opaque_secret(
        namespace,
        SECRET_NAME_DATABASE,
        installation,
        BTreeMap::from([
            (KEY_DB_CONNECTION_CHECK_URL, uris.writer.as_str()),
            (KEY_DB_CONNECTION_STRING, uris.writer.as_str()),
            (KEY_DB_REPLICAS, uris.reader.as_str()),
            (KEY_MM_CONFIG, uris.writer.as_str()),
        ]),
    )
}

/// Build the S3 filestore secret for the given credentials.
pub fn filestore_secret(namespace: &str, installation: &str, access_key: &str, secret_key: &str) -> Secret {
    opaque_secret(
        namespace,
        SECRET_NAME_FILESTORE,
        installation,
        BTreeMap::from([(KEY_ACCESS_KEY, access_key), (KEY_SECRET_KEY, secret_key)]),
    )
}

/// Build the license secret for the given license text, named by its hash.
pub fn license_secret(namespace: &str, installation: &str, license: &str) -> Secret {
    opaque_secret(namespace, &license_secret_name(license), installation, BTreeMap::from([(KEY_LICENSE, license)]))
}

fn opaque_secret(namespace: &str, name: &str, installation: &str, data: BTreeMap<&str, &str>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            labels: Some(canonical_labels(installation)),
            ..Default::default()
        },
        type_: Some(SECRET_TYPE_OPAQUE.into()),
        data: Some(
            data.into_iter()
                .map(|(key, val)| (key.to_string(), ByteString(val.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Read the given key of the given secret as a string.
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|val| String::from_utf8_lossy(&val.0).into_owned())
        .or_else(|| secret.string_data.as_ref().and_then(|data| data.get(key)).cloned())
}

/// Overlay the non-empty credentials of the given S3 config onto the given secret data.
pub fn merge_filestore_secret_data(existing: &BTreeMap<String, ByteString>, patch: &S3FilestoreConfig) -> BTreeMap<String, ByteString> {
    let mut data = existing.clone();
    overlay(&mut data, KEY_ACCESS_KEY, &patch.access_key_id);
    overlay(&mut data, KEY_SECRET_KEY, &patch.access_key_secret);
    data
}

/// Overlay the non-empty connection strings of the given patch onto the given secret data.
///
/// The writer string updates both the connection string & the check URL.
pub fn merge_database_secret_data(existing: &BTreeMap<String, ByteString>, patch: &DatabasePatch) -> BTreeMap<String, ByteString> {
    let mut data = existing.clone();
    overlay(&mut data, KEY_DB_CONNECTION_STRING, &patch.db_connection_string);
    overlay(&mut data, KEY_DB_CONNECTION_CHECK_URL, &patch.db_connection_string);
    overlay(&mut data, KEY_DB_REPLICAS, &patch.db_replicas_connection_string);
    data
}

fn overlay(data: &mut BTreeMap<String, ByteString>, key: &str, val: &str) {
    if !val.is_empty() {
        data.insert(key.into(), ByteString(val.as_bytes().to_vec()));
    }
}

/// The data of one secret, decoded as strings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SecretData {
    pub data: BTreeMap<String, String>,
}

impl From<Option<&Secret>> for SecretData {
    fn from(secret: Option<&Secret>) -> Self {
        let mut data: BTreeMap<String, String> = secret.and_then(|s| s.string_data.clone()).unwrap_or_default();
        for (key, val) in secret.and_then(|s| s.data.as_ref()).into_iter().flatten() {
            data.insert(key.clone(), String::from_utf8_lossy(&val.0).into_owned());
        }
        Self { data }
    }
}

/// The decoded secrets of an installation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallationSecrets {
    pub database_secret: SecretData,
    pub filestore_secret: SecretData,
    pub license_secret: SecretData,
}
