//! Bootstrapper CRDs.
//!
//! Neither CRD is owned by this project: the Mattermost resource is installed by the Mattermost
//! operator, the database cluster resource by CloudNativePG. Only the fields the bootstrapper reads
//! or writes are modeled; everything else is carried through untouched.
//!
//! References:
//! - https://github.com/mattermost/mattermost-operator
//! - https://cloudnative-pg.io/documentation/current/cloudnative-pg.v1/

mod database;
mod mattermost;

use kube::Resource;

pub use database::{DatabaseCluster, DatabaseClusterSpec, DatabaseClusterStorage};
pub use mattermost::{
    literal_env_var, secret_env_var, DatabaseConfig, ExternalDatabase, ExternalFileStore, ExternalVolumeFileStore, FileStore, IngressConfig, LocalFileStore,
    Mattermost, MattermostSpec, MattermostStatus, PodTemplate, ENV_CONFIG, ENV_LICENSE,
};

/// A convenience trait built around the fact that all implementors
/// must have the following attributes.
pub trait RequiredMetadata {
    /// The namespace of this object.
    fn namespace(&self) -> &str;

    /// The name of this object.
    fn name(&self) -> &str;
}

impl RequiredMetadata for Mattermost {
    fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }
}

impl RequiredMetadata for DatabaseCluster {
    fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }
}
