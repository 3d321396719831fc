pub mod crd;
pub mod error;
pub mod installation;
pub mod pods;
pub mod secrets;

pub use error::AppError;

/// The prefix applied to an installation's name to form its namespace & resource name.
pub const INSTALLATION_NAMESPACE_PREFIX: &str = "mm-installation-";

/// Build the namespace name used by the given installation.
pub fn installation_namespace(installation_name: &str) -> String {
    format!("{}{}", INSTALLATION_NAMESPACE_PREFIX, installation_name)
}
