//! Kubernetes access.
//!
//! Everything the bootstrapper does to a cluster goes through the `ResourceClient` trait. The
//! production implementation talks to the API server through `kube`; tests use an in-memory
//! implementation.

mod client;
mod kube_client;
mod provider;

pub use client::{LogLines, ResourceClient};
pub use kube_client::KubeResourceClient;
pub use provider::{ClusterProvider, KubeconfigProvider};
