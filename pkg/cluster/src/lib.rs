//! Access to the fleet of Kubernetes clusters.
//!
//! [`ClusterClient`] is the typed contract against one API server and
//! [`KubeClient`] its implementation on top of `kube`. A [`Cluster`] pairs a
//! client with its unique name, memoises the namespace list and resolves
//! every custom resource it returns. [`Clusters`] is the registry built from
//! the configured providers.

mod client;
mod cluster;
mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
mod kube_client;
mod registry;

pub use client::{ClusterClient, ExecSession, LogOptions, MutateVerb, ResourceRequest};
pub use cluster::Cluster;
pub use error::{ClusterError, Result};
pub use kube_client::KubeClient;
pub use registry::Clusters;
