//! Shared data model of the kobs server: the custom resources users declare,
//! the references between them, permissions, the topology graph and the
//! server configuration file.

pub mod application;
pub mod config;
pub mod crd;
pub mod dashboard;
pub mod permissions;
pub mod reference;
pub mod resolve;
pub mod team;
pub mod topology;
pub mod user;
pub mod validate;

/// Group of every kobs custom resource.
pub const GROUP: &str = "kobs.io";
