//! Centralized constants for the kobs project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod auth;
pub mod cache;
pub mod fleet;
pub mod paths;
pub mod server;
