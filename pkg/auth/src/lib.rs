//! Identity and permissions.
//!
//! [`AuthResolver`] turns the identity headers of a request into a merged
//! [`User`], backed by a signed session cookie and a cache of merged users.
//! The permission checks live on [`User`].

mod error;
mod resolver;
pub mod session;
mod user;

pub use error::AuthError;
pub use resolver::{AuthResolver, Authenticated};
pub use session::SessionSigner;
pub use user::{PluginPermissions, User};
