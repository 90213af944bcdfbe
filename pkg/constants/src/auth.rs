//! Authentication and session constants.

/// Header carrying the user id (usually an email) set by the auth proxy.
pub const DEFAULT_USER_HEADER: &str = "X-Auth-Request-Email";

/// Header carrying a comma-separated list of team ids.
pub const DEFAULT_TEAMS_HEADER: &str = "X-Auth-Request-Groups";

/// Name of the signed session cookie.
pub const SESSION_COOKIE: &str = "kobs-auth";

/// Default lifetime of an issued session, in seconds (48h).
pub const DEFAULT_SESSION_INTERVAL_SECS: u64 = 48 * 60 * 60;

/// Sessions shorter than this are rejected at startup.
pub const MIN_SESSION_INTERVAL_SECS: u64 = 60;

/// Id of the identity used when authentication is disabled.
pub const SUPERUSER_ID: &str = "kobs-admin";

/// Wildcard entry matching any non-empty value in permission lists.
pub const WILDCARD: &str = "*";
