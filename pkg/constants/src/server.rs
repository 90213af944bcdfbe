//! API server constants.

/// Default listen address of the API server.
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:15220";

/// How long in-flight requests may drain after a shutdown signal, in seconds.
pub const DEFAULT_SHUTDOWN_DEADLINE_SECS: u64 = 30;

/// Response header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Non-standard status used when the client went away mid-request.
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;
