//! Filesystem path constants.

/// Default config file path for the server.
pub const DEFAULT_SERVER_CONFIG: &str = "/etc/kobs/config.yaml";

/// Default kubeconfig used by the `kubeconfig` cluster provider.
pub const DEFAULT_KUBECONFIG: &str = "~/.kube/config";
