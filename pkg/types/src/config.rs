use pkg_constants::{auth, cache, fleet, paths};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Server configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// address: 0.0.0.0:15220
/// auth:
///   enabled: true
///   user-header: X-Auth-Request-Email
///   teams-header: X-Auth-Request-Groups
///   session-interval: 172800
///   default-team: dev
/// cache:
///   namespaces: 300
///   topology: 300
/// aggregator:
///   per-cluster-timeout: 30
///   failure-mode: best-effort
///   ordering: stable-by-cluster-name
/// clusters:
///   providers:
///     - type: incluster
///       name: kobs
///     - type: kubeconfig
///       path: /etc/kobs/kubeconfig
///       context: "*"
/// plugins:
///   - name: opsgenie
///     type: opsgenie
///     permissions-enabled: true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfigFile {
    #[serde(default)]
    pub address: Option<String>,
    /// Seconds in-flight requests may drain after a shutdown signal.
    #[serde(default)]
    pub shutdown_deadline: Option<u64>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub clusters: ClustersConfig,
    #[serde(default)]
    pub plugins: Vec<PluginInstance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AuthConfig {
    pub enabled: bool,
    pub user_header: String,
    pub teams_header: String,
    /// Session lifetime in seconds.
    pub session_interval: u64,
    /// Team id used when a request carries no teams header.
    pub default_team: Option<String>,
    /// Secret used to sign session cookies. Generated at startup when unset.
    pub secret: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            user_header: auth::DEFAULT_USER_HEADER.to_string(),
            teams_header: auth::DEFAULT_TEAMS_HEADER.to_string(),
            session_interval: auth::DEFAULT_SESSION_INTERVAL_SECS,
            default_team: None,
            secret: None,
        }
    }
}

/// TTLs of the refreshing cache keyspaces, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheConfig {
    /// `0` disables namespace caching.
    pub namespaces: u64,
    pub topology: u64,
    pub teams: u64,
    pub tags: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespaces: cache::DEFAULT_NAMESPACES_TTL_SECS,
            topology: cache::DEFAULT_TOPOLOGY_TTL_SECS,
            teams: cache::DEFAULT_TEAMS_TTL_SECS,
            tags: cache::DEFAULT_TAGS_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AggregatorConfig {
    /// Defaults to the number of clusters, capped at 32.
    pub max_parallelism: Option<usize>,
    /// Seconds.
    pub per_cluster_timeout: u64,
    pub failure_mode: FailureMode,
    pub ordering: Ordering,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: None,
            per_cluster_timeout: fleet::DEFAULT_PER_CLUSTER_TIMEOUT_SECS,
            failure_mode: FailureMode::default(),
            ordering: Ordering::default(),
        }
    }
}

/// What a fan-out does when some clusters fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    /// Failing clusters are reported next to the successful subset.
    #[default]
    BestEffort,
    /// The first failing cluster aborts its siblings and fails the call.
    AllOrNothing,
}

impl std::str::FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best-effort" => Ok(FailureMode::BestEffort),
            "all-or-nothing" => Ok(FailureMode::AllOrNothing),
            other => Err(format!("unknown failure mode {other}")),
        }
    }
}

/// Order of fan-out results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ordering {
    /// Results follow the order the clusters were given in.
    None,
    /// Results are concatenated by ascending cluster name.
    #[default]
    StableByClusterName,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClustersConfig {
    pub providers: Vec<ProviderConfig>,
}

/// Where cluster clients come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// The cluster kobs runs in, using the pod's service account.
    Incluster { name: String },
    /// One cluster per context of a kubeconfig file. An empty context or `*`
    /// loads every context.
    Kubeconfig {
        #[serde(default = "default_kubeconfig")]
        path: String,
        #[serde(default)]
        context: String,
    },
}

fn default_kubeconfig() -> String {
    paths::DEFAULT_KUBECONFIG.to_string()
}

/// A configured plugin instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginInstance {
    pub name: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// When disabled, plugin specific permission checks always allow.
    #[serde(default)]
    pub permissions_enabled: bool,
    /// Plugin options including credentials. Never sent to clients.
    #[serde(default)]
    pub options: serde_json::Value,
    /// Options the UI needs to render the plugin.
    #[serde(default)]
    pub frontend_options: serde_json::Value,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("session interval must be at least {min}s, got {got}s")]
    SessionIntervalTooShort { min: u64, got: u64 },

    #[error("cache ttl for {keyspace} must be at least {min}s, got {got}s")]
    CacheTtlTooShort {
        keyspace: &'static str,
        min: u64,
        got: u64,
    },

    #[error("no cluster providers configured")]
    NoProviders,

    #[error("duplicate plugin instance name '{0}'")]
    DuplicatePlugin(String),

    #[error("plugin instance name must not be empty")]
    EmptyPluginName,

    #[error("user header must not be empty when auth is enabled")]
    EmptyUserHeader,

    #[error("per-cluster timeout must be at least 1s")]
    ZeroClusterTimeout,
}

impl ServerConfigFile {
    /// Reject configurations the server cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.session_interval < auth::MIN_SESSION_INTERVAL_SECS {
            return Err(ConfigError::SessionIntervalTooShort {
                min: auth::MIN_SESSION_INTERVAL_SECS,
                got: self.auth.session_interval,
            });
        }
        if self.auth.enabled && self.auth.user_header.trim().is_empty() {
            return Err(ConfigError::EmptyUserHeader);
        }

        let min = cache::MIN_CACHE_TTL_SECS;
        if self.cache.namespaces != 0 && self.cache.namespaces < min {
            return Err(ConfigError::CacheTtlTooShort {
                keyspace: "namespaces",
                min,
                got: self.cache.namespaces,
            });
        }
        for (keyspace, ttl) in [
            ("topology", self.cache.topology),
            ("teams", self.cache.teams),
            ("tags", self.cache.tags),
        ] {
            if ttl < min {
                return Err(ConfigError::CacheTtlTooShort {
                    keyspace,
                    min,
                    got: ttl,
                });
            }
        }

        if self.aggregator.per_cluster_timeout == 0 {
            return Err(ConfigError::ZeroClusterTimeout);
        }

        if self.clusters.providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        let mut names = HashSet::new();
        for plugin in &self.plugins {
            if plugin.name.is_empty() {
                return Err(ConfigError::EmptyPluginName);
            }
            if !names.insert(plugin.name.as_str()) {
                return Err(ConfigError::DuplicatePlugin(plugin.name.clone()));
            }
        }
        Ok(())
    }
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ServerConfigFile {
        ServerConfigFile {
            clusters: ClustersConfig {
                providers: vec![ProviderConfig::Incluster {
                    name: "kobs".to_string(),
                }],
            },
            ..Default::default()
        }
    }

    #[test]
    fn parses_yaml() {
        let cfg: ServerConfigFile = serde_yaml::from_str(
            r#"
address: 127.0.0.1:8080
auth:
  enabled: true
  session-interval: 3600
cache:
  namespaces: 0
clusters:
  providers:
    - type: incluster
      name: kobs
    - type: kubeconfig
      path: /tmp/kubeconfig
plugins:
  - name: opsgenie
    type: opsgenie
    permissions-enabled: true
"#,
        )
        .unwrap();

        assert_eq!(cfg.address.as_deref(), Some("127.0.0.1:8080"));
        assert!(cfg.auth.enabled);
        assert_eq!(cfg.auth.user_header, "X-Auth-Request-Email");
        assert_eq!(cfg.auth.session_interval, 3600);
        assert_eq!(cfg.cache.namespaces, 0);
        assert_eq!(cfg.cache.topology, 300);
        assert_eq!(
            cfg.clusters.providers[1],
            ProviderConfig::Kubeconfig {
                path: "/tmp/kubeconfig".to_string(),
                context: String::new(),
            }
        );
        assert!(cfg.plugins[0].permissions_enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_short_session_interval() {
        let mut cfg = valid();
        cfg.auth.session_interval = 59;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::SessionIntervalTooShort { min: 60, got: 59 })
        );
    }

    #[test]
    fn namespace_ttl_zero_disables_caching_but_small_values_are_rejected() {
        let mut cfg = valid();
        cfg.cache.namespaces = 0;
        assert!(cfg.validate().is_ok());
        cfg.cache.namespaces = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_short_topology_ttl() {
        let mut cfg = valid();
        cfg.cache.topology = 30;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::CacheTtlTooShort {
                keyspace: "topology",
                ..
            })
        ));
    }

    #[test]
    fn aggregator_policy_from_yaml() {
        let cfg: ServerConfigFile = serde_yaml::from_str(
            r#"
aggregator:
  max-parallelism: 4
  per-cluster-timeout: 10
  failure-mode: all-or-nothing
  ordering: none
"#,
        )
        .unwrap();
        assert_eq!(cfg.aggregator.max_parallelism, Some(4));
        assert_eq!(cfg.aggregator.failure_mode, FailureMode::AllOrNothing);
        assert_eq!(cfg.aggregator.ordering, Ordering::None);

        let defaults = AggregatorConfig::default();
        assert_eq!(defaults.failure_mode, FailureMode::BestEffort);
        assert_eq!(defaults.ordering, Ordering::StableByClusterName);
        assert_eq!("all-or-nothing".parse(), Ok(FailureMode::AllOrNothing));
        assert!("sometimes".parse::<FailureMode>().is_err());
    }

    #[test]
    fn rejects_zero_cluster_timeout() {
        let mut cfg = valid();
        cfg.aggregator.per_cluster_timeout = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroClusterTimeout));
        cfg.aggregator.per_cluster_timeout = 1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_plugins() {
        let mut cfg = valid();
        let plugin = PluginInstance {
            name: "sql".to_string(),
            plugin_type: "sql".to_string(),
            ..Default::default()
        };
        cfg.plugins = vec![plugin.clone(), plugin];
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::DuplicatePlugin("sql".to_string()))
        );
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg: ServerConfigFile = load_config_file("/nonexistent/kobs.yaml").unwrap();
        assert!(cfg.address.is_none());
        assert_eq!(cfg.validate(), Err(ConfigError::NoProviders));
    }
}
