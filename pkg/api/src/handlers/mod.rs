pub mod applications;
pub mod auth;
pub mod clusters;
pub mod dashboards;
pub mod metrics;
pub mod plugins;
pub mod resources;
pub mod teams;
pub mod users;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use pkg_fleet::{FailureMode, Policy};
use pkg_types::reference::Reference;
use pkg_types::validate::{validate_name, validate_namespace};
use std::str::FromStr;

use crate::error::ApiError;

/// Query string as ordered pairs, so repeated keys such as
/// `?cluster=a&cluster=b` are kept.
#[derive(Debug, Clone, Default)]
pub struct Params(Vec<(String, String)>);

impl<S: Send + Sync> FromRequestParts<S> for Params {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(pairs) = Query::<Vec<(String, String)>>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::InvalidInput(e.body_text()))?;
        Ok(Params(pairs))
    }
}

impl Params {
    /// Every non-empty value of `key`, in request order, without duplicates.
    pub fn all(&self, key: &str) -> Vec<String> {
        let mut values: Vec<String> = Vec::new();
        for (k, v) in &self.0 {
            if k == key && !v.is_empty() && !values.contains(v) {
                values.push(v.clone());
            }
        }
        values
    }

    pub fn one(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    pub fn required(&self, key: &str) -> Result<&str, ApiError> {
        self.one(key).ok_or_else(|| ApiError::missing(key))
    }

    pub fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ApiError> {
        self.one(key)
            .map(|v| {
                v.parse()
                    .map_err(|_| ApiError::InvalidInput(format!("invalid value for {key}: {v}")))
            })
            .transpose()
    }

    pub fn flag(&self, key: &str) -> Result<bool, ApiError> {
        Ok(self.parse::<bool>(key)?.unwrap_or(false))
    }

    /// The fleet policy for this request. `failureMode` overrides the
    /// configured failure mode.
    pub fn policy(&self, base: &Policy) -> Result<Policy, ApiError> {
        Ok(match self.parse::<FailureMode>("failureMode")? {
            Some(mode) => base.with_failure_mode(mode),
            None => base.clone(),
        })
    }

    /// The `cluster`, `namespace` and `name` parameters, all required.
    /// Namespace and name must be valid Kubernetes object names.
    pub fn reference(&self) -> Result<Reference, ApiError> {
        let cluster = self.required("cluster")?;
        let namespace = self.required("namespace")?;
        let name = self.required("name")?;
        validate_namespace(namespace)
            .and_then(|_| validate_name(name))
            .map_err(|e| ApiError::InvalidInput(e.to_string()))?;
        Ok(Reference::new(cluster, namespace, name))
    }
}

#[cfg(test)]
impl From<&[(&str, &str)]> for Params {
    fn from(pairs: &[(&str, &str)]) -> Self {
        Params(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_keys_are_kept_in_order() {
        let params = Params::from(&[("cluster", "b"), ("cluster", "a"), ("cluster", "b"), ("cluster", "")][..]);
        assert_eq!(params.all("cluster"), vec!["b", "a"]);
        assert_eq!(params.one("cluster"), Some("b"));
        assert!(params.one("namespace").is_none());
    }

    #[test]
    fn typed_parameters() {
        let params = Params::from(&[("tail", "100"), ("previous", "true"), ("since", "x")][..]);
        assert_eq!(params.parse::<i64>("tail").unwrap(), Some(100));
        assert!(params.flag("previous").unwrap());
        assert!(!params.flag("follow").unwrap());
        assert!(params.parse::<i64>("since").is_err());
        assert!(params.reference().is_err());
    }

    #[test]
    fn failure_mode_overrides_the_configured_policy() {
        let base = Policy::default();
        let params = Params::from(&[("failureMode", "all-or-nothing")][..]);
        assert_eq!(params.policy(&base).unwrap().failure_mode, FailureMode::AllOrNothing);
        assert_eq!(Params::default().policy(&base).unwrap(), base);

        let params = Params::from(&[("failureMode", "sometimes")][..]);
        assert!(matches!(params.policy(&base), Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn references_must_be_valid_names() {
        let params = Params::from(&[("cluster", "prod"), ("namespace", "web"), ("name", "shop")][..]);
        assert_eq!(params.reference().unwrap(), Reference::new("prod", "web", "shop"));

        let params = Params::from(&[("cluster", "prod"), ("namespace", "Web_1"), ("name", "shop")][..]);
        assert!(matches!(params.reference(), Err(ApiError::InvalidInput(_))));
    }
}
