use chrono::Utc;
use http::HeaderMap;
use http::header::COOKIE;
use pkg_cache::RefreshingCache;
use pkg_constants::auth::SESSION_COOKIE;
use pkg_constants::cache::MAX_CACHED_USERS;
use pkg_fleet::{AggregateError, Fleet};
use pkg_types::config::AuthConfig;
use pkg_types::team::TeamSpec;
use pkg_types::user::UserSpec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::session::SessionSigner;
use crate::user::User;

/// Identity of a request after authentication.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub user: Arc<User>,
    /// `Set-Cookie` value when a new session was issued.
    pub set_cookie: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UserKey {
    id: String,
    teams: Vec<String>,
}

/// Maps identity headers to a merged [`User`].
#[derive(Clone)]
pub struct AuthResolver {
    inner: Arc<Inner>,
}

struct Inner {
    enabled: bool,
    user_header: String,
    teams_header: String,
    default_team: Option<String>,
    session_interval: Duration,
    signer: SessionSigner,
    fleet: Fleet,
    users: RefreshingCache<UserKey, Arc<User>>,
}

impl AuthResolver {
    pub fn new(config: &AuthConfig, signer: SessionSigner, fleet: Fleet) -> Self {
        let session_interval = Duration::from_secs(config.session_interval);
        Self {
            inner: Arc::new(Inner {
                enabled: config.enabled,
                user_header: config.user_header.clone(),
                teams_header: config.teams_header.clone(),
                default_team: config.default_team.clone().filter(|t| !t.is_empty()),
                session_interval,
                signer,
                fleet,
                users: RefreshingCache::new("users", session_interval)
                    .with_max_entries(MAX_CACHED_USERS),
            }),
        }
    }

    pub fn enabled(&self) -> bool {
        self.inner.enabled
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Authenticated, AuthError> {
        let inner = &self.inner;
        if !inner.enabled {
            return Ok(Authenticated {
                user: Arc::new(User::superuser()),
                set_cookie: None,
            });
        }

        let id = header_value(headers, &inner.user_header);
        if id.is_empty() {
            return Err(AuthError::Unauthorized(format!(
                "missing {} header",
                inner.user_header
            )));
        }
        let key = UserKey {
            id: id.to_string(),
            teams: self.team_ids(headers),
        };

        if let Some(token) = session_cookie(headers) {
            match inner.signer.verify(token, Utc::now()) {
                Ok(session) if session.user_id == key.id => {
                    let fleet = inner.fleet.clone();
                    let producer_key = key.clone();
                    let (user, _) = inner
                        .users
                        .get_with(key, move || merge_user(fleet, producer_key))
                        .await
                        .map_err(unauthorized)?;
                    return Ok(Authenticated {
                        user,
                        set_cookie: None,
                    });
                }
                Ok(session) => {
                    debug!(session_user = %session.user_id, "session belongs to another user")
                }
                Err(e) => debug!(error = %e, "ignoring session cookie"),
            }
        }

        let user = inner
            .users
            .refresh(key.clone(), || merge_user(inner.fleet.clone(), key.clone()))
            .await
            .map_err(unauthorized)?;

        let max_age = inner.session_interval.as_secs();
        let expires_at = Utc::now() + chrono::Duration::seconds(max_age as i64);
        let token = inner.signer.issue(&user.id, expires_at);
        info!(user = %user.id, teams = user.teams.len(), "issued session");

        Ok(Authenticated {
            user,
            set_cookie: Some(format!(
                "{SESSION_COOKIE}={token}; Path=/; Max-Age={max_age}; HttpOnly; SameSite=Lax"
            )),
        })
    }

    /// Team ids from the teams header, falling back to the default team.
    fn team_ids(&self, headers: &HeaderMap) -> Vec<String> {
        let mut ids: Vec<String> = header_value(headers, &self.inner.teams_header)
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        if ids.is_empty() {
            if let Some(team) = &self.inner.default_team {
                ids.push(team.clone());
            }
        }
        ids.sort();
        ids.dedup();
        ids
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default()
}

fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
}

fn unauthorized(e: AggregateError) -> AuthError {
    warn!(error = %e, "user lookup failed");
    AuthError::Unauthorized("user lookup failed".to_string())
}

/// Find the user CR for `key.id` and the teams it belongs to, either through
/// the teams header or through its own team references.
async fn merge_user(fleet: Fleet, key: UserKey) -> Result<Arc<User>, AggregateError> {
    let policy = fleet.policy().clone();
    let id = key.id.clone();
    let users = fleet
        .aggregate(
            |cluster| async move { cluster.users("").await },
            |u: &UserSpec| u.id == id,
            &policy,
        )
        .await?;
    ensure_answered(&fleet, &users.errors)?;
    let spec = users.items.into_iter().next();

    let teams = fleet
        .aggregate(
            |cluster| async move { cluster.teams("").await },
            |t: &TeamSpec| {
                key.teams.contains(&t.id)
                    || spec.as_ref().is_some_and(|u| u.is_member_of(&t.reference()))
            },
            &policy,
        )
        .await?;
    ensure_answered(&fleet, &teams.errors)?;

    if spec.is_none() {
        debug!(user = %key.id, "no user resource, using team permissions only");
    }
    Ok(Arc::new(User::merge(&key.id, spec.as_ref(), &teams.items)))
}

fn ensure_answered(
    fleet: &Fleet,
    errors: &[pkg_fleet::PerClusterError],
) -> Result<(), AggregateError> {
    if !errors.is_empty() && errors.len() == fleet.clusters().len() {
        return Err(AggregateError::UpstreamFailure(errors.to_vec()));
    }
    Ok(())
}
