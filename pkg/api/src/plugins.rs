//! Plugin mount point.
//!
//! A plugin type is registered with a [`PluginFactory`]; every configured
//! [`PluginInstance`] of that type is built once at startup and its router is
//! mounted below `/api/plugins/<instance name>`. The effective user of a
//! request is available to plugin handlers through [`CurrentUser`] and
//! [`pkg_auth::User::plugin_custom`].
//!
//! [`CurrentUser`]: crate::auth::CurrentUser

use axum::Router;
use pkg_auth::User;
use pkg_fleet::Fleet;
use pkg_types::config::PluginInstance;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::AppState;

/// A configured plugin instance.
pub trait Plugin: Send + Sync {
    /// Routes served below `/api/plugins/<instance name>`.
    fn router(&self) -> Router;
}

/// What a plugin factory gets to build an instance.
#[derive(Clone)]
pub struct PluginContext {
    pub instance: PluginInstance,
    pub fleet: Fleet,
}

pub type PluginFactory =
    Box<dyn Fn(PluginContext) -> Result<Arc<dyn Plugin>, PluginError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("unknown plugin type '{plugin_type}' for instance '{name}'")]
    UnknownType { name: String, plugin_type: String },
    #[error("invalid options for plugin instance '{name}': {reason}")]
    InvalidOptions { name: String, reason: String },
}

/// Plugin types known to this server.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        plugin_type: &str,
        factory: impl Fn(PluginContext) -> Result<Arc<dyn Plugin>, PluginError> + Send + Sync + 'static,
    ) {
        self.factories
            .insert(plugin_type.to_string(), Box::new(factory));
    }

    /// Build every configured instance. Unknown types are an error.
    pub fn build(&self, instances: &[PluginInstance], fleet: &Fleet) -> Result<Plugins, PluginError> {
        let mut mounted = Vec::with_capacity(instances.len());
        for instance in instances {
            let factory = self.factories.get(&instance.plugin_type).ok_or_else(|| {
                PluginError::UnknownType {
                    name: instance.name.clone(),
                    plugin_type: instance.plugin_type.clone(),
                }
            })?;
            let plugin = factory(PluginContext {
                instance: instance.clone(),
                fleet: fleet.clone(),
            })?;
            info!(name = %instance.name, plugin_type = %instance.plugin_type, "loaded plugin");
            mounted.push((instance.clone(), plugin));
        }
        Ok(Plugins { mounted })
    }
}

/// The built plugin instances.
#[derive(Default)]
pub struct Plugins {
    mounted: Vec<(PluginInstance, Arc<dyn Plugin>)>,
}

/// Public description of a plugin instance. Options stay on the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub display_name: String,
    pub description: String,
    pub frontend_options: serde_json::Value,
}

impl Plugins {
    pub fn instance(&self, name: &str) -> Option<&PluginInstance> {
        self.mounted
            .iter()
            .map(|(instance, _)| instance)
            .find(|instance| instance.name == name)
    }

    /// Instances `user` may access, in configuration order.
    pub fn visible_to(&self, user: &User) -> Vec<PluginInfo> {
        self.mounted
            .iter()
            .map(|(instance, _)| instance)
            .filter(|instance| user.has_plugin_access(&instance.name))
            .map(|instance| PluginInfo {
                name: instance.name.clone(),
                plugin_type: instance.plugin_type.clone(),
                display_name: if instance.display_name.is_empty() {
                    instance.name.clone()
                } else {
                    instance.display_name.clone()
                },
                description: instance.description.clone(),
                frontend_options: instance.frontend_options.clone(),
            })
            .collect()
    }

    /// Nest every instance's router below `/api/plugins/<name>`.
    pub fn mount(&self, router: Router<AppState>) -> Router<AppState> {
        self.mounted.iter().fold(router, |router, (instance, plugin)| {
            router.nest_service(&format!("/api/plugins/{}", instance.name), plugin.router())
        })
    }
}
