//! Application registry.
//!
//! Maps each protocol version to the constructor of the session that serves
//! it. The registry is the dispatcher's [`SessionFactory`]: a first packet is
//! routed to the application that claims its version.

pub mod echo;

use crate::config::{ApplicationType, ServerConfig};
use crate::dispatcher::{Session, SessionFactory, SessionParams};
use ahash::AHashMap;
use anyhow::{Context, Result};
use quicd_wire::Version;
use std::sync::Arc;

pub use echo::EchoSession;

/// Builds a session for a new connection.
pub type SessionCtor = Arc<dyn Fn(&SessionParams) -> Box<dyn Session> + Send + Sync>;

/// Application registry mapping versions to session constructors.
#[derive(Clone, Default)]
pub struct AppRegistry {
    ctors: AHashMap<Version, SessionCtor>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `ctor` for `version`.
    ///
    /// Returns an error if the version is already registered.
    pub fn register(mut self, version: Version, ctor: SessionCtor) -> Result<Self> {
        if self.ctors.contains_key(&version) {
            anyhow::bail!("version '{}' is already registered", version);
        }
        self.ctors.insert(version, ctor);
        Ok(self)
    }

    /// Registered versions, sorted by tag.
    pub fn versions(&self) -> Vec<Version> {
        let mut versions: Vec<Version> = self.ctors.keys().copied().collect();
        versions.sort_by_key(|v| v.tag());
        versions
    }

    pub fn len(&self) -> usize {
        self.ctors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ctors.is_empty()
    }
}

impl SessionFactory for AppRegistry {
    fn create_session(&mut self, params: &SessionParams) -> Option<Box<dyn Session>> {
        let ctor = self.ctors.get(&params.version)?;
        Some(ctor(params))
    }
}

/// Build the application registry from configuration.
pub fn build_registry(config: &ServerConfig) -> Result<AppRegistry> {
    let mut registry = AppRegistry::new();

    for (name, app) in config.enabled_applications() {
        app.validate().map_err(|errs| {
            anyhow::anyhow!("Invalid config for application '{}': {}", name, errs.join("; "))
        })?;

        let ctor: SessionCtor = match app.app_type {
            ApplicationType::Echo => {
                let echo = app.echo.clone();
                Arc::new(move |params: &SessionParams| -> Box<dyn Session> {
                    Box::new(EchoSession::new(params, &echo))
                })
            }
        };

        for version in app.parsed_versions() {
            registry = registry
                .register(version, Arc::clone(&ctor))
                .with_context(|| format!("Failed to register application '{}'", name))?;
        }

        tracing::info!(app = %name, versions = ?app.versions, "Registered application");
    }

    if registry.is_empty() {
        tracing::warn!("No applications registered - every first packet will be dropped");
    }

    Ok(registry)
}
