//! Server configuration module.
//!
//! Global daemon settings are kept apart from per-application settings.
//!
//! # Architecture
//!
//! - **Global Configuration:** network binding, runtime, logging, socket,
//!   dispatcher limits, telemetry
//! - **Version Routing:** every enabled application claims a set of protocol
//!   versions; a version belongs to at most one application
//!
//! # Example
//!
//! ```toml
//! [global.network]
//! host = "0.0.0.0"
//! port = 443
//!
//! [global.dispatcher]
//! supported_versions = ["Q013", "Q012"]
//! time_wait_period_ms = 5000
//!
//! [applications.echo]
//! type = "echo"
//! versions = ["Q013", "Q012"]
//! ```

pub mod application;
pub mod global;
pub mod loader;

#[cfg(test)]
mod tests;

pub use application::{ApplicationConfig, ApplicationType, EchoConfig};
pub use global::{GlobalConfig, LogLevel, LoggingConfig, NetworkConfig, RuntimeConfig};
pub use loader::{load_config, CliArgs};

use quicd_wire::Version;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Master server configuration composing all subsystems.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Global server configuration
    pub global: GlobalConfig,

    /// Application configurations indexed by unique name
    pub applications: HashMap<String, ApplicationConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let global = GlobalConfig::default();
        let versions = global.dispatcher.versions().unwrap_or_default();

        let mut applications = HashMap::new();
        applications.insert("echo".to_string(), ApplicationConfig::echo(&versions));

        Self {
            global,
            applications,
        }
    }
}

impl ServerConfig {
    /// Validate the entire configuration.
    ///
    /// Covers global settings, each application, and the version routing
    /// between them.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.global.validate() {
            errors.extend(e);
        }

        for (name, app) in &self.applications {
            if let Err(e) = app.validate() {
                for err in e {
                    errors.push(format!("Application '{}': {}", name, err));
                }
            }
        }

        let supported: HashSet<Version> = self
            .global
            .dispatcher
            .versions()
            .unwrap_or_default()
            .into_iter()
            .collect();

        let mut seen = HashSet::new();
        for (name, app) in self.enabled_applications() {
            for version in app.parsed_versions() {
                if !seen.insert(version) {
                    errors.push(format!(
                        "Duplicate version '{}' in application '{}'",
                        version, name
                    ));
                }
                if !supported.contains(&version) {
                    errors.push(format!(
                        "Application '{}' claims version '{}' which is not in dispatcher.supported_versions",
                        name, version
                    ));
                }
            }
        }

        if self.enabled_applications().next().is_none() {
            errors.push(
                "No enabled applications configured. At least one application must be defined and enabled.".to_string(),
            );
        }

        for version in &supported {
            if !seen.contains(version) {
                tracing::warn!(
                    %version,
                    "Supported version has no application; first packets for it will be dropped"
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn enabled_applications(&self) -> impl Iterator<Item = (&String, &ApplicationConfig)> {
        self.applications.iter().filter(|(_, app)| app.enabled)
    }

    /// Find the enabled application serving `version`.
    pub fn find_app_by_version(&self, version: Version) -> Option<(&String, &ApplicationConfig)> {
        self.enabled_applications()
            .find(|(_, app)| app.parsed_versions().contains(&version))
    }
}
