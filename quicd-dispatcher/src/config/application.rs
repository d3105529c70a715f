//! Application configuration and version routing.
//!
//! Each application claims one or more protocol versions. The dispatcher's
//! session factory picks the application by the version a client's first
//! packet announces.

use quicd_wire::Version;
use serde::{Deserialize, Serialize};

/// Application-specific configuration.
///
/// ```toml
/// [applications.echo]
/// type = "echo"
/// versions = ["Q013", "Q012"]
/// enabled = true
/// [applications.echo.echo]
/// max_buffered_packets = 256
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application type (determines which session is built).
    #[serde(rename = "type")]
    pub app_type: ApplicationType,

    /// Version tags routed to this application.
    pub versions: Vec<String>,

    /// Whether the application is active.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Settings for `type = "echo"`.
    #[serde(default)]
    pub echo: EchoConfig,
}

fn default_true() -> bool {
    true
}

impl ApplicationConfig {
    /// The built-in echo application on every given version.
    pub fn echo(versions: &[Version]) -> Self {
        Self {
            app_type: ApplicationType::Echo,
            versions: versions.iter().map(|v| v.to_string()).collect(),
            enabled: true,
            echo: EchoConfig::default(),
        }
    }

    /// Validate application configuration.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.versions.is_empty() {
            errors.push("versions cannot be empty".to_string());
        }
        for tag in &self.versions {
            if let Err(e) = tag.parse::<Version>() {
                errors.push(e);
            }
        }

        if self.app_type == ApplicationType::Echo {
            if let Err(e) = self.echo.validate() {
                errors.extend(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Parsed version tags. Invalid tags are skipped; `validate` reports them.
    pub fn parsed_versions(&self) -> Vec<Version> {
        self.versions
            .iter()
            .filter_map(|tag| tag.parse().ok())
            .collect()
    }
}

/// Application type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationType {
    /// Built-in echo application
    Echo,
}

/// Echo application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Replies buffered per session while the socket is blocked. Older
    /// replies are kept; new ones are dropped once the buffer is full.
    ///
    /// **Default:** 256
    pub max_buffered_packets: usize,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            max_buffered_packets: 256,
        }
    }
}

impl EchoConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        if self.max_buffered_packets == 0 {
            return Err(vec!["echo.max_buffered_packets must be > 0".to_string()]);
        }
        Ok(())
    }
}
