//! Global server configuration.
//!
//! Settings that apply to the whole daemon: where to bind, how to size the
//! tokio runtime, logging, socket tuning, dispatcher limits and telemetry.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Global server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Network binding configuration
    pub network: NetworkConfig,

    /// Runtime (thread pool, async executor) configuration
    pub runtime: RuntimeConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Socket configuration
    pub netio: crate::netio::NetIoConfig,

    /// Dispatcher limits and time-wait behaviour
    pub dispatcher: crate::dispatcher::DispatcherConfig,

    /// Telemetry configuration
    pub telemetry: crate::telemetry::TelemetryConfig,
}

impl GlobalConfig {
    /// Validate global configuration.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.network.validate() {
            errors.extend(e);
        }
        if let Err(e) = self.runtime.validate() {
            errors.extend(e);
        }
        if let Err(e) = self.netio.validate() {
            errors.extend(e);
        }
        if let Err(e) = self.dispatcher.validate() {
            errors.extend(e);
        }
        if let Err(e) = self.telemetry.validate() {
            errors.extend(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Network binding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host address to bind to.
    ///
    /// Examples:
    /// - `"0.0.0.0"` - Bind to all IPv4 interfaces
    /// - `"::"` - Bind to all IPv6 interfaces
    /// - `"127.0.0.1"` - Localhost only (testing)
    ///
    /// **Default:** `"0.0.0.0"`
    pub host: String,

    /// UDP port to bind to.
    ///
    /// **Default:** `443`
    pub port: u16,

    /// Enable SO_REUSEADDR socket option.
    ///
    /// **Default:** `true`
    pub reuse_addr: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 443,
            reuse_addr: true,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.host.parse::<IpAddr>().is_err() {
            errors.push(format!("Invalid host address: {}", self.host));
        }

        if self.port == 0 {
            eprintln!("Warning: port=0 will bind to a random port assigned by the OS");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// The address to bind the UDP socket to.
    pub fn bind_addr(&self) -> Result<SocketAddr, String> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| format!("Invalid host address: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Runtime configuration for the async executor that runs telemetry and
/// signal handling. The dispatcher itself runs on its own worker thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads for the Tokio runtime.
    ///
    /// **Default:** Number of CPU cores
    pub worker_threads: usize,

    /// Maximum number of blocking threads in the pool.
    ///
    /// **Default:** 512
    pub max_blocking_threads: usize,

    /// Thread name prefix for runtime threads.
    ///
    /// **Default:** `"quicd-runtime"`
    pub thread_name: String,

    /// Stack size for each thread in bytes.
    ///
    /// **Default:** 2 MB
    pub thread_stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get().max(1),
            max_blocking_threads: 512,
            thread_name: "quicd-runtime".to_string(),
            thread_stack_size: 2 * 1024 * 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.worker_threads == 0 {
            errors.push("worker_threads must be > 0".to_string());
        }

        if self.worker_threads > 1024 {
            errors.push("worker_threads is unreasonably high (> 1024)".to_string());
        }

        if self.max_blocking_threads == 0 {
            errors.push("max_blocking_threads must be > 0".to_string());
        }

        if self.thread_stack_size < 128 * 1024 {
            errors.push("thread_stack_size too small (< 128 KB)".to_string());
        }

        if self.thread_stack_size > 64 * 1024 * 1024 {
            errors.push("thread_stack_size too large (> 64 MB)".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is not set.
    ///
    /// **Default:** `Info`
    pub level: LogLevel,

    /// Enable ANSI color codes in logs.
    ///
    /// **Default:** `true`
    pub enable_colors: bool,

    /// Include source file and line number in logs.
    ///
    /// **Default:** `true`
    pub include_file_line: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            enable_colors: true,
            include_file_line: true,
        }
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}
