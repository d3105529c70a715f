//! Tests for the configuration module.
//!
//! Tests cover:
//! - Default values and their validity
//! - Per-section validation
//! - Version routing between applications and the dispatcher
//! - Loading TOML files from disk

mod global_config_tests {
    use crate::config::global::{GlobalConfig, LogLevel, NetworkConfig, RuntimeConfig};

    #[test]
    fn test_network_config_default() {
        let config = NetworkConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 443);
        assert!(config.reuse_addr);
    }

    #[test]
    fn test_network_config_valid_ipv6() {
        let config = NetworkConfig {
            host: "::".to_string(),
            port: 443,
            reuse_addr: true,
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr().unwrap(), "[::]:443".parse().unwrap());
    }

    #[test]
    fn test_network_config_invalid_host() {
        let config = NetworkConfig {
            host: "not-an-ip-address".to_string(),
            ..NetworkConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("Invalid host address")));
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_runtime_config_zero_workers() {
        let config = RuntimeConfig {
            worker_threads: 0,
            ..RuntimeConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("worker_threads must be > 0")));
    }

    #[test]
    fn test_runtime_config_stack_bounds() {
        let config = RuntimeConfig {
            thread_stack_size: 1024,
            ..RuntimeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_global_config_collects_section_errors() {
        let mut config = GlobalConfig::default();
        config.network.host = "bogus".to_string();
        config.dispatcher.max_sessions = 0;
        config.telemetry.otlp_endpoint = "localhost:4317".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::Trace.to_string(), "trace");
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}

mod server_config_tests {
    use crate::config::{ApplicationConfig, ServerConfig};
    use quicd_wire::Version;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        let (name, _) = config.find_app_by_version(Version::Q013).unwrap();
        assert_eq!(name, "echo");
    }

    #[test]
    fn test_duplicate_version_detection() {
        let mut config = ServerConfig::default();
        config
            .applications
            .insert("echo2".to_string(), ApplicationConfig::echo(&[Version::Q013]));

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("Duplicate version 'Q013'")));
    }

    #[test]
    fn test_disabled_applications_do_not_conflict() {
        let mut config = ServerConfig::default();
        let mut other = ApplicationConfig::echo(&[Version::Q013]);
        other.enabled = false;
        config.applications.insert("echo2".to_string(), other);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_application_version_must_be_supported() {
        let mut config = ServerConfig::default();
        config.global.dispatcher.supported_versions = vec!["Q013".to_string()];

        let errors = config.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.contains("'Q012' which is not in dispatcher.supported_versions")));
    }

    #[test]
    fn test_no_enabled_applications() {
        let mut config = ServerConfig::default();
        config.applications.clear();

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("No enabled applications")));
    }

    #[test]
    fn test_invalid_application_fields() {
        let mut config = ServerConfig::default();
        let app = config.applications.get_mut("echo").unwrap();
        app.versions.push("bad".to_string());
        app.echo.max_buffered_packets = 0;

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.starts_with("Application 'echo': Invalid version tag")));
        assert!(errors.iter().any(|e| e.contains("max_buffered_packets")));
    }
}

mod loader_tests {
    use crate::config::loader::{load_config_file, resolve_config};
    use crate::config::CliArgs;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = load_config_file("/nonexistent/quicd.toml").unwrap();
        assert_eq!(config.global.network.port, 443);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config(
            r#"
            [global.network]
            port = 8443

            [global.dispatcher]
            time_wait_period_ms = 250
            "#,
        );
        let config = load_config_file(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.global.network.port, 8443);
        assert_eq!(config.global.network.host, "0.0.0.0");
        assert_eq!(config.global.dispatcher.time_wait_period_ms, 250);
        assert_eq!(config.global.dispatcher.max_sessions, 100_000);
    }

    #[test]
    fn test_applications_table() {
        let file = write_config(
            r#"
            [global.dispatcher]
            supported_versions = ["Q013"]

            [applications.echo]
            type = "echo"
            versions = ["Q013"]

            [applications.echo.echo]
            max_buffered_packets = 8
            "#,
        );
        let cli = CliArgs {
            config: file.path().to_str().unwrap().to_string(),
            port: Some(9000),
            ..Default::default()
        };
        let config = resolve_config(&cli).unwrap();

        let app = &config.applications["echo"];
        assert!(app.enabled);
        assert_eq!(app.echo.max_buffered_packets, 8);
        assert_eq!(config.global.network.port, 9000);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let file = write_config("[global.network\nport = ");
        assert!(load_config_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_resolve_rejects_invalid_config() {
        let file = write_config(
            r#"
            [global.dispatcher]
            max_sessions = 0
            "#,
        );
        let cli = CliArgs {
            config: file.path().to_str().unwrap().to_string(),
            ..Default::default()
        };
        let err = resolve_config(&cli).unwrap_err();
        assert!(err.to_string().contains("max_sessions"));
    }
}
