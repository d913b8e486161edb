//! CLI and file configuration (C8).
//!
//! Flags are parsed with `clap`; the file layer (`--config <path>`) is TOML
//! via `serde`. A flag always overrides the same field in the file. Every
//! field spec.md §6 names is required one way or another — a config missing
//! either source for a field is a startup failure (`main.rs` turns that into
//! `exit(1)`, see spec.md §7's "exit code 0/1" contract).

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

/// Command-line surface. See spec.md §6's CLI table.
#[derive(Parser, Debug)]
#[command(
    name = "routing-registry-server",
    version,
    about = "Routing registry control-plane service"
)]
pub struct Cli {
    /// Path to a TOML config file providing defaults for any flag below.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub bind_port: Option<u16>,

    #[arg(long, value_delimiter = ',')]
    pub kv_endpoints: Option<Vec<String>>,

    #[arg(long)]
    pub advertised_ip: Option<IpAddr>,

    #[arg(long)]
    pub system_domain: Option<String>,

    #[arg(long)]
    pub max_ttl: Option<i64>,

    /// Disables bearer-token auth, installing `auth::AllowAllValidator`.
    #[arg(long)]
    pub dev_mode: bool,

    /// Path to a file holding the shared secret `auth::SharedSecretValidator`
    /// compares bearer tokens against. Required unless `--dev-mode` is set.
    #[arg(long)]
    pub auth_secret_path: Option<PathBuf>,

    /// A `tracing_subscriber::EnvFilter` directive, e.g. `info` or `routing_registry=debug`.
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bind_port: Option<u16>,
    kv_endpoints: Option<Vec<String>>,
    advertised_ip: Option<String>,
    system_domain: Option<String>,
    max_ttl: Option<i64>,
    #[serde(default)]
    dev_mode: Option<bool>,
    auth_secret_path: Option<PathBuf>,
    log_level: Option<String>,
}

/// Fully resolved, validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_port: u16,
    pub kv_endpoints: Vec<String>,
    pub advertised_ip: IpAddr,
    pub system_domain: String,
    pub max_ttl: i64,
    pub dev_mode: bool,
    /// The shared secret `auth::SharedSecretValidator` checks bearer tokens
    /// against. `None` only when `dev_mode` is set.
    pub auth_secret: Option<String>,
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing required field `{0}` (set it via --{0} or the config file)")]
    MissingField(&'static str),
    #[error("invalid value for `{field}`: {message}")]
    InvalidField { field: &'static str, message: String },
}

impl Config {
    /// Merges `cli` over an optional TOML file, then validates the result.
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => {
                let text =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
                        path: path.clone(),
                        source,
                    })?;
                toml::from_str::<FileConfig>(&text).map_err(|source| ConfigError::ParseFile {
                    path: path.clone(),
                    source,
                })?
            }
            None => FileConfig::default(),
        };

        let bind_port = cli
            .bind_port
            .or(file.bind_port)
            .ok_or(ConfigError::MissingField("bind_port"))?;

        let kv_endpoints = cli
            .kv_endpoints
            .or(file.kv_endpoints)
            .ok_or(ConfigError::MissingField("kv_endpoints"))?;

        let advertised_ip = match cli.advertised_ip {
            Some(ip) => ip,
            None => {
                let raw = file
                    .advertised_ip
                    .ok_or(ConfigError::MissingField("advertised_ip"))?;
                raw.parse().map_err(|err| ConfigError::InvalidField {
                    field: "advertised_ip",
                    message: format!("{err}"),
                })?
            }
        };

        let system_domain = cli
            .system_domain
            .or(file.system_domain)
            .ok_or(ConfigError::MissingField("system_domain"))?;

        let max_ttl = cli
            .max_ttl
            .or(file.max_ttl)
            .ok_or(ConfigError::MissingField("max_ttl"))?;

        let dev_mode = cli.dev_mode || file.dev_mode.unwrap_or(false);

        let log_level = cli
            .log_level
            .or(file.log_level)
            .unwrap_or_else(|| "info".to_string());

        if max_ttl <= 0 {
            return Err(ConfigError::InvalidField {
                field: "max_ttl",
                message: "must be a positive number of seconds".to_string(),
            });
        }
        if kv_endpoints.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "kv_endpoints",
                message: "must name at least one endpoint".to_string(),
            });
        }

        let auth_secret = if dev_mode {
            None
        } else {
            let path = cli
                .auth_secret_path
                .or(file.auth_secret_path)
                .ok_or(ConfigError::MissingField("auth_secret_path"))?;
            let secret = std::fs::read_to_string(&path)
                .map_err(|source| ConfigError::ReadFile { path, source })?;
            Some(secret.trim().to_string())
        };

        Ok(Config {
            bind_port,
            kv_endpoints,
            advertised_ip,
            system_domain,
            max_ttl,
            dev_mode,
            auth_secret,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_cli() -> Cli {
        Cli {
            config: None,
            bind_port: None,
            kv_endpoints: None,
            advertised_ip: None,
            system_domain: None,
            max_ttl: None,
            dev_mode: false,
            auth_secret_path: None,
            log_level: None,
        }
    }

    #[test]
    fn non_dev_mode_without_auth_secret_path_fails() {
        let cli = Cli {
            bind_port: Some(8080),
            kv_endpoints: Some(vec!["http://127.0.0.1:4001".to_string()]),
            advertised_ip: Some("10.0.0.5".parse().unwrap()),
            system_domain: Some("example.internal".to_string()),
            max_ttl: Some(120),
            ..bare_cli()
        };
        let err = Config::load(cli).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("auth_secret_path")));
    }

    #[test]
    fn non_dev_mode_loads_auth_secret_from_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("routing-registry-secret-{}.txt", std::process::id()));
        std::fs::write(&path, "topsecret\n").unwrap();

        let cli = Cli {
            bind_port: Some(8080),
            kv_endpoints: Some(vec!["http://127.0.0.1:4001".to_string()]),
            advertised_ip: Some("10.0.0.5".parse().unwrap()),
            system_domain: Some("example.internal".to_string()),
            max_ttl: Some(120),
            auth_secret_path: Some(path.clone()),
            ..bare_cli()
        };
        let config = Config::load(cli).unwrap();
        assert_eq!(config.auth_secret.as_deref(), Some("topsecret"));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_required_field_without_file_fails() {
        let err = Config::load(bare_cli()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("bind_port")));
    }

    #[test]
    fn flags_fully_specify_a_valid_config() {
        let cli = Cli {
            bind_port: Some(8080),
            kv_endpoints: Some(vec!["http://127.0.0.1:4001".to_string()]),
            advertised_ip: Some("10.0.0.5".parse().unwrap()),
            system_domain: Some("example.internal".to_string()),
            max_ttl: Some(120),
            dev_mode: true,
            log_level: Some("debug".to_string()),
            ..bare_cli()
        };
        let config = Config::load(cli).unwrap();
        assert_eq!(config.bind_port, 8080);
        assert!(config.dev_mode);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn non_positive_max_ttl_is_rejected() {
        let cli = Cli {
            bind_port: Some(8080),
            kv_endpoints: Some(vec!["http://127.0.0.1:4001".to_string()]),
            advertised_ip: Some("10.0.0.5".parse().unwrap()),
            system_domain: Some("example.internal".to_string()),
            max_ttl: Some(0),
            ..bare_cli()
        };
        let err = Config::load(cli).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidField { field: "max_ttl", .. }
        ));
    }

    #[test]
    fn file_config_is_overridden_by_flags() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("routing-registry-test-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
            bind_port = 9000
            kv_endpoints = ["http://127.0.0.1:4001"]
            advertised_ip = "10.0.0.1"
            system_domain = "file.internal"
            max_ttl = 60
            "#,
        )
        .unwrap();

        let cli = Cli {
            config: Some(path.clone()),
            bind_port: Some(9999),
            ..bare_cli()
        };
        let config = Config::load(cli).unwrap();
        assert_eq!(config.bind_port, 9999);
        assert_eq!(config.system_domain, "file.internal");

        std::fs::remove_file(&path).ok();
    }
}
