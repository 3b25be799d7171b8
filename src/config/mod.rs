//! Shared configuration store: INI-backed main configuration plus the
//! server and user tables it feeds into the protocol engine.

pub mod ini;
pub mod reload;
pub mod server;
pub mod user;
pub mod users_file;

pub use reload::transfer_configuration;
pub use server::Server;
pub use user::User;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::{ConfigErrorKind, Error, Result};
use ini::IniDocument;

/// Listen backlog floor (§4.7: "clamped to ≥ 16").
const MIN_BACKLOG: i32 = 16;

/// Default client listen port, following the pgbouncer/pgcat/pg_doorman
/// convention of a dedicated port distinct from PostgreSQL's own 5432.
const DEFAULT_LISTEN_PORT: u16 = 6432;

/// Log sink selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogType {
    #[default]
    Console,
    File,
    Syslog,
}

impl LogType {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "console" => Ok(Self::Console),
            "file" => Ok(Self::File),
            "syslog" => Ok(Self::Syslog),
            other => Err(Error::config(
                ConfigErrorKind::NotFoundOrParse,
                format!("invalid log_type {other:?}"),
            )),
        }
    }
}

/// Log verbosity, including PostgreSQL-style `debug1..debug5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug1,
    Debug2,
    Debug3,
    Debug4,
    Debug5,
}

impl LogLevel {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "error" | "fatal" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" | "debug1" => Ok(Self::Debug1),
            "debug2" => Ok(Self::Debug2),
            "debug3" => Ok(Self::Debug3),
            "debug4" => Ok(Self::Debug4),
            "debug5" => Ok(Self::Debug5),
            other => Err(Error::config(
                ConfigErrorKind::NotFoundOrParse,
                format!("invalid log_level {other:?}"),
            )),
        }
    }

    /// The `tracing` level this maps to.
    pub fn tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug1 | LogLevel::Debug2 => tracing::Level::DEBUG,
            LogLevel::Debug3 | LogLevel::Debug4 | LogLevel::Debug5 => tracing::Level::TRACE,
        }
    }
}

/// Log file open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    #[default]
    Append,
    Create,
}

impl LogMode {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "append" => Ok(Self::Append),
            "create" => Ok(Self::Create),
            other => Err(Error::config(
                ConfigErrorKind::NotFoundOrParse,
                format!("invalid log_mode {other:?}"),
            )),
        }
    }
}

/// Huge-page allocation policy for the shared configuration blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HugepagePolicy {
    Off,
    #[default]
    Try,
    On,
}

impl HugepagePolicy {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "off" => Ok(Self::Off),
            "try" => Ok(Self::Try),
            "on" => Ok(Self::On),
            other => Err(Error::config(
                ConfigErrorKind::NotFoundOrParse,
                format!("invalid hugepage policy {other:?}"),
            )),
        }
    }
}

/// Authentication method pgvictoria offers connecting clients.
///
/// Spec.md §4.9 (server session): SCRAM-SHA-256 is the default for new
/// deployments; MD5 and cleartext remain available for interoperability
/// with older stored-hash conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMethod {
    #[default]
    Scram,
    Md5,
    Cleartext,
}

impl AuthMethod {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "scram" | "scram-sha-256" => Ok(Self::Scram),
            "md5" => Ok(Self::Md5),
            "cleartext" | "password" => Ok(Self::Cleartext),
            other => Err(Error::config(
                ConfigErrorKind::NotFoundOrParse,
                format!("invalid auth_method {other:?}"),
            )),
        }
    }
}

/// `update_process_title` verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessTitlePolicy {
    Never,
    #[default]
    Off,
    Strict,
    Minimal,
    Verbose,
    Full,
}

impl ProcessTitlePolicy {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "never" => Ok(Self::Never),
            "off" => Ok(Self::Off),
            "strict" => Ok(Self::Strict),
            "minimal" => Ok(Self::Minimal),
            "verbose" => Ok(Self::Verbose),
            "full" => Ok(Self::Full),
            other => Err(Error::config(
                ConfigErrorKind::NotFoundOrParse,
                format!("invalid update_process_title {other:?}"),
            )),
        }
    }
}

/// Fields common to both the "common" shared blob and the main
/// configuration, per spec.md §3.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonConfig {
    pub home_directory: PathBuf,
    pub log_type: LogType,
    pub log_level: LogLevel,
    pub log_mode: LogMode,
    pub log_path: Option<PathBuf>,
    pub log_line_prefix: Option<String>,
    pub log_rotation_size: Option<u64>,
    pub log_rotation_age_secs: Option<u64>,
    pub servers: Vec<Server>,
    pub users: Vec<User>,
    pub config_path: PathBuf,
    pub users_path: PathBuf,
}

/// Full main configuration, loaded from `[pgvictoria]` plus one section
/// per server.
#[derive(Debug, Clone, PartialEq)]
pub struct MainConfig {
    pub common: CommonConfig,
    pub running: bool,
    pub host: String,
    pub port: u16,
    pub authentication_timeout_secs: u32,
    pub pidfile: Option<PathBuf>,
    pub update_process_title: ProcessTitlePolicy,
    pub libev: Option<String>,
    pub backlog: i32,
    pub hugepage: HugepagePolicy,
    pub unix_socket_dir: Option<PathBuf>,
    pub auth_method: AuthMethod,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
}

/// Thread-safe, lock-free-read configuration handle: readers clone a cheap
/// `Arc` and see either a complete old snapshot or a complete new one,
/// never a torn write.
pub type ConfigHandle = Arc<ArcSwap<MainConfig>>;

impl MainConfig {
    /// Load and validate the main configuration and users file, given
    /// explicit paths (already resolved from CLI/env by the caller).
    pub fn load(config_path: &Path, users_path: &Path, master_key: &[u8]) -> Result<Self> {
        let text = std::fs::read_to_string(config_path).map_err(|e| {
            Error::config(
                ConfigErrorKind::NotFoundOrParse,
                format!("reading {}: {e}", config_path.display()),
            )
        })?;
        let doc = IniDocument::parse(&text)?;

        let main = doc.main_section().ok_or_else(|| {
            Error::config(
                ConfigErrorKind::NotFoundOrParse,
                "missing [pgvictoria] section".to_string(),
            )
        })?;

        let host = main.get("host").cloned().unwrap_or_else(|| "*".to_string());

        let port = main
            .get("port")
            .map(|v| v.parse::<u16>())
            .transpose()
            .map_err(|_| Error::config(ConfigErrorKind::NotFoundOrParse, "invalid port".to_string()))?
            .unwrap_or(DEFAULT_LISTEN_PORT);

        let unix_socket_dir = main
            .get("unix_socket_dir")
            .map(|v| PathBuf::from(ini::expand_home(v)));

        let pidfile = main.get("pidfile").map(|v| PathBuf::from(ini::expand_home(v)));

        let libev = main.get("libev").cloned();

        let backlog = main
            .get("backlog")
            .map(|v| v.parse::<i32>())
            .transpose()
            .map_err(|_| Error::config(ConfigErrorKind::NotFoundOrParse, "invalid backlog".to_string()))?
            .unwrap_or(MIN_BACKLOG)
            .max(MIN_BACKLOG);

        let hugepage = main
            .get("hugepage")
            .map(|v| HugepagePolicy::parse(v))
            .transpose()?
            .unwrap_or_default();

        let update_process_title = main
            .get("update_process_title")
            .map(|v| ProcessTitlePolicy::parse(v))
            .transpose()?
            .unwrap_or_default();

        let auth_method = main
            .get("auth_method")
            .map(|v| AuthMethod::parse(v))
            .transpose()?
            .unwrap_or_default();

        // PostgreSQL's own `ssl_cert_file`/`ssl_key_file` naming; TLS toward
        // connecting clients is offered only when both are present.
        let tls_cert_file = main.get("ssl_cert_file").map(|v| PathBuf::from(ini::expand_home(v)));
        let tls_key_file = main.get("ssl_key_file").map(|v| PathBuf::from(ini::expand_home(v)));

        let log_type = main
            .get("log_type")
            .map(|v| LogType::parse(v))
            .transpose()?
            .unwrap_or_default();

        let log_level = main
            .get("log_level")
            .map(|v| LogLevel::parse(v))
            .transpose()?
            .unwrap_or_default();

        let log_mode = main
            .get("log_mode")
            .map(|v| LogMode::parse(v))
            .transpose()?
            .unwrap_or_default();

        let log_path = main.get("log_path").map(|v| PathBuf::from(ini::expand_home(v)));
        let log_line_prefix = main.get("log_line_prefix").cloned();
        let log_rotation_size = main
            .get("log_rotation_size")
            .map(|v| parse_byte_size(v))
            .transpose()?;
        let log_rotation_age_secs = main
            .get("log_rotation_age")
            .map(|v| parse_duration_secs(v))
            .transpose()?;

        let authentication_timeout_secs = main
            .get("authentication_timeout")
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|_| {
                Error::config(
                    ConfigErrorKind::NotFoundOrParse,
                    "invalid authentication_timeout".to_string(),
                )
            })?
            .unwrap_or(60);

        let mut servers = Vec::new();
        for (name, fields) in doc.server_sections() {
            servers.push(Server::from_section(name, fields)?);
        }
        if servers.len() > server::NUMBER_OF_SERVERS {
            return Err(Error::config(
                ConfigErrorKind::ValidationFailed,
                format!(
                    "{} servers configured, exceeds NUMBER_OF_SERVERS ({})",
                    servers.len(),
                    server::NUMBER_OF_SERVERS
                ),
            ));
        }
        if let Some(first) = servers.first_mut() {
            first.primary = true;
        }

        let users = users_file::load_users_file(users_path, master_key)?;

        let common = CommonConfig {
            home_directory: std::env::var("HOME").map(PathBuf::from).unwrap_or_default(),
            log_type,
            log_level,
            log_mode,
            log_path,
            log_line_prefix,
            log_rotation_size,
            log_rotation_age_secs,
            servers,
            users,
            config_path: config_path.to_path_buf(),
            users_path: users_path.to_path_buf(),
        };

        let config = Self {
            common,
            running: true,
            host,
            port,
            authentication_timeout_secs,
            pidfile,
            update_process_title,
            libev,
            backlog,
            hugepage,
            unix_socket_dir,
            auth_method,
            tls_cert_file,
            tls_key_file,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants not already enforced while parsing.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::config(
                ConfigErrorKind::ValidationFailed,
                "host must not be empty".to_string(),
            ));
        }

        if let Some(dir) = &self.unix_socket_dir {
            if !dir.is_dir() {
                return Err(Error::config(
                    ConfigErrorKind::ValidationFailed,
                    format!("unix_socket_dir {} does not exist or is not a directory", dir.display()),
                ));
            }
        }

        if self.common.servers.is_empty() {
            return Err(Error::config(
                ConfigErrorKind::ValidationFailed,
                "at least one server must be configured".to_string(),
            ));
        }

        let known_users: std::collections::HashSet<&str> =
            self.common.users.iter().map(|u| u.username.as_str()).collect();

        for server in &self.common.servers {
            server.validate()?;
            if !known_users.contains(server.username.as_str()) {
                return Err(Error::config(
                    ConfigErrorKind::ValidationFailed,
                    format!(
                        "server {:?} references unknown user {:?}",
                        server.name, server.username
                    ),
                ));
            }
        }

        Ok(())
    }

    /// The server marked `primary`, if any.
    pub fn primary_server(&self) -> Option<&Server> {
        self.common.servers.iter().find(|s| s.primary)
    }

    /// Look up a user by name.
    pub fn find_user(&self, username: &str) -> Option<&User> {
        self.common.users.iter().find(|u| u.username == username)
    }
}

fn parse_byte_size(value: &str) -> Result<u64> {
    parse_suffixed(value, &[("gb", 1 << 30), ("mb", 1 << 20), ("kb", 1 << 10), ("g", 1 << 30), ("m", 1 << 20), ("k", 1 << 10), ("b", 1)])
}

fn parse_duration_secs(value: &str) -> Result<u64> {
    parse_suffixed(value, &[("w", 604_800), ("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)])
}

fn parse_suffixed(value: &str, suffixes: &[(&str, u64)]) -> Result<u64> {
    let lower = value.to_ascii_lowercase();
    for (suffix, multiplier) in suffixes {
        if let Some(digits) = lower.strip_suffix(suffix) {
            let digits = digits.trim();
            if digits.is_empty() {
                continue;
            }
            return digits
                .parse::<u64>()
                .map(|n| n * multiplier)
                .map_err(|_| Error::config(ConfigErrorKind::NotFoundOrParse, format!("invalid size/duration {value:?}")));
        }
    }
    lower
        .parse::<u64>()
        .map_err(|_| Error::config(ConfigErrorKind::NotFoundOrParse, format!("invalid size/duration {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, users_line: &str) -> (PathBuf, PathBuf) {
        let config_path = dir.join("pgvictoria.conf");
        let users_path = dir.join("pgvictoria_users.conf");

        std::fs::write(
            &config_path,
            "[pgvictoria]\nhost = *\nbacklog = 1\n\n[primary]\nhost = 127.0.0.1\nport = 5432\nuser = app\n",
        )
        .expect("write config");
        std::fs::write(&users_path, format!("{users_line}\n")).expect("write users");

        (config_path, users_path)
    }

    #[test]
    fn loads_and_validates_a_minimal_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let master_key = b"topsecret";
        let line = users_file::encode_user_line("app", "secret", master_key).expect("encode");
        let (config_path, users_path) = write_config(dir.path(), &line);

        let config = MainConfig::load(&config_path, &users_path, master_key).expect("load");
        assert_eq!(config.backlog, MIN_BACKLOG);
        assert_eq!(config.common.servers.len(), 1);
        assert!(config.common.servers[0].primary);
        assert_eq!(config.find_user("app").unwrap().password, "secret");
    }

    #[test]
    fn rejects_server_referencing_unknown_user() {
        let dir = tempfile::tempdir().expect("tempdir");
        let master_key = b"topsecret";
        let line = users_file::encode_user_line("someone_else", "secret", master_key).expect("encode");
        let (config_path, users_path) = write_config(dir.path(), &line);

        let err = MainConfig::load(&config_path, &users_path, master_key).unwrap_err();
        assert!(matches!(
            err,
            Error::Config {
                kind: ConfigErrorKind::ValidationFailed,
                ..
            }
        ));
    }

    #[test]
    fn parses_byte_and_duration_suffixes() {
        assert_eq!(parse_byte_size("10M").unwrap(), 10 * (1 << 20));
        assert_eq!(parse_byte_size("1GB").unwrap(), 1 << 30);
        assert_eq!(parse_duration_secs("2d").unwrap(), 2 * 86_400);
    }
}
