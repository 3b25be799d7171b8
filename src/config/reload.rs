//! Configuration reload: re-parse both files, then classify every changed
//! field as hot, log-restart, or restart-required.

use tracing::{info, warn};

use super::MainConfig;

/// Result of comparing a freshly loaded configuration against the live one.
pub struct ReloadOutcome {
    /// The configuration readers should see from now on.
    pub config: MainConfig,
    /// True if any restart-required field changed; the caller must force
    /// a process restart rather than continue running under `config`.
    pub restart_required: bool,
    /// True if any log-restart field changed; the caller should stop and
    /// restart the logger (but not the whole process) before continuing.
    pub log_restart_required: bool,
}

/// Merge `new` into `old` per the hot/log-restart/restart-required field
/// classification, logging every changed field.
///
/// Hot fields are always taken from `new` and returned live immediately.
/// Log-restart and restart-required fields are also taken from `new`
/// (the caller decides what to do about the flags), but a change to any
/// restart-required field is reported via `restart_required` so the
/// caller can refuse to adopt the new configuration and restart instead.
pub fn transfer_configuration(old: &MainConfig, new: MainConfig) -> ReloadOutcome {
    let mut restart_required = false;
    let mut log_restart_required = false;

    // Hot fields: log_level, authentication_timeout, backlog, users[].
    if old.common.log_level != new.common.log_level {
        info!(old = ?old.common.log_level, new = ?new.common.log_level, "log_level changed (hot)");
    }
    if old.authentication_timeout_secs != new.authentication_timeout_secs {
        info!(
            old = old.authentication_timeout_secs,
            new = new.authentication_timeout_secs,
            "authentication_timeout changed (hot)"
        );
    }
    if old.backlog != new.backlog {
        info!(old = old.backlog, new = new.backlog, "backlog changed (hot)");
    }
    if old.common.users != new.common.users {
        info!(
            old_count = old.common.users.len(),
            new_count = new.common.users.len(),
            "users table changed (hot)"
        );
    }
    if old.tls_cert_file != new.tls_cert_file || old.tls_key_file != new.tls_key_file {
        info!("TLS certificate/key path changed (hot, takes effect on the next accepted connection)");
    }

    // Log-restart fields.
    macro_rules! check_log_restart {
        ($field:ident, $label:literal) => {
            if old.common.$field != new.common.$field {
                info!(field = $label, new = ?new.common.$field, "log-restart field changed");
                log_restart_required = true;
            }
        };
    }
    check_log_restart!(log_path, "log_path");
    check_log_restart!(log_rotation_size, "log_rotation_size");
    check_log_restart!(log_rotation_age_secs, "log_rotation_age");
    check_log_restart!(log_mode, "log_mode");
    check_log_restart!(log_line_prefix, "log_line_prefix");

    // Process-restart-required fields.
    macro_rules! check_restart_required {
        ($old_expr:expr, $new_expr:expr, $label:literal) => {
            if $old_expr != $new_expr {
                warn!(field = $label, old = ?$old_expr, new = ?$new_expr, "restart-required field changed");
                restart_required = true;
            }
        };
    }
    check_restart_required!(old.host, new.host, "host");
    check_restart_required!(old.port, new.port, "port");
    check_restart_required!(old.common.log_type, new.common.log_type, "log_type");
    if !new.pidfile.as_ref().map(|p| p.as_os_str().is_empty()).unwrap_or(true)
        && old.pidfile != new.pidfile
    {
        warn!(field = "pidfile", old = ?old.pidfile, new = ?new.pidfile, "restart-required field changed");
        restart_required = true;
    }
    check_restart_required!(old.libev, new.libev, "libev");
    check_restart_required!(old.hugepage, new.hugepage, "hugepage");
    check_restart_required!(old.update_process_title, new.update_process_title, "update_process_title");
    check_restart_required!(old.unix_socket_dir, new.unix_socket_dir, "unix_socket_dir");
    check_restart_required!(old.common.servers, new.common.servers, "servers[]");
    check_restart_required!(old.auth_method, new.auth_method, "auth_method");

    ReloadOutcome {
        config: new,
        restart_required,
        log_restart_required,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::server::Server;
    use crate::config::{CommonConfig, LogLevel};
    use std::path::PathBuf;

    fn base_config() -> MainConfig {
        MainConfig {
            common: CommonConfig {
                home_directory: PathBuf::new(),
                log_type: Default::default(),
                log_level: LogLevel::Info,
                log_mode: Default::default(),
                log_path: None,
                log_line_prefix: None,
                log_rotation_size: None,
                log_rotation_age_secs: None,
                servers: vec![Server {
                    name: "primary".into(),
                    host: "127.0.0.1".into(),
                    port: 5432,
                    primary: true,
                    username: "app".into(),
                    server_version_major: 0,
                    server_version_minor: 0,
                }],
                users: vec![],
                config_path: PathBuf::new(),
                users_path: PathBuf::new(),
            },
            running: true,
            host: "*".into(),
            port: 6432,
            authentication_timeout_secs: 60,
            pidfile: None,
            update_process_title: Default::default(),
            libev: None,
            backlog: 16,
            hugepage: Default::default(),
            unix_socket_dir: None,
            auth_method: Default::default(),
            tls_cert_file: None,
            tls_key_file: None,
        }
    }

    #[test]
    fn hot_field_change_does_not_require_restart() {
        let old = base_config();
        let mut new = old.clone();
        new.common.log_level = LogLevel::Debug1;

        let outcome = transfer_configuration(&old, new);
        assert!(!outcome.restart_required);
        assert!(!outcome.log_restart_required);
    }

    #[test]
    fn restart_required_field_change_is_flagged() {
        let old = base_config();
        let mut new = old.clone();
        new.host = "10.0.0.5".into();

        let outcome = transfer_configuration(&old, new);
        assert!(outcome.restart_required);
    }

    #[test]
    fn log_restart_field_change_is_flagged_without_process_restart() {
        let old = base_config();
        let mut new = old.clone();
        new.common.log_mode = crate::config::LogMode::Create;

        let outcome = transfer_configuration(&old, new);
        assert!(outcome.log_restart_required);
        assert!(!outcome.restart_required);
    }
}
