//! Backend server identity, as loaded from a `[<server-name>]` INI section.

use std::collections::HashMap;

use crate::error::{ConfigErrorKind, Error, Result};

/// Maximum number of configured backend servers.
pub const NUMBER_OF_SERVERS: usize = 64;

const RESERVED_NAMES: [&str; 2] = ["pgvictoria", "all"];

/// A single backend PostgreSQL server entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub primary: bool,
    pub username: String,
    pub server_version_major: u32,
    pub server_version_minor: u32,
}

impl Server {
    /// Parse one `[<name>]` section into a `Server`. `primary` defaults to
    /// `true` for the first server encountered by the caller — this
    /// function only parses the fields present in the section itself.
    pub fn from_section(name: &str, fields: &HashMap<String, String>) -> Result<Self> {
        if RESERVED_NAMES.contains(&name) {
            return Err(Error::config(
                ConfigErrorKind::ValidationFailed,
                format!("server name {name:?} is reserved"),
            ));
        }

        let host = fields
            .get("host")
            .cloned()
            .ok_or_else(|| missing(name, "host"))?;

        let port: u16 = fields
            .get("port")
            .ok_or_else(|| missing(name, "port"))?
            .parse()
            .map_err(|_| {
                Error::config(
                    ConfigErrorKind::NotFoundOrParse,
                    format!("server {name:?}: invalid port"),
                )
            })?;

        let username = fields
            .get("user")
            .cloned()
            .ok_or_else(|| missing(name, "user"))?;

        Ok(Self {
            name: name.to_string(),
            host,
            port,
            primary: false,
            username,
            server_version_major: 0,
            server_version_minor: 0,
        })
    }

    /// Validate non-structural invariants beyond what `from_section`
    /// already enforces: non-empty host, non-zero port, non-empty
    /// username.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(missing(&self.name, "host"));
        }
        if self.port == 0 {
            return Err(Error::config(
                ConfigErrorKind::ValidationFailed,
                format!("server {:?}: port must be non-zero", self.name),
            ));
        }
        if self.username.is_empty() {
            return Err(missing(&self.name, "user"));
        }
        Ok(())
    }
}

fn missing(server: &str, field: &str) -> Error {
    Error::config(
        ConfigErrorKind::ValidationFailed,
        format!("server {server:?}: missing required field {field:?}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn rejects_reserved_names() {
        let err = Server::from_section("all", &fields(&[])).unwrap_err();
        assert!(matches!(
            err,
            Error::Config {
                kind: ConfigErrorKind::ValidationFailed,
                ..
            }
        ));
    }

    #[test]
    fn parses_valid_section() {
        let server = Server::from_section(
            "primary",
            &fields(&[("host", "10.0.0.1"), ("port", "5432"), ("user", "app")]),
        )
        .expect("parse");
        assert_eq!(server.host, "10.0.0.1");
        assert_eq!(server.port, 5432);
        assert!(server.validate().is_ok());
    }
}
