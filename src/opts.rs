//! Outbound connection options, used by the executor when it connects to a
//! backend PostgreSQL server on behalf of a proxied client.

/// SSL connection mode toward the backend server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Don't use SSL
    Disable,
    /// Try SSL, fall back to unencrypted if not supported
    #[default]
    Prefer,
    /// Require SSL connection
    Require,
}

/// Connection options for a single backend PostgreSQL server.
///
/// Populated from the matching [`crate::config::Server`] entry rather than a
/// `postgres://` URL - pgvictoria's clients never specify backend connection
/// details directly.
#[derive(Debug, Clone)]
pub struct Opts {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: Option<String>,
    pub password: Option<String>,
    pub application_name: Option<String>,
    pub ssl_mode: SslMode,
    pub params: Vec<(String, String)>,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            user: String::new(),
            database: None,
            password: None,
            application_name: None,
            ssl_mode: SslMode::Prefer,
            params: Vec::new(),
        }
    }
}
