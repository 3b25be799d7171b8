//! pgvictoria — a PostgreSQL wire-protocol supervisor/proxy.
//!
//! The crate speaks PostgreSQL v3 on both sides of a connection: toward
//! connecting clients it plays the backend role (authentication, query
//! execution), toward the supervised PostgreSQL servers it plays the
//! frontend role (startup, replication). The protocol engine — framing,
//! message constructors/parsers, the query executor, the encrypted user
//! store, and the shared configuration snapshot — is the core; process
//! supervision (CLI, PID file, accept loop) is a thin layer on top.
//!
//! # Example
//!
//! ```no_run
//! use pgvictoria::Opts;
//! use pgvictoria::state::{ConnectionStateMachine, StateMachine};
//!
//! let opts = Opts {
//!     host: "127.0.0.1".into(),
//!     user: "app".into(),
//!     database: Some("appdb".into()),
//!     password: Some("secret".into()),
//!     ..Default::default()
//! };
//! let _machine = ConnectionStateMachine::new(opts);
//! ```

pub mod auth;
pub mod buffer_pool;
pub mod buffer_set;
pub mod config;
pub mod crypto;
pub mod error;
pub mod log;
pub mod master_key;
pub mod opts;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

pub use buffer_pool::BufferPool;
pub use buffer_set::BufferSet;
pub use config::{MainConfig, Server, User};
pub use error::{Error, ErrorFields, Result, ServerError};
pub use opts::{Opts, SslMode};
pub use session::{BackendConnection, ClientSession};
pub use state::action::AsyncMessage;
