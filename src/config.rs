//! Connection descriptors and run configuration.
//!
//! Parsing these out of `my.cfg` / the CLI happens in `src/main.rs`; this
//! module only defines the shapes the core consumes.

use std::fmt;

/// A key/value connection descriptor. Carries host, port, database, user,
/// credential, and an application-name tag.
#[derive(Clone, Debug, Default)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
}

impl ConnectionDescriptor {
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>, user: impl Into<String>) -> Self {
        ConnectionDescriptor {
            host: host.into(),
            port,
            database: database.into(),
            user: user.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// libpq-style key=value connection string, with `application_name`
    /// composed from the extension label plus a purpose suffix.
    pub fn to_conninfo(&self, app_name_suffix: &str) -> String {
        let mut parts = vec![
            format!("host={}", escape_kv(&self.host)),
            format!("port={}", self.port),
            format!("dbname={}", escape_kv(&self.database)),
            format!("user={}", escape_kv(&self.user)),
            format!("application_name={}", escape_kv(&format!("{EXTENSION_NAME}{app_name_suffix}"))),
        ];
        if let Some(password) = &self.password {
            parts.push(format!("password={}", escape_kv(password)));
        }
        parts.join(" ")
    }
}

fn escape_kv(value: &str) -> String {
    if value.is_empty() || value.contains(' ') || value.contains('\'') {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
    } else {
        value.to_string()
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

pub const EXTENSION_NAME: &str = "rds_logical_sync";
pub const REPLICATION_SLOT_NAME: &str = "rds_logical_sync_slot";
pub const DECODING_PLUGIN_NAME: &str = "ali_decoding";
pub const JOURNAL_TABLE: &str = "sync_sqls";
pub const DEFAULT_WORKER_COUNT: usize = 5;
pub const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 10;

/// Which wire protocol the source speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Postgres,
    MySql,
}

/// Everything the core needs to run one migration: connection descriptors,
/// worker count, and an optional single-table filter.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub source_kind: SourceKind,
    pub source: ConnectionDescriptor,
    pub destination: ConnectionDescriptor,
    pub local: ConnectionDescriptor,
    pub worker_count: usize,
    pub table_filter: Option<String>,
    pub verbose: bool,
}

impl RunConfig {
    /// A positional table-name argument forces worker_count to 1 and
    /// restricts the run to that table.
    pub fn with_table_filter(mut self, table: Option<String>) -> Self {
        if let Some(table) = table {
            self.worker_count = 1;
            self.table_filter = Some(table);
        }
        self
    }
}
