//! Thin CLI binary. Wires `my.cfg` and the optional positional table
//! argument into a `RunConfig` and hands off to `pgxfer::run`.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use ini::Ini;

use pgxfer::{ConnectionDescriptor, Result, RunConfig, SourceKind, SyncError, TracingSink};

/// Parallel, snapshot-consistent bulk data migration with logical
/// replication tailing.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Restrict the run to a single table; forces worker count to 1.
    table: Option<String>,

    /// Path to the INI configuration file.
    #[arg(short, long, default_value = "my.cfg")]
    config: String,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    pgxfer::logging::init(cli.verbose);

    match try_main(cli) {
        Ok(report) => {
            if report.had_errors {
                tracing::warn!("{} -- with errors", report.summary_line());
            } else {
                tracing::info!("{}", report.summary_line());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "startup/validation error");
            ExitCode::FAILURE
        }
    }
}

fn try_main(cli: Cli) -> Result<pgxfer::Report> {
    let config = load_config(&cli)?;
    let sink = Arc::new(TracingSink);
    pgxfer::run(config, sink)
}

fn load_config(cli: &Cli) -> Result<RunConfig> {
    let ini = Ini::load_from_file(&cli.config).map_err(|e| {
        SyncError::Configuration(format!(
            "read config file error, insufficient permissions or {} does not exist: {e}",
            cli.config
        ))
    })?;

    let (source_kind, source) = if ini.section(Some("src.pgsql")).is_some() {
        (SourceKind::Postgres, descriptor_from_discrete_keys(&ini, "src.pgsql")?)
    } else if ini.section(Some("src.mysql")).is_some() {
        (SourceKind::MySql, descriptor_from_discrete_keys(&ini, "src.mysql")?)
    } else {
        return Err(SyncError::Configuration(
            "parameter error, neither [src.pgsql] nor [src.mysql] section present".into(),
        ));
    };

    let destination = descriptor_from_connect_string(&ini, "desc.pgsql")?;
    let local = if ini.section(Some("local.pgsql")).is_some() {
        descriptor_from_connect_string(&ini, "local.pgsql")?
    } else {
        destination.clone()
    };

    let config = RunConfig {
        source_kind,
        source,
        destination,
        local,
        worker_count: pgxfer::config::DEFAULT_WORKER_COUNT,
        table_filter: None,
        verbose: cli.verbose,
    }
    .with_table_filter(cli.table.clone());

    Ok(config)
}

/// `[src.mysql]`/`[src.pgsql]`-style section: discrete `host`/`port`/`user`/
/// `password`/`db` keys.
fn descriptor_from_discrete_keys(ini: &Ini, section: &str) -> Result<ConnectionDescriptor> {
    let props = ini
        .section(Some(section))
        .ok_or_else(|| SyncError::Configuration(format!("missing [{section}] section")))?;
    let get = |key: &str| -> Result<String> {
        props
            .get(key)
            .map(str::to_string)
            .ok_or_else(|| SyncError::Configuration(format!("parameter error, [{section}].{key} is empty")))
    };
    let host = get("host")?;
    let port: u16 = get("port")?
        .parse()
        .map_err(|_| SyncError::Configuration(format!("[{section}].port is not a valid port number")))?;
    let database = match get("db") {
        Ok(db) => db,
        Err(_) => get("database")?,
    };
    let user = get("user")?;
    let mut descriptor = ConnectionDescriptor::new(host, port, database, user);
    if let Some(password) = props.get("password") {
        descriptor = descriptor.with_password(password);
    }
    Ok(descriptor)
}

/// `[desc.pgsql]`-style section: a single libpq `connect_string` key.
fn descriptor_from_connect_string(ini: &Ini, section: &str) -> Result<ConnectionDescriptor> {
    let props = ini
        .section(Some(section))
        .ok_or_else(|| SyncError::Configuration(format!("missing [{section}] section")))?;
    let connect_string = props
        .get("connect_string")
        .ok_or_else(|| SyncError::Configuration(format!("[{section}].connect_string is empty")))?;
    parse_conninfo(connect_string).map_err(|e| SyncError::Configuration(format!("[{section}].connect_string: {e}")))
}

/// Parse a libpq-style `key=value key=value` string into a descriptor.
/// Quoted values (`key='value with spaces'`) are supported since that's
/// what `ConnectionDescriptor::to_conninfo` itself emits.
fn parse_conninfo(s: &str) -> std::result::Result<ConnectionDescriptor, String> {
    let mut host = None;
    let mut port = None;
    let mut database = None;
    let mut user = None;
    let mut password = None;

    for token in split_conninfo_tokens(s) {
        let (key, value) = token.split_once('=').ok_or_else(|| format!("malformed key=value pair: {token}"))?;
        match key {
            "host" => host = Some(value.to_string()),
            "port" => port = Some(value.parse::<u16>().map_err(|_| format!("invalid port: {value}"))?),
            "dbname" => database = Some(value.to_string()),
            "user" => user = Some(value.to_string()),
            "password" => password = Some(value.to_string()),
            _ => {}
        }
    }

    let mut descriptor = ConnectionDescriptor::new(
        host.ok_or("missing host")?,
        port.ok_or("missing port")?,
        database.ok_or("missing dbname")?,
        user.ok_or("missing user")?,
    );
    if let Some(password) = password {
        descriptor = descriptor.with_password(password);
    }
    Ok(descriptor)
}

fn split_conninfo_tokens(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = s.trim().chars().peekable();
    while chars.peek().is_some() {
        let mut token = String::new();
        let mut in_quotes = false;
        while let Some(&c) = chars.peek() {
            if c == '\'' {
                in_quotes = !in_quotes;
                chars.next();
            } else if c.is_whitespace() && !in_quotes {
                break;
            } else {
                token.push(c);
                chars.next();
            }
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if !token.is_empty() {
            tokens.push(token);
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_conninfo() {
        let d = parse_conninfo("host=localhost port=5432 dbname=mydb user=alice").unwrap();
        assert_eq!(d.host, "localhost");
        assert_eq!(d.port, 5432);
        assert_eq!(d.database, "mydb");
        assert_eq!(d.user, "alice");
        assert!(d.password.is_none());
    }

    #[test]
    fn parses_quoted_values_with_spaces() {
        let d = parse_conninfo("host=localhost port=5432 dbname='my db' user=alice password='p w'").unwrap();
        assert_eq!(d.database, "my db");
        assert_eq!(d.password.as_deref(), Some("p w"));
    }

    #[test]
    fn rejects_missing_required_key() {
        assert!(parse_conninfo("host=localhost port=5432 dbname=mydb").is_err());
    }
}
