//! A small shell around the extension: reads SQL from stdin, runs it against
//! the database named on the command line (in-memory when none is given) and
//! prints result rows tab-separated. The separator byte is shown as `|`.
//!
//! Settings come from `sqlattr.{toml,json,yaml,...}` in the working
//! directory and `SQLATTR_*` environment variables; logging follows `RUST_LOG`.

use std::io::{self, Read};

use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sqlattr::codec::SEPARATOR_CHAR;
use sqlattr::config::Settings;

fn render(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_owned(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).replace(SEPARATOR_CHAR, "|"),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(Some("sqlattr"))?;
    let conn = match std::env::args().nth(1) {
        Some(path) => Connection::open(path)?,
        None => Connection::open_in_memory()?,
    };
    sqlattr::register(&conn, &settings)?;
    info!(?settings, "extension registered");

    let mut script = String::new();
    io::stdin().read_to_string(&mut script)?;
    let mut batch = Batch::new(&conn, &script);
    let mut statements = 0;
    while let Some(mut statement) = batch.next()? {
        let columns = statement.column_count();
        let mut rows = statement.raw_query();
        while let Some(row) = rows.next()? {
            let fields = (0..columns)
                .map(|i| row.get_ref(i).map(render))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            println!("{}", fields.join("\t"));
        }
        statements += 1;
    }
    info!(statements, "script complete");
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();
    if let Err(e) = run() {
        error!(error=%e, "sqlattr failed");
        std::process::exit(1);
    }
}
