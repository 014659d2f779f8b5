//! sqlattr – schema-less attributes for SQLite rows.
//!
//! An `attributes` table looks like any other two-column table,
//! `(id, attributes)`, where `attributes` is a single text value packing an
//! open-ended list of named attributes. Underneath, every logical table is
//! backed by two ordinary relations:
//! * `<table>_Sequence` – one row per entity: its identity and the packed
//!   blob, which answers "give me the attributes of this row" without a join.
//! * `<table>_Attributes` – one `(entity_id, name, value)` triple per pair,
//!   with a unique `(name, entity_id)` index for selective lookups.
//!
//! Writes keep both in lockstep; reads come from the sequence relation,
//! optionally narrowed through the attribute relation when the query says
//! `attributes MATCH 'name'` or `attributes MATCH 'name' || char(31) || 'value'`.
//!
//! ## Modules
//! * [`codec`] – The packed encoding: iteration, lookup and encoding.
//! * [`predicate`] – The match predicate and the SQL functions built on it.
//! * [`persist`] – The two physical relations and the statements over them.
//! * [`store`] – The logical table: lifecycle and the mutation engine.
//! * [`cursor`] – Access path selection and the forward-only cursor.
//! * [`vtab`] – The rusqlite virtual table glue.
//! * [`config`] – Settings and per-table options.
//!
//! ## SQL surface
//! * `create virtual table t using attributes(identity=caller|engine, append_only=false)`
//! * `match(query, attributes)`, so that `attributes MATCH query` works anywhere
//! * `has_attr(attributes, query)` and `get_attr(attributes, name)`
//! * `pack_attrs(name, value, ...)` to build a packed blob
//!
//! ## Quick Start
//! ```
//! use rusqlite::Connection;
//! use sqlattr::config::Settings;
//! let conn = Connection::open_in_memory().unwrap();
//! sqlattr::register(&conn, &Settings::default()).unwrap();
//! conn.execute_batch("
//!     create virtual table things using attributes;
//!     insert into things (attributes) values (pack_attrs('color', 'red', 'size', 'M'));
//! ").unwrap();
//! let color: String = conn
//!     .query_row("select get_attr(attributes, 'color') from things where attributes match 'size'", [], |r| r.get(0))
//!     .unwrap();
//! assert_eq!(color, "red");
//! ```
//!
//! ## Consistency
//! The engine takes no locks and never retries. Multi-step writes (an update
//! is a delete followed by an insert) are not undone here when a later step
//! fails; run writes inside a transaction and let the failure abort it.

pub mod codec;
pub mod config;
pub mod cursor;
pub mod error;
pub mod persist;
pub mod predicate;
pub mod store;
pub mod vtab;

pub use error::{AttrError, Result};

use rusqlite::Connection;

use crate::config::Settings;

/// Registers the functions and the `attributes` module on `conn`.
pub fn register(conn: &Connection, settings: &Settings) -> Result<()> {
    predicate::register_functions(conn)?;
    vtab::register_module(conn, settings)?;
    Ok(())
}
