//! The logical attribute table.
//!
//! An [`AttributeStore`] is the handle the host keeps for one logical table.
//! It presents every entity as a single `(id, attributes)` row while keeping
//! the sequence relation (one row per entity, packed blob included) and the
//! attribute relation (one row per pair) in agreement.

use rusqlite::Connection;
use tracing::debug;

use crate::codec;
use crate::config::{IdentityPolicy, Settings, TableOptions};
use crate::cursor::{self, Constraint, Cursor, IndexPlan};
use crate::error::{AttrError, Result};
use crate::persist::{Persistor, TableName};

/// The shape declared to the host, whatever columns the table was created with.
pub const SHAPE: &str = "create table x(id integer, attributes text)";

/// A write against the logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// A new entity. Without an identity the store assigns one.
    Insert {
        identity: Option<i64>,
        attributes: String,
    },
    /// The entity `old` is replaced wholesale by `attributes` under `identity`.
    Replace {
        old: i64,
        identity: i64,
        attributes: String,
    },
    Delete { identity: i64 },
}

/// What a host needs from a table implementation. The host owns one
/// provider per logical table and drives it through these calls.
pub trait TableProvider: Sized {
    type Cursor;

    /// First-time setup: builds the physical relations.
    fn create(db: Connection, name: TableName, settings: &Settings) -> Result<Self>;
    /// Attaches to relations built by an earlier `create`.
    fn connect(db: Connection, name: TableName, settings: &Settings) -> Result<Self>;
    fn shape(&self) -> &'static str;
    fn best_index(&self, constraints: &[Constraint]) -> IndexPlan;
    fn open(&self) -> Result<Self::Cursor>;
    /// Applies a write and returns the identity it touched.
    fn mutate(&self, mutation: Mutation) -> Result<i64>;
    fn rename(&self, new_name: &str) -> Result<()>;
    /// Drops the physical relations for good.
    fn destroy(&self) -> Result<()>;
    /// Lets go of the handle, data stays where it is.
    fn disconnect(self) {
        drop(self)
    }
}

pub struct AttributeStore {
    persistor: Persistor,
    options: TableOptions,
    batch_size: usize,
}

impl AttributeStore {
    fn new(db: Connection, name: TableName, settings: &Settings) -> Self {
        db.set_prepared_statement_cache_capacity(settings.statement_cache);
        Self {
            persistor: Persistor::new(db, name),
            options: settings.table,
            batch_size: settings.batch_size,
        }
    }

    pub fn persistor(&self) -> &Persistor {
        &self.persistor
    }

    pub fn options(&self) -> TableOptions {
        self.options
    }

    fn check_identity(&self, identity: Option<i64>) -> Result<()> {
        match (identity, self.options.identity) {
            (Some(identity), IdentityPolicy::Engine) => Err(AttrError::PolicyViolation(format!(
                "table '{}' assigns its own identities, {identity} was supplied",
                self.persistor.name.table
            ))),
            _ => Ok(()),
        }
    }

    fn check_rewrite(&self, what: &str) -> Result<()> {
        if self.options.append_only {
            return Err(AttrError::PolicyViolation(format!(
                "table '{}' is append-only, {what} is not allowed",
                self.persistor.name.table
            )));
        }
        Ok(())
    }

    // One sequence row, then one triple per decoded pair. A failing triple
    // aborts the write; the triples already written are left to the
    // enclosing transaction.
    fn write(&self, identity: Option<i64>, attributes: &str) -> Result<i64> {
        let id = self.persistor.add_entity(identity, attributes)?;
        let pairs = self.persistor.add_triples(id, codec::pairs(attributes))?;
        debug!(table=%self.persistor.name.table, id, pairs, "inserted entity");
        Ok(id)
    }

    fn erase(&self, identity: i64) -> Result<()> {
        let entities = self.persistor.remove_entity(identity)?;
        let triples = self.persistor.remove_triples(identity)?;
        debug!(table=%self.persistor.name.table, id=identity, entities, triples, "deleted entity");
        Ok(())
    }

    pub fn insert(&self, identity: Option<i64>, attributes: &str) -> Result<i64> {
        self.check_identity(identity)?;
        self.write(identity, attributes)
    }

    /// Delete followed by insert under `identity`. If the insert fails the
    /// entity is gone until the enclosing transaction rolls back.
    pub fn replace(&self, old: i64, identity: i64, attributes: &str) -> Result<i64> {
        self.check_rewrite("update")?;
        if identity != old {
            self.check_identity(Some(identity))?;
        }
        self.erase(old)?;
        self.write(Some(identity), attributes)
    }

    pub fn delete(&self, identity: i64) -> Result<i64> {
        self.check_rewrite("delete")?;
        self.erase(identity)?;
        Ok(identity)
    }
}

impl TableProvider for AttributeStore {
    type Cursor = Cursor;

    fn create(db: Connection, name: TableName, settings: &Settings) -> Result<Self> {
        let store = Self::new(db, name, settings);
        store.persistor.provision()?;
        store.persistor.prepare()?;
        Ok(store)
    }

    fn connect(db: Connection, name: TableName, settings: &Settings) -> Result<Self> {
        let store = Self::new(db, name, settings);
        store.persistor.prepare()?;
        debug!(table=%store.persistor.name.table, options=?store.options, "connected");
        Ok(store)
    }

    fn shape(&self) -> &'static str {
        SHAPE
    }

    fn best_index(&self, constraints: &[Constraint]) -> IndexPlan {
        cursor::best_index(constraints)
    }

    fn open(&self) -> Result<Cursor> {
        Ok(Cursor::new(self.batch_size))
    }

    fn mutate(&self, mutation: Mutation) -> Result<i64> {
        match mutation {
            Mutation::Insert {
                identity,
                attributes,
            } => self.insert(identity, &attributes),
            Mutation::Replace {
                old,
                identity,
                attributes,
            } => self.replace(old, identity, &attributes),
            Mutation::Delete { identity } => self.delete(identity),
        }
    }

    fn rename(&self, _new_name: &str) -> Result<()> {
        Err(AttrError::Unimplemented("renaming an attribute table"))
    }

    fn destroy(&self) -> Result<()> {
        self.persistor.drop_relations()
    }
}

// Dropping the handle finalizes its cached statements; the relations stay.
impl Drop for AttributeStore {
    fn drop(&mut self) {
        self.persistor.db.flush_prepared_statement_cache();
        debug!(table=%self.persistor.name.table, "disconnected");
    }
}
