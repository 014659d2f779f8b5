// used for persistence
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::error::Result;

/// An entity as stored in the sequence relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: i64,
    pub attributes: String,
}

impl Entity {
    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            attributes: r.get(1)?,
        })
    }
}

/// What a cursor refill reads from the sequence relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan {
    All,
    /// Entities holding an attribute with this name.
    Named(String),
    /// Entities holding this exact name and value.
    Valued(String, String),
    /// Nothing can match, e.g. a NULL match query.
    Nothing,
}

// Identifiers cannot be bound as parameters, so they are quoted once here.
fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Where the two physical relations of one logical table live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
    pub fn sequence(&self) -> String {
        format!("{}_Sequence", self.table)
    }
    pub fn attributes(&self) -> String {
        format!("{}_Attributes", self.table)
    }
    fn qualified(&self, relation: &str) -> String {
        format!("{}.{}", quote(&self.schema), quote(relation))
    }
}

// SQL text of every statement, prepared through the connection's cache
#[derive(Debug)]
struct Statements {
    add_entity: String,
    add_triple: String,
    remove_entity: String,
    remove_triples: String,
    scan_all: String,
    scan_named: String,
    scan_valued: String,
    get_entity: String,
    triples_of: String,
}

impl Statements {
    fn new(name: &TableName) -> Self {
        let sequence = name.qualified(&name.sequence());
        let attributes = name.qualified(&name.attributes());
        Self {
            add_entity: format!(
                "
                insert into {sequence} (
                    id,
                    attributes
                ) values (?, ?)
                returning id
            "
            ),
            add_triple: format!(
                "
                insert into {attributes} (
                    entity_id,
                    name,
                    value
                ) values (?, ?, ?)
            "
            ),
            remove_entity: format!(
                "
                delete from {sequence}
                    where id = ?
            "
            ),
            remove_triples: format!(
                "
                delete from {attributes}
                    where entity_id = ?
            "
            ),
            scan_all: format!(
                "
                select id, attributes
                    from {sequence}
                    where id >= ?
                    order by id
                    limit ?
            "
            ),
            scan_named: format!(
                "
                select s.id, s.attributes
                    from {attributes} a
                    join {sequence} s
                    on s.id = a.entity_id
                    where a.name = ?
                    and a.entity_id >= ?
                    order by a.entity_id
                    limit ?
            "
            ),
            scan_valued: format!(
                "
                select s.id, s.attributes
                    from {attributes} a
                    join {sequence} s
                    on s.id = a.entity_id
                    where a.name = ?
                    and a.value = ?
                    and a.entity_id >= ?
                    order by a.entity_id
                    limit ?
            "
            ),
            get_entity: format!(
                "
                select id, attributes
                    from {sequence}
                    where id = ?
            "
            ),
            triples_of: format!(
                "
                select name, value
                    from {attributes}
                    where entity_id = ?
                    order by rowid
            "
            ),
        }
    }
    fn writes(&self) -> [&str; 4] {
        [
            self.add_entity.as_str(),
            self.add_triple.as_str(),
            self.remove_entity.as_str(),
            self.remove_triples.as_str(),
        ]
    }
}

// One physical object: how to make it, and how to take it back.
struct Provision {
    what: String,
    create: String,
    undo: String,
}

// ------------- Persistence -------------
/// Owns the sequence and attribute relations of one logical table.
pub struct Persistor {
    pub db: Connection,
    pub name: TableName,
    statements: Statements,
}

impl Persistor {
    pub fn new(db: Connection, name: TableName) -> Self {
        let statements = Statements::new(&name);
        Self {
            db,
            name,
            statements,
        }
    }

    fn provisions(&self) -> Vec<Provision> {
        let name = &self.name;
        let sequence = name.sequence();
        let attributes = name.attributes();
        let unique_index = format!("{attributes}_name_entity");
        let entity_index = format!("{attributes}_entity");
        vec![
            Provision {
                what: sequence.clone(),
                create: format!(
                    "
                create table {} (
                    id integer,
                    attributes text not null,
                    constraint referenceable_id primary key (
                        id
                    )
                );
                ",
                    name.qualified(&sequence)
                ),
                undo: format!("drop table if exists {};", name.qualified(&sequence)),
            },
            Provision {
                what: attributes.clone(),
                create: format!(
                    "
                create table {} (
                    entity_id integer not null,
                    name text not null,
                    value text not null,
                    constraint Attribute_of_Entity foreign key (
                        entity_id
                    ) references {}(id) on delete cascade
                );
                ",
                    name.qualified(&attributes),
                    quote(&sequence)
                ),
                undo: format!("drop table if exists {};", name.qualified(&attributes)),
            },
            Provision {
                what: unique_index.clone(),
                create: format!(
                    "
                create unique index {} on {} (
                    name,
                    entity_id
                );
                ",
                    name.qualified(&unique_index),
                    quote(&attributes)
                ),
                undo: format!("drop index if exists {};", name.qualified(&unique_index)),
            },
            Provision {
                what: entity_index.clone(),
                create: format!(
                    "
                create index {} on {} (
                    entity_id
                );
                ",
                    name.qualified(&entity_index),
                    quote(&attributes)
                ),
                undo: format!("drop index if exists {};", name.qualified(&entity_index)),
            },
        ]
    }

    /// Creates the physical relations and their indexes. When a step fails
    /// everything created before it is dropped again, then the failure of
    /// that step is returned.
    pub fn provision(&self) -> Result<()> {
        let mut created: Vec<Provision> = Vec::new();
        for provision in self.provisions() {
            if let Err(err) = self.db.execute_batch(&provision.create) {
                warn!(table=%self.name.table, object=%provision.what, error=%err, "provisioning failed, rolling back");
                for done in created.iter().rev() {
                    if let Err(cleanup) = self.db.execute_batch(&done.undo) {
                        warn!(object=%done.what, error=%cleanup, "could not roll back");
                    }
                }
                return Err(err.into());
            }
            created.push(provision);
        }
        info!(schema=%self.name.schema, table=%self.name.table, "provisioned sequence and attribute relations");
        Ok(())
    }

    /// Prepares the write statements up front, so a handle on missing
    /// relations fails here rather than on the first write.
    pub fn prepare(&self) -> Result<()> {
        for sql in self.statements.writes() {
            self.db.prepare_cached(sql)?;
        }
        Ok(())
    }

    /// Drops both relations, attributes first since they reference the
    /// sequence. Indexes go with their table.
    pub fn drop_relations(&self) -> Result<()> {
        self.db.flush_prepared_statement_cache();
        let name = &self.name;
        self.db.execute_batch(&format!(
            "
            drop table if exists {};
            drop table if exists {};
            ",
            name.qualified(&name.attributes()),
            name.qualified(&name.sequence())
        ))?;
        info!(schema=%name.schema, table=%name.table, "dropped sequence and attribute relations");
        Ok(())
    }

    /// Writes a sequence row, letting the store pick the id when none is
    /// given, and returns the id it ended up with.
    pub fn add_entity(&self, id: Option<i64>, attributes: &str) -> Result<i64> {
        let mut add_entity = self.db.prepare_cached(&self.statements.add_entity)?;
        let id = add_entity.query_row(params![id, attributes], |r| r.get(0))?;
        Ok(id)
    }

    /// Writes one triple per pair, stopping at the first failure.
    pub fn add_triples<'a, I>(&self, id: i64, pairs: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut add_triple = self.db.prepare_cached(&self.statements.add_triple)?;
        let mut written = 0;
        for (name, value) in pairs {
            add_triple.execute(params![id, name, value])?;
            written += 1;
        }
        Ok(written)
    }

    pub fn remove_entity(&self, id: i64) -> Result<usize> {
        let mut remove_entity = self.db.prepare_cached(&self.statements.remove_entity)?;
        Ok(remove_entity.execute(params![id])?)
    }

    /// Zero rows removed is fine, the cascade may have been there first.
    pub fn remove_triples(&self, id: i64) -> Result<usize> {
        let mut remove_triples = self.db.prepare_cached(&self.statements.remove_triples)?;
        Ok(remove_triples.execute(params![id])?)
    }

    /// Reads up to `limit` entities with `id >= from`, in id order.
    pub fn scan(&self, scan: &Scan, from: i64, limit: usize) -> Result<Vec<Entity>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let to_entity = Entity::from_row;
        let entities = match scan {
            Scan::Nothing => Vec::new(),
            Scan::All => {
                let mut scan_all = self.db.prepare_cached(&self.statements.scan_all)?;
                let rows = scan_all.query_map(params![from, limit], to_entity)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            Scan::Named(name) => {
                let mut scan_named = self.db.prepare_cached(&self.statements.scan_named)?;
                let rows = scan_named.query_map(params![name, from, limit], to_entity)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            Scan::Valued(name, value) => {
                let mut scan_valued = self.db.prepare_cached(&self.statements.scan_valued)?;
                let rows = scan_valued.query_map(params![name, value, from, limit], to_entity)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(entities)
    }

    pub fn get_entity(&self, id: i64) -> Result<Option<Entity>> {
        let mut get_entity = self.db.prepare_cached(&self.statements.get_entity)?;
        let entity = get_entity
            .query_row(params![id], Entity::from_row)
            .optional()?;
        Ok(entity)
    }

    /// The triples stored for one entity, in insertion order.
    pub fn triples_of(&self, id: i64) -> Result<Vec<(String, String)>> {
        let mut triples_of = self.db.prepare_cached(&self.statements.triples_of)?;
        let rows = triples_of.query_map(params![id], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<(String, String)>>>()?)
    }
}
