//! The `attributes` module: SQLite's virtual table callbacks, forwarded to an
//! [`AttributeStore`].

use std::marker::PhantomData;
use std::os::raw::c_int;
use std::rc::Rc;

use rusqlite::types::ValueRef;
use rusqlite::vtab::{
    sqlite3_vtab, sqlite3_vtab_cursor, update_module, Context, CreateVTab, IndexConstraintOp,
    IndexInfo, UpdateVTab, VTab, VTabConnection, VTabCursor, VTabKind, Values,
};
use rusqlite::Connection;

use crate::config::Settings;
use crate::cursor::{self, Column, Constraint, ConstraintOp, Cursor, Plan};
use crate::error::{AttrError, Result};
use crate::persist::TableName;
use crate::store::{AttributeStore, Mutation, TableProvider};

pub const MODULE_NAME: &str = "attributes";

/// Makes `create virtual table ... using attributes` available on `conn`.
pub fn register_module(conn: &Connection, settings: &Settings) -> Result<()> {
    conn.create_module(
        MODULE_NAME,
        update_module::<AttributesTab>(),
        Some(settings.clone()),
    )?;
    Ok(())
}

/// Reads the rowid SQLite hands to a delete. A rowid that is not an integer
/// is reported with the type it actually had.
pub fn identity_arg(arg: ValueRef<'_>) -> rusqlite::Result<i64> {
    arg.as_i64()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, arg.data_type(), Box::new(e)))
}

fn text(arg: &[u8]) -> rusqlite::Result<&str> {
    std::str::from_utf8(arg).map_err(rusqlite::Error::Utf8Error)
}

#[repr(C)]
pub struct AttributesTab {
    base: sqlite3_vtab,
    store: Rc<AttributeStore>,
}

impl AttributesTab {
    // args: module name, database name, table name, then the module arguments
    fn attach(
        db: &mut VTabConnection,
        aux: Option<&Settings>,
        args: &[&[u8]],
        create: bool,
    ) -> rusqlite::Result<(String, Self)> {
        if args.len() < 3 {
            return Err(rusqlite::Error::ModuleError(
                "attributes tables need a database and a table name".to_owned(),
            ));
        }
        let name = TableName::new(text(args[1])?, text(args[2])?);
        let mut settings = aux.cloned().unwrap_or_default();
        let arguments = args[3..]
            .iter()
            .map(|arg| text(arg))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        settings.table = settings.table.with_arguments(arguments)?;
        // SAFETY: the handle belongs to the connection that owns this table
        // and outlives it; `from_handle` never closes what it wraps.
        let conn = unsafe { Connection::from_handle(db.handle())? };
        let store = if create {
            AttributeStore::create(conn, name, &settings)?
        } else {
            AttributeStore::connect(conn, name, &settings)?
        };
        let shape = store.shape().to_owned();
        Ok((
            shape,
            Self {
                base: sqlite3_vtab::default(),
                store: Rc::new(store),
            },
        ))
    }

    fn apply(&self, mutation: Mutation) -> rusqlite::Result<i64> {
        Ok(self.store.mutate(mutation)?)
    }
}

unsafe impl<'vtab> VTab<'vtab> for AttributesTab {
    type Aux = Settings;
    type Cursor = AttributesCursor<'vtab>;

    fn connect(
        db: &mut VTabConnection,
        aux: Option<&Settings>,
        args: &[&[u8]],
    ) -> rusqlite::Result<(String, Self)> {
        Self::attach(db, aux, args, false)
    }

    fn best_index(&self, info: &mut IndexInfo) -> rusqlite::Result<()> {
        let constraints = info
            .constraints()
            .map(|c| Constraint {
                column: c.column(),
                op: match c.operator() {
                    IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_MATCH => ConstraintOp::Match,
                    _ => ConstraintOp::Other,
                },
                usable: c.is_usable(),
            })
            .collect::<Vec<_>>();
        let chosen = self.store.best_index(&constraints);
        if let Some(consumed) = chosen.consumed {
            if let Some((_, mut usage)) = info.constraints_and_usages().nth(consumed) {
                usage.set_argv_index(1);
                usage.set_omit(true);
            }
        }
        info.set_idx_num(chosen.plan.idx_num());
        info.set_estimated_cost(chosen.plan.cost());
        Ok(())
    }

    fn open(&'vtab mut self) -> rusqlite::Result<AttributesCursor<'vtab>> {
        Ok(AttributesCursor {
            base: sqlite3_vtab_cursor::default(),
            cursor: self.store.open()?,
            store: Rc::clone(&self.store),
            phantom: PhantomData,
        })
    }
}

impl<'vtab> CreateVTab<'vtab> for AttributesTab {
    const KIND: VTabKind = VTabKind::Default;

    fn create(
        db: &mut VTabConnection,
        aux: Option<&Settings>,
        args: &[&[u8]],
    ) -> rusqlite::Result<(String, Self)> {
        Self::attach(db, aux, args, true)
    }

    fn destroy(&self) -> rusqlite::Result<()> {
        Ok(self.store.destroy()?)
    }
}

impl<'vtab> UpdateVTab<'vtab> for AttributesTab {
    fn delete(&mut self, arg: ValueRef<'_>) -> rusqlite::Result<()> {
        let identity = identity_arg(arg)?;
        self.apply(Mutation::Delete { identity })?;
        Ok(())
    }

    // args: old rowid (NULL), new rowid, id, attributes
    fn insert(&mut self, args: &Values<'_>) -> rusqlite::Result<i64> {
        let rowid: Option<i64> = args.get(1)?;
        let id: Option<i64> = args.get(2)?;
        let attributes: Option<String> = args.get(3)?;
        let identity = match (rowid, id) {
            (Some(rowid), Some(id)) if rowid != id => {
                return Err(AttrError::PolicyViolation(format!(
                    "rowid {rowid} and id {id} disagree"
                ))
                .into());
            }
            (rowid, id) => rowid.or(id),
        };
        self.apply(Mutation::Insert {
            identity,
            attributes: attributes.unwrap_or_default(),
        })
    }

    // args: old rowid, new rowid, id, attributes
    fn update(&mut self, args: &Values<'_>) -> rusqlite::Result<()> {
        let old: i64 = args.get(0)?;
        let rowid: Option<i64> = args.get(1)?;
        let id: Option<i64> = args.get(2)?;
        let attributes: Option<String> = args.get(3)?;
        let identity = match (rowid, id) {
            (Some(rowid), _) if rowid != old => rowid,
            (_, Some(id)) => id,
            _ => old,
        };
        self.apply(Mutation::Replace {
            old,
            identity,
            attributes: attributes.unwrap_or_default(),
        })?;
        Ok(())
    }
}

#[repr(C)]
pub struct AttributesCursor<'vtab> {
    base: sqlite3_vtab_cursor,
    store: Rc<AttributeStore>,
    cursor: Cursor,
    phantom: PhantomData<&'vtab AttributesTab>,
}

unsafe impl VTabCursor for AttributesCursor<'_> {
    fn filter(
        &mut self,
        idx_num: c_int,
        _idx_str: Option<&str>,
        args: &Values<'_>,
    ) -> rusqlite::Result<()> {
        let plan = Plan::from_idx_num(idx_num);
        let query: Option<String> = match plan {
            Plan::AttributeMatch if !args.is_empty() => args.get(0)?,
            _ => None,
        };
        let scan = cursor::bind_scan(plan, query.as_deref());
        Ok(self.cursor.rewind(self.store.persistor(), scan)?)
    }

    fn next(&mut self) -> rusqlite::Result<()> {
        Ok(self.cursor.advance(self.store.persistor())?)
    }

    fn eof(&self) -> bool {
        self.cursor.at_end()
    }

    fn column(&self, ctx: &mut Context, i: c_int) -> rusqlite::Result<()> {
        match self.cursor.current_column(i) {
            Some(Column::Id(id)) => ctx.set_result(&id),
            Some(Column::Attributes(attributes)) => ctx.set_result(&attributes),
            None => Err(rusqlite::Error::ModuleError(format!(
                "no column {i} on the current row"
            ))),
        }
    }

    fn rowid(&self) -> rusqlite::Result<i64> {
        self.cursor.current_identity().ok_or_else(|| {
            rusqlite::Error::ModuleError("cursor is not on a row".to_owned())
        })
    }
}
