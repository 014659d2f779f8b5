//! The match predicate and the scalar functions handed to SQLite.
//!
//! `match(query, attributes)` is what SQLite evaluates for
//! `attributes MATCH query` whenever the planner leaves the constraint for
//! the generic evaluator, so it has to agree exactly with the join the
//! planner pushes down through the attribute relation.

use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::codec::{self, SEPARATOR_CHAR};
use crate::error::Result;

/// A parsed match query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query<'q> {
    /// The attribute is present, whatever its value.
    Present(&'q str),
    /// The attribute is present with exactly this value.
    Equals(&'q str, &'q str),
}

impl<'q> Query<'q> {
    /// A query holding the separator reads as `name SEP value`, anything
    /// else is a bare name.
    pub fn parse(query: &'q str) -> Self {
        match query.split_once(SEPARATOR_CHAR) {
            Some((name, value)) => Query::Equals(name, value),
            None => Query::Present(query),
        }
    }
    pub fn name(&self) -> &'q str {
        match self {
            Query::Present(name) | Query::Equals(name, _) => name,
        }
    }
    pub fn test(&self, blob: &str) -> bool {
        match self {
            Query::Present(name) => codec::lookup(blob, name).is_some(),
            Query::Equals(name, value) => codec::lookup(blob, name) == Some(*value),
        }
    }
}

pub fn matches(query: &str, blob: &str) -> bool {
    Query::parse(query).test(blob)
}

// NULL propagates, anything else must be text
fn text_arg<'a>(ctx: &'a Context<'_>, idx: usize) -> rusqlite::Result<Option<&'a str>> {
    match ctx.get_raw(idx) {
        ValueRef::Null => Ok(None),
        value => value
            .as_str()
            .map(Some)
            .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e))),
    }
}

fn sql_match(ctx: &Context<'_>) -> rusqlite::Result<Option<bool>> {
    let (Some(query), Some(blob)) = (text_arg(ctx, 0)?, text_arg(ctx, 1)?) else {
        return Ok(None);
    };
    Ok(Some(matches(query, blob)))
}

fn sql_has_attr(ctx: &Context<'_>) -> rusqlite::Result<Option<bool>> {
    let (Some(blob), Some(query)) = (text_arg(ctx, 0)?, text_arg(ctx, 1)?) else {
        return Ok(None);
    };
    Ok(Some(matches(query, blob)))
}

fn sql_get_attr(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    let (Some(blob), Some(name)) = (text_arg(ctx, 0)?, text_arg(ctx, 1)?) else {
        return Ok(None);
    };
    Ok(codec::lookup(blob, name).map(str::to_owned))
}

fn sql_pack_attrs(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    if ctx.len() % 2 != 0 {
        return Err(rusqlite::Error::UserFunctionError(
            "pack_attrs expects name, value pairs".into(),
        ));
    }
    let mut fields = Vec::with_capacity(ctx.len());
    for idx in 0..ctx.len() {
        match text_arg(ctx, idx)? {
            Some(field) => fields.push(field),
            None => return Ok(None),
        }
    }
    Ok(Some(codec::encode(
        fields.chunks_exact(2).map(|pair| (pair[0], pair[1])),
    )))
}

/// Registers `match`, `has_attr`, `get_attr` and `pack_attrs`.
pub fn register_functions(conn: &Connection) -> Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function("match", 2, flags, sql_match)?;
    conn.create_scalar_function("has_attr", 2, flags, sql_has_attr)?;
    conn.create_scalar_function("get_attr", 2, flags, sql_get_attr)?;
    conn.create_scalar_function("pack_attrs", -1, flags, sql_pack_attrs)?;
    Ok(())
}
