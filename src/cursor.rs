//! Access path selection and the forward-only cursor.
//!
//! The planner knows two access paths. A usable `attributes MATCH ?`
//! constraint is answered by joining through the attribute relation, whose
//! unique `(name, entity_id)` index does the selection; everything else scans
//! the sequence relation. Either way the rows come straight from the
//! sequence relation, each carrying its own packed blob.
//!
//! Cursors read in keyset batches (`id >= next`, ordered by id), so between
//! two calls from the host no statement is left open. That keeps any number
//! of cursors over one table out of each other's way, and closing one in any
//! state leaves nothing behind.

use std::collections::VecDeque;

use tracing::debug;

use crate::error::Result;
use crate::persist::{Entity, Persistor, Scan};
use crate::predicate::Query;

pub const ID_COLUMN: i32 = 0;
pub const ATTRIBUTES_COLUMN: i32 = 1;

const FULL_SCAN_COST: f64 = 1_000_000.0;
const MATCH_COST: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Match,
    Other,
}

/// The part of a host constraint the planner looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraint {
    pub column: i32,
    pub op: ConstraintOp,
    pub usable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    FullScan,
    AttributeMatch,
}

impl Plan {
    pub fn idx_num(self) -> i32 {
        match self {
            Plan::FullScan => 0,
            Plan::AttributeMatch => 1,
        }
    }
    pub fn from_idx_num(idx_num: i32) -> Self {
        match idx_num {
            1 => Plan::AttributeMatch,
            _ => Plan::FullScan,
        }
    }
    pub fn cost(self) -> f64 {
        match self {
            Plan::FullScan => FULL_SCAN_COST,
            Plan::AttributeMatch => MATCH_COST,
        }
    }
}

/// The chosen plan, and which constraint it consumes as its only argument.
/// A consumed constraint is not checked again by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexPlan {
    pub plan: Plan,
    pub consumed: Option<usize>,
}

pub fn best_index(constraints: &[Constraint]) -> IndexPlan {
    let consumed = constraints.iter().position(|c| {
        c.usable && c.column == ATTRIBUTES_COLUMN && c.op == ConstraintOp::Match
    });
    let plan = match consumed {
        Some(_) => Plan::AttributeMatch,
        None => Plan::FullScan,
    };
    debug!(?plan, constraints = constraints.len(), "planned");
    IndexPlan { plan, consumed }
}

/// Binds the argument of an attribute match. A NULL query matches
/// nothing, just like the match function would.
pub fn bind_scan(plan: Plan, query: Option<&str>) -> Scan {
    match (plan, query) {
        (Plan::FullScan, _) => Scan::All,
        (Plan::AttributeMatch, None) => Scan::Nothing,
        (Plan::AttributeMatch, Some(query)) => match Query::parse(query) {
            Query::Present(name) => Scan::Named(name.to_owned()),
            Query::Equals(name, value) => Scan::Valued(name.to_owned(), value.to_owned()),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Unpositioned,
    Positioned,
    Eof,
}

/// A column of the row a cursor is positioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column<'a> {
    Id(i64),
    Attributes(&'a str),
}

#[derive(Debug)]
pub struct Cursor {
    state: CursorState,
    scan: Scan,
    current: Option<Entity>,
    batch: VecDeque<Entity>,
    // first id of the next refill, None once the scan is drained
    next_from: Option<i64>,
    batch_size: usize,
}

impl Cursor {
    pub fn new(batch_size: usize) -> Self {
        Self {
            state: CursorState::Unpositioned,
            scan: Scan::Nothing,
            current: None,
            batch: VecDeque::new(),
            next_from: None,
            batch_size: batch_size.max(1),
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Starts over with a new scan, dropping whatever the previous one
    /// had buffered, and moves to the first row.
    pub fn rewind(&mut self, persistor: &Persistor, scan: Scan) -> Result<()> {
        debug!(table=%persistor.name.table, ?scan, "rewind");
        self.close();
        self.scan = scan;
        self.next_from = Some(i64::MIN);
        self.advance(persistor)
    }

    pub fn advance(&mut self, persistor: &Persistor) -> Result<()> {
        if self.batch.is_empty() {
            self.refill(persistor)?;
        }
        self.current = self.batch.pop_front();
        self.state = match self.current {
            Some(_) => CursorState::Positioned,
            None => CursorState::Eof,
        };
        Ok(())
    }

    fn refill(&mut self, persistor: &Persistor) -> Result<()> {
        let Some(from) = self.next_from else {
            return Ok(());
        };
        let entities = persistor.scan(&self.scan, from, self.batch_size)?;
        self.next_from = match entities.last() {
            Some(last) if entities.len() == self.batch_size => last.id.checked_add(1),
            _ => None,
        };
        self.batch.extend(entities);
        Ok(())
    }

    /// True unless the cursor sits on a row.
    pub fn at_end(&self) -> bool {
        self.state != CursorState::Positioned
    }

    pub fn current_identity(&self) -> Option<i64> {
        self.current.as_ref().map(|entity| entity.id)
    }

    pub fn current_column(&self, index: i32) -> Option<Column<'_>> {
        let entity = self.current.as_ref()?;
        match index {
            ID_COLUMN => Some(Column::Id(entity.id)),
            ATTRIBUTES_COLUMN => Some(Column::Attributes(&entity.attributes)),
            _ => None,
        }
    }

    pub fn close(&mut self) {
        self.state = CursorState::Unpositioned;
        self.scan = Scan::Nothing;
        self.current = None;
        self.batch.clear();
        self.next_from = None;
    }
}
