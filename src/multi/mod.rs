// Multi-statement results.
//
// - peek: single-slot lookahead over an engine row iterator
// - row: `Row` and `RowSet` handed to callers
//
// A batch yields one slot per executed statement. Slots whose statement produced no rows are
// closed and skipped. A failed slot is always the last one and ends the batch for the caller
// once it is reached.

mod peek;
mod row;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::engine::{QueryOutput, RowIter};
use crate::error::{DriverError, translate};
use crate::types::RowValues;

use peek::PeekableRows;
use row::{ColumnIndex, column_index};

pub use row::{Row, RowSet};

/// Outcome of executing one statement of a batch in query style.
pub(crate) enum Slot {
    Output(QueryOutput),
    Failed(DriverError),
}

struct Surfaced {
    schema: Arc<Vec<String>>,
    index: ColumnIndex,
    rows: PeekableRows,
}

enum Pending {
    Rows(Surfaced),
    Failed(DriverError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Iterating,
    Exhausted,
    Errored,
}

/// Whether a statement's output is a real result set, possibly empty.
///
/// Zero columns, or a first row that is the single execution-summary marker, means the
/// statement had no result set.
fn surfaces(schema: &[String], rows: &mut PeekableRows) -> Result<bool, DriverError> {
    if schema.is_empty() {
        return Ok(false);
    }
    let first = rows.peek().map_err(translate)?;
    Ok(!matches!(first.map(Vec::as_slice), Some([RowValues::OkResult(_)])))
}

/// Rows of a query, possibly spanning several statements' result sets.
///
/// The first result set is current as soon as the value is returned. Advance with
/// [`ResultSet::next_result_set`]; once it reports a failed statement no later result set is
/// reachable.
pub struct ResultSet {
    current: Option<Surfaced>,
    pending: VecDeque<Pending>,
    state: State,
    err: Option<DriverError>,
    close_err: Option<DriverError>,
    closed: bool,
}

impl ResultSet {
    /// Build from executed statements, in batch order.
    ///
    /// If the first reachable slot is a failure it is returned as the error and everything is
    /// closed.
    pub(crate) fn from_slots(slots: Vec<Slot>) -> Result<Self, DriverError> {
        let mut pending = VecDeque::with_capacity(slots.len());
        let mut close_err = None;
        for (position, slot) in slots.into_iter().enumerate() {
            match slot {
                Slot::Failed(err) => pending.push_back(Pending::Failed(err)),
                Slot::Output(output) => {
                    let mut rows = PeekableRows::new(output.rows);
                    match surfaces(&output.schema, &mut rows) {
                        Ok(true) => pending.push_back(Pending::Rows(Surfaced {
                            index: column_index(&output.schema),
                            schema: output.schema,
                            rows,
                        })),
                        Ok(false) => {
                            debug!(position, "statement produced no result set");
                            if let Err(e) = rows.close() {
                                close_err.get_or_insert(translate(e));
                            }
                        }
                        Err(err) => {
                            let _ = rows.close();
                            pending.push_back(Pending::Failed(err));
                        }
                    }
                }
            }
        }

        let mut set = Self {
            current: None,
            pending,
            state: State::Iterating,
            err: None,
            close_err,
            closed: false,
        };
        match set.pending.pop_front() {
            Some(Pending::Rows(first)) => set.current = Some(first),
            Some(Pending::Failed(err)) => {
                set.state = State::Errored;
                let _ = set.close();
                return Err(err);
            }
            None => set.state = State::Exhausted,
        }
        Ok(set)
    }

    /// Column names of the current result set.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        self.current
            .as_ref()
            .map_or(&[][..], |c| c.schema.as_slice())
    }

    /// Next row of the current result set.
    ///
    /// # Errors
    /// Returns the translated engine error if producing the row fails; it is also kept for
    /// [`ResultSet::err`].
    pub fn next_row(&mut self) -> Result<Option<Row>, DriverError> {
        let Some(current) = self.current.as_mut() else {
            return Ok(None);
        };
        match current.rows.next() {
            Ok(Some(values)) => Ok(Some(Row::with_index(
                Arc::clone(&current.schema),
                Arc::clone(&current.index),
                values,
            ))),
            Ok(None) => Ok(None),
            Err(e) => {
                let err = translate(e);
                self.err = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Copy the next row's values into `dest`. Returns false when the current result set is
    /// finished or failed; check [`ResultSet::err`] to tell them apart.
    pub fn next(&mut self, dest: &mut Vec<RowValues>) -> bool {
        match self.next_row() {
            Ok(Some(row)) => {
                dest.clear();
                dest.extend(row.into_values());
                true
            }
            Ok(None) | Err(_) => false,
        }
    }

    /// Drain the rest of the current result set.
    ///
    /// # Errors
    /// Returns the first error raised while reading rows.
    pub fn collect_rows(&mut self) -> Result<RowSet, DriverError> {
        let mut set = RowSet::new(
            self.current
                .as_ref()
                .map(|c| Arc::clone(&c.schema))
                .unwrap_or_default(),
        );
        while let Some(row) = self.next_row()? {
            set.push(row);
        }
        Ok(set)
    }

    #[must_use]
    pub fn has_next_result_set(&self) -> bool {
        self.state == State::Iterating && !self.pending.is_empty()
    }

    /// Advance to the next statement's result set.
    ///
    /// Returns `Ok(false)` when there are no more result sets.
    ///
    /// # Errors
    /// Returns the failure of the statement that owns the next slot. After that every further
    /// call returns `Ok(false)`.
    pub fn next_result_set(&mut self) -> Result<bool, DriverError> {
        if self.state != State::Iterating {
            return Ok(false);
        }
        if let Some(mut current) = self.current.take()
            && let Err(e) = current.rows.close()
        {
            self.close_err.get_or_insert(translate(e));
        }
        match self.pending.pop_front() {
            Some(Pending::Rows(next)) => {
                self.current = Some(next);
                Ok(true)
            }
            Some(Pending::Failed(err)) => {
                debug!(error = %err, "batch stopped at failed statement");
                self.state = State::Errored;
                self.err = Some(err.clone());
                Err(err)
            }
            None => {
                self.state = State::Exhausted;
                Ok(false)
            }
        }
    }

    /// Error that ended iteration, if any.
    #[must_use]
    pub fn err(&self) -> Option<&DriverError> {
        self.err.as_ref()
    }

    /// Close every remaining row iterator. Idempotent.
    ///
    /// # Errors
    /// Returns the first close failure after all iterators were attempted.
    pub fn close(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut first = self.close_err.take();
        let remaining = self
            .current
            .take()
            .into_iter()
            .chain(self.pending.drain(..).filter_map(|p| match p {
                Pending::Rows(rows) => Some(rows),
                Pending::Failed(_) => None,
            }));
        for mut surfaced in remaining {
            if let Err(e) = surfaced.rows.close() {
                first.get_or_insert(translate(e));
            }
        }
        if self.state == State::Iterating {
            self.state = State::Exhausted;
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for ResultSet {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("columns", &self.columns())
            .field("pending", &self.pending.len())
            .field("state", &self.state)
            .field("err", &self.err)
            .finish()
    }
}
