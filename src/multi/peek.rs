use crate::engine::{EngineError, RowIter};
use crate::types::RowValues;

/// A row iterator with a single-slot lookahead buffer.
///
/// `peek` fills the slot from the inner iterator when it is empty; `next` drains the slot
/// before reading further, so interleaved calls never reorder rows.
pub(crate) struct PeekableRows {
    inner: Box<dyn RowIter>,
    slot: Option<Vec<RowValues>>,
    exhausted: bool,
}

impl PeekableRows {
    pub(crate) fn new(inner: Box<dyn RowIter>) -> Self {
        Self {
            inner,
            slot: None,
            exhausted: false,
        }
    }

    pub(crate) fn peek(&mut self) -> Result<Option<&Vec<RowValues>>, EngineError> {
        if self.slot.is_none() && !self.exhausted {
            self.slot = self.inner.next()?;
            self.exhausted = self.slot.is_none();
        }
        Ok(self.slot.as_ref())
    }
}

impl RowIter for PeekableRows {
    fn next(&mut self) -> Result<Option<Vec<RowValues>>, EngineError> {
        if let Some(row) = self.slot.take() {
            return Ok(Some(row));
        }
        if self.exhausted {
            return Ok(None);
        }
        let row = self.inner.next()?;
        self.exhausted = row.is_none();
        Ok(row)
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.slot = None;
        self.exhausted = true;
        self.inner.close()
    }
}
