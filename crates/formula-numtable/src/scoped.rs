#![forbid(unsafe_code)]

//! Scoped block acquisition.
//!
//! The raw `get_block_of_*` / `release_block_of_*` pair must be balanced on every exit path. The
//! guards here tie the release to the guard's lifetime instead:
//! - [`ReadBlock`] borrows the table shared. Releasing a read-only block never touches the table,
//!   so dropping the guard only resets the descriptor.
//! - [`WriteBlock`] borrows the table exclusively and writes the block back on
//!   [`WriteBlock::finish`], which reports the release status. A guard dropped without `finish`
//!   (for example on an early `?` return) still releases; a failure there is logged.

use crate::block::{BlockDescriptor, BlockKind};
use crate::element::Element;
use crate::error::Result;
use crate::table::NumericTable;
use std::ops::Deref;

pub struct ReadBlock<'a, T: Element> {
    block: &'a mut BlockDescriptor<T>,
}

impl<'a, T: Element> ReadBlock<'a, T> {
    pub(crate) fn new(block: &'a mut BlockDescriptor<T>) -> Self {
        Self { block }
    }
}

impl<T: Element> Deref for ReadBlock<'_, T> {
    type Target = BlockDescriptor<T>;

    fn deref(&self) -> &Self::Target {
        self.block
    }
}

impl<T: Element> Drop for ReadBlock<'_, T> {
    fn drop(&mut self) {
        self.block.reset();
    }
}

pub struct WriteBlock<'a, N: NumericTable + ?Sized, T: Element> {
    table: &'a mut N,
    block: &'a mut BlockDescriptor<T>,
    released: bool,
}

impl<'a, N: NumericTable + ?Sized, T: Element> WriteBlock<'a, N, T> {
    pub(crate) fn new(table: &'a mut N, block: &'a mut BlockDescriptor<T>) -> Self {
        Self {
            table,
            block,
            released: false,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.block.as_mut_slice()
    }

    /// Release the block, writing it back if it was acquired with write intent.
    pub fn finish(mut self) -> Result<()> {
        self.released = true;
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        let kind = self.block.kind();
        let block = T::block_ref(self.block);
        match kind {
            BlockKind::Rows => self.table.release_rows(block),
            BlockKind::ColumnValues => self.table.release_column(block),
        }
    }
}

impl<N: NumericTable + ?Sized, T: Element> Deref for WriteBlock<'_, N, T> {
    type Target = BlockDescriptor<T>;

    fn deref(&self) -> &Self::Target {
        self.block
    }
}

impl<N: NumericTable + ?Sized, T: Element> Drop for WriteBlock<'_, N, T> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.release() {
            log::warn!("implicit release of a {:?} block failed: {err}", self.block.kind());
        }
    }
}
