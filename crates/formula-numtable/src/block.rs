#![forbid(unsafe_code)]

use crate::element::Element;
use crate::error::{Result, TableError};
use crate::storage::Storage;
use std::sync::Arc;

/// Access intent of a block acquisition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ReadWriteMode {
    #[default]
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl ReadWriteMode {
    pub fn reads(self) -> bool {
        matches!(self, ReadWriteMode::ReadOnly | ReadWriteMode::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, ReadWriteMode::WriteOnly | ReadWriteMode::ReadWrite)
    }
}

/// Which accessor produced a descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlockKind {
    #[default]
    Rows,
    ColumnValues,
}

#[derive(Clone, Debug, Default)]
pub(crate) enum BlockData {
    #[default]
    Empty,
    /// Zero-copy view into a table buffer.
    Aliased {
        storage: Arc<Storage>,
        start: usize,
        len: usize,
    },
    /// The values live in the descriptor's scratch vector.
    Scratch,
}

/// Caller-owned, reusable handle describing one acquired block.
///
/// A descriptor is filled by a `get_block_of_*` call and must be handed back to the matching
/// `release_block_of_*` call. Between the two, [`BlockDescriptor::as_slice`] exposes the values in
/// row-major order (`n_rows * n_columns` elements for a row block, `n_rows` for a column block).
///
/// When the requested type matches the storage type and the region is contiguous, a read-only
/// descriptor aliases the table buffer. Otherwise the values are converted into a scratch vector
/// owned by the descriptor; its capacity is kept across acquisitions.
#[derive(Clone, Debug, Default)]
pub struct BlockDescriptor<T: Element> {
    kind: BlockKind,
    row_offset: usize,
    column_offset: usize,
    n_rows: usize,
    n_columns: usize,
    mode: ReadWriteMode,
    data: BlockData,
    scratch: Vec<T>,
}

impl<T: Element> BlockDescriptor<T> {
    pub fn new() -> Self {
        Self {
            kind: BlockKind::Rows,
            row_offset: 0,
            column_offset: 0,
            n_rows: 0,
            n_columns: 0,
            mode: ReadWriteMode::ReadOnly,
            data: BlockData::Empty,
            scratch: Vec::new(),
        }
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn row_offset(&self) -> usize {
        self.row_offset
    }

    /// Feature index of a column block; zero for row blocks.
    pub fn column_offset(&self) -> usize {
        self.column_offset
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.n_columns
    }

    pub fn mode(&self) -> ReadWriteMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.n_rows * self.n_columns
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the descriptor is a zero-copy view of the table buffer.
    pub fn is_aliased(&self) -> bool {
        matches!(self.data, BlockData::Aliased { .. })
    }

    /// Capacity of the scratch buffer retained for reuse.
    pub fn scratch_capacity(&self) -> usize {
        self.scratch.capacity()
    }

    pub fn as_slice(&self) -> &[T] {
        match &self.data {
            BlockData::Empty => &[],
            BlockData::Aliased {
                storage,
                start,
                len,
            } => T::view(storage)
                .map(|values| &values[*start..*start + *len])
                .unwrap_or(&[]),
            BlockData::Scratch => &self.scratch,
        }
    }

    /// Mutable view of the block values.
    ///
    /// An aliasing descriptor is first copied into its scratch buffer, so writes through a
    /// read-only block never reach the table.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        if self.is_aliased() {
            if let BlockData::Aliased {
                storage,
                start,
                len,
            } = std::mem::replace(&mut self.data, BlockData::Scratch)
            {
                self.scratch.clear();
                if let Some(values) = T::view(&storage) {
                    self.scratch.extend_from_slice(&values[start..start + len]);
                }
            }
        }
        match self.data {
            BlockData::Scratch => &mut self.scratch,
            _ => &mut [],
        }
    }

    /// Row `row` (relative to the block start) of a row block.
    pub fn row(&self, row: usize) -> &[T] {
        let start = row * self.n_columns;
        self.as_slice().get(start..start + self.n_columns).unwrap_or(&[])
    }

    pub(crate) fn begin(
        &mut self,
        kind: BlockKind,
        row_offset: usize,
        column_offset: usize,
        n_rows: usize,
        n_columns: usize,
        mode: ReadWriteMode,
    ) {
        self.kind = kind;
        self.row_offset = row_offset;
        self.column_offset = column_offset;
        self.n_rows = n_rows;
        self.n_columns = n_columns;
        self.mode = mode;
        self.data = BlockData::Empty;
    }

    pub(crate) fn alias(&mut self, storage: Arc<Storage>, start: usize) {
        self.data = BlockData::Aliased {
            storage,
            start,
            len: self.len(),
        };
    }

    /// Clear the scratch buffer and make room for the block, reusing capacity when possible.
    pub(crate) fn scratch(&mut self) -> Result<&mut Vec<T>> {
        let len = self.len();
        self.scratch.clear();
        if self.scratch.try_reserve(len).is_err() {
            let bytes = len.saturating_mul(std::mem::size_of::<T>());
            self.reset();
            return Err(TableError::MemoryAllocationFailed { bytes });
        }
        self.data = BlockData::Scratch;
        log::trace!(
            "converting block: {} elements of {:?}",
            len,
            T::DATA_TYPE
        );
        Ok(&mut self.scratch)
    }

    /// Scratch buffer filled with zeros, for write-only and densifying acquisitions.
    pub(crate) fn zeroed_scratch(&mut self) -> Result<&mut Vec<T>> {
        let len = self.len();
        let scratch = self.scratch()?;
        scratch.resize(len, T::default());
        Ok(scratch)
    }

    /// Values to write back on release, if the descriptor carries write intent.
    pub(crate) fn pending_write(&self) -> Option<&[T]> {
        match self.data {
            BlockData::Scratch if self.mode.writes() => Some(&self.scratch),
            _ => None,
        }
    }

    /// Return to the empty state, keeping scratch capacity.
    pub fn reset(&mut self) {
        self.n_rows = 0;
        self.n_columns = 0;
        self.row_offset = 0;
        self.column_offset = 0;
        self.data = BlockData::Empty;
        self.scratch.clear();
    }
}

/// Type-erased mutable reference to a descriptor, used at object-safe table boundaries.
#[derive(Debug)]
pub enum BlockRef<'a> {
    I32(&'a mut BlockDescriptor<i32>),
    F32(&'a mut BlockDescriptor<f32>),
    F64(&'a mut BlockDescriptor<f64>),
}

/// Run `$body` with `$block` bound to the typed descriptor inside a [`BlockRef`].
macro_rules! with_block {
    ($block:expr, $b:ident => $body:expr) => {
        match $block {
            $crate::block::BlockRef::I32($b) => $body,
            $crate::block::BlockRef::F32($b) => $body,
            $crate::block::BlockRef::F64($b) => $body,
        }
    };
}
pub(crate) use with_block;

/// Clip a requested `[offset, offset + n)` range to `[0, total)`.
///
/// Requests starting at or past the end yield a zero-length range.
pub(crate) fn clip(offset: usize, n: usize, total: usize) -> usize {
    if offset >= total {
        0
    } else {
        n.min(total - offset)
    }
}
