#![forbid(unsafe_code)]

use crate::block::{clip, BlockDescriptor, BlockKind, BlockRef, ReadWriteMode};
use crate::dictionary::{DataDictionary, FeatureInfo, FeatureKind};
use crate::element::Element;
use crate::error::{Result, TableError};
use crate::scoped::{ReadBlock, WriteBlock};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who owns the memory behind a table's buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryStatus {
    #[default]
    NotAllocated,
    /// Bound to caller-supplied memory; never freed by the table.
    UserAllocated,
    InternallyAllocated,
}

/// Physical layout tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageLayout {
    /// Homogeneous row-major array.
    Dense,
    Csr,
    UpperPackedSymmetric,
    LowerPackedSymmetric,
    UpperPackedTriangular,
    LowerPackedTriangular,
}

impl StorageLayout {
    pub(crate) fn tag(self) -> u8 {
        match self {
            StorageLayout::Dense => 0,
            StorageLayout::Csr => 1,
            StorageLayout::UpperPackedSymmetric => 2,
            StorageLayout::LowerPackedSymmetric => 3,
            StorageLayout::UpperPackedTriangular => 4,
            StorageLayout::LowerPackedTriangular => 5,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => StorageLayout::Dense,
            1 => StorageLayout::Csr,
            2 => StorageLayout::UpperPackedSymmetric,
            3 => StorageLayout::LowerPackedSymmetric,
            4 => StorageLayout::UpperPackedTriangular,
            5 => StorageLayout::LowerPackedTriangular,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Normalization {
    #[default]
    NonNormalized,
    StandardScoreNormalized,
}

/// Whether a constructor allocates the data buffer up front.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AllocationFlag {
    #[default]
    DoNotAllocate,
    DoAllocate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableOptions {
    pub allocation: AllocationFlag,
    pub normalization: Normalization,
}

impl TableOptions {
    pub fn allocated() -> Self {
        Self {
            allocation: AllocationFlag::DoAllocate,
            ..Self::default()
        }
    }
}

/// State shared by every layout: shape, dictionary and memory status.
#[derive(Clone, Debug, PartialEq)]
pub struct TableCore {
    dictionary: DataDictionary,
    n_rows: usize,
    memory_status: MemoryStatus,
    layout: StorageLayout,
    normalization: Normalization,
}

impl TableCore {
    pub(crate) fn new(
        dictionary: DataDictionary,
        n_rows: usize,
        layout: StorageLayout,
        normalization: Normalization,
    ) -> Self {
        Self {
            dictionary,
            n_rows,
            memory_status: MemoryStatus::NotAllocated,
            layout,
            normalization,
        }
    }

    pub fn dictionary(&self) -> &DataDictionary {
        &self.dictionary
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.dictionary.len()
    }

    pub fn memory_status(&self) -> MemoryStatus {
        self.memory_status
    }

    pub fn layout(&self) -> StorageLayout {
        self.layout
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    pub fn set_normalization(&mut self, normalization: Normalization) {
        self.normalization = normalization;
    }

    /// Change the statistical kind of a feature. The storage type is fixed by the layout.
    pub fn set_feature_kind(
        &mut self,
        feature: usize,
        kind: FeatureKind,
        category_count: usize,
    ) -> Result<()> {
        let n_columns = self.n_columns();
        let info = *self
            .dictionary
            .feature(feature)
            .ok_or(TableError::FeatureIndexOutOfRange { feature, n_columns })?;
        self.dictionary.set_feature(
            feature,
            FeatureInfo {
                kind,
                category_count,
                ..info
            },
        )
    }

    pub(crate) fn set_n_rows(&mut self, n_rows: usize) {
        self.n_rows = n_rows;
    }

    pub(crate) fn set_memory_status(&mut self, status: MemoryStatus) {
        self.memory_status = status;
    }

    /// Called after a write: once every user-supplied buffer has been copied into table-owned
    /// memory, the table is internally allocated.
    pub(crate) fn note_detached(&mut self, all_owned: bool) {
        if all_owned && self.memory_status == MemoryStatus::UserAllocated {
            self.memory_status = MemoryStatus::InternallyAllocated;
        }
    }

    pub(crate) fn reset_dictionary(&mut self, n_columns: usize, info: FeatureInfo) {
        self.dictionary.reset(n_columns);
        self.dictionary.set_all_features(info);
    }

    pub(crate) fn is_allocated(&self) -> bool {
        self.memory_status != MemoryStatus::NotAllocated
    }

    /// Start a row-block acquisition: clip the range, record it on the descriptor and report the
    /// number of rows that will actually be served.
    pub(crate) fn begin_rows<T: Element>(
        &self,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: &mut BlockDescriptor<T>,
    ) -> Result<usize> {
        let n = clip(row, n, self.n_rows);
        let n_columns = if n == 0 { 0 } else { self.n_columns() };
        block.begin(BlockKind::Rows, row, 0, n, n_columns, mode);
        if n > 0 && !self.is_allocated() {
            block.reset();
            return Err(TableError::NotAllocated);
        }
        Ok(n)
    }

    pub(crate) fn begin_column<T: Element>(
        &self,
        feature: usize,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: &mut BlockDescriptor<T>,
    ) -> Result<usize> {
        let n = if feature < self.n_columns() {
            clip(row, n, self.n_rows)
        } else {
            0
        };
        block.begin(
            BlockKind::ColumnValues,
            row,
            feature,
            n,
            usize::from(n > 0),
            mode,
        );
        if n > 0 && !self.is_allocated() {
            block.reset();
            return Err(TableError::NotAllocated);
        }
        Ok(n)
    }
}

/// Element count of an `n_rows x n_columns` row-major buffer. A shape whose count does not fit in
/// `usize` can never be allocated.
pub(crate) fn cell_count(n_rows: usize, n_columns: usize) -> Result<usize> {
    n_rows
        .checked_mul(n_columns)
        .ok_or(TableError::MemoryAllocationFailed { bytes: usize::MAX })
}

/// Metadata and memory management shared by every table layout.
pub trait TableIface: fmt::Debug {
    fn core(&self) -> &TableCore;

    fn core_mut(&mut self) -> &mut TableCore;

    fn dictionary(&self) -> &DataDictionary {
        self.core().dictionary()
    }

    fn n_rows(&self) -> usize {
        self.core().n_rows()
    }

    fn n_columns(&self) -> usize {
        self.core().n_columns()
    }

    fn memory_status(&self) -> MemoryStatus {
        self.core().memory_status()
    }

    fn layout(&self) -> StorageLayout {
        self.core().layout()
    }

    fn normalization(&self) -> Normalization {
        self.core().normalization()
    }

    /// Allocate table-owned memory for the current shape, replacing any bound buffer.
    fn allocate_data_memory(&mut self) -> Result<()>;

    /// Drop the table's handle on its buffers. Caller-supplied memory is left untouched.
    fn free_data_memory(&mut self);

    /// Change the row count. Growing a table-owned buffer reallocates it; shrinking never does.
    fn resize(&mut self, n_rows: usize) -> Result<()>;

    /// Change the column count, resetting the dictionary and freeing the data.
    fn set_number_of_columns(&mut self, n_columns: usize) -> Result<()>;

    /// Validate the structural invariants of the table.
    fn check(&self) -> Result<()>;
}

/// Row-block and column-block access, object safe through [`BlockRef`].
///
/// Kernels normally go through the typed wrappers of [`NumericTableExt`].
pub trait DenseAccess {
    fn acquire_rows(
        &self,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: BlockRef<'_>,
    ) -> Result<()>;

    fn release_rows(&mut self, block: BlockRef<'_>) -> Result<()>;

    fn acquire_column(
        &self,
        feature: usize,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: BlockRef<'_>,
    ) -> Result<()>;

    fn release_column(&mut self, block: BlockRef<'_>) -> Result<()>;
}

/// A table usable by numeric kernels.
pub trait NumericTable: TableIface + DenseAccess {}

impl<N: TableIface + DenseAccess + ?Sized> NumericTable for N {}

/// Typed block access and the conveniences built on top of it.
pub trait NumericTableExt: NumericTable {
    /// Acquire rows `[row, row + n)` converted to `T`. The range is clipped to the table.
    fn get_block_of_rows<T: Element>(
        &self,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: &mut BlockDescriptor<T>,
    ) -> Result<()> {
        self.acquire_rows(row, n, mode, T::block_ref(block))
    }

    fn release_block_of_rows<T: Element>(&mut self, block: &mut BlockDescriptor<T>) -> Result<()> {
        self.release_rows(T::block_ref(block))
    }

    /// Acquire `n` values of feature `feature` starting at `row`, converted to `T`.
    fn get_block_of_column_values<T: Element>(
        &self,
        feature: usize,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: &mut BlockDescriptor<T>,
    ) -> Result<()> {
        self.acquire_column(feature, row, n, mode, T::block_ref(block))
    }

    fn release_block_of_column_values<T: Element>(
        &mut self,
        block: &mut BlockDescriptor<T>,
    ) -> Result<()> {
        self.release_column(T::block_ref(block))
    }

    fn read_rows<'a, T: Element>(
        &'a self,
        row: usize,
        n: usize,
        block: &'a mut BlockDescriptor<T>,
    ) -> Result<ReadBlock<'a, T>> {
        self.get_block_of_rows(row, n, ReadWriteMode::ReadOnly, block)?;
        Ok(ReadBlock::new(block))
    }

    fn write_rows<'a, T: Element>(
        &'a mut self,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: &'a mut BlockDescriptor<T>,
    ) -> Result<WriteBlock<'a, Self, T>> {
        self.get_block_of_rows(row, n, mode, block)?;
        Ok(WriteBlock::new(self, block))
    }

    fn read_column<'a, T: Element>(
        &'a self,
        feature: usize,
        row: usize,
        n: usize,
        block: &'a mut BlockDescriptor<T>,
    ) -> Result<ReadBlock<'a, T>> {
        self.get_block_of_column_values(feature, row, n, ReadWriteMode::ReadOnly, block)?;
        Ok(ReadBlock::new(block))
    }

    fn write_column<'a, T: Element>(
        &'a mut self,
        feature: usize,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: &'a mut BlockDescriptor<T>,
    ) -> Result<WriteBlock<'a, Self, T>> {
        self.get_block_of_column_values(feature, row, n, mode, block)?;
        Ok(WriteBlock::new(self, block))
    }

    /// Set every cell to `value`.
    fn assign<T: Element>(&mut self, value: T) -> Result<()> {
        let n_rows = self.n_rows();
        let mut block = BlockDescriptor::<T>::new();
        let mut rows = self.write_rows(0, n_rows, ReadWriteMode::WriteOnly, &mut block)?;
        rows.as_mut_slice().fill(value);
        rows.finish()
    }

    /// Read the cell at (`column`, `row`) converted to `T`.
    fn get_value<T: Element>(&self, column: usize, row: usize) -> Result<T> {
        let mut block = BlockDescriptor::<T>::new();
        let cell = self.read_column(column, row, 1, &mut block)?;
        cell.as_slice()
            .first()
            .copied()
            .ok_or(TableError::IndexOutOfRange {
                row,
                column,
                n_rows: self.n_rows(),
                n_columns: self.n_columns(),
            })
    }

    fn set_value<T: Element>(&mut self, column: usize, row: usize, value: T) -> Result<()> {
        let (n_rows, n_columns) = (self.n_rows(), self.n_columns());
        let mut block = BlockDescriptor::<T>::new();
        let mut cell = self.write_column(column, row, 1, ReadWriteMode::WriteOnly, &mut block)?;
        let written = match cell.as_mut_slice().first_mut() {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        };
        cell.finish()?;
        if !written {
            return Err(TableError::IndexOutOfRange {
                row,
                column,
                n_rows,
                n_columns,
            });
        }
        Ok(())
    }
}

impl<N: NumericTable + ?Sized> NumericTableExt for N {}
