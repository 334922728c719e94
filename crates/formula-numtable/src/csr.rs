#![forbid(unsafe_code)]

//! Compressed sparse row layout.
//!
//! Three parallel buffers: the non-zero `values`, their one-based `column_indices`, and one-based
//! `row_offsets` with `n_rows + 1` entries. Row `r` owns
//! `values[row_offsets[r] - 1 .. row_offsets[r + 1] - 1]`.
//!
//! Dense row and column blocks are densified copies and are read-only. Kernels that understand
//! sparsity should use [`SparseAccessExt::get_sparse_block`], which hands out the raw arrays.

use crate::archive::{
    read_dictionary, read_indices, read_layout, read_len, read_storage, write_dictionary,
    write_indices, write_storage, ArchiveSerialize, InputArchive, OutputArchive,
};
use crate::block::{with_block, BlockDescriptor, BlockKind, BlockRef, ReadWriteMode};
use crate::dictionary::{DataDictionary, FeatureInfo};
use crate::element::{DataType, Element};
use crate::error::{Result, TableError};
use crate::storage::{try_resize, try_vec, with_values, Buffer, IndexBuffer, Storage};
use crate::table::{DenseAccess, MemoryStatus, StorageLayout, TableCore, TableIface, TableOptions};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

/// Index base of the CSR arrays. Only [`CsrIndexing::OneBased`] passes [`TableIface::check`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CsrIndexing {
    ZeroBased,
    #[default]
    OneBased,
}

#[derive(Clone, Debug)]
pub struct CsrNumericTable {
    core: TableCore,
    data_type: DataType,
    indexing: CsrIndexing,
    values: Option<Buffer>,
    column_indices: Option<IndexBuffer>,
    row_offsets: Option<IndexBuffer>,
}

/// Borrowed view of the three CSR arrays.
#[derive(Clone, Copy, Debug)]
struct Arrays<'a> {
    values: &'a Storage,
    column_indices: &'a [usize],
    row_offsets: &'a [usize],
}

impl Arrays<'_> {
    fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Zero-based value range of `row`.
    fn row_span(&self, row: usize) -> Result<Range<usize>> {
        let (Some(&begin), Some(&end)) = (self.row_offsets.get(row), self.row_offsets.get(row + 1))
        else {
            return Err(TableError::InvalidCsrStructure(format!(
                "no row offsets for row {row}"
            )));
        };
        if begin == 0 || end < begin || end - 1 > self.nnz().min(self.column_indices.len()) {
            return Err(TableError::InvalidCsrStructure(format!(
                "row {row} spans offsets {begin}..{end} over {} values",
                self.nnz()
            )));
        }
        Ok(begin - 1..end - 1)
    }

    /// Zero-based value range of rows `[row, row + n)`, with `n > 0`. The offsets of the rows in
    /// between must not decrease.
    fn rows_span(&self, row: usize, n: usize) -> Result<Range<usize>> {
        let first = self.row_span(row)?.start;
        let end = self.row_span(row + n - 1)?.end;
        if let Some(r) = self.row_offsets[row..=row + n]
            .windows(2)
            .position(|w| w[1] < w[0])
        {
            return Err(TableError::InvalidCsrStructure(format!(
                "row offsets decrease at row {}",
                row + r
            )));
        }
        Ok(first..end)
    }
}

impl CsrNumericTable {
    /// An empty table; bind arrays with [`CsrNumericTable::set_arrays`] or allocate them with
    /// [`CsrNumericTable::allocate_data_memory_for`]. `options.allocation` is ignored since the
    /// number of stored values is not known yet.
    pub fn new(data_type: DataType, n_columns: usize, n_rows: usize, options: TableOptions) -> Self {
        Self {
            core: TableCore::new(
                DataDictionary::with_uniform_type(n_columns, data_type),
                n_rows,
                StorageLayout::Csr,
                options.normalization,
            ),
            data_type,
            indexing: CsrIndexing::OneBased,
            values: None,
            column_indices: None,
            row_offsets: None,
        }
    }

    /// Take ownership of the three arrays.
    pub fn from_arrays<T: Element>(
        values: Vec<T>,
        column_indices: Vec<usize>,
        row_offsets: Vec<usize>,
        n_columns: usize,
        n_rows: usize,
        indexing: CsrIndexing,
    ) -> Result<Self> {
        check_lengths(values.len(), column_indices.len(), row_offsets.len(), n_rows)?;
        let mut table = Self::new(T::DATA_TYPE, n_columns, n_rows, TableOptions::default());
        table.indexing = indexing;
        table.values = Some(Buffer::owned(T::into_storage(values)));
        table.column_indices = Some(IndexBuffer::owned(column_indices));
        table.row_offsets = Some(IndexBuffer::owned(row_offsets));
        table
            .core
            .set_memory_status(MemoryStatus::InternallyAllocated);
        Ok(table)
    }

    /// Bind caller-owned arrays. The table never frees them.
    pub fn from_shared(
        values: Arc<Storage>,
        column_indices: Arc<Vec<usize>>,
        row_offsets: Arc<Vec<usize>>,
        n_columns: usize,
        n_rows: usize,
        indexing: CsrIndexing,
    ) -> Result<Self> {
        let mut table = Self::new(values.data_type(), n_columns, n_rows, TableOptions::default());
        table.set_arrays(values, column_indices, row_offsets, indexing)?;
        Ok(table)
    }

    /// Bind caller-owned arrays. Sparse value write-back copies the values array while the caller
    /// still holds a handle; the table counts as internally allocated once all three arrays have
    /// been copied, e.g. through [`CsrNumericTable::arrays_mut`].
    pub fn set_arrays(
        &mut self,
        values: Arc<Storage>,
        column_indices: Arc<Vec<usize>>,
        row_offsets: Arc<Vec<usize>>,
        indexing: CsrIndexing,
    ) -> Result<()> {
        check_lengths(
            values.len(),
            column_indices.len(),
            row_offsets.len(),
            self.n_rows(),
        )?;
        self.free_data_memory();
        if values.data_type() != self.data_type {
            self.data_type = values.data_type();
            let n_columns = self.n_columns();
            self.core
                .reset_dictionary(n_columns, FeatureInfo::new(self.data_type));
        }
        self.indexing = indexing;
        self.values = Some(Buffer::borrowed(values));
        self.column_indices = Some(IndexBuffer::borrowed(column_indices));
        self.row_offsets = Some(IndexBuffer::borrowed(row_offsets));
        self.core.set_memory_status(MemoryStatus::UserAllocated);
        Ok(())
    }

    /// Allocate zeroed arrays for `nnz` values. Every row starts out empty except the last, which
    /// the caller is expected to fill in through [`CsrNumericTable::arrays_mut`].
    pub fn allocate_data_memory_for(&mut self, nnz: usize) -> Result<()> {
        let values = Storage::zeroed(self.data_type, nnz)?;
        let column_indices = try_vec(nnz, 1usize)?;
        let mut row_offsets = try_vec(self.n_rows().saturating_add(1), 1usize)?;
        if let Some(last) = row_offsets.last_mut() {
            *last = nnz + 1;
        }
        self.free_data_memory();
        log::debug!(
            "allocated CSR arrays: {} rows, {nnz} values of {:?}",
            self.n_rows(),
            self.data_type
        );
        self.indexing = CsrIndexing::OneBased;
        self.values = Some(Buffer::owned(values));
        self.column_indices = Some(IndexBuffer::owned(column_indices));
        self.row_offsets = Some(IndexBuffer::owned(row_offsets));
        self.core
            .set_memory_status(MemoryStatus::InternallyAllocated);
        Ok(())
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn indexing(&self) -> CsrIndexing {
        self.indexing
    }

    /// Number of stored values.
    pub fn data_size(&self) -> usize {
        self.values.as_ref().map_or(0, |v| v.get().len())
    }

    /// The raw arrays, if `T` is the storage type.
    pub fn arrays<T: Element>(&self) -> Option<(&[T], &[usize], &[usize])> {
        let values = T::view(self.values.as_ref()?.get())?;
        Some((
            values,
            self.column_indices.as_ref()?.get(),
            self.row_offsets.as_ref()?.get(),
        ))
    }

    /// Mutable raw arrays. Buffers shared with outstanding descriptors or with the caller are
    /// copied first.
    pub fn arrays_mut(&mut self) -> Option<(&mut Storage, &mut Vec<usize>, &mut Vec<usize>)> {
        if let (Some(values), Some(columns), Some(rows)) = (
            &mut self.values,
            &mut self.column_indices,
            &mut self.row_offsets,
        ) {
            values.make_mut();
            columns.make_mut();
            rows.make_mut();
        }
        self.note_detached();
        match (
            &mut self.values,
            &mut self.column_indices,
            &mut self.row_offsets,
        ) {
            (Some(values), Some(columns), Some(rows)) => {
                Some((values.make_mut(), columns.make_mut(), rows.make_mut()))
            }
            _ => None,
        }
    }

    fn note_detached(&mut self) {
        let all_owned = self.values.as_ref().is_some_and(Buffer::is_owned)
            && self.column_indices.as_ref().is_some_and(IndexBuffer::is_owned)
            && self.row_offsets.as_ref().is_some_and(IndexBuffer::is_owned);
        self.core.note_detached(all_owned);
    }

    fn raw(&self) -> Result<Arrays<'_>> {
        match (&self.values, &self.column_indices, &self.row_offsets) {
            (Some(values), Some(column_indices), Some(row_offsets)) => Ok(Arrays {
                values: values.get(),
                column_indices: column_indices.get(),
                row_offsets: row_offsets.get(),
            }),
            _ => Err(TableError::NotAllocated),
        }
    }

    /// Arrays ready for access; kernels assume one-based offsets.
    fn accessible(&self) -> Result<Arrays<'_>> {
        if self.indexing != CsrIndexing::OneBased {
            return Err(TableError::UnsupportedIndexing(self.indexing));
        }
        self.raw()
    }

    fn rows_into<T: Element>(
        &self,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: &mut BlockDescriptor<T>,
    ) -> Result<()> {
        if mode.writes() {
            block.reset();
            return Err(TableError::unsupported("dense row block write", StorageLayout::Csr));
        }
        let n = self.core.begin_rows(row, n, mode, block)?;
        if n == 0 {
            return Ok(());
        }
        let n_columns = self.n_columns();
        let result = self.accessible().and_then(|arrays| {
            let out = block.zeroed_scratch()?;
            with_values!(arrays.values, values => {
                densify_rows(values, &arrays, row, n, n_columns, out)
            })
        });
        if result.is_err() {
            block.reset();
        }
        result
    }

    fn column_into<T: Element>(
        &self,
        feature: usize,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: &mut BlockDescriptor<T>,
    ) -> Result<()> {
        if mode.writes() {
            block.reset();
            return Err(TableError::unsupported("column block write", StorageLayout::Csr));
        }
        let n = self.core.begin_column(feature, row, n, mode, block)?;
        if n == 0 {
            return Ok(());
        }
        let result = self.accessible().and_then(|arrays| {
            let out = block.scratch()?;
            with_values!(arrays.values, values => {
                gather_column(values, &arrays, feature, row, n, out)
            })
        });
        if result.is_err() {
            block.reset();
        }
        result
    }

    fn sparse_into<T: Element>(
        &self,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: &mut CsrBlockDescriptor<T>,
    ) -> Result<()> {
        block.reset();
        let n = crate::block::clip(row, n, self.n_rows());
        if n == 0 {
            return Ok(());
        }
        let (Some(values), Some(column_indices), Some(row_offsets)) =
            (&self.values, &self.column_indices, &self.row_offsets)
        else {
            return Err(TableError::NotAllocated);
        };
        let arrays = self.accessible()?;
        let span = arrays.rows_span(row, n)?;
        let (first, nnz) = (span.start, span.len());

        block.row_offset = row;
        block.n_rows = n;
        block.n_columns = self.n_columns();
        block.mode = mode;
        block.value_start = first;
        block
            .values
            .begin(BlockKind::Rows, first, 0, nnz, 1, mode);
        let filled = if !mode.writes() && values.get().data_type() == T::DATA_TYPE {
            block.values.alias(values.shared(), first);
            Ok(())
        } else if mode.reads() {
            block
                .values
                .scratch()
                .map(|out| values.get().read_range(first, nnz, out))
        } else {
            block.values.zeroed_scratch().map(|_| ())
        };
        if let Err(err) = filled {
            block.reset();
            return Err(err);
        }

        block.column_indices = IndexData::Aliased {
            data: column_indices.shared(),
            start: first,
            len: nnz,
        };
        block.row_offsets = if arrays.row_offsets[row] == 1 {
            IndexData::Aliased {
                data: row_offsets.shared(),
                start: row,
                len: n + 1,
            }
        } else {
            // Rebase so the block's own offsets start at 1.
            let base = first;
            IndexData::Owned(
                arrays.row_offsets[row..=row + n]
                    .iter()
                    .map(|&offset| offset - base)
                    .collect(),
            )
        };
        Ok(())
    }

    fn release_sparse_impl<T: Element>(&mut self, block: &mut CsrBlockDescriptor<T>) -> Result<()> {
        let result = match (block.values.pending_write(), &mut self.values) {
            (Some(written), Some(values)) if !written.is_empty() => {
                let storage = values.make_mut();
                if block.value_start + written.len() > storage.len() {
                    Err(TableError::DimensionMismatch {
                        what: "sparse block values",
                        expected: storage.len(),
                        actual: block.value_start + written.len(),
                    })
                } else {
                    storage.write_range(block.value_start, written);
                    Ok(())
                }
            }
            (Some(written), None) if !written.is_empty() => Err(TableError::NotAllocated),
            _ => Ok(()),
        };
        block.reset();
        self.note_detached();
        result
    }
}

fn check_lengths(n_values: usize, n_indices: usize, n_offsets: usize, n_rows: usize) -> Result<()> {
    if n_values != n_indices {
        return Err(TableError::DimensionMismatch {
            what: "column indices",
            expected: n_values,
            actual: n_indices,
        });
    }
    let expected = n_rows.saturating_add(1);
    if n_offsets != expected {
        return Err(TableError::DimensionMismatch {
            what: "row offsets",
            expected,
            actual: n_offsets,
        });
    }
    Ok(())
}

/// Scatter the sparse entries of rows `[row, row + n)` into the zeroed, row-major `out`.
fn densify_rows<S: Element, T: Element>(
    values: &[S],
    arrays: &Arrays<'_>,
    row: usize,
    n: usize,
    n_columns: usize,
    out: &mut [T],
) -> Result<()> {
    for i in 0..n {
        let dense_row = &mut out[i * n_columns..(i + 1) * n_columns];
        for k in arrays.row_span(row + i)? {
            let column = arrays.column_indices[k];
            if column == 0 || column > n_columns {
                return Err(TableError::InvalidCsrStructure(format!(
                    "column index {column} outside 1..={n_columns}"
                )));
            }
            dense_row[column - 1] = values[k].cast();
        }
    }
    Ok(())
}

/// Append feature `feature` of rows `[row, row + n)` to `out`, zero where no entry is stored.
fn gather_column<S: Element, T: Element>(
    values: &[S],
    arrays: &Arrays<'_>,
    feature: usize,
    row: usize,
    n: usize,
    out: &mut Vec<T>,
) -> Result<()> {
    let wanted = feature + 1;
    for r in row..row + n {
        let span = arrays.row_span(r)?;
        let value = arrays.column_indices[span.clone()]
            .iter()
            .position(|&c| c == wanted)
            .map(|pos| values[span.start + pos].cast())
            .unwrap_or_default();
        out.push(value);
    }
    Ok(())
}

impl TableIface for CsrNumericTable {
    fn core(&self) -> &TableCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TableCore {
        &mut self.core
    }

    /// Allocate arrays for the current number of stored values.
    fn allocate_data_memory(&mut self) -> Result<()> {
        self.allocate_data_memory_for(self.data_size())
    }

    fn free_data_memory(&mut self) {
        self.values = None;
        self.column_indices = None;
        self.row_offsets = None;
        self.core.set_memory_status(MemoryStatus::NotAllocated);
    }

    /// Growing appends empty rows; shrinking keeps the offsets array as is.
    fn resize(&mut self, n_rows: usize) -> Result<()> {
        let status = self.memory_status();
        if let Some(row_offsets) = &mut self.row_offsets {
            let required = n_rows + 1;
            let available = row_offsets.get().len();
            if required > available {
                if status == MemoryStatus::UserAllocated {
                    return Err(TableError::UserBufferTooSmall {
                        capacity: available,
                        required,
                    });
                }
                let offsets = row_offsets.make_mut();
                let last = offsets.last().copied().unwrap_or(1);
                try_resize(offsets, required, last)?;
                log::debug!("grew CSR row offsets to {n_rows} rows");
            }
        }
        self.core.set_n_rows(n_rows);
        Ok(())
    }

    fn set_number_of_columns(&mut self, n_columns: usize) -> Result<()> {
        self.free_data_memory();
        self.core
            .reset_dictionary(n_columns, FeatureInfo::new(self.data_type));
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.indexing != CsrIndexing::OneBased {
            return Err(TableError::UnsupportedIndexing(self.indexing));
        }
        let arrays = match self.raw() {
            Ok(arrays) => arrays,
            Err(_) if self.n_rows() == 0 => return Ok(()),
            Err(err) => return Err(err),
        };
        if arrays.column_indices.len() != arrays.nnz() {
            return Err(TableError::DimensionMismatch {
                what: "column indices",
                expected: arrays.nnz(),
                actual: arrays.column_indices.len(),
            });
        }
        let n_rows = self.n_rows();
        let Some(offsets) = arrays.row_offsets.get(..=n_rows) else {
            return Err(TableError::DimensionMismatch {
                what: "row offsets",
                expected: n_rows + 1,
                actual: arrays.row_offsets.len(),
            });
        };
        if offsets[0] != 1 {
            return Err(TableError::InvalidCsrStructure(format!(
                "first row offset is {}, expected 1",
                offsets[0]
            )));
        }
        if let Some(r) = offsets.windows(2).position(|w| w[1] < w[0]) {
            return Err(TableError::InvalidCsrStructure(format!(
                "row offsets decrease at row {r}"
            )));
        }
        let used = offsets[n_rows] - 1;
        if used > arrays.nnz() {
            return Err(TableError::InvalidCsrStructure(format!(
                "row offsets address {used} values, only {} stored",
                arrays.nnz()
            )));
        }
        let n_columns = self.n_columns();
        if let Some(&bad) = arrays.column_indices[..used]
            .iter()
            .find(|&&c| c == 0 || c > n_columns)
        {
            return Err(TableError::InvalidCsrStructure(format!(
                "column index {bad} outside 1..={n_columns}"
            )));
        }
        Ok(())
    }
}

impl DenseAccess for CsrNumericTable {
    fn acquire_rows(
        &self,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: BlockRef<'_>,
    ) -> Result<()> {
        with_block!(block, b => self.rows_into(row, n, mode, b))
    }

    fn release_rows(&mut self, block: BlockRef<'_>) -> Result<()> {
        with_block!(block, b => b.reset());
        Ok(())
    }

    fn acquire_column(
        &self,
        feature: usize,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: BlockRef<'_>,
    ) -> Result<()> {
        with_block!(block, b => self.column_into(feature, row, n, mode, b))
    }

    fn release_column(&mut self, block: BlockRef<'_>) -> Result<()> {
        with_block!(block, b => b.reset());
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
enum IndexData {
    #[default]
    Empty,
    Aliased {
        data: Arc<Vec<usize>>,
        start: usize,
        len: usize,
    },
    Owned(Vec<usize>),
}

impl IndexData {
    fn as_slice(&self) -> &[usize] {
        match self {
            IndexData::Empty => &[],
            IndexData::Aliased { data, start, len } => &data[*start..*start + *len],
            IndexData::Owned(values) => values,
        }
    }
}

/// Descriptor of a block of CSR rows in sparse form.
///
/// `row_offsets()` has `n_rows() + 1` one-based entries relative to this block's `values()`:
/// the first entry is always 1. Column indices are one-based as well.
#[derive(Clone, Debug, Default)]
pub struct CsrBlockDescriptor<T: Element> {
    row_offset: usize,
    n_rows: usize,
    n_columns: usize,
    mode: ReadWriteMode,
    value_start: usize,
    values: BlockDescriptor<T>,
    column_indices: IndexData,
    row_offsets: IndexData,
}

impl<T: Element> CsrBlockDescriptor<T> {
    pub fn new() -> Self {
        Self {
            row_offset: 0,
            n_rows: 0,
            n_columns: 0,
            mode: ReadWriteMode::ReadOnly,
            value_start: 0,
            values: BlockDescriptor::new(),
            column_indices: IndexData::Empty,
            row_offsets: IndexData::Empty,
        }
    }

    pub fn row_offset(&self) -> usize {
        self.row_offset
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

    /// Number of stored values in the block.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[T] {
        self.values.as_slice()
    }

    /// Mutable values. Only a block acquired with write intent propagates them on release.
    pub fn values_mut(&mut self) -> &mut [T] {
        self.values.as_mut_slice()
    }

    pub fn column_indices(&self) -> &[usize] {
        self.column_indices.as_slice()
    }

    pub fn row_offsets(&self) -> &[usize] {
        self.row_offsets.as_slice()
    }

    /// Whether the values are a zero-copy view of the table.
    pub fn is_aliased(&self) -> bool {
        self.values.is_aliased()
    }

    pub fn reset(&mut self) {
        self.row_offset = 0;
        self.n_rows = 0;
        self.n_columns = 0;
        self.value_start = 0;
        self.values.reset();
        self.column_indices = IndexData::Empty;
        self.row_offsets = IndexData::Empty;
    }
}

#[derive(Debug)]
pub enum CsrBlockRef<'a> {
    I32(&'a mut CsrBlockDescriptor<i32>),
    F32(&'a mut CsrBlockDescriptor<f32>),
    F64(&'a mut CsrBlockDescriptor<f64>),
}

macro_rules! with_csr_block {
    ($block:expr, $b:ident => $body:expr) => {
        match $block {
            CsrBlockRef::I32($b) => $body,
            CsrBlockRef::F32($b) => $body,
            CsrBlockRef::F64($b) => $body,
        }
    };
}

/// Native sparse access, object safe through [`CsrBlockRef`].
pub trait SparseAccess {
    fn acquire_sparse(
        &self,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: CsrBlockRef<'_>,
    ) -> Result<()>;

    fn release_sparse(&mut self, block: CsrBlockRef<'_>) -> Result<()>;
}

pub trait SparseAccessExt: SparseAccess {
    /// Acquire rows `[row, row + n)` in CSR form. Values are converted to `T` when it differs from
    /// the storage type; the sparsity structure is always read-only.
    fn get_sparse_block<T: Element>(
        &self,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: &mut CsrBlockDescriptor<T>,
    ) -> Result<()> {
        self.acquire_sparse(row, n, mode, T::csr_block_ref(block))
    }

    fn release_sparse_block<T: Element>(&mut self, block: &mut CsrBlockDescriptor<T>) -> Result<()> {
        self.release_sparse(T::csr_block_ref(block))
    }
}

impl<S: SparseAccess + ?Sized> SparseAccessExt for S {}

impl SparseAccess for CsrNumericTable {
    fn acquire_sparse(
        &self,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: CsrBlockRef<'_>,
    ) -> Result<()> {
        with_csr_block!(block, b => {
            let result = self.sparse_into(row, n, mode, b);
            if result.is_err() {
                b.reset();
            }
            result
        })
    }

    fn release_sparse(&mut self, block: CsrBlockRef<'_>) -> Result<()> {
        with_csr_block!(block, b => self.release_sparse_impl(b))
    }
}

impl ArchiveSerialize for CsrNumericTable {
    fn serialize(&self, archive: &mut dyn OutputArchive) -> Result<()> {
        let arrays = self.raw()?;
        write_dictionary(archive, self.dictionary());
        archive.write_u64(self.n_rows() as u64);
        archive.write_u8(StorageLayout::Csr.tag());
        archive.write_u64(arrays.nnz() as u64);
        write_storage(archive, arrays.values, arrays.nnz());
        let row_offsets = arrays
            .row_offsets
            .get(..=self.n_rows())
            .ok_or(TableError::DimensionMismatch {
                what: "row offsets",
                expected: self.n_rows() + 1,
                actual: arrays.row_offsets.len(),
            })?;
        write_indices(archive, arrays.column_indices);
        write_indices(archive, row_offsets);
        Ok(())
    }

    fn deserialize(archive: &mut dyn InputArchive) -> Result<Self> {
        let dictionary = read_dictionary(archive)?;
        let n_rows = read_len(archive)?;
        let layout = read_layout(archive)?;
        if layout != StorageLayout::Csr {
            return Err(TableError::UnsupportedLayout(layout));
        }
        let nnz = read_len(archive)?;
        let values = read_storage(archive)?;
        if values.len() != nnz {
            return Err(TableError::IncorrectBufferSize {
                expected: nnz,
                actual: values.len(),
            });
        }
        let column_indices = read_indices(archive)?;
        let row_offsets = read_indices(archive)?;
        check_lengths(values.len(), column_indices.len(), row_offsets.len(), n_rows)?;

        let mut core = TableCore::new(dictionary, n_rows, StorageLayout::Csr, Default::default());
        core.set_memory_status(MemoryStatus::InternallyAllocated);
        Ok(Self {
            core,
            data_type: values.data_type(),
            indexing: CsrIndexing::OneBased,
            values: Some(Buffer::owned(values)),
            column_indices: Some(IndexBuffer::owned(column_indices)),
            row_offsets: Some(IndexBuffer::owned(row_offsets)),
        })
    }
}
