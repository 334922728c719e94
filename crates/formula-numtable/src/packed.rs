#![forbid(unsafe_code)]

//! Packed symmetric and triangular matrices.
//!
//! An `n x n` matrix is stored in `n * (n + 1) / 2` contiguous elements holding one triangle in
//! row-major order:
//! - upper, `i <= j`: `i * (2n - i + 1) / 2 + (j - i)`
//! - lower, `i >= j`: `i * (i + 1) / 2 + j`
//!
//! A symmetric matrix answers the other triangle from the mirrored cell; a triangular matrix
//! answers it with zero. No dense row is contiguous in this layout, so every block is a copy.

use crate::archive::{
    read_dictionary, read_layout, read_len, read_storage, write_dictionary, write_storage,
    ArchiveSerialize, InputArchive, OutputArchive,
};
use crate::block::{with_block, BlockDescriptor, BlockRef, ReadWriteMode};
use crate::dictionary::{DataDictionary, FeatureInfo};
use crate::element::{DataType, Element};
use crate::error::{Result, TableError};
use crate::storage::{with_values, Buffer, Storage};
use crate::table::{
    AllocationFlag, DenseAccess, MemoryStatus, StorageLayout, TableCore, TableIface, TableOptions,
};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackedShape {
    Symmetric,
    Triangular,
}

/// Which triangle is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackedLayout {
    Upper,
    Lower,
}

/// Number of stored elements for an `n x n` packed matrix, or `None` if it does not fit in
/// `usize`.
pub fn packed_len(n: usize) -> Option<usize> {
    if n % 2 == 0 {
        (n / 2).checked_mul(n + 1)
    } else {
        n.checked_mul(n / 2 + 1)
    }
}

fn stored_len(n: usize) -> Result<usize> {
    packed_len(n).ok_or(TableError::MemoryAllocationFailed { bytes: usize::MAX })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Geometry {
    n: usize,
    shape: PackedShape,
    packing: PackedLayout,
}

impl Geometry {
    /// Offset of cell (`i`, `j`), or `None` for the zero triangle of a triangular matrix and for
    /// cells outside the matrix.
    fn offset(self, i: usize, j: usize) -> Option<usize> {
        if i >= self.n || j >= self.n {
            return None;
        }
        let stored = match self.packing {
            PackedLayout::Upper => i <= j,
            PackedLayout::Lower => i >= j,
        };
        let (i, j) = match (stored, self.shape) {
            (true, _) => (i, j),
            (false, PackedShape::Symmetric) => (j, i),
            (false, PackedShape::Triangular) => return None,
        };
        // Upper: the rows above `i` hold `n + (n - 1) + ... + (n - i + 1)` elements.
        Some(match self.packing {
            PackedLayout::Upper => packed_len(self.n)? - packed_len(self.n - i)? + (j - i),
            PackedLayout::Lower => packed_len(i)? + j,
        })
    }

    fn layout(self) -> StorageLayout {
        match (self.shape, self.packing) {
            (PackedShape::Symmetric, PackedLayout::Upper) => StorageLayout::UpperPackedSymmetric,
            (PackedShape::Symmetric, PackedLayout::Lower) => StorageLayout::LowerPackedSymmetric,
            (PackedShape::Triangular, PackedLayout::Upper) => StorageLayout::UpperPackedTriangular,
            (PackedShape::Triangular, PackedLayout::Lower) => StorageLayout::LowerPackedTriangular,
        }
    }

    fn from_layout(layout: StorageLayout) -> Option<(PackedShape, PackedLayout)> {
        Some(match layout {
            StorageLayout::UpperPackedSymmetric => (PackedShape::Symmetric, PackedLayout::Upper),
            StorageLayout::LowerPackedSymmetric => (PackedShape::Symmetric, PackedLayout::Lower),
            StorageLayout::UpperPackedTriangular => (PackedShape::Triangular, PackedLayout::Upper),
            StorageLayout::LowerPackedTriangular => (PackedShape::Triangular, PackedLayout::Lower),
            StorageLayout::Dense | StorageLayout::Csr => return None,
        })
    }
}

#[derive(Clone, Debug)]
pub struct PackedMatrix {
    core: TableCore,
    data_type: DataType,
    shape: PackedShape,
    packing: PackedLayout,
    buffer: Option<Buffer>,
}

impl PackedMatrix {
    pub fn new(
        data_type: DataType,
        n: usize,
        shape: PackedShape,
        packing: PackedLayout,
        options: TableOptions,
    ) -> Result<Self> {
        let geometry = Geometry { n, shape, packing };
        let mut matrix = Self {
            core: TableCore::new(
                DataDictionary::with_uniform_type(n, data_type),
                n,
                geometry.layout(),
                options.normalization,
            ),
            data_type,
            shape,
            packing,
            buffer: None,
        };
        if options.allocation == AllocationFlag::DoAllocate {
            matrix.allocate_data_memory()?;
        }
        Ok(matrix)
    }

    pub fn symmetric(
        data_type: DataType,
        n: usize,
        packing: PackedLayout,
        options: TableOptions,
    ) -> Result<Self> {
        Self::new(data_type, n, PackedShape::Symmetric, packing, options)
    }

    pub fn triangular(
        data_type: DataType,
        n: usize,
        packing: PackedLayout,
        options: TableOptions,
    ) -> Result<Self> {
        Self::new(data_type, n, PackedShape::Triangular, packing, options)
    }

    /// Take ownership of `n * (n + 1) / 2` packed values.
    pub fn from_vec<T: Element>(
        n: usize,
        shape: PackedShape,
        packing: PackedLayout,
        values: Vec<T>,
    ) -> Result<Self> {
        let expected = stored_len(n)?;
        if values.len() != expected {
            return Err(TableError::IncorrectBufferSize {
                expected,
                actual: values.len(),
            });
        }
        let mut matrix = Self::new(T::DATA_TYPE, n, shape, packing, TableOptions::default())?;
        matrix.buffer = Some(Buffer::owned(T::into_storage(values)));
        matrix
            .core
            .set_memory_status(MemoryStatus::InternallyAllocated);
        Ok(matrix)
    }

    /// Bind caller-owned packed values. The table never frees them, and the first write copies
    /// them while the caller still holds a handle.
    pub fn from_shared(
        n: usize,
        shape: PackedShape,
        packing: PackedLayout,
        data: Arc<Storage>,
    ) -> Result<Self> {
        let mut matrix = Self::new(data.data_type(), n, shape, packing, TableOptions::default())?;
        matrix.bind_external(data)?;
        Ok(matrix)
    }

    /// Replace the data with caller-owned memory, adopting its storage type.
    pub fn bind_external(&mut self, data: Arc<Storage>) -> Result<()> {
        let required = stored_len(self.dimension())?;
        if data.len() < required {
            return Err(TableError::UserBufferTooSmall {
                capacity: data.len(),
                required,
            });
        }
        self.free_data_memory();
        if data.data_type() != self.data_type {
            self.data_type = data.data_type();
            let n = self.dimension();
            self.core.reset_dictionary(n, FeatureInfo::new(self.data_type));
        }
        self.buffer = Some(Buffer::borrowed(data));
        self.core.set_memory_status(MemoryStatus::UserAllocated);
        Ok(())
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn shape(&self) -> PackedShape {
        self.shape
    }

    pub fn packing(&self) -> PackedLayout {
        self.packing
    }

    /// Matrix dimension.
    pub fn dimension(&self) -> usize {
        self.n_rows()
    }

    /// The packed elements as `T`, if that is the storage type.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::view(self.buffer.as_ref()?.get())
    }

    fn geometry(&self) -> Geometry {
        Geometry {
            n: self.n_rows(),
            shape: self.shape,
            packing: self.packing,
        }
    }

    /// Position of cell (`row`, `column`) in the packed buffer. `None` for cells that read as zero.
    pub fn packed_index(&self, row: usize, column: usize) -> Option<usize> {
        self.geometry().offset(row, column)
    }

    fn check_cell(&self, row: usize, column: usize) -> Result<()> {
        let n = self.dimension();
        if row >= n || column >= n {
            return Err(TableError::IndexOutOfRange {
                row,
                column,
                n_rows: n,
                n_columns: n,
            });
        }
        Ok(())
    }

    fn storage(&self) -> Result<&Storage> {
        self.buffer
            .as_ref()
            .map(Buffer::get)
            .ok_or(TableError::NotAllocated)
    }

    pub fn element<T: Element>(&self, row: usize, column: usize) -> Result<T> {
        self.check_cell(row, column)?;
        let storage = self.storage()?;
        Ok(self
            .packed_index(row, column)
            .map(|offset| storage.get(offset))
            .unwrap_or_default())
    }

    /// Store one cell. Writing the zero triangle of a triangular matrix is an error.
    pub fn set_element<T: Element>(&mut self, row: usize, column: usize, value: T) -> Result<()> {
        self.check_cell(row, column)?;
        let layout = self.layout();
        let Some(offset) = self.packed_index(row, column) else {
            return Err(TableError::unsupported("write outside the stored triangle", layout));
        };
        let buffer = self.buffer.as_mut().ok_or(TableError::NotAllocated)?;
        buffer.make_mut().set(offset, value);
        self.core.note_detached(buffer.is_owned());
        Ok(())
    }

    fn rows_into<T: Element>(
        &self,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: &mut BlockDescriptor<T>,
    ) -> Result<()> {
        let n = self.core.begin_rows(row, n, mode, block)?;
        if n == 0 {
            return Ok(());
        }
        let geometry = self.geometry();
        let storage = match self.storage() {
            Ok(storage) => storage,
            Err(err) => {
                block.reset();
                return Err(err);
            }
        };
        let out = block.zeroed_scratch()?;
        if mode.reads() {
            with_values!(storage, values => unpack(values, geometry, row..row + n, 0..geometry.n, out));
        }
        Ok(())
    }

    fn column_into<T: Element>(
        &self,
        feature: usize,
        row: usize,
        n: usize,
        mode: ReadWriteMode,
        block: &mut BlockDescriptor<T>,
    ) -> Result<()> {
        let n = self.core.begin_column(feature, row, n, mode, block)?;
        if n == 0 {
            return Ok(());
        }
        let geometry = self.geometry();
        let storage = match self.storage() {
            Ok(storage) => storage,
            Err(err) => {
                block.reset();
                return Err(err);
            }
        };
        let out = block.zeroed_scratch()?;
        if mode.reads() {
            with_values!(storage, values => {
                unpack(values, geometry, row..row + n, feature..feature + 1, out)
            });
        }
        Ok(())
    }

    fn write_back<T: Element>(&mut self, block: &mut BlockDescriptor<T>) -> Result<()> {
        let geometry = self.geometry();
        let (rows, columns) = (
            block.row_offset()..block.row_offset() + block.n_rows(),
            block.column_offset()..block.column_offset() + block.n_columns(),
        );
        let result = match (block.pending_write(), &mut self.buffer) {
            (Some(values), Some(buffer)) if !values.is_empty() => {
                let required = packed_len(geometry.n).unwrap_or(usize::MAX);
                let storage = buffer.make_mut();
                if storage.len() < required {
                    Err(TableError::IncorrectBufferSize {
                        expected: required,
                        actual: storage.len(),
                    })
                } else {
                    with_values!(storage, packed => pack(values, geometry, rows, columns, packed));
                    Ok(())
                }
            }
            (Some(values), None) if !values.is_empty() => Err(TableError::NotAllocated),
            _ => Ok(()),
        };
        block.reset();
        self.core
            .note_detached(self.buffer.as_ref().is_some_and(Buffer::is_owned));
        result
    }

    /// Copy the leading `min(old, new)` block of the matrix into a buffer for dimension `n`.
    fn remapped(&self, storage: &Storage, n: usize) -> Result<Storage> {
        let old = self.geometry();
        let new = Geometry { n, ..old };
        let mut remapped = Storage::zeroed(self.data_type, stored_len(n)?)?;
        let keep = old.n.min(n);
        for i in 0..keep {
            for j in 0..keep {
                if let (Some(from), Some(to)) = (old.offset(i, j), new.offset(i, j)) {
                    let value: f64 = storage.get(from);
                    remapped.set(to, value);
                }
            }
        }
        Ok(remapped)
    }
}

/// Expand the cells `rows x columns` into the row-major `out`, converting to `T`.
fn unpack<S: Element, T: Element>(
    values: &[S],
    geometry: Geometry,
    rows: Range<usize>,
    columns: Range<usize>,
    out: &mut [T],
) {
    let width = columns.len();
    for (r, i) in rows.enumerate() {
        for (c, j) in columns.clone().enumerate() {
            if let Some(offset) = geometry.offset(i, j) {
                out[r * width + c] = values[offset].cast();
            }
        }
    }
}

/// Store the addressable cells of a row-major `rows x columns` block. For a symmetric matrix the
/// cell visited last wins when both (i, j) and (j, i) are in the block.
fn pack<S: Element, T: Element>(
    src: &[T],
    geometry: Geometry,
    rows: Range<usize>,
    columns: Range<usize>,
    packed: &mut [S],
) {
    let width = columns.len();
    for (r, i) in rows.enumerate() {
        for (c, j) in columns.clone().enumerate() {
            if let (Some(offset), Some(&value)) = (geometry.offset(i, j), src.get(r * width + c)) {
                packed[offset] = value.cast();
            }
        }
    }
}

impl TableIface for PackedMatrix {
    fn core(&self) -> &TableCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TableCore {
        &mut self.core
    }

    fn allocate_data_memory(&mut self) -> Result<()> {
        let n = self.dimension();
        let storage = Storage::zeroed(self.data_type, stored_len(n)?)?;
        self.free_data_memory();
        log::debug!(
            "allocated packed {:?} buffer: {n} x {n} {:?}",
            self.layout(),
            self.data_type
        );
        self.buffer = Some(Buffer::owned(storage));
        self.core
            .set_memory_status(MemoryStatus::InternallyAllocated);
        Ok(())
    }

    fn free_data_memory(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            log::debug!(
                "released packed buffer ({:?}, {} live handles)",
                buffer.ownership(),
                buffer.handle_count()
            );
        }
        self.core.set_memory_status(MemoryStatus::NotAllocated);
    }

    /// Change the dimension to `n x n`, keeping the leading block. The data moves into a new
    /// table-owned buffer.
    fn resize(&mut self, n: usize) -> Result<()> {
        if n == self.dimension() {
            return Ok(());
        }
        let required = stored_len(n)?;
        if let Some(buffer) = &self.buffer {
            if self.memory_status() == MemoryStatus::UserAllocated && required > buffer.get().len() {
                return Err(TableError::UserBufferTooSmall {
                    capacity: buffer.get().len(),
                    required,
                });
            }
            let remapped = self.remapped(buffer.get(), n)?;
            log::debug!("remapped packed buffer from {} to {n}", self.dimension());
            self.buffer = Some(Buffer::owned(remapped));
            self.core.note_detached(true);
        }
        self.core
            .reset_dictionary(n, FeatureInfo::new(self.data_type));
        self.core.set_n_rows(n);
        Ok(())
    }

    /// A packed matrix is square: this is [`TableIface::resize`] without keeping the data.
    fn set_number_of_columns(&mut self, n_columns: usize) -> Result<()> {
        self.free_data_memory();
        self.core
            .reset_dictionary(n_columns, FeatureInfo::new(self.data_type));
        self.core.set_n_rows(n_columns);
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.n_rows() != self.n_columns() {
            return Err(TableError::DimensionMismatch {
                what: "packed matrix columns",
                expected: self.n_rows(),
                actual: self.n_columns(),
            });
        }
        let required = stored_len(self.dimension())?;
        match &self.buffer {
            None if required > 0 => Err(TableError::NotAllocated),
            None => Ok(()),
            Some(buffer) if buffer.get().len() < required => Err(TableError::IncorrectBufferSize {
                expected: required,
                actual: buffer.get().len(),
            }),
            Some(_) => Ok(()),
        }
    }
}

impl DenseAccess for PackedMatrix {
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
        with_block!(block, b => self.write_back(b))
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
        with_block!(block, b => self.write_back(b))
    }
}

impl ArchiveSerialize for PackedMatrix {
    fn serialize(&self, archive: &mut dyn OutputArchive) -> Result<()> {
        let storage = self.storage()?;
        let len = stored_len(self.dimension())?;
        write_dictionary(archive, self.dictionary());
        archive.write_u64(self.n_rows() as u64);
        archive.write_u8(self.layout().tag());
        write_storage(archive, storage, len);
        Ok(())
    }

    fn deserialize(archive: &mut dyn InputArchive) -> Result<Self> {
        let dictionary = read_dictionary(archive)?;
        let n = read_len(archive)?;
        let layout = read_layout(archive)?;
        let (shape, packing) =
            Geometry::from_layout(layout).ok_or(TableError::UnsupportedLayout(layout))?;
        if dictionary.len() != n {
            return Err(TableError::DimensionMismatch {
                what: "packed matrix columns",
                expected: n,
                actual: dictionary.len(),
            });
        }
        let storage = read_storage(archive)?;
        let expected = stored_len(n)?;
        if storage.len() != expected {
            return Err(TableError::IncorrectBufferSize {
                expected,
                actual: storage.len(),
            });
        }
        let mut core = TableCore::new(dictionary, n, layout, Default::default());
        core.set_memory_status(MemoryStatus::InternallyAllocated);
        Ok(Self {
            core,
            data_type: storage.data_type(),
            shape,
            packing,
            buffer: Some(Buffer::owned(storage)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn geometry(n: usize, shape: PackedShape, packing: PackedLayout) -> Geometry {
        Geometry { n, shape, packing }
    }

    #[test]
    fn upper_offsets_walk_rows_of_shrinking_length() {
        let g = geometry(3, PackedShape::Triangular, PackedLayout::Upper);
        let offsets: Vec<_> = [(0, 0), (0, 1), (0, 2), (1, 1), (1, 2), (2, 2)]
            .into_iter()
            .map(|(i, j)| g.offset(i, j))
            .collect();
        assert_eq!(offsets, (0..6).map(Some).collect::<Vec<_>>());
        assert_eq!(g.offset(2, 0), None);
    }

    #[test]
    fn lower_offsets_walk_rows_of_growing_length() {
        let g = geometry(3, PackedShape::Triangular, PackedLayout::Lower);
        let offsets: Vec<_> = [(0, 0), (1, 0), (1, 1), (2, 0), (2, 1), (2, 2)]
            .into_iter()
            .map(|(i, j)| g.offset(i, j))
            .collect();
        assert_eq!(offsets, (0..6).map(Some).collect::<Vec<_>>());
        assert_eq!(g.offset(0, 2), None);
    }

    #[test]
    fn out_of_range_cells_have_no_offset() {
        let g = geometry(2, PackedShape::Symmetric, PackedLayout::Upper);
        assert_eq!(g.offset(2, 0), None);
        assert_eq!(g.offset(0, 2), None);
    }

    #[test]
    fn packed_len_reports_overflow() {
        assert_eq!(packed_len(0), Some(0));
        assert_eq!(packed_len(4), Some(10));
        assert_eq!(packed_len(5), Some(15));
        assert_eq!(packed_len(usize::MAX), None);
        assert_eq!(packed_len(1 << (usize::BITS / 2 + 1)), None);
    }

    fn any_packing() -> impl Strategy<Value = PackedLayout> {
        prop_oneof![Just(PackedLayout::Upper), Just(PackedLayout::Lower)]
    }

    proptest! {
        #[test]
        fn stored_triangle_is_a_bijection(n in 1usize..40, packing in any_packing()) {
            let g = geometry(n, PackedShape::Triangular, packing);
            let mut seen = vec![false; packed_len(n).unwrap()];
            for i in 0..n {
                for j in 0..n {
                    if let Some(offset) = g.offset(i, j) {
                        prop_assert!(!seen[offset]);
                        seen[offset] = true;
                    }
                }
            }
            prop_assert!(seen.into_iter().all(|s| s));
        }

        #[test]
        fn symmetric_offsets_mirror(n in 1usize..40, packing in any_packing(), i in 0usize..40, j in 0usize..40) {
            let g = geometry(n, PackedShape::Symmetric, packing);
            let (i, j) = (i % n, j % n);
            prop_assert_eq!(g.offset(i, j), g.offset(j, i));
            prop_assert!(g.offset(i, j).is_some());
        }
    }
}
