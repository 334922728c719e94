#![forbid(unsafe_code)]

//! Dense homogeneous layout: one row-major buffer with a single storage type.

use crate::archive::{
    read_dictionary, read_layout, read_len, read_storage, write_dictionary, write_storage,
    ArchiveSerialize, InputArchive, OutputArchive,
};
use crate::block::{with_block, BlockDescriptor, BlockRef, ReadWriteMode};
use crate::dictionary::{DataDictionary, FeatureInfo};
use crate::element::{DataType, Element};
use crate::error::{Result, TableError};
use crate::storage::{Buffer, Storage};
use crate::table::{
    cell_count, AllocationFlag, DenseAccess, MemoryStatus, StorageLayout, TableCore, TableIface,
    TableOptions,
};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct HomogenNumericTable {
    core: TableCore,
    data_type: DataType,
    buffer: Option<Buffer>,
}

impl HomogenNumericTable {
    pub fn new(
        data_type: DataType,
        n_columns: usize,
        n_rows: usize,
        options: TableOptions,
    ) -> Result<Self> {
        let mut table = Self {
            core: TableCore::new(
                DataDictionary::with_uniform_type(n_columns, data_type),
                n_rows,
                StorageLayout::Dense,
                options.normalization,
            ),
            data_type,
            buffer: None,
        };
        if options.allocation == AllocationFlag::DoAllocate {
            table.allocate_data_memory()?;
        }
        Ok(table)
    }

    /// Take ownership of `values`, laid out row-major.
    pub fn from_vec<T: Element>(n_columns: usize, n_rows: usize, values: Vec<T>) -> Result<Self> {
        let expected = cell_count(n_rows, n_columns)?;
        if values.len() != expected {
            return Err(TableError::IncorrectBufferSize {
                expected,
                actual: values.len(),
            });
        }
        let mut table = Self::new(T::DATA_TYPE, n_columns, n_rows, TableOptions::default())?;
        table.buffer = Some(Buffer::owned(T::into_storage(values)));
        table
            .core
            .set_memory_status(MemoryStatus::InternallyAllocated);
        Ok(table)
    }

    /// Bind caller-owned memory. The table never frees it.
    ///
    /// The first write copies the buffer if the caller still holds a handle, and the table is
    /// internally allocated from then on; the caller's storage is never modified.
    pub fn from_shared(n_columns: usize, n_rows: usize, data: Arc<Storage>) -> Result<Self> {
        let mut table = Self::new(data.data_type(), n_columns, n_rows, TableOptions::default())?;
        table.bind_external(data)?;
        Ok(table)
    }

    /// Replace the data with caller-owned memory, adopting its storage type. Writes follow
    /// [`HomogenNumericTable::from_shared`].
    pub fn bind_external(&mut self, data: Arc<Storage>) -> Result<()> {
        let required = cell_count(self.n_rows(), self.n_columns())?;
        if data.len() < required {
            return Err(TableError::UserBufferTooSmall {
                capacity: data.len(),
                required,
            });
        }
        self.free_data_memory();
        if data.data_type() != self.data_type {
            self.data_type = data.data_type();
            let n_columns = self.n_columns();
            self.core
                .reset_dictionary(n_columns, FeatureInfo::new(self.data_type));
        }
        self.buffer = Some(Buffer::borrowed(data));
        self.core.set_memory_status(MemoryStatus::UserAllocated);
        Ok(())
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn buffer(&self) -> Option<&Buffer> {
        self.buffer.as_ref()
    }

    /// The whole buffer as `T`, if that is the storage type.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        let storage = self.buffer.as_ref()?.get();
        let len = cell_count(self.n_rows(), self.n_columns()).ok()?;
        T::view(storage)?.get(..len)
    }

    fn storage(&self) -> Result<&Storage> {
        self.buffer
            .as_ref()
            .map(Buffer::get)
            .ok_or(TableError::NotAllocated)
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
        let n_columns = self.n_columns();
        let (start, len) = (row * n_columns, n * n_columns);
        let Some(buffer) = &self.buffer else {
            block.reset();
            return Err(TableError::NotAllocated);
        };

        if !mode.writes() && buffer.get().data_type() == T::DATA_TYPE {
            block.alias(buffer.shared(), start);
            return Ok(());
        }
        if mode.reads() {
            buffer.get().read_range(start, len, block.scratch()?);
        } else {
            block.zeroed_scratch()?;
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
        let n_columns = self.n_columns();
        let start = row * n_columns + feature;
        let storage = match self.storage() {
            Ok(storage) => storage,
            Err(err) => {
                block.reset();
                return Err(err);
            }
        };

        // A single-column table stores its column contiguously.
        if n_columns == 1 && !mode.writes() && storage.data_type() == T::DATA_TYPE {
            if let Some(buffer) = &self.buffer {
                block.alias(buffer.shared(), start);
                return Ok(());
            }
        }
        if mode.reads() {
            storage.read_strided(start, n_columns, n, block.scratch()?);
        } else {
            block.zeroed_scratch()?;
        }
        Ok(())
    }

    fn write_back<T: Element>(&mut self, block: &mut BlockDescriptor<T>, column: bool) -> Result<()> {
        let n_columns = self.n_columns();
        let result = match block.pending_write() {
            Some(values) if !values.is_empty() => match &mut self.buffer {
                Some(buffer) => {
                    let storage = buffer.make_mut();
                    if column {
                        let start = block.row_offset() * n_columns + block.column_offset();
                        let end = start + (values.len() - 1) * n_columns;
                        if end >= storage.len() {
                            Err(TableError::DimensionMismatch {
                                what: "column block",
                                expected: storage.len(),
                                actual: end + 1,
                            })
                        } else {
                            storage.write_strided(start, n_columns, values);
                            Ok(())
                        }
                    } else {
                        let start = block.row_offset() * n_columns;
                        if start + values.len() > storage.len() {
                            Err(TableError::DimensionMismatch {
                                what: "row block",
                                expected: storage.len(),
                                actual: start + values.len(),
                            })
                        } else {
                            storage.write_range(start, values);
                            Ok(())
                        }
                    }
                }
                None => Err(TableError::NotAllocated),
            },
            _ => Ok(()),
        };
        block.reset();
        self.core
            .note_detached(self.buffer.as_ref().is_some_and(Buffer::is_owned));
        result
    }
}

impl TableIface for HomogenNumericTable {
    fn core(&self) -> &TableCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TableCore {
        &mut self.core
    }

    fn allocate_data_memory(&mut self) -> Result<()> {
        let len = cell_count(self.n_rows(), self.n_columns())?;
        let storage = Storage::zeroed(self.data_type, len)?;
        self.free_data_memory();
        log::debug!(
            "allocated dense buffer: {} x {} {:?}",
            self.n_rows(),
            self.n_columns(),
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
                "released dense buffer ({:?}, {} live handles)",
                buffer.ownership(),
                buffer.handle_count()
            );
        }
        self.core.set_memory_status(MemoryStatus::NotAllocated);
    }

    fn resize(&mut self, n_rows: usize) -> Result<()> {
        let required = cell_count(n_rows, self.n_columns())?;
        match (self.memory_status(), &mut self.buffer) {
            (MemoryStatus::InternallyAllocated, Some(buffer)) if required > buffer.get().len() => {
                buffer.make_mut().resize(required)?;
                log::debug!("grew dense buffer to {n_rows} rows");
            }
            (MemoryStatus::UserAllocated, Some(buffer)) if required > buffer.get().len() => {
                return Err(TableError::UserBufferTooSmall {
                    capacity: buffer.get().len(),
                    required,
                });
            }
            _ => {}
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
        let required = cell_count(self.n_rows(), self.n_columns())?;
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

impl DenseAccess for HomogenNumericTable {
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
        with_block!(block, b => self.write_back(b, false))
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
        with_block!(block, b => self.write_back(b, true))
    }
}

impl ArchiveSerialize for HomogenNumericTable {
    fn serialize(&self, archive: &mut dyn OutputArchive) -> Result<()> {
        let storage = self.storage()?;
        let len = cell_count(self.n_rows(), self.n_columns())?;
        write_dictionary(archive, self.dictionary());
        archive.write_u64(self.n_rows() as u64);
        archive.write_u8(StorageLayout::Dense.tag());
        write_storage(archive, storage, len);
        Ok(())
    }

    fn deserialize(archive: &mut dyn InputArchive) -> Result<Self> {
        let dictionary = read_dictionary(archive)?;
        let n_rows = read_len(archive)?;
        let layout = read_layout(archive)?;
        if layout != StorageLayout::Dense {
            return Err(TableError::UnsupportedLayout(layout));
        }
        let storage = read_storage(archive)?;
        let expected = cell_count(n_rows, dictionary.len())?;
        if storage.len() != expected {
            return Err(TableError::IncorrectBufferSize {
                expected,
                actual: storage.len(),
            });
        }
        let mut core = TableCore::new(
            dictionary,
            n_rows,
            StorageLayout::Dense,
            Default::default(),
        );
        core.set_memory_status(MemoryStatus::InternallyAllocated);
        Ok(Self {
            core,
            data_type: storage.data_type(),
            buffer: Some(Buffer::owned(storage)),
        })
    }
}
