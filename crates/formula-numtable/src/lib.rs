//! Typed numeric tables for Formula's analytics kernels.
//!
//! This crate focuses on:
//! - One table contract ([`TableIface`] + [`DenseAccess`]) over three physical layouts: dense
//!   row-major ([`HomogenNumericTable`]), compressed sparse row ([`CsrNumericTable`]) and packed
//!   symmetric/triangular ([`PackedMatrix`]).
//! - Block access through caller-owned [`BlockDescriptor`]s. A read-only request in the storage
//!   type over a contiguous region aliases the table buffer; anything else is converted into the
//!   descriptor's scratch buffer and written back on release when acquired with write intent.
//! - Reference-counted buffers: an aliasing descriptor keeps the memory alive after the table
//!   frees it, and table writes never disturb a view that is still held.
//!
//! ```
//! use formula_numtable::{HomogenNumericTable, NumericTableExt};
//!
//! let mut table = HomogenNumericTable::from_vec(2, 2, vec![1.0f64, 2.0, 3.0, 4.0]).unwrap();
//! table.set_value(1, 0, 9.5f64).unwrap();
//! assert_eq!(table.get_value::<i32>(1, 0).unwrap(), 9);
//! ```

#![forbid(unsafe_code)]

mod archive;
mod block;
mod buffer_copy;
mod csr;
mod dictionary;
mod element;
mod error;
mod homogen;
mod packed;
mod scoped;
mod storage;
mod table;

pub use crate::archive::{ArchiveSerialize, ByteArchive, InputArchive, OutputArchive};
pub use crate::block::{BlockDescriptor, BlockKind, BlockRef, ReadWriteMode};
pub use crate::buffer_copy::{copy_rows_from, copy_rows_to};
pub use crate::csr::{
    CsrBlockDescriptor, CsrBlockRef, CsrIndexing, CsrNumericTable, SparseAccess, SparseAccessExt,
};
pub use crate::dictionary::{DataDictionary, FeatureInfo, FeatureKind};
pub use crate::element::{DataType, Element};
pub use crate::error::{Result, TableError};
pub use crate::homogen::HomogenNumericTable;
pub use crate::packed::{packed_len, PackedLayout, PackedMatrix, PackedShape};
pub use crate::scoped::{ReadBlock, WriteBlock};
pub use crate::storage::{Buffer, IndexBuffer, Ownership, SharedBuffer, Storage};
pub use crate::table::{
    AllocationFlag, DenseAccess, MemoryStatus, Normalization, NumericTable, NumericTableExt,
    StorageLayout, TableCore, TableIface, TableOptions,
};
