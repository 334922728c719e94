use crate::csr::CsrIndexing;
use crate::table::StorageLayout;

pub type Result<T> = std::result::Result<T, TableError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("memory allocation failed: {bytes} bytes requested")]
    MemoryAllocationFailed { bytes: usize },

    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("table has no allocated data memory")]
    NotAllocated,

    #[error("unsupported CSR indexing {0:?}: only one-based indexing is supported")]
    UnsupportedIndexing(CsrIndexing),

    #[error("{operation} is not supported by the {layout:?} layout")]
    UnsupportedOperation {
        operation: &'static str,
        layout: StorageLayout,
    },

    #[error("unsupported layout: {0:?}")]
    UnsupportedLayout(StorageLayout),

    #[error("feature index {feature} out of range for a table with {n_columns} columns")]
    FeatureIndexOutOfRange { feature: usize, n_columns: usize },

    #[error("cell ({row}, {column}) out of range for a {n_rows}x{n_columns} table")]
    IndexOutOfRange {
        row: usize,
        column: usize,
        n_rows: usize,
        n_columns: usize,
    },

    #[error("invalid CSR structure: {0}")]
    InvalidCsrStructure(String),

    #[error("incorrect buffer size: expected {expected} elements, got {actual}")]
    IncorrectBufferSize { expected: usize, actual: usize },

    #[error("user-allocated buffer holds {capacity} elements, {required} required")]
    UserBufferTooSmall { capacity: usize, required: usize },

    #[error("archive error: {0}")]
    Archive(String),
}

impl TableError {
    pub(crate) fn unsupported(operation: &'static str, layout: StorageLayout) -> Self {
        TableError::UnsupportedOperation { operation, layout }
    }
}
