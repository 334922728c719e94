#![forbid(unsafe_code)]

//! Copying rows between a table and a caller-owned flat buffer.
//!
//! The buffer is row-major and must hold exactly `n * n_columns` elements of the caller's type.
//! Requests that run past the last row copy only the rows that exist; the returned count says how
//! many.

use crate::block::{BlockDescriptor, ReadWriteMode};
use crate::element::Element;
use crate::error::{Result, TableError};
use crate::table::{NumericTable, NumericTableExt, TableIface};

fn check_len(what: &'static str, n: usize, n_columns: usize, actual: usize) -> Result<()> {
    let expected = n * n_columns;
    if actual != expected {
        return Err(TableError::DimensionMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Copy rows `[row, row + n)` of `table` into `dst`, converting to `T`.
pub fn copy_rows_to<N, T>(table: &N, row: usize, n: usize, dst: &mut [T]) -> Result<usize>
where
    N: NumericTable + ?Sized,
    T: Element,
{
    check_len("destination buffer", n, table.n_columns(), dst.len())?;
    let mut block = BlockDescriptor::<T>::new();
    let rows = table.read_rows(row, n, &mut block)?;
    let values = rows.as_slice();
    dst[..values.len()].copy_from_slice(values);
    Ok(rows.n_rows())
}

/// Overwrite rows `[row, row + n)` of `table` with `src`, converting from `T`.
pub fn copy_rows_from<N, T>(table: &mut N, row: usize, n: usize, src: &[T]) -> Result<usize>
where
    N: NumericTable + ?Sized,
    T: Element,
{
    check_len("source buffer", n, table.n_columns(), src.len())?;
    let mut block = BlockDescriptor::<T>::new();
    let mut rows = table.write_rows(row, n, ReadWriteMode::WriteOnly, &mut block)?;
    let served = rows.n_rows();
    let values = rows.as_mut_slice();
    let len = values.len();
    values.copy_from_slice(&src[..len]);
    rows.finish()?;
    Ok(served)
}
