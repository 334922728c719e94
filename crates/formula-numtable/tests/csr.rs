use formula_numtable::{
    BlockDescriptor, CsrBlockDescriptor, CsrIndexing, CsrNumericTable, DataType, MemoryStatus,
    NumericTableExt, ReadWriteMode, SparseAccessExt, Storage, StorageLayout, TableError,
    TableIface, TableOptions,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;

/// 2 rows x 4 columns:
/// ```text
/// [0, 10, 0, 20]
/// [0, 0, 30, 0]
/// ```
fn two_by_four() -> CsrNumericTable {
    CsrNumericTable::from_arrays(
        vec![10.0f64, 20.0, 30.0],
        vec![2, 4, 3],
        vec![1, 3, 4],
        4,
        2,
        CsrIndexing::OneBased,
    )
    .unwrap()
}

/// 4 rows x 3 columns with an empty second row.
fn four_by_three() -> CsrNumericTable {
    CsrNumericTable::from_arrays(
        vec![1i32, 2, 3, 4, 5],
        vec![1, 3, 2, 1, 3],
        vec![1, 3, 3, 4, 6],
        3,
        4,
        CsrIndexing::OneBased,
    )
    .unwrap()
}

#[test]
fn densified_rows_place_values_by_column_index() {
    let table = two_by_four();
    table.check().unwrap();
    assert_eq!(table.layout(), StorageLayout::Csr);
    assert_eq!(table.data_size(), 3);

    let mut block = BlockDescriptor::<f64>::new();
    table
        .get_block_of_rows(0, 2, ReadWriteMode::ReadOnly, &mut block)
        .unwrap();
    assert_eq!(block.row(0), &[0.0, 10.0, 0.0, 20.0]);
    assert_eq!(block.row(1), &[0.0, 0.0, 30.0, 0.0]);
    assert!(!block.is_aliased());
}

#[test]
fn densified_rows_convert_and_clip() {
    let table = four_by_three();
    let mut block = BlockDescriptor::<f32>::new();
    table
        .get_block_of_rows(1, 10, ReadWriteMode::ReadOnly, &mut block)
        .unwrap();
    assert_eq!(block.n_rows(), 3);
    assert_eq!(
        block.as_slice(),
        &[
            0.0, 0.0, 0.0, //
            0.0, 3.0, 0.0, //
            4.0, 0.0, 5.0,
        ]
    );
}

#[test]
fn column_values_scan_each_row() {
    let table = four_by_three();
    let mut block = BlockDescriptor::<f64>::new();
    table
        .get_block_of_column_values(2, 0, 4, ReadWriteMode::ReadOnly, &mut block)
        .unwrap();
    assert_eq!(block.as_slice(), &[2.0, 0.0, 0.0, 5.0]);
    assert_eq!(table.get_value::<i32>(0, 3).unwrap(), 4);
    assert_eq!(table.get_value::<i32>(1, 3).unwrap(), 0);
}

#[test]
fn dense_write_intent_is_unsupported() {
    let mut table = two_by_four();
    let mut block = BlockDescriptor::<f64>::new();
    assert_eq!(
        table.get_block_of_rows(0, 1, ReadWriteMode::ReadWrite, &mut block),
        Err(TableError::UnsupportedOperation {
            operation: "dense row block write",
            layout: StorageLayout::Csr,
        })
    );
    assert!(block.is_empty());
    assert!(matches!(
        table.set_value(1, 0, 1.0f64),
        Err(TableError::UnsupportedOperation { .. })
    ));
    assert!(table.assign(0.0f64).is_err());
}

#[test]
fn zero_based_indexing_fails_check_and_access() {
    let table = CsrNumericTable::from_arrays(
        vec![10.0f64, 20.0, 30.0],
        vec![1, 3, 2],
        vec![0, 2, 3],
        4,
        2,
        CsrIndexing::ZeroBased,
    )
    .unwrap();
    assert_eq!(
        table.check(),
        Err(TableError::UnsupportedIndexing(CsrIndexing::ZeroBased))
    );

    let mut block = BlockDescriptor::<f64>::new();
    assert_eq!(
        table.get_block_of_rows(0, 1, ReadWriteMode::ReadOnly, &mut block),
        Err(TableError::UnsupportedIndexing(CsrIndexing::ZeroBased))
    );
    let mut sparse = CsrBlockDescriptor::<f64>::new();
    assert_eq!(
        table.get_sparse_block(0, 1, ReadWriteMode::ReadOnly, &mut sparse),
        Err(TableError::UnsupportedIndexing(CsrIndexing::ZeroBased))
    );
}

#[test]
fn check_rejects_broken_structure() {
    let decreasing = CsrNumericTable::from_arrays(
        vec![1.0f64, 2.0],
        vec![1, 1],
        vec![1, 3, 2],
        2,
        2,
        CsrIndexing::OneBased,
    )
    .unwrap();
    assert!(matches!(
        decreasing.check(),
        Err(TableError::InvalidCsrStructure(_))
    ));

    let bad_column = CsrNumericTable::from_arrays(
        vec![1.0f64],
        vec![3],
        vec![1, 2],
        2,
        1,
        CsrIndexing::OneBased,
    )
    .unwrap();
    assert!(matches!(
        bad_column.check(),
        Err(TableError::InvalidCsrStructure(_))
    ));

    let overlong = CsrNumericTable::from_arrays(
        vec![1.0f64],
        vec![1],
        vec![1, 3],
        2,
        1,
        CsrIndexing::OneBased,
    )
    .unwrap();
    assert!(overlong.check().is_err());
}

#[test]
fn mismatched_array_lengths_are_rejected() {
    assert_eq!(
        CsrNumericTable::from_arrays(
            vec![1.0f64, 2.0],
            vec![1],
            vec![1, 3],
            2,
            1,
            CsrIndexing::OneBased
        )
        .unwrap_err(),
        TableError::DimensionMismatch {
            what: "column indices",
            expected: 2,
            actual: 1,
        }
    );
}

#[test]
fn sparse_block_rebases_row_offsets() {
    let table = four_by_three();
    let mut block = CsrBlockDescriptor::<i32>::new();
    table
        .get_sparse_block(2, 2, ReadWriteMode::ReadOnly, &mut block)
        .unwrap();
    assert_eq!(block.n_rows(), 2);
    assert_eq!(block.nnz(), 3);
    assert_eq!(block.values(), &[3, 4, 5]);
    assert_eq!(block.column_indices(), &[2, 1, 3]);
    assert_eq!(block.row_offsets(), &[1, 2, 4]);
    assert!(block.is_aliased());

    table
        .get_sparse_block(0, 4, ReadWriteMode::ReadOnly, &mut block)
        .unwrap();
    assert_eq!(block.row_offsets(), &[1, 3, 3, 4, 6]);
}

#[test]
fn sparse_block_rebases_offsets_that_do_not_start_at_one() {
    // Rows address values 3 and 4 of a four-value array.
    let table = CsrNumericTable::from_arrays(
        vec![1.0f64, 2.0, 3.0, 4.0],
        vec![1, 2, 1, 2],
        vec![3, 4, 5],
        2,
        2,
        CsrIndexing::OneBased,
    )
    .unwrap();
    let mut block = CsrBlockDescriptor::<f64>::new();
    table
        .get_sparse_block(0, 2, ReadWriteMode::ReadOnly, &mut block)
        .unwrap();
    assert_eq!(block.values(), &[3.0, 4.0]);
    assert_eq!(block.column_indices(), &[1, 2]);
    assert_eq!(block.row_offsets(), &[1, 2, 3]);

    // Leading empty rows: the offsets of row 1 already start at 1.
    let table = CsrNumericTable::from_arrays(
        vec![7.0f64],
        vec![2],
        vec![1, 1, 2],
        2,
        2,
        CsrIndexing::OneBased,
    )
    .unwrap();
    table
        .get_sparse_block(1, 1, ReadWriteMode::ReadOnly, &mut block)
        .unwrap();
    assert_eq!(block.values(), &[7.0]);
    assert_eq!(block.row_offsets(), &[1, 2]);
}

#[test]
fn decreasing_offsets_fail_acquisition_and_leave_the_block_empty() {
    let table = CsrNumericTable::from_arrays(
        vec![1.0f64, 2.0, 3.0],
        vec![1, 1, 1],
        vec![3, 4, 1, 2],
        2,
        3,
        CsrIndexing::OneBased,
    )
    .unwrap();

    let mut sparse = CsrBlockDescriptor::<f64>::new();
    assert!(matches!(
        table.get_sparse_block(0, 3, ReadWriteMode::ReadOnly, &mut sparse),
        Err(TableError::InvalidCsrStructure(_))
    ));
    assert_eq!(sparse.n_rows(), 0);
    assert!(sparse.values().is_empty());
    assert!(sparse.row_offsets().is_empty());

    let mut dense = BlockDescriptor::<f64>::new();
    assert!(matches!(
        table.get_block_of_rows(0, 3, ReadWriteMode::ReadOnly, &mut dense),
        Err(TableError::InvalidCsrStructure(_))
    ));
    assert!(dense.is_empty());
    assert!(dense.as_slice().is_empty());
}

#[test]
fn bad_column_index_fails_densify_and_leaves_the_block_empty() {
    let table = CsrNumericTable::from_arrays(
        vec![1i32, 2],
        vec![1, 5],
        vec![1, 2, 3],
        2,
        2,
        CsrIndexing::OneBased,
    )
    .unwrap();
    let mut block = BlockDescriptor::<i32>::new();
    assert!(matches!(
        table.get_block_of_rows(0, 2, ReadWriteMode::ReadOnly, &mut block),
        Err(TableError::InvalidCsrStructure(_))
    ));
    assert!(block.is_empty());
    assert!(block.as_slice().is_empty());
}

#[test]
fn sparse_block_converts_values() {
    let table = two_by_four();
    let mut block = CsrBlockDescriptor::<i32>::new();
    table
        .get_sparse_block(1, 1, ReadWriteMode::ReadOnly, &mut block)
        .unwrap();
    assert!(!block.is_aliased());
    assert_eq!(block.values(), &[30]);
    assert_eq!(block.column_indices(), &[3]);
    assert_eq!(block.row_offsets(), &[1, 2]);
}

#[test]
fn sparse_block_writes_values_back() {
    let mut table = four_by_three();
    let mut block = CsrBlockDescriptor::<f64>::new();
    table
        .get_sparse_block(3, 1, ReadWriteMode::ReadWrite, &mut block)
        .unwrap();
    assert_eq!(block.values(), &[4.0, 5.0]);
    block.values_mut().copy_from_slice(&[40.7, -50.2]);
    table.release_sparse_block(&mut block).unwrap();
    assert!(block.values().is_empty());

    let (values, columns, offsets) = table.arrays::<i32>().unwrap();
    assert_eq!(values, &[1, 2, 3, 40, -50]);
    assert_eq!(columns, &[1, 3, 2, 1, 3]);
    assert_eq!(offsets, &[1, 3, 3, 4, 6]);
}

#[test]
fn copying_every_shared_array_makes_the_table_internally_allocated() {
    let values = Arc::new(Storage::F64(vec![1.0, 2.0]));
    let columns = Arc::new(vec![1, 2]);
    let offsets = Arc::new(vec![1, 2, 3]);
    let mut table = CsrNumericTable::from_shared(
        Arc::clone(&values),
        Arc::clone(&columns),
        Arc::clone(&offsets),
        2,
        2,
        CsrIndexing::OneBased,
    )
    .unwrap();

    let mut block = CsrBlockDescriptor::<f64>::new();
    table
        .get_sparse_block(0, 2, ReadWriteMode::ReadWrite, &mut block)
        .unwrap();
    block.values_mut()[0] = 10.0;
    table.release_sparse_block(&mut block).unwrap();
    assert_eq!(*values, Storage::F64(vec![1.0, 2.0]));
    assert_eq!(table.arrays::<f64>().unwrap().0, &[10.0, 2.0]);
    assert_eq!(table.memory_status(), MemoryStatus::UserAllocated);

    table.arrays_mut().unwrap();
    assert_eq!(table.memory_status(), MemoryStatus::InternallyAllocated);
    assert_eq!(Arc::strong_count(&columns), 1);
    assert_eq!(Arc::strong_count(&offsets), 1);
}

#[test]
fn shared_arrays_are_user_allocated() {
    let values = Arc::new(Storage::F32(vec![1.0, 2.0]));
    let columns = Arc::new(vec![1, 2]);
    let offsets = Arc::new(vec![1, 2, 3]);
    let mut table = CsrNumericTable::from_shared(
        Arc::clone(&values),
        columns,
        offsets,
        2,
        2,
        CsrIndexing::OneBased,
    )
    .unwrap();
    assert_eq!(table.memory_status(), MemoryStatus::UserAllocated);
    assert_eq!(table.data_type(), DataType::F32);
    assert_eq!(Arc::strong_count(&values), 2);

    table.free_data_memory();
    assert_eq!(table.memory_status(), MemoryStatus::NotAllocated);
    assert_eq!(Arc::strong_count(&values), 1);
}

#[test]
fn allocate_for_nnz_then_fill_through_arrays() {
    let mut table = CsrNumericTable::new(DataType::F64, 3, 2, TableOptions::default());
    table.allocate_data_memory_for(3).unwrap();
    assert_eq!(table.memory_status(), MemoryStatus::InternallyAllocated);
    assert_eq!(table.data_size(), 3);

    let (values, columns, offsets) = table.arrays_mut().unwrap();
    *values = Storage::F64(vec![1.0, 2.0, 3.0]);
    columns.copy_from_slice(&[1, 2, 3]);
    offsets.copy_from_slice(&[1, 2, 4]);
    table.check().unwrap();

    assert_eq!(table.get_value::<f64>(2, 1).unwrap(), 3.0);
    assert_eq!(table.get_value::<f64>(0, 1).unwrap(), 0.0);
}

#[test]
fn resize_appends_empty_rows() {
    let mut table = two_by_four();
    table.resize(4).unwrap();
    table.check().unwrap();
    assert_eq!(table.arrays::<f64>().unwrap().2, &[1, 3, 4, 4, 4]);

    let mut block = BlockDescriptor::<f64>::new();
    table
        .get_block_of_rows(1, 3, ReadWriteMode::ReadOnly, &mut block)
        .unwrap();
    assert_eq!(
        block.as_slice(),
        &[0.0, 0.0, 30.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
    );

    table.resize(1).unwrap();
    table.check().unwrap();
    assert_eq!(table.get_value::<f64>(3, 0).unwrap(), 20.0);
}

#[test]
fn empty_request_on_unallocated_table_is_not_an_error() {
    let table = CsrNumericTable::new(DataType::F64, 2, 0, TableOptions::default());
    table.check().unwrap();
    let mut block = BlockDescriptor::<f64>::new();
    table
        .get_block_of_rows(0, 5, ReadWriteMode::ReadOnly, &mut block)
        .unwrap();
    assert!(block.is_empty());
}

/// CSR arrays holding the `Some` cells of a row-major `n_rows x n_columns` grid.
fn scatter(n_rows: usize, n_columns: usize, cells: &[Option<i32>]) -> CsrNumericTable {
    let mut values = Vec::new();
    let mut columns = Vec::new();
    let mut offsets = vec![1];
    for r in 0..n_rows {
        for c in 0..n_columns {
            if let Some(v) = cells[r * n_columns + c] {
                values.push(v);
                columns.push(c + 1);
            }
        }
        offsets.push(values.len() + 1);
    }
    CsrNumericTable::from_arrays(values, columns, offsets, n_columns, n_rows, CsrIndexing::OneBased)
        .unwrap()
}

proptest! {
    #[test]
    fn densified_rows_match_the_scattered_entries(
        n_rows in 1usize..6,
        n_columns in 1usize..6,
        row in 0usize..6,
        cells in proptest::collection::vec(proptest::option::of(-1000i32..1000), 36),
    ) {
        let cells = &cells[..n_rows * n_columns];
        let table = scatter(n_rows, n_columns, cells);
        prop_assert!(table.check().is_ok());

        let mut block = BlockDescriptor::<f64>::new();
        table
            .get_block_of_rows(row, n_rows, ReadWriteMode::ReadOnly, &mut block)
            .unwrap();
        let expected: Vec<f64> = cells
            .iter()
            .skip(row * n_columns)
            .map(|cell| f64::from(cell.unwrap_or(0)))
            .collect();
        prop_assert_eq!(block.as_slice(), expected.as_slice());
    }

    #[test]
    fn column_scan_matches_the_scattered_entries(
        n_rows in 1usize..6,
        n_columns in 1usize..6,
        feature in 0usize..6,
        cells in proptest::collection::vec(proptest::option::of(-1000i32..1000), 36),
    ) {
        let cells = &cells[..n_rows * n_columns];
        let feature = feature % n_columns;
        let table = scatter(n_rows, n_columns, cells);

        let mut block = BlockDescriptor::<i32>::new();
        table
            .get_block_of_column_values(feature, 0, n_rows, ReadWriteMode::ReadOnly, &mut block)
            .unwrap();
        let expected: Vec<i32> = (0..n_rows)
            .map(|r| cells[r * n_columns + feature].unwrap_or(0))
            .collect();
        prop_assert_eq!(block.as_slice(), expected.as_slice());
    }
}
