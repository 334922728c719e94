#![forbid(unsafe_code)]

use crate::element::{cast_extend, cast_into, DataType, Element};
use crate::error::{Result, TableError};
use std::sync::Arc;

/// Physically typed element storage backing a table buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum Storage {
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! with_values {
    ($storage:expr, $values:ident => $body:expr) => {
        match $storage {
            Storage::I32($values) => $body,
            Storage::F32($values) => $body,
            Storage::F64($values) => $body,
        }
    };
}
pub(crate) use with_values;

impl<T: Element> From<Vec<T>> for Storage {
    fn from(values: Vec<T>) -> Self {
        T::into_storage(values)
    }
}

/// Reserve exactly `len` elements, reporting allocation failure instead of aborting.
pub(crate) fn try_vec<T: Clone>(len: usize, fill: T) -> Result<Vec<T>> {
    let mut values = Vec::new();
    values
        .try_reserve_exact(len)
        .map_err(|_| TableError::MemoryAllocationFailed {
            bytes: len.saturating_mul(std::mem::size_of::<T>()),
        })?;
    values.resize(len, fill);
    Ok(values)
}

pub(crate) fn try_resize<T: Clone>(values: &mut Vec<T>, len: usize, fill: T) -> Result<()> {
    if len > values.len() {
        let additional = len - values.len();
        values
            .try_reserve_exact(additional)
            .map_err(|_| TableError::MemoryAllocationFailed {
                bytes: additional.saturating_mul(std::mem::size_of::<T>()),
            })?;
    }
    values.resize(len, fill);
    Ok(())
}

impl Storage {
    /// Zero-filled storage of `len` elements.
    pub fn zeroed(data_type: DataType, len: usize) -> Result<Self> {
        Ok(match data_type {
            DataType::I32 => Storage::I32(try_vec(len, 0)?),
            DataType::F32 => Storage::F32(try_vec(len, 0.0)?),
            DataType::F64 => Storage::F64(try_vec(len, 0.0)?),
        })
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Storage::I32(_) => DataType::I32,
            Storage::F32(_) => DataType::F32,
            Storage::F64(_) => DataType::F64,
        }
    }

    pub fn len(&self) -> usize {
        with_values!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len() * self.data_type().size()
    }

    pub(crate) fn resize(&mut self, len: usize) -> Result<()> {
        match self {
            Storage::I32(values) => try_resize(values, len, 0),
            Storage::F32(values) => try_resize(values, len, 0.0),
            Storage::F64(values) => try_resize(values, len, 0.0),
        }
    }

    /// Read one element converted to `T`. Out-of-range reads yield zero.
    pub(crate) fn get<T: Element>(&self, index: usize) -> T {
        with_values!(self, values => values.get(index).map(|v| v.cast::<T>()).unwrap_or_default())
    }

    pub(crate) fn set<T: Element>(&mut self, index: usize, value: T) {
        with_values!(self, values => {
            if let Some(slot) = values.get_mut(index) {
                *slot = value.cast();
            }
        })
    }

    /// Append `len` elements starting at `start`, up-cast to `T`.
    pub(crate) fn read_range<T: Element>(&self, start: usize, len: usize, out: &mut Vec<T>) {
        let end = start + len;
        if let Some(same) = T::view(self) {
            out.extend_from_slice(&same[start..end]);
            return;
        }
        with_values!(self, values => cast_extend(&values[start..end], out))
    }

    /// Append `count` elements taken every `stride` elements from `start`, up-cast to `T`.
    pub(crate) fn read_strided<T: Element>(
        &self,
        start: usize,
        stride: usize,
        count: usize,
        out: &mut Vec<T>,
    ) {
        with_values!(self, values => {
            out.extend(
                values[start..]
                    .iter()
                    .step_by(stride.max(1))
                    .take(count)
                    .map(|v| v.cast::<T>()),
            )
        })
    }

    /// Overwrite the elements at `start..start + src.len()`, down-casting from `T`.
    pub(crate) fn write_range<T: Element>(&mut self, start: usize, src: &[T]) {
        let end = start + src.len();
        if let Some(same) = T::view_mut(self) {
            same[start..end].copy_from_slice(src);
            return;
        }
        with_values!(self, values => cast_into(src, &mut values[start..end]))
    }

    pub(crate) fn write_strided<T: Element>(&mut self, start: usize, stride: usize, src: &[T]) {
        with_values!(self, values => {
            for (slot, &v) in values[start..].iter_mut().step_by(stride.max(1)).zip(src) {
                *slot = v.cast();
            }
        })
    }

    /// Little-endian encoding of the first `len` elements.
    pub(crate) fn le_bytes(&self, len: usize) -> Vec<u8> {
        let len = len.min(self.len());
        let mut out = Vec::with_capacity(len * self.data_type().size());
        with_values!(self, values => {
            for v in &values[..len] {
                out.extend_from_slice(&v.to_le_bytes());
            }
        });
        out
    }

    pub(crate) fn from_le_bytes(data_type: DataType, bytes: &[u8]) -> Result<Self> {
        let size = data_type.size();
        if bytes.len() % size != 0 {
            return Err(TableError::Archive(format!(
                "{} bytes is not a whole number of {data_type:?} elements",
                bytes.len()
            )));
        }
        let chunks = bytes.chunks_exact(size);
        Ok(match data_type {
            DataType::I32 => Storage::I32(
                chunks
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DataType::F32 => Storage::F32(
                chunks
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DataType::F64 => Storage::F64(
                chunks
                    .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
        })
    }
}

/// Who is responsible for the memory behind a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Supplied by the caller; the table only drops its handle on free.
    Borrowed,
    /// Allocated by the table.
    Owned,
}

/// Reference-counted handle to the memory of one table buffer.
///
/// Read-only fast-path descriptors clone the inner `Arc`, so the memory outlives a `free` on the
/// table until the last aliasing descriptor is released. Mutation goes through
/// [`Arc::make_mut`]: a writer never disturbs a view that is still held by a descriptor.
#[derive(Clone, Debug)]
pub struct SharedBuffer<S> {
    data: Arc<S>,
    ownership: Ownership,
}

/// Element buffer of a dense or packed table, or the values of a CSR table.
pub type Buffer = SharedBuffer<Storage>;

/// Column-index or row-offset buffer of a CSR table.
pub type IndexBuffer = SharedBuffer<Vec<usize>>;

impl<S: Clone> SharedBuffer<S> {
    pub fn owned(data: S) -> Self {
        Self {
            data: Arc::new(data),
            ownership: Ownership::Owned,
        }
    }

    pub fn borrowed(data: Arc<S>) -> Self {
        Self {
            data,
            ownership: Ownership::Borrowed,
        }
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn get(&self) -> &S {
        &self.data
    }

    pub(crate) fn shared(&self) -> Arc<S> {
        Arc::clone(&self.data)
    }

    /// Mutable access, detaching from any outstanding aliasing views first.
    ///
    /// A borrowed buffer whose caller still holds a handle is copied, and the copy belongs to
    /// the table from then on.
    pub(crate) fn make_mut(&mut self) -> &mut S {
        if Arc::strong_count(&self.data) > 1 {
            self.ownership = Ownership::Owned;
        }
        Arc::make_mut(&mut self.data)
    }

    pub(crate) fn is_owned(&self) -> bool {
        self.ownership == Ownership::Owned
    }

    /// Number of live handles (the table's plus aliasing descriptors and external owners).
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }
}
