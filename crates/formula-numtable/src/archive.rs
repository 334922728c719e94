#![forbid(unsafe_code)]

//! Serialization boundary.
//!
//! A table emits, in order: its dictionary, its row count, its layout tag and then its raw
//! buffers. Dense and packed tables write one element buffer; CSR tables write the values
//! (count first), the column indices and the row offsets. Fields carry no individual version
//! tags, so a layout change is a wire format change.
//!
//! The archive itself is an external collaborator; [`ByteArchive`] is a little-endian in-memory
//! implementation of both directions.

use crate::dictionary::{DataDictionary, FeatureInfo, FeatureKind};
use crate::element::DataType;
use crate::error::{Result, TableError};
use crate::storage::Storage;
use crate::table::StorageLayout;

pub trait OutputArchive {
    fn write_u8(&mut self, value: u8);
    fn write_u64(&mut self, value: u64);
    fn write_bytes(&mut self, bytes: &[u8]);
}

pub trait InputArchive {
    fn read_u8(&mut self) -> Result<u8>;
    fn read_u64(&mut self) -> Result<u64>;
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>>;
}

/// Tables that can write themselves to, and rebuild themselves from, an archive.
pub trait ArchiveSerialize: Sized {
    fn serialize(&self, archive: &mut dyn OutputArchive) -> Result<()>;
    fn deserialize(archive: &mut dyn InputArchive) -> Result<Self>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ByteArchive {
    bytes: Vec<u8>,
    cursor: usize,
}

impl ByteArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes, cursor: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Bytes not yet consumed by reads.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    fn take(&mut self, len: usize) -> Result<&[u8]> {
        let end = self
            .cursor
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                TableError::Archive(format!(
                    "unexpected end of archive: needed {len} bytes, {} left",
                    self.remaining()
                ))
            })?;
        let out = &self.bytes[self.cursor..end];
        self.cursor = end;
        Ok(out)
    }
}

impl OutputArchive for ByteArchive {
    fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    fn write_u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }
}

impl InputArchive for ByteArchive {
    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.take(len)?.to_vec())
    }
}

pub(crate) fn read_len(archive: &mut dyn InputArchive) -> Result<usize> {
    let value = archive.read_u64()?;
    usize::try_from(value)
        .map_err(|_| TableError::Archive(format!("length {value} does not fit in memory")))
}

fn read_data_type(archive: &mut dyn InputArchive) -> Result<DataType> {
    let tag = archive.read_u8()?;
    DataType::from_tag(tag).ok_or_else(|| TableError::Archive(format!("unknown data type tag {tag}")))
}

pub(crate) fn read_layout(archive: &mut dyn InputArchive) -> Result<StorageLayout> {
    let tag = archive.read_u8()?;
    StorageLayout::from_tag(tag)
        .ok_or_else(|| TableError::Archive(format!("unknown layout tag {tag}")))
}

pub(crate) fn write_dictionary(archive: &mut dyn OutputArchive, dictionary: &DataDictionary) {
    archive.write_u64(dictionary.len() as u64);
    for feature in dictionary.features() {
        archive.write_u8(feature.data_type.tag());
        archive.write_u8(feature.kind.tag());
        archive.write_u64(feature.category_count as u64);
    }
}

pub(crate) fn read_dictionary(archive: &mut dyn InputArchive) -> Result<DataDictionary> {
    let n_features = read_len(archive)?;
    // The count is untrusted input.
    let mut features = Vec::with_capacity(n_features.min(1 << 16));
    for _ in 0..n_features {
        let data_type = read_data_type(archive)?;
        let tag = archive.read_u8()?;
        let kind = FeatureKind::from_tag(tag)
            .ok_or_else(|| TableError::Archive(format!("unknown feature kind tag {tag}")))?;
        let category_count = read_len(archive)?;
        features.push(FeatureInfo {
            kind,
            category_count,
            ..FeatureInfo::new(data_type)
        });
    }
    Ok(DataDictionary::from_features(features))
}

/// Write the first `len` elements of `storage`: type tag, element count, raw bytes.
pub(crate) fn write_storage(archive: &mut dyn OutputArchive, storage: &Storage, len: usize) {
    let len = len.min(storage.len());
    archive.write_u8(storage.data_type().tag());
    archive.write_u64(len as u64);
    archive.write_bytes(&storage.le_bytes(len));
}

pub(crate) fn read_storage(archive: &mut dyn InputArchive) -> Result<Storage> {
    let data_type = read_data_type(archive)?;
    let len = read_len(archive)?;
    let n_bytes = len
        .checked_mul(data_type.size())
        .ok_or_else(|| TableError::Archive(format!("element count {len} overflows")))?;
    let bytes = archive.read_bytes(n_bytes)?;
    Storage::from_le_bytes(data_type, &bytes)
}

pub(crate) fn write_indices(archive: &mut dyn OutputArchive, indices: &[usize]) {
    archive.write_u64(indices.len() as u64);
    for &index in indices {
        archive.write_u64(index as u64);
    }
}

pub(crate) fn read_indices(archive: &mut dyn InputArchive) -> Result<Vec<usize>> {
    let len = read_len(archive)?;
    let mut indices = Vec::with_capacity(len.min(1 << 16));
    for _ in 0..len {
        indices.push(read_len(archive)?);
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dictionary_round_trips_with_categories() {
        let mut dictionary = DataDictionary::with_uniform_type(3, DataType::I32);
        dictionary
            .set_feature(2, FeatureInfo::categorical(DataType::I32, 7))
            .unwrap();

        let mut archive = ByteArchive::new();
        write_dictionary(&mut archive, &dictionary);
        let mut input = ByteArchive::from_bytes(archive.into_bytes());
        assert_eq!(read_dictionary(&mut input).unwrap(), dictionary);
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn truncated_archive_reports_an_error() {
        let mut archive = ByteArchive::new();
        write_storage(&mut archive, &Storage::F64(vec![1.0, 2.0]), 2);
        let mut bytes = archive.into_bytes();
        bytes.truncate(bytes.len() - 3);

        let err = read_storage(&mut ByteArchive::from_bytes(bytes)).unwrap_err();
        assert!(matches!(err, TableError::Archive(_)), "{err:?}");
    }

    #[test]
    fn unknown_layout_tag_is_rejected() {
        let mut input = ByteArchive::from_bytes(vec![42]);
        assert_eq!(
            read_layout(&mut input),
            Err(TableError::Archive("unknown layout tag 42".to_owned()))
        );
    }
}
