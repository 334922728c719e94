#![forbid(unsafe_code)]

use crate::element::{DataType, Element};
use crate::error::{Result, TableError};
use serde::{Deserialize, Serialize};

/// Statistical kind of a feature (column).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureKind {
    #[default]
    Continuous,
    Ordinal,
    Categorical,
}

impl FeatureKind {
    pub(crate) fn tag(self) -> u8 {
        match self {
            FeatureKind::Continuous => 0,
            FeatureKind::Ordinal => 1,
            FeatureKind::Categorical => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(FeatureKind::Continuous),
            1 => Some(FeatureKind::Ordinal),
            2 => Some(FeatureKind::Categorical),
            _ => None,
        }
    }
}

/// Per-column metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureInfo {
    pub data_type: DataType,
    pub element_size: usize,
    pub kind: FeatureKind,
    /// Number of categories for categorical features; zero otherwise.
    pub category_count: usize,
}

impl FeatureInfo {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            element_size: data_type.size(),
            kind: FeatureKind::Continuous,
            category_count: 0,
        }
    }

    pub fn of<T: Element>() -> Self {
        Self::new(T::DATA_TYPE)
    }

    pub fn categorical(data_type: DataType, category_count: usize) -> Self {
        Self {
            kind: FeatureKind::Categorical,
            category_count,
            ..Self::new(data_type)
        }
    }
}

impl Default for FeatureInfo {
    fn default() -> Self {
        Self::new(DataType::default())
    }
}

/// Ordered per-column descriptors of a table.
///
/// The dictionary length always equals the owning table's column count; changing the column count
/// goes through [`DataDictionary::reset`], which discards every existing descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDictionary {
    features: Vec<FeatureInfo>,
}

impl DataDictionary {
    pub fn new(n_features: usize) -> Self {
        Self {
            features: vec![FeatureInfo::default(); n_features],
        }
    }

    pub fn with_uniform_type(n_features: usize, data_type: DataType) -> Self {
        Self {
            features: vec![FeatureInfo::new(data_type); n_features],
        }
    }

    pub fn from_features(features: Vec<FeatureInfo>) -> Self {
        Self { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn features(&self) -> &[FeatureInfo] {
        &self.features
    }

    pub fn feature(&self, index: usize) -> Option<&FeatureInfo> {
        self.features.get(index)
    }

    pub fn data_type(&self, index: usize) -> Option<DataType> {
        self.feature(index).map(|f| f.data_type)
    }

    pub fn set_feature(&mut self, index: usize, info: FeatureInfo) -> Result<()> {
        let n_columns = self.features.len();
        let slot = self
            .features
            .get_mut(index)
            .ok_or(TableError::FeatureIndexOutOfRange {
                feature: index,
                n_columns,
            })?;
        *slot = info;
        Ok(())
    }

    /// Give every feature the same descriptor.
    pub fn set_all_features(&mut self, info: FeatureInfo) {
        self.features.fill(info);
    }

    /// Resize to `n_features` default descriptors, dropping the old contents.
    pub fn reset(&mut self, n_features: usize) {
        self.features.clear();
        self.features.resize(n_features, FeatureInfo::default());
    }

    /// The shared data type when every feature has the same one.
    pub fn homogeneous_type(&self) -> Option<DataType> {
        let first = self.features.first()?.data_type;
        self.features
            .iter()
            .all(|f| f.data_type == first)
            .then_some(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reset_discards_previous_descriptors() {
        let mut dict = DataDictionary::with_uniform_type(2, DataType::I32);
        dict.set_feature(1, FeatureInfo::categorical(DataType::I32, 4))
            .unwrap();
        dict.reset(3);
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.features(), &[FeatureInfo::default(); 3]);
    }

    #[test]
    fn set_feature_rejects_out_of_range_index() {
        let mut dict = DataDictionary::new(2);
        assert_eq!(
            dict.set_feature(2, FeatureInfo::default()),
            Err(TableError::FeatureIndexOutOfRange {
                feature: 2,
                n_columns: 2
            })
        );
    }

    #[test]
    fn homogeneous_type_requires_agreement() {
        let mut dict = DataDictionary::with_uniform_type(3, DataType::F32);
        assert_eq!(dict.homogeneous_type(), Some(DataType::F32));
        dict.set_feature(0, FeatureInfo::of::<f64>()).unwrap();
        assert_eq!(dict.homogeneous_type(), None);
        assert_eq!(DataDictionary::new(0).homogeneous_type(), None);
    }
}
