//! The bundled container format.
//!
//! A [`Dataset`] is a self-describing array file held in memory: named
//! dimensions (fixed or unlimited), typed variables with per-variable
//! attributes, and file-level attributes. On disk a dataset is a CBOR
//! document (or JSON when the path ends in `.json`); reads go through
//! a memory map, writes through a buffered writer.

pub mod time;
mod values;

pub use values::{
    AttrValue, DataType, DataValues, FILL_FLOAT32, FILL_FLOAT64, FILL_INT16, FILL_INT32,
    FILL_INT64, FILL_INT8, FILL_UINT16, FILL_UINT32, FILL_UINT64, FILL_UINT8,
};

use std::fs::File;
use std::path::Path;

use indexmap::IndexMap;
use serde_derive::{Deserialize, Serialize};

use crate::{Error, Result};

/// The attribute carrying a variable's fill value.
pub const FILL_VALUE_ATTR: &str = "_FillValue";

/// One variable: ordered dimension names, the payload, attributes, and
/// an optional chunking layout kept as metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataVariable {
    pub dimensions: Vec<String>,
    pub values: DataValues,
    #[serde(default)]
    pub attributes: IndexMap<String, AttrValue>,
    #[serde(default)]
    pub chunksizes: Option<Vec<usize>>,
}

impl DataVariable {
    pub fn dtype(&self) -> DataType {
        self.values.dtype()
    }

    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// The declared fill value, if any.
    pub fn fill_value(&self) -> Option<&AttrValue> {
        self.attributes.get(FILL_VALUE_ATTR)
    }
}

/// A self-describing array file. Dimension size `None` means
/// unlimited; the current length of an unlimited dimension is implied
/// by the variables laid out along it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub dimensions: IndexMap<String, Option<usize>>,
    pub variables: IndexMap<String, DataVariable>,
    pub attributes: IndexMap<String, AttrValue>,
}

impl Dataset {
    pub fn new() -> Dataset {
        Dataset::default()
    }

    /// Declare a dimension. `None` size makes it unlimited.
    pub fn add_dimension(&mut self, name: &str, size: Option<usize>) {
        self.dimensions.insert(name.to_string(), size);
    }

    /// Add a variable, checking its shape against the declared
    /// dimensions (unlimited dimensions accept any length).
    pub fn add_variable(
        &mut self,
        name: &str,
        dimensions: &[&str],
        values: DataValues,
        attributes: IndexMap<String, AttrValue>,
        chunksizes: Option<Vec<usize>>,
    ) -> Result<()> {
        if values.ndim() != dimensions.len() {
            return Err(Error::Dataset(format!(
                "variable {}: {} dimensions declared but payload has {} axes",
                name,
                dimensions.len(),
                values.ndim()
            )));
        }
        for (axis, dim) in dimensions.iter().enumerate() {
            match self.dimensions.get(*dim) {
                None => {
                    return Err(Error::Dataset(format!(
                        "variable {}: undeclared dimension {}",
                        name, dim
                    )))
                }
                Some(Some(size)) if values.shape()[axis] != *size => {
                    return Err(Error::Dataset(format!(
                        "variable {}: dimension {} has size {} but payload axis {} has length {}",
                        name,
                        dim,
                        size,
                        axis,
                        values.shape()[axis]
                    )));
                }
                _ => {}
            }
        }
        self.variables.insert(
            name.to_string(),
            DataVariable {
                dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
                values,
                attributes,
                chunksizes,
            },
        );
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&DataVariable> {
        self.variables.get(name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut DataVariable> {
        self.variables.get_mut(name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: &str, value: AttrValue) {
        self.attributes.insert(name.to_string(), value);
    }

    pub fn is_unlimited(&self, name: &str) -> Option<bool> {
        self.dimensions.get(name).map(|s| s.is_none())
    }

    /// Current length of a dimension: the declared size for fixed
    /// dimensions, otherwise the longest extent any variable lays out
    /// along it (0 when nothing uses it yet).
    pub fn dim_len(&self, name: &str) -> Option<usize> {
        match self.dimensions.get(name)? {
            Some(size) => Some(*size),
            None => Some(
                self.variables
                    .values()
                    .filter_map(|v| {
                        v.dimensions
                            .iter()
                            .position(|d| d == name)
                            .map(|axis| v.values.shape()[axis])
                    })
                    .max()
                    .unwrap_or(0),
            ),
        }
    }

    /// Read a container. `.json` paths hold the JSON encoding,
    /// everything else the CBOR encoding.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Dataset> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let map = unsafe { memmap::MmapOptions::new().map(&file)? };
        if is_json(path) {
            Ok(serde_json::from_slice(map.as_ref())?)
        } else {
            Ok(serde_cbor::from_slice(map.as_ref())?)
        }
    }

    /// Write the container, encoding by extension as in [`open`].
    ///
    /// [`open`]: Dataset::open
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let buf = std::io::BufWriter::with_capacity(0x100000, file);
        if is_json(path) {
            serde_json::to_writer(buf, self)?;
        } else {
            serde_cbor::to_writer(buf, self)?;
        }
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};
    use tempdir::TempDir;

    fn sample() -> Dataset {
        let mut ds = Dataset::new();
        ds.add_dimension("record", None);
        ds.add_dimension("band", Some(2));
        let time = Array::from_shape_vec(IxDyn(&[3]), vec![1.0, 2.0, 3.0]).unwrap();
        let mut attrs = IndexMap::new();
        attrs.insert(
            "units".to_string(),
            AttrValue::Str("seconds since 2017-01-01 00:00:00".into()),
        );
        ds.add_variable("time", &["record"], DataValues::Float64(time), attrs, None)
            .unwrap();
        let data = Array::from_shape_vec(IxDyn(&[3, 2]), vec![0i32; 6]).unwrap();
        ds.add_variable(
            "counts",
            &["record", "band"],
            DataValues::Int32(data),
            IndexMap::new(),
            Some(vec![1024, 2]),
        )
        .unwrap();
        ds.set_attribute("production_site", AttrValue::Str("A".into()));
        ds
    }

    #[test]
    fn shape_checked_against_dimensions() {
        let mut ds = sample();
        let bad = Array::from_shape_vec(IxDyn(&[3, 5]), vec![0i32; 15]).unwrap();
        assert!(ds
            .add_variable(
                "bad",
                &["record", "band"],
                DataValues::Int32(bad),
                IndexMap::new(),
                None
            )
            .is_err());
    }

    #[test]
    fn unlimited_length_follows_variables() {
        let ds = sample();
        assert_eq!(ds.dim_len("record"), Some(3));
        assert_eq!(ds.dim_len("band"), Some(2));
        assert_eq!(ds.is_unlimited("record"), Some(true));
    }

    #[test]
    fn cbor_round_trip() {
        let tmp = TempDir::new("granules_test").unwrap();
        let path = tmp.path().join("sample.gnc");
        let ds = sample();
        ds.write(&path).unwrap();
        assert_eq!(Dataset::open(&path).unwrap(), ds);
    }

    #[test]
    fn json_round_trip() {
        let tmp = TempDir::new("granules_test").unwrap();
        let path = tmp.path().join("sample.json");
        let ds = sample();
        ds.write(&path).unwrap();
        assert_eq!(Dataset::open(&path).unwrap(), ds);
    }
}
