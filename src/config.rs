//! The configuration model: three ordered mappings (dimensions,
//! variables, global attributes) with schema and cross-validation.
//!
//! A [`Config`] describes the output of an aggregation. It comes from
//! an explicit JSON document (three ordered sections, round-trippable)
//! or by reflection over a sample input file. Cross-references are
//! held by name and resolved by lookup against the owning map, never
//! by pointers.

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde_derive::{Deserialize, Serialize};

use crate::attributes::StrategyKind;
use crate::dataset::time::TimeUnits;
use crate::dataset::{AttrValue, DataType, Dataset, FILL_VALUE_ATTR};
use crate::{Error, Result};

/// A bound on an indexing variable: numeric, or a calendar instant
/// that cross-validation converts to numeric through the indexing
/// variable's units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bound {
    Number(f64),
    Time(NaiveDateTime),
}

impl Bound {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Bound::Number(v) => Some(*v),
            Bound::Time(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionConfig {
    pub name: String,
    /// `None` means unlimited.
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub flatten: bool,
    #[serde(default)]
    pub index_by: Option<String>,
    #[serde(default)]
    pub min: Option<Bound>,
    #[serde(default)]
    pub max: Option<Bound>,
    /// Where to slice the indexing variable along its other
    /// dimensions, when it has any. Missing entries default to 0.
    #[serde(default)]
    pub other_dim_inds: IndexMap<String, usize>,
    /// Expected samples per unit, keyed by dimension of the indexing
    /// variable.
    #[serde(default)]
    pub expected_cadence: IndexMap<String, f64>,
    /// Marks the dimension that drives cross-file sorting and bounds.
    #[serde(default)]
    pub is_primary: bool,
}

impl DimensionConfig {
    pub fn new(name: &str, size: Option<usize>) -> DimensionConfig {
        DimensionConfig {
            name: name.to_string(),
            size,
            flatten: false,
            index_by: None,
            min: None,
            max: None,
            other_dim_inds: IndexMap::new(),
            expected_cadence: IndexMap::new(),
            is_primary: false,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.size.is_none()
    }

    /// The cadence along the dimension itself, when configured and
    /// positive.
    pub fn own_cadence(&self) -> Option<f64> {
        self.expected_cadence
            .get(&self.name)
            .copied()
            .filter(|hz| *hz > 0.0)
    }

    pub fn min_value(&self) -> Option<f64> {
        self.min.as_ref().and_then(Bound::as_number)
    }

    pub fn max_value(&self) -> Option<f64> {
        self.max.as_ref().and_then(Bound::as_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableConfig {
    pub name: String,
    pub dimensions: Vec<String>,
    pub datatype: DataType,
    #[serde(default)]
    pub attributes: IndexMap<String, AttrValue>,
    #[serde(default)]
    pub chunksizes: Option<Vec<usize>>,
}

impl VariableConfig {
    /// The fill value for this variable: its `_FillValue` attribute,
    /// or the canonical default for the type. String variables carry
    /// the empty string (`None` here).
    pub fn fill_value(&self) -> Option<AttrValue> {
        self.attributes
            .get(FILL_VALUE_ATTR)
            .cloned()
            .or_else(|| self.datatype.default_fill())
    }

    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeConfig {
    pub name: String,
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Used by the `static` strategy only.
    #[serde(default)]
    pub value: Option<AttrValue>,
}

/// The serialized form: three ordered lists, human-editable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigDoc {
    #[serde(default)]
    pub dimensions: Vec<DimensionConfig>,
    #[serde(default)]
    pub variables: Vec<VariableConfig>,
    #[serde(default)]
    pub attributes: Vec<AttributeConfig>,
}

/// An aggregation configuration: what dimensions, variables, and
/// global attributes the output has, and how they link together.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    pub dims: IndexMap<String, DimensionConfig>,
    pub vars: IndexMap<String, VariableConfig>,
    pub attrs: IndexMap<String, AttributeConfig>,
}

impl Config {
    pub fn from_doc(doc: ConfigDoc) -> Config {
        let mut config = Config::default();
        for d in doc.dimensions {
            config.dims.insert(d.name.clone(), d);
        }
        for v in doc.variables {
            config.vars.insert(v.name.clone(), v);
        }
        for a in doc.attributes {
            config.attrs.insert(a.name.clone(), a);
        }
        config
    }

    pub fn to_doc(&self) -> ConfigDoc {
        ConfigDoc {
            dimensions: self.dims.values().cloned().collect(),
            variables: self.vars.values().cloned().collect(),
            attributes: self.attrs.values().cloned().collect(),
        }
    }

    pub fn from_json(text: &str) -> Result<Config> {
        Ok(Config::from_doc(serde_json::from_str(text)?))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_doc())?)
    }

    /// Reflect a configuration from a sample input. Every dimension,
    /// variable (with a `_FillValue` inserted for numeric variables
    /// that lack one), and global attribute (strategy `first`, except
    /// the dynamic timestamp attributes) is carried over.
    pub fn from_dataset(ds: &Dataset) -> Config {
        let mut config = Config::default();
        for (name, size) in &ds.dimensions {
            config
                .dims
                .insert(name.clone(), DimensionConfig::new(name, *size));
        }
        for (name, var) in &ds.variables {
            let mut attributes = var.attributes.clone();
            let datatype = var.dtype();
            if datatype.is_numeric() && !attributes.contains_key(FILL_VALUE_ATTR) {
                if let Some(fill) = datatype.default_fill() {
                    attributes.insert(FILL_VALUE_ATTR.to_string(), fill);
                }
            }
            config.vars.insert(
                name.clone(),
                VariableConfig {
                    name: name.clone(),
                    dimensions: var.dimensions.clone(),
                    datatype,
                    attributes,
                    chunksizes: var.chunksizes.clone(),
                },
            );
        }
        for name in ds.attributes.keys() {
            let strategy = match name.as_str() {
                "date_created" => StrategyKind::DateCreated,
                "time_coverage_start" => StrategyKind::TimeCoverageStart,
                "time_coverage_end" => StrategyKind::TimeCoverageEnd,
                _ => StrategyKind::First,
            };
            config.attrs.insert(
                name.clone(),
                AttributeConfig {
                    name: name.clone(),
                    strategy,
                    value: None,
                },
            );
        }
        config
    }

    /// Reflect from a container on disk.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Config> {
        Ok(Config::from_dataset(&Dataset::open(path)?))
    }

    /// Cross-validate and normalize. Calendar bounds are converted to
    /// numeric through the indexing variable's units; dimensions
    /// without `index_by` drop their indexing-only fields. Fails with
    /// the `Config` error kind.
    pub fn validate(&mut self) -> Result<()> {
        // Indexing-only fields mean nothing without index_by.
        for dim in self.dims.values_mut() {
            if dim.index_by.is_none() {
                dim.min = None;
                dim.max = None;
                dim.other_dim_inds.clear();
                dim.expected_cadence.clear();
            }
        }

        let used: Vec<&String> = self.vars.values().flat_map(|v| &v.dimensions).collect();
        for dim in self.dims.keys() {
            if !used.iter().any(|d| *d == dim) {
                return Err(Error::Config(format!("unused dimension: {}", dim)));
            }
        }
        for d in &used {
            if !self.dims.contains_key(*d) {
                return Err(Error::Config(format!(
                    "variable depends on unconfigured dimension: {}",
                    d
                )));
            }
        }

        for var in self.vars.values() {
            if let Some(chunks) = &var.chunksizes {
                if chunks.len() != var.dimensions.len() {
                    return Err(Error::Config(format!(
                        "variable {}: chunksizes length {} != dimensions length {}",
                        var.name,
                        chunks.len(),
                        var.dimensions.len()
                    )));
                }
            }
        }

        let mut n_primary = 0;
        for dim in self.dims.values() {
            if dim.is_primary {
                n_primary += 1;
            }
            if n_primary > 1 {
                return Err(Error::Config("more than one primary dimension".into()));
            }
            if let Some(index_by) = &dim.index_by {
                if !self.vars.contains_key(index_by) {
                    return Err(Error::Config(format!(
                        "dimension {}: index_by variable not found: {}",
                        dim.name, index_by
                    )));
                }
            }
            for (other, ind) in &dim.other_dim_inds {
                match self.dims.get(other) {
                    None => {
                        return Err(Error::Config(format!(
                            "dimension {}: other_dim_inds names unknown dimension {}",
                            dim.name, other
                        )))
                    }
                    Some(o) => {
                        if let Some(size) = o.size {
                            if *ind >= size {
                                return Err(Error::Config(format!(
                                    "dimension {}: index {} out of range for {} (size {})",
                                    dim.name, ind, other, size
                                )));
                            }
                        }
                    }
                }
            }
        }

        // Normalize calendar bounds to numeric, then order-check.
        let mut resolved: Vec<(String, Option<Bound>, Option<Bound>)> = Vec::new();
        for dim in self.dims.values() {
            let needs_units = matches!(dim.min, Some(Bound::Time(_)))
                || matches!(dim.max, Some(Bound::Time(_)));
            let units = if needs_units {
                Some(self.index_units(dim)?)
            } else {
                None
            };
            let convert = |bound: &Option<Bound>| -> Option<Bound> {
                match bound {
                    Some(Bound::Time(t)) => {
                        units.as_ref().map(|u| Bound::Number(u.date_to_num(*t)))
                    }
                    other => *other,
                }
            };
            resolved.push((dim.name.clone(), convert(&dim.min), convert(&dim.max)));
        }
        for (name, min, max) in resolved {
            if let Some(dim) = self.dims.get_mut(&name) {
                dim.min = min;
                dim.max = max;
                if let (Some(lo), Some(hi)) = (dim.min_value(), dim.max_value()) {
                    if lo > hi {
                        return Err(Error::Config(format!(
                            "dimension {}: min {} > max {}",
                            name, lo, hi
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Parsed units of the variable indexing `dim`.
    pub fn index_units(&self, dim: &DimensionConfig) -> Result<TimeUnits> {
        let index_by = dim.index_by.as_ref().ok_or_else(|| {
            Error::Config(format!("dimension {} has no index_by variable", dim.name))
        })?;
        let var = self
            .vars
            .get(index_by)
            .ok_or_else(|| Error::Config(format!("index_by variable not found: {}", index_by)))?;
        let units = var
            .attribute("units")
            .and_then(AttrValue::as_str)
            .ok_or_else(|| {
                Error::Config(format!("variable {} has no units attribute", index_by))
            })?;
        TimeUnits::parse(units)
            .map_err(|e| Error::Config(format!("variable {}: {}", index_by, e)))
    }

    /// Dimensions that drive coverage analysis: indexed and not
    /// flattened.
    pub fn indexed_dims(&self) -> Vec<&DimensionConfig> {
        self.dims
            .values()
            .filter(|d| d.index_by.is_some() && !d.flatten)
            .collect()
    }

    /// The primary indexing dimension: the one marked, or the first.
    pub fn primary_dim(&self) -> Option<&DimensionConfig> {
        let indexed = self.indexed_dims();
        indexed
            .iter()
            .find(|d| d.is_primary)
            .copied()
            .or_else(|| indexed.first().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};

    fn sample_dataset() -> Dataset {
        let mut ds = Dataset::new();
        ds.add_dimension("record", None);
        let time = Array::from_shape_vec(IxDyn(&[2]), vec![1.0, 2.0]).unwrap();
        let mut attrs = IndexMap::new();
        attrs.insert(
            "units".to_string(),
            AttrValue::Str("seconds since 2017-01-01 00:00:00".into()),
        );
        ds.add_variable("time", &["record"], DataValues::Float64(time), attrs, None)
            .unwrap();
        let counts = Array::from_shape_vec(IxDyn(&[2]), vec![0i16, 1]).unwrap();
        ds.add_variable(
            "counts",
            &["record"],
            DataValues::Int16(counts),
            IndexMap::new(),
            None,
        )
        .unwrap();
        ds.set_attribute("date_created", AttrValue::Str("2017-01-01".into()));
        ds.set_attribute("production_site", AttrValue::Str("A".into()));
        ds
    }

    use crate::dataset::DataValues;

    #[test]
    fn reflection_inserts_default_fill_and_dynamic_strategies() {
        let config = Config::from_dataset(&sample_dataset());
        assert!(config.vars["counts"].attributes.contains_key(FILL_VALUE_ATTR));
        assert_eq!(
            config.attrs["date_created"].strategy,
            StrategyKind::DateCreated
        );
        assert_eq!(
            config.attrs["production_site"].strategy,
            StrategyKind::First
        );
    }

    #[test]
    fn document_round_trip() {
        let mut config = Config::from_dataset(&sample_dataset());
        let dim = config.dims.get_mut("record").unwrap();
        dim.index_by = Some("time".to_string());
        dim.expected_cadence.insert("record".to_string(), 1.0);
        let text = config.to_json().unwrap();
        let back = Config::from_json(&text).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn unused_dimension_rejected() {
        let mut config = Config::from_dataset(&sample_dataset());
        config
            .dims
            .insert("orphan".to_string(), DimensionConfig::new("orphan", Some(4)));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn unconfigured_dimension_rejected() {
        let mut config = Config::from_dataset(&sample_dataset());
        config.dims.shift_remove("record");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn missing_index_by_variable_rejected() {
        let mut config = Config::from_dataset(&sample_dataset());
        config.dims.get_mut("record").unwrap().index_by = Some("nope".to_string());
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn calendar_bounds_normalized_through_units() {
        let mut config = Config::from_dataset(&sample_dataset());
        let dim = config.dims.get_mut("record").unwrap();
        dim.index_by = Some("time".to_string());
        dim.min = Some(Bound::Time(
            chrono::NaiveDate::from_ymd_opt(2017, 1, 1)
                .unwrap()
                .and_hms_opt(0, 1, 0)
                .unwrap(),
        ));
        dim.max = Some(Bound::Number(120.0));
        config.validate().unwrap();
        let dim = &config.dims["record"];
        assert_eq!(dim.min_value(), Some(60.0));
        assert_eq!(dim.max_value(), Some(120.0));
    }

    #[test]
    fn inverted_bounds_rejected() {
        let mut config = Config::from_dataset(&sample_dataset());
        let dim = config.dims.get_mut("record").unwrap();
        dim.index_by = Some("time".to_string());
        dim.min = Some(Bound::Number(10.0));
        dim.max = Some(Bound::Number(5.0));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn primary_dimension_drives_selection() {
        let mut config = Config::from_dataset(&sample_dataset());
        config
            .dims
            .insert("report".to_string(), DimensionConfig::new("report", None));
        for name in ["record", "report"] {
            let dim = config.dims.get_mut(name).unwrap();
            dim.index_by = Some("time".to_string());
        }
        assert_eq!(config.primary_dim().map(|d| d.name.as_str()), Some("record"));
        config.dims.get_mut("report").unwrap().is_primary = true;
        assert_eq!(config.primary_dim().map(|d| d.name.as_str()), Some("report"));
    }

    #[test]
    fn second_primary_dimension_rejected() {
        let mut config = Config::from_dataset(&sample_dataset());
        config
            .dims
            .insert("report".to_string(), DimensionConfig::new("report", Some(2)));
        config
            .vars
            .get_mut("counts")
            .unwrap()
            .dimensions
            .push("report".to_string());
        // keep shapes abstract; only the flag check matters here
        config.dims.get_mut("record").unwrap().is_primary = true;
        config.dims.get_mut("report").unwrap().is_primary = true;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn indexing_fields_cleared_without_index_by() {
        let mut config = Config::from_dataset(&sample_dataset());
        let dim = config.dims.get_mut("record").unwrap();
        dim.min = Some(Bound::Number(0.0));
        dim.expected_cadence.insert("record".to_string(), 1.0);
        config.validate().unwrap();
        let dim = &config.dims["record"];
        assert_eq!(dim.min, None);
        assert!(dim.expected_cadence.is_empty());
    }
}

