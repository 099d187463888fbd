//! Typed array payloads and attribute values.
//!
//! Every variable in a container carries a [`DataValues`]: a tagged
//! n-dimensional array over one of the supported element types. The
//! planning and stitching core moves data exclusively through the
//! operations here (permutation select, range slicing, constant fill,
//! slice assignment), so the rest of the crate never matches on the
//! element type itself.

use std::fmt;
use std::ops::Range;

use ndarray::{ArrayD, Axis, IxDyn, Slice};
use serde_derive::{Deserialize, Serialize};

use crate::{Error, Result};

/// Canonical default fill values, one per numeric type. These follow
/// the netCDF convention; string variables fill with the empty string.
pub const FILL_INT8: i8 = -127;
pub const FILL_UINT8: u8 = 255;
pub const FILL_INT16: i16 = -32767;
pub const FILL_UINT16: u16 = 65535;
pub const FILL_INT32: i32 = -2_147_483_647;
pub const FILL_UINT32: u32 = 4_294_967_295;
pub const FILL_INT64: i64 = -9_223_372_036_854_775_806;
pub const FILL_UINT64: u64 = 18_446_744_073_709_551_614;
pub const FILL_FLOAT32: f32 = 9.969_209_968_386_869e36;
pub const FILL_FLOAT64: f64 = 9.969_209_968_386_869e36;

/// Element type tag for a variable. Serializes to the lowercase name
/// used in configuration documents ("int8", "float64", "string", ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    String,
}

impl DataType {
    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, DataType::String)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Int8 => "int8",
            DataType::UInt8 => "uint8",
            DataType::Int16 => "int16",
            DataType::UInt16 => "uint16",
            DataType::Int32 => "int32",
            DataType::UInt32 => "uint32",
            DataType::Int64 => "int64",
            DataType::UInt64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::String => "string",
        }
    }

    /// The canonical `_FillValue` for this type, or `None` for string
    /// variables which carry the empty string implicitly.
    pub fn default_fill(self) -> Option<AttrValue> {
        match self {
            DataType::Int8 => Some(AttrValue::Int(FILL_INT8 as i64)),
            DataType::UInt8 => Some(AttrValue::Int(FILL_UINT8 as i64)),
            DataType::Int16 => Some(AttrValue::Int(FILL_INT16 as i64)),
            DataType::UInt16 => Some(AttrValue::Int(FILL_UINT16 as i64)),
            DataType::Int32 => Some(AttrValue::Int(FILL_INT32 as i64)),
            DataType::UInt32 => Some(AttrValue::Int(FILL_UINT32 as i64)),
            DataType::Int64 => Some(AttrValue::Int(FILL_INT64)),
            DataType::UInt64 => Some(AttrValue::Float(FILL_UINT64 as f64)),
            DataType::Float32 => Some(AttrValue::Float(FILL_FLOAT32 as f64)),
            DataType::Float64 => Some(AttrValue::Float(FILL_FLOAT64)),
            DataType::String => None,
        }
    }
}

/// A scalar or array attribute value, on variables or on the file
/// itself. The untagged representation keeps configuration documents
/// and containers human-editable: strings stay strings, numbers stay
/// numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Float(v) => Some(*v),
            AttrValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Float(v) => Some(*v as i64),
            AttrValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// An empty string means "omit this attribute".
    pub fn is_empty(&self) -> bool {
        matches!(self, AttrValue::Str(s) if s.is_empty())
    }

    /// Coerce a scalar attribute to the numeric family of `dtype`.
    /// Used for attributes the container requires to match the
    /// variable type (`_FillValue`, `valid_min`, `valid_max`).
    pub fn cast_scalar(&self, dtype: DataType) -> AttrValue {
        match self.as_f64() {
            Some(v) if dtype.is_float() => AttrValue::Float(v),
            Some(v) if dtype.is_numeric() => AttrValue::Int(v as i64),
            _ => self.clone(),
        }
    }

    /// Coerce to an array attribute of the numeric family of `dtype`.
    /// Accepts a `", "` separated string, a scalar, or a list. Used
    /// for `valid_range`, `flag_masks`, `flag_values`.
    pub fn cast_list(&self, dtype: DataType) -> AttrValue {
        let nums: Vec<f64> = match self {
            AttrValue::Str(s) => s.split(',').filter_map(|p| p.trim().parse().ok()).collect(),
            AttrValue::Int(v) => vec![*v as f64],
            AttrValue::Float(v) => vec![*v],
            AttrValue::IntList(v) => v.iter().map(|&i| i as f64).collect(),
            AttrValue::FloatList(v) => v.clone(),
        };
        if nums.is_empty() {
            return self.clone();
        }
        if dtype.is_float() {
            AttrValue::FloatList(nums)
        } else {
            AttrValue::IntList(nums.iter().map(|&v| v as i64).collect())
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AttrValue::Str(s) => write!(f, "{}", s),
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::IntList(v) => {
                let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "{}", parts.join(", "))
            }
            AttrValue::FloatList(v) => {
                let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "{}", parts.join(", "))
            }
        }
    }
}

/// Run `$body` with `$a` bound to the inner `ArrayD` of any variant.
macro_rules! with_values {
    ($v:expr, $a:pat => $body:expr) => {
        match $v {
            DataValues::Int8($a) => $body,
            DataValues::UInt8($a) => $body,
            DataValues::Int16($a) => $body,
            DataValues::UInt16($a) => $body,
            DataValues::Int32($a) => $body,
            DataValues::UInt32($a) => $body,
            DataValues::Int64($a) => $body,
            DataValues::UInt64($a) => $body,
            DataValues::Float32($a) => $body,
            DataValues::Float64($a) => $body,
            DataValues::Str($a) => $body,
        }
    };
}

/// Like `with_values!` but rewraps the result in the same variant.
macro_rules! map_values {
    ($v:expr, $a:pat => $body:expr) => {
        match $v {
            DataValues::Int8($a) => DataValues::Int8($body),
            DataValues::UInt8($a) => DataValues::UInt8($body),
            DataValues::Int16($a) => DataValues::Int16($body),
            DataValues::UInt16($a) => DataValues::UInt16($body),
            DataValues::Int32($a) => DataValues::Int32($body),
            DataValues::UInt32($a) => DataValues::UInt32($body),
            DataValues::Int64($a) => DataValues::Int64($body),
            DataValues::UInt64($a) => DataValues::UInt64($body),
            DataValues::Float32($a) => DataValues::Float32($body),
            DataValues::Float64($a) => DataValues::Float64($body),
            DataValues::Str($a) => DataValues::Str($body),
        }
    };
}

/// Numeric variants only; `$else` handles strings.
macro_rules! numeric_values {
    ($v:expr, $a:pat => $body:expr, $else:expr) => {
        match $v {
            DataValues::Int8($a) => $body,
            DataValues::UInt8($a) => $body,
            DataValues::Int16($a) => $body,
            DataValues::UInt16($a) => $body,
            DataValues::Int32($a) => $body,
            DataValues::UInt32($a) => $body,
            DataValues::Int64($a) => $body,
            DataValues::UInt64($a) => $body,
            DataValues::Float32($a) => $body,
            DataValues::Float64($a) => $body,
            DataValues::Str(_) => $else,
        }
    };
}

/// Match two values of the same variant; `$else` handles mismatches.
macro_rules! zip_values {
    ($u:expr, $v:expr, $a:pat, $b:pat => $body:expr, $else:expr) => {
        match ($u, $v) {
            (DataValues::Int8($a), DataValues::Int8($b)) => $body,
            (DataValues::UInt8($a), DataValues::UInt8($b)) => $body,
            (DataValues::Int16($a), DataValues::Int16($b)) => $body,
            (DataValues::UInt16($a), DataValues::UInt16($b)) => $body,
            (DataValues::Int32($a), DataValues::Int32($b)) => $body,
            (DataValues::UInt32($a), DataValues::UInt32($b)) => $body,
            (DataValues::Int64($a), DataValues::Int64($b)) => $body,
            (DataValues::UInt64($a), DataValues::UInt64($b)) => $body,
            (DataValues::Float32($a), DataValues::Float32($b)) => $body,
            (DataValues::Float64($a), DataValues::Float64($b)) => $body,
            (DataValues::Str($a), DataValues::Str($b)) => $body,
            _ => $else,
        }
    };
}

/// The payload of one variable: a dynamically shaped array tagged by
/// element type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValues {
    Int8(ArrayD<i8>),
    UInt8(ArrayD<u8>),
    Int16(ArrayD<i16>),
    UInt16(ArrayD<u16>),
    Int32(ArrayD<i32>),
    UInt32(ArrayD<u32>),
    Int64(ArrayD<i64>),
    UInt64(ArrayD<u64>),
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
    Str(ArrayD<String>),
}

impl DataValues {
    pub fn dtype(&self) -> DataType {
        match self {
            DataValues::Int8(_) => DataType::Int8,
            DataValues::UInt8(_) => DataType::UInt8,
            DataValues::Int16(_) => DataType::Int16,
            DataValues::UInt16(_) => DataType::UInt16,
            DataValues::Int32(_) => DataType::Int32,
            DataValues::UInt32(_) => DataType::UInt32,
            DataValues::Int64(_) => DataType::Int64,
            DataValues::UInt64(_) => DataType::UInt64,
            DataValues::Float32(_) => DataType::Float32,
            DataValues::Float64(_) => DataType::Float64,
            DataValues::Str(_) => DataType::String,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_values!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        with_values!(self, a => a.ndim())
    }

    /// A constant array of the given type and shape. `fill` overrides
    /// the canonical default fill (typically a `_FillValue` attribute).
    pub fn full(dtype: DataType, shape: &[usize], fill: Option<&AttrValue>) -> DataValues {
        let f = fill.and_then(AttrValue::as_f64);
        let dim = IxDyn(shape);
        match dtype {
            DataType::Int8 => {
                DataValues::Int8(ArrayD::from_elem(dim, f.map(|v| v as i8).unwrap_or(FILL_INT8)))
            }
            DataType::UInt8 => {
                DataValues::UInt8(ArrayD::from_elem(dim, f.map(|v| v as u8).unwrap_or(FILL_UINT8)))
            }
            DataType::Int16 => DataValues::Int16(ArrayD::from_elem(
                dim,
                f.map(|v| v as i16).unwrap_or(FILL_INT16),
            )),
            DataType::UInt16 => DataValues::UInt16(ArrayD::from_elem(
                dim,
                f.map(|v| v as u16).unwrap_or(FILL_UINT16),
            )),
            DataType::Int32 => DataValues::Int32(ArrayD::from_elem(
                dim,
                f.map(|v| v as i32).unwrap_or(FILL_INT32),
            )),
            DataType::UInt32 => DataValues::UInt32(ArrayD::from_elem(
                dim,
                f.map(|v| v as u32).unwrap_or(FILL_UINT32),
            )),
            DataType::Int64 => DataValues::Int64(ArrayD::from_elem(
                dim,
                f.map(|v| v as i64).unwrap_or(FILL_INT64),
            )),
            DataType::UInt64 => DataValues::UInt64(ArrayD::from_elem(
                dim,
                f.map(|v| v as u64).unwrap_or(FILL_UINT64),
            )),
            DataType::Float32 => DataValues::Float32(ArrayD::from_elem(
                dim,
                f.map(|v| v as f32).unwrap_or(FILL_FLOAT32),
            )),
            DataType::Float64 => {
                DataValues::Float64(ArrayD::from_elem(dim, f.unwrap_or(FILL_FLOAT64)))
            }
            DataType::String => DataValues::Str(ArrayD::from_elem(dim, String::new())),
        }
    }

    /// Cast an `f64` array (a synthesized index ramp) to `dtype`.
    pub fn from_f64(dtype: DataType, data: ArrayD<f64>) -> Result<DataValues> {
        Ok(match dtype {
            DataType::Int8 => DataValues::Int8(data.mapv(|v| v as i8)),
            DataType::UInt8 => DataValues::UInt8(data.mapv(|v| v as u8)),
            DataType::Int16 => DataValues::Int16(data.mapv(|v| v as i16)),
            DataType::UInt16 => DataValues::UInt16(data.mapv(|v| v as u16)),
            DataType::Int32 => DataValues::Int32(data.mapv(|v| v as i32)),
            DataType::UInt32 => DataValues::UInt32(data.mapv(|v| v as u32)),
            DataType::Int64 => DataValues::Int64(data.mapv(|v| v as i64)),
            DataType::UInt64 => DataValues::UInt64(data.mapv(|v| v as u64)),
            DataType::Float32 => DataValues::Float32(data.mapv(|v| v as f32)),
            DataType::Float64 => DataValues::Float64(data),
            DataType::String => {
                return Err(Error::DataType(
                    "cannot synthesize string values from a numeric ramp".into(),
                ))
            }
        })
    }

    /// Reorder along `axis` by the given index permutation.
    pub fn select(&self, axis: usize, indices: &[usize]) -> DataValues {
        map_values!(self, a => a.select(Axis(axis), indices))
    }

    /// Take `ranges[i]` along axis `i`. `ranges` must cover every axis.
    pub fn slice(&self, ranges: &[Range<usize>]) -> DataValues {
        map_values!(self, a => {
            let mut view = a.view();
            for (i, r) in ranges.iter().enumerate() {
                view.slice_axis_inplace(Axis(i), Slice::from(r.clone()));
            }
            view.to_owned()
        })
    }

    /// Take a range along a single axis, full extent elsewhere.
    pub fn slice_axis(&self, axis: usize, range: Range<usize>) -> DataValues {
        map_values!(self, a => a.slice_axis(Axis(axis), Slice::from(range.clone())).to_owned())
    }

    /// Write `src` into the region of `self` described by `ranges`.
    pub fn assign_slice(&mut self, ranges: &[Range<usize>], src: &DataValues) -> Result<()> {
        let (dst_ty, src_ty) = (self.dtype(), src.dtype());
        zip_values!(self, src, a, b => {
            let mut view = a.view_mut();
            for (i, r) in ranges.iter().enumerate() {
                view.slice_axis_inplace(Axis(i), Slice::from(r.clone()));
            }
            if view.shape() != b.shape() {
                return Err(Error::Dataset(format!(
                    "shape mismatch writing slice: destination {:?}, source {:?}",
                    view.shape(),
                    b.shape()
                )));
            }
            view.assign(b);
            Ok(())
        }, Err(Error::DataType(format!(
            "datatype mismatch writing slice: destination {}, source {}",
            dst_ty.as_str(),
            src_ty.as_str()
        ))))
    }

    /// Extract the 1-D series along `axis`, holding every other axis
    /// at `fixed[i]`. Numeric types only.
    pub fn as_f64_series(&self, axis: usize, fixed: &[usize]) -> Result<Vec<f64>> {
        numeric_values!(self, a => {
            let mut view = a.view();
            for (i, &idx) in fixed.iter().enumerate() {
                if i != axis {
                    view.collapse_axis(Axis(i), idx);
                }
            }
            Ok(view.iter().map(|&x| x as f64).collect())
        }, Err(Error::DataType("string variables cannot index a dimension".into())))
    }

    /// Replace NaN with the fill value in floating payloads. No-op for
    /// integer and string payloads.
    pub fn mask_nan(&mut self, fill: Option<&AttrValue>) {
        match self {
            DataValues::Float32(a) => {
                let f = fill
                    .and_then(AttrValue::as_f64)
                    .map(|v| v as f32)
                    .unwrap_or(FILL_FLOAT32);
                a.mapv_inplace(|x| if x.is_nan() { f } else { x });
            }
            DataValues::Float64(a) => {
                let f = fill.and_then(AttrValue::as_f64).unwrap_or(FILL_FLOAT64);
                a.mapv_inplace(|x| if x.is_nan() { f } else { x });
            }
            _ => {}
        }
    }
}
