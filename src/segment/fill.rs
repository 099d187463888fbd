//! Fill segments: planned gaps in the output.
//!
//! A fill segment knows how many records it covers along each
//! unlimited dimension and the index value the gap follows. For the
//! variable that indexes a dimension (with cadences configured for
//! every dimension of the variable) it synthesizes plausible index
//! values; every other variable gets its fill value.

use std::fmt;

use indexmap::IndexMap;
use ndarray::{ArrayD, IxDyn};

use crate::config::{Config, VariableConfig};
use crate::dataset::DataValues;
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct FillSegment {
    sizes: IndexMap<String, usize>,
    starts: IndexMap<String, f64>,
}

impl FillSegment {
    pub fn new() -> FillSegment {
        FillSegment::default()
    }

    /// Set the fill extent along an unlimited dimension, and the last
    /// real index value before the gap. Synthesized values continue
    /// one cadence step after `start`.
    pub fn set_dim(&mut self, dim: &str, size: usize, start: f64) {
        self.sizes.insert(dim.to_string(), size);
        self.starts.insert(dim.to_string(), start);
    }

    /// Extent along `dim`; dimensions never set contribute nothing.
    pub fn size_along(&self, dim: &str) -> usize {
        self.sizes.get(dim).copied().unwrap_or(0)
    }

    pub fn start_along(&self, dim: &str) -> Option<f64> {
        self.starts.get(dim).copied()
    }

    pub fn data_for(&self, var: &VariableConfig, config: &Config) -> Result<DataValues> {
        // Does this variable index an unlimited dimension, and do we
        // know the cadence along every one of its dimensions?
        let udim = config
            .dims
            .values()
            .find(|d| d.index_by.as_deref() == Some(var.name.as_str()));
        let have_cadences = udim
            .map(|d| {
                var.dimensions
                    .iter()
                    .all(|vd| d.expected_cadence.contains_key(vd))
            })
            .unwrap_or(false);

        let mut shape = Vec::with_capacity(var.dimensions.len());
        for d in &var.dimensions {
            let dim = config
                .dims
                .get(d)
                .ok_or_else(|| Error::Config(format!("unconfigured dimension: {}", d)))?;
            shape.push(match dim.size {
                Some(n) => n,
                None => self.size_along(d),
            });
        }

        let udim = match (udim, have_cadences) {
            (Some(u), true) => u,
            _ => {
                return Ok(DataValues::full(
                    var.datatype,
                    &shape,
                    var.fill_value().as_ref(),
                ))
            }
        };

        // Outer sum of per-dimension ramps, so multi-dimensional
        // indexing variables stay consistent.
        let mut acc = ArrayD::<f64>::zeros(IxDyn(&shape));
        for (axis, dname) in var.dimensions.iter().enumerate() {
            let n = shape[axis];
            let hz = udim.expected_cadence.get(dname).copied().unwrap_or(0.0);
            let unlimited = config
                .dims
                .get(dname)
                .map(|d| d.is_unlimited())
                .unwrap_or(false);
            if unlimited && hz <= 0.0 {
                return Err(Error::MissingCadence(dname.clone()));
            }
            let mut ramp: Vec<f64> = (0..n)
                .map(|k| if hz > 0.0 { k as f64 / hz } else { 0.0 })
                .collect();
            if unlimited {
                for v in &mut ramp {
                    *v += 1.0 / hz;
                }
            }
            let mut rshape = vec![1; var.dimensions.len()];
            rshape[axis] = n;
            acc = acc + &ArrayD::from_shape_vec(IxDyn(&rshape), ramp)?;
        }
        let initial = self.start_along(&udim.name).unwrap_or(0.0);
        DataValues::from_f64(var.datatype, acc + initial)
    }
}

impl fmt::Display for FillSegment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts: Vec<String> = self
            .sizes
            .iter()
            .map(|(dim, size)| format!("{}: {}", dim, size))
            .collect();
        write!(f, "FillSegment({})", parts.join(", "))
    }
}
