//! File segments: one input file as a planned read.
//!
//! Construction opens the file once and, for every indexed
//! non-flatten dimension, extracts the indexing series (applying
//! `other_dim_inds` when the variable is multi-dimensional), computes
//! the ascending sort permutation, and walks the sorted values into an
//! internal coverage list: good spans interleaved with fill segments
//! for internal gaps. Reads later apply sort, then the coverage
//! splice, then the external slice override.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::aggregator::TIMING_CERTAINTY;
use crate::config::{Config, DimensionConfig, VariableConfig};
use crate::dataset::{AttrValue, DataValues, Dataset};
use crate::segment::FillSegment;
use crate::{Error, Result};

/// External slice override for one dimension. Negative values count
/// from the end of the fill-adjusted internal length.
#[derive(Debug, Clone, Copy, Default)]
struct DimSlice {
    start: Option<isize>,
    stop: Option<isize>,
}

/// One element of a file's internal coverage list: a span of sorted
/// records, or an internal gap.
#[derive(Debug, Clone)]
pub enum Piece {
    Span(Range<usize>),
    Fill(FillSegment),
}

impl Piece {
    fn len_along(&self, dim: &str) -> usize {
        match self {
            Piece::Span(r) => r.end - r.start,
            Piece::Fill(f) => f.size_along(dim),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileSegment {
    path: PathBuf,
    dim_slices: HashMap<String, DimSlice>,
    sort: HashMap<String, Vec<usize>>,
    coverage: HashMap<String, Vec<Piece>>,
    sorted_index: HashMap<String, Vec<f64>>,
    native_sizes: HashMap<String, usize>,
}

impl FileSegment {
    /// Open an input and compute its coverage along every indexed
    /// dimension. Fails with `UnindexableFile` when an indexing series
    /// holds no valid value at all.
    pub fn open<P: AsRef<Path>>(path: P, config: &Config) -> Result<FileSegment> {
        let path = path.as_ref().to_path_buf();
        let ds = Dataset::open(&path)?;
        let mut seg = FileSegment {
            path,
            dim_slices: HashMap::new(),
            sort: HashMap::new(),
            coverage: HashMap::new(),
            sorted_index: HashMap::new(),
            native_sizes: HashMap::new(),
        };
        for name in ds.dimensions.keys() {
            if let Some(len) = ds.dim_len(name) {
                seg.native_sizes.insert(name.clone(), len);
            }
        }
        for dim in config.indexed_dims() {
            seg.compute_coverage(&ds, dim)?;
        }
        Ok(seg)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The indexing series along `dim` in the file's native order,
    /// with declared fill values read as NaN.
    fn index_series(&self, ds: &Dataset, dim: &DimensionConfig) -> Result<Vec<f64>> {
        let index_by = dim.index_by.as_ref().ok_or_else(|| {
            Error::Config(format!("dimension {} has no index_by variable", dim.name))
        })?;
        let var = ds
            .variable(index_by)
            .ok_or_else(|| Error::VariableNotFound(index_by.clone()))?;
        let axis = var
            .dimensions
            .iter()
            .position(|d| d == &dim.name)
            .ok_or_else(|| {
                Error::Dataset(format!(
                    "variable {} does not span dimension {}",
                    index_by, dim.name
                ))
            })?;
        let fixed: Vec<usize> = var
            .dimensions
            .iter()
            .map(|d| {
                if d == &dim.name {
                    0
                } else {
                    dim.other_dim_inds.get(d).copied().unwrap_or(0)
                }
            })
            .collect();
        let mut series = var.values.as_f64_series(axis, &fixed)?;
        if let Some(fill) = var.fill_value().and_then(AttrValue::as_f64) {
            for v in &mut series {
                if *v == fill {
                    *v = f64::NAN;
                }
            }
        }
        Ok(series)
    }

    fn compute_coverage(&mut self, ds: &Dataset, dim: &DimensionConfig) -> Result<()> {
        let series = self.index_series(ds, dim)?;
        let n = series.len();

        // Ascending argsort, NaN last.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            use std::cmp::Ordering::*;
            match (series[a].is_nan(), series[b].is_nan()) {
                (false, false) => series[a].partial_cmp(&series[b]).unwrap_or(Equal),
                (false, true) => Less,
                (true, false) => Greater,
                (true, true) => Equal,
            }
        });
        let sorted: Vec<f64> = order.iter().map(|&i| series[i]).collect();

        // Time-like indices never legitimately sit at or below zero.
        let invalid = |v: f64| v.is_nan() || v <= 0.0;

        let mut first = 0usize;
        while first < n && invalid(sorted[first]) {
            first += 1;
        }
        if first == n {
            return Err(Error::UnindexableFile {
                path: self.path.clone(),
                dim: dim.name.clone(),
            });
        }

        let mut pieces: Vec<Piece> = Vec::new();
        let mut span_start = first;
        let mut in_span = true;

        match dim.own_cadence() {
            Some(hz) => {
                let dt_min = 1.0 / ((2.0 - TIMING_CERTAINTY) * hz);
                let dt_max = 1.0 / (TIMING_CERTAINTY * hz);
                for i in (first + 1)..n {
                    let v = sorted[i];
                    if invalid(v) {
                        if in_span {
                            pieces.push(Piece::Span(span_start..i));
                            in_span = false;
                        }
                        continue;
                    }
                    if !in_span {
                        span_start = i;
                        in_span = true;
                        continue;
                    }
                    let step = v - sorted[i - 1];
                    if step < 0.5 * dt_min {
                        // duplicate or jitter: drop this value
                        pieces.push(Piece::Span(span_start..i));
                        in_span = false;
                    } else if step > 2.0 * dt_max {
                        pieces.push(Piece::Span(span_start..i));
                        let missing = (((step * hz).round().abs() as usize).saturating_sub(1)).max(1);
                        let mut fill = FillSegment::new();
                        fill.set_dim(&dim.name, missing, sorted[i - 1]);
                        pieces.push(Piece::Fill(fill));
                        span_start = i;
                    }
                }
            }
            None => {
                // No cadence: invalid markers split spans, no fills.
                for i in (first + 1)..n {
                    if invalid(sorted[i]) {
                        if in_span {
                            pieces.push(Piece::Span(span_start..i));
                            in_span = false;
                        }
                    } else if !in_span {
                        span_start = i;
                        in_span = true;
                    }
                }
            }
        }
        if in_span && span_start < n {
            pieces.push(Piece::Span(span_start..n));
        }

        self.sort.insert(dim.name.clone(), order);
        self.sorted_index.insert(dim.name.clone(), sorted);
        self.coverage.insert(dim.name.clone(), pieces);
        Ok(())
    }

    /// First good index value along an indexed dimension, after sort.
    pub fn first_value(&self, dim: &str) -> Option<f64> {
        let pieces = self.coverage.get(dim)?;
        match pieces.first()? {
            Piece::Span(r) => self.sorted_index.get(dim)?.get(r.start).copied(),
            Piece::Fill(_) => None,
        }
    }

    /// Last good index value along an indexed dimension, after sort.
    pub fn last_value(&self, dim: &str) -> Option<f64> {
        let pieces = self.coverage.get(dim)?;
        match pieces.last()? {
            Piece::Span(r) => self.sorted_index.get(dim)?.get(r.end - 1).copied(),
            Piece::Fill(_) => None,
        }
    }

    /// Length along `dim` after the internal coverage splice but
    /// before the external slice.
    fn internal_size(&self, dim: &DimensionConfig) -> usize {
        match self.coverage.get(&dim.name) {
            Some(pieces) => pieces.iter().map(|p| p.len_along(&dim.name)).sum(),
            None => match dim.size {
                Some(n) => n,
                // A dimension the file doesn't carry contributes a
                // single record: it implicitly depends on file.
                None => self.native_sizes.get(&dim.name).copied().unwrap_or(1),
            },
        }
    }

    fn resolve(&self, dim: &DimensionConfig) -> (isize, isize) {
        let len = self.internal_size(dim) as isize;
        let slice = self.dim_slices.get(&dim.name).copied().unwrap_or_default();
        let start = match slice.start {
            Some(s) if s < 0 => len + s,
            Some(s) => s,
            None => 0,
        };
        let stop = match slice.stop {
            Some(e) if e < 0 => len + e,
            Some(e) => e,
            None => len,
        };
        (start, stop)
    }

    /// Size along `dim` after internal coverage and external slice.
    /// May be negative, signalling "skip this segment".
    pub fn size_along_lenient(&self, dim: &DimensionConfig) -> isize {
        let (start, stop) = self.resolve(dim);
        stop - start
    }

    /// Strict form of [`size_along_lenient`]: a negative extent is an
    /// error.
    ///
    /// [`size_along_lenient`]: FileSegment::size_along_lenient
    pub fn size_along(&self, dim: &DimensionConfig) -> Result<usize> {
        let (start, stop) = self.resolve(dim);
        if stop < start {
            return Err(Error::InvalidSlice {
                dim: dim.name.clone(),
                start,
                stop,
            });
        }
        Ok((stop - start) as usize)
    }

    pub fn slice_start(&self, dim: &str) -> Option<isize> {
        self.dim_slices.get(dim).and_then(|s| s.start)
    }

    pub fn slice_stop(&self, dim: &str) -> Option<isize> {
        self.dim_slices.get(dim).and_then(|s| s.stop)
    }

    pub fn set_slice_start(&mut self, dim: &str, start: isize) {
        self.dim_slices
            .entry(dim.to_string())
            .or_default()
            .start = Some(start);
    }

    pub fn set_slice_stop(&mut self, dim: &str, stop: isize) {
        self.dim_slices.entry(dim.to_string()).or_default().stop = Some(stop);
    }

    /// Read and transform this file's data for `var`, opening the
    /// container for the duration of the call.
    pub fn data_for(&self, var: &VariableConfig, config: &Config) -> Result<DataValues> {
        let ds = Dataset::open(&self.path)?;
        self.data_for_in(&ds, var, config)
    }

    /// As [`data_for`], against an already opened handle so one open
    /// can serve every variable of a segment.
    ///
    /// [`data_for`]: FileSegment::data_for
    pub fn data_for_in(
        &self,
        ds: &Dataset,
        var: &VariableConfig,
        config: &Config,
    ) -> Result<DataValues> {
        let dvar = ds
            .variable(&var.name)
            .ok_or_else(|| Error::VariableNotFound(var.name.clone()))?;
        let dims: Vec<&DimensionConfig> = var
            .dimensions
            .iter()
            .filter(|d| dvar.dimensions.iter().any(|fd| fd == *d))
            .filter_map(|d| config.dims.get(d))
            .collect();

        let mut data = dvar.values.clone();
        if dims.is_empty() {
            // scalar variable
            return Ok(data);
        }

        // 1. sorted order along each indexed dimension
        for (axis, dim) in dims.iter().enumerate() {
            if let Some(order) = self.sort.get(&dim.name) {
                data = data.select(axis, order);
            }
        }

        // 2. splice the internal coverage list. Only the first covered
        //    dimension is spliced; a variable spanning several indexed
        //    dimensions is carried span-wise along that one.
        if let Some((axis, dim)) = dims
            .iter()
            .enumerate()
            .find(|(_, d)| self.coverage.contains_key(&d.name))
        {
            let pieces = &self.coverage[&dim.name];
            let whole = matches!(pieces.as_slice(),
                [Piece::Span(r)] if r.start == 0 && r.end == data.shape()[axis]);
            if !whole {
                let mut out_shape = data.shape().to_vec();
                out_shape[axis] = self.internal_size(dim);
                let fill = var.fill_value();
                let mut out = DataValues::full(var.datatype, &out_shape, fill.as_ref());
                let mut loc = 0usize;
                for piece in pieces {
                    let part = match piece {
                        Piece::Span(r) => data.slice_axis(axis, r.clone()),
                        Piece::Fill(f) => f.data_for(var, config)?,
                    };
                    let k = part.shape()[axis];
                    let ranges: Vec<Range<usize>> = out_shape
                        .iter()
                        .enumerate()
                        .map(|(i, &len)| if i == axis { loc..loc + k } else { 0..len })
                        .collect();
                    out.assign_slice(&ranges, &part)?;
                    loc += k;
                }
                data = out;
            }
        }

        // 3. external slice
        let mut ranges = Vec::with_capacity(dims.len());
        for (axis, dim) in dims.iter().enumerate() {
            let len = data.shape()[axis] as isize;
            let slice = self.dim_slices.get(&dim.name).copied().unwrap_or_default();
            let start = match slice.start {
                Some(s) if s < 0 => len + s,
                Some(s) => s,
                None => 0,
            };
            let stop = match slice.stop {
                Some(e) if e < 0 => len + e,
                Some(e) => e,
                None => len,
            };
            if stop < start {
                return Err(Error::InvalidSlice {
                    dim: dim.name.clone(),
                    start,
                    stop,
                });
            }
            let start = start.clamp(0, len) as usize;
            let stop = stop.clamp(0, len) as usize;
            ranges.push(start..stop.max(start));
        }
        Ok(data.slice(&ranges))
    }

    /// Open the container behind this segment.
    pub fn open_dataset(&self) -> Result<Dataset> {
        Dataset::open(&self.path)
    }

    /// Invoke `f` with a read handle, released on return.
    pub fn callback_with_file<F: FnOnce(&Dataset)>(&self, f: F) -> Result<()> {
        let ds = Dataset::open(&self.path)?;
        f(&ds);
        Ok(())
    }
}

impl fmt::Display for FileSegment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut slices: Vec<String> = self
            .dim_slices
            .iter()
            .map(|(dim, s)| {
                let start = s.start.map(|v| v.to_string()).unwrap_or_default();
                let stop = s.stop.map(|v| v.to_string()).unwrap_or_default();
                format!("{}[{}:{}]", dim, start, stop)
            })
            .collect();
        slices.sort();
        write!(f, "{}[{}]", name, slices.join(","))
    }
}
