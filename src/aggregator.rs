//! Plan builder and plan evaluator.
//!
//! [`generate_plan`] analyzes coverage across the input files and
//! emits an ordered plan of file and fill segments whose indexing
//! variable comes out monotonic, regularly spaced at the configured
//! cadence, trimmed to the configured interval, and padded across real
//! gaps. [`evaluate_plan`] materializes that plan into the output
//! container.

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::attributes::AttributeHandler;
use crate::config::{Config, VariableConfig};
use crate::dataset::{DataValues, Dataset, FILL_VALUE_ATTR};
use crate::segment::{FileSegment, FillSegment, Segment};
use crate::{Error, Result};

/// Timing uncertainty constant `u`: observed spacing is accepted
/// between `u` and `2 - u` times the nominal step.
pub const TIMING_CERTAINTY: f64 = 0.9;

/// An ordered sequence of segments, ready to evaluate.
pub type Plan = Vec<Segment>;

/// Aggregate `inputs` into `output`. Without an explicit config, one
/// is reflected from the first input.
pub fn aggregate<P: AsRef<Path>>(
    inputs: &[PathBuf],
    output: P,
    config: Option<Config>,
) -> Result<()> {
    let config = match config {
        Some(config) => config,
        None => {
            let first = inputs
                .first()
                .ok_or_else(|| Error::Config("no input files".into()))?;
            let mut config = Config::from_file(first)?;
            config.validate()?;
            config
        }
    };
    let plan = generate_plan(&config, inputs)?;
    evaluate_plan(&config, &plan, output.as_ref(), None)
}

/// Build the aggregation plan: per-file coverage, ascending sort by
/// the primary indexing dimension, bounds handling, overlap trimming,
/// and fill insertion across gaps.
pub fn generate_plan(config: &Config, inputs: &[PathBuf]) -> Result<Plan> {
    if inputs.is_empty() {
        error!("no files to aggregate");
        return Ok(Vec::new());
    }

    let mut paths = inputs.to_vec();
    paths.sort();

    let mut segments = Vec::new();
    let mut n_errors = 0usize;
    let mut elevated = false;
    for path in &paths {
        match FileSegment::open(path, config) {
            Ok(seg) => segments.push(seg),
            Err(e @ Error::Config(_)) => return Err(e),
            Err(e) => {
                n_errors += 1;
                warn!("skipping {}: {}", path.display(), e);
                if !elevated && 2 * n_errors >= paths.len() {
                    error!(
                        "more than half of the inputs failed to initialize; \
                         continuing, but the output will likely be mostly fill values"
                    );
                    elevated = true;
                }
            }
        }
    }
    if segments.is_empty() {
        error!("no valid files found");
        return Ok(Vec::new());
    }

    let indexed = config.indexed_dims();
    if indexed.is_empty() {
        // nothing to sort or fill by, keep input order
        return Ok(segments.into_iter().map(Segment::File).collect());
    }
    let primary = indexed
        .iter()
        .find(|d| d.is_primary)
        .copied()
        .unwrap_or(indexed[0]);
    let pname = primary.name.as_str();

    segments.sort_by(|a, b| {
        let av = a.first_value(pname).unwrap_or(f64::INFINITY);
        let bv = b.first_value(pname).unwrap_or(f64::INFINITY);
        av.partial_cmp(&bv).unwrap_or(std::cmp::Ordering::Equal)
    });

    let low = primary.min_value();
    let high = primary.max_value();
    let cadence = primary.own_cadence();

    let mut plan: Plan = Vec::new();
    for mut seg in segments {
        let (first, last) = match (seg.first_value(pname), seg.last_value(pname)) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                warn!("skipping {}: no coverage along {}", seg, pname);
                continue;
            }
        };

        if low.map(|lo| last < lo).unwrap_or(false)
            || high.map(|hi| first > hi).unwrap_or(false)
        {
            info!(
                "{}",
                Error::BoundsOutOfRange {
                    path: seg.path().to_path_buf()
                }
            );
            continue;
        }

        let hz = match cadence {
            Some(hz) => hz,
            None => {
                // unknown cadence: concatenate in sorted order as-is
                plan.push(Segment::File(seg));
                continue;
            }
        };
        let dt_min = 1.0 / ((2.0 - TIMING_CERTAINTY) * hz);
        let dt_nom = 1.0 / hz;
        let dt_max = 1.0 / (TIMING_CERTAINTY * hz);

        // The lower bound stands in for a previous sample one dt_min
        // back, so a file starting at the bound joins seamlessly. The
        // empty-plan gap is computed as (first - low) + dt_min, which
        // is exact when the file starts at the bound.
        let (gap, prev_end) = match plan.last() {
            Some(Segment::File(prev)) => {
                let end = prev.last_value(pname);
                (end.map(|e| first - e), end)
            }
            Some(Segment::Fill(prev)) => {
                let end = prev
                    .start_along(pname)
                    .map(|s| s + prev.size_along(pname) as f64 * dt_nom);
                (end.map(|e| first - e), end)
            }
            None => (low.map(|lo| (first - lo) + dt_min), None),
        };

        if let Some(gap) = gap {
            if gap > 1.6 * dt_max {
                let size = (((gap - dt_nom) * hz).round() as i64).max(1) as usize;
                let start = match prev_end {
                    Some(end) => end,
                    None => {
                        // no previous file: backdate the fill to
                        // terminate one nominal step before this file,
                        // staying at or above the lower bound
                        let mut start = first - (size as f64 + 1.0) * dt_nom;
                        if let Some(lo) = low {
                            if start < lo - dt_nom {
                                start = lo - dt_nom;
                            }
                        }
                        start
                    }
                };
                let mut fill = FillSegment::new();
                fill.set_dim(pname, size, start);
                debug!("inserting {} ahead of {}", fill, seg);
                plan.push(Segment::Fill(fill));
            } else if gap < dt_min {
                // overlap or jitter on the join: trim the newer file's
                // head so cadence is preserved
                let trim = ((gap - dt_min).abs() * hz).ceil() as isize;
                let head = seg.slice_start(pname).unwrap_or(0);
                seg.set_slice_start(pname, head + trim);
                debug!("trimmed {} records off the head of {}", trim, seg);
            }
        }

        if let Some(hi) = high {
            if last > hi {
                let overhang = ((last - hi).abs() * hz).ceil() as isize;
                seg.set_slice_stop(pname, -overhang);
                debug!("trimmed {} records off the tail of {}", overhang, seg);
            }
        }

        if seg.size_along_lenient(primary) > 0 {
            plan.push(Segment::File(seg));
        } else {
            info!("{} empty after trimming, dropped", seg);
        }
    }

    // pad the tail when the last file stops short of the upper bound
    if let (Some(hz), Some(hi)) = (cadence, high) {
        let dt_nom = 1.0 / hz;
        let dt_max = 1.0 / (TIMING_CERTAINTY * hz);
        if let Some(Segment::File(last_seg)) = plan.last() {
            if let Some(last) = last_seg.last_value(pname) {
                if last < hi - dt_max {
                    let gap = hi - last;
                    let size = (((gap - dt_nom) * hz).round() as i64).max(1) as usize;
                    let mut fill = FillSegment::new();
                    fill.set_dim(pname, size, last);
                    plan.push(Segment::Fill(fill));
                }
            }
        }
    }

    Ok(plan)
}

/// Create the output container described by the configuration:
/// dimensions, variables pre-filled with their fill values, and
/// variable attributes with the container-typed ones coerced to the
/// variable's datatype.
pub fn initialize_output(config: &Config) -> Result<Dataset> {
    let mut out = Dataset::new();
    for dim in config.dims.values() {
        out.add_dimension(&dim.name, dim.size);
    }
    for var in config.vars.values() {
        let shape: Vec<usize> = var
            .dimensions
            .iter()
            .map(|d| config.dims.get(d).and_then(|c| c.size).unwrap_or(0))
            .collect();
        let mut attributes = var.attributes.clone();
        for key in [FILL_VALUE_ATTR, "valid_min", "valid_max"] {
            if let Some(value) = attributes.get(key).cloned() {
                attributes.insert(key.to_string(), value.cast_scalar(var.datatype));
            }
        }
        for key in ["valid_range", "flag_masks", "flag_values"] {
            if let Some(value) = attributes.get(key).cloned() {
                attributes.insert(key.to_string(), value.cast_list(var.datatype));
            }
        }
        let dims: Vec<&str> = var.dimensions.iter().map(String::as_str).collect();
        out.add_variable(
            &var.name,
            &dims,
            DataValues::full(var.datatype, &shape, var.fill_value().as_ref()),
            attributes,
            var.chunksizes.clone(),
        )?;
    }
    Ok(out)
}

/// Grow the unlimited axes of the output to their final lengths, known
/// up front from the plan.
fn presize_unlimited(out: &mut Dataset, config: &Config, lengths: &HashMap<String, usize>) {
    for var in config.vars.values() {
        let shape: Vec<usize> = var
            .dimensions
            .iter()
            .map(|d| match config.dims.get(d) {
                Some(dim) if dim.is_unlimited() => lengths.get(d).copied().unwrap_or(0),
                Some(dim) => dim.size.unwrap_or(0),
                None => 0,
            })
            .collect();
        if let Some(target) = out.variable_mut(&var.name) {
            if target.values.shape() != shape.as_slice() {
                target.values = DataValues::full(var.datatype, &shape, var.fill_value().as_ref());
            }
        }
    }
}

/// Materialize a plan into `output`. The optional callback runs after
/// each segment; it doubles as a cooperative cancellation point for
/// callers that track progress.
pub fn evaluate_plan(
    config: &Config,
    plan: &[Segment],
    output: &Path,
    mut callback: Option<&mut dyn FnMut()>,
) -> Result<()> {
    if plan.is_empty() {
        warn!("empty aggregation plan, nothing to do");
        return Ok(());
    }

    let mut out = initialize_output(config)?;
    let mut handler = AttributeHandler::new(config);

    let mut vars_once: Vec<&VariableConfig> = Vec::new();
    let mut vars_unlim: Vec<&VariableConfig> = Vec::new();
    for var in config.vars.values() {
        let unlimited = var.dimensions.iter().any(|d| {
            config
                .dims
                .get(d)
                .map(|dim| dim.is_unlimited())
                .unwrap_or(false)
        });
        if unlimited {
            vars_unlim.push(var);
        } else {
            vars_once.push(var);
        }
    }

    let mut lengths: HashMap<String, usize> = HashMap::new();
    for dim in config.dims.values().filter(|d| d.is_unlimited()) {
        let total = if dim.flatten {
            plan.iter().map(|s| s.size_along(dim)).max().unwrap_or(0)
        } else {
            plan.iter().map(|s| s.size_along(dim)).sum()
        };
        lengths.insert(dim.name.clone(), total);
    }
    presize_unlimited(&mut out, config, &lengths);

    // Variables with no unlimited dimension are copied once, from the
    // first real file in the plan.
    let once_src = plan
        .iter()
        .find(|s| s.as_file().is_some())
        .unwrap_or(&plan[0]);
    for &var in &vars_once {
        match once_src.data_for(var, config) {
            Ok(data) => {
                let ranges: Vec<Range<usize>> =
                    data.shape().iter().map(|&len| 0..len).collect();
                if let Some(target) = out.variable_mut(&var.name) {
                    if let Err(e) = target.values.assign_slice(&ranges, &data) {
                        error!("copying {}: {}", var.name, e);
                    }
                }
            }
            Err(Error::VariableNotFound(_)) => {
                debug!("{} absent from the first input, left as fill", var.name)
            }
            Err(e) => error!("copying {}: {}", var.name, e),
        }
    }

    let mut cursors: HashMap<String, usize> =
        lengths.keys().map(|k| (k.clone(), 0)).collect();

    for seg in plan {
        let unlim_starts = cursors.clone();

        // one open serves every variable of a file segment
        let handle = match seg {
            Segment::File(f) => match f.open_dataset() {
                Ok(ds) => Some(ds),
                Err(e) => {
                    error!("reading {}: {}", f, e);
                    None
                }
            },
            Segment::Fill(_) => None,
        };
        let readable = !(seg.as_file().is_some() && handle.is_none());

        if readable {
            for &var in &vars_unlim {
                let mut ranges: Vec<Range<usize>> = Vec::with_capacity(var.dimensions.len());
                for dname in &var.dimensions {
                    let dim = match config.dims.get(dname) {
                        Some(dim) => dim,
                        None => continue,
                    };
                    if dim.is_unlimited() && !dim.flatten {
                        let start = unlim_starts.get(dname).copied().unwrap_or(0);
                        ranges.push(start..start + seg.size_along(dim));
                    } else if dim.is_unlimited() {
                        // flatten dims restart at zero every segment;
                        // with index_by this is file order, unindexed
                        ranges.push(0..seg.size_along(dim));
                    } else {
                        ranges.push(0..dim.size.unwrap_or(0));
                    }
                }
                let data = match (seg, &handle) {
                    (Segment::File(f), Some(ds)) => f.data_for_in(ds, var, config),
                    _ => seg.data_for(var, config),
                };
                match data {
                    Ok(mut data) => {
                        data.mask_nan(var.fill_value().as_ref());
                        if let Some(target) = out.variable_mut(&var.name) {
                            if let Err(e) = target.values.assign_slice(&ranges, &data) {
                                error!("writing {} from {}: {}", var.name, seg, e);
                            }
                        }
                    }
                    Err(Error::VariableNotFound(_)) => {
                        // this input doesn't carry the variable, its
                        // slot keeps fill values
                    }
                    Err(e) => error!("copying {} from {}: {}", var.name, seg, e),
                }
            }
        }

        if let Some(ds) = &handle {
            handler.process_file(ds);
        }
        if let Some(cb) = callback.as_mut() {
            cb();
        }

        for (name, cursor) in cursors.iter_mut() {
            if let Some(dim) = config.dims.get(name) {
                if !dim.flatten {
                    *cursor += seg.size_along(dim);
                }
            }
        }
    }

    handler.finalize_file(&mut out, config, output);
    out.write(output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use ndarray::{Array, IxDyn};
    use tempdir::TempDir;

    use crate::config::Bound;
    use crate::dataset::{AttrValue, FILL_INT32};

    const UNITS: &str = "seconds since 2017-01-01 00:00:00";
    // 2017-03-05T00:00:00 relative to the epoch
    const DAY: f64 = 5_443_200.0;

    fn write_granule(
        dir: &TempDir,
        name: &str,
        times: &[f64],
        attrs: &[(&str, AttrValue)],
    ) -> PathBuf {
        let mut ds = Dataset::new();
        ds.add_dimension("record", None);
        let n = times.len();
        let time = Array::from_shape_vec(IxDyn(&[n]), times.to_vec()).unwrap();
        let mut time_attrs = IndexMap::new();
        time_attrs.insert("units".to_string(), AttrValue::Str(UNITS.into()));
        ds.add_variable("time", &["record"], DataValues::Float64(time), time_attrs, None)
            .unwrap();
        let counts =
            Array::from_shape_vec(IxDyn(&[n]), (0..n).map(|i| i as i32).collect()).unwrap();
        ds.add_variable(
            "counts",
            &["record"],
            DataValues::Int32(counts),
            IndexMap::new(),
            None,
        )
        .unwrap();
        for (key, value) in attrs {
            ds.set_attribute(key, value.clone());
        }
        let path = dir.path().join(name);
        ds.write(&path).unwrap();
        path
    }

    fn test_config(min: Option<f64>, max: Option<f64>) -> Config {
        let doc = r#"{
            "dimensions": [
                {"name": "record", "index_by": "time",
                 "expected_cadence": {"record": 1.0}}
            ],
            "variables": [
                {"name": "time", "dimensions": ["record"], "datatype": "float64",
                 "attributes": {"units": "seconds since 2017-01-01 00:00:00"}},
                {"name": "counts", "dimensions": ["record"], "datatype": "int32"}
            ],
            "attributes": []
        }"#;
        let mut config = Config::from_json(doc).unwrap();
        {
            let dim = config.dims.get_mut("record").unwrap();
            dim.min = min.map(Bound::Number);
            dim.max = max.map(Bound::Number);
        }
        config.validate().unwrap();
        config
    }

    fn time_series(path: &Path) -> Vec<f64> {
        let out = Dataset::open(path).unwrap();
        let var = out.variable("time").unwrap();
        var.values.as_f64_series(0, &[0]).unwrap()
    }

    fn counts_series(path: &Path) -> Vec<f64> {
        let out = Dataset::open(path).unwrap();
        let var = out.variable("counts").unwrap();
        var.values.as_f64_series(0, &[0]).unwrap()
    }

    #[test]
    fn in_bounds_concatenation() {
        // S1: two contiguous 60 record files inside the bounds
        let dir = TempDir::new("granules_test").unwrap();
        let base = DAY + 1800.0;
        let t1: Vec<f64> = (0..60).map(|i| base + i as f64).collect();
        let t2: Vec<f64> = (0..60).map(|i| base + 60.0 + i as f64).collect();
        let a = write_granule(&dir, "a.gnc", &t1, &[]);
        let b = write_granule(&dir, "b.gnc", &t2, &[]);

        let config = test_config(Some(base), Some(base + 120.0 - 1e-6));
        let plan = generate_plan(&config, &[a, b]).unwrap();
        assert_eq!(plan.len(), 2);

        let out_path = dir.path().join("out.gnc");
        evaluate_plan(&config, &plan, &out_path, None).unwrap();

        let time = time_series(&out_path);
        assert_eq!(time.len(), 120);
        for pair in time.windows(2) {
            let dt = pair[1] - pair[0];
            assert!(dt >= 0.999 && dt <= 1.001, "dt out of range: {}", dt);
        }
        assert!(time.iter().all(|&v| v >= base && v < base + 120.0));
    }

    #[test]
    fn overlap_trims_newer_head() {
        // S2: B overlaps the last 5 records of A
        let dir = TempDir::new("granules_test").unwrap();
        let t1: Vec<f64> = (0..10).map(|i| DAY + i as f64).collect();
        let t2: Vec<f64> = (0..10).map(|i| DAY + 5.0 + i as f64).collect();
        let a = write_granule(&dir, "a.gnc", &t1, &[]);
        let b = write_granule(&dir, "b.gnc", &t2, &[]);

        let config = test_config(None, None);
        let plan = generate_plan(&config, &[a, b]).unwrap();
        assert_eq!(plan.len(), 2);
        let trimmed = plan[1].as_file().unwrap();
        assert_eq!(trimmed.slice_start("record"), Some(5));

        let out_path = dir.path().join("out.gnc");
        evaluate_plan(&config, &plan, &out_path, None).unwrap();
        let time = time_series(&out_path);
        let expect: Vec<f64> = (0..15).map(|i| DAY + i as f64).collect();
        assert_eq!(time, expect);
    }

    #[test]
    fn gap_between_files_filled() {
        // S3: 5 missing records between A and B
        let dir = TempDir::new("granules_test").unwrap();
        let t1: Vec<f64> = (0..5).map(|i| DAY + i as f64).collect();
        let t2: Vec<f64> = (0..5).map(|i| DAY + 10.0 + i as f64).collect();
        let a = write_granule(&dir, "a.gnc", &t1, &[]);
        let b = write_granule(&dir, "b.gnc", &t2, &[]);

        let config = test_config(None, None);
        let plan = generate_plan(&config, &[a, b]).unwrap();
        assert_eq!(plan.len(), 3);
        match &plan[1] {
            Segment::Fill(fill) => assert_eq!(fill.size_along("record"), 5),
            other => panic!("expected a fill segment, got {}", other),
        }

        let out_path = dir.path().join("out.gnc");
        evaluate_plan(&config, &plan, &out_path, None).unwrap();
        let time = time_series(&out_path);
        let expect: Vec<f64> = (0..15).map(|i| DAY + i as f64).collect();
        assert_eq!(time, expect);

        let counts = counts_series(&out_path);
        let fill = FILL_INT32 as f64;
        assert_eq!(counts[..5], [0.0, 1.0, 2.0, 3.0, 4.0]);
        assert!(counts[5..10].iter().all(|&v| v == fill));
        assert_eq!(counts[10..], [0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn overhang_past_bound_trimmed() {
        // S4: one minute of data against a 30 second window
        let dir = TempDir::new("granules_test").unwrap();
        let t: Vec<f64> = (0..60).map(|i| DAY + i as f64).collect();
        let a = write_granule(&dir, "a.gnc", &t, &[]);

        let config = test_config(Some(DAY), Some(DAY + 30.0 - 1e-6));
        let plan = generate_plan(&config, &[a]).unwrap();
        assert_eq!(plan.len(), 1);
        let seg = plan[0].as_file().unwrap();
        assert_eq!(seg.slice_stop("record"), Some(-30));

        let out_path = dir.path().join("out.gnc");
        evaluate_plan(&config, &plan, &out_path, None).unwrap();
        let time = time_series(&out_path);
        assert_eq!(time.len(), 30);
        assert!(time.iter().all(|&v| v >= DAY && v < DAY + 30.0));
    }

    #[test]
    fn out_of_bounds_file_dropped() {
        // S5: a file entirely before the window is excluded
        let dir = TempDir::new("granules_test").unwrap();
        let early: Vec<f64> = (0..10).map(|i| DAY - 3600.0 + i as f64).collect();
        let t1: Vec<f64> = (0..10).map(|i| DAY + i as f64).collect();
        let t2: Vec<f64> = (0..10).map(|i| DAY + 10.0 + i as f64).collect();
        let e = write_granule(&dir, "early.gnc", &early, &[]);
        let a = write_granule(&dir, "a.gnc", &t1, &[]);
        let b = write_granule(&dir, "b.gnc", &t2, &[]);

        let config = test_config(Some(DAY), Some(DAY + 20.0 - 1e-6));
        let plan = generate_plan(&config, &[e, a, b]).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(time_plan_paths(&plan), vec!["a.gnc", "b.gnc"]);
    }

    fn time_plan_paths(plan: &[Segment]) -> Vec<String> {
        plan.iter()
            .filter_map(|s| s.as_file())
            .map(|f| {
                f.path()
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
            .collect()
    }

    #[test]
    fn attribute_reduction() {
        // S6: unique_list, int_sum, constant, date_created, filename
        let dir = TempDir::new("granules_test").unwrap();
        let mk = |site: &str, records: i64| {
            vec![
                ("production_site", AttrValue::Str(site.to_string())),
                ("records", AttrValue::Int(records)),
                ("algorithm_version", AttrValue::Str("1.0".into())),
            ]
        };
        let t1: Vec<f64> = (0..5).map(|i| DAY + i as f64).collect();
        let t2: Vec<f64> = (0..5).map(|i| DAY + 5.0 + i as f64).collect();
        let t3: Vec<f64> = (0..5).map(|i| DAY + 10.0 + i as f64).collect();
        let a = write_granule(&dir, "a.gnc", &t1, &mk("A", 100));
        let b = write_granule(&dir, "b.gnc", &t2, &mk("B", 200));
        let c = write_granule(&dir, "c.gnc", &t3, &mk("A", 150));

        let mut config = test_config(None, None);
        let strategies = r#"[
            {"name": "production_site", "strategy": "unique_list"},
            {"name": "records", "strategy": "int_sum"},
            {"name": "algorithm_version", "strategy": "constant"},
            {"name": "date_created", "strategy": "date_created"},
            {"name": "dataset_name", "strategy": "filename"}
        ]"#;
        let attrs: Vec<crate::config::AttributeConfig> =
            serde_json::from_str(strategies).unwrap();
        for attr in attrs {
            config.attrs.insert(attr.name.clone(), attr);
        }

        let plan = generate_plan(&config, &[a, b, c]).unwrap();
        let out_path = dir.path().join("aggregated.gnc");
        evaluate_plan(&config, &plan, &out_path, None).unwrap();

        let out = Dataset::open(&out_path).unwrap();
        assert_eq!(
            out.attribute("production_site"),
            Some(&AttrValue::Str("A, B".into()))
        );
        assert_eq!(out.attribute("records"), Some(&AttrValue::Int(450)));
        assert_eq!(
            out.attribute("algorithm_version"),
            Some(&AttrValue::Str("1.0".into()))
        );
        assert_eq!(
            out.attribute("dataset_name"),
            Some(&AttrValue::Str("aggregated.gnc".into()))
        );
        let created = match out.attribute("date_created") {
            Some(AttrValue::Str(s)) => s.clone(),
            other => panic!("unexpected date_created: {:?}", other),
        };
        chrono::NaiveDateTime::parse_from_str(&created, "%Y-%m-%dT%H:%M:%S%.3fZ").unwrap();
    }

    #[test]
    fn fixed_and_flatten_variables() {
        let dir = TempDir::new("granules_test").unwrap();
        let doc = r#"{
            "dimensions": [
                {"name": "record", "index_by": "time",
                 "expected_cadence": {"record": 1.0}},
                {"name": "band", "size": 2},
                {"name": "report", "flatten": true}
            ],
            "variables": [
                {"name": "time", "dimensions": ["record"], "datatype": "float64",
                 "attributes": {"units": "seconds since 2017-01-01 00:00:00"}},
                {"name": "wavelength", "dimensions": ["band"], "datatype": "float32"},
                {"name": "status", "dimensions": ["report"], "datatype": "int32"}
            ],
            "attributes": []
        }"#;
        let mut config = Config::from_json(doc).unwrap();
        config.validate().unwrap();

        let write = |name: &str, times: &[f64], status: &[i32]| -> PathBuf {
            let mut ds = Dataset::new();
            ds.add_dimension("record", None);
            ds.add_dimension("band", Some(2));
            ds.add_dimension("report", None);
            let time =
                Array::from_shape_vec(IxDyn(&[times.len()]), times.to_vec()).unwrap();
            let mut time_attrs = IndexMap::new();
            time_attrs.insert("units".to_string(), AttrValue::Str(UNITS.into()));
            ds.add_variable("time", &["record"], DataValues::Float64(time), time_attrs, None)
                .unwrap();
            let wavelength =
                Array::from_shape_vec(IxDyn(&[2]), vec![100.0f32, 200.0]).unwrap();
            ds.add_variable(
                "wavelength",
                &["band"],
                DataValues::Float32(wavelength),
                IndexMap::new(),
                None,
            )
            .unwrap();
            let status =
                Array::from_shape_vec(IxDyn(&[status.len()]), status.to_vec()).unwrap();
            ds.add_variable(
                "status",
                &["report"],
                DataValues::Int32(status),
                IndexMap::new(),
                None,
            )
            .unwrap();
            let path = dir.path().join(name);
            ds.write(&path).unwrap();
            path
        };

        let t1: Vec<f64> = (0..5).map(|i| DAY + i as f64).collect();
        let t2: Vec<f64> = (0..5).map(|i| DAY + 5.0 + i as f64).collect();
        let a = write("a.gnc", &t1, &[1, 2, 3]);
        let b = write("b.gnc", &t2, &[9, 9, 9, 9, 9]);

        let plan = generate_plan(&config, &[a, b]).unwrap();
        let out_path = dir.path().join("out.gnc");
        evaluate_plan(&config, &plan, &out_path, None).unwrap();

        let out = Dataset::open(&out_path).unwrap();
        assert_eq!(out.dim_len("record"), Some(10));
        // flatten dims grow to the largest contribution, later
        // segments rewriting from the start
        assert_eq!(out.dim_len("report"), Some(5));
        let status = out.variable("status").unwrap();
        assert_eq!(
            status.values.as_f64_series(0, &[0]).unwrap(),
            vec![9.0, 9.0, 9.0, 9.0, 9.0]
        );
        let wavelength = out.variable("wavelength").unwrap();
        assert_eq!(
            wavelength.values.as_f64_series(0, &[0]).unwrap(),
            vec![100.0, 200.0]
        );
    }

    #[test]
    fn aggregate_reflects_config_from_first_input() {
        let dir = TempDir::new("granules_test").unwrap();
        let t1: Vec<f64> = (0..5).map(|i| DAY + i as f64).collect();
        let t2: Vec<f64> = (0..5).map(|i| DAY + 5.0 + i as f64).collect();
        let a = write_granule(&dir, "a.gnc", &t1, &[]);
        let b = write_granule(&dir, "b.gnc", &t2, &[]);

        let out_path = dir.path().join("out.gnc");
        aggregate(&[a, b], &out_path, None).unwrap();
        // no index_by reflected, so files concatenate in input order
        assert_eq!(time_series(&out_path).len(), 10);
    }

    #[test]
    fn size_conserved_across_plan() {
        let dir = TempDir::new("granules_test").unwrap();
        let t1: Vec<f64> = (0..7).map(|i| DAY + i as f64).collect();
        let t2: Vec<f64> = (0..9).map(|i| DAY + 20.0 + i as f64).collect();
        let a = write_granule(&dir, "a.gnc", &t1, &[]);
        let b = write_granule(&dir, "b.gnc", &t2, &[]);

        let config = test_config(None, None);
        let plan = generate_plan(&config, &[a, b]).unwrap();
        let dim = &config.dims["record"];
        let total: usize = plan.iter().map(|s| s.size_along(dim)).sum();

        let out_path = dir.path().join("out.gnc");
        evaluate_plan(&config, &plan, &out_path, None).unwrap();
        assert_eq!(time_series(&out_path).len(), total);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let dir = TempDir::new("granules_test").unwrap();
        let t1: Vec<f64> = (0..10).map(|i| DAY + i as f64).collect();
        let t2: Vec<f64> = (0..10).map(|i| DAY + 15.0 + i as f64).collect();
        let a = write_granule(&dir, "a.gnc", &t1, &[]);
        let b = write_granule(&dir, "b.gnc", &t2, &[]);

        let config = test_config(None, None);
        let once = dir.path().join("once.gnc");
        let plan = generate_plan(&config, &[a, b]).unwrap();
        evaluate_plan(&config, &plan, &once, None).unwrap();

        let twice = dir.path().join("twice.gnc");
        let plan = generate_plan(&config, &[once.clone()]).unwrap();
        evaluate_plan(&config, &plan, &twice, None).unwrap();

        assert_eq!(time_series(&once), time_series(&twice));
        assert_eq!(counts_series(&once), counts_series(&twice));
    }

    #[test]
    fn unreadable_inputs_excluded() {
        let dir = TempDir::new("granules_test").unwrap();
        let t1: Vec<f64> = (0..5).map(|i| DAY + i as f64).collect();
        let a = write_granule(&dir, "a.gnc", &t1, &[]);
        let junk = dir.path().join("junk.gnc");
        std::fs::write(&junk, b"not a container").unwrap();

        let config = test_config(None, None);
        let plan = generate_plan(&config, &[junk, a]).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn initialize_output_types_attributes() {
        let doc = r#"{
            "dimensions": [
                {"name": "record", "index_by": "time",
                 "expected_cadence": {"record": 1.0}}
            ],
            "variables": [
                {"name": "time", "dimensions": ["record"], "datatype": "float64",
                 "attributes": {"units": "seconds since 2017-01-01 00:00:00"}},
                {"name": "flags", "dimensions": ["record"], "datatype": "int16",
                 "attributes": {"_FillValue": 255.0,
                                "valid_min": 0.0,
                                "valid_range": "0, 12",
                                "flag_masks": [1, 2, 4]}}
            ],
            "attributes": []
        }"#;
        let mut config = Config::from_json(doc).unwrap();
        config.validate().unwrap();
        let out = initialize_output(&config).unwrap();
        let flags = out.variable("flags").unwrap();
        assert_eq!(flags.attribute(FILL_VALUE_ATTR), Some(&AttrValue::Int(255)));
        assert_eq!(flags.attribute("valid_min"), Some(&AttrValue::Int(0)));
        assert_eq!(
            flags.attribute("valid_range"),
            Some(&AttrValue::IntList(vec![0, 12]))
        );
        assert_eq!(
            flags.attribute("flag_masks"),
            Some(&AttrValue::IntList(vec![1, 2, 4]))
        );
        assert_eq!(out.dim_len("record"), Some(0));
    }

    #[test]
    fn empty_plan_writes_nothing() {
        let dir = TempDir::new("granules_test").unwrap();
        let config = test_config(None, None);
        let out_path = dir.path().join("out.gnc");
        evaluate_plan(&config, &[], &out_path, None).unwrap();
        assert!(!out_path.exists());
    }

    #[test]
    fn callback_runs_per_segment() {
        let dir = TempDir::new("granules_test").unwrap();
        let t1: Vec<f64> = (0..5).map(|i| DAY + i as f64).collect();
        let t2: Vec<f64> = (0..5).map(|i| DAY + 10.0 + i as f64).collect();
        let a = write_granule(&dir, "a.gnc", &t1, &[]);
        let b = write_granule(&dir, "b.gnc", &t2, &[]);

        let config = test_config(None, None);
        let plan = generate_plan(&config, &[a, b]).unwrap();
        let out_path = dir.path().join("out.gnc");
        let mut ticks = 0usize;
        {
            let mut bump = || ticks += 1;
            evaluate_plan(&config, &plan, &out_path, Some(&mut bump)).unwrap();
        }
        assert_eq!(ticks, plan.len());
    }
}
