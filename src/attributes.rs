//! Global attribute reduction.
//!
//! Each configured global attribute is reduced by a named strategy:
//! `process` sees the attribute's value once per input file, and
//! `finalize` produces the output value (or nothing, omitting the
//! attribute). A failure inside one attribute's reduction never
//! aborts aggregation; it is logged and the attribute is skipped.

use std::path::Path;

use chrono::Utc;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::{AttributeConfig, Bound, Config, DimensionConfig};
use crate::dataset::time::format_timestamp;
use crate::dataset::{AttrValue, Dataset};
use crate::Error;

/// The reduction strategy names accepted in configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    First,
    Last,
    UniqueList,
    IntSum,
    FloatSum,
    Constant,
    Static,
    DateCreated,
    TimeCoverageStart,
    TimeCoverageEnd,
    Filename,
    Remove,
}

/// Context available to `finalize`.
struct FinalizeContext<'a> {
    config: &'a Config,
    output_path: &'a Path,
}

type StratResult<T> = std::result::Result<T, String>;

trait Strategy {
    /// Collect one occurrence of the attribute from an input file.
    fn process(&mut self, value: &AttrValue) -> StratResult<()>;

    /// The value the output attribute should be set to; `None` or an
    /// empty string omits the attribute.
    fn finalize(&self, ctx: &FinalizeContext) -> StratResult<Option<AttrValue>>;
}

#[derive(Default)]
struct First(Option<AttrValue>);

impl Strategy for First {
    fn process(&mut self, value: &AttrValue) -> StratResult<()> {
        if self.0.is_none() {
            self.0 = Some(value.clone());
        }
        Ok(())
    }

    fn finalize(&self, _ctx: &FinalizeContext) -> StratResult<Option<AttrValue>> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct Last(Option<AttrValue>);

impl Strategy for Last {
    fn process(&mut self, value: &AttrValue) -> StratResult<()> {
        self.0 = Some(value.clone());
        Ok(())
    }

    fn finalize(&self, _ctx: &FinalizeContext) -> StratResult<Option<AttrValue>> {
        Ok(self.0.clone())
    }
}

/// Union of `", "` separated items, preserving first-seen order.
#[derive(Default)]
struct UniqueList(Vec<String>);

impl Strategy for UniqueList {
    fn process(&mut self, value: &AttrValue) -> StratResult<()> {
        for item in value.to_string().split(',') {
            let item = item.trim();
            if !item.is_empty() && !self.0.iter().any(|seen| seen == item) {
                self.0.push(item.to_string());
            }
        }
        Ok(())
    }

    fn finalize(&self, _ctx: &FinalizeContext) -> StratResult<Option<AttrValue>> {
        Ok(Some(AttrValue::Str(self.0.join(", "))))
    }
}

#[derive(Default)]
struct IntSum(i64);

impl Strategy for IntSum {
    fn process(&mut self, value: &AttrValue) -> StratResult<()> {
        let v = value
            .as_i64()
            .ok_or_else(|| format!("not an integer: {}", value))?;
        self.0 += v;
        Ok(())
    }

    fn finalize(&self, _ctx: &FinalizeContext) -> StratResult<Option<AttrValue>> {
        Ok(Some(AttrValue::Int(self.0)))
    }
}

#[derive(Default)]
struct FloatSum(f64);

impl Strategy for FloatSum {
    fn process(&mut self, value: &AttrValue) -> StratResult<()> {
        let v = value
            .as_f64()
            .ok_or_else(|| format!("not a number: {}", value))?;
        self.0 += v;
        Ok(())
    }

    fn finalize(&self, _ctx: &FinalizeContext) -> StratResult<Option<AttrValue>> {
        Ok(Some(AttrValue::Float(self.0)))
    }
}

/// Keeps the first value and fails if any later occurrence differs.
#[derive(Default)]
struct Constant(Option<AttrValue>);

impl Strategy for Constant {
    fn process(&mut self, value: &AttrValue) -> StratResult<()> {
        match &self.0 {
            None => {
                self.0 = Some(value.clone());
                Ok(())
            }
            Some(seen) if seen == value => Ok(()),
            Some(seen) => Err(format!("non constant attribute: {} -> {}", seen, value)),
        }
    }

    fn finalize(&self, _ctx: &FinalizeContext) -> StratResult<Option<AttrValue>> {
        Ok(self.0.clone())
    }
}

/// Ignores inputs, finalizes to the configured value.
struct StaticValue(Option<AttrValue>);

impl Strategy for StaticValue {
    fn process(&mut self, _value: &AttrValue) -> StratResult<()> {
        Ok(())
    }

    fn finalize(&self, _ctx: &FinalizeContext) -> StratResult<Option<AttrValue>> {
        Ok(self.0.clone())
    }
}

struct DateCreated;

impl Strategy for DateCreated {
    fn process(&mut self, _value: &AttrValue) -> StratResult<()> {
        Ok(())
    }

    fn finalize(&self, _ctx: &FinalizeContext) -> StratResult<Option<AttrValue>> {
        Ok(Some(AttrValue::Str(format_timestamp(Utc::now().naive_utc()))))
    }
}

enum CoverageEdge {
    Start,
    End,
}

/// `time_coverage_start` / `time_coverage_end`: the configured bound
/// of the first unlimited dimension that has one, rendered as a
/// calendar timestamp through the indexing variable's units.
struct TimeCoverage(CoverageEdge);

impl TimeCoverage {
    fn bound<'a>(&self, dim: &'a DimensionConfig) -> Option<&'a Bound> {
        match self.0 {
            CoverageEdge::Start => dim.min.as_ref(),
            CoverageEdge::End => dim.max.as_ref(),
        }
    }
}

impl Strategy for TimeCoverage {
    fn process(&mut self, _value: &AttrValue) -> StratResult<()> {
        Ok(())
    }

    fn finalize(&self, ctx: &FinalizeContext) -> StratResult<Option<AttrValue>> {
        let dim = match ctx
            .config
            .dims
            .values()
            .find(|d| self.bound(d).is_some())
        {
            Some(dim) => dim,
            None => return Ok(None),
        };
        let text = match self.bound(dim) {
            Some(Bound::Time(t)) => format_timestamp(*t),
            Some(Bound::Number(v)) => {
                let units = ctx.config.index_units(dim).map_err(|e| e.to_string())?;
                format_timestamp(units.num_to_date(*v))
            }
            None => return Ok(None),
        };
        Ok(Some(AttrValue::Str(text)))
    }
}

struct OutputFilename;

impl Strategy for OutputFilename {
    fn process(&mut self, _value: &AttrValue) -> StratResult<()> {
        Ok(())
    }

    fn finalize(&self, ctx: &FinalizeContext) -> StratResult<Option<AttrValue>> {
        Ok(ctx
            .output_path
            .file_name()
            .map(|n| AttrValue::Str(n.to_string_lossy().into_owned())))
    }
}

struct Remove;

impl Strategy for Remove {
    fn process(&mut self, _value: &AttrValue) -> StratResult<()> {
        Ok(())
    }

    fn finalize(&self, _ctx: &FinalizeContext) -> StratResult<Option<AttrValue>> {
        Ok(None)
    }
}

fn build(attr: &AttributeConfig) -> Box<dyn Strategy> {
    match attr.strategy {
        StrategyKind::First => Box::new(First::default()),
        StrategyKind::Last => Box::new(Last::default()),
        StrategyKind::UniqueList => Box::new(UniqueList::default()),
        StrategyKind::IntSum => Box::new(IntSum::default()),
        StrategyKind::FloatSum => Box::new(FloatSum::default()),
        StrategyKind::Constant => Box::new(Constant::default()),
        StrategyKind::Static => Box::new(StaticValue(attr.value.clone())),
        StrategyKind::DateCreated => Box::new(DateCreated),
        StrategyKind::TimeCoverageStart => Box::new(TimeCoverage(CoverageEdge::Start)),
        StrategyKind::TimeCoverageEnd => Box::new(TimeCoverage(CoverageEdge::End)),
        StrategyKind::Filename => Box::new(OutputFilename),
        StrategyKind::Remove => Box::new(Remove),
    }
}

/// Drives one strategy instance per configured global attribute
/// through the aggregation.
pub struct AttributeHandler {
    entries: Vec<(String, Box<dyn Strategy>)>,
}

impl AttributeHandler {
    pub fn new(config: &Config) -> AttributeHandler {
        AttributeHandler {
            entries: config
                .attrs
                .values()
                .map(|a| (a.name.clone(), build(a)))
                .collect(),
        }
    }

    /// Feed the global attributes of one input file through every
    /// strategy. Missing and empty attributes are skipped silently;
    /// strategy failures are demoted to debug diagnostics.
    pub fn process_file(&mut self, ds: &Dataset) {
        for (name, strategy) in &mut self.entries {
            if let Some(value) = ds.attribute(name) {
                if value.is_empty() {
                    continue;
                }
                if let Err(reason) = strategy.process(value) {
                    debug!(
                        "{}",
                        Error::AttributeStrategy {
                            name: name.clone(),
                            reason
                        }
                    );
                }
            }
        }
    }

    /// Write each strategy's result onto the output. Empty results
    /// omit the attribute; failures are logged and skipped.
    pub fn finalize_file(&self, out: &mut Dataset, config: &Config, output_path: &Path) {
        let ctx = FinalizeContext {
            config,
            output_path,
        };
        for (name, strategy) in &self.entries {
            match strategy.finalize(&ctx) {
                Ok(Some(value)) if !value.is_empty() => out.set_attribute(name, value),
                Ok(_) => {}
                Err(reason) => error!(
                    "{}",
                    Error::AttributeStrategy {
                        name: name.clone(),
                        reason
                    }
                ),
            }
        }
    }
}
