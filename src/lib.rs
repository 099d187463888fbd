//! Library to concatenate self-describing array granules along
//! extensible dimensions.
//!
//! An aggregation is a three step process:
//!
//! 1. build or reflect a [`config::Config`] describing the output;
//! 2. plan: [`aggregator::generate_plan`] turns a set of input files
//!    into an ordered list of file and fill segments;
//! 3. evaluate: [`aggregator::evaluate_plan`] materializes the plan
//!    into the output container.

pub mod error;
pub use error::{Error, Result};

pub mod dataset;

pub mod config;

pub mod attributes;
pub mod segment;

pub mod aggregator;

pub mod prelude;
