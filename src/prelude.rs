pub use crate::{Error, Result};

pub use crate::dataset::{AttrValue, DataType, DataValues, Dataset};

pub use crate::config::Config;

pub use crate::aggregator::{aggregate, evaluate_plan, generate_plan, Plan};
pub use crate::segment::Segment;
