pub mod cli;
pub use granules::{Error, Result};
