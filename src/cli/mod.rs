//! Command-line interface for figcrop.

mod commands;
pub mod progress;

pub use commands::{is_verbose, run};
