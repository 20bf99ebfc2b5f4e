//! Command-line interface for nerctl.

mod commands;
pub mod progress;

pub use commands::{is_verbose, run};
