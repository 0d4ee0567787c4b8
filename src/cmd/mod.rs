//! Command-line entry points.

pub mod common;
pub mod history;
pub mod improve;
pub mod schema;
pub mod wizard;
