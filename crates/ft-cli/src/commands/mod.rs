//! CLI subcommand implementations.

pub mod add;
pub mod check;
pub mod fields;
pub mod timeline;
pub mod util;
