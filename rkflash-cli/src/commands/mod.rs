//! Command implementations.
//!
//! Each subcommand group is implemented in its own module.

pub(crate) mod completions;
pub(crate) mod flash;
pub(crate) mod image;
pub(crate) mod info;
pub(crate) mod params;
