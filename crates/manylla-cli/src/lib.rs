//! Manylla CLI library
//!
//! Argument parsing and subcommand handlers behind the `manylla` binary.

pub mod cli;
pub mod context;
pub mod share_cmd;
pub mod sync_cmd;
