//! Configuration management module
//!
//! Loads a TOML configuration file, with `serde` defaults filling in
//! anything the operator doesn't set.

mod config;

pub use config::*;
