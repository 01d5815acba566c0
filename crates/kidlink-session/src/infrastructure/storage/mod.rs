//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads and writes the TOML settings file and maps
//! it onto the runtime configuration structs used by the application and
//! infrastructure layers.

pub mod config;
