//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the agent's TOML configuration from the
//! platform config directory, supplies defaults on first run, and writes the
//! generated device id back.

pub mod config;
