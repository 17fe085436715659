//! Querykit: build, validate, run and render ad-hoc multi-table queries over
//! a schema catalog.

#![warn(missing_docs)]

pub mod config;
pub mod query;

pub use config::{ConfigError, EngineConfig, Settings};
