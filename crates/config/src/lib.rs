//! Configuration module for vidaud
//!
//! Handles loading configuration from environment variables, with an optional
//! TOML file as the base layer.

pub mod config;

pub use config::*;
