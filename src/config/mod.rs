//! Configuration management for the admission engine.
//! This module handles loading settings from an optional settings file
//! and from environment variables.

mod settings;

pub use settings::{default_rules, MetricsConfig, Settings, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
