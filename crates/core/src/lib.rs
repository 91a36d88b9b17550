//! Shared domain types for promptdeck.
//!
//! Job templates and the store they load from, generation parameters
//! and their template bindings, seeds, artifacts, and configuration.

pub mod artifact;
pub mod config;
pub mod error;
pub mod params;
pub mod seed;
pub mod template;
pub mod types;
