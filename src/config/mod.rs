//! Protocol configuration
//!
//! Loading and validation of YAML protocol files describing an
//! experiment's phases, triggers, barrier, and display pacing.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLimits, ConfigLoader, LoadResult, LoadWarning};
pub use schema::*;
pub use validation::{ValidationResult, Validator};
