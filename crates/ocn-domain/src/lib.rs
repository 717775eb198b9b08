//! Shared types for the device runtime: error taxonomy, configuration,
//! thought-trace events, and the narrow capability interfaces (§9) the
//! rest of the workspace is built against.

pub mod capability;
pub mod config;
pub mod error;
pub mod interfaces;
pub mod model;
pub mod stream;
pub mod tool;
pub mod trace;

pub use error::{Error, Result};
