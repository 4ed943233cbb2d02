//! KDL configuration parsing for the TSDHN job pipeline.
//!
//! This crate handles parsing of:
//! - Pipeline definitions (pipeline.kdl)
//! - System configuration (tsdhn.kdl)
//! - Variable interpolation in command templates

pub mod error;
mod nodes;
pub mod pipeline;
pub mod system;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use system::{CallbackConfig, ReportRendererConfig, SystemConfig};
pub use variables::{JobContext, StepContext, VariableContext, VariableContextBuilder};
