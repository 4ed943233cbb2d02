//! Core domain types and traits for the TSDHN job pipeline.
//!
//! This crate contains:
//! - Job identifiers, statuses and the public status document
//! - Processing step and pipeline definitions
//! - Process execution, host probing and callback traits
//! - The shared error taxonomy

pub mod error;
pub mod id;
pub mod job;
pub mod pipeline;
pub mod process;
pub mod step;

pub use error::{Error, MissingFile, Result};
pub use id::JobId;
pub use job::{JobInfo, JobStatus, SubmitReceipt};
pub use pipeline::{PipelineDefinition, SkipList};
pub use process::{Invocation, ProcessOutput, ProcessRunner, ToolProbe};
pub use step::{CallbackRegistry, CompileRule, FileCheck, ProcessingStep, StepAction, StepCallback};
