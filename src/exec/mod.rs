//! Process execution layer.
//!
//! Every external tool runs through [`ProcessRunner`], either as a single
//! command or as a pipeline of commands sharing one failure domain.

mod runner;

pub use runner::{CommandPipeline, CommandSpec, ProcessRunner};
