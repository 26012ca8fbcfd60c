//! The graph compiler: lowers an [`crate::graph::ApiGraph`] into persisted
//! [`crate::model::Task`] rows connected by dependency edges (§4.3).

mod error;
mod graph_compiler;

pub use error::CompileError;
pub use graph_compiler::{CompiledGraph, GraphCompiler};
