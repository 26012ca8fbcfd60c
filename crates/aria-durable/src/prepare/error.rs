use uuid::Uuid;

use crate::graph::GraphError;
use crate::compiler::CompileError;
use crate::persistence::StoreError;

/// Errors the execution preparer can return (§4.10, §7 "user spec errors").
/// Distinct from [`StoreError`]/[`CompileError`] because these are caused by
/// the caller's request, not an internal failure — a caller distinguishes
/// them to decide whether retrying with different input makes sense.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("missing required inputs: {0:?}")]
    MissingRequiredInputs(Vec<String>),

    #[error("undeclared inputs: {0:?}")]
    UndeclaredInputs(Vec<String>),

    #[error("input {name} has the wrong type: expected {expected}, got {got}")]
    WrongInputType {
        name: String,
        expected: String,
        got: String,
    },

    #[error("service {service_id} already has an active execution")]
    ActiveExecutionExists { service_id: Uuid },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
}
