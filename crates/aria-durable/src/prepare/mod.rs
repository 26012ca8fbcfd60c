//! Turns a `(service, workflow, inputs)` request into a compiled execution
//! ready for the engine to schedule (§4.10), plus the built-in
//! `install`/`uninstall`/`start`/`stop` workflows (§6).

mod error;
mod preparer;
mod workflow;

pub use error::PrepareError;
pub use preparer::{ExecutionPreparer, PreparedExecution};
pub use workflow::{WorkflowContext, WorkflowDeclaration, WorkflowFn, WorkflowInputDecl, WorkflowInputType, WorkflowRegistry};
