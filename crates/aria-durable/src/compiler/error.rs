use crate::graph::GraphError;
use crate::persistence::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("api graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("store error while compiling graph: {0}")]
    Store(#[from] StoreError),
}
