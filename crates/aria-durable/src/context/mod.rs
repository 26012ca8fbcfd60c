//! The operation-facing `ctx` object and its HTTP surface for external
//! scripts (§4.9).

mod error;
mod model_accessor;
mod operation_context;
mod proxy;
mod resource;

pub use error::{ContextError, OperationError};
pub use model_accessor::{ExecutionAccessor, ModelAccessor, NodeAccessor, RelationshipAccessor, TaskAccessor};
pub use operation_context::{OperationContext, TaskHandle};
pub use proxy::{CtxCommand, CtxProxy, CtxResponse, CTX_SOCKET_URL_VAR};
pub use resource::{InMemoryResourceStore, ResourceAccessor, ResourceStore};
