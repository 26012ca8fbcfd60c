//! Installed plugin packages. Immutable once installed — ARIA's plugin
//! installer itself is out of scope; this is the read-only record the
//! subprocess executor consults to compute a task's `PATH`/`PYTHONPATH`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plugin {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    /// Installation prefix; `bin/` and `site-packages`-equivalent paths are
    /// derived from this by the subprocess executor.
    pub prefix: PathBuf,
}
