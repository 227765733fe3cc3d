//! Submission validation: path resolution and field checks.

mod path;
mod request;

pub use path::{PathError, PathKind, PathValidator};
pub use request::{RequestValidator, ValidatedRequest};
