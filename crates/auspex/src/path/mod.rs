//! Shortest reference paths from GC roots to leaking objects.

pub mod finder;
pub mod matcher;
pub mod node;

pub use finder::{LeakPath, ObjectKind, PathFinder, PathFindingResults, PathReference};
pub use matcher::{ReferenceMatcher, ReferencePattern};
pub use node::ReferenceType;
