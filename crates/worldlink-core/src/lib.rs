//! Core state for mirroring a server-authoritative object tree.
//!
//! This crate provides the single-threaded building blocks:
//! - `ObjectGraphStore` - Objects plus parent to children adjacency
//! - `DeltaRecord` - Parsed positional object updates
//! - `NavigationController` - Focus, movement and breadcrumbs
//! - `ViewNotifier` - Debounced render signal

pub mod graph;
pub mod navigation;
pub mod notifier;
pub mod object;

pub use graph::{GraphError, InvariantViolation, ObjectGraphStore};
pub use navigation::{Crumb, Direction, NavigationController};
pub use notifier::{Debouncer, ViewNotifier};
pub use object::{AttrValue, DeltaError, DeltaRecord, GameObject, ObjectId};
