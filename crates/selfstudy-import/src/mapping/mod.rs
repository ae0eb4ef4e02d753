//! Standards mapping: taxonomy, pattern scoring, local mapper and reconciliation

pub mod local;
pub mod patterns;
pub mod reconciler;
pub mod taxonomy;

pub use local::LocalSectionMapper;
pub use patterns::{PatternMatcher, StandardScore};
pub use reconciler::{meets_threshold, AutoOutcome, ClearSummary, MappingReconciler};
pub use taxonomy::{Spec, Standard, Taxonomy};
